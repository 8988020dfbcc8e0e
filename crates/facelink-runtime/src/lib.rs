//! FaceLink Runtime - Idle loop, playback and the streaming pipeline
//!
//! Ties the lower crates together:
//! 1. The idle loop streams background animation while nothing is said
//! 2. The pipeline blends and pre-encodes generated speech
//! 3. The scheduler plays audio and dispatches frames in lockstep
//! 4. Barge-in drains everything and hands the face back to idle

pub mod audio;
pub mod config;
pub mod device;
pub mod idle;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod worker;

pub use audio::*;
pub use config::*;
pub use device::*;
pub use idle::*;
pub use pipeline::*;
pub use scheduler::*;
pub use session::*;
pub use worker::{EpochGate, Envelope, Stage, StageQueue, Worker};
