//! FaceLink Visual - Animation clips and blending
//!
//! This crate covers everything between a generated pose sequence and the
//! encoder:
//! - Clip files and the read-only clip library
//! - Loop blending for seamless idle and emotion loops
//! - Emotion overlay for 68-wide sequences
//! - Idle fade-in / fade-out and chunk splicing
//!
//! Nothing here touches the network or a clock.

pub mod blend;
pub mod clip;
pub mod emotion;
pub mod library;
pub mod loop_blend;

pub use blend::*;
pub use clip::*;
pub use emotion::*;
pub use library::*;
pub use loop_blend::*;
