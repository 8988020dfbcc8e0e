//! FaceLink Time - Frame pacing
//!
//! This crate turns a frame index into a wall-clock deadline:
//! - Fixed-rate targets anchored at a start instant
//! - Hybrid sleep / spin wait for sub-millisecond accuracy
//! - Configurable handling of frames that are already late

pub mod pacer;

pub use pacer::*;
