//! FaceLink Core - Fundamental types and primitives
//!
//! This crate defines the core types shared by every FaceLink crate:
//! - Channel catalogue (wire order, scaling groups)
//! - Poses and emotion vectors
//! - Subject identity
//! - Frame timing constants
//! - The error taxonomy

pub mod channel;
pub mod emotion;
pub mod error;
pub mod id;
pub mod pose;
pub mod time;

pub use channel::*;
pub use emotion::*;
pub use error::*;
pub use id::*;
pub use pose::*;
pub use time::*;
