//! FaceLink Wire Protocol - LiveLink face packet encoding
//!
//! This crate implements the outgoing frame format:
//! - Section scaling (mouth / eye / eyebrow with per-eye overrides)
//! - Per-subject encoder state with a caller-advanced frame counter
//! - Bit-exact packet serialization and a matching decoder

pub mod encoder;
pub mod packet;
pub mod scale;

pub use encoder::*;
pub use packet::*;
pub use scale::*;
