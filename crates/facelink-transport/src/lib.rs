//! FaceLink Transport Layer
//!
//! This crate provides:
//! - The `PacketSink` seam used by every sender
//! - UDP transport connected to the animation engine
//! - An in-memory sink for tests and dry runs
//! - Speaking notifications for an external emote server

pub mod emote;
pub mod sink;
pub mod udp;

pub use emote::*;
pub use sink::*;
pub use udp::*;
