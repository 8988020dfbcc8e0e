//! Packet sink seam

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use facelink_core::{FaceLinkError, FaceLinkResult};
use facelink_wire::EncodedPacket;

/// Destination for encoded frames. Fire-and-forget: no ack, no retry.
pub trait PacketSink: Send + Sync {
    fn send(&self, packet: &EncodedPacket) -> FaceLinkResult<()>;
}

impl<T: PacketSink + ?Sized> PacketSink for Arc<T> {
    fn send(&self, packet: &EncodedPacket) -> FaceLinkResult<()> {
        (**self).send(packet)
    }
}

impl<T: PacketSink + ?Sized> PacketSink for Box<T> {
    fn send(&self, packet: &EncodedPacket) -> FaceLinkResult<()> {
        (**self).send(packet)
    }
}

/// A packet captured by [`MemorySink`]
#[derive(Debug, Clone)]
pub struct SentPacket {
    pub at: Instant,
    pub packet: EncodedPacket,
}

/// Records every packet in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<SentPacket>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail with `TransportSendFailure`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }

    /// Snapshot of everything sent so far
    pub fn sent(&self) -> Vec<SentPacket> {
        self.sent.lock().clone()
    }

    /// Take everything sent so far
    pub fn drain(&self) -> Vec<SentPacket> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl PacketSink for MemorySink {
    fn send(&self, packet: &EncodedPacket) -> FaceLinkResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FaceLinkError::TransportSendFailure(
                "memory sink set to fail".into(),
            ));
        }
        self.sent.lock().push(SentPacket {
            at: Instant::now(),
            packet: packet.clone(),
        });
        Ok(())
    }
}

/// Discards every packet
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PacketSink for NullSink {
    fn send(&self, _packet: &EncodedPacket) -> FaceLinkResult<()> {
        Ok(())
    }
}
