//! Playback scheduler - audio and frame dispatch in lockstep
//!
//! Audio runs on its own thread. Both sides meet at a two-party barrier,
//! then frame `i` is sent at `start + i / 60`. Only one playback runs at a
//! time; a second caller blocks until the first finishes.

use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use facelink_time::{FramePacer, PacerConfig};
use facelink_transport::PacketSink;
use facelink_wire::EncodedPacket;

use crate::{AudioSink, CancelToken};

/// What happened during one playback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Frames handed to the transport
    pub sent: usize,
    /// Frames the transport rejected
    pub dropped: usize,
    /// Frames sent after their deadline
    pub late: usize,
    /// Frames skipped for being more than a frame behind
    pub skipped: usize,
    pub cancelled: bool,
    /// From the start barrier to the end of dispatch
    pub elapsed: Duration,
}

/// Drives one pre-encoded sequence out of the transport
pub struct PlaybackScheduler {
    sink: Arc<dyn PacketSink>,
    audio: Arc<dyn AudioSink>,
    pacer: PacerConfig,
    active: Mutex<()>,
    current: Mutex<Option<CancelToken>>,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn PacketSink>, audio: Arc<dyn AudioSink>, pacer: PacerConfig) -> Self {
        PlaybackScheduler {
            sink,
            audio,
            pacer,
            active: Mutex::new(()),
            current: Mutex::new(None),
        }
    }

    pub fn pacer_config(&self) -> &PacerConfig {
        &self.pacer
    }

    /// Play with a fresh cancel token
    pub fn play(&self, packets: &[EncodedPacket], audio: &[u8]) -> PlaybackReport {
        self.play_with(packets, audio, CancelToken::new())
    }

    /// Play under a caller-supplied token.
    ///
    /// Blocks until every frame is dispatched and the audio has finished,
    /// or until the token is cancelled.
    pub fn play_with(
        &self,
        packets: &[EncodedPacket],
        audio: &[u8],
        cancel: CancelToken,
    ) -> PlaybackReport {
        let _active = self.active.lock();
        *self.current.lock() = Some(cancel.clone());

        let mut report = PlaybackReport::default();
        let barrier = Barrier::new(2);

        std::thread::scope(|scope| {
            let audio_thread = std::thread::Builder::new()
                .name("facelink-audio".into())
                .spawn_scoped(scope, || {
                    barrier.wait();
                    match self.audio.play(audio, &cancel) {
                        Ok(played) => tracing::trace!(?played, "audio finished"),
                        Err(e) => tracing::warn!(error = %e, "audio playback failed"),
                    }
                });
            if let Err(e) = &audio_thread {
                tracing::warn!(error = %e, "could not start audio thread, dispatching frames only");
            } else {
                barrier.wait();
            }

            let started = Instant::now();
            let pacer = FramePacer::starting_at(&self.pacer, started);
            for (i, packet) in packets.iter().enumerate() {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                let slot = pacer.wait_for(i);
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                if !slot.should_send() {
                    report.skipped += 1;
                    continue;
                }
                if slot.is_late() {
                    report.late += 1;
                }
                match self.sink.send(packet) {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        report.dropped += 1;
                        tracing::warn!(frame = i, error = %e, "frame dropped");
                    }
                }
            }
            report.elapsed = started.elapsed();

            if report.cancelled {
                cancel.cancel();
            }
        });

        *self.current.lock() = None;
        if report.cancelled {
            tracing::info!(sent = report.sent, total = packets.len(), "playback cancelled");
        } else {
            tracing::debug!(
                sent = report.sent,
                late = report.late,
                skipped = report.skipped,
                dropped = report.dropped,
                elapsed = ?report.elapsed,
                "playback finished"
            );
        }
        report
    }

    /// Cancel the playback in progress, if any
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().as_ref() {
            token.cancel();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_locked()
    }

    /// Block until no playback is running
    pub fn wait_idle(&self) {
        drop(self.active.lock());
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("pacer", &self.pacer)
            .field("playing", &self.is_playing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullAudioSink;
    use bytes::Bytes;
    use facelink_time::LatePolicy;
    use facelink_transport::MemorySink;

    fn packets(n: usize) -> Vec<EncodedPacket> {
        (0..n)
            .map(|i| EncodedPacket::from(Bytes::from(vec![i as u8; 8])))
            .collect()
    }

    fn scheduler(sink: Arc<MemorySink>, pacer: PacerConfig) -> PlaybackScheduler {
        PlaybackScheduler::new(sink, Arc::new(NullAudioSink), pacer)
    }

    #[test]
    fn test_sends_in_order() {
        let sink = Arc::new(MemorySink::new());
        let report = scheduler(sink.clone(), PacerConfig::default()).play(&packets(12), &[]);
        assert_eq!(report.sent, 12);
        assert!(!report.cancelled);
        let sent = sink.sent();
        for (i, s) in sent.iter().enumerate() {
            assert_eq!(s.packet.as_bytes()[0], i as u8);
        }
        // Last frame goes out at 11/60 s
        assert!(report.elapsed >= Duration::from_millis(180));
    }

    #[test]
    fn test_send_failures_are_not_fatal() {
        let sink = Arc::new(MemorySink::new());
        sink.set_failing(true);
        let report = scheduler(sink.clone(), PacerConfig::default()).play(&packets(5), &[]);
        assert_eq!(report.dropped, 5);
        assert_eq!(report.sent, 0);
    }

    #[test]
    fn test_cancel_from_other_thread() {
        let sink = Arc::new(MemorySink::new());
        let scheduler = Arc::new(scheduler(sink.clone(), PacerConfig::default()));

        let player = {
            let scheduler = scheduler.clone();
            std::thread::spawn(move || scheduler.play(&packets(240), &[]))
        };
        std::thread::sleep(Duration::from_millis(100));
        assert!(scheduler.is_playing());
        scheduler.cancel();
        scheduler.wait_idle();
        assert!(!scheduler.is_playing());

        let report = player.join().unwrap();
        assert!(report.cancelled);
        assert!(report.sent < 240);
    }

    #[test]
    fn test_precancelled_token() {
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(sink.clone(), PacerConfig::default());
        let token = CancelToken::new();
        token.cancel();
        let report = scheduler.play_with(&packets(10), &[], token);
        assert!(report.cancelled);
        assert_eq!(report.sent, 0);
        assert!(sink.is_empty());
    }

    /// Stalls on the first send
    struct StallingSink {
        inner: MemorySink,
        stall: Duration,
    }

    impl PacketSink for StallingSink {
        fn send(&self, packet: &EncodedPacket) -> facelink_core::FaceLinkResult<()> {
            if self.inner.is_empty() {
                std::thread::sleep(self.stall);
            }
            self.inner.send(packet)
        }
    }

    #[test]
    fn test_skip_policy_drops_backlog() {
        let stalling = Arc::new(StallingSink {
            inner: MemorySink::new(),
            stall: Duration::from_millis(100),
        });
        let pacer = PacerConfig {
            late_policy: LatePolicy::SkipIfBehind,
            ..PacerConfig::default()
        };
        let scheduler = PlaybackScheduler::new(stalling.clone(), Arc::new(NullAudioSink), pacer);
        let report = scheduler.play(&packets(20), &[]);
        assert!(report.skipped >= 3, "{report:?}");
        assert_eq!(report.sent + report.skipped, 20);
        assert_eq!(stalling.inner.len(), report.sent);
    }

    #[test]
    fn test_send_late_policy_keeps_backlog() {
        let stalling = Arc::new(StallingSink {
            inner: MemorySink::new(),
            stall: Duration::from_millis(100),
        });
        let scheduler =
            PlaybackScheduler::new(stalling.clone(), Arc::new(NullAudioSink), PacerConfig::default());
        let report = scheduler.play(&packets(20), &[]);
        assert_eq!(report.sent, 20);
        assert_eq!(report.skipped, 0);
        assert!(report.late >= 3);
    }
}
