//! Idle loop manager
//!
//! Streams the idle clip at 60 Hz on its own thread whenever nothing else
//! is talking. The loop thread owns the idle `EncoderState` while it runs
//! and hands it back when paused, so frame counters carry across pauses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use facelink_core::{FaceLinkError, FaceLinkResult, Pose};
use facelink_time::{FramePacer, FrameSlot, PacerConfig};
use facelink_transport::PacketSink;
use facelink_visual::ClipLibrary;
use facelink_wire::EncoderState;

/// Shared read access to the idle loop's position
#[derive(Debug, Clone, Default)]
pub struct IdleIndex(Arc<Mutex<usize>>);

impl IdleIndex {
    /// Index of the next idle frame to be sent
    pub fn get(&self) -> usize {
        *self.0.lock()
    }

    fn set(&self, index: usize) {
        *self.0.lock() = index;
    }
}

struct RunningLoop {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<EncoderState>,
}

enum LoopState {
    Paused(EncoderState),
    Running(RunningLoop),
    /// The loop thread panicked and took the encoder with it
    Lost,
}

/// Background idle animation
pub struct IdleLoop {
    frames: Arc<Vec<Pose>>,
    sink: Arc<dyn PacketSink>,
    pacer: PacerConfig,
    index: IdleIndex,
    state: Mutex<LoopState>,
}

impl IdleLoop {
    /// Create a paused idle loop over the library's idle clip
    pub fn new(
        library: &ClipLibrary,
        sink: Arc<dyn PacketSink>,
        encoder: EncoderState,
        pacer: PacerConfig,
    ) -> Self {
        let frames = library.idle().frames().iter().map(Pose::to_base).collect();
        IdleLoop {
            frames: Arc::new(frames),
            sink,
            pacer,
            index: IdleIndex::default(),
            state: Mutex::new(LoopState::Paused(encoder)),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.index.get()
    }

    pub fn index(&self) -> IdleIndex {
        self.index.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), LoopState::Running(_))
    }

    /// Start the loop thread. No-op if already running.
    pub fn resume(&self) -> FaceLinkResult<()> {
        let mut state = self.state.lock();
        let encoder = match std::mem::replace(&mut *state, LoopState::Lost) {
            LoopState::Paused(encoder) => encoder,
            running @ LoopState::Running(_) => {
                *state = running;
                return Ok(());
            }
            LoopState::Lost => {
                return Err(FaceLinkError::Config("idle encoder lost".into()));
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let worker = IdleWorker {
            frames: Arc::clone(&self.frames),
            sink: Arc::clone(&self.sink),
            pacer: self.pacer.clone(),
            index: self.index.clone(),
            stop: Arc::clone(&stop),
            encoder: encoder.clone(),
        };

        match std::thread::Builder::new()
            .name("facelink-idle".into())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                *state = LoopState::Running(RunningLoop { stop, handle });
                tracing::debug!(index = self.index.get(), "idle loop resumed");
                Ok(())
            }
            Err(e) => {
                *state = LoopState::Paused(encoder);
                Err(e.into())
            }
        }
    }

    /// Resume from a given idle frame
    pub fn resume_at(&self, index: usize) -> FaceLinkResult<()> {
        {
            let state = self.state.lock();
            if !matches!(*state, LoopState::Running(_)) && !self.frames.is_empty() {
                self.index.set(index % self.frames.len());
            }
        }
        self.resume()
    }

    /// Stop the loop thread and wait for it to exit. No-op if paused.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        let running = match std::mem::replace(&mut *state, LoopState::Lost) {
            LoopState::Running(running) => running,
            other => {
                *state = other;
                return;
            }
        };

        running.stop.store(true, Ordering::SeqCst);
        match running.handle.join() {
            Ok(encoder) => {
                *state = LoopState::Paused(encoder);
                tracing::debug!(index = self.index.get(), "idle loop paused");
            }
            Err(_) => tracing::error!("idle loop thread panicked"),
        }
    }
}

impl Drop for IdleLoop {
    fn drop(&mut self) {
        self.pause();
    }
}

impl std::fmt::Debug for IdleLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleLoop")
            .field("frames", &self.frames.len())
            .field("index", &self.index.get())
            .field("running", &self.is_running())
            .finish()
    }
}

struct IdleWorker {
    frames: Arc<Vec<Pose>>,
    sink: Arc<dyn PacketSink>,
    pacer: PacerConfig,
    index: IdleIndex,
    stop: Arc<AtomicBool>,
    encoder: EncoderState,
}

impl IdleWorker {
    fn run(mut self) -> EncoderState {
        if self.frames.is_empty() {
            return self.encoder;
        }

        let mut pacer = FramePacer::new(&self.pacer);
        let mut tick = 0usize;
        while !self.stop.load(Ordering::SeqCst) {
            if let FrameSlot::Late(behind) | FrameSlot::Skip(behind) = pacer.wait_for(tick) {
                if behind > pacer.period() {
                    // Stalled (suspend, debugger); re-anchor instead of bursting
                    pacer.restart();
                    tick = 0;
                }
            }
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let i = self.index.get() % self.frames.len();
            match self.encoder.encode_pose(&self.frames[i]) {
                Ok(packet) => {
                    if let Err(e) = self.sink.send(&packet) {
                        tracing::warn!(frame = i, error = %e, "idle frame dropped");
                    }
                }
                Err(e) => tracing::warn!(frame = i, error = %e, "idle frame failed to encode"),
            }
            self.encoder.advance();
            self.index.set((i + 1) % self.frames.len());
            tick += 1;
        }
        self.encoder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelink_core::{Channel, PoseWidth};
    use facelink_transport::MemorySink;
    use facelink_visual::AnimationClip;
    use facelink_wire::{decode_packet, EncoderConfig};
    use std::time::Duration;

    fn library(len: usize) -> ClipLibrary {
        let frames = (0..len)
            .map(|i| {
                let mut p = Pose::zeros(PoseWidth::Base);
                p.set(Channel::JawOpen, i as f32 / len as f32);
                p
            })
            .collect();
        ClipLibrary::new(AnimationClip::new("idle", frames).unwrap())
    }

    fn idle_loop(sink: Arc<MemorySink>) -> IdleLoop {
        let encoder = EncoderState::new(&EncoderConfig {
            subject_id: Some("idle".into()),
            ..EncoderConfig::default()
        });
        IdleLoop::new(&library(30), sink, encoder, PacerConfig::default())
    }

    #[test]
    fn test_streams_until_paused() {
        let sink = Arc::new(MemorySink::new());
        let idle = idle_loop(sink.clone());
        assert!(!idle.is_running());

        idle.resume().unwrap();
        assert!(idle.is_running());
        std::thread::sleep(Duration::from_millis(200));
        idle.pause();
        assert!(!idle.is_running());

        let sent = sink.len();
        assert!((8..=16).contains(&sent), "sent {sent}");
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.len(), sent);
        assert_eq!(idle.current_index(), sent % 30);
    }

    #[test]
    fn test_pause_resume_idempotent() {
        let sink = Arc::new(MemorySink::new());
        let idle = idle_loop(sink);
        idle.pause();
        idle.resume().unwrap();
        idle.resume().unwrap();
        idle.pause();
        idle.pause();
        assert!(!idle.is_running());
    }

    #[test]
    fn test_frame_counter_carries_across_pause() {
        let sink = Arc::new(MemorySink::new());
        let idle = idle_loop(sink.clone());
        idle.resume().unwrap();
        std::thread::sleep(Duration::from_millis(60));
        idle.pause();
        idle.resume().unwrap();
        std::thread::sleep(Duration::from_millis(60));
        idle.pause();

        let id_len = "$idle".len();
        let counts: Vec<u32> = sink
            .sent()
            .iter()
            .map(|s| decode_packet(s.packet.as_bytes(), id_len).unwrap().frame_count)
            .collect();
        assert!(counts.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
    }

    #[test]
    fn test_resume_at_sets_index() {
        let sink = Arc::new(MemorySink::new());
        let idle = idle_loop(sink.clone());
        idle.resume_at(47).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        idle.pause();

        let first = decode_packet(sink.sent()[0].packet.as_bytes(), "$idle".len()).unwrap();
        let jaw = first.values[Channel::JawOpen.index()];
        assert!((jaw - 17.0 / 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_send_errors_do_not_stop_loop() {
        let sink = Arc::new(MemorySink::new());
        sink.set_failing(true);
        let idle = idle_loop(sink.clone());
        idle.resume().unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert!(idle.is_running());
        sink.set_failing(false);
        std::thread::sleep(Duration::from_millis(60));
        idle.pause();
        assert!(!sink.is_empty());
    }
}
