//! Stream pipeline: synthesis → blend/encode → playback
//!
//! Each stage runs on its own [`Worker`]. Generated chunks of one utterance
//! are blended as a segment: the first fades in from idle, later ones are
//! spliced on, and the one that finds nothing pending behind it fades out.
//! The idle loop only takes over again after a chunk that faded out, so a
//! producer that falls behind costs a fade, never a cut.
//!
//! Barge-in advances the epoch, drains every queue, cancels the playback in
//! flight and hands the face back to the idle loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use facelink_core::{FaceLinkError, FaceLinkResult, Pose};
use facelink_transport::EmoteClient;
use facelink_visual::{BlendEngine, TransitionKind};
use facelink_wire::EncodedPacket;

use crate::worker::wait_until;
use crate::{CancelToken, EpochGate, IdleLoop, PlaybackScheduler, Stage, StageQueue, Worker};

/// Poses plus the audio they animate
#[derive(Debug, Clone, Default)]
pub struct GeneratedSequence {
    pub poses: Vec<Pose>,
    pub audio: Bytes,
}

impl GeneratedSequence {
    pub fn new(poses: Vec<Pose>, audio: impl Into<Bytes>) -> Self {
        GeneratedSequence {
            poses,
            audio: audio.into(),
        }
    }
}

/// External text → speech + blendshapes service
pub trait SpeechSynthesizer: Send {
    /// One or more chunks for `text`, in playback order
    fn synthesize(&mut self, text: &str) -> FaceLinkResult<Vec<GeneratedSequence>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    /// Start the idle loop with the pipeline
    pub idle_on_start: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            queue_capacity: 32,
            idle_on_start: true,
        }
    }
}

/// Everything the pipeline drives
pub struct PipelineParts {
    pub idle: Arc<IdleLoop>,
    pub scheduler: Arc<PlaybackScheduler>,
    pub engine: BlendEngine,
    pub emote: EmoteClient,
    pub synthesizer: Option<Box<dyn SpeechSynthesizer>>,
}

/// A pre-encoded chunk ready to play
#[derive(Debug)]
struct PlaybackItem {
    packets: Vec<EncodedPacket>,
    audio: Bytes,
    resume_index: usize,
    /// Ends on idle frames, so idle may take over after it
    closes_segment: bool,
}

struct Shared {
    gate: Arc<EpochGate>,
    idle: Arc<IdleLoop>,
    scheduler: Arc<PlaybackScheduler>,
    emote: EmoteClient,
    playing: Mutex<Option<CancelToken>>,
    text: StageQueue<String>,
    sequences: StageQueue<GeneratedSequence>,
    playback: StageQueue<PlaybackItem>,
}

impl Shared {
    fn flush_all(&self) -> usize {
        self.text.flush() + self.sequences.flush() + self.playback.flush()
    }

    /// Hand back to idle unless a playback has claimed the face. Checked
    /// under the gate, where the playback stage claims its token.
    fn resume_idle_unless_playing(&self, epoch: u64) -> bool {
        self.gate
            .with_current(epoch, || {
                if self.playing.lock().is_some() || self.scheduler.is_playing() {
                    return false;
                }
                self.resume_idle(None);
                true
            })
            .unwrap_or(false)
    }

    fn resume_idle(&self, index: Option<usize>) {
        let was_running = self.idle.is_running();
        let resumed = match index {
            Some(index) => self.idle.resume_at(index),
            None => self.idle.resume(),
        };
        match resumed {
            Ok(()) if !was_running => self.emote.stop_speaking(),
            Ok(()) => {}
            Err(e) => tracing::error!(error = %e, "idle loop failed to resume"),
        }
    }
}

struct SynthesisStage {
    shared: Arc<Shared>,
    synthesizer: Option<Box<dyn SpeechSynthesizer>>,
}

impl Stage for SynthesisStage {
    type Item = String;

    fn name(&self) -> &'static str {
        "synthesis"
    }

    fn process(&mut self, epoch: u64, text: String) {
        let Some(synthesizer) = self.synthesizer.as_mut() else {
            tracing::warn!("no speech synthesizer configured, dropping text");
            return;
        };
        let chunks = match synthesizer.synthesize(&text) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis failed");
                return;
            }
        };

        if let Err(e) = self.shared.sequences.push_all(&self.shared.gate, epoch, chunks) {
            tracing::warn!(error = %e, "sequence queue closed");
        }
    }

    fn finish(&mut self) {
        if let Err(e) = self.shared.sequences.push_shutdown() {
            tracing::warn!(error = %e, "could not forward shutdown");
        }
    }
}

struct EncodeStage {
    shared: Arc<Shared>,
    engine: BlendEngine,
    epoch: u64,
}

impl Stage for EncodeStage {
    type Item = GeneratedSequence;

    fn name(&self) -> &'static str {
        "encode"
    }

    fn process(&mut self, epoch: u64, sequence: GeneratedSequence) {
        if epoch != self.epoch {
            self.engine.reset_segment();
            self.epoch = epoch;
        }

        // Batches land under the gate, so this sees a whole batch or none
        let more_pending = self
            .shared
            .gate
            .with_current(epoch, || !self.shared.sequences.is_empty())
            .unwrap_or(false);
        let kind = TransitionKind::for_chunk(self.engine.segment_open(), more_pending);
        let live_index = self.shared.idle.current_index();

        let was_open = self.engine.segment_open();
        let chunk = match self.engine.encode_sequence(sequence.poses, kind, live_index) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "dropping sequence");
                if was_open && !more_pending {
                    // Nothing left to close the segment with; let idle back in
                    self.engine.reset_segment();
                    let close = PlaybackItem {
                        packets: Vec::new(),
                        audio: Bytes::new(),
                        resume_index: live_index,
                        closes_segment: true,
                    };
                    self.push_item(epoch, close);
                }
                return;
            }
        };
        tracing::debug!(
            frames = chunk.packets.len(),
            kind = ?chunk.kind,
            emotion = ?chunk.emotion,
            "sequence encoded"
        );

        let item = PlaybackItem {
            packets: chunk.packets,
            audio: sequence.audio,
            resume_index: chunk.resume_index,
            closes_segment: chunk.kind.blends_out(),
        };
        self.push_item(epoch, item);
    }

    fn finish(&mut self) {
        if let Err(e) = self.shared.playback.push_shutdown() {
            tracing::warn!(error = %e, "could not forward shutdown");
        }
    }
}

impl EncodeStage {
    fn push_item(&self, epoch: u64, item: PlaybackItem) {
        if let Err(e) = self.shared.playback.push(&self.shared.gate, epoch, item) {
            tracing::warn!(error = %e, "playback queue closed");
        }
    }
}

struct PlaybackStage {
    shared: Arc<Shared>,
}

impl Stage for PlaybackStage {
    type Item = PlaybackItem;

    fn name(&self) -> &'static str {
        "playback"
    }

    fn process(&mut self, epoch: u64, item: PlaybackItem) {
        let shared = &self.shared;
        if item.packets.is_empty() && item.audio.is_empty() {
            if item.closes_segment && shared.playback.is_empty() {
                shared.resume_idle(Some(item.resume_index));
            }
            return;
        }
        let Some(token) = shared.gate.with_current(epoch, || {
            let token = CancelToken::new();
            *shared.playing.lock() = Some(token.clone());
            token
        }) else {
            return;
        };

        if shared.idle.is_running() {
            shared.idle.pause();
            shared.emote.start_speaking();
        }

        let report = shared
            .scheduler
            .play_with(&item.packets, &item.audio, token);
        shared.playing.lock().take();

        // An open segment holds its last frame until the next chunk splices on
        if report.cancelled {
            if shared.playback.is_empty() {
                shared.resume_idle_unless_playing(shared.gate.current());
            }
        } else if item.closes_segment && shared.playback.is_empty() {
            shared.resume_idle(Some(item.resume_index));
        }
    }
}

/// Running pipeline
pub struct StreamPipeline {
    shared: Arc<Shared>,
    workers: Vec<Worker>,
}

impl StreamPipeline {
    /// Spawn every stage and, if configured, start the idle loop
    pub fn start(config: &PipelineConfig, parts: PipelineParts) -> FaceLinkResult<Self> {
        let shared = Arc::new(Shared {
            gate: Arc::new(EpochGate::new()),
            idle: parts.idle,
            scheduler: parts.scheduler,
            emote: parts.emote,
            playing: Mutex::new(None),
            text: StageQueue::bounded(config.queue_capacity),
            sequences: StageQueue::bounded(config.queue_capacity),
            playback: StageQueue::bounded(config.queue_capacity),
        });

        let mut pipeline = StreamPipeline {
            shared: Arc::clone(&shared),
            workers: Vec::with_capacity(3),
        };

        let synthesis = SynthesisStage {
            shared: Arc::clone(&shared),
            synthesizer: parts.synthesizer,
        };
        pipeline.workers.push(Worker::spawn(
            synthesis,
            shared.text.clone(),
            Arc::clone(&shared.gate),
        )?);

        let encode = EncodeStage {
            shared: Arc::clone(&shared),
            engine: parts.engine,
            epoch: shared.gate.current(),
        };
        pipeline.workers.push(Worker::spawn(
            encode,
            shared.sequences.clone(),
            Arc::clone(&shared.gate),
        )?);

        let playback = PlaybackStage {
            shared: Arc::clone(&shared),
        };
        pipeline.workers.push(Worker::spawn(
            playback,
            shared.playback.clone(),
            Arc::clone(&shared.gate),
        )?);

        if config.idle_on_start {
            shared.idle.resume()?;
        }
        tracing::info!(queue_capacity = config.queue_capacity, "pipeline started");
        Ok(pipeline)
    }

    /// Queue a generated sequence for blending and playback
    pub fn submit(&self, sequence: GeneratedSequence) -> FaceLinkResult<()> {
        let epoch = self.shared.gate.current();
        self.shared
            .sequences
            .push(&self.shared.gate, epoch, sequence)
            .map(|_| ())
    }

    /// Queue the chunks of one utterance together. They are spliced into a
    /// single segment that fades in once and out once.
    pub fn submit_all(&self, sequences: Vec<GeneratedSequence>) -> FaceLinkResult<()> {
        let epoch = self.shared.gate.current();
        self.shared
            .sequences
            .push_all(&self.shared.gate, epoch, sequences)
            .map(|_| ())
    }

    /// Queue text for the speech synthesizer
    pub fn submit_text(&self, text: impl Into<String>) -> FaceLinkResult<()> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(FaceLinkError::Config("empty text".into()));
        }
        let epoch = self.shared.gate.current();
        self.shared
            .text
            .push(&self.shared.gate, epoch, text)
            .map(|_| ())
    }

    /// Barge-in: drop everything queued, stop the audio and frames in
    /// flight, and return to idle once all queues are empty
    pub fn interrupt(&self) {
        let shared = &self.shared;
        let (epoch, dropped) = shared.gate.advance(|epoch| {
            if let Some(token) = shared.playing.lock().take() {
                token.cancel();
            }
            let dropped = shared.flush_all();
            tracing::info!(epoch, dropped, "barge-in");
            (epoch, dropped)
        });

        shared.scheduler.wait_idle();
        // Stale hand-offs are refused by the gate, but a stage may still be
        // draining one it took before the flush
        if shared.flush_all() > 0 {
            tracing::debug!(initial = dropped, "flushed late stale items");
        }
        // A playback submitted since the barge-in owns the face now
        if self.queues_empty() && !shared.resume_idle_unless_playing(epoch) {
            tracing::debug!(epoch, "new playback started, idle stays paused");
        }
    }

    /// Whether every stage queue is empty right now
    pub fn queues_empty(&self) -> bool {
        let shared = &self.shared;
        shared.text.is_empty() && shared.sequences.is_empty() && shared.playback.is_empty()
    }

    /// Wait until every submitted item has been played or dropped
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        wait_until(timeout, || {
            shared.text.pending() == 0
                && shared.sequences.pending() == 0
                && shared.playback.pending() == 0
        })
    }

    pub fn epoch(&self) -> u64 {
        self.shared.gate.current()
    }

    pub fn idle(&self) -> &Arc<IdleLoop> {
        &self.shared.idle
    }

    pub fn is_playing(&self) -> bool {
        self.shared.scheduler.is_playing()
    }

    /// Push the shutdown sentinel through every stage and join them.
    /// Work already queued is played first.
    pub fn shutdown(self) {
        if let Err(e) = self.shared.text.push_shutdown() {
            tracing::warn!(error = %e, "could not start shutdown");
        }
        for worker in self.workers {
            let name = worker.name();
            worker.join();
            tracing::debug!(stage = name, "stage joined");
        }
        self.shared.idle.pause();
        tracing::info!("pipeline stopped");
    }
}

impl std::fmt::Debug for StreamPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPipeline")
            .field("epoch", &self.epoch())
            .field("workers", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullAudioSink;
    use facelink_core::{Channel, PoseWidth};
    use facelink_time::PacerConfig;
    use facelink_transport::MemorySink;
    use facelink_visual::{AnimationClip, BlendConfig, ClipLibrary, EmotionConfig};
    use facelink_wire::{decode_packet, EncoderConfig, EncoderState};

    const SUBJECT: &str = "$unit";

    fn parts(sink: Arc<MemorySink>, synthesizer: Option<Box<dyn SpeechSynthesizer>>) -> PipelineParts {
        let library = Arc::new(ClipLibrary::new(AnimationClip::neutral()));
        let encoder = EncoderState::new(&EncoderConfig {
            subject_id: Some(SUBJECT.into()),
            ..EncoderConfig::default()
        });
        let idle = Arc::new(IdleLoop::new(
            &library,
            sink.clone(),
            encoder.clone(),
            PacerConfig::default(),
        ));
        let scheduler = Arc::new(PlaybackScheduler::new(
            sink,
            Arc::new(NullAudioSink),
            PacerConfig::default(),
        ));
        let engine = BlendEngine::new(
            BlendConfig::default(),
            EmotionConfig::default(),
            library,
            encoder,
        );
        PipelineParts {
            idle,
            scheduler,
            engine,
            emote: EmoteClient::disabled(),
            synthesizer,
        }
    }

    fn talking(len: usize) -> Vec<Pose> {
        (0..len)
            .map(|_| {
                let mut p = Pose::zeros(PoseWidth::Base);
                p.set(Channel::JawOpen, 0.8);
                p
            })
            .collect()
    }

    struct Canned;

    impl SpeechSynthesizer for Canned {
        fn synthesize(&mut self, text: &str) -> FaceLinkResult<Vec<GeneratedSequence>> {
            Ok(text
                .split_whitespace()
                .map(|_| GeneratedSequence::new(talking(6), Bytes::new()))
                .collect())
        }
    }

    #[test]
    fn test_submit_plays_and_returns_to_idle() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = StreamPipeline::start(
            &PipelineConfig {
                idle_on_start: false,
                ..PipelineConfig::default()
            },
            parts(sink.clone(), None),
        )
        .unwrap();

        pipeline
            .submit(GeneratedSequence::new(talking(30), Bytes::new()))
            .unwrap();
        assert!(pipeline.wait_until_drained(Duration::from_secs(2)));
        assert!(pipeline.idle().is_running());
        assert!(sink.len() >= 30);
        pipeline.shutdown();
    }

    #[test]
    fn test_submit_text_without_synthesizer_is_dropped() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = StreamPipeline::start(
            &PipelineConfig {
                idle_on_start: false,
                ..PipelineConfig::default()
            },
            parts(sink.clone(), None),
        )
        .unwrap();
        assert!(pipeline.submit_text("  ").is_err());
        pipeline.submit_text("hello").unwrap();
        assert!(pipeline.wait_until_drained(Duration::from_secs(1)));
        assert!(sink.is_empty());
        pipeline.shutdown();
    }

    #[test]
    fn test_synthesized_chunks_play() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = StreamPipeline::start(
            &PipelineConfig {
                idle_on_start: false,
                ..PipelineConfig::default()
            },
            parts(sink.clone(), Some(Box::new(Canned))),
        )
        .unwrap();
        pipeline.submit_text("three word reply").unwrap();
        assert!(pipeline.wait_until_drained(Duration::from_secs(2)));
        pipeline.idle().pause();
        assert!(sink.len() >= 18);
        pipeline.shutdown();
    }

    #[test]
    fn test_idle_stays_paused_while_playback_holds_the_face() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = StreamPipeline::start(
            &PipelineConfig {
                idle_on_start: false,
                ..PipelineConfig::default()
            },
            parts(sink, None),
        )
        .unwrap();
        let shared = &pipeline.shared;
        let epoch = pipeline.epoch();

        // A playback that claimed its token after the barge-in
        *shared.playing.lock() = Some(CancelToken::new());
        assert!(!shared.resume_idle_unless_playing(epoch));
        assert!(!pipeline.idle().is_running());

        shared.playing.lock().take();
        assert!(!shared.resume_idle_unless_playing(epoch + 1));
        assert!(!pipeline.idle().is_running());

        assert!(shared.resume_idle_unless_playing(epoch));
        assert!(pipeline.idle().is_running());
        pipeline.shutdown();
    }

    #[test]
    fn test_batch_is_one_segment() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = StreamPipeline::start(
            &PipelineConfig {
                idle_on_start: false,
                ..PipelineConfig::default()
            },
            parts(sink.clone(), None),
        )
        .unwrap();
        pipeline
            .submit_all(vec![
                GeneratedSequence::new(talking(30), Bytes::new()),
                GeneratedSequence::new(talking(30), Bytes::new()),
            ])
            .unwrap();
        assert!(pipeline.wait_until_drained(Duration::from_secs(3)));
        pipeline.idle().pause();
        let jaw: Vec<f32> = sink
            .sent()
            .iter()
            .take(60)
            .map(|s| {
                decode_packet(s.packet.as_bytes(), SUBJECT.len()).unwrap().values
                    [Channel::JawOpen.index()]
            })
            .collect();
        // Fully open across the splice: no fade out and back in at frame 30
        assert!(jaw[20..40].iter().all(|v| (*v - 0.8).abs() < 1e-4), "{jaw:?}");
        pipeline.shutdown();
    }

    #[test]
    fn test_bad_chunk_closing_a_segment_hands_back_to_idle() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = StreamPipeline::start(
            &PipelineConfig {
                idle_on_start: false,
                ..PipelineConfig::default()
            },
            parts(sink, None),
        )
        .unwrap();
        let mut bad = talking(10);
        bad[3] = Pose::zeros(PoseWidth::WithEmotion);
        pipeline
            .submit_all(vec![
                GeneratedSequence::new(talking(30), Bytes::new()),
                GeneratedSequence::new(bad, Bytes::new()),
            ])
            .unwrap();
        assert!(pipeline.wait_until_drained(Duration::from_secs(3)));
        assert!(pipeline.idle().is_running());
        pipeline.shutdown();
    }

    #[test]
    fn test_interrupt_bumps_epoch() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = StreamPipeline::start(&PipelineConfig::default(), parts(sink, None)).unwrap();
        assert_eq!(pipeline.epoch(), 0);
        pipeline.interrupt();
        assert_eq!(pipeline.epoch(), 1);
        assert!(pipeline.queues_empty());
        assert!(pipeline.idle().is_running());
        pipeline.shutdown();
    }
}
