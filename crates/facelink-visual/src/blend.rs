//! Blend Engine - stitching generated speech onto the idle loop
//!
//! A generated sequence is faded in from the idle clip, played, and faded
//! back out, per channel. Streamed utterances arrive as chunks: only the
//! first chunk of a segment fades in, later chunks are spliced onto the
//! previous chunk's last frame, and the chunk that closes the segment
//! fades out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use facelink_core::{
    frames_for, sequence_width, Channel, Emotion, FaceLinkResult, Pose, PoseWidth,
    EXPRESSION_CHANNELS,
};
use facelink_wire::{EncodedPacket, EncoderState};

use crate::{stitch, ClipLibrary, EmotionConfig, EmotionOverlay};

/// Idle frames the blend-out window fades toward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendOutTarget {
    /// The head of the idle clip; idle resumes right after the faded frames
    #[default]
    FixedStart,
    /// Wherever the idle cursor has advanced to
    LiveIndex,
}

/// How a chunk joins its neighbours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Sole chunk of a segment: fade in and out
    Full,
    /// Opens a segment that continues
    BlendIn,
    /// Inside an open segment
    Continuation,
    /// Closes an open segment
    ContinuationOut,
}

impl TransitionKind {
    /// Transition for a chunk given segment state and pending input
    pub fn for_chunk(segment_open: bool, more_pending: bool) -> Self {
        match (segment_open, more_pending) {
            (false, false) => TransitionKind::Full,
            (false, true) => TransitionKind::BlendIn,
            (true, true) => TransitionKind::Continuation,
            (true, false) => TransitionKind::ContinuationOut,
        }
    }

    pub fn blends_in(self) -> bool {
        matches!(self, TransitionKind::Full | TransitionKind::BlendIn)
    }

    pub fn blends_out(self) -> bool {
        matches!(self, TransitionKind::Full | TransitionKind::ContinuationOut)
    }
}

/// Blend timing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendConfig {
    /// Default fade-in length
    pub blend_in_secs: f32,
    /// Default fade-out length
    pub blend_out_secs: f32,
    /// Fade length for the fast channels
    pub fast_blend_secs: f32,
    pub fast_channels: Vec<Channel>,
    /// Channels taken from the idle clip for the whole generated section
    pub idle_passthrough: Vec<Channel>,
    pub blend_out_target: BlendOutTarget,
    /// Frames eased out of the previous chunk on a continuation
    pub stitch_frames: usize,
}

impl Default for BlendConfig {
    fn default() -> Self {
        BlendConfig {
            blend_in_secs: 0.5,
            blend_out_secs: 0.5,
            fast_blend_secs: 0.1,
            fast_channels: vec![Channel::JawOpen, Channel::MouthClose],
            idle_passthrough: vec![Channel::EyeBlinkLeft, Channel::EyeBlinkRight],
            blend_out_target: BlendOutTarget::FixedStart,
            stitch_frames: 8,
        }
    }
}

impl BlendConfig {
    /// Channel fade length relative to the default fade
    pub fn channel_ratio(&self, channel: Channel) -> f32 {
        if !self.fast_channels.contains(&channel) || self.blend_in_secs <= 0.0 {
            return 1.0;
        }
        (self.fast_blend_secs / self.blend_in_secs).max(0.0)
    }

    /// Fade-in and fade-out window lengths for a sequence.
    ///
    /// Short sequences shrink the windows: fade-in takes at most half the
    /// frames and fade-out at most what remains.
    pub fn windows(&self, len: usize, kind: TransitionKind) -> (usize, usize) {
        let blend_in = if kind.blends_in() {
            frames_for(self.blend_in_secs)
        } else {
            0
        };
        let blend_out = if kind.blends_out() {
            frames_for(self.blend_out_secs)
        } else {
            0
        };
        let blend_in = blend_in.min(len / 2);
        let blend_out = blend_out.min(len - blend_in);
        (blend_in, blend_out)
    }
}

#[inline]
fn ramp(progress: f32, ratio: f32) -> f32 {
    if ratio <= 0.0 {
        1.0
    } else {
        (progress / ratio).min(1.0)
    }
}

/// Generated-data weight of frame `i` of `len`
#[inline]
fn weight_at(i: usize, len: usize, blend_in: usize, blend_out: usize, ratio: f32) -> f32 {
    let w_in = if i < blend_in {
        ramp(i as f32 / blend_in as f32, ratio)
    } else {
        1.0
    };
    let from_end = len - 1 - i;
    let w_out = if from_end < blend_out {
        ramp(from_end as f32 / blend_out as f32, ratio)
    } else {
        1.0
    };
    w_in.min(w_out)
}

/// Weight of generated data over a sequence for one channel.
/// 0.0 is pure idle, 1.0 pure generated.
pub fn weight_curve(
    config: &BlendConfig,
    len: usize,
    channel: Channel,
    kind: TransitionKind,
) -> Vec<f32> {
    let (blend_in, blend_out) = config.windows(len, kind);
    let ratio = config.channel_ratio(channel);
    (0..len)
        .map(|i| weight_at(i, len, blend_in, blend_out, ratio))
        .collect()
}

/// Blended poses ready for encoding
#[derive(Debug, Clone)]
pub struct BlendedFrames {
    pub poses: Vec<Pose>,
    pub kind: TransitionKind,
    pub emotion: Option<Emotion>,
    /// Idle index to resume from once this chunk has played
    pub resume_index: usize,
}

/// Encoded chunk plus bookkeeping
#[derive(Debug, Clone)]
pub struct BlendedChunk {
    pub packets: Vec<EncodedPacket>,
    pub kind: TransitionKind,
    pub emotion: Option<Emotion>,
    pub resume_index: usize,
    /// Frames dropped because they failed to encode
    pub skipped: usize,
}

#[derive(Debug, Clone)]
struct Segment {
    idle_cursor: usize,
    last_pose: Pose,
}

/// Blends generated sequences against idle and pre-encodes them.
///
/// Owns the pre-encoding `EncoderState`; the idle loop has its own.
#[derive(Debug)]
pub struct BlendEngine {
    config: BlendConfig,
    library: Arc<ClipLibrary>,
    overlay: EmotionOverlay,
    encoder: EncoderState,
    segment: Option<Segment>,
}

impl BlendEngine {
    pub fn new(
        config: BlendConfig,
        emotion: EmotionConfig,
        library: Arc<ClipLibrary>,
        encoder: EncoderState,
    ) -> Self {
        BlendEngine {
            config,
            library,
            overlay: EmotionOverlay::new(emotion),
            encoder,
            segment: None,
        }
    }

    pub fn config(&self) -> &BlendConfig {
        &self.config
    }

    pub fn encoder(&self) -> &EncoderState {
        &self.encoder
    }

    /// Whether a segment is open and waiting for more chunks
    pub fn segment_open(&self) -> bool {
        self.segment.is_some()
    }

    /// Forget the open segment
    pub fn reset_segment(&mut self) {
        self.segment = None;
    }

    /// Blend a sequence against the idle clip.
    ///
    /// `live_idle_index` is where the idle loop stopped; it anchors the
    /// fade-in. Sequences may be 61 or 68 wide but not mixed. 68-wide
    /// sequences get an emotion overlay and are narrowed to 61.
    pub fn blend(
        &mut self,
        mut poses: Vec<Pose>,
        kind: TransitionKind,
        live_idle_index: usize,
    ) -> FaceLinkResult<BlendedFrames> {
        let width = sequence_width(&poses)?;
        let emotion = self.overlay.apply(&mut poses, &self.library);
        if width == PoseWidth::WithEmotion {
            poses = poses.iter().map(Pose::to_base).collect();
        }

        let kind = match (&self.segment, kind) {
            (None, TransitionKind::Continuation) => {
                tracing::debug!("continuation without open segment, fading in");
                TransitionKind::BlendIn
            }
            (None, TransitionKind::ContinuationOut) => TransitionKind::Full,
            (_, kind) => kind,
        };

        let cursor = match (&self.segment, kind.blends_in()) {
            (Some(segment), false) => {
                stitch(&segment.last_pose, &mut poses, self.config.stitch_frames);
                segment.idle_cursor
            }
            _ => live_idle_index,
        };

        let len = poses.len();
        self.segment = if kind.blends_out() {
            None
        } else {
            poses.last().cloned().map(|last_pose| Segment {
                idle_cursor: cursor + len,
                last_pose,
            })
        };

        let (blended, resume_index) = self.blend_with_idle(&poses, kind, cursor);
        Ok(BlendedFrames {
            poses: blended,
            kind,
            emotion,
            resume_index,
        })
    }

    fn blend_with_idle(
        &self,
        poses: &[Pose],
        kind: TransitionKind,
        cursor: usize,
    ) -> (Vec<Pose>, usize) {
        let idle = self.library.idle();
        let len = poses.len();
        let (blend_in, blend_out) = self.config.windows(len, kind);
        let out_start = len - blend_out;

        let ratios: Vec<f32> = Channel::ALL[..EXPRESSION_CHANNELS]
            .iter()
            .map(|c| self.config.channel_ratio(*c))
            .collect();
        let passthrough: Vec<bool> = Channel::ALL[..EXPRESSION_CHANNELS]
            .iter()
            .map(|c| self.config.idle_passthrough.contains(c))
            .collect();

        let mut out = Vec::with_capacity(len);
        for (i, generated) in poses.iter().enumerate() {
            let idle_index = match self.config.blend_out_target {
                BlendOutTarget::FixedStart if i >= out_start => i - out_start,
                _ => cursor + i,
            };
            let idle_pose = idle.frame_wrapped(idle_index);

            let mut pose = Pose::zeros(PoseWidth::Base);
            for c in 0..EXPRESSION_CHANNELS {
                let base = idle_pose.values()[c];
                let value = if passthrough[c] {
                    base
                } else {
                    let w = weight_at(i, len, blend_in, blend_out, ratios[c]);
                    (1.0 - w) * base + w * generated.values()[c]
                };
                pose.values_mut()[c] = value;
            }
            out.push(pose);
        }

        let resume_index = match self.config.blend_out_target {
            BlendOutTarget::FixedStart if kind.blends_out() => blend_out,
            _ => cursor + len,
        } % idle.len();

        (out, resume_index)
    }

    /// Blend and pre-encode a sequence, advancing the frame counter once per
    /// encoded frame. Frames that fail to encode are logged and dropped.
    pub fn encode_sequence(
        &mut self,
        poses: Vec<Pose>,
        kind: TransitionKind,
        live_idle_index: usize,
    ) -> FaceLinkResult<BlendedChunk> {
        let blended = self.blend(poses, kind, live_idle_index)?;

        let mut packets = Vec::with_capacity(blended.poses.len());
        let mut skipped = 0;
        for pose in &blended.poses {
            match self.encoder.encode_pose(pose) {
                Ok(packet) => {
                    packets.push(packet);
                    self.encoder.advance();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping frame that failed to encode");
                    skipped += 1;
                }
            }
        }

        Ok(BlendedChunk {
            packets,
            kind: blended.kind,
            emotion: blended.emotion,
            resume_index: blended.resume_index,
            skipped,
        })
    }
}
