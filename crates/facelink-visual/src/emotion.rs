//! Emotion overlay for 68-wide sequences
//!
//! The seven trailing channels of a generated sequence say how the line
//! should feel. The dominant label picks a pre-loaded emotion clip, which
//! is added onto the brow, cheek, nose and mouth-corner channels.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use facelink_core::{Channel, Emotion, EmotionVector, Pose, PoseWidth};

use crate::{AnimationClip, ClipLibrary};

/// Neutral damping that favours any other emotion
pub const NEUTRAL_DAMPING_CONSERVATIVE: f32 = 0.4;
/// Neutral damping used by default
pub const NEUTRAL_DAMPING_BALANCED: f32 = 0.6;
/// Default overlay strength
pub const DEFAULT_OVERLAY_ALPHA: f32 = 0.6;

/// Channels an emotion clip may touch. Eyes are left to the generated data.
pub const OVERLAY_CHANNELS: [Channel; 25] = [
    Channel::MouthLeft,
    Channel::MouthRight,
    Channel::MouthSmileLeft,
    Channel::MouthSmileRight,
    Channel::MouthFrownLeft,
    Channel::MouthFrownRight,
    Channel::MouthDimpleLeft,
    Channel::MouthDimpleRight,
    Channel::MouthStretchLeft,
    Channel::MouthStretchRight,
    Channel::MouthShrugUpper,
    Channel::MouthPressLeft,
    Channel::MouthPressRight,
    Channel::MouthUpperUpLeft,
    Channel::MouthUpperUpRight,
    Channel::BrowDownLeft,
    Channel::BrowDownRight,
    Channel::BrowInnerUp,
    Channel::BrowOuterUpLeft,
    Channel::BrowOuterUpRight,
    Channel::CheekPuff,
    Channel::CheekSquintLeft,
    Channel::CheekSquintRight,
    Channel::NoseSneerLeft,
    Channel::NoseSneerRight,
];

/// Emotion overlay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    pub enabled: bool,
    /// Multiplier on the Neutral average before arg-max
    pub neutral_damping: f32,
    /// Overlay strength
    pub alpha: f32,
    /// Channels the overlay writes
    pub channels: Vec<Channel>,
    /// Fixed seed for clip selection
    pub seed: Option<u64>,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        EmotionConfig {
            enabled: true,
            neutral_damping: NEUTRAL_DAMPING_BALANCED,
            alpha: DEFAULT_OVERLAY_ALPHA,
            channels: OVERLAY_CHANNELS.to_vec(),
            seed: None,
        }
    }
}

/// Average emotion intensities over a 68-wide sequence.
///
/// Returns `None` for empty or 61-wide sequences.
pub fn average_emotions(poses: &[Pose]) -> Option<EmotionVector> {
    if poses.is_empty() {
        return None;
    }
    let mut sum = EmotionVector::default();
    for pose in poses {
        let emotions = pose.emotions()?;
        for (acc, v) in sum.0.iter_mut().zip(emotions.0) {
            *acc += v;
        }
    }
    let n = poses.len() as f32;
    for acc in &mut sum.0 {
        *acc /= n;
    }
    Some(sum)
}

/// Dominant emotion of a 68-wide sequence, Neutral damped by `neutral_damping`
pub fn dominant_emotion(poses: &[Pose], neutral_damping: f32) -> Option<Emotion> {
    let mut averages = average_emotions(poses)?;
    let neutral = averages.get(Emotion::Neutral);
    averages.set(Emotion::Neutral, neutral * neutral_damping);
    Some(averages.dominant().0)
}

/// Add a clip onto `poses`, repeating or truncating it to fit.
///
/// Each listed channel becomes `clamp(base + alpha * clip, 0, 1)`.
pub fn merge_overlay(poses: &mut [Pose], clip: &AnimationClip, channels: &[Channel], alpha: f32) {
    if clip.is_empty() {
        return;
    }
    for (i, pose) in poses.iter_mut().enumerate() {
        let overlay = clip.frame_wrapped(i);
        for channel in channels {
            let v = pose.get(*channel) + alpha * overlay.get(*channel);
            pose.set(*channel, v.clamp(0.0, 1.0));
        }
    }
}

/// Picks and applies emotion clips
pub struct EmotionOverlay {
    config: EmotionConfig,
    rng: Mutex<StdRng>,
}

impl EmotionOverlay {
    pub fn new(config: EmotionConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        EmotionOverlay {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &EmotionConfig {
        &self.config
    }

    /// Overlay a clip for the sequence's dominant emotion.
    ///
    /// Returns the emotion applied, or `None` when the sequence is 61 wide,
    /// the overlay is disabled, or no clip exists for the label.
    pub fn apply(&self, poses: &mut [Pose], library: &ClipLibrary) -> Option<Emotion> {
        if !self.config.enabled {
            return None;
        }
        if poses.first().map(Pose::width) != Some(PoseWidth::WithEmotion) {
            return None;
        }

        let emotion = dominant_emotion(poses, self.config.neutral_damping)?;
        let clips = library.emotion_clips(emotion);
        if clips.is_empty() {
            tracing::debug!(%emotion, "no overlay clips for emotion");
            return None;
        }

        let pick = self.rng.lock().gen_range(0..clips.len());
        let clip = &clips[pick];
        tracing::debug!(%emotion, clip = clip.label(), frames = poses.len(), "applying emotion overlay");
        merge_overlay(poses, clip, &self.config.channels, self.config.alpha);
        Some(emotion)
    }
}

impl std::fmt::Debug for EmotionOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmotionOverlay")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
