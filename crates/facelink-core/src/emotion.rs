//! Emotion labels and intensity vectors
//!
//! 68-wide poses carry seven trailing emotion intensities after the 61 wire
//! channels. They are never sent; they steer the emotion overlay.

use std::fmt;

/// Number of trailing emotion channels in a 68-wide pose
pub const EMOTION_CHANNELS: usize = 7;

/// Emotion label, in trailing-channel order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Emotion {
    Angry,
    Disgusted,
    Fearful,
    Happy,
    Neutral,
    Sad,
    Surprised,
}

impl Emotion {
    pub const ALL: [Emotion; EMOTION_CHANNELS] = [
        Emotion::Angry,
        Emotion::Disgusted,
        Emotion::Fearful,
        Emotion::Happy,
        Emotion::Neutral,
        Emotion::Sad,
        Emotion::Surprised,
    ];

    /// Offset within the trailing emotion block
    #[inline]
    pub fn offset(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Emotion::Angry => "Angry",
            Emotion::Disgusted => "Disgusted",
            Emotion::Fearful => "Fearful",
            Emotion::Happy => "Happy",
            Emotion::Neutral => "Neutral",
            Emotion::Sad => "Sad",
            Emotion::Surprised => "Surprised",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.label().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Emotion vector - continuous intensities for the seven labels
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EmotionVector(pub [f32; EMOTION_CHANNELS]);

impl EmotionVector {
    pub fn get(&self, emotion: Emotion) -> f32 {
        self.0[emotion.offset()]
    }

    pub fn set(&mut self, emotion: Emotion, value: f32) {
        self.0[emotion.offset()] = value;
    }

    /// Dominant emotion; the first label wins ties, Neutral when empty
    pub fn dominant(&self) -> (Emotion, f32) {
        let mut best = (Emotion::Neutral, f32::NEG_INFINITY);
        for emotion in Emotion::ALL {
            let value = self.get(emotion);
            if value > best.1 {
                best = (emotion, value);
            }
        }
        if best.1.is_finite() {
            best
        } else {
            (Emotion::Neutral, 0.0)
        }
    }
}
