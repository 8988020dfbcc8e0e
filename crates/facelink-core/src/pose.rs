//! Pose - one fixed-width frame of channel values

use crate::{
    Channel, Emotion, EmotionVector, FaceLinkError, FaceLinkResult, CHANNEL_COUNT,
    EMOTION_CHANNELS, EXPRESSION_CHANNELS,
};

/// Width of a pose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoseWidth {
    /// The 61 wire channels
    Base,
    /// Wire channels plus 7 trailing emotion intensities
    WithEmotion,
}

impl PoseWidth {
    pub fn channels(self) -> usize {
        match self {
            PoseWidth::Base => CHANNEL_COUNT,
            PoseWidth::WithEmotion => CHANNEL_COUNT + EMOTION_CHANNELS,
        }
    }

    pub fn from_channels(count: usize) -> FaceLinkResult<Self> {
        match count {
            c if c == CHANNEL_COUNT => Ok(PoseWidth::Base),
            c if c == CHANNEL_COUNT + EMOTION_CHANNELS => Ok(PoseWidth::WithEmotion),
            actual => Err(FaceLinkError::ShapeMismatch {
                expected: CHANNEL_COUNT,
                actual,
            }),
        }
    }
}

/// One frame of channel values
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    values: Vec<f32>,
}

impl Pose {
    /// All-zero pose of the given width
    pub fn zeros(width: PoseWidth) -> Self {
        Pose {
            values: vec![0.0; width.channels()],
        }
    }

    /// Build a pose from raw values. Only 61 and 68 are valid widths.
    pub fn from_values(values: Vec<f32>) -> FaceLinkResult<Self> {
        PoseWidth::from_channels(values.len())?;
        Ok(Pose { values })
    }

    /// Build a pose from exactly 51 expression values (rotations zeroed)
    pub fn from_expression(expression: &[f32]) -> FaceLinkResult<Self> {
        if expression.len() != EXPRESSION_CHANNELS {
            return Err(FaceLinkError::ShapeMismatch {
                expected: EXPRESSION_CHANNELS,
                actual: expression.len(),
            });
        }
        let mut values = vec![0.0; CHANNEL_COUNT];
        values[..EXPRESSION_CHANNELS].copy_from_slice(expression);
        Ok(Pose { values })
    }

    pub fn width(&self) -> PoseWidth {
        if self.values.len() == CHANNEL_COUNT {
            PoseWidth::Base
        } else {
            PoseWidth::WithEmotion
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// The 51 expression channels
    pub fn expression(&self) -> &[f32] {
        &self.values[..EXPRESSION_CHANNELS]
    }

    #[inline]
    pub fn get(&self, channel: Channel) -> f32 {
        self.values[channel.index()]
    }

    #[inline]
    pub fn set(&mut self, channel: Channel, value: f32) {
        self.values[channel.index()] = value;
    }

    /// Trailing emotion intensities, if this pose carries them
    pub fn emotions(&self) -> Option<EmotionVector> {
        if self.width() != PoseWidth::WithEmotion {
            return None;
        }
        let mut v = EmotionVector::default();
        for emotion in Emotion::ALL {
            v.set(emotion, self.values[CHANNEL_COUNT + emotion.offset()]);
        }
        Some(v)
    }

    /// Same pose narrowed to the 61 wire channels
    pub fn to_base(&self) -> Pose {
        Pose {
            values: self.values[..CHANNEL_COUNT].to_vec(),
        }
    }

    /// Zero everything outside the expression range
    pub fn clear_forced_zero(&mut self) {
        for v in &mut self.values[EXPRESSION_CHANNELS..CHANNEL_COUNT] {
            *v = 0.0;
        }
    }

    /// Per-channel linear interpolation; both poses must share a width
    pub fn lerp(&self, other: &Pose, t: f32) -> Pose {
        let t = t.clamp(0.0, 1.0);
        Pose {
            values: self
                .values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| a + (b - a) * t)
                .collect(),
        }
    }
}

/// Validate that every pose in a sequence shares one width
pub fn sequence_width(poses: &[Pose]) -> FaceLinkResult<PoseWidth> {
    let Some(first) = poses.first() else {
        return Err(FaceLinkError::InvalidClip("empty pose sequence".into()));
    };
    let width = first.width();
    if let Some(bad) = poses.iter().find(|p| p.width() != width) {
        return Err(FaceLinkError::ShapeMismatch {
            expected: width.channels(),
            actual: bad.len(),
        });
    }
    Ok(width)
}
