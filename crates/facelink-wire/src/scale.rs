//! Section scaling applied at encode time

use serde::{Deserialize, Serialize};

use facelink_core::{Channel, ChannelGroup};

/// Per-section scale factors. Negative factors are floored to zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleFactors {
    pub mouth: f32,
    pub eye: f32,
    pub eyebrow: f32,
    pub eye_wide_left: f32,
    pub eye_wide_right: f32,
    pub eye_squint_left: f32,
    pub eye_squint_right: f32,
}

impl ScaleFactors {
    /// Every factor at 1.0
    pub const UNITY: ScaleFactors = ScaleFactors {
        mouth: 1.0,
        eye: 1.0,
        eyebrow: 1.0,
        eye_wide_left: 1.0,
        eye_wide_right: 1.0,
        eye_squint_left: 1.0,
        eye_squint_right: 1.0,
    };

    /// Copy with every factor floored at zero
    pub fn floored(self) -> Self {
        ScaleFactors {
            mouth: self.mouth.max(0.0),
            eye: self.eye.max(0.0),
            eyebrow: self.eyebrow.max(0.0),
            eye_wide_left: self.eye_wide_left.max(0.0),
            eye_wide_right: self.eye_wide_right.max(0.0),
            eye_squint_left: self.eye_squint_left.max(0.0),
            eye_squint_right: self.eye_squint_right.max(0.0),
        }
    }

    /// Factor applied to one channel
    pub fn factor(&self, channel: Channel) -> f32 {
        match channel {
            Channel::EyeWideLeft => self.eye_wide_left,
            Channel::EyeWideRight => self.eye_wide_right,
            Channel::EyeSquintLeft => self.eye_squint_left,
            Channel::EyeSquintRight => self.eye_squint_right,
            other => match other.group() {
                ChannelGroup::Mouth => self.mouth,
                ChannelGroup::Eye => self.eye,
                ChannelGroup::Eyebrow => self.eyebrow,
                ChannelGroup::Other => 1.0,
            },
        }
    }
}

impl Default for ScaleFactors {
    /// Eyes and brows are damped; generated eye motion tends to overshoot
    fn default() -> Self {
        ScaleFactors {
            mouth: 1.0,
            eye: 0.4,
            eyebrow: 0.4,
            eye_wide_left: 1.0,
            eye_wide_right: 1.0,
            eye_squint_left: 1.0,
            eye_squint_right: 1.0,
        }
    }
}

/// Scale raw values in wire order.
///
/// Values above `threshold` are multiplied by their section factor and
/// clamped to [0, 1]; the rest are only floored at zero.
pub fn scale_values(values: &[f32], scales: &ScaleFactors, threshold: f32) -> Vec<f32> {
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            if value > threshold {
                let factor = Channel::from_index(i).map_or(1.0, |c| scales.factor(c));
                (value * factor).min(1.0).max(0.0)
            } else {
                value.max(0.0)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_beat_eye_section() {
        let scales = ScaleFactors {
            eye: 0.5,
            eye_wide_left: 2.0,
            eye_squint_right: 0.0,
            ..ScaleFactors::UNITY
        };
        assert_eq!(scales.factor(Channel::EyeBlinkLeft), 0.5);
        assert_eq!(scales.factor(Channel::EyeWideLeft), 2.0);
        assert_eq!(scales.factor(Channel::EyeSquintRight), 0.0);
        assert_eq!(scales.factor(Channel::CheekPuff), 1.0);
    }

    #[test]
    fn test_scale_clamps_and_floors() {
        let scales = ScaleFactors {
            mouth: 3.0,
            ..ScaleFactors::UNITY
        };
        let mut values = vec![0.0; 61];
        values[Channel::JawOpen.index()] = 0.5;
        values[Channel::CheekPuff.index()] = -0.2;
        let scaled = scale_values(&values, &scales, 0.0);
        assert_eq!(scaled[Channel::JawOpen.index()], 1.0);
        assert_eq!(scaled[Channel::CheekPuff.index()], 0.0);
    }

    #[test]
    fn test_below_threshold_untouched() {
        let scales = ScaleFactors {
            mouth: 0.0,
            ..ScaleFactors::UNITY
        };
        let mut values = vec![0.0; 61];
        values[Channel::JawOpen.index()] = 0.05;
        let scaled = scale_values(&values, &scales, 0.1);
        assert_eq!(scaled[Channel::JawOpen.index()], 0.05);
    }

    #[test]
    fn test_floored() {
        let s = ScaleFactors {
            mouth: -1.0,
            ..ScaleFactors::UNITY
        }
        .floored();
        assert_eq!(s.mouth, 0.0);
    }
}
