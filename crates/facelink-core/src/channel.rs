//! Channel catalogue
//!
//! The receiving engine expects the 61 LiveLink face channels in a fixed
//! order. Indices 0..51 carry facial expression; 51..61 are TongueOut plus
//! head and eye rotation, which this system always sends as 0.0.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of channels sent on the wire
pub const CHANNEL_COUNT: usize = 61;

/// Number of expression channels taken from generated or clip data
pub const EXPRESSION_CHANNELS: usize = 51;

macro_rules! channels {
    ($($variant:ident = $idx:expr),* $(,)?) => {
        /// One named pose channel, in wire order
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Channel {
            $($variant = $idx),*
        }

        impl Channel {
            /// All channels in wire order
            pub const ALL: [Channel; CHANNEL_COUNT] = [$(Channel::$variant),*];

            /// Column name used by the engine and by clip files
            pub fn name(self) -> &'static str {
                match self {
                    $(Channel::$variant => stringify!($variant)),*
                }
            }
        }
    };
}

channels! {
    EyeBlinkLeft = 0,
    EyeLookDownLeft = 1,
    EyeLookInLeft = 2,
    EyeLookOutLeft = 3,
    EyeLookUpLeft = 4,
    EyeSquintLeft = 5,
    EyeWideLeft = 6,
    EyeBlinkRight = 7,
    EyeLookDownRight = 8,
    EyeLookInRight = 9,
    EyeLookOutRight = 10,
    EyeLookUpRight = 11,
    EyeSquintRight = 12,
    EyeWideRight = 13,
    JawForward = 14,
    JawRight = 15,
    JawLeft = 16,
    JawOpen = 17,
    MouthClose = 18,
    MouthFunnel = 19,
    MouthPucker = 20,
    MouthRight = 21,
    MouthLeft = 22,
    MouthSmileLeft = 23,
    MouthSmileRight = 24,
    MouthFrownLeft = 25,
    MouthFrownRight = 26,
    MouthDimpleLeft = 27,
    MouthDimpleRight = 28,
    MouthStretchLeft = 29,
    MouthStretchRight = 30,
    MouthRollLower = 31,
    MouthRollUpper = 32,
    MouthShrugLower = 33,
    MouthShrugUpper = 34,
    MouthPressLeft = 35,
    MouthPressRight = 36,
    MouthLowerDownLeft = 37,
    MouthLowerDownRight = 38,
    MouthUpperUpLeft = 39,
    MouthUpperUpRight = 40,
    BrowDownLeft = 41,
    BrowDownRight = 42,
    BrowInnerUp = 43,
    BrowOuterUpLeft = 44,
    BrowOuterUpRight = 45,
    CheekPuff = 46,
    CheekSquintLeft = 47,
    CheekSquintRight = 48,
    NoseSneerLeft = 49,
    NoseSneerRight = 50,
    TongueOut = 51,
    HeadYaw = 52,
    HeadPitch = 53,
    HeadRoll = 54,
    LeftEyeYaw = 55,
    LeftEyePitch = 56,
    LeftEyeRoll = 57,
    RightEyeYaw = 58,
    RightEyePitch = 59,
    RightEyeRoll = 60,
}

impl Channel {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// Head rotation axes, clamped to zero on write
    pub fn is_head_rotation(self) -> bool {
        matches!(self, Channel::HeadYaw | Channel::HeadPitch | Channel::HeadRoll)
    }

    /// Channels outside the expression range are never driven
    pub fn is_forced_zero(self) -> bool {
        self.index() >= EXPRESSION_CHANNELS
    }

    pub fn group(self) -> ChannelGroup {
        if MOUTH.contains(&self) {
            ChannelGroup::Mouth
        } else if EYE.contains(&self) {
            ChannelGroup::Eye
        } else if EYEBROW.contains(&self) {
            ChannelGroup::Eyebrow
        } else {
            ChannelGroup::Other
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Channel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Channel::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown channel {name}")))
    }
}

/// Scaling section a channel belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelGroup {
    Mouth,
    Eye,
    Eyebrow,
    Other,
}

pub const MOUTH: [Channel; 27] = [
    Channel::JawForward,
    Channel::JawLeft,
    Channel::JawRight,
    Channel::JawOpen,
    Channel::MouthClose,
    Channel::MouthFunnel,
    Channel::MouthPucker,
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
    Channel::MouthRollLower,
    Channel::MouthRollUpper,
    Channel::MouthShrugLower,
    Channel::MouthShrugUpper,
    Channel::MouthPressLeft,
    Channel::MouthPressRight,
    Channel::MouthLowerDownLeft,
    Channel::MouthLowerDownRight,
    Channel::MouthUpperUpLeft,
    Channel::MouthUpperUpRight,
];

pub const EYE: [Channel; 14] = [
    Channel::EyeBlinkLeft,
    Channel::EyeLookDownLeft,
    Channel::EyeLookInLeft,
    Channel::EyeLookOutLeft,
    Channel::EyeLookUpLeft,
    Channel::EyeSquintLeft,
    Channel::EyeWideLeft,
    Channel::EyeBlinkRight,
    Channel::EyeLookDownRight,
    Channel::EyeLookInRight,
    Channel::EyeLookOutRight,
    Channel::EyeLookUpRight,
    Channel::EyeSquintRight,
    Channel::EyeWideRight,
];

pub const EYEBROW: [Channel; 5] = [
    Channel::BrowDownLeft,
    Channel::BrowDownRight,
    Channel::BrowInnerUp,
    Channel::BrowOuterUpLeft,
    Channel::BrowOuterUpRight,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_order_is_dense() {
        for (i, channel) in Channel::ALL.iter().enumerate() {
            assert_eq!(channel.index(), i);
        }
    }

    #[test]
    fn test_name_roundtrip() {
        assert_eq!(Channel::from_name("JawOpen"), Some(Channel::JawOpen));
        assert_eq!(Channel::JawOpen.name(), "JawOpen");
        assert_eq!(Channel::from_name("Timecode"), None);
    }

    #[test]
    fn test_groups() {
        assert_eq!(Channel::JawOpen.group(), ChannelGroup::Mouth);
        assert_eq!(Channel::EyeWideLeft.group(), ChannelGroup::Eye);
        assert_eq!(Channel::BrowInnerUp.group(), ChannelGroup::Eyebrow);
        assert_eq!(Channel::CheekPuff.group(), ChannelGroup::Other);
    }

    #[test]
    fn test_forced_zero_range() {
        assert!(!Channel::NoseSneerRight.is_forced_zero());
        assert!(Channel::TongueOut.is_forced_zero());
        assert!(Channel::RightEyeRoll.is_forced_zero());
        assert!(Channel::HeadPitch.is_head_rotation());
        assert!(!Channel::LeftEyeYaw.is_head_rotation());
    }
}
