//! Frame timing primitives
//!
//! Everything in FaceLink runs on a fixed 60 fps grid: clips are authored at
//! 60 fps, packets are dispatched at 60 Hz and the wire carries a frame count.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fixed capture and dispatch rate
pub const FRAME_RATE: u32 = 60;

/// Duration of one frame at [`FRAME_RATE`]
#[inline]
pub fn frame_duration() -> Duration {
    Duration::from_secs_f64(1.0 / FRAME_RATE as f64)
}

/// Offset of frame `index` from the start of a sequence
#[inline]
pub fn frame_offset(index: usize) -> Duration {
    Duration::from_secs_f64(index as f64 / FRAME_RATE as f64)
}

/// Whole number of frames covering `seconds`
#[inline]
pub fn frames_for(seconds: f32) -> usize {
    (seconds.max(0.0) * FRAME_RATE as f32).round() as usize
}

/// Frame position within the current day, used to seed encoder counters
pub fn frames_since_midnight() -> u32 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let day_micros = since_epoch.as_micros() % 86_400_000_000;
    (day_micros * FRAME_RATE as u128 / 1_000_000) as u32
}

/// Clip timecode - `HH:MM:SS:FF.mmm` at [`FRAME_RATE`]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timecode(pub u64);

impl Timecode {
    #[inline]
    pub fn from_frame(frame: u64) -> Self {
        Timecode(frame)
    }

    #[inline]
    pub fn frame(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = FRAME_RATE as u64;
        let total_millis = self.0 * 1000 / rate;
        let hours = total_millis / 3_600_000;
        let minutes = (total_millis / 60_000) % 60;
        let seconds = (total_millis / 1000) % 60;
        let millis = total_millis % 1000;
        let frame = self.0 % rate;
        write!(
            f,
            "{:02}:{:02}:{:02}:{:02}.{:03}",
            hours, minutes, seconds, frame, millis
        )
    }
}

impl fmt::Debug for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timecode({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_for() {
        assert_eq!(frames_for(0.5), 30);
        assert_eq!(frames_for(0.1), 6);
        assert_eq!(frames_for(-1.0), 0);
    }

    #[test]
    fn test_frame_offset() {
        assert_eq!(frame_offset(60), Duration::from_secs(1));
        let d = frame_duration().as_secs_f64();
        assert!((d - 1.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_timecode_display() {
        assert_eq!(Timecode::from_frame(0).to_string(), "00:00:00:00.000");
        assert_eq!(Timecode::from_frame(61).to_string(), "00:00:01:01.016");
        assert_eq!(Timecode::from_frame(60 * 3661).to_string(), "01:01:01:00.000");
    }

    #[test]
    fn test_frames_since_midnight_in_range() {
        assert!(frames_since_midnight() < 86_400 * FRAME_RATE);
    }
}
