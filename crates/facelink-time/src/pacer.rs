//! Fixed-rate frame pacer

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use facelink_core::FRAME_RATE;

/// What to do with a frame whose deadline has already passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatePolicy {
    /// Send late frames immediately
    #[default]
    SendLate,
    /// Drop a frame that is more than one frame period behind
    SkipIfBehind,
}

/// Pacer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacerConfig {
    /// Frames per second
    pub frame_rate: u32,
    /// Final stretch before a deadline that is busy-waited instead of slept
    pub spin_threshold_us: u64,
    /// Late frame handling
    pub late_policy: LatePolicy,
}

impl Default for PacerConfig {
    fn default() -> Self {
        PacerConfig {
            frame_rate: FRAME_RATE,
            spin_threshold_us: 2_000,
            late_policy: LatePolicy::SendLate,
        }
    }
}

impl PacerConfig {
    /// Duration of one frame; a zero rate falls back to the default rate
    pub fn frame_period(&self) -> Duration {
        let rate = if self.frame_rate == 0 { FRAME_RATE } else { self.frame_rate };
        Duration::from_secs_f64(1.0 / rate as f64)
    }

    pub fn spin_threshold(&self) -> Duration {
        Duration::from_micros(self.spin_threshold_us)
    }
}

/// Outcome of waiting for a frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSlot {
    /// Deadline reached on time
    OnTime,
    /// Deadline had passed; send anyway
    Late(Duration),
    /// Deadline had passed by more than a frame; drop the frame
    Skip(Duration),
}

impl FrameSlot {
    pub fn should_send(self) -> bool {
        !matches!(self, FrameSlot::Skip(_))
    }

    pub fn is_late(self) -> bool {
        !matches!(self, FrameSlot::OnTime)
    }
}

/// Paces frame `i` to `start + i / rate`.
///
/// Targets are computed from the start instant, never from the previous
/// frame, so sleep overshoot does not accumulate.
#[derive(Debug, Clone)]
pub struct FramePacer {
    start: Instant,
    period: Duration,
    spin: Duration,
    policy: LatePolicy,
}

impl FramePacer {
    /// Pacer anchored at the current instant
    pub fn new(config: &PacerConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    pub fn starting_at(config: &PacerConfig, start: Instant) -> Self {
        FramePacer {
            start,
            period: config.frame_period(),
            spin: config.spin_threshold(),
            policy: config.late_policy,
        }
    }

    /// Re-anchor at the current instant
    pub fn restart(&mut self) {
        self.start = Instant::now();
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn policy(&self) -> LatePolicy {
        self.policy
    }

    /// Deadline of frame `index`
    pub fn target(&self, index: usize) -> Instant {
        self.start + self.period.mul_f64(index as f64)
    }

    /// Classify a frame against its deadline without waiting
    pub fn classify(&self, index: usize, now: Instant) -> FrameSlot {
        let target = self.target(index);
        if now <= target {
            return FrameSlot::OnTime;
        }
        let behind = now - target;
        match self.policy {
            LatePolicy::SkipIfBehind if behind > self.period => FrameSlot::Skip(behind),
            _ => FrameSlot::Late(behind),
        }
    }

    /// Block until frame `index` is due.
    ///
    /// Sleeps until the spin threshold before the deadline, then spins.
    pub fn wait_for(&self, index: usize) -> FrameSlot {
        let target = self.target(index);
        let now = Instant::now();
        if now > target {
            return self.classify(index, now);
        }

        let gap = target - now;
        if gap > self.spin {
            std::thread::sleep(gap - self.spin);
        }
        while Instant::now() < target {
            std::hint::spin_loop();
        }
        FrameSlot::OnTime
    }
}
