//! Seam removal for looping clips and chunk splices

use facelink_core::{Channel, Pose, EXPRESSION_CHANNELS};

/// The 51 expression channels, the default loop-blend set
pub fn expression_channels() -> &'static [Channel] {
    &Channel::ALL[..EXPRESSION_CHANNELS]
}

/// Cross-fade the last `window` frames toward the clip's first frame.
///
/// Tail frame `i` (0-based within the window) moves a fraction
/// `i / window` of the way to `frames[0]`. The final frame stops one step
/// short of the head, so wrapping to `frames[0]` is a step like any other
/// rather than a held frame. Frames before the window, and channels not
/// listed, are untouched. The window is capped at `len - 1`.
pub fn loop_blend(frames: &mut [Pose], channels: &[Channel], window: usize) {
    let len = frames.len();
    if len < 2 || window == 0 {
        return;
    }
    let window = window.min(len - 1);
    let head: Vec<f32> = channels.iter().map(|c| frames[0].get(*c)).collect();

    for i in 0..window {
        let alpha = i as f32 / window as f32;
        let frame = &mut frames[len - window + i];
        for (channel, target) in channels.iter().zip(&head) {
            let v = frame.get(*channel);
            frame.set(*channel, v + (target - v) * alpha);
        }
    }
}

/// Ease the head of a continuation chunk out of the previous chunk's last
/// frame.
///
/// Frame `i` of the first `window` frames becomes
/// `lerp(previous, chunk[i], (i + 1) / (window + 1))`. Poses must share a
/// width; channels beyond the shorter pose are ignored.
pub fn stitch(previous: &Pose, chunk: &mut [Pose], window: usize) {
    let window = window.min(chunk.len());
    for (i, frame) in chunk.iter_mut().take(window).enumerate() {
        let t = (i + 1) as f32 / (window + 1) as f32;
        *frame = previous.lerp(frame, t);
    }
}
