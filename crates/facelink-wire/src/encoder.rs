//! Encoder state - one subject's channel values, counter and scaling

use serde::{Deserialize, Serialize};

use facelink_core::{
    frames_since_midnight, Channel, FaceLinkError, FaceLinkResult, Pose, Subject, SubjectId,
    CHANNEL_COUNT, EXPRESSION_CHANNELS,
};

use crate::{scale_values, EncodedPacket, PacketFields, ScaleFactors};

/// Encoder configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Subject name shown by the engine
    pub subject_name: String,
    /// Persistent subject id; generated when absent
    pub subject_id: Option<String>,
    /// Section scale factors
    pub scales: ScaleFactors,
    /// Values at or below this are not scaled
    pub threshold: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            subject_name: "FaceLink".to_string(),
            subject_id: None,
            scales: ScaleFactors::default(),
            threshold: 0.0,
        }
    }
}

/// Encoding state for one subject.
///
/// Cloning yields an identically configured, independent instance; the
/// idle loop and the pre-encoder each own one.
#[derive(Clone, Debug)]
pub struct EncoderState {
    subject: Subject,
    frame_count: u32,
    scales: ScaleFactors,
    threshold: f32,
    values: [f32; CHANNEL_COUNT],
}

impl EncoderState {
    pub fn new(config: &EncoderConfig) -> Self {
        let id = config
            .subject_id
            .as_deref()
            .map(SubjectId::new)
            .unwrap_or_else(SubjectId::generate);
        EncoderState {
            subject: Subject::new(id, config.subject_name.clone()),
            frame_count: frames_since_midnight(),
            scales: config.scales.floored(),
            threshold: config.threshold,
            values: [0.0; CHANNEL_COUNT],
        }
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn set_frame_count(&mut self, frame_count: u32) {
        self.frame_count = frame_count;
    }

    /// Step the frame counter by one frame
    #[inline]
    pub fn advance(&mut self) {
        self.frame_count = self.frame_count.wrapping_add(1);
    }

    pub fn scales(&self) -> &ScaleFactors {
        &self.scales
    }

    pub fn set_scales(&mut self, scales: ScaleFactors) {
        self.scales = scales.floored();
    }

    pub fn set_mouth_scale(&mut self, factor: f32) {
        self.scales.mouth = factor.max(0.0);
    }

    pub fn set_eye_scale(&mut self, factor: f32) {
        self.scales.eye = factor.max(0.0);
    }

    pub fn set_eyebrow_scale(&mut self, factor: f32) {
        self.scales.eyebrow = factor.max(0.0);
    }

    pub fn set_eye_wide_scales(&mut self, left: f32, right: f32) {
        self.scales.eye_wide_left = left.max(0.0);
        self.scales.eye_wide_right = right.max(0.0);
    }

    pub fn set_eye_squint_scales(&mut self, left: f32, right: f32) {
        self.scales.eye_squint_left = left.max(0.0);
        self.scales.eye_squint_right = right.max(0.0);
    }

    /// Raw, unscaled channel values
    pub fn values(&self) -> &[f32; CHANNEL_COUNT] {
        &self.values
    }

    /// Write a raw channel value. Head rotation is disabled: those axes
    /// always read back as 0.0.
    pub fn set_channel(&mut self, channel: Channel, value: f32) {
        let value = if channel.is_head_rotation() { 0.0 } else { value };
        self.values[channel.index()] = value;
    }

    /// Load a 61-wide pose. Expression channels are copied; TongueOut and
    /// all rotations are zeroed.
    pub fn set_pose(&mut self, pose: &Pose) -> FaceLinkResult<()> {
        if pose.len() != CHANNEL_COUNT {
            return Err(FaceLinkError::ShapeMismatch {
                expected: CHANNEL_COUNT,
                actual: pose.len(),
            });
        }
        self.values[..EXPRESSION_CHANNELS].copy_from_slice(pose.expression());
        for v in &mut self.values[EXPRESSION_CHANNELS..] {
            *v = 0.0;
        }
        Ok(())
    }

    /// Encode the current values. The frame counter is left untouched and
    /// every rotation channel goes out as 0.0, whatever was written to it.
    pub fn encode(&self) -> FaceLinkResult<EncodedPacket> {
        let mut scaled = scale_values(&self.values, &self.scales, self.threshold);
        for v in &mut scaled[EXPRESSION_CHANNELS..] {
            *v = 0.0;
        }
        PacketFields {
            subject_id: &self.subject.id,
            name: &self.subject.name,
            frame_count: self.frame_count,
            values: &scaled,
        }
        .serialize()
    }

    /// Load a pose and encode it in one step
    pub fn encode_pose(&mut self, pose: &Pose) -> FaceLinkResult<EncodedPacket> {
        self.set_pose(pose)?;
        self.encode()
    }
}
