//! Animation clips and their CSV form
//!
//! Clip files hold one row per frame at 60 fps. The header names each
//! column; `Timecode` and `BlendshapeCount` are bookkeeping and dropped on
//! load. Channel columns are matched by name, so files that omit the
//! rotation block still load (missing channels read as 0.0).

use std::fmt::Write as _;
use std::path::Path;

use facelink_core::{
    sequence_width, Channel, Emotion, FaceLinkError, FaceLinkResult, Pose, PoseWidth, Timecode,
    CHANNEL_COUNT,
};

const TIMECODE_COLUMN: &str = "Timecode";
const COUNT_COLUMN: &str = "BlendshapeCount";

/// Immutable, width-uniform pose sequence
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    label: String,
    width: PoseWidth,
    frames: Vec<Pose>,
}

impl AnimationClip {
    /// Build a clip; rejects empty and mixed-width sequences
    pub fn new(label: impl Into<String>, frames: Vec<Pose>) -> FaceLinkResult<Self> {
        let width = sequence_width(&frames)?;
        Ok(AnimationClip {
            label: label.into(),
            width,
            frames,
        })
    }

    /// Single all-zero frame; the fallback idle pose
    pub fn neutral() -> Self {
        AnimationClip {
            label: "neutral".into(),
            width: PoseWidth::Base,
            frames: vec![Pose::zeros(PoseWidth::Base)],
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> PoseWidth {
        self.width
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Pose] {
        &self.frames
    }

    /// Frame at `index`, wrapping around the clip
    #[inline]
    pub fn frame_wrapped(&self, index: usize) -> &Pose {
        &self.frames[index % self.frames.len()]
    }

    pub fn into_frames(self) -> Vec<Pose> {
        self.frames
    }
}

#[derive(Debug, Clone, Copy)]
enum Column {
    Skip,
    Slot(usize),
}

fn column_for(name: &str) -> FaceLinkResult<Column> {
    if name == TIMECODE_COLUMN || name == COUNT_COLUMN {
        return Ok(Column::Skip);
    }
    if let Some(channel) = Channel::from_name(name) {
        return Ok(Column::Slot(channel.index()));
    }
    if let Some(emotion) = Emotion::from_label(name) {
        return Ok(Column::Slot(CHANNEL_COUNT + emotion.offset()));
    }
    Err(FaceLinkError::UnknownChannel(name.to_string()))
}

/// Parse clip CSV text
pub fn parse_clip_csv(label: &str, text: &str) -> FaceLinkResult<AnimationClip> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| FaceLinkError::InvalidClip("missing header".into()))?;

    let columns = header
        .split(',')
        .map(|name| column_for(name.trim()))
        .collect::<FaceLinkResult<Vec<_>>>()?;

    let has_emotion = columns
        .iter()
        .any(|c| matches!(c, Column::Slot(slot) if *slot >= CHANNEL_COUNT));
    let width = if has_emotion {
        PoseWidth::WithEmotion
    } else {
        PoseWidth::Base
    };

    let mut frames = Vec::new();
    for (row, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != columns.len() {
            return Err(FaceLinkError::InvalidClip(format!(
                "row {}: expected {} fields, got {}",
                row + 1,
                columns.len(),
                fields.len()
            )));
        }

        let mut pose = Pose::zeros(width);
        for (column, field) in columns.iter().zip(&fields) {
            if let Column::Slot(slot) = column {
                let value: f32 = field.trim().parse().map_err(|_| {
                    FaceLinkError::InvalidClip(format!("row {}: bad value {:?}", row + 1, field))
                })?;
                pose.values_mut()[*slot] = value;
            }
        }
        frames.push(pose);
    }

    AnimationClip::new(label, frames)
}

/// Load a clip file. Every failure is reported as `ClipLoadFailure`.
pub fn load_clip_csv(path: &Path) -> FaceLinkResult<AnimationClip> {
    let text = std::fs::read_to_string(path).map_err(|e| FaceLinkError::clip_load(path, e))?;
    let label = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_clip_csv(&label, &text).map_err(|e| FaceLinkError::clip_load(path, e))
}

/// Render a pose sequence as clip CSV, with timecodes and channel count
pub fn clip_to_csv(frames: &[Pose]) -> FaceLinkResult<String> {
    let width = sequence_width(frames)?;

    let mut out = String::new();
    out.push_str(TIMECODE_COLUMN);
    out.push(',');
    out.push_str(COUNT_COLUMN);
    for channel in Channel::ALL {
        out.push(',');
        out.push_str(channel.name());
    }
    if width == PoseWidth::WithEmotion {
        for emotion in Emotion::ALL {
            out.push(',');
            out.push_str(emotion.label());
        }
    }
    out.push('\n');

    for (i, pose) in frames.iter().enumerate() {
        let _ = write!(out, "{},{}", Timecode::from_frame(i as u64), width.channels());
        for v in pose.values() {
            let _ = write!(out, ",{v}");
        }
        out.push('\n');
    }
    Ok(out)
}

/// Save a pose sequence as a clip file
pub fn write_clip_csv(path: &Path, frames: &[Pose]) -> FaceLinkResult<()> {
    let text = clip_to_csv(frames)?;
    std::fs::write(path, text)?;
    Ok(())
}
