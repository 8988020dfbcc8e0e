//! Read-only clip library: the idle loop plus emotion clips by label

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use facelink_core::{Emotion, FaceLinkError, FaceLinkResult};

use crate::{expression_channels, load_clip_csv, loop_blend, AnimationClip};

/// Where clips live and how they are loop-blended on load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Library root; idle clip at `default_anim/default.csv`, emotion clips
    /// under `<Emotion>/*.csv`
    pub root: PathBuf,
    pub idle_loop_frames: usize,
    pub emotion_loop_frames: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            root: PathBuf::from("animations"),
            idle_loop_frames: 30,
            emotion_loop_frames: 16,
        }
    }
}

impl LibraryConfig {
    pub fn idle_path(&self) -> PathBuf {
        self.root.join("default_anim").join("default.csv")
    }

    pub fn emotion_dir(&self, emotion: Emotion) -> PathBuf {
        self.root.join(emotion.label())
    }
}

/// Clip library. Built once at start-up, immutable afterwards.
#[derive(Debug, Clone)]
pub struct ClipLibrary {
    idle: AnimationClip,
    emotions: HashMap<Emotion, Vec<AnimationClip>>,
}

impl ClipLibrary {
    pub fn new(idle: AnimationClip) -> Self {
        ClipLibrary {
            idle,
            emotions: HashMap::new(),
        }
    }

    /// Load every clip under the configured root.
    ///
    /// The idle clip is required. Emotion clips that fail to load are
    /// logged and left out.
    pub fn load(config: &LibraryConfig) -> FaceLinkResult<Self> {
        let mut idle = load_clip_csv(&config.idle_path())?.into_frames();
        loop_blend(&mut idle, expression_channels(), config.idle_loop_frames);
        let idle = AnimationClip::new("idle", idle)?;

        let mut library = ClipLibrary::new(idle);
        for emotion in Emotion::ALL {
            let dir = config.emotion_dir(emotion);
            for clip in load_emotion_dir(&dir, config.emotion_loop_frames) {
                library.insert_emotion(emotion, clip);
            }
        }

        tracing::info!(
            idle_frames = library.idle.len(),
            emotion_clips = library.emotion_clip_count(),
            root = %config.root.display(),
            "clip library loaded"
        );
        Ok(library)
    }

    /// Load, or fall back to a neutral idle pose with no emotion clips
    pub fn load_or_neutral(config: &LibraryConfig) -> Self {
        match Self::load(config) {
            Ok(library) => library,
            Err(e) => {
                tracing::warn!(error = %e, "idle clip unavailable, using neutral pose");
                ClipLibrary::new(AnimationClip::neutral())
            }
        }
    }

    pub fn insert_emotion(&mut self, emotion: Emotion, clip: AnimationClip) {
        self.emotions.entry(emotion).or_default().push(clip);
    }

    pub fn idle(&self) -> &AnimationClip {
        &self.idle
    }

    pub fn emotion_clips(&self, emotion: Emotion) -> &[AnimationClip] {
        self.emotions.get(&emotion).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn emotion_clip_count(&self) -> usize {
        self.emotions.values().map(Vec::len).sum()
    }
}

fn load_emotion_dir(dir: &Path, loop_frames: usize) -> Vec<AnimationClip> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "no emotion clip directory");
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    paths.sort();

    let mut clips = Vec::with_capacity(paths.len());
    for path in paths {
        match load_looped(&path, loop_frames) {
            Ok(clip) => clips.push(clip),
            Err(e) => tracing::warn!(error = %e, "skipping emotion clip"),
        }
    }
    clips
}

fn load_looped(path: &Path, loop_frames: usize) -> FaceLinkResult<AnimationClip> {
    let clip = load_clip_csv(path)?;
    let label = clip.label().to_string();
    let mut frames = clip.into_frames();
    loop_blend(&mut frames, expression_channels(), loop_frames);
    AnimationClip::new(label, frames).map_err(|e| FaceLinkError::clip_load(path, e))
}
