//! Runtime configuration
//!
//! One TOML file, one table per component. Every table and field is
//! optional and falls back to its default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use facelink_core::{FaceLinkError, FaceLinkResult};
use facelink_time::PacerConfig;
use facelink_transport::{EmoteConfig, TransportConfig};
use facelink_visual::{BlendConfig, EmotionConfig, LibraryConfig};
use facelink_wire::EncoderConfig;

use crate::{AudioConfig, PipelineConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub encoder: EncoderConfig,
    pub transport: TransportConfig,
    pub pacer: PacerConfig,
    pub blend: BlendConfig,
    pub emotion: EmotionConfig,
    pub library: LibraryConfig,
    pub audio: AudioConfig,
    pub emote: EmoteConfig,
    pub pipeline: PipelineConfig,
}

impl RuntimeConfig {
    /// Read a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> FaceLinkResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_toml_str(&text)
            .map_err(|e| FaceLinkError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(text: &str) -> FaceLinkResult<Self> {
        toml::from_str(text).map_err(|e| FaceLinkError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> FaceLinkResult<String> {
        toml::to_string_pretty(self).map_err(|e| FaceLinkError::Config(e.to_string()))
    }
}
