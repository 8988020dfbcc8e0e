//! Audio playback seam
//!
//! Sessions play through [`DeviceAudioSink`](crate::DeviceAudioSink) on the
//! sound card. [`TimedAudioSink`] opens no device: it works out how long the
//! clip runs and holds for that long, which is all the packet dispatcher
//! needs to stay in lockstep on a headless host or in tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use facelink_core::{FaceLinkError, FaceLinkResult};

/// Cooperative cancellation flag shared by one playback
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Plays one audio clip to completion or cancellation
pub trait AudioSink: Send + Sync {
    /// Block until `audio` has played or `cancel` fires. Returns the time
    /// actually spent playing.
    fn play(&self, audio: &[u8], cancel: &CancelToken) -> FaceLinkResult<Duration>;
}

/// Where session audio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioBackend {
    /// The output device; falls back to `Timed` when there is none
    #[default]
    Device,
    /// No sound, playback is clocked from the clip length
    Timed,
}

/// Audio output settings. The `raw_*` fields describe audio without a
/// RIFF/WAVE header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub backend: AudioBackend,
    /// Output device name or a substring of it; the host default if unset
    pub device: Option<String>,
    pub raw_sample_rate: u32,
    pub raw_channels: u16,
    pub raw_bits_per_sample: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            backend: AudioBackend::Device,
            device: None,
            raw_sample_rate: 22_050,
            raw_channels: 1,
            raw_bits_per_sample: 16,
        }
    }
}

impl AudioConfig {
    /// Bytes per raw PCM frame, or an error if the raw format is unusable
    pub(crate) fn raw_frame_bytes(&self) -> FaceLinkResult<usize> {
        let bytes_per_frame = self.raw_channels as usize * (self.raw_bits_per_sample as usize / 8);
        if bytes_per_frame == 0 || self.raw_sample_rate == 0 {
            return Err(FaceLinkError::AudioFormat(format!(
                "unusable raw format: {} Hz, {} ch, {} bit",
                self.raw_sample_rate, self.raw_channels, self.raw_bits_per_sample
            )));
        }
        Ok(bytes_per_frame)
    }
}

/// Running time of an audio clip: WAV header if present, raw PCM otherwise
pub fn audio_duration(audio: &[u8], config: &AudioConfig) -> FaceLinkResult<Duration> {
    if audio.is_empty() {
        return Ok(Duration::ZERO);
    }

    if audio.starts_with(b"RIFF") {
        let reader = hound::WavReader::new(Cursor::new(audio))
            .map_err(|e| FaceLinkError::AudioFormat(e.to_string()))?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return Err(FaceLinkError::AudioFormat("zero sample rate".into()));
        }
        let frames = reader.duration() as f64;
        return Ok(Duration::from_secs_f64(frames / spec.sample_rate as f64));
    }

    let bytes_per_frame = config.raw_frame_bytes()? as u64;
    let frames = audio.len() as u64 / bytes_per_frame;
    Ok(Duration::from_secs_f64(
        frames as f64 / config.raw_sample_rate as f64,
    ))
}

/// Holds for the clip's duration without producing sound
#[derive(Debug, Clone, Default)]
pub struct TimedAudioSink {
    config: AudioConfig,
}

impl TimedAudioSink {
    /// Poll interval while holding
    const SLICE: Duration = Duration::from_millis(2);

    pub fn new(config: AudioConfig) -> Self {
        TimedAudioSink { config }
    }
}

impl AudioSink for TimedAudioSink {
    fn play(&self, audio: &[u8], cancel: &CancelToken) -> FaceLinkResult<Duration> {
        let duration = audio_duration(audio, &self.config)?;
        let start = Instant::now();
        let end = start + duration;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let now = Instant::now();
            if now >= end {
                break;
            }
            std::thread::sleep((end - now).min(Self::SLICE));
        }
        Ok(start.elapsed())
    }
}

/// Returns at once
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn play(&self, _audio: &[u8], _cancel: &CancelToken) -> FaceLinkResult<Duration> {
        Ok(Duration::ZERO)
    }
}

/// Mono 16-bit silence as an in-memory WAV file
pub fn silent_wav(duration: Duration, sample_rate: u32) -> FaceLinkResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let samples = (duration.as_secs_f64() * sample_rate as f64).round() as u64;

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| FaceLinkError::AudioFormat(e.to_string()))?;
        for _ in 0..samples {
            writer
                .write_sample(0i16)
                .map_err(|e| FaceLinkError::AudioFormat(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| FaceLinkError::AudioFormat(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}
