//! Sound card output through cpal
//!
//! Each clip gets its own output stream, opened and dropped on the thread
//! that plays it. Dropping the stream is what silences a cancelled clip.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig};

use facelink_core::{FaceLinkError, FaceLinkResult};

use crate::{AudioConfig, AudioSink, CancelToken};

/// Decoded audio: interleaved samples in [-1, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl Pcm {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

fn wav_error(e: hound::Error) -> FaceLinkError {
    FaceLinkError::AudioFormat(e.to_string())
}

/// Decode a WAV file, or raw little-endian PCM in the configured format
pub fn decode_pcm(audio: &[u8], config: &AudioConfig) -> FaceLinkResult<Pcm> {
    if audio.starts_with(b"RIFF") {
        let mut reader = hound::WavReader::new(Cursor::new(audio)).map_err(wav_error)?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(FaceLinkError::AudioFormat("empty WAV format".into()));
        }
        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(wav_error)?,
            hound::SampleFormat::Int => {
                let full_scale = (1u64 << spec.bits_per_sample.saturating_sub(1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / full_scale))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(wav_error)?
            }
        };
        return Ok(Pcm {
            samples,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
        });
    }

    let frame_bytes = config.raw_frame_bytes()?;
    let width = frame_bytes / config.raw_channels as usize;
    let decode: fn(&[u8]) -> f32 = match width {
        1 => |b: &[u8]| (b[0] as f32 - 128.0) / 128.0,
        2 => |b: &[u8]| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0,
        3 => |b: &[u8]| (i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8) as f32 / 8_388_608.0,
        4 => |b: &[u8]| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0,
        _ => {
            return Err(FaceLinkError::AudioFormat(format!(
                "unsupported raw sample width: {} bit",
                config.raw_bits_per_sample
            )))
        }
    };
    // A trailing partial frame is dropped
    let whole = audio.len() - audio.len() % frame_bytes;
    Ok(Pcm {
        samples: audio[..whole].chunks_exact(width).map(decode).collect(),
        channels: config.raw_channels,
        sample_rate: config.raw_sample_rate,
    })
}

/// Remix and linearly resample to an output layout
pub fn fit_to_output(pcm: &Pcm, channels: u16, sample_rate: u32) -> Vec<f32> {
    let frames_in = pcm.frames();
    let (in_ch, out_ch) = (pcm.channels.max(1) as usize, channels.max(1) as usize);
    if frames_in == 0 || pcm.sample_rate == 0 || sample_rate == 0 {
        return Vec::new();
    }

    let at = |frame: usize, channel: usize| -> f32 {
        let base = frame * in_ch;
        if in_ch == out_ch {
            pcm.samples[base + channel]
        } else if in_ch == 1 {
            pcm.samples[base]
        } else if out_ch == 1 {
            pcm.samples[base..base + in_ch].iter().sum::<f32>() / in_ch as f32
        } else {
            pcm.samples[base + channel % in_ch]
        }
    };

    let step = pcm.sample_rate as f64 / sample_rate as f64;
    let frames_out = (frames_in as f64 / step).round() as usize;
    let mut out = Vec::with_capacity(frames_out * out_ch);
    for j in 0..frames_out {
        let pos = j as f64 * step;
        let i0 = (pos.floor() as usize).min(frames_in - 1);
        let i1 = (i0 + 1).min(frames_in - 1);
        let frac = (pos - i0 as f64) as f32;
        for c in 0..out_ch {
            let (a, b) = (at(i0, c), at(i1, c));
            out.push(a + (b - a) * frac);
        }
    }
    out
}

/// Read position shared with the output callback
#[derive(Debug)]
struct Playhead {
    samples: Vec<f32>,
    position: AtomicUsize,
    /// A callback found nothing left to play
    drained: AtomicBool,
    failed: AtomicBool,
}

impl Playhead {
    fn new(samples: Vec<f32>) -> Self {
        Playhead {
            samples,
            position: AtomicUsize::new(0),
            drained: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    fn fill<T: Sample + FromSample<f32>>(&self, out: &mut [T]) {
        let start = self.position.fetch_add(out.len(), Ordering::AcqRel);
        if start >= self.samples.len() {
            self.drained.store(true, Ordering::Release);
        }
        for (i, slot) in out.iter_mut().enumerate() {
            let value = self.samples.get(start + i).copied().unwrap_or(0.0);
            *slot = T::from_sample(value);
        }
    }

    fn is_finished(&self) -> bool {
        self.drained.load(Ordering::Acquire) || self.failed.load(Ordering::Acquire)
    }
}

fn output_device(name: Option<&str>) -> FaceLinkResult<Device> {
    let host = cpal::default_host();
    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| FaceLinkError::AudioDevice("no default output device".into()));
    };
    let devices = host
        .output_devices()
        .map_err(|e| FaceLinkError::AudioDevice(format!("cannot list devices: {e}")))?;
    for device in devices {
        if device.name().map_or(false, |n| n == name || n.contains(name)) {
            return Ok(device);
        }
    }
    Err(FaceLinkError::AudioDevice(format!(
        "no output device matching {name}"
    )))
}

/// The clip's own layout when the device takes it, the device default otherwise
fn stream_config(device: &Device, pcm: &Pcm) -> FaceLinkResult<(StreamConfig, SampleFormat)> {
    if let Ok(ranges) = device.supported_output_configs() {
        for range in ranges {
            if range.channels() == pcm.channels
                && range.min_sample_rate().0 <= pcm.sample_rate
                && pcm.sample_rate <= range.max_sample_rate().0
            {
                let supported = range.with_sample_rate(SampleRate(pcm.sample_rate));
                return Ok((supported.config(), supported.sample_format()));
            }
        }
    }
    let supported = device
        .default_output_config()
        .map_err(|e| FaceLinkError::AudioDevice(e.to_string()))?;
    Ok((supported.config(), supported.sample_format()))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    playhead: &Arc<Playhead>,
) -> FaceLinkResult<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let fill = Arc::clone(playhead);
    let failed = Arc::clone(playhead);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| fill.fill(data),
            move |err| {
                tracing::error!(error = %err, "audio output stream error");
                failed.failed.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| FaceLinkError::AudioDevice(format!("failed to build stream: {e}")))
}

/// Plays clips on an output device
#[derive(Debug, Clone)]
pub struct DeviceAudioSink {
    config: AudioConfig,
}

impl DeviceAudioSink {
    const SLICE: Duration = Duration::from_millis(2);
    /// Allowance past the clip length before a silent device is given up on
    const GRACE: Duration = Duration::from_secs(1);

    /// Check that the configured device exists
    pub fn open(config: AudioConfig) -> FaceLinkResult<Self> {
        let device = output_device(config.device.as_deref())?;
        let name = device.name().unwrap_or_else(|_| "unknown".into());
        tracing::info!(device = %name, "audio output");
        Ok(DeviceAudioSink { config })
    }
}

impl AudioSink for DeviceAudioSink {
    fn play(&self, audio: &[u8], cancel: &CancelToken) -> FaceLinkResult<Duration> {
        let start = Instant::now();
        if audio.is_empty() || cancel.is_cancelled() {
            return Ok(Duration::ZERO);
        }
        let pcm = decode_pcm(audio, &self.config)?;
        if pcm.samples.is_empty() {
            return Ok(Duration::ZERO);
        }

        let device = output_device(self.config.device.as_deref())?;
        let (stream_config, format) = stream_config(&device, &pcm)?;
        let samples = fit_to_output(&pcm, stream_config.channels, stream_config.sample_rate.0);
        let playhead = Arc::new(Playhead::new(samples));
        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, &playhead)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, &playhead)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, &playhead)?,
            SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, &playhead)?,
            other => {
                return Err(FaceLinkError::AudioDevice(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        };
        stream
            .play()
            .map_err(|e| FaceLinkError::AudioDevice(format!("failed to start stream: {e}")))?;

        let deadline = start + pcm.duration() + Self::GRACE;
        while !cancel.is_cancelled() && !playhead.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(clip = ?pcm.duration(), "audio device stalled, abandoning clip");
                break;
            }
            std::thread::sleep(Self::SLICE);
        }
        if let Err(e) = stream.pause() {
            tracing::debug!(error = %e, "could not pause stream");
        }
        drop(stream);
        Ok(start.elapsed())
    }
}
