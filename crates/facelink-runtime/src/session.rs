//! Session assembly: one transport, one clip library, two encoders

use std::sync::Arc;

use facelink_core::FaceLinkResult;
use facelink_transport::{EmoteClient, PacketSink, UdpTransport};
use facelink_visual::{BlendEngine, ClipLibrary};
use facelink_wire::EncoderState;

use crate::{
    AudioBackend, AudioConfig, AudioSink, DeviceAudioSink, IdleLoop, PipelineParts,
    PlaybackScheduler, RuntimeConfig, SpeechSynthesizer, StreamPipeline, TimedAudioSink,
};

/// Wire the components for one subject onto `sink` and `audio`
pub fn build_parts(
    config: &RuntimeConfig,
    library: Arc<ClipLibrary>,
    sink: Arc<dyn PacketSink>,
    audio: Arc<dyn AudioSink>,
) -> PipelineParts {
    // Same subject on both; the frame counters advance independently
    let idle_encoder = EncoderState::new(&config.encoder);
    let pre_encoder = idle_encoder.clone();

    let idle = Arc::new(IdleLoop::new(
        &library,
        Arc::clone(&sink),
        idle_encoder,
        config.pacer.clone(),
    ));
    let scheduler = Arc::new(PlaybackScheduler::new(sink, audio, config.pacer.clone()));
    let engine = BlendEngine::new(
        config.blend.clone(),
        config.emotion.clone(),
        library,
        pre_encoder,
    );

    PipelineParts {
        idle,
        scheduler,
        engine,
        emote: EmoteClient::new(config.emote.clone()),
        synthesizer: None,
    }
}

/// The configured audio output. A missing device degrades to timed silence
/// so frames still go out on schedule.
pub fn audio_sink(config: &AudioConfig) -> Arc<dyn AudioSink> {
    match config.backend {
        AudioBackend::Timed => Arc::new(TimedAudioSink::new(config.clone())),
        AudioBackend::Device => match DeviceAudioSink::open(config.clone()) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                tracing::warn!(error = %e, "no audio output, playing without sound");
                Arc::new(TimedAudioSink::new(config.clone()))
            }
        },
    }
}

/// Load the library, open the UDP transport and start the pipeline
pub fn start_session(
    config: &RuntimeConfig,
    synthesizer: Option<Box<dyn SpeechSynthesizer>>,
) -> FaceLinkResult<StreamPipeline> {
    let library = Arc::new(ClipLibrary::load_or_neutral(&config.library));
    let transport: Arc<dyn PacketSink> = Arc::new(UdpTransport::connect(&config.transport)?);
    let audio = audio_sink(&config.audio);

    let mut parts = build_parts(config, library, transport, audio);
    parts.synthesizer = synthesizer;
    StreamPipeline::start(&config.pipeline, parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{silent_wav, CancelToken, NullAudioSink};
    use facelink_transport::MemorySink;
    use facelink_visual::AnimationClip;
    use facelink_wire::decode_packet;
    use std::time::Duration;

    #[test]
    fn test_encoders_share_subject() {
        let sink = Arc::new(MemorySink::new());
        let library = Arc::new(ClipLibrary::new(AnimationClip::neutral()));
        let config = RuntimeConfig::default();
        let parts = build_parts(&config, library, sink.clone(), Arc::new(NullAudioSink));

        parts.idle.resume().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        parts.idle.pause();

        let subject = parts.engine.encoder().subject().clone();
        let first = sink.sent().remove(0);
        let decoded = decode_packet(first.packet.as_bytes(), subject.id.as_str().len()).unwrap();
        assert_eq!(decoded.subject_id, subject.id.as_str());
        assert_eq!(decoded.name, subject.name);
    }

    #[test]
    fn test_session_over_udp() {
        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();

        let mut config = RuntimeConfig::default();
        config.audio.backend = AudioBackend::Timed;
        config.transport.port = receiver.local_addr().unwrap().port();
        config.library.root = tempfile::tempdir().unwrap().path().join("missing");

        let pipeline = start_session(&config, None).unwrap();
        let mut buf = [0u8; 512];
        let n = receiver.recv(&mut buf).unwrap();
        assert!(n > 0);
        pipeline.shutdown();
    }

    #[test]
    fn test_timed_backend_holds_for_the_clip() {
        let config = AudioConfig {
            backend: AudioBackend::Timed,
            ..AudioConfig::default()
        };
        let sink = audio_sink(&config);
        let clip = silent_wav(Duration::from_millis(100), 8_000).unwrap();
        let played = sink.play(&clip, &CancelToken::new()).unwrap();
        assert!(played >= Duration::from_millis(100));
        assert!(played < Duration::from_millis(300));
    }

    #[test]
    fn test_missing_device_falls_back_to_timed() {
        let config = AudioConfig {
            device: Some("no such facelink output".into()),
            ..AudioConfig::default()
        };
        // Whatever the host has, this name matches nothing
        let sink = audio_sink(&config);
        let clip = silent_wav(Duration::from_millis(50), 8_000).unwrap();
        let played = sink.play(&clip, &CancelToken::new()).unwrap();
        assert!(played >= Duration::from_millis(50));
    }
}
