use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serial_test::serial;

use facelink_core::{Channel, Pose, PoseWidth};
use facelink_runtime::{
    build_parts, silent_wav, AudioSink, GeneratedSequence, PipelineConfig, RuntimeConfig,
    StreamPipeline, TimedAudioSink,
};
use facelink_transport::MemorySink;
use facelink_visual::{AnimationClip, ClipLibrary};
use facelink_wire::decode_packet;

const SUBJECT: &str = "$pipeline";

fn talking(range: std::ops::Range<usize>) -> Vec<Pose> {
    range
        .map(|i| {
            let mut p = Pose::zeros(PoseWidth::Base);
            let t = i as f32 / 60.0;
            p.set(Channel::JawOpen, 0.5 + 0.4 * (t * 6.0).sin());
            p
        })
        .collect()
}

fn start(sink: Arc<MemorySink>, idle_on_start: bool) -> StreamPipeline {
    let mut config = RuntimeConfig::default();
    config.encoder.subject_id = Some(SUBJECT.into());
    config.pipeline = PipelineConfig {
        idle_on_start,
        ..PipelineConfig::default()
    };
    let library = Arc::new(ClipLibrary::new(AnimationClip::neutral()));
    let audio: Arc<dyn AudioSink> = Arc::new(TimedAudioSink::default());
    let parts = build_parts(&config, library, sink, audio);
    StreamPipeline::start(&config.pipeline, parts).unwrap()
}

fn jaw_track(sink: &MemorySink) -> Vec<f32> {
    sink.sent()
        .iter()
        .map(|s| {
            decode_packet(s.packet.as_bytes(), SUBJECT.len()).unwrap().values
                [Channel::JawOpen.index()]
        })
        .collect()
}

fn max_step(track: &[f32]) -> f32 {
    track
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0, f32::max)
}

#[test]
#[serial]
fn test_barge_in_returns_to_idle() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = start(sink.clone(), true);

    let audio = Bytes::from(silent_wav(Duration::from_secs(5), 8_000).unwrap());
    for _ in 0..3 {
        pipeline
            .submit(GeneratedSequence::new(talking(0..300), audio.clone()))
            .unwrap();
    }
    std::thread::sleep(Duration::from_millis(300));
    assert!(pipeline.is_playing());
    assert!(!pipeline.idle().is_running());

    pipeline.interrupt();
    assert!(pipeline.queues_empty());
    assert!(!pipeline.is_playing());
    assert!(pipeline.idle().is_running());

    // Only the idle loop is talking now: about six frames per 100 ms
    sink.clear();
    std::thread::sleep(Duration::from_millis(200));
    let sent = sink.len();
    assert!((8..=16).contains(&sent), "{sent} frames in 200 ms");
    assert!(pipeline.wait_until_drained(Duration::from_millis(100)));

    pipeline.shutdown();
}

#[test]
#[serial]
fn test_submit_after_barge_in_plays() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = start(sink.clone(), false);

    pipeline
        .submit(GeneratedSequence::new(talking(0..600), Bytes::new()))
        .unwrap();
    std::thread::sleep(Duration::from_millis(100));
    pipeline.interrupt();
    let epoch = pipeline.epoch();

    pipeline
        .submit(GeneratedSequence::new(talking(0..30), Bytes::new()))
        .unwrap();
    assert!(pipeline.wait_until_drained(Duration::from_secs(2)));
    assert_eq!(pipeline.epoch(), epoch);
    assert!(pipeline.idle().is_running());
    pipeline.shutdown();
}

#[test]
#[serial]
fn test_chunked_utterance_is_as_smooth_as_whole() {
    let whole = {
        let sink = Arc::new(MemorySink::new());
        let pipeline = start(sink.clone(), false);
        pipeline
            .submit(GeneratedSequence::new(talking(0..180), Bytes::new()))
            .unwrap();
        assert!(pipeline.wait_until_drained(Duration::from_secs(5)));
        pipeline.idle().pause();
        pipeline.shutdown();
        jaw_track(&sink)
    };

    let chunked = {
        let sink = Arc::new(MemorySink::new());
        let pipeline = start(sink.clone(), false);
        pipeline
            .submit_all(vec![
                GeneratedSequence::new(talking(0..60), Bytes::new()),
                GeneratedSequence::new(talking(60..120), Bytes::new()),
                GeneratedSequence::new(talking(120..180), Bytes::new()),
            ])
            .unwrap();
        assert!(pipeline.wait_until_drained(Duration::from_secs(5)));
        pipeline.idle().pause();
        pipeline.shutdown();
        jaw_track(&sink)
    };

    assert!(whole.len() >= 180);
    assert!(chunked.len() >= 180);
    let (whole_step, chunked_step) = (max_step(&whole[..180]), max_step(&chunked[..180]));
    assert!(
        chunked_step <= whole_step + 0.02,
        "chunked {chunked_step} vs whole {whole_step}"
    );

    // Same generated section once the fades are over
    for i in 40..50 {
        assert!((whole[i] - chunked[i]).abs() < 1e-4, "frame {i}");
    }
}

fn jaw_held(len: usize, value: f32) -> Vec<Pose> {
    (0..len)
        .map(|_| {
            let mut p = Pose::zeros(PoseWidth::Base);
            p.set(Channel::JawOpen, value);
            p
        })
        .collect()
}

#[test]
#[serial]
fn test_slow_producer_fades_instead_of_cutting() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = start(sink.clone(), true);

    pipeline
        .submit(GeneratedSequence::new(jaw_held(60, 0.8), Bytes::new()))
        .unwrap();
    // The rest of the utterance arrives well after the first chunk ran out
    std::thread::sleep(Duration::from_millis(1_500));
    assert!(pipeline.idle().is_running());
    pipeline
        .submit(GeneratedSequence::new(jaw_held(60, 0.8), Bytes::new()))
        .unwrap();
    assert!(pipeline.wait_until_drained(Duration::from_secs(3)));
    pipeline.idle().pause();
    pipeline.shutdown();

    // Idle is neutral, so any cut would show as a full 0.8 step
    let track = jaw_track(&sink);
    assert!(track.iter().any(|v| (*v - 0.8).abs() < 1e-4));
    let step = max_step(&track);
    assert!(step < 0.2, "max step {step}");
}
