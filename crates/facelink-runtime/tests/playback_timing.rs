use std::sync::Arc;
use std::time::{Duration, Instant};

use serial_test::serial;

use facelink_core::{Channel, Pose, PoseWidth};
use facelink_runtime::{silent_wav, PlaybackScheduler, TimedAudioSink};
use facelink_time::PacerConfig;
use facelink_transport::MemorySink;
use facelink_wire::{decode_packet, EncoderConfig, EncoderState};

fn encoded(frames: usize) -> (Vec<facelink_wire::EncodedPacket>, usize) {
    let mut encoder = EncoderState::new(&EncoderConfig {
        subject_id: Some("timing".into()),
        ..EncoderConfig::default()
    });
    let id_len = encoder.subject().id.as_str().len();
    let packets = (0..frames)
        .map(|i| {
            let mut pose = Pose::zeros(PoseWidth::Base);
            pose.set(Channel::JawOpen, (i % 60) as f32 / 60.0);
            let packet = encoder.encode_pose(&pose).unwrap();
            encoder.advance();
            packet
        })
        .collect();
    (packets, id_len)
}

#[test]
#[serial]
fn test_180_frames_take_three_seconds() {
    let sink = Arc::new(MemorySink::new());
    let scheduler = PlaybackScheduler::new(
        sink.clone(),
        Arc::new(TimedAudioSink::default()),
        PacerConfig::default(),
    );
    let (packets, id_len) = encoded(180);
    let audio = silent_wav(Duration::from_secs(3), 16_000).unwrap();

    let wall = Instant::now();
    let report = scheduler.play(&packets, &audio);
    let wall = wall.elapsed();

    assert_eq!(report.sent, 180);
    assert!(!report.cancelled);
    let secs = report.elapsed.as_secs_f64();
    assert!((2.95..=3.10).contains(&secs), "dispatch took {secs:.3}s");
    // play() also waits for the audio side
    assert!(wall >= Duration::from_millis(2990), "returned after {wall:?}");
    assert!(wall <= Duration::from_millis(3200), "returned after {wall:?}");

    let sent = sink.sent();
    let counts: Vec<u32> = sent
        .iter()
        .map(|s| decode_packet(s.packet.as_bytes(), id_len).unwrap().frame_count)
        .collect();
    assert!(counts.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
}

#[test]
#[serial]
fn test_frames_follow_the_clock() {
    let sink = Arc::new(MemorySink::new());
    let scheduler = PlaybackScheduler::new(
        sink.clone(),
        Arc::new(TimedAudioSink::default()),
        PacerConfig::default(),
    );
    let (packets, _) = encoded(60);
    scheduler.play(&packets, &[]);

    let sent = sink.sent();
    let start = sent[0].at;
    for (i, s) in sent.iter().enumerate() {
        let offset = s.at.duration_since(start).as_secs_f64();
        let target = i as f64 / 60.0;
        assert!(
            (offset - target).abs() < 0.012,
            "frame {i} at {offset:.4}s, target {target:.4}s"
        );
    }
}

#[test]
#[serial]
fn test_audio_cancel_stops_both_sides() {
    let sink = Arc::new(MemorySink::new());
    let scheduler = Arc::new(PlaybackScheduler::new(
        sink.clone(),
        Arc::new(TimedAudioSink::default()),
        PacerConfig::default(),
    ));
    let (packets, _) = encoded(300);
    let audio = silent_wav(Duration::from_secs(5), 8_000).unwrap();

    let player = {
        let scheduler = scheduler.clone();
        std::thread::spawn(move || {
            let started = Instant::now();
            let report = scheduler.play(&packets, &audio);
            (report, started.elapsed())
        })
    };
    std::thread::sleep(Duration::from_millis(250));
    scheduler.cancel();

    let (report, took) = player.join().unwrap();
    assert!(report.cancelled);
    assert!(report.sent < 300);
    assert!(took < Duration::from_secs(1), "cancel took {took:?}");
}
