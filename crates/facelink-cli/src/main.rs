use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use facelink_core::{Channel, FaceLinkError, FaceLinkResult, Pose, PoseWidth, FRAME_RATE};
use facelink_runtime::{start_session, GeneratedSequence, RuntimeConfig};
use facelink_visual::{load_clip_csv, write_clip_csv};
use facelink_wire::decode_packet;

fn main() -> FaceLinkResult<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = RuntimeConfig::load(&cli.config)?;

    match cli.command {
        Commands::Idle { seconds } => run_idle(&config, seconds),
        Commands::Play { dir } => run_play(&config, &dir),
        Commands::Inspect {
            listen,
            count,
            subject_id_len,
        } => run_inspect(&listen, count, subject_id_len),
        Commands::SendTest { seconds, save } => run_send_test(&config, seconds, save.as_deref()),
    }
}

fn run_idle(config: &RuntimeConfig, seconds: u64) -> FaceLinkResult<()> {
    tracing::info!(endpoint = ?config.transport.endpoint()?, "streaming idle loop");
    let pipeline = start_session(config, None)?;
    if seconds == 0 {
        loop {
            std::thread::park();
        }
    }
    std::thread::sleep(Duration::from_secs(seconds));
    pipeline.shutdown();
    Ok(())
}

fn run_play(config: &RuntimeConfig, dir: &Path) -> FaceLinkResult<()> {
    let shapes = load_clip_csv(&dir.join("shapes.csv"))?;
    let audio = std::fs::read(dir.join("audio.wav"))?;
    tracing::info!(
        frames = shapes.len(),
        width = ?shapes.width(),
        audio_bytes = audio.len(),
        "playing generated files"
    );

    let frames = shapes.len();
    let pipeline = start_session(config, None)?;
    pipeline.submit(GeneratedSequence::new(shapes.into_frames(), audio))?;

    let budget = Duration::from_secs_f64(frames as f64 / FRAME_RATE as f64) + Duration::from_secs(5);
    if !pipeline.wait_until_drained(budget) {
        tracing::warn!("playback did not finish in time, interrupting");
        pipeline.interrupt();
    }
    pipeline.shutdown();
    Ok(())
}

fn run_inspect(listen: &str, count: usize, subject_id_len: usize) -> FaceLinkResult<()> {
    let socket = UdpSocket::bind(listen)?;
    tracing::info!(%listen, "waiting for packets");

    let mut buf = [0u8; 1024];
    for _ in 0..count {
        let (n, from) = socket.recv_from(&mut buf)?;
        match decode_packet(&buf[..n], subject_id_len) {
            Ok(packet) => {
                let active: Vec<String> = Channel::ALL
                    .iter()
                    .zip(&packet.values)
                    .filter(|(_, v)| **v > 0.0)
                    .map(|(c, v)| format!("{}={v:.3}", c.name()))
                    .collect();
                println!(
                    "{from} {} '{}' frame {} @ {}/{} [{} ch] {}",
                    packet.subject_id,
                    packet.name,
                    packet.frame_count,
                    packet.frame_rate,
                    packet.frame_rate_denominator,
                    packet.values.len(),
                    active.join(" ")
                );
            }
            Err(e) => println!("{from} {n} bytes: {e}"),
        }
    }
    Ok(())
}

fn run_send_test(config: &RuntimeConfig, seconds: f64, save: Option<&Path>) -> FaceLinkResult<()> {
    if !(seconds > 0.0) {
        return Err(FaceLinkError::Config(format!("bad duration {seconds}")));
    }
    let frames = (seconds * FRAME_RATE as f64).round() as usize;
    let sweep: Vec<Pose> = (0..frames)
        .map(|i| {
            let t = i as f32 / FRAME_RATE as f32;
            let mut pose = Pose::zeros(PoseWidth::Base);
            pose.set(Channel::JawOpen, 0.5 - 0.5 * (t * std::f32::consts::TAU).cos());
            pose.set(Channel::MouthSmileLeft, 0.3);
            pose.set(Channel::MouthSmileRight, 0.3);
            pose
        })
        .collect();

    if let Some(path) = save {
        write_clip_csv(path, &sweep)?;
        tracing::info!(path = %path.display(), "sweep saved");
    }

    let pipeline = start_session(config, None)?;
    pipeline.submit(GeneratedSequence::new(sweep, Vec::new()))?;
    let drained = pipeline.wait_until_drained(Duration::from_secs_f64(seconds + 5.0));
    pipeline.shutdown();
    if drained {
        Ok(())
    } else {
        Err(FaceLinkError::Config("test sweep did not finish".into()))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream facial animation to a LiveLink engine", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when it does not exist.
    #[arg(short, long, default_value = "facelink.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream the idle loop.
    Idle {
        /// Stop after this many seconds; 0 runs until killed.
        #[arg(short, long, default_value_t = 0)]
        seconds: u64,
    },
    /// Play `audio.wav` and `shapes.csv` from a directory.
    Play {
        dir: PathBuf,
    },
    /// Listen for packets and print them decoded.
    Inspect {
        #[arg(short, long, default_value = "127.0.0.1:11111")]
        listen: String,
        /// Packets to print before exiting.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
        /// Length of the subject id including its `$` prefix.
        #[arg(long, default_value_t = 37)]
        subject_id_len: usize,
    },
    /// Send a jaw open/close sweep through the full pipeline.
    SendTest {
        #[arg(short, long, default_value_t = 2.0)]
        seconds: f64,
        /// Also write the sweep as a clip CSV.
        #[arg(long)]
        save: Option<PathBuf>,
    },
}
