//! Terminal preview of the lip-sync core.

use avatar_lipsync::envelope::{LegacyQuantizer, quantizer_for};
use avatar_lipsync::speech::engine::estimate_duration;
use avatar_lipsync::viseme::{GraphemeTable, is_pause_char};
use avatar_lipsync::{
    Avatar, AvatarMode, BufferSource, LipSyncConfig, MouthEvent, PacedEngine, Quantizer,
    SpeechEngine,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Print the mouth timeline avatar-lipsync produces for text or audio.
#[derive(Parser)]
#[command(name = "lipsync-preview", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Speak text with the paced engine and print each mouth change.
    Speak {
        text: String,
        /// Language tag (defaults to the configured voice).
        #[arg(long)]
        lang: Option<String>,
        /// Words per minute (defaults to the configured voice).
        #[arg(long)]
        wpm: Option<f32>,
        /// Report only start/end, leaving the fallback ticker to do the work.
        #[arg(long)]
        no_boundaries: bool,
    },

    /// Print the static grapheme → mouth shape table for text.
    Map { text: String },

    /// Follow the loudness of a WAV file.
    Wav {
        path: PathBuf,
        /// Use the four named sprites instead of the shape palette.
        #[arg(long)]
        legacy: bool,
    },

    /// Follow the default (or named) microphone.
    #[cfg(feature = "mic")]
    Mic {
        #[arg(long)]
        device: Option<String>,
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("avatar_lipsync=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = if let Some(ref path) = cli.config {
        LipSyncConfig::from_file(path)?
    } else {
        LipSyncConfig::default()
    };

    match cli.command {
        Command::Speak {
            text,
            lang,
            wpm,
            no_boundaries,
        } => run_speak(config, &text, lang.as_deref(), wpm, no_boundaries).await,
        Command::Map { text } => {
            print_map(&text);
            Ok(())
        }
        Command::Wav { path, legacy } => run_wav(config, path, legacy).await,
        #[cfg(feature = "mic")]
        Command::Mic { device, seconds } => run_mic(config, device.as_deref(), seconds).await,
    }
}

async fn run_speak(
    config: LipSyncConfig,
    text: &str,
    lang: Option<&str>,
    wpm: Option<f32>,
    no_boundaries: bool,
) -> anyhow::Result<()> {
    let wpm = wpm.unwrap_or(config.voice.words_per_minute);
    let expected_ms = estimate_duration(text, wpm * config.voice.rate);
    let engine: Arc<dyn SpeechEngine> =
        Arc::new(PacedEngine::new(wpm).with_boundaries(!no_boundaries));
    let mut avatar = Avatar::new(config, Some(engine))?;
    let printer = spawn_printer(avatar.subscribe());

    let chars: Vec<char> = text.chars().collect();
    let id = avatar.speak_in(text, lang).await?;
    info!(session = %id, wpm, expected_ms, "speaking");
    // Slack covers very slow paces and the closing cue.
    let limit = Duration::from_secs_f32(expected_ms / 1000.0) + Duration::from_secs(2);
    wait_idle(&mut avatar, limit).await;

    drop(avatar);
    let changes = printer.await?;
    println!("{changes} mouth changes over {} characters", chars.len());
    Ok(())
}

async fn run_wav(config: LipSyncConfig, path: PathBuf, legacy: bool) -> anyhow::Result<()> {
    let source = BufferSource::from_wav(&path)?;
    let seconds = source.duration_secs();
    let quantizer: Arc<dyn Quantizer> = if legacy {
        Arc::new(LegacyQuantizer)
    } else {
        quantizer_for(&config.envelope)?
    };

    let mut avatar = Avatar::new(config, None)?;
    let printer = spawn_printer(avatar.subscribe());
    avatar
        .follow_audio_with(Some(Box::new(source)), quantizer)
        .await?;
    info!(path = %path.display(), seconds, "following wav");
    wait_idle(&mut avatar, Duration::from_secs_f32(seconds) + Duration::from_secs(2)).await;

    drop(avatar);
    let changes = printer.await?;
    println!("{changes} mouth changes over {seconds:.2}s");
    Ok(())
}

#[cfg(feature = "mic")]
async fn run_mic(config: LipSyncConfig, device: Option<&str>, seconds: u64) -> anyhow::Result<()> {
    use avatar_lipsync::envelope::MicSource;

    let source = MicSource::open(device, config.envelope.window_size)?;
    let mut avatar = Avatar::new(config, None)?;
    let printer = spawn_printer(avatar.subscribe());
    avatar.follow_audio(Some(Box::new(source))).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        () = tokio::time::sleep(Duration::from_secs(seconds)) => {}
    }
    avatar.stop().await;

    drop(avatar);
    let changes = printer.await?;
    println!("{changes} mouth changes");
    Ok(())
}

fn print_map(text: &str) {
    let chars: Vec<char> = text.chars().collect();
    let table = GraphemeTable::global();
    let mut offset = 0;
    while offset < chars.len() {
        if is_pause_char(chars[offset]) {
            println!("{offset:>4}  {:<4} (pause)", chars[offset].escape_debug());
            offset += 1;
            continue;
        }
        let grapheme = table.lookup(&chars, offset);
        let width = grapheme.width.max(1);
        let cluster: String = chars[offset..(offset + width).min(chars.len())]
            .iter()
            .collect();
        println!(
            "{offset:>4}  {cluster:<4} {:?} ({})",
            grapheme.shape,
            grapheme.shape.asset_name()
        );
        offset += width;
    }
}

/// Print events until the channel closes; returns how many arrived.
fn spawn_printer(mut rx: broadcast::Receiver<MouthEvent>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now();
        let mut count = 0;
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    count += 1;
                    let cursor = ev.cursor.map_or_else(|| "-".to_owned(), |c| c.to_string());
                    println!(
                        "{:>6}ms  {:<5} {:>4}  {:<16} {:?}",
                        start.elapsed().as_millis(),
                        ev.session.to_string(),
                        cursor,
                        ev.cue.asset_name(),
                        ev.source
                    );
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("(skipped {n} events)");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        count
    })
}

/// Poll until the avatar goes idle, stopping it once `limit` has passed.
async fn wait_idle(avatar: &mut Avatar, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    let mut poll = tokio::time::interval(Duration::from_millis(50));
    loop {
        poll.tick().await;
        if avatar.mode() == AvatarMode::Idle {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                limit_ms = limit.as_millis() as u64,
                "still running past the expected length, stopping"
            );
            avatar.stop().await;
            return;
        }
    }
}
