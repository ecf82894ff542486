use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use apollo_voice::config::Overrides;
use apollo_voice::voice::{
    AudioSource, MicrophoneSource, StreamingSpeaker, WakeWordGate, create_recognizer,
    create_synthesizer,
};
use apollo_voice::{ChatClient, Config, TurnController};

/// Apollo - wake-word voice assistant
#[derive(Parser)]
#[command(name = "apollo", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/apollo/config.toml)
    #[arg(short, long, env = "APOLLO_CONFIG")]
    config: Option<PathBuf>,

    /// Wake phrase to listen for
    #[arg(short, long)]
    wake_phrase: Option<String>,

    /// Text generation model
    #[arg(short, long)]
    model: Option<String>,

    /// TTS voice identifier
    #[arg(long)]
    voice: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the assistant loop (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Speak a line of text through the configured TTS and player
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Print the resolved configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,apollo_voice=info,apollo=info",
        1 => "info,apollo_voice=debug,apollo=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = Overrides {
        wake_phrase: cli.wake_phrase,
        model: cli.model,
        voice: cli.voice,
    };
    let config = Config::load(cli.config.as_deref(), &overrides)?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_assistant(config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::Say { text } => say(&config, &text).await,
        Command::CheckConfig => {
            check_config(&config);
            Ok(())
        }
    }
}

/// Build the collaborators and run turns until Ctrl-C
async fn run_assistant(config: Config) -> anyhow::Result<()> {
    let player = config.check_player()?;
    tracing::debug!(player = %player.display(), "found player");

    let audio: Arc<dyn AudioSource> = Arc::new(MicrophoneSource::new(
        config.voice.sample_rate,
        config.voice.frame_size,
    ));
    let recognizer = create_recognizer(&config.recognizer, config.voice.sample_rate)?;
    tracing::debug!(
        backend = ?config.recognizer.backend,
        sample_rate = recognizer.sample_rate(),
        "recognizer ready"
    );
    let gate = WakeWordGate::new(&config.voice.wake_phrase)?;
    let reply = Arc::new(ChatClient::new(&config.llm)?);
    let speaker = Arc::new(StreamingSpeaker::new(
        create_synthesizer(&config.tts)?,
        config.player.clone(),
    ));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            signal_cancel.cancel();
        }
    });

    let mut controller = TurnController::new(audio, recognizer, gate, reply, speaker, cancel);

    tracing::info!(
        model = %config.llm.model,
        voice = %config.tts.voice,
        "apollo ready - say \"{}\"",
        config.voice.wake_phrase
    );

    controller.run().await?;
    Ok(())
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let source = MicrophoneSource::new(config.voice.sample_rate, config.voice.frame_size);
    let mut input = source.open().await?;

    println!("Sample rate: {} Hz", source.sample_rate());
    println!("Frame size:  {} samples", source.frame_size());
    println!("---");

    let result = meter(input.as_mut(), duration).await;
    input.close().await;
    result?;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Print one RMS/peak line per second of captured audio
async fn meter(
    input: &mut dyn apollo_voice::voice::AudioInput,
    duration: u64,
) -> anyhow::Result<()> {
    for i in 0..duration {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut energy_sum = 0.0_f32;
        let mut frames = 0_u32;
        let mut peak = 0_i16;

        while Instant::now() < deadline {
            let frame = input.read().await?;
            energy_sum += frame.rms();
            frames += 1;
            peak = frame
                .samples()
                .iter()
                .copied()
                .map(i16::saturating_abs)
                .fold(peak, i16::max);
        }

        #[allow(clippy::cast_precision_loss)]
        let energy = if frames == 0 {
            0.0
        } else {
            energy_sum / frames as f32
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:5} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    Ok(())
}

/// Speak a line through the configured synthesizer and player
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    config.check_player()?;

    println!("Speaking: \"{text}\"\n");

    let speaker = StreamingSpeaker::new(create_synthesizer(&config.tts)?, config.player.clone());
    let report = speaker.play(text).await?;

    println!(
        "Played {} audio chunks ({} bytes), skipped {} metadata chunks",
        report.audio_chunks, report.bytes_written, report.metadata_chunks
    );

    Ok(())
}

/// Print the resolved configuration with secrets redacted
fn check_config(config: &Config) {
    println!("{config}");
    println!();

    match config.check_player() {
        Ok(path) => println!("player found at {}", path.display()),
        Err(e) => println!("warning: {e}"),
    }

    if let Some(path) = apollo_voice::config::config_file_path() {
        let state = if path.exists() { "present" } else { "absent" };
        println!("config file: {} ({state})", path.display());
    }
}
