use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use coachlink::audio::{
    AudioCapture, AudioSink, CpalSink, TARGET_SAMPLE_RATE, VadConfig, VadEvent, VoiceSegmenter,
    pcm16_to_f32, rms, samples_to_wav,
};
use coachlink::backend::{BackendClient, CoachRecord, token_identity};
use coachlink::{Config, Session, SessionOptions, SessionStatus};

/// Coachlink - talk to an AI coach from the terminal
#[derive(Parser)]
#[command(name = "coachlink", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a voice conversation with a coach
    Talk {
        /// Coach name (as the catalogue lists it)
        #[arg(short, long, env = "COACHLINK_COACH", conflicts_with = "coach_id")]
        coach: Option<String>,

        /// Coach id
        #[arg(long)]
        coach_id: Option<i64>,

        /// Upstream voice API ("openai" or "elevenlabs")
        #[arg(long)]
        api: Option<String>,
    },
    /// List available coaches
    Coaches,
    /// Record one utterance with the voice segmenter and write it to a WAV
    /// file
    Record {
        /// Output WAV path
        output: PathBuf,

        /// Give up after this many seconds of capture
        #[arg(short, long, default_value = "30")]
        max_seconds: u64,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,coachlink=info",
        1 => "info,coachlink=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Talk {
            coach,
            coach_id,
            api,
        } => talk(coach, coach_id, api).await,
        Command::Coaches => list_coaches().await,
        Command::Record {
            output,
            max_seconds,
        } => record(&output, max_seconds).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Start a conversation and run it until the user or the relay stops it
#[allow(clippy::future_not_send)]
async fn talk(
    coach: Option<String>,
    coach_id: Option<i64>,
    api: Option<String>,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let token = require_token(&config)?;

    let api_type = match api {
        Some(value) => value.parse()?,
        None => config.api_type,
    };

    let backend = BackendClient::new(config.backend_url.clone(), token.clone());
    let coach = resolve_coach(&backend, coach.as_deref(), coach_id).await?;
    backend.verify_access(coach.id).await?;

    let (user_name, user_id) = {
        use secrecy::ExposeSecret;
        token_identity(token.expose_secret())
    };

    println!("Talking to {} - press ctrl-c to stop and save", coach.name);

    let options = SessionOptions {
        relay_url: config.relay_url,
        token,
        coach_id: coach.id,
        coach_name: coach.name,
        api_type,
        user_name,
        user_id,
    };

    let (stop_tx, stop_rx) = mpsc::channel(4);
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                break;
            }
            if stop_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    let summary = Session::new(options).run(stop_rx).await?;

    let minutes = summary.elapsed.as_secs_f64() / 60.0;
    match summary.status {
        SessionStatus::Stopped => {
            if summary.saved {
                println!("Conversation over ({minutes:.1} min), saved.");
            } else {
                println!("Conversation over ({minutes:.1} min), not saved.");
            }
        }
        status => println!("Session ended in state {status:?} after {minutes:.1} min"),
    }

    Ok(())
}

/// Print the coach catalogue
async fn list_coaches() -> anyhow::Result<()> {
    let config = Config::load()?;
    let token = require_token(&config)?;

    let backend = BackendClient::new(config.backend_url.clone(), token);
    let coaches = backend.list_coaches().await?;

    if coaches.is_empty() {
        println!("No coaches available.");
        return Ok(());
    }

    for coach in coaches {
        let specialty = coach.specialty.unwrap_or_else(|| "Coach".to_string());
        println!("{:>4}  {}  ({specialty})", coach.id, coach.name);
        if let Some(tagline) = coach.tagline {
            println!("      \"{tagline}\"");
        }
    }

    Ok(())
}

/// Capture one utterance via the voice segmenter and write it out
#[allow(clippy::future_not_send)]
async fn record(output: &Path, max_seconds: u64) -> anyhow::Result<()> {
    let vad = VadConfig::default();
    let tick_interval = vad.tick_interval;
    let mut segmenter = VoiceSegmenter::new(vad);

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Listening for speech (up to {max_seconds}s)... speak now.");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(max_seconds);
    let mut tick = tokio::time::interval(tick_interval);

    let utterance = loop {
        if tokio::time::Instant::now() > deadline {
            // Flush whatever is buffered rather than losing it
            match segmenter.trigger_end() {
                Some(VadEvent::Utterance(samples)) => break samples,
                _ => anyhow::bail!("no speech detected within {max_seconds}s"),
            }
        }

        tick.tick().await;

        let chunk = pcm16_to_f32(&capture.take_chunk());
        let volume = rms(&chunk);

        match segmenter.process_tick(volume, &chunk, std::time::Instant::now()) {
            Some(VadEvent::SpeechStart) => println!("Speech detected, recording..."),
            Some(VadEvent::Utterance(samples)) => break samples,
            None => {}
        }
    };

    capture.stop();

    let wav = samples_to_wav(&utterance, TARGET_SAMPLE_RATE)?;
    std::fs::write(output, wav)?;

    #[allow(clippy::cast_precision_loss)]
    let seconds = utterance.len() as f64 / f64::from(TARGET_SAMPLE_RATE);
    println!("Wrote {:.1}s of audio to {}", seconds, output.display());

    Ok(())
}

/// Test microphone input with a level meter
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Device rate: {} Hz", capture.source_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = pcm16_to_f32(&capture.take_chunk());
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");

    Ok(())
}

/// Test speaker output with a sine tone
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut sink = CpalSink::new()?;

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (TARGET_SAMPLE_RATE as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / TARGET_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    sink.play(samples, Arc::new(AtomicBool::new(false))).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Resolve a coach from the catalogue by name or id
async fn resolve_coach(
    backend: &BackendClient,
    name: Option<&str>,
    id: Option<i64>,
) -> anyhow::Result<CoachRecord> {
    let coaches = backend.list_coaches().await?;

    let found = coaches.into_iter().find(|c| match (name, id) {
        (_, Some(id)) => c.id == id,
        (Some(name), None) => c.name.eq_ignore_ascii_case(name),
        (None, None) => true, // first coach in the catalogue
    });

    found.ok_or_else(|| anyhow::anyhow!("coach not found; run `coachlink coaches` to list them"))
}

/// Fail with a pointer at configuration when no token is set
fn require_token(config: &Config) -> anyhow::Result<SecretString> {
    config.token.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "no auth token configured; set COACHLINK_TOKEN or add `token` to {}",
            Config::config_path()
                .map_or_else(|| "the config file".to_string(), |p| p.display().to_string())
        )
    })
}
