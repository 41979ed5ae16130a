//! # seamless
//!
//! Command line player for chunked, cross-faded audio streams.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use seamless_audio::output::{default_device_name, list_output_devices};
use seamless_audio::scheduler::DEFAULT_PERIOD;
use seamless_audio::{AudioOutput, ClockScheduler, Collaborators, StreamPlaybackEngine, StreamRegistry};
use seamless_client::{ChunkClient, HttpChunkDecoder};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "seamless", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Chunk server URL, overriding the config file
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List published streams and their durations
    List,
    /// Play a stream until it ends or Ctrl-C is pressed
    Play {
        /// Stream id
        stream: String,
        /// Start position in seconds, wrapped into the stream duration
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        offset: f64,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,
        /// Playback rate
        #[arg(long)]
        rate: Option<f64>,
        /// Output device name
        #[arg(long)]
        device: Option<String>,
    },
    /// List audio output devices
    Devices,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "seamless=info,seamless_audio=info,seamless_client=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.client.server_url = server;
    }

    match cli.command {
        Command::List => list(&config).await,
        Command::Play {
            stream,
            offset,
            duration,
            rate,
            device,
        } => play(config, &stream, offset, duration, rate, device.as_deref()).await,
        Command::Devices => devices(),
        Command::Config => {
            if let Some(path) = AppConfig::default_path() {
                println!("# {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn fetch_registry(client: &ChunkClient) -> Result<StreamRegistry> {
    let details = client
        .fetch_details()
        .await
        .with_context(|| format!("Failed to fetch stream details from {}", client.base_url()))?;
    Ok(StreamRegistry::from_details(details))
}

async fn list(config: &AppConfig) -> Result<()> {
    let client = ChunkClient::new(&config.client)?;
    let registry = fetch_registry(&client).await?;

    for id in registry.ids() {
        let duration = registry.duration(&id).unwrap_or_default();
        println!("{id}\t{duration:.3}s");
    }
    Ok(())
}

fn devices() -> Result<()> {
    let default = default_device_name();
    for name in list_output_devices()? {
        let marker = if default.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {name}");
    }
    Ok(())
}

async fn play(
    config: AppConfig,
    stream: &str,
    offset: f64,
    duration: Option<f64>,
    rate: Option<f64>,
    device: Option<&str>,
) -> Result<()> {
    info!("Starting seamless v{}", env!("CARGO_PKG_VERSION"));

    let client = ChunkClient::new(&config.client)?;
    let registry = Arc::new(fetch_registry(&client).await?);
    let decoder = Arc::new(HttpChunkDecoder::new(client));

    let preloaded = registry
        .preload_start_buffers(decoder.clone(), config.engine.preload_chunks)
        .await;
    info!("Preloaded {preloaded} chunk buffers");

    let output = match device {
        Some(name) => AudioOutput::with_device_name(name)?,
        None => AudioOutput::new()?,
    };
    let mixer = output.mixer();
    info!(
        "Output {}: {}Hz, {} channels",
        output.device_name(),
        output.sample_rate(),
        output.channels()
    );

    let scheduler = Arc::new(ClockScheduler::new(mixer.clone()));
    let _ticker = scheduler.run(DEFAULT_PERIOD);

    let engine = StreamPlaybackEngine::new(
        config.engine,
        Collaborators {
            scheduler,
            clock: mixer.clone(),
            sink: mixer,
            source: registry,
            decoder,
        },
    )?;
    if let Some(rate) = rate {
        engine.set_playback_rate(rate)?;
    }
    engine.attach(stream)?;

    let (ended_tx, mut ended_rx) = tokio::sync::oneshot::channel();
    engine.set_on_ended(move || {
        let _ = ended_tx.send(());
    });

    engine.start(0.0, offset, duration).await?;
    if let Some(total) = engine.duration() {
        info!("Playing {stream} ({total:.1}s)");
    }

    tokio::select! {
        _ = &mut ended_rx => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Stopping");
            engine.stop(0.0)?;
            if tokio::time::timeout(Duration::from_secs(2), ended_rx).await.is_err() {
                warn!("Playback did not end in time");
            }
        }
    }

    info!("Playback finished");
    Ok(())
}
