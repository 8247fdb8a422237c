//! vadsrt - speech-aware subtitle generation
//!
//! Entry point: parses arguments, sets up logging and configuration, and
//! hands the selected command to the workflow.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vadsrt::cli::{Args, Commands};
use vadsrt::config::Config;
use vadsrt::error::VadsrtError;
use vadsrt::workflow::{EmbedRequest, TranscribeRequest, TranslateRequest, Workflow};

const DEFAULT_CONFIG_FILE: &str = "vadsrt.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    if let Commands::InitConfig { path, force } = &args.command {
        if path.exists() && !*force {
            return Err(VadsrtError::Config(format!(
                "{} already exists, pass --force to overwrite",
                path.display()
            ))
            .into());
        }
        Config::default().save_to_file(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    if let Commands::Transcribe { model: Some(model), .. } = &args.command {
        config.transcriber.model_path = model.to_string_lossy().to_string();
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work and saving partial results");
            signal_token.cancel();
        }
    });

    let workflow = Workflow::new(config)?.with_cancellation(cancel);

    let summary = match args.command {
        Commands::Transcribe {
            input,
            lang,
            to,
            output,
            denoise,
            embed,
            ..
        } => {
            workflow
                .transcribe_file(&TranscribeRequest {
                    input,
                    language: lang,
                    target: to,
                    output,
                    denoise,
                    embed,
                })
                .await?
        }
        Commands::Translate { input, to, output, video } => {
            workflow
                .translate_file(&TranslateRequest {
                    input,
                    target: to,
                    output,
                    video,
                })
                .await?
        }
        Commands::Embed { video, srt, lang, output } => {
            workflow
                .embed_file(&EmbedRequest {
                    video,
                    srt,
                    language: lang,
                    output,
                })
                .await?
        }
        Commands::InitConfig { .. } => return Ok(()),
    };

    for line in summary.to_string().lines() {
        info!("{}", line);
    }
    println!("{}", summary);
    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".vadsrt").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "vadsrt.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("vadsrt.log").display()
    );

    Ok(())
}
