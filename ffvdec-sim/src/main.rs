//! ffvdec simulator - Main entry point
//!
//! Drives a `StreamDecoder` against the deterministic synthetic engine and
//! prints a session report. Useful for exercising the pipeline (flush,
//! skips, resend, surface rendering) without a real codec.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ffvdec::OutputMode;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod session;
mod synthetic;

use config::{LoggingConfig, SimConfig};
use synthetic::SyntheticFactory;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    #[value(name = "none")]
    TimingOnly,
    Yuv,
    SurfaceYuv,
}

impl From<ModeArg> for OutputMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::TimingOnly => OutputMode::None,
            ModeArg::Yuv => OutputMode::Yuv,
            ModeArg::SurfaceYuv => OutputMode::SurfaceYuv,
        }
    }
}

/// Command-line arguments for ffvdec-sim
#[derive(Parser, Debug)]
#[command(name = "ffvdec-sim")]
#[command(about = "Run a synthetic decode session through the ffvdec pipeline")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "FFVDEC_SIM_CONFIG")]
    config: Option<PathBuf>,

    /// Packets to submit before end of stream
    #[arg(short, long)]
    packets: Option<usize>,

    /// Flush just before this packet index
    #[arg(long)]
    flush_at: Option<usize>,

    /// Decode but do not deliver frames before this timestamp
    #[arg(long)]
    start_time_us: Option<i64>,

    #[arg(long, value_enum)]
    output_mode: Option<ModeArg>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "FFVDEC_SIM_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut SimConfig) {
        if let Some(packets) = self.packets {
            config.stream.packets = packets;
        }
        if self.flush_at.is_some() {
            config.stream.flush_at = self.flush_at;
        }
        if self.start_time_us.is_some() {
            config.decoder.start_time_us = self.start_time_us;
        }
        if let Some(mode) = self.output_mode {
            config.decoder.output_mode = mode.into();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging)?;
    info!(
        "Starting ffvdec-sim: {} packets of {} at {}x{}",
        config.stream.packets, config.stream.mime_type, config.stream.width, config.stream.height
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let session_cancel = Arc::clone(&cancel);
    let session_config = config.clone();
    let mut session = tokio::task::spawn_blocking(move || {
        let factory = SyntheticFactory::new(
            session_config.stream.engine_settings(),
            session_config.stream.width,
            session_config.stream.height,
        );
        session::run_session(&session_config, &factory, &session_cancel)
    });

    let report = tokio::select! {
        result = &mut session => result.context("Session task failed")??,
        _ = shutdown_signal() => {
            cancel.store(true, Ordering::Relaxed);
            session.await.context("Session task failed")??
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    info!("ffvdec-sim finished");
    Ok(())
}

/// Install the global subscriber: `RUST_LOG` wins over the configured level,
/// and logs go to the configured file or stderr so stdout stays clean
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ffvdec={level},ffvdec_sim={level}",
            level = logging.level
        ))
    });

    let file_layer = match &logging.file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// Resolves on Ctrl+C (or SIGTERM on unix)
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling session");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling session");
        },
    }
}
