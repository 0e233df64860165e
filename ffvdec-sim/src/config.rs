//! Simulator configuration
//!
//! One TOML file with three tables:
//! - `[decoder]`: pool sizes, threads, output mode, start time
//! - `[logging]`: level and optional log file
//! - `[stream]`: the synthetic stream to feed and the engine's buffering
//!
//! Command-line flags override file values.

use crate::synthetic::{EngineSettings, PacketKind};
use anyhow::{bail, Context, Result};
use ffvdec::DecoderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub decoder: DecoderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Synthetic stream fed to the decoder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_mime_type")]
    pub mime_type: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Packets to submit before end of stream
    #[serde(default = "default_packets")]
    pub packets: usize,

    #[serde(default = "default_frame_interval_us")]
    pub frame_interval_us: i64,

    /// Packet kinds, repeated cyclically
    #[serde(default = "default_pattern")]
    pub pattern: Vec<PacketKind>,

    /// Request a flush just before submitting this packet index
    #[serde(default)]
    pub flush_at: Option<usize>,

    #[serde(default = "default_reorder_depth")]
    pub reorder_depth: usize,

    #[serde(default = "default_engine_queue_capacity")]
    pub engine_queue_capacity: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mime_type() -> String {
    ffvdec::format::MIME_H264.to_string()
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_packets() -> usize {
    120
}

fn default_frame_interval_us() -> i64 {
    33_333
}

fn default_pattern() -> Vec<PacketKind> {
    vec![PacketKind::Plain]
}

fn default_reorder_depth() -> usize {
    1
}

fn default_engine_queue_capacity() -> usize {
    2
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mime_type: default_mime_type(),
            width: default_width(),
            height: default_height(),
            packets: default_packets(),
            frame_interval_us: default_frame_interval_us(),
            pattern: default_pattern(),
            flush_at: None,
            reorder_depth: default_reorder_depth(),
            engine_queue_capacity: default_engine_queue_capacity(),
        }
    }
}

impl StreamConfig {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            reorder_depth: self.reorder_depth,
            queue_capacity: self.engine_queue_capacity,
            frame_interval_us: self.frame_interval_us,
        }
    }

    /// Kind of the packet at `index`
    pub fn kind_at(&self, index: usize) -> PacketKind {
        self.pattern[index % self.pattern.len()]
    }
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: SimConfig = toml::from_str(&text)
            .with_context(|| format!("Failed to parse TOML in {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.decoder.validate()?;

        let stream = &self.stream;
        if stream.pattern.is_empty() {
            bail!("stream.pattern must list at least one packet kind");
        }
        // A burst must always fit an empty engine queue, and frames held for
        // reordering must leave room for one more packet
        if stream.engine_queue_capacity < 2 {
            bail!("stream.engine_queue_capacity must be at least 2");
        }
        if stream.reorder_depth >= stream.engine_queue_capacity {
            bail!("stream.reorder_depth must be smaller than stream.engine_queue_capacity");
        }
        if stream.frame_interval_us <= 0 {
            bail!("stream.frame_interval_us must be positive");
        }
        Ok(())
    }
}
