//! Decoder configuration
//!
//! Pool sizing, engine thread count and the initial output mode / start time.
//! Every field has a built-in default, so an empty TOML table is a valid
//! configuration.

use crate::error::{Error, Result};
use crate::pipeline::slots::OutputMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Default input slot capacity: 1280x720 in 64x64 blocks at 6144 bytes each
pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 1280usize.div_ceil(64) * 720usize.div_ceil(64) * 6144;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Number of input slots (N)
    #[serde(default = "default_input_buffers")]
    pub input_buffers: usize,

    /// Number of output slots (M)
    #[serde(default = "default_output_buffers")]
    pub output_buffers: usize,

    /// Preallocated bytes per input slot
    #[serde(default = "default_initial_input_buffer_size")]
    pub initial_input_buffer_size: usize,

    /// Engine decode threads; 0 picks the available parallelism
    #[serde(default)]
    pub threads: u32,

    #[serde(default)]
    pub output_mode: OutputMode,

    /// Outputs earlier than this are decoded but not delivered
    #[serde(default)]
    pub start_time_us: Option<i64>,
}

fn default_input_buffers() -> usize {
    4
}

fn default_output_buffers() -> usize {
    4
}

fn default_initial_input_buffer_size() -> usize {
    DEFAULT_INPUT_BUFFER_SIZE
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            input_buffers: default_input_buffers(),
            output_buffers: default_output_buffers(),
            initial_input_buffer_size: default_initial_input_buffer_size(),
            threads: 0,
            output_mode: OutputMode::default(),
            start_time_us: None,
        }
    }
}

impl DecoderConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: DecoderConfig = toml::from_str(source)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::from_toml_str(&source)?;
        info!("Loaded decoder configuration from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_buffers == 0 {
            return Err(Error::Config("input_buffers must be at least 1".to_string()));
        }
        if self.output_buffers == 0 {
            return Err(Error::Config("output_buffers must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Thread count handed to the engine
    pub fn effective_threads(&self) -> u32 {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism()
            .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
            .unwrap_or(1)
    }
}
