//! Error types for ffvdec
//!
//! `Error` is what every client-facing call returns. `DecodeFault` is the
//! sticky fault recorded by the decode worker; it is `Clone` so the same
//! fault can be replayed to every later call until the decoder is released.

use crate::pipeline::slots::{InputSlot, OutputSlot};
use serde::Serialize;
use thiserror::Error;

/// Main error type for the decode pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Native engine failed to start, or the worker could not be spawned
    #[error("Decoder initialization failed: {0}")]
    Initialization(String),

    /// Sticky fault raised by the decode worker
    #[error("Decoder faulted: {0}")]
    Fault(#[from] DecodeFault),

    /// Caller broke the slot protocol (double acquire, wrong mode)
    #[error("Protocol misuse: {0}")]
    ProtocolMisuse(String),

    /// A slot handed back to the wrong decoder. The slot rides along so the
    /// caller can return it to the decoder that owns it.
    #[error("Protocol misuse: {reason}")]
    SlotRejected {
        reason: String,
        slot: Box<RejectedSlot>,
    },

    /// Surface rendering failed
    #[error("Render error: {0}")]
    Render(String),

    /// Operation attempted after `release()`
    #[error("Decoder released")]
    Released,
}

impl Error {
    /// Take back the slot carried by `SlotRejected`
    pub fn into_rejected_slot(self) -> Option<RejectedSlot> {
        match self {
            Error::SlotRejected { slot, .. } => Some(*slot),
            _ => None,
        }
    }
}

/// Slot returned to its caller after a rejected submit or release
#[derive(Debug)]
pub enum RejectedSlot {
    Input(InputSlot),
    Output(OutputSlot),
}

impl RejectedSlot {
    pub fn into_input(self) -> Option<InputSlot> {
        match self {
            RejectedSlot::Input(slot) => Some(slot),
            RejectedSlot::Output(_) => None,
        }
    }

    pub fn into_output(self) -> Option<OutputSlot> {
        match self {
            RejectedSlot::Output(slot) => Some(slot),
            RejectedSlot::Input(_) => None,
        }
    }
}

/// Fatal decode fault captured by the worker
///
/// Once recorded it ends the decoder instance: every acquire, submit and
/// collect call returns it until `release()`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum DecodeFault {
    /// Engine reported an unexpected error status
    #[error("native decode error: {0}")]
    Native(String),

    /// Engine could not read back a frame it had accepted input for
    #[error("frame read failed: {0}")]
    ReadFrame(String),

    /// Engine reset failed, the session is unusable
    #[error("engine reset failed: {0}")]
    Reset(String),

    /// Engine call panicked
    #[error("unexpected decode error: {0}")]
    Unexpected(String),
}

/// Convenience Result type using ffvdec Error
pub type Result<T> = std::result::Result<T, Error>;
