//! Native decode engine contract
//!
//! The engine is an opaque, stateful codec session. Every `DecodeEngine`
//! call is made from the decode worker thread only; the single exception is
//! `FrameRenderer`, which the client thread uses to present a slot it owns.

use crate::format::InitParams;
use crate::pipeline::slots::{FrameBuffer, NativeFrameRef, OutputMode};
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by an engine outside the status-code protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result of a send or receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Packet accepted, or one frame written
    Success,
    /// Engine has nothing more for this input
    NeedMoreInput,
    /// Engine discarded this many buffered frames internally
    DropFrames(u32),
    ErrorOther,
    /// Send: engine is full and must be drained first.
    /// Receive: the frame could not be read back.
    ErrorReadFrame,
    /// Corrupt input; recoverable by a reset
    ErrorInvalidData,
}

impl DecodeStatus {
    pub const SUCCESS: i32 = 0;
    pub const NEED_MORE_INPUT: i32 = -1;
    pub const ERROR_OTHER: i32 = -2;
    pub const ERROR_READ_FRAME: i32 = -3;
    pub const ERROR_INVALID_DATA: i32 = -4;

    /// Decode a raw native status code; unknown negative codes are errors
    pub fn from_raw(code: i32) -> Self {
        match code {
            Self::SUCCESS => DecodeStatus::Success,
            Self::NEED_MORE_INPUT => DecodeStatus::NeedMoreInput,
            Self::ERROR_READ_FRAME => DecodeStatus::ErrorReadFrame,
            Self::ERROR_INVALID_DATA => DecodeStatus::ErrorInvalidData,
            n if n > 0 => DecodeStatus::DropFrames(n as u32),
            _ => DecodeStatus::ErrorOther,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            DecodeStatus::Success => Self::SUCCESS,
            DecodeStatus::NeedMoreInput => Self::NEED_MORE_INPUT,
            DecodeStatus::DropFrames(n) => i32::try_from(n).unwrap_or(i32::MAX),
            DecodeStatus::ErrorOther => Self::ERROR_OTHER,
            DecodeStatus::ErrorReadFrame => Self::ERROR_READ_FRAME,
            DecodeStatus::ErrorInvalidData => Self::ERROR_INVALID_DATA,
        }
    }
}

/// One encoded unit handed to `send_packet`
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub data: &'a [u8],
    pub timestamp_us: i64,
}

/// Stateful codec session, exclusively owned by the decode worker
///
/// The worker drives it with the staged protocol: one `send_packet` per
/// input, then `receive_frame` for as long as `has_pending_frames` holds and
/// the engine has not reported `NeedMoreInput`.
pub trait DecodeEngine: Send {
    fn send_packet(&mut self, packet: &Packet<'_>) -> DecodeStatus;

    /// Pull the next decoded frame
    ///
    /// `frame` is `None` when the current input is decode-only: the engine
    /// still decodes (reference state must stay correct) but has nowhere to
    /// write, and should report what it discarded as `DropFrames`.
    fn receive_frame(&mut self, frame: Option<&mut FrameBuffer>, mode: OutputMode) -> DecodeStatus;

    /// Whether `receive_frame` still has something to report (a frame, a
    /// drop count or an error) for the packets sent so far
    ///
    /// The worker only takes an output slot while this holds, so a consumed
    /// input goes back to the pool without waiting for a free output.
    fn has_pending_frames(&self) -> bool;

    /// Discard all internal state. Any handle swap happens inside the
    /// implementation; callers never see the handle.
    fn reset(&mut self) -> Result<(), EngineError>;

    /// Return a frame previously attached with `FrameBuffer::init_for_private_frame`
    fn release_frame(&mut self, frame: NativeFrameRef);

    /// Final teardown, called exactly once
    fn release(&mut self);
}

/// Presents a client-owned surface-mode frame
pub trait FrameRenderer: Send + Sync {
    fn render(&self, target: &SurfaceTarget, frame: &FrameBuffer) -> Result<(), EngineError>;
}

/// Display surface a frame is rendered to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceTarget {
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

/// What a successful `EngineFactory::init` hands back
pub struct EngineSession {
    pub engine: Box<dyn DecodeEngine>,
    pub renderer: Option<Arc<dyn FrameRenderer>>,
}

impl EngineSession {
    pub fn new(engine: Box<dyn DecodeEngine>) -> Self {
        Self {
            engine,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn FrameRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }
}

/// Opens codec sessions
pub trait EngineFactory {
    /// Engine library name, used as the decoder name prefix
    fn library_name(&self) -> &str;

    fn init(&self, params: &InitParams) -> Result<EngineSession, EngineError>;
}
