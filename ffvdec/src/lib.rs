//! # ffvdec
//!
//! Streaming video decode pipeline in front of an opaque native decode
//! engine.
//!
//! **Purpose:** Accept encoded units from a media pipeline, drive the engine
//! on a dedicated worker thread and hand decoded frames back in order,
//! absorbing the engine's irregular production (zero, one or many frames per
//! input, internal drops, decode-only warm-up frames).
//!
//! **Architecture:** Fixed input/output slot pools, a pending queue and a
//! ready queue, one decode worker, and a four-state flush/release machine,
//! all under a single mutex + condvar.
//!
//! ```text
//! client ─acquire─▶ InputSlot ─submit─▶ pending ─▶ worker ─▶ engine
//!                                                    │
//! client ◀─collect── OutputSlot ◀── ready ◀── timestamp gate
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod pipeline;

pub use config::DecoderConfig;
pub use engine::{
    DecodeEngine, DecodeStatus, EngineError, EngineFactory, EngineSession, FrameRenderer, Packet,
    SurfaceTarget,
};
pub use error::{DecodeFault, Error, RejectedSlot, Result};
pub use format::{InitParams, StreamFormat};
pub use pipeline::pool::SlotCounts;
pub use pipeline::slots::{BufferFlags, FrameBuffer, InputSlot, NativeFrameRef, OutputMode, OutputSlot};
pub use pipeline::state::{DecoderState, PipelineSnapshot};
pub use pipeline::StreamDecoder;
