//! Deterministic synthetic decode engine
//!
//! The first payload byte of each packet selects what the engine does with
//! it (see `PacketKind`). Decoded frames wait in a small internal queue and
//! are only released once more than `reorder_depth` are buffered, the way a
//! real codec holds frames back for reordering. A packet that would overflow
//! the queue is refused with `ErrorReadFrame`; the engine then drains its
//! queue completely so the refused packet can be sent again.

use ffvdec::{
    DecodeEngine, DecodeStatus, EngineError, EngineFactory, EngineSession, FrameBuffer,
    FrameRenderer, InitParams, NativeFrameRef, OutputMode, Packet, SurfaceTarget,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Behaviour selected by a packet's first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    /// One frame
    Plain,
    /// Two frames from one packet
    Burst,
    /// One frame flagged should-be-skipped
    Hidden,
    /// Corrupt packet, rejected with invalid data
    Invalid,
}

impl PacketKind {
    pub fn header(self) -> u8 {
        match self {
            PacketKind::Plain => 0,
            PacketKind::Burst => 1,
            PacketKind::Hidden => 2,
            PacketKind::Invalid => 3,
        }
    }

    /// Unknown or missing headers decode as a plain frame
    pub fn from_header(byte: Option<u8>) -> Self {
        match byte {
            Some(1) => PacketKind::Burst,
            Some(2) => PacketKind::Hidden,
            Some(3) => PacketKind::Invalid,
            _ => PacketKind::Plain,
        }
    }

    fn frames(self) -> usize {
        match self {
            PacketKind::Burst => 2,
            PacketKind::Invalid => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Frames held back before any is released
    pub reorder_depth: usize,
    /// Internal frame queue size; a packet that would overflow it is refused
    pub queue_capacity: usize,
    pub frame_interval_us: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reorder_depth: 1,
            queue_capacity: 2,
            frame_interval_us: 33_333,
        }
    }
}

/// Counters shared by every engine a factory creates
#[derive(Debug, Default)]
pub struct EngineStats {
    pub frames_decoded: AtomicU64,
    pub refusals: AtomicU64,
    pub resets: AtomicU64,
    pub native_frames_live: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct PendingFrame {
    timestamp_us: i64,
    hidden: bool,
}

pub struct SyntheticEngine {
    settings: EngineSettings,
    width: u32,
    height: u32,
    stats: Arc<EngineStats>,
    queue: VecDeque<PendingFrame>,
    /// Set after a refusal: release everything before accepting again
    draining: bool,
    next_native: u64,
}

impl SyntheticEngine {
    pub fn new(settings: EngineSettings, width: u32, height: u32, stats: Arc<EngineStats>) -> Self {
        Self {
            settings,
            width,
            height,
            stats,
            queue: VecDeque::new(),
            draining: false,
            next_native: 0,
        }
    }

    /// Frames kept back for reordering; none while draining after a refusal
    fn hold(&self) -> usize {
        if self.draining {
            0
        } else {
            self.settings.reorder_depth
        }
    }

    fn next_ready(&mut self) -> Option<PendingFrame> {
        if self.queue.len() <= self.hold() {
            self.draining = false;
            return None;
        }
        self.queue.pop_front()
    }

    fn write_frame(&mut self, frame: &mut FrameBuffer, mode: OutputMode, pending: PendingFrame) -> DecodeStatus {
        match mode {
            OutputMode::Yuv => {
                if !frame.init_for_yuv_frame(self.width, self.height, self.width, self.width.div_ceil(2)) {
                    return DecodeStatus::ErrorOther;
                }
                if let Some(luma) = frame.plane_mut(0) {
                    luma.fill(pending.timestamp_us as u8);
                }
            }
            OutputMode::SurfaceYuv => {
                self.next_native += 1;
                self.stats.native_frames_live.fetch_add(1, Ordering::Relaxed);
                frame.init_for_private_frame(self.width, self.height, NativeFrameRef(self.next_native));
            }
            OutputMode::None => {}
        }
        frame.timestamp_us = pending.timestamp_us;
        frame.should_be_skipped = pending.hidden;
        self.stats.frames_decoded.fetch_add(1, Ordering::Relaxed);
        DecodeStatus::Success
    }
}

impl DecodeEngine for SyntheticEngine {
    fn send_packet(&mut self, packet: &Packet<'_>) -> DecodeStatus {
        let kind = PacketKind::from_header(packet.data.first().copied());
        if kind == PacketKind::Invalid {
            return DecodeStatus::ErrorInvalidData;
        }
        if self.queue.len() + kind.frames() > self.settings.queue_capacity {
            self.stats.refusals.fetch_add(1, Ordering::Relaxed);
            self.draining = true;
            return DecodeStatus::ErrorReadFrame;
        }

        self.draining = false;
        let timestamp_us = packet.timestamp_us;
        match kind {
            PacketKind::Burst => {
                self.queue.push_back(PendingFrame { timestamp_us, hidden: false });
                self.queue.push_back(PendingFrame {
                    timestamp_us: timestamp_us + self.settings.frame_interval_us / 2,
                    hidden: false,
                });
            }
            PacketKind::Hidden => self.queue.push_back(PendingFrame { timestamp_us, hidden: true }),
            _ => self.queue.push_back(PendingFrame { timestamp_us, hidden: false }),
        }
        DecodeStatus::Success
    }

    fn receive_frame(&mut self, frame: Option<&mut FrameBuffer>, mode: OutputMode) -> DecodeStatus {
        let Some(pending) = self.next_ready() else {
            return DecodeStatus::NeedMoreInput;
        };
        match frame {
            Some(frame) => self.write_frame(frame, mode, pending),
            None => DecodeStatus::DropFrames(1),
        }
    }

    fn has_pending_frames(&self) -> bool {
        self.queue.len() > self.hold()
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.stats.resets.fetch_add(1, Ordering::Relaxed);
        debug!("Synthetic engine reset, {} buffered frames dropped", self.queue.len());
        self.queue.clear();
        self.draining = false;
        Ok(())
    }

    fn release_frame(&mut self, _frame: NativeFrameRef) {
        self.stats.native_frames_live.fetch_sub(1, Ordering::Relaxed);
    }

    fn release(&mut self) {
        self.queue.clear();
    }
}

/// Counts surface renders
#[derive(Debug, Default)]
pub struct SyntheticRenderer {
    pub rendered: AtomicU64,
}

impl FrameRenderer for SyntheticRenderer {
    fn render(&self, _target: &SurfaceTarget, frame: &FrameBuffer) -> Result<(), EngineError> {
        if frame.native_frame().is_none() {
            return Err(EngineError::new("frame carries no native payload"));
        }
        self.rendered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

pub struct SyntheticFactory {
    settings: EngineSettings,
    width: u32,
    height: u32,
    pub stats: Arc<EngineStats>,
    pub renderer: Arc<SyntheticRenderer>,
}

impl SyntheticFactory {
    pub fn new(settings: EngineSettings, width: u32, height: u32) -> Self {
        Self {
            settings,
            width,
            height,
            stats: Arc::new(EngineStats::default()),
            renderer: Arc::new(SyntheticRenderer::default()),
        }
    }
}

impl EngineFactory for SyntheticFactory {
    fn library_name(&self) -> &str {
        "synthetic"
    }

    fn init(&self, params: &InitParams) -> Result<EngineSession, EngineError> {
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::new("stream has no dimensions"));
        }
        debug!(
            "Synthetic engine init: codec {}, {} threads, {} bytes extra data",
            params.codec_name,
            params.threads,
            params.extra_data.as_ref().map_or(0, Vec::len)
        );
        let engine = SyntheticEngine::new(self.settings, self.width, self.height, Arc::clone(&self.stats));
        let renderer: Arc<dyn FrameRenderer> = self.renderer.clone();
        Ok(EngineSession::new(Box::new(engine)).with_renderer(renderer))
    }
}
