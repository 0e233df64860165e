//! Decoder state machine and the state guarded by the pipeline mutex
//!
//! ```text
//!            flush()              worker picks it up        engine reset done
//! Running ───────────▶ FlushRequested ─────────▶ Flushing ─────────▶ Running
//!    │                      ▲    │                  │
//!    │                      └────┼──── flush() ─────┘
//!    └──────── release() ────────┴──────────────────────────▶ Released (terminal)
//! ```
//!
//! Each transition is one method so the worker's wake conditions can be
//! tested without a thread.

use crate::error::DecodeFault;
use crate::format::StreamFormat;
use crate::pipeline::gate::TimestampGate;
use crate::pipeline::pool::{BufferPool, SlotCounts};
use crate::pipeline::slots::{InputSlot, OutputMode, OutputSlot};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderState {
    Running,
    FlushRequested,
    Flushing,
    Released,
}

impl DecoderState {
    /// Client flush: idempotent, ignored once released
    pub fn request_flush(self) -> Self {
        match self {
            DecoderState::Released => DecoderState::Released,
            _ => DecoderState::FlushRequested,
        }
    }

    pub fn request_release(self) -> Self {
        DecoderState::Released
    }

    /// Worker picks up a pending flush
    pub fn begin_flush(self) -> Self {
        match self {
            DecoderState::FlushRequested => DecoderState::Flushing,
            other => other,
        }
    }

    /// Worker finished discarding and resetting. A flush requested meanwhile
    /// stays pending, a release stays terminal.
    pub fn finish_flush(self) -> Self {
        match self {
            DecoderState::Flushing => DecoderState::Running,
            other => other,
        }
    }

    /// Client acquire/collect only hand out slots while running
    pub fn accepts_client_io(self) -> bool {
        self == DecoderState::Running
    }

    /// Worker must abandon in-flight work at the next check
    pub fn interrupts_worker(self) -> bool {
        self != DecoderState::Running
    }

    pub fn is_released(self) -> bool {
        self == DecoderState::Released
    }
}

/// Point-in-time view of the pipeline, for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub state: DecoderState,
    pub input: SlotCounts,
    pub output: SlotCounts,
    /// Outputs skipped since the last delivered one
    pub skipped: u32,
    pub start_time_us: Option<i64>,
    pub fault: Option<DecodeFault>,
}

/// Everything shared between client calls and the worker
pub(crate) struct PipelineState {
    pub(crate) state: DecoderState,
    pub(crate) pool: BufferPool,
    pub(crate) pending: VecDeque<InputSlot>,
    pub(crate) ready: VecDeque<OutputSlot>,
    pub(crate) gate: TimestampGate,
    pub(crate) fault: Option<DecodeFault>,
    /// Bumped on every flush request; inputs acquired in an older epoch are
    /// freed instead of queued
    pub(crate) epoch: u64,
    pub(crate) output_mode: OutputMode,
    pub(crate) format: Arc<StreamFormat>,
}

impl PipelineState {
    pub(crate) fn new(
        pool: BufferPool,
        gate: TimestampGate,
        output_mode: OutputMode,
        format: Arc<StreamFormat>,
    ) -> Self {
        Self {
            state: DecoderState::Running,
            pool,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            gate,
            fault: None,
            epoch: 0,
            output_mode,
            format,
        }
    }

    /// Worker wake predicate for the idle wait
    pub(crate) fn has_decode_work(&self) -> bool {
        !self.pending.is_empty() && self.pool.has_free_output()
    }

    /// Worker wake predicate while waiting for an output slot mid-drain
    pub(crate) fn has_free_output(&self) -> bool {
        self.pool.has_free_output()
    }

    pub(crate) fn request_flush(&mut self) {
        if self.state.is_released() {
            return;
        }
        if self.state != DecoderState::FlushRequested {
            self.epoch += 1;
        }
        self.state = self.state.request_flush();
    }

    pub(crate) fn take_pending_input(&mut self) -> Option<InputSlot> {
        let slot = self.pending.pop_front()?;
        self.pool.lend_input_to_worker();
        Some(slot)
    }

    pub(crate) fn take_free_output(&mut self) -> Option<OutputSlot> {
        self.pool.take_free_output()
    }

    pub(crate) fn return_worker_input(&mut self, slot: InputSlot) {
        self.pool.reclaim_worker_input();
        self.pool.release_input(slot);
    }

    pub(crate) fn return_worker_output(&mut self, slot: OutputSlot) {
        self.pool.reclaim_worker_output();
        self.pool.release_output(slot);
    }

    /// Append a decoded output to the ready queue, carrying the skip count
    pub(crate) fn deliver_output(&mut self, mut slot: OutputSlot) {
        let skipped = self.gate.take_skipped();
        slot.prepare_delivery(skipped, self.output_mode, Some(Arc::clone(&self.format)));
        self.pool.reclaim_worker_output();
        self.ready.push_back(slot);
    }

    /// Flush bookkeeping: free every pending input, restart the skip counter
    /// and hand the undelivered outputs to the worker so it can release their
    /// native frames before they go back to the pool
    pub(crate) fn discard_queued(&mut self) -> Vec<OutputSlot> {
        while let Some(slot) = self.pending.pop_front() {
            self.pool.release_input(slot);
        }
        self.gate.reset();
        let outputs: Vec<OutputSlot> = self.ready.drain(..).collect();
        self.pool.lend_outputs_to_worker(outputs.len());
        outputs
    }

    pub(crate) fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            state: self.state,
            input: self.pool.input_counts(self.pending.len()),
            output: self.pool.output_counts(self.ready.len()),
            skipped: self.gate.skipped(),
            start_time_us: self.gate.start_time_us(),
            fault: self.fault.clone(),
        }
    }
}
