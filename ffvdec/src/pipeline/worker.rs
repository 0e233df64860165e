//! Decode worker
//!
//! The single background thread that owns the native engine. It sleeps on the
//! pipeline condvar until there is work (a pending input and a free output)
//! or the state leaves `Running`, then drives the engine with the staged
//! protocol: one `send_packet` per input followed by `receive_frame` while
//! the engine still has frames pending. An output slot is only taken once
//! the engine says a frame is waiting, so a consumed input never sits in the
//! worker waiting for the client to return an output.
//!
//! Engine calls are never made under the pipeline mutex. Slots the worker is
//! working on live in `held_input` / `held_output` so that a flush, a release
//! or a fault can always return them to the pool.

use crate::engine::{DecodeEngine, DecodeStatus, Packet};
use crate::error::DecodeFault;
use crate::pipeline::slots::{InputSlot, OutputMode, OutputSlot};
use crate::pipeline::state::{DecoderState, PipelineState};
use crate::pipeline::Shared;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

enum Step {
    Release,
    Flush,
    Decode(InputSlot),
}

/// Non-fatal outcome of one `receive_frame` call
enum Received {
    Frame,
    Dropped(u32),
    Exhausted,
    InvalidData,
}

/// How a receive loop ended
enum Drain {
    /// Engine asked for more input; `produced` counts frames and drop reports
    Done { produced: u32 },
    /// State left `Running` mid-drain
    Interrupted,
    /// Invalid data forced an engine reset; the input is consumed
    Reset,
}

pub(crate) struct DecodeWorker {
    shared: Arc<Shared>,
    engine: Box<dyn DecodeEngine>,
    held_input: Option<InputSlot>,
    held_output: Option<OutputSlot>,
    engine_released: bool,
}

impl DecodeWorker {
    pub(crate) fn new(shared: Arc<Shared>, engine: Box<dyn DecodeEngine>) -> Self {
        Self {
            shared,
            engine,
            held_input: None,
            held_output: None,
            engine_released: false,
        }
    }

    pub(crate) fn run(mut self) {
        debug!("Decode worker started");

        loop {
            let outcome = match self.next_step() {
                Step::Release => break,
                Step::Flush => self.flush(),
                Step::Decode(input) => self.process_input(input),
            };

            // No-op after a clean completion; returns slots abandoned by an
            // interrupt
            self.return_held();

            if let Err(fault) = outcome {
                self.fail(fault);
                break;
            }
        }

        self.teardown();
        debug!("Decode worker exiting");
    }

    /// Block until there is something to do
    fn next_step(&mut self) -> Step {
        let shared = Arc::clone(&self.shared);
        loop {
            let mut state = shared.wait_while(shared.lock(), |s| {
                !s.state.interrupts_worker() && !s.has_decode_work()
            });

            match state.state {
                DecoderState::Released => return Step::Release,
                DecoderState::FlushRequested | DecoderState::Flushing => {
                    state.state = state.state.begin_flush();
                    return Step::Flush;
                }
                DecoderState::Running => {
                    if let Some(input) = state.take_pending_input() {
                        return Step::Decode(input);
                    }
                }
            }
        }
    }

    fn process_input(&mut self, input: InputSlot) -> Result<(), DecodeFault> {
        let timestamp_us = input.timestamp_us();
        let mut first_sample = input.is_first_sample();
        let end_of_stream = input.is_end_of_stream();
        self.held_input = Some(input);

        if end_of_stream {
            return self.queue_end_of_stream(timestamp_us);
        }

        let decode_only = self.shared.lock().gate.is_decode_only(timestamp_us, false);

        loop {
            let status = {
                let engine = &mut self.engine;
                let data = self.held_input.as_ref().map(InputSlot::data).unwrap_or_default();
                let packet = Packet { data, timestamp_us };
                guarded("send_packet", || engine.send_packet(&packet))?
            };

            let engine_full = match status {
                DecodeStatus::Success | DecodeStatus::NeedMoreInput => false,
                DecodeStatus::DropFrames(count) => {
                    self.shared.lock().gate.record_skipped(count);
                    false
                }
                DecodeStatus::ErrorReadFrame => true,
                DecodeStatus::ErrorInvalidData => {
                    self.recover_invalid_data()?;
                    self.finish_input();
                    return Ok(());
                }
                DecodeStatus::ErrorOther => {
                    return Err(DecodeFault::Native(format!(
                        "send_packet failed for input at {}us",
                        timestamp_us
                    )));
                }
            };

            let drain = if decode_only {
                self.drain_decode_only()?
            } else {
                self.drain(&mut first_sample)?
            };

            match drain {
                Drain::Interrupted => return Ok(()),
                Drain::Reset => {
                    self.finish_input();
                    return Ok(());
                }
                Drain::Done { produced } if engine_full => {
                    if produced == 0 {
                        return Err(DecodeFault::ReadFrame(format!(
                            "engine refused input at {}us and produced no frames",
                            timestamp_us
                        )));
                    }
                    // Room was made; send the stashed input again
                }
                Drain::Done { .. } => {
                    self.finish_input();
                    return Ok(());
                }
            }
        }
    }

    /// Receive frames into output slots until the engine has nothing left
    /// for the current input
    fn drain(&mut self, first_sample: &mut bool) -> Result<Drain, DecodeFault> {
        let mut produced = 0u32;

        loop {
            if !self.has_pending_frames()? {
                return Ok(Drain::Done { produced });
            }
            let Some(mode) = self.acquire_output()? else {
                return Ok(Drain::Interrupted);
            };

            let status = {
                let engine = &mut self.engine;
                let frame = self.held_output.as_mut().map(OutputSlot::frame_mut);
                guarded("receive_frame", || engine.receive_frame(frame, mode))?
            };
            // Fatal statuses win over a concurrent flush or release
            let received = classify_receive(status, "receive_frame")?;

            let shared = Arc::clone(&self.shared);
            let mut state = shared.lock();
            if state.state.interrupts_worker() {
                drop(state);
                // The engine gets the frame back before a flush resets it
                self.release_held_frame()?;
                return Ok(Drain::Interrupted);
            }
            let Some(mut output) = self.held_output.take() else {
                return Ok(Drain::Interrupted);
            };

            match received {
                Received::Frame => {
                    produced += 1;
                    if state.gate.is_decode_only(output.timestamp_us(), output.should_be_skipped()) {
                        output.mark_skipped();
                        state.gate.record_skipped(1);
                        drop(state);
                        self.held_output = Some(output);
                        self.release_held_frame()?;
                        self.return_held();
                    } else {
                        if std::mem::take(first_sample) {
                            output.mark_first_sample();
                        }
                        state.deliver_output(output);
                    }
                }
                Received::Dropped(count) => {
                    produced += 1;
                    state.gate.record_skipped(count);
                    state.return_worker_output(output);
                    shared.notify();
                }
                Received::Exhausted => {
                    state.return_worker_output(output);
                    shared.notify();
                    return Ok(Drain::Done { produced });
                }
                Received::InvalidData => {
                    state.return_worker_output(output);
                    drop(state);
                    self.recover_invalid_data()?;
                    return Ok(Drain::Reset);
                }
            }
        }
    }

    /// Decode-only input: the engine decodes for reference state and reports
    /// what it discarded
    fn drain_decode_only(&mut self) -> Result<Drain, DecodeFault> {
        let mut produced = 0u32;

        loop {
            let mode = self.shared.lock().output_mode;
            let status = {
                let engine = &mut self.engine;
                guarded("receive_frame", || engine.receive_frame(None, mode))?
            };
            let received = classify_receive(status, "decode-only receive")?;

            let shared = Arc::clone(&self.shared);
            let mut state = shared.lock();
            if state.state.interrupts_worker() {
                return Ok(Drain::Interrupted);
            }

            match received {
                Received::Dropped(count) => {
                    produced += 1;
                    state.gate.record_skipped(count);
                }
                Received::Frame => {
                    produced += 1;
                    state.gate.record_skipped(1);
                }
                Received::Exhausted => return Ok(Drain::Done { produced }),
                Received::InvalidData => {
                    drop(state);
                    self.recover_invalid_data()?;
                    return Ok(Drain::Reset);
                }
            }
        }
    }

    fn queue_end_of_stream(&mut self, timestamp_us: i64) -> Result<(), DecodeFault> {
        if self.acquire_output()?.is_none() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        if state.state.interrupts_worker() {
            return Ok(());
        }
        if let Some(mut output) = self.held_output.take() {
            output.mark_end_of_stream();
            output.frame_mut().timestamp_us = timestamp_us;
            state.deliver_output(output);
        }
        if let Some(input) = self.held_input.take() {
            state.return_worker_input(input);
        }
        shared.notify();
        debug!("End of stream queued");
        Ok(())
    }

    /// Wait for a free output slot and hold it
    ///
    /// Returns the output mode to decode with, or `None` when a flush or
    /// release interrupted the wait.
    fn acquire_output(&mut self) -> Result<Option<OutputMode>, DecodeFault> {
        let shared = Arc::clone(&self.shared);
        let mode = {
            let mut state = shared.wait_while(shared.lock(), |s| {
                !s.state.interrupts_worker() && !s.has_free_output()
            });
            if state.state.interrupts_worker() {
                return Ok(None);
            }
            let Some(output) = state.take_free_output() else {
                return Ok(None);
            };
            self.held_output = Some(output);
            state.output_mode
        };

        // Frame the client returned earlier; the engine gets it back before
        // the slot is reused
        self.release_held_frame()?;
        Ok(Some(mode))
    }

    fn has_pending_frames(&self) -> Result<bool, DecodeFault> {
        let engine = &self.engine;
        guarded("has_pending_frames", || engine.has_pending_frames())
    }

    fn release_held_frame(&mut self) -> Result<(), DecodeFault> {
        let native = self
            .held_output
            .as_mut()
            .and_then(|output| output.frame_mut().take_native_frame());
        if let Some(native) = native {
            let engine = &mut self.engine;
            guarded("release_frame", || engine.release_frame(native))?;
        }
        Ok(())
    }

    fn recover_invalid_data(&mut self) -> Result<(), DecodeFault> {
        warn!("Invalid data from decode engine, resetting");
        self.reset_engine()?;
        self.shared.lock().gate.record_skipped(1);
        Ok(())
    }

    fn reset_engine(&mut self) -> Result<(), DecodeFault> {
        let engine = &mut self.engine;
        guarded("reset", || engine.reset())?.map_err(|e| DecodeFault::Reset(e.to_string()))
    }

    /// Discard pending inputs, ready outputs and held slots, then reset the
    /// engine. The state returns to `Running` unless a new flush or a
    /// release arrived meanwhile.
    fn flush(&mut self) -> Result<(), DecodeFault> {
        let shared = Arc::clone(&self.shared);
        let mut discarded = {
            let mut state = shared.lock();
            self.return_held_locked(&mut state);
            state.discard_queued()
        };
        debug!("Flushing decoder, {} ready outputs discarded", discarded.len());

        let mut result = Ok(());
        for output in &mut discarded {
            if let Some(native) = output.frame_mut().take_native_frame() {
                let engine = &mut self.engine;
                if let Err(fault) = guarded("release_frame", || engine.release_frame(native)) {
                    result = Err(fault);
                    break;
                }
            }
        }
        if result.is_ok() {
            result = self.reset_engine();
        }

        {
            let mut state = shared.lock();
            for output in discarded {
                state.return_worker_output(output);
            }
            if result.is_ok() {
                state.state = state.state.finish_flush();
            }
        }
        shared.notify();

        if result.is_ok() {
            debug!("Flush complete");
        }
        result
    }

    fn finish_input(&mut self) {
        self.return_held();
    }

    fn return_held(&mut self) {
        if self.held_input.is_none() && self.held_output.is_none() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        self.return_held_locked(&mut state);
        shared.notify();
    }

    fn return_held_locked(&mut self, state: &mut PipelineState) {
        if let Some(input) = self.held_input.take() {
            state.return_worker_input(input);
        }
        if let Some(output) = self.held_output.take() {
            state.return_worker_output(output);
        }
    }

    /// Record the sticky fault and wait for the client to release
    fn fail(&mut self, fault: DecodeFault) {
        error!("Decode worker faulted: {}", fault);

        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        self.return_held_locked(&mut state);
        if state.fault.is_none() {
            state.fault = Some(fault);
        }
        shared.notify();

        let _released = shared.wait_while(state, |s| !s.state.is_released());
    }

    /// Return every slot to the pool, hand back native frames and release the
    /// engine. Runs once, on the worker thread (or on drop if the thread never
    /// started).
    fn teardown(&mut self) {
        if self.engine_released {
            return;
        }
        self.engine_released = true;

        let shared = Arc::clone(&self.shared);
        let native_frames: Vec<_> = {
            let mut state = shared.lock();
            self.return_held_locked(&mut state);
            while let Some(input) = state.pending.pop_front() {
                state.pool.release_input(input);
            }
            while let Some(output) = state.ready.pop_front() {
                state.pool.release_output(output);
            }
            let frames = state
                .pool
                .free_outputs_mut()
                .filter_map(|output| output.frame_mut().take_native_frame())
                .collect();
            frames
        };

        for native in native_frames {
            let engine = &mut self.engine;
            if let Err(fault) = guarded("release_frame", || engine.release_frame(native)) {
                warn!("Ignoring native frame release failure during teardown: {}", fault);
            }
        }

        let engine = &mut self.engine;
        if let Err(fault) = guarded("release", || engine.release()) {
            warn!("Decode engine release failed: {}", fault);
        }
        info!("Decode engine released");
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Split a receive status into what the drain loop handles and what ends
/// the session
fn classify_receive(status: DecodeStatus, call: &str) -> Result<Received, DecodeFault> {
    match status {
        DecodeStatus::Success => Ok(Received::Frame),
        DecodeStatus::DropFrames(count) => Ok(Received::Dropped(count)),
        DecodeStatus::NeedMoreInput => Ok(Received::Exhausted),
        DecodeStatus::ErrorInvalidData => Ok(Received::InvalidData),
        DecodeStatus::ErrorReadFrame => Err(DecodeFault::ReadFrame(format!("{} could not read frame", call))),
        DecodeStatus::ErrorOther => Err(DecodeFault::Native(format!("{} failed", call))),
    }
}

/// Run one engine call, converting a panic into a fatal fault
fn guarded<T>(operation: &str, call: impl FnOnce() -> T) -> Result<T, DecodeFault> {
    panic::catch_unwind(AssertUnwindSafe(call)).map_err(|payload| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        DecodeFault::Unexpected(format!("{} panicked: {}", operation, detail))
    })
}
