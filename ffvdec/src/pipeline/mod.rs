//! Asynchronous buffer-pool decode pipeline
//!
//! `StreamDecoder` is the client-facing half: every call except `release()`
//! is non-blocking and returns `Ok(None)` under backpressure. The decode
//! worker (see `worker`) is the only thread that waits, and the only thread
//! that calls the native engine.
//!
//! All shared state lives in one `PipelineState` behind one mutex. The
//! paired condvar is signalled on every submit, every returned output, every
//! flush or release request and whenever the worker frees a slot.

pub mod gate;
pub mod pool;
pub mod slots;
pub mod state;
mod worker;

use crate::config::DecoderConfig;
use crate::engine::{EngineFactory, EngineSession, FrameRenderer, SurfaceTarget};
use crate::error::{Error, RejectedSlot, Result};
use crate::format::{InitParams, StreamFormat};
use gate::TimestampGate;
use pool::BufferPool;
use slots::{InputSlot, OutputMode, OutputSlot};
use state::{PipelineSnapshot, PipelineState};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};
use uuid::Uuid;
use worker::DecodeWorker;

/// Mutex + condvar pair shared by the client and the worker
pub(crate) struct Shared {
    state: Mutex<PipelineState>,
    condvar: Condvar,
}

impl Shared {
    fn new(state: PipelineState) -> Self {
        Self {
            state: Mutex::new(state),
            condvar: Condvar::new(),
        }
    }

    /// Poisoning is ignored: every ledger mutation completes within one call
    pub(crate) fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait_while<'a>(
        &self,
        guard: MutexGuard<'a, PipelineState>,
        condition: impl FnMut(&mut PipelineState) -> bool,
    ) -> MutexGuard<'a, PipelineState> {
        self.condvar
            .wait_while(guard, condition)
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self) {
        self.condvar.notify_all();
    }
}

/// Streaming decoder for one session of one stream
pub struct StreamDecoder {
    name: String,
    pool_id: Uuid,
    shared: Arc<Shared>,
    renderer: Option<Arc<dyn FrameRenderer>>,
    worker: Option<JoinHandle<()>>,
}

impl StreamDecoder {
    /// Initialize the engine and start the decode worker
    ///
    /// Engine failures surface here as `Error::Initialization`; no worker is
    /// left running.
    pub fn new(config: &DecoderConfig, format: StreamFormat, factory: &dyn EngineFactory) -> Result<Self> {
        config.validate()?;

        let params = InitParams::from_format(&format, config.effective_threads())?;
        let name = format!("{}-{}", factory.library_name(), params.codec_name);
        let EngineSession { engine, renderer } = factory
            .init(&params)
            .map_err(|e| Error::Initialization(format!("{}: {}", name, e)))?;

        let pool = BufferPool::new(
            config.input_buffers,
            config.output_buffers,
            config.initial_input_buffer_size,
        );
        let pool_id = pool.id();
        let state = PipelineState::new(
            pool,
            TimestampGate::new(config.start_time_us),
            config.output_mode,
            Arc::new(format),
        );
        let shared = Arc::new(Shared::new(state));

        // If the spawn fails the worker is dropped unstarted, which releases
        // the engine
        let worker = DecodeWorker::new(Arc::clone(&shared), engine);
        let handle = thread::Builder::new()
            .name(format!("ffvdec-{}", params.codec_name))
            .spawn(move || worker.run())
            .map_err(|e| Error::Initialization(format!("Failed to spawn decode worker: {}", e)))?;

        info!(
            "Decoder {} created ({} input / {} output buffers, {} threads)",
            name, config.input_buffers, config.output_buffers, params.threads
        );

        Ok(Self {
            name,
            pool_id,
            shared,
            renderer,
            worker: Some(handle),
        })
    }

    /// `<engine library>-<codec>`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool_id(&self) -> Uuid {
        self.pool_id
    }

    /// Borrow a free input slot, `Ok(None)` when none is free or a flush is
    /// in progress
    pub fn acquire_input(&self) -> Result<Option<InputSlot>> {
        let mut state = self.shared.lock();
        check_usable(&state)?;
        if !state.state.accepts_client_io() {
            return Ok(None);
        }
        let epoch = state.epoch;
        state.pool.acquire_input(epoch)
    }

    /// Queue the slot returned by the last `acquire_input`
    ///
    /// A slot acquired before a flush is returned to the pool instead of
    /// being decoded. A slot this decoder did not hand out comes back inside
    /// `Error::SlotRejected`.
    pub fn submit_input(&self, slot: InputSlot) -> Result<()> {
        let mut state = self.shared.lock();
        if let Err(e) = state.pool.reclaim_dequeued_input(&slot) {
            return Err(reject(e, RejectedSlot::Input(slot)));
        }
        if let Err(e) = check_usable(&state) {
            state.pool.release_input(slot);
            return Err(e);
        }

        if slot.epoch() != state.epoch || !state.state.accepts_client_io() {
            debug!("Dropping input slot {} acquired before flush", slot.index());
            state.pool.release_input(slot);
            return Ok(());
        }

        state.pending.push_back(slot);
        self.shared.notify();
        Ok(())
    }

    /// Give back an acquired input without decoding it
    pub fn discard_input(&self, slot: InputSlot) -> Result<()> {
        let mut state = self.shared.lock();
        if let Err(e) = state.pool.reclaim_dequeued_input(&slot) {
            return Err(reject(e, RejectedSlot::Input(slot)));
        }
        state.pool.release_input(slot);
        check_usable(&state)
    }

    /// Take the oldest decoded output, `Ok(None)` when nothing is ready
    pub fn collect_output(&self) -> Result<Option<OutputSlot>> {
        let mut state = self.shared.lock();
        check_usable(&state)?;
        if !state.state.accepts_client_io() {
            return Ok(None);
        }
        let Some(slot) = state.ready.pop_front() else {
            return Ok(None);
        };
        state.pool.lend_output_to_client(&slot);
        Ok(Some(slot))
    }

    /// Return a collected output to the pool
    ///
    /// Any native frame it still references is handed back to the engine by
    /// the worker before the slot is reused. After release the slot is
    /// simply dropped. A slot from another decoder comes back inside
    /// `Error::SlotRejected`.
    pub fn release_output(&self, slot: OutputSlot) -> Result<()> {
        let mut state = self.shared.lock();
        if let Err(e) = state.pool.reclaim_client_output(&slot) {
            return Err(reject(e, RejectedSlot::Output(slot)));
        }
        if state.state.is_released() {
            return Ok(());
        }
        state.pool.release_output(slot);
        self.shared.notify();
        Ok(())
    }

    /// Request a flush and return immediately
    ///
    /// The worker discards pending inputs and ready outputs, resets the
    /// engine and returns to `Running`. Until then `acquire_input` and
    /// `collect_output` return `Ok(None)`.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.shared.lock();
        check_usable(&state)?;
        state.request_flush();
        self.shared.notify();
        debug!("Flush requested for {}", self.name);
        Ok(())
    }

    /// Outputs with an earlier timestamp are decoded but not delivered
    pub fn set_start_time_us(&self, start_time_us: Option<i64>) {
        self.shared.lock().gate.set_start_time_us(start_time_us);
    }

    pub fn set_output_mode(&self, mode: OutputMode) {
        self.shared.lock().output_mode = mode;
    }

    /// Present a surface-mode output the client currently holds
    pub fn render_to_surface(&self, output: &OutputSlot, target: &SurfaceTarget) -> Result<()> {
        if self.shared.lock().state.is_released() {
            return Err(Error::Released);
        }
        if output.id().pool != self.pool_id {
            return Err(Error::ProtocolMisuse(
                "output slot was not produced by this decoder".to_string(),
            ));
        }
        if output.mode() != OutputMode::SurfaceYuv {
            return Err(Error::ProtocolMisuse("Invalid output mode".to_string()));
        }
        let renderer = self
            .renderer
            .as_ref()
            .ok_or_else(|| Error::Render(format!("{} has no surface renderer", self.name)))?;
        renderer
            .render(target, output.frame())
            .map_err(|e| Error::Render(e.to_string()))
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.shared.lock().snapshot()
    }

    /// Stop the worker and release the engine; blocks until the worker has
    /// exited. Idempotent.
    pub fn release(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };

        {
            let mut state = self.shared.lock();
            state.state = state.state.request_release();
        }
        self.shared.notify();

        if handle.join().is_err() {
            error!("Decode worker for {} panicked", self.name);
        }
        info!("Decoder {} released", self.name);
    }
}

impl Drop for StreamDecoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Hand a slot the pool refused back to the caller with the reason
fn reject(error: Error, slot: RejectedSlot) -> Error {
    match error {
        Error::ProtocolMisuse(reason) => Error::SlotRejected {
            reason,
            slot: Box::new(slot),
        },
        other => other,
    }
}

/// Released first, then the sticky fault
fn check_usable(state: &PipelineState) -> Result<()> {
    if state.state.is_released() {
        return Err(Error::Released);
    }
    if let Some(fault) = &state.fault {
        return Err(Error::Fault(fault.clone()));
    }
    Ok(())
}
