//! Scripted mock decode engine
//!
//! Behaviour is keyed by input timestamp: a `Plan` lists what successive
//! `send_packet` calls for that timestamp return and which receive results
//! an accepted packet queues. Inputs without a plan produce exactly one frame
//! carrying the input timestamp.
//!
//! Every engine call is counted in `MockStats`, including calls made after
//! `release()`, which must never happen.

use ffvdec::{
    DecodeEngine, DecodeStatus, EngineError, EngineFactory, EngineSession, FrameBuffer,
    FrameRenderer, InitParams, NativeFrameRef, OutputMode, Packet, SurfaceTarget,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// One receive result
#[derive(Debug, Clone)]
pub enum Out {
    /// Decoded frame with this timestamp
    Frame(i64),
    /// Decoded frame the engine flags as should-be-skipped
    Hidden(i64),
    /// `DropFrames(n)`
    Drop(u32),
    /// Raw status without touching the frame
    Status(DecodeStatus),
    /// Block inside `receive_frame` until the test opens the gate, then
    /// produce a frame
    Gated(i64),
    /// Like `Gated`, but returns a raw status
    GatedStatus(DecodeStatus),
    Panic,
}

/// One send result
#[derive(Debug, Clone)]
pub enum SendResult {
    /// Accept the packet and queue the plan's frames
    Accept,
    /// Engine full: queue these buffered results and refuse the packet
    Refuse(Vec<Out>),
    Status(DecodeStatus),
    Panic,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    sends: VecDeque<SendResult>,
    frames: Vec<Out>,
}

impl Plan {
    pub fn frames(frames: Vec<Out>) -> Self {
        Self {
            sends: VecDeque::new(),
            frames,
        }
    }

    pub fn send(status: SendResult) -> Self {
        Self {
            sends: VecDeque::from([status]),
            frames: Vec::new(),
        }
    }

    pub fn then_send(mut self, status: SendResult) -> Self {
        self.sends.push_back(status);
        self
    }

    pub fn with_frames(mut self, frames: Vec<Out>) -> Self {
        self.frames = frames;
        self
    }
}

/// Call counters shared between the test and the engine
#[derive(Debug, Default)]
pub struct MockStats {
    pub sends: AtomicUsize,
    pub receives: AtomicUsize,
    pub decode_only_receives: AtomicUsize,
    pub resets: AtomicUsize,
    pub frame_releases: AtomicUsize,
    pub releases: AtomicUsize,
    pub calls_after_release: AtomicUsize,
    /// Native frames still handed out when `reset` last ran
    pub outstanding_at_reset: AtomicUsize,
    released: AtomicBool,
    next_native: AtomicU64,
    outstanding_frames: Mutex<HashSet<u64>>,
}

impl MockStats {
    fn record(&self, counter: &AtomicUsize) {
        if self.released.load(Ordering::SeqCst) {
            self.calls_after_release.fetch_add(1, Ordering::SeqCst);
        }
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn total_calls(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
            + self.receives.load(Ordering::SeqCst)
            + self.resets.load(Ordering::SeqCst)
            + self.frame_releases.load(Ordering::SeqCst)
            + self.releases.load(Ordering::SeqCst)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Native frames handed out and not yet released
    pub fn outstanding_frames(&self) -> usize {
        self.outstanding_frames.lock().unwrap().len()
    }
}

/// Handles the test uses to hold the engine inside a `Gated` receive
pub struct ReceiveGate {
    pub entered: Receiver<()>,
    pub resume: Sender<()>,
}

struct EngineGate {
    entered: Sender<()>,
    resume: Receiver<()>,
}

pub struct MockEngine {
    stats: Arc<MockStats>,
    plans: HashMap<i64, Plan>,
    queue: VecDeque<Out>,
    fail_reset: bool,
    gate: Option<EngineGate>,
}

impl MockEngine {
    fn wait_at_gate(&self) {
        if let Some(gate) = &self.gate {
            let _ = gate.entered.send(());
            let _ = gate.resume.recv();
        }
    }

    fn write_frame(&self, frame: &mut FrameBuffer, mode: OutputMode, timestamp_us: i64) {
        match mode {
            OutputMode::Yuv => {
                assert!(frame.init_for_yuv_frame(16, 16, 16, 8));
                frame.data_mut().fill(timestamp_us as u8);
            }
            OutputMode::SurfaceYuv => {
                let id = self.stats.next_native.fetch_add(1, Ordering::SeqCst);
                self.stats.outstanding_frames.lock().unwrap().insert(id);
                frame.init_for_private_frame(16, 16, NativeFrameRef(id));
            }
            OutputMode::None => {}
        }
        frame.timestamp_us = timestamp_us;
    }
}

impl DecodeEngine for MockEngine {
    fn send_packet(&mut self, packet: &Packet<'_>) -> DecodeStatus {
        self.stats.record(&self.stats.sends);
        let plan = self
            .plans
            .entry(packet.timestamp_us)
            .or_insert_with(|| Plan::frames(vec![Out::Frame(packet.timestamp_us)]));

        match plan.sends.pop_front().unwrap_or(SendResult::Accept) {
            SendResult::Accept => {
                let frames = plan.frames.clone();
                self.queue.extend(frames);
                DecodeStatus::Success
            }
            SendResult::Refuse(buffered) => {
                self.queue.extend(buffered);
                DecodeStatus::ErrorReadFrame
            }
            SendResult::Status(status) => status,
            SendResult::Panic => panic!("mock send_packet panic"),
        }
    }

    fn receive_frame(&mut self, frame: Option<&mut FrameBuffer>, mode: OutputMode) -> DecodeStatus {
        self.stats.record(&self.stats.receives);
        let Some(next) = self.queue.pop_front() else {
            return DecodeStatus::NeedMoreInput;
        };

        let Some(frame) = frame else {
            // Decode-only: everything decoded is discarded
            self.stats.decode_only_receives.fetch_add(1, Ordering::SeqCst);
            return match next {
                Out::Frame(_) | Out::Hidden(_) | Out::Gated(_) => DecodeStatus::DropFrames(1),
                Out::Drop(count) => DecodeStatus::DropFrames(count),
                Out::Status(status) => status,
                Out::GatedStatus(status) => {
                    self.wait_at_gate();
                    status
                }
                Out::Panic => panic!("mock receive_frame panic"),
            };
        };

        match next {
            Out::Frame(ts) => {
                self.write_frame(frame, mode, ts);
                DecodeStatus::Success
            }
            Out::Hidden(ts) => {
                self.write_frame(frame, mode, ts);
                frame.should_be_skipped = true;
                DecodeStatus::Success
            }
            Out::Gated(ts) => {
                self.wait_at_gate();
                self.write_frame(frame, mode, ts);
                DecodeStatus::Success
            }
            Out::Drop(count) => DecodeStatus::DropFrames(count),
            Out::Status(status) => status,
            Out::GatedStatus(status) => {
                self.wait_at_gate();
                status
            }
            Out::Panic => panic!("mock receive_frame panic"),
        }
    }

    fn has_pending_frames(&self) -> bool {
        !self.queue.is_empty()
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.stats.record(&self.stats.resets);
        self.stats
            .outstanding_at_reset
            .store(self.stats.outstanding_frames(), Ordering::SeqCst);
        self.queue.clear();
        if self.fail_reset {
            return Err(EngineError::new("mock reset failure"));
        }
        Ok(())
    }

    fn release_frame(&mut self, frame: NativeFrameRef) {
        self.stats.record(&self.stats.frame_releases);
        self.stats.outstanding_frames.lock().unwrap().remove(&frame.0);
    }

    fn release(&mut self) {
        self.stats.record(&self.stats.releases);
        self.stats.released.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MockRenderer {
    pub renders: AtomicUsize,
}

impl FrameRenderer for MockRenderer {
    fn render(&self, _target: &SurfaceTarget, frame: &FrameBuffer) -> Result<(), EngineError> {
        if frame.native_frame().is_none() {
            return Err(EngineError::new("frame has no native payload"));
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Builds mock engines; keeps the stats and renderer for assertions
pub struct MockFactory {
    pub stats: Arc<MockStats>,
    pub renderer: Arc<MockRenderer>,
    plans: HashMap<i64, Plan>,
    fail_init: bool,
    fail_reset: bool,
    gate: Mutex<Option<EngineGate>>,
    pub init_params: Mutex<Option<InitParams>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(MockStats::default()),
            renderer: Arc::new(MockRenderer::default()),
            plans: HashMap::new(),
            fail_init: false,
            fail_reset: false,
            gate: Mutex::new(None),
            init_params: Mutex::new(None),
        }
    }

    pub fn plan(mut self, timestamp_us: i64, plan: Plan) -> Self {
        self.plans.insert(timestamp_us, plan);
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_reset(mut self) -> Self {
        self.fail_reset = true;
        self
    }

    /// Install a gate for `Out::Gated` frames
    pub fn gated(self) -> (Self, ReceiveGate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some(EngineGate {
            entered: entered_tx,
            resume: resume_rx,
        });
        (
            self,
            ReceiveGate {
                entered: entered_rx,
                resume: resume_tx,
            },
        )
    }
}

impl EngineFactory for MockFactory {
    fn library_name(&self) -> &str {
        "mock"
    }

    fn init(&self, params: &InitParams) -> Result<EngineSession, EngineError> {
        *self.init_params.lock().unwrap() = Some(params.clone());
        if self.fail_init {
            return Err(EngineError::new("mock init failure"));
        }

        let engine = MockEngine {
            stats: Arc::clone(&self.stats),
            plans: self.plans.clone(),
            queue: VecDeque::new(),
            fail_reset: self.fail_reset,
            gate: self.gate.lock().unwrap().take(),
        };
        let renderer: Arc<dyn FrameRenderer> = self.renderer.clone();
        Ok(EngineSession::new(Box::new(engine)).with_renderer(renderer))
    }
}
