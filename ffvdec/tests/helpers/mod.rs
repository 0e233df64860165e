//! Test helpers for ffvdec integration tests
//!
//! - `mock_engine`: scripted engine, renderer and factory with call counters
//! - polling helpers: the client API never blocks, so tests poll with a
//!   deadline instead of sleeping for fixed intervals

#![allow(dead_code)]

pub mod mock_engine;

pub use mock_engine::{MockFactory, MockStats, Out, Plan, ReceiveGate, SendResult};

use ffvdec::{DecoderConfig, OutputSlot, StreamDecoder, StreamFormat};
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config(input_buffers: usize, output_buffers: usize) -> DecoderConfig {
    DecoderConfig {
        input_buffers,
        output_buffers,
        initial_input_buffer_size: 1024,
        threads: 1,
        ..DecoderConfig::default()
    }
}

pub fn h264_format() -> StreamFormat {
    StreamFormat::new(ffvdec::format::MIME_H264, 320, 240)
        .with_initialization_data(vec![vec![0x67, 0x42], vec![0x68, 0xce]])
}

pub fn start_decoder(config: &DecoderConfig, factory: &MockFactory) -> StreamDecoder {
    StreamDecoder::new(config, h264_format(), factory).expect("decoder should start")
}

/// Poll `condition` until it holds or the deadline passes
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Acquire an input (waiting out backpressure), fill it and submit it
pub fn submit(decoder: &StreamDecoder, timestamp_us: i64, payload: &[u8]) {
    submit_with(decoder, timestamp_us, payload, false, false);
}

pub fn submit_with(
    decoder: &StreamDecoder,
    timestamp_us: i64,
    payload: &[u8],
    first_sample: bool,
    end_of_stream: bool,
) {
    let mut slot = None;
    assert!(
        wait_for(|| {
            slot = decoder.acquire_input().expect("acquire_input");
            slot.is_some()
        }),
        "no input slot became free"
    );
    let mut slot = slot.unwrap();
    slot.write(payload);
    slot.set_timestamp_us(timestamp_us);
    slot.set_first_sample(first_sample);
    if end_of_stream {
        slot.set_end_of_stream();
    }
    decoder.submit_input(slot).expect("submit_input");
}

pub fn submit_end_of_stream(decoder: &StreamDecoder, timestamp_us: i64) {
    submit_with(decoder, timestamp_us, &[], false, true);
}

/// Collect exactly `count` outputs, failing the test on timeout
pub fn collect_n(decoder: &StreamDecoder, count: usize) -> Vec<OutputSlot> {
    let mut outputs = Vec::with_capacity(count);
    let done = wait_for(|| {
        while let Some(output) = decoder.collect_output().expect("collect_output") {
            outputs.push(output);
        }
        outputs.len() >= count
    });
    assert!(done, "collected {} of {} outputs", outputs.len(), count);
    outputs
}

/// Worker holds nothing and every submitted input has been consumed
pub fn wait_idle(decoder: &StreamDecoder) -> bool {
    wait_for(|| {
        let snapshot = decoder.snapshot();
        snapshot.state == ffvdec::DecoderState::Running
            && snapshot.input.queued == 0
            && snapshot.input.worker == 0
            && snapshot.output.worker == 0
    })
}

pub fn timestamps(outputs: &[OutputSlot]) -> Vec<i64> {
    outputs.iter().map(OutputSlot::timestamp_us).collect()
}
