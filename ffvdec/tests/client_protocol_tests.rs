//! Client-side slot protocol: backpressure, misuse detection, output modes
//! and rendering

mod helpers;

use ffvdec::{Error, OutputMode, RejectedSlot, SurfaceTarget};
use helpers::*;

const SURFACE: SurfaceTarget = SurfaceTarget {
    id: 7,
    width: 1280,
    height: 720,
};

#[test]
fn test_decoder_name_and_init_params() {
    let factory = MockFactory::new();
    let mut decoder = start_decoder(&test_config(4, 4), &factory);

    assert_eq!(decoder.name(), "mock-h264");
    let params = factory.init_params.lock().unwrap().clone().expect("init was called");
    assert_eq!(params.codec_name, "h264");
    assert_eq!(params.threads, 1);
    assert_eq!(params.extra_data, Some(vec![0x67, 0x42, 0x68, 0xce]));
    decoder.release();
}

#[test]
fn test_input_backpressure() {
    let factory = MockFactory::new();
    let mut decoder = start_decoder(&test_config(2, 1), &factory);

    // Fills the only output slot
    submit(&decoder, 0, b"a");
    assert!(wait_for(|| decoder.snapshot().output.queued == 1));

    submit(&decoder, 1, b"b");
    submit(&decoder, 2, b"c");
    assert!(wait_for(|| decoder.snapshot().input.queued == 2));
    assert!(decoder.acquire_input().unwrap().is_none());

    // Returning the output lets the worker continue
    let first = collect_n(&decoder, 1);
    decoder.release_output(first.into_iter().next().unwrap()).unwrap();
    let second = collect_n(&decoder, 1);
    assert_eq!(second[0].timestamp_us(), 1);
    decoder.release();
}

#[test]
fn test_only_one_input_may_be_dequeued() {
    let factory = MockFactory::new();
    let mut decoder = start_decoder(&test_config(4, 4), &factory);

    let slot = decoder.acquire_input().unwrap().expect("free input");
    assert!(matches!(decoder.acquire_input(), Err(Error::ProtocolMisuse(_))));

    decoder.discard_input(slot).unwrap();
    let snapshot = decoder.snapshot();
    assert_eq!(snapshot.input.free, 4);
    assert_eq!(snapshot.input.client, 0);
    assert!(decoder.acquire_input().unwrap().is_some());
    decoder.release();
}

#[test]
fn test_foreign_slots_rejected() {
    let factory = MockFactory::new();
    let other_factory = MockFactory::new();
    let mut decoder = start_decoder(&test_config(4, 4), &factory);
    let mut other = start_decoder(&test_config(4, 4), &other_factory);

    submit(&other, 0, b"frame");
    let foreign = collect_n(&other, 1).pop().unwrap();
    assert!(matches!(
        decoder.render_to_surface(&foreign, &SURFACE),
        Err(Error::ProtocolMisuse(_))
    ));

    let err = decoder.release_output(foreign).unwrap_err();
    assert!(matches!(err, Error::SlotRejected { .. }));
    let foreign = err
        .into_rejected_slot()
        .and_then(RejectedSlot::into_output)
        .expect("rejected output handed back");
    other.release_output(foreign).unwrap();

    let ours = decoder.acquire_input().unwrap().unwrap();
    let theirs = other.acquire_input().unwrap().unwrap();
    let err = decoder.submit_input(theirs).unwrap_err();
    assert!(err.to_string().starts_with("Protocol misuse"));
    let theirs = err
        .into_rejected_slot()
        .and_then(RejectedSlot::into_input)
        .expect("rejected input handed back");
    decoder.discard_input(ours).unwrap();
    assert_eq!(decoder.snapshot().input.free, 4);

    // The owner takes its slot back and keeps decoding
    other.discard_input(theirs).unwrap();
    let snapshot = other.snapshot();
    assert_eq!(snapshot.input.free, 4);
    assert_eq!(snapshot.input.client, 0);
    assert_eq!(snapshot.output.free, 4);
    submit(&other, 1, b"frame");
    assert_eq!(timestamps(&collect_n(&other, 1)), vec![1]);

    decoder.release();
    other.release();
}

#[test]
fn test_foreign_slot_survives_released_decoder() {
    let factory = MockFactory::new();
    let other_factory = MockFactory::new();
    let mut decoder = start_decoder(&test_config(2, 2), &factory);
    let mut other = start_decoder(&test_config(2, 2), &other_factory);
    decoder.release();

    let theirs = other.acquire_input().unwrap().unwrap();
    let theirs = decoder
        .submit_input(theirs)
        .unwrap_err()
        .into_rejected_slot()
        .and_then(RejectedSlot::into_input)
        .expect("rejected input handed back");

    other.discard_input(theirs).unwrap();
    assert!(other.acquire_input().unwrap().is_some());
    other.release();
}

#[test]
fn test_render_requires_surface_mode() {
    let factory = MockFactory::new();
    let mut decoder = start_decoder(&test_config(4, 4), &factory);

    submit(&decoder, 0, b"frame");
    let output = collect_n(&decoder, 1).pop().unwrap();
    assert_eq!(output.mode(), OutputMode::Yuv);
    assert!(matches!(
        decoder.render_to_surface(&output, &SURFACE),
        Err(Error::ProtocolMisuse(_))
    ));
    decoder.release_output(output).unwrap();
    decoder.release();
}

#[test]
fn test_surface_mode_renders_and_returns_native_frames() {
    let factory = MockFactory::new();
    let mut decoder = start_decoder(&test_config(4, 4), &factory);
    decoder.set_output_mode(OutputMode::SurfaceYuv);

    submit(&decoder, 0, b"frame");
    let output = collect_n(&decoder, 1).pop().unwrap();
    assert_eq!(output.mode(), OutputMode::SurfaceYuv);
    assert!(output.frame().native_frame().is_some());

    decoder.render_to_surface(&output, &SURFACE).unwrap();
    assert_eq!(factory.renderer.renders.load(std::sync::atomic::Ordering::SeqCst), 1);

    decoder.release_output(output).unwrap();
    submit(&decoder, 1, b"frame");
    let next = collect_n(&decoder, 1).pop().unwrap();
    decoder.release_output(next).unwrap();

    decoder.release();
    assert_eq!(factory.stats.outstanding_frames(), 0);
}

#[test]
fn test_no_output_mode_delivers_timing_only() {
    let factory = MockFactory::new();
    let mut decoder = start_decoder(&test_config(4, 4), &factory);
    decoder.set_output_mode(OutputMode::None);

    submit(&decoder, 33_000, b"frame");
    let output = collect_n(&decoder, 1).pop().unwrap();
    assert_eq!(output.mode(), OutputMode::None);
    assert_eq!(output.timestamp_us(), 33_000);
    assert!(output.frame().data().is_empty());
    decoder.release();
}

#[test]
fn test_release_is_idempotent() {
    let factory = MockFactory::new();
    let mut decoder = start_decoder(&test_config(4, 4), &factory);

    decoder.release();
    decoder.release();
    assert_eq!(MockStats::count(&factory.stats.releases), 1);
    assert_eq!(decoder.snapshot().state, ffvdec::DecoderState::Released);
}
