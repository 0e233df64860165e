//! Decode session runner
//!
//! Plays the host-client role against a `StreamDecoder`: feeds the configured
//! packets, optionally flushes part-way, submits end of stream and collects
//! until the end-of-stream output comes back. Every client call is
//! non-blocking, so the loop polls and backs off briefly when neither side
//! made progress.

use crate::config::SimConfig;
use crate::synthetic::SyntheticFactory;
use anyhow::{Context, Result};
use ffvdec::{OutputMode, StreamDecoder, StreamFormat, SurfaceTarget};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const IDLE_BACKOFF: Duration = Duration::from_micros(200);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub decoder: String,
    pub submitted: u64,
    pub delivered: u64,
    /// Sum of the skip counts carried by delivered outputs
    pub skipped: u64,
    pub rendered: u64,
    pub flushes: u64,
    pub engine_resets: u64,
    pub engine_refusals: u64,
    pub completed: bool,
    pub elapsed_ms: u64,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: submitted={} delivered={} skipped={} rendered={} flushes={} resets={} refusals={} completed={} elapsed={}ms",
            self.decoder,
            self.submitted,
            self.delivered,
            self.skipped,
            self.rendered,
            self.flushes,
            self.engine_resets,
            self.engine_refusals,
            self.completed,
            self.elapsed_ms
        )
    }
}

/// Run one session to end of stream, or until `cancel` is set
pub fn run_session(config: &SimConfig, factory: &SyntheticFactory, cancel: &AtomicBool) -> Result<SessionReport> {
    let stream = &config.stream;
    let format = StreamFormat::new(stream.mime_type.clone(), stream.width, stream.height);
    let mut decoder =
        StreamDecoder::new(&config.decoder, format, factory).context("Failed to start decoder")?;
    let surface = SurfaceTarget {
        id: 1,
        width: stream.width,
        height: stream.height,
    };

    info!("Session started on {}", decoder.name());
    let started = Instant::now();
    let mut report = SessionReport {
        decoder: decoder.name().to_string(),
        ..SessionReport::default()
    };

    let mut next_packet = 0usize;
    let mut end_of_stream_sent = false;

    while !report.completed {
        if cancel.load(Ordering::Relaxed) {
            warn!("Session cancelled after {} packets", next_packet);
            break;
        }
        let mut progressed = false;

        if stream.flush_at == Some(next_packet) && report.flushes == 0 {
            decoder.flush().context("Flush failed")?;
            report.flushes += 1;
            debug!("Flushed before packet {}", next_packet);
        }

        if !end_of_stream_sent {
            if let Some(mut slot) = decoder.acquire_input().context("Failed to acquire input")? {
                if next_packet < stream.packets {
                    let kind = stream.kind_at(next_packet);
                    slot.write(&[kind.header(), (next_packet & 0xff) as u8]);
                    slot.set_timestamp_us(next_packet as i64 * stream.frame_interval_us);
                    slot.set_first_sample(next_packet == 0);
                    report.submitted += 1;
                    next_packet += 1;
                } else {
                    slot.set_timestamp_us(next_packet as i64 * stream.frame_interval_us);
                    slot.set_end_of_stream();
                    end_of_stream_sent = true;
                }
                decoder.submit_input(slot).context("Failed to submit input")?;
                progressed = true;
            }
        }

        while let Some(output) = decoder.collect_output().context("Failed to collect output")? {
            progressed = true;
            report.skipped += u64::from(output.skipped_count());
            if output.is_end_of_stream() {
                report.completed = true;
            } else {
                report.delivered += 1;
                if output.mode() == OutputMode::SurfaceYuv {
                    decoder
                        .render_to_surface(&output, &surface)
                        .context("Failed to render frame")?;
                }
            }
            decoder.release_output(output).context("Failed to release output")?;
        }

        if !progressed {
            std::thread::sleep(IDLE_BACKOFF);
        }
    }

    decoder.release();

    report.rendered = factory.renderer.rendered.load(Ordering::Relaxed);
    report.engine_resets = factory.stats.resets.load(Ordering::Relaxed);
    report.engine_refusals = factory.stats.refusals.load(Ordering::Relaxed);
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!("Session finished: {}", report);
    Ok(report)
}
