// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//! Each surface gets its own process row.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use flipsync_core::time::{HostTime, Offset, Timebase};

use crate::recorder::{RecordedEvent, decode};

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Timestamps are converted to microseconds using the provided [`Timebase`].
pub fn export(bytes: &[u8], timebase: Timebase, writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::Phase(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": format!("{:?}", e.phase),
                    "cat": "Phase",
                    "ts": ticks_to_us(e.timestamp.ticks(), timebase),
                    "pid": e.surface.index(),
                    "tid": 0,
                    "s": "t",
                    "args": {
                        "flip_index": e.flip_index,
                    }
                }));
            }
            RecordedEvent::HookRun(e) => {
                events.push(json!({
                    "ph": "X",
                    "name": e.point.name(),
                    "cat": "Hook",
                    "ts": ticks_to_us(e.started.ticks(), timebase),
                    "dur": ticks_to_us(e.finished.saturating_duration_since(e.started).ticks(), timebase),
                    "pid": e.surface.index(),
                    "tid": 0,
                    "args": {
                        "flip_index": e.flip_index,
                        "stages": e.stages,
                    }
                }));
            }
            RecordedEvent::Swap(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Swap",
                    "cat": "Swap",
                    "ts": ticks_to_us(e.issued_at.ticks(), timebase),
                    "pid": e.surface.index(),
                    "tid": 0,
                    "s": "t",
                    "args": {
                        "flip_index": e.flip_index,
                        "mode": format!("{:?}", e.mode),
                    }
                }));
            }
            RecordedEvent::Callbacks(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Callbacks",
                    "cat": "Callback",
                    "ts": 0,
                    "pid": e.surface.index(),
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "flip_index": e.flip_index,
                        "fired": e.fired,
                        "failed": e.failed,
                    }
                }));
            }
            RecordedEvent::FlipSummary(s) => {
                let ts = s.vbl.unwrap_or(s.started);
                events.push(json!({
                    "ph": "i",
                    "name": "FlipSummary",
                    "cat": "Summary",
                    "ts": ticks_to_us(ts.ticks(), timebase),
                    "pid": s.surface.index(),
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "flip_index": s.flip_index,
                        "sync": format!("{:?}", s.sync),
                        "vbl_us": opt_us(s.vbl, timebase),
                        "onset_us": opt_us(s.onset, timebase),
                        "miss_us": s.miss.map(|m| offset_us(m, timebase)),
                        "preflip_us": ticks_to_us(s.preflip_ticks, timebase),
                        "wait_us": ticks_to_us(s.wait_ticks, timebase),
                        "swap_us": ticks_to_us(s.swap_ticks, timebase),
                        "outcome": format!("{:?}", s.outcome),
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

#[expect(
    clippy::cast_precision_loss,
    reason = "trace viewers take f64 microseconds"
)]
fn ticks_to_us(ticks: u64, timebase: Timebase) -> f64 {
    timebase.ticks_to_nanos(ticks) as f64 / 1000.0
}

fn opt_us(t: Option<HostTime>, timebase: Timebase) -> Option<f64> {
    t.map(|t| ticks_to_us(t.ticks(), timebase))
}

fn offset_us(o: Offset, timebase: Timebase) -> f64 {
    let magnitude = ticks_to_us(o.ticks().unsigned_abs(), timebase);
    if o.ticks() < 0 { -magnitude } else { magnitude }
}
