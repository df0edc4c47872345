// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! are converted to microseconds using a [`Timebase`].

use std::io::Write;

use flipsync_core::backend::SwapMode;
use flipsync_core::time::{HostTime, Timebase};
use flipsync_core::trace::{
    CallbackEvent, FlipSummary, HookRunEvent, PhaseEvent, SwapEvent, TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
    timebase: Timebase,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("timebase", &self.timebase)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr(timebase: Timebase) -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
            timebase,
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }

    /// Consumes the sink and returns its writer.
    #[must_use]
    pub fn into_writer(self) -> W {
        self.writer
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "microsecond display does not need full u64 precision"
    )]
    fn ticks_to_us(&self, ticks: u64) -> f64 {
        self.timebase.ticks_to_nanos(ticks) as f64 / 1000.0
    }

    fn host_us(&self, t: HostTime) -> f64 {
        self.ticks_to_us(t.ticks())
    }

    fn opt_us(&self, t: Option<HostTime>) -> String {
        t.map_or_else(|| String::from("-"), |t| format!("{:.1}µs", self.host_us(t)))
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_phase(&mut self, e: &PhaseEvent) {
        let _ = writeln!(
            self.writer,
            "[phase] flip={} surface={:?} {:?} at {:.1}µs",
            e.flip_index,
            e.surface,
            e.phase,
            self.host_us(e.timestamp),
        );
    }

    fn on_hook_run(&mut self, e: &HookRunEvent) {
        let _ = writeln!(
            self.writer,
            "[hook] flip={} {} stages={} took={:.1}µs",
            e.flip_index,
            e.point,
            e.stages,
            self.ticks_to_us(e.finished.saturating_duration_since(e.started).ticks()),
        );
    }

    fn on_swap(&mut self, e: &SwapEvent) {
        let mode = match e.mode {
            SwapMode::Synced => "synced",
            SwapMode::Immediate => "immediate",
        };
        let _ = writeln!(
            self.writer,
            "[swap] flip={} surface={:?} {mode} at {:.1}µs",
            e.flip_index,
            e.surface,
            self.host_us(e.issued_at),
        );
    }

    fn on_callbacks(&mut self, e: &CallbackEvent) {
        let _ = writeln!(
            self.writer,
            "[callbacks] flip={} fired={} failed={}",
            e.flip_index, e.fired, e.failed,
        );
    }

    fn on_flip_summary(&mut self, s: &FlipSummary) {
        let miss = match s.miss {
            Some(m) if m.is_positive() => "MISSED",
            Some(_) => "ok",
            None => "?",
        };
        let vbl = self.opt_us(s.vbl);
        let _ = writeln!(
            self.writer,
            "[summary] flip={} sync={:?} vbl={vbl} preflip={:.1}µs wait={:.1}µs \
             swap={:.1}µs deadline={miss} outcome={:?}",
            s.flip_index,
            s.sync,
            self.ticks_to_us(s.preflip_ticks),
            self.ticks_to_us(s.wait_ticks),
            self.ticks_to_us(s.swap_ticks),
            s.outcome,
        );
    }
}
