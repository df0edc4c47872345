// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for flips.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! flip scheduler calls as it moves through its phases. All method bodies
//! default to no-ops, so implementing only the events you care about is
//! fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing (zero overhead). When
//! **on**, each method performs a single `Option` branch before dispatching.
//!
//! [`FlipSummaryBuilder`] collects phase timestamps during a flip and
//! produces a [`FlipSummary`] at the end.

use crate::backend::SwapMode;
use crate::flip::{FlipPhase, SyncMode};
use crate::hook::HookPoint;
use crate::surface::SurfaceHandle;
use crate::time::{HostTime, Offset};
use crate::timing::FlipTiming;

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when a surface enters a flip phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseEvent {
    /// Per-engine flip counter.
    pub flip_index: u64,
    /// Surface changing phase.
    pub surface: SurfaceHandle,
    /// Phase being entered.
    pub phase: FlipPhase,
    /// Host time of the transition.
    pub timestamp: HostTime,
}

/// Emitted after a hook chain ran as part of a flip.
#[derive(Clone, Copy, Debug)]
pub struct HookRunEvent {
    /// Per-engine flip counter.
    pub flip_index: u64,
    /// Surface owning the chain.
    pub surface: SurfaceHandle,
    /// Point that ran.
    pub point: HookPoint,
    /// Enabled stages that executed (0 means the default action ran).
    pub stages: usize,
    /// Host time before the chain ran.
    pub started: HostTime,
    /// Host time after the chain ran.
    pub finished: HostTime,
}

/// Emitted when a swap is issued.
#[derive(Clone, Copy, Debug)]
pub struct SwapEvent {
    /// Per-engine flip counter.
    pub flip_index: u64,
    /// Surface being swapped.
    pub surface: SurfaceHandle,
    /// Synced or immediate.
    pub mode: SwapMode,
    /// Host time the swap was issued.
    pub issued_at: HostTime,
}

/// Emitted after flip callbacks of a surface ran.
#[derive(Clone, Copy, Debug)]
pub struct CallbackEvent {
    /// Per-engine flip counter.
    pub flip_index: u64,
    /// Surface whose callbacks fired.
    pub surface: SurfaceHandle,
    /// Callbacks invoked.
    pub fired: usize,
    /// Callbacks that failed.
    pub failed: usize,
}

/// Per-flip timing summary produced by [`FlipSummaryBuilder`].
#[derive(Clone, Copy, Debug)]
pub struct FlipSummary {
    /// Per-engine flip counter.
    pub flip_index: u64,
    /// Surface that flipped.
    pub surface: SurfaceHandle,
    /// Requested sync level.
    pub sync: SyncMode,
    /// Requested target, if any.
    pub target: Option<HostTime>,
    /// Host time when the flip started.
    pub started: HostTime,
    /// Observed VBL.
    pub vbl: Option<HostTime>,
    /// Observed stimulus onset.
    pub onset: Option<HostTime>,
    /// Observed completion.
    pub completed: Option<HostTime>,
    /// Miss estimate.
    pub miss: Option<Offset>,
    /// Pre-flip phase duration in ticks (0 if not measured).
    pub preflip_ticks: u64,
    /// Waiting phase duration in ticks (0 if not measured).
    pub wait_ticks: u64,
    /// Swap-to-measurement duration in ticks (0 if not measured).
    pub swap_ticks: u64,
    /// Terminal phase.
    pub outcome: FlipPhase,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the flip scheduler.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called when a surface enters a flip phase.
    fn on_phase(&mut self, e: &PhaseEvent) {
        _ = e;
    }

    /// Called after a hook chain ran.
    fn on_hook_run(&mut self, e: &HookRunEvent) {
        _ = e;
    }

    /// Called when a swap is issued.
    fn on_swap(&mut self, e: &SwapEvent) {
        _ = e;
    }

    /// Called after a surface's flip callbacks ran.
    fn on_callbacks(&mut self, e: &CallbackEvent) {
        _ = e;
    }

    /// Called with the per-flip summary.
    fn on_flip_summary(&mut self, s: &FlipSummary) {
        _ = s;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Emits a [`PhaseEvent`].
    #[inline]
    pub fn phase(&mut self, e: &PhaseEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_phase(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`HookRunEvent`].
    #[inline]
    pub fn hook_run(&mut self, e: &HookRunEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_hook_run(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`SwapEvent`].
    #[inline]
    pub fn swap(&mut self, e: &SwapEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_swap(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`CallbackEvent`].
    #[inline]
    pub fn callbacks(&mut self, e: &CallbackEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_callbacks(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FlipSummary`].
    #[inline]
    pub fn flip_summary(&mut self, s: &FlipSummary) {
        #[cfg(feature = "trace")]
        if let Some(sink) = &mut self.sink {
            sink.on_flip_summary(s);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = s;
        }
    }
}

// ---------------------------------------------------------------------------
// FlipSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps during a flip and produces a [`FlipSummary`].
#[derive(Debug)]
pub struct FlipSummaryBuilder {
    flip_index: u64,
    surface: SurfaceHandle,
    sync: SyncMode,
    target: Option<HostTime>,
    started: HostTime,
    phase_starts: [Option<HostTime>; 5],
}

impl FlipSummaryBuilder {
    /// Starts building a summary.
    #[must_use]
    pub fn new(
        flip_index: u64,
        surface: SurfaceHandle,
        sync: SyncMode,
        target: Option<HostTime>,
        started: HostTime,
    ) -> Self {
        Self {
            flip_index,
            surface,
            sync,
            target,
            started,
            phase_starts: [None; 5],
        }
    }

    /// Records entry into a phase. Terminal phases are ignored.
    pub fn enter(&mut self, phase: FlipPhase, t: HostTime) {
        if let Some(i) = phase_index(phase) {
            self.phase_starts[i] = Some(t);
        }
    }

    /// Consumes the builder and produces the final [`FlipSummary`].
    #[must_use]
    pub fn finish(self, timing: &FlipTiming, outcome: FlipPhase) -> FlipSummary {
        FlipSummary {
            flip_index: self.flip_index,
            surface: self.surface,
            sync: self.sync,
            target: self.target,
            started: self.started,
            vbl: timing.vbl,
            onset: timing.onset,
            completed: timing.completed,
            miss: timing.miss,
            preflip_ticks: self.span(FlipPhase::PreFlipHooksRunning, FlipPhase::Waiting),
            wait_ticks: self.span(FlipPhase::Waiting, FlipPhase::Swapping),
            swap_ticks: self.span(FlipPhase::Swapping, FlipPhase::PostSwapMeasuring),
            outcome,
        }
    }

    fn span(&self, from: FlipPhase, to: FlipPhase) -> u64 {
        let (Some(a), Some(b)) = (phase_index(from), phase_index(to)) else {
            return 0;
        };
        match (self.phase_starts[a], self.phase_starts[b]) {
            (Some(start), Some(end)) => end.saturating_duration_since(start).ticks(),
            _ => 0,
        }
    }
}

/// Maps a non-terminal [`FlipPhase`] to an array index.
const fn phase_index(phase: FlipPhase) -> Option<usize> {
    match phase {
        FlipPhase::Idle => Some(0),
        FlipPhase::PreFlipHooksRunning => Some(1),
        FlipPhase::Waiting => Some(2),
        FlipPhase::Swapping => Some(3),
        FlipPhase::PostSwapMeasuring => Some(4),
        FlipPhase::Completed | FlipPhase::Missed | FlipPhase::Failed => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_computes_phase_spans() {
        let s = SurfaceHandle::from_raw(0, 0);
        let mut b = FlipSummaryBuilder::new(3, s, SyncMode::FullSync, None, HostTime(100));
        b.enter(FlipPhase::PreFlipHooksRunning, HostTime(100));
        b.enter(FlipPhase::Waiting, HostTime(150));
        b.enter(FlipPhase::Swapping, HostTime(400));
        b.enter(FlipPhase::PostSwapMeasuring, HostTime(1000));
        b.enter(FlipPhase::Completed, HostTime(1010));
        let timing = FlipTiming {
            vbl: Some(HostTime(990)),
            ..FlipTiming::unobserved()
        };
        let summary = b.finish(&timing, FlipPhase::Completed);
        assert_eq!(summary.flip_index, 3, "index carried");
        assert_eq!(summary.preflip_ticks, 50, "pre-flip span");
        assert_eq!(summary.wait_ticks, 250, "wait span");
        assert_eq!(summary.swap_ticks, 600, "swap span");
        assert_eq!(summary.vbl, Some(HostTime(990)), "timing copied");
    }

    #[test]
    fn unmeasured_spans_are_zero() {
        let s = SurfaceHandle::from_raw(0, 0);
        let b = FlipSummaryBuilder::new(0, s, SyncMode::Immediate, None, HostTime(0));
        let summary = b.finish(&FlipTiming::unobserved(), FlipPhase::Completed);
        assert_eq!(summary.wait_ticks, 0, "nothing recorded");
    }

    #[test]
    fn tracer_none_is_silent() {
        let mut t = Tracer::none();
        t.callbacks(&CallbackEvent {
            flip_index: 0,
            surface: SurfaceHandle::from_raw(0, 0),
            fired: 1,
            failed: 0,
        });
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_to_sink() {
        #[derive(Default)]
        struct Count(usize);
        impl TraceSink for Count {
            fn on_swap(&mut self, _: &SwapEvent) {
                self.0 += 1;
            }
        }
        let mut sink = Count::default();
        {
            let mut t = Tracer::new(&mut sink);
            t.swap(&SwapEvent {
                flip_index: 0,
                surface: SurfaceHandle::from_raw(0, 0),
                mode: SwapMode::Synced,
                issued_at: HostTime(1),
            });
        }
        assert_eq!(sink.0, 1, "one swap event");
    }
}
