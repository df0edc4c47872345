// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flip requests and the flip state machine.
//!
//! Every participating surface moves through
//!
//! ```text
//! Idle → PreFlipHooksRunning → Waiting → Swapping → PostSwapMeasuring
//!      → Completed | Missed | Failed
//! ```
//!
//! and the current phase is stored on the surface record.
//!
//! Pre-flip work runs the hook chains between the client's draw buffers and
//! the system backbuffers:
//!
//! ```text
//! draw(v) ─► Left/RightCompositing ─► processed(v)
//! processed(0) + processed(1) ─► StereoCompositing ─► composite   (merged modes)
//! output(v) ─► PostCompositing ─► post(v) ─► FinalOutputFormatting ─► backbuffer(v)
//! backbuffer(v) ─► Left/RightFinalizer
//! ```
//!
//! [`flip_begin`](PresentationEngine::flip_begin) splits a flip in two: the
//! surface is parked after its swap is issued, and
//! [`flip_end`](PresentationEngine::flip_end) or
//! [`flip_check_end`](PresentationEngine::flip_check_end) collect the timing
//! later.
//!
//! Validation failures leave every surface untouched. A backend or hook
//! failure after validation marks the failing surface stale; the next flip of
//! that surface re-queries the refresh interval and forgets the last VBL
//! before trusting new timestamps.

use alloc::vec;
use alloc::vec::Vec;

use crate::backend::{Clock, GraphicsBackend, SwapMode, SwapStamp};
use crate::engine::PresentationEngine;
use crate::error::{BackendError, Error, Result};
use crate::hook::{HookPoint, StageBindings};
use crate::surface::{ClearPolicy, StereoMode, SurfaceBuffers, SurfaceHandle};
use crate::time::{Duration, HostTime};
use crate::timing::{self, FlipStats, FlipTiming};
use crate::trace::{CallbackEvent, FlipSummaryBuilder, HookRunEvent, PhaseEvent, SwapEvent, Tracer};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Where a surface is in the flip cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlipPhase {
    /// No flip in progress.
    #[default]
    Idle,
    /// Pre-flip hook chains are running.
    PreFlipHooksRunning,
    /// Waiting for the requested target time.
    Waiting,
    /// Swap issued.
    Swapping,
    /// Waiting for and reading completion timestamps.
    PostSwapMeasuring,
    /// Flip finished on time, or was not observed.
    Completed,
    /// Flip finished after its inferred deadline.
    Missed,
    /// A backend or hook failure aborted the flip.
    Failed,
}

impl FlipPhase {
    /// Whether this phase ends a flip.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Missed | Self::Failed)
    }
}

/// How tightly a flip is tied to the vertical blank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncMode {
    /// Swap at the first VBL at or after the target and block until the new
    /// image is on screen.
    #[default]
    FullSync,
    /// Queue a VBL-synced swap and return at once. Nothing is measured.
    QueueOnly,
    /// Swap without waiting for a VBL. Nothing is measured.
    Immediate,
    /// Like [`FullSync`](Self::FullSync), but busy-polls for completion.
    SpinWait,
}

impl SyncMode {
    /// Maps the scripting code `0..=3`.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::FullSync),
            1 => Some(Self::QueueOnly),
            2 => Some(Self::Immediate),
            3 => Some(Self::SpinWait),
            _ => None,
        }
    }

    /// Whether the flip waits for completion and produces timestamps.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::FullSync | Self::SpinWait)
    }

    const fn swap_mode(self) -> SwapMode {
        match self {
            Self::Immediate => SwapMode::Immediate,
            Self::FullSync | Self::QueueOnly | Self::SpinWait => SwapMode::Synced,
        }
    }
}

/// Fan-out policy for flipping several surfaces at once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MultiFlipMode {
    /// Flip only the requested surface.
    #[default]
    None,
    /// Swap every participant VBL-synced and wait on each.
    BlockEach,
    /// Wait on the master, then swap the others immediately.
    BlockMaster,
}

impl MultiFlipMode {
    /// Maps the scripting code `0..=2`.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::BlockEach),
            2 => Some(Self::BlockMaster),
            _ => None,
        }
    }
}

/// One flip request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlipRequest {
    /// Surface to flip (the master for multi-surface flips).
    pub surface: SurfaceHandle,
    /// Earliest presentation time. `None` means the next VBL.
    pub when: Option<HostTime>,
    /// What happens to the draw buffers after the swap.
    pub clear: ClearPolicy,
    /// Sync level.
    pub sync: SyncMode,
    /// Multi-surface fan-out.
    pub multi: MultiFlipMode,
}

impl FlipRequest {
    /// An as-soon-as-possible, fully synced flip of `surface`.
    #[must_use]
    pub const fn new(surface: SurfaceHandle) -> Self {
        Self {
            surface,
            when: None,
            clear: ClearPolicy::ClearAfterFlip,
            sync: SyncMode::FullSync,
            multi: MultiFlipMode::None,
        }
    }

    /// Sets the target time.
    #[must_use]
    pub const fn at(mut self, when: HostTime) -> Self {
        self.when = Some(when);
        self
    }

    /// Sets the clear policy.
    #[must_use]
    pub const fn with_clear(mut self, clear: ClearPolicy) -> Self {
        self.clear = clear;
        self
    }

    /// Sets the sync level.
    #[must_use]
    pub const fn with_sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the multi-surface policy.
    #[must_use]
    pub const fn with_multi(mut self, multi: MultiFlipMode) -> Self {
        self.multi = multi;
        self
    }
}

/// An asynchronous flip between [`PresentationEngine::flip_begin`] and its
/// collection.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PendingFlip {
    request: FlipRequest,
    started: HostTime,
    flip_index: u64,
    /// The swap was issued. Otherwise it waits for the target time.
    swapped: bool,
}

// ---------------------------------------------------------------------------
// Flip operations
// ---------------------------------------------------------------------------

impl<B: GraphicsBackend, C: Clock> PresentationEngine<B, C> {
    /// Presents the surface's drawn content and returns what was observed.
    ///
    /// Blocks according to [`FlipRequest::sync`]. For multi-surface flips the
    /// returned timing is the master's.
    pub fn flip(&mut self, request: &FlipRequest) -> Result<FlipTiming> {
        self.flip_with_tracer(request, &mut Tracer::none())
    }

    /// [`flip`](Self::flip), reporting phases, hook runs, swaps, callbacks,
    /// and a per-flip summary to `tracer`.
    pub fn flip_with_tracer(
        &mut self,
        request: &FlipRequest,
        tracer: &mut Tracer<'_>,
    ) -> Result<FlipTiming> {
        let started = self.clock.now();
        let participants = self.participants(request, started)?;
        self.flip_counter += 1;
        let flip_index = self.flip_counter;
        let mut summary =
            FlipSummaryBuilder::new(flip_index, request.surface, request.sync, request.when, started);

        // Participants whose swap landed and whose cycle completed.
        let mut finished = Vec::with_capacity(participants.len());
        let result = self.run_flip(
            request,
            &participants,
            started,
            flip_index,
            &mut summary,
            &mut finished,
            tracer,
        );
        if let Err(err) = result {
            let unfinished: Vec<_> = participants
                .iter()
                .copied()
                .filter(|&s| !finished.iter().any(|&(f, _)| f == s))
                .collect();
            self.abort_cycle(&unfinished, &err, flip_index, tracer);
            self.fire_callbacks(&finished, flip_index, tracer);
            return Err(err);
        }
        self.fire_callbacks(&finished, flip_index, tracer);

        let master = finished.first().map(|&(_, t)| t).unwrap_or_default();
        let outcome = self.surfaces.get(request.surface)?.phase;
        summary.enter(outcome, self.clock.now());
        tracer.flip_summary(&summary.finish(&master, outcome));
        Ok(master)
    }

    /// Runs pre-flip hook processing and the pipeline flush now, so the next
    /// flip only has to swap.
    ///
    /// Calling it again before the flip does nothing.
    pub fn drawing_finished(&mut self, handle: SurfaceHandle, clear: ClearPolicy) -> Result<()> {
        let record = self.surfaces.get(handle)?;
        if !record.kind.is_flippable() {
            return Err(Error::NotFlippable {
                surface: handle,
                kind: record.kind.name(),
            });
        }
        if record.pending_flip.is_some() {
            return Err(Error::FlipPending(handle));
        }
        let mut tracer = Tracer::none();
        let index = self.flip_counter;
        let result = self
            .revalidate(handle)
            .and_then(|()| self.prepare(handle, clear, index, &mut tracer));
        if let Err(err) = &result {
            self.abort_cycle(&[handle], err, index, &mut tracer);
        }
        result
    }

    /// Starts a flip of `request.surface` and returns without waiting for it.
    ///
    /// Pre-flip processing runs now. The swap is issued now if the target
    /// time has been reached, otherwise by the first
    /// [`flip_check_end`](Self::flip_check_end) or [`flip_end`](Self::flip_end)
    /// at or after the target. Until the flip is collected, other flips of
    /// the surface fail with [`Error::FlipPending`]. Only single-surface
    /// requests can be split.
    pub fn flip_begin(&mut self, request: &FlipRequest) -> Result<()> {
        if request.multi != MultiFlipMode::None {
            return Err(Error::InvalidArgument {
                name: "multi_flip",
                reason: alloc::string::String::from("asynchronous flips take a single surface"),
            });
        }
        let started = self.clock.now();
        let participants = self.participants(request, started)?;
        self.flip_counter += 1;
        let flip_index = self.flip_counter;
        let mut tracer = Tracer::none();
        let result = self.begin_async(request, started, flip_index, &mut tracer);
        if let Err(err) = &result {
            self.abort_cycle(&participants, err, flip_index, &mut tracer);
        }
        result
    }

    /// Collects the asynchronous flip of `handle`, blocking until it has
    /// completed, and fires its callbacks.
    ///
    /// The timing is unobserved for the non-blocking sync modes.
    pub fn flip_end(&mut self, handle: SurfaceHandle) -> Result<FlipTiming> {
        Ok(self.collect(handle, true)?.unwrap_or_default())
    }

    /// Collects the asynchronous flip of `handle` if it has completed.
    ///
    /// Returns `None` while the target time or the swap's VBL is still
    /// ahead; the flip stays pending.
    pub fn flip_check_end(&mut self, handle: SurfaceHandle) -> Result<Option<FlipTiming>> {
        self.collect(handle, false)
    }

    /// Whether an asynchronous flip of `handle` is waiting to be collected.
    pub fn is_flip_pending(&self, handle: SurfaceHandle) -> Result<bool> {
        Ok(self.surfaces.get(handle)?.pending_flip.is_some())
    }

    /// Timing of the most recent flip of `handle`, if any.
    pub fn last_flip(&self, handle: SurfaceHandle) -> Result<Option<FlipTiming>> {
        Ok(self.surfaces.get(handle)?.last_flip)
    }

    /// Flip count, missed-deadline count, and refresh estimate of `handle`.
    pub fn flip_stats(&self, handle: SurfaceHandle) -> Result<FlipStats> {
        Ok(self
            .surfaces
            .get(handle)?
            .timing
            .stats(self.clock.timebase()))
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    /// Validates `request` and returns the participants, master first.
    fn participants(&self, request: &FlipRequest, now: HostTime) -> Result<Vec<SurfaceHandle>> {
        let record = self.surfaces.get(request.surface)?;
        if !record.kind.is_flippable() {
            return Err(Error::NotFlippable {
                surface: request.surface,
                kind: record.kind.name(),
            });
        }
        if record.pending_flip.is_some() {
            return Err(Error::FlipPending(request.surface));
        }
        if let Some(when) = request.when {
            let horizon = Duration::from_secs_f64(self.config.max_future_secs, self.clock.timebase());
            if when > now.saturating_add(horizon) {
                return Err(Error::InvalidArgument {
                    name: "when",
                    reason: alloc::format!(
                        "target lies more than {} s in the future",
                        self.config.max_future_secs
                    ),
                });
            }
        }
        if request.multi == MultiFlipMode::BlockMaster && !request.sync.is_blocking() {
            return Err(Error::InvalidArgument {
                name: "multi_flip",
                reason: alloc::format!("BlockMaster needs a blocking sync mode, got {:?}", request.sync),
            });
        }

        let mut out = vec![request.surface];
        if request.multi == MultiFlipMode::None {
            return Ok(out);
        }
        let master = request.surface;
        let slaves: Vec<_> = self
            .surfaces
            .handles()
            .filter(|&h| self.surfaces.get(h).is_ok_and(|r| r.frame_lock == Some(master)))
            .collect();
        if slaves.is_empty() {
            out.extend(self.surfaces.handles().filter(|&h| {
                h != master && self.surfaces.get(h).is_ok_and(|r| r.kind.is_flippable())
            }));
        } else {
            out.extend(slaves);
        }
        if let Some(&busy) = out
            .iter()
            .find(|&&h| self.surfaces.get(h).is_ok_and(|r| r.pending_flip.is_some()))
        {
            return Err(Error::FlipPending(busy));
        }
        Ok(out)
    }

    fn run_flip(
        &mut self,
        request: &FlipRequest,
        participants: &[SurfaceHandle],
        started: HostTime,
        flip_index: u64,
        summary: &mut FlipSummaryBuilder,
        finished: &mut Vec<(SurfaceHandle, FlipTiming)>,
        tracer: &mut Tracer<'_>,
    ) -> Result<()> {
        summary.enter(FlipPhase::PreFlipHooksRunning, self.clock.now());
        for &s in participants {
            self.set_phase(s, FlipPhase::PreFlipHooksRunning, flip_index, tracer)?;
        }
        for &s in participants {
            self.revalidate(s)?;
            self.prepare(s, request.clear, flip_index, tracer)?;
        }

        summary.enter(FlipPhase::Waiting, self.clock.now());
        for &s in participants {
            self.set_phase(s, FlipPhase::Waiting, flip_index, tracer)?;
        }
        if let Some(target) = request.when
            && target > self.clock.now()
        {
            self.clock.sleep_until(target);
        }

        summary.enter(FlipPhase::Swapping, self.clock.now());
        for &s in participants {
            self.set_phase(s, FlipPhase::Swapping, flip_index, tracer)?;
        }
        let timings = self.swap_and_measure(request, participants, started, flip_index, summary, tracer)?;

        for (&s, timing) in participants.iter().zip(timings) {
            self.finish(s, request.clear, &timing, flip_index, tracer)?;
            finished.push((s, timing));
        }
        Ok(())
    }

    fn begin_async(
        &mut self,
        request: &FlipRequest,
        started: HostTime,
        flip_index: u64,
        tracer: &mut Tracer<'_>,
    ) -> Result<()> {
        let s = request.surface;
        self.set_phase(s, FlipPhase::PreFlipHooksRunning, flip_index, tracer)?;
        self.revalidate(s)?;
        self.prepare(s, request.clear, flip_index, tracer)?;
        self.set_phase(s, FlipPhase::Waiting, flip_index, tracer)?;
        let mut pending = PendingFlip {
            request: *request,
            started,
            flip_index,
            swapped: false,
        };
        if request.when.is_none_or(|t| t <= self.clock.now()) {
            self.issue_pending_swap(s, &mut pending, tracer)?;
        }
        self.surfaces.get_mut(s)?.pending_flip = Some(pending);
        tracing::debug!(surface = ?s, flip = flip_index, swapped = pending.swapped, "asynchronous flip begun");
        Ok(())
    }

    fn issue_pending_swap(
        &mut self,
        s: SurfaceHandle,
        pending: &mut PendingFlip,
        tracer: &mut Tracer<'_>,
    ) -> Result<()> {
        let flip_index = pending.flip_index;
        self.set_phase(s, FlipPhase::Swapping, flip_index, tracer)?;
        self.issue_swap(s, pending.request.sync.swap_mode(), flip_index, tracer)?;
        self.set_phase(s, FlipPhase::PostSwapMeasuring, flip_index, tracer)?;
        pending.swapped = true;
        Ok(())
    }

    /// Completes the pending flip of `s`. With `block` unset, returns `None`
    /// and keeps the flip pending if it has not completed yet.
    fn collect(&mut self, s: SurfaceHandle, block: bool) -> Result<Option<FlipTiming>> {
        let mut pending = self
            .surfaces
            .get(s)?
            .pending_flip
            .ok_or(Error::NoFlipPending(s))?;
        let mut tracer = Tracer::none();
        match self.try_collect(s, &mut pending, block, &mut tracer) {
            Ok(None) => {
                self.surfaces.get_mut(s)?.pending_flip = Some(pending);
                Ok(None)
            }
            Ok(Some(timing)) => {
                self.surfaces.get_mut(s)?.pending_flip = None;
                self.fire_callbacks(&[(s, timing)], pending.flip_index, &mut tracer);
                Ok(Some(timing))
            }
            Err(err) => {
                if let Ok(record) = self.surfaces.get_mut(s) {
                    record.pending_flip = None;
                }
                self.abort_cycle(&[s], &err, pending.flip_index, &mut tracer);
                Err(err)
            }
        }
    }

    fn try_collect(
        &mut self,
        s: SurfaceHandle,
        pending: &mut PendingFlip,
        block: bool,
        tracer: &mut Tracer<'_>,
    ) -> Result<Option<FlipTiming>> {
        let request = pending.request;
        if !pending.swapped {
            if let Some(target) = request.when
                && target > self.clock.now()
            {
                if !block {
                    return Ok(None);
                }
                self.clock.sleep_until(target);
            }
            self.issue_pending_swap(s, pending, tracer)?;
        }
        let timing = if !request.sync.is_blocking() {
            FlipTiming::unobserved()
        } else if block {
            self.measure(s, &request, pending.started)?
        } else {
            match self.backend.poll_swap(s).map_err(device(s))? {
                Some(stamp) => self.verdict(s, &request, pending.started, stamp)?,
                None => return Ok(None),
            }
        };
        self.finish(s, request.clear, &timing, pending.flip_index, tracer)?;
        Ok(Some(timing))
    }

    /// Fires the callbacks of every surface whose flip was observed.
    fn fire_callbacks(
        &mut self,
        finished: &[(SurfaceHandle, FlipTiming)],
        flip_index: u64,
        tracer: &mut Tracer<'_>,
    ) {
        for (surface, timing) in finished {
            if !timing.is_observed() {
                continue;
            }
            let report = self.callbacks.fire(*surface, timing);
            if report.fired > 0 {
                tracer.callbacks(&CallbackEvent {
                    flip_index,
                    surface: *surface,
                    fired: report.fired,
                    failed: report.failed,
                });
            }
        }
    }

    /// Re-queries the refresh interval of a stale surface.
    fn revalidate(&mut self, s: SurfaceHandle) -> Result<()> {
        if !self.surfaces.get(s)?.stale {
            return Ok(());
        }
        let nominal = self.backend.refresh_interval(s);
        let record = self.surfaces.get_mut(s)?;
        record.timing.estimator.reset(nominal);
        record.timing.last_vbl = None;
        record.stale = false;
        tracing::warn!(surface = ?s, refresh = ?nominal, "timing revalidated after device failure");
        Ok(())
    }

    /// Pre-flip hook processing, content save, and flush, each at most once
    /// per cycle.
    fn prepare(
        &mut self,
        s: SurfaceHandle,
        clear: ClearPolicy,
        flip_index: u64,
        tracer: &mut Tracer<'_>,
    ) -> Result<()> {
        let record = self.surfaces.get(s)?;
        let buffers = record.buffers;
        let stereo = record.stereo;
        let preflip_done = record.preflip_done;
        let save = clear == ClearPolicy::PreserveContent && !record.content_saved;
        let flush = !record.flush_done;
        let views = stereo.view_count();

        if !preflip_done {
            let bindings = StageBindings {
                source: buffers.draw(0),
                source2: (views > 1).then(|| buffers.draw(1)),
                dest: buffers.draw(0),
            };
            self.traced_point(s, HookPoint::UserspaceBufferDrawingFinished, 0, bindings, flip_index, tracer)?;
        }
        if save {
            for v in 0..views {
                let bindings = StageBindings::new(buffers.draw(v), buffers.saved(v));
                self.traced_point(s, HookPoint::IdentityBlit, v, bindings, flip_index, tracer)?;
            }
            self.surfaces.get_mut(s)?.content_saved = true;
        }
        if !preflip_done {
            self.compose(s, &buffers, stereo, flip_index, tracer)?;
            self.surfaces.get_mut(s)?.preflip_done = true;
        }
        if flush {
            self.backend.flush(s).map_err(device(s))?;
            self.surfaces.get_mut(s)?.flush_done = true;
        }
        Ok(())
    }

    /// Runs the per-view image pipeline from draw buffers to backbuffers.
    fn compose(
        &mut self,
        s: SurfaceHandle,
        buffers: &SurfaceBuffers,
        stereo: StereoMode,
        flip_index: u64,
        tracer: &mut Tracer<'_>,
    ) -> Result<()> {
        for v in 0..stereo.view_count() {
            let point = if v == 0 {
                HookPoint::StereoLeftCompositingBlit
            } else {
                HookPoint::StereoRightCompositingBlit
            };
            let bindings = StageBindings::new(buffers.draw(v), buffers.processed(v));
            self.traced_point(s, point, v, bindings, flip_index, tracer)?;
        }

        let outputs: Vec<_> = if stereo.needs_merge() {
            let composite = buffers.get(crate::surface::BufferRole::Composite);
            let bindings = StageBindings::pair(buffers.processed(0), buffers.processed(1), composite);
            self.traced_point(s, HookPoint::StereoCompositingBlit, 0, bindings, flip_index, tracer)?;
            vec![composite]
        } else {
            (0..stereo.output_count()).map(|v| buffers.processed(v)).collect()
        };

        for (v, image) in outputs.into_iter().enumerate() {
            let post = StageBindings::new(image, buffers.post(v));
            self.traced_point(s, HookPoint::PostCompositingBlit, v, post, flip_index, tracer)?;
            let out = StageBindings::new(buffers.post(v), buffers.backbuffer(v));
            self.traced_point(s, HookPoint::FinalOutputFormattingBlit, v, out, flip_index, tracer)?;
            let finalizer = if v == 0 {
                HookPoint::LeftFinalizerBlit
            } else {
                HookPoint::RightFinalizerBlit
            };
            let fin = StageBindings::new(buffers.backbuffer(v), buffers.backbuffer(v));
            self.traced_point(s, finalizer, v, fin, flip_index, tracer)?;
        }
        Ok(())
    }

    fn swap_and_measure(
        &mut self,
        request: &FlipRequest,
        participants: &[SurfaceHandle],
        started: HostTime,
        flip_index: u64,
        summary: &mut FlipSummaryBuilder,
        tracer: &mut Tracer<'_>,
    ) -> Result<Vec<FlipTiming>> {
        let mut timings = vec![FlipTiming::unobserved(); participants.len()];
        let Some((&master, slaves)) = participants.split_first() else {
            return Ok(timings);
        };

        if request.multi == MultiFlipMode::BlockMaster {
            self.issue_swap(master, SwapMode::Synced, flip_index, tracer)?;
            summary.enter(FlipPhase::PostSwapMeasuring, self.clock.now());
            self.set_phase(master, FlipPhase::PostSwapMeasuring, flip_index, tracer)?;
            if let Some(slot) = timings.first_mut() {
                *slot = self.measure(master, request, started)?;
            }
            for &s in slaves {
                self.issue_swap(s, SwapMode::Immediate, flip_index, tracer)?;
                self.set_phase(s, FlipPhase::PostSwapMeasuring, flip_index, tracer)?;
            }
            return Ok(timings);
        }

        let mode = request.sync.swap_mode();
        for &s in participants {
            self.issue_swap(s, mode, flip_index, tracer)?;
        }
        summary.enter(FlipPhase::PostSwapMeasuring, self.clock.now());
        for (&s, slot) in participants.iter().zip(timings.iter_mut()) {
            self.set_phase(s, FlipPhase::PostSwapMeasuring, flip_index, tracer)?;
            if request.sync.is_blocking() {
                *slot = self.measure(s, request, started)?;
            }
        }
        Ok(timings)
    }

    fn issue_swap(
        &mut self,
        s: SurfaceHandle,
        mode: SwapMode,
        flip_index: u64,
        tracer: &mut Tracer<'_>,
    ) -> Result<()> {
        let buffers = self.surfaces.get(s)?.buffers;
        let issued_at = self.clock.now();
        self.backend.swap(s, &buffers, mode).map_err(device(s))?;
        tracer.swap(&SwapEvent {
            flip_index,
            surface: s,
            mode,
            issued_at,
        });
        Ok(())
    }

    /// Waits for the swap of `s` to complete and computes the verdict.
    fn measure(
        &mut self,
        s: SurfaceHandle,
        request: &FlipRequest,
        started: HostTime,
    ) -> Result<FlipTiming> {
        let stamp = if request.sync == SyncMode::SpinWait {
            loop {
                if let Some(stamp) = self.backend.poll_swap(s).map_err(device(s))? {
                    break stamp;
                }
                core::hint::spin_loop();
            }
        } else {
            self.backend.wait_for_swap(s).map_err(device(s))?
        };
        self.verdict(s, request, started, stamp)
    }

    /// Timing of a completed swap, judged against the request's deadline.
    fn verdict(
        &self,
        s: SurfaceHandle,
        request: &FlipRequest,
        started: HostTime,
        stamp: SwapStamp,
    ) -> Result<FlipTiming> {
        let completed = self.clock.now();
        let beam = self.clock.beam_position(s);

        let state = &self.surfaces.get(s)?.timing;
        let deadline = timing::deadline(
            request.when.unwrap_or(started),
            state.last_vbl,
            state.estimator.current(),
            self.config.slack(beam.is_some()),
        );
        Ok(FlipTiming {
            vbl: Some(stamp.vbl),
            onset: Some(stamp.onset.unwrap_or(stamp.vbl)),
            completed: Some(completed),
            miss: Some(stamp.vbl.offset_from(deadline)),
            beam,
        })
    }

    /// Records the verdict, then restores or clears the draw buffers and runs
    /// the drawing-prepare chain.
    fn finish(
        &mut self,
        s: SurfaceHandle,
        clear: ClearPolicy,
        timing: &FlipTiming,
        flip_index: u64,
        tracer: &mut Tracer<'_>,
    ) -> Result<()> {
        let timebase = self.clock.timebase();
        let record = self.surfaces.get_mut(s)?;
        let outcome = match (timing.vbl, timing.miss) {
            (Some(vbl), Some(miss)) => {
                if record.timing.record(vbl, miss) {
                    tracing::warn!(
                        surface = ?s,
                        flip = flip_index,
                        miss_secs = miss.as_secs_f64(timebase),
                        "flip missed its deadline"
                    );
                }
                if timing.missed() {
                    FlipPhase::Missed
                } else {
                    FlipPhase::Completed
                }
            }
            _ => {
                record.timing.record_unobserved();
                FlipPhase::Completed
            }
        };
        let buffers = record.buffers;
        let views = record.stereo.view_count();
        let color = record.clear_color;

        match clear {
            ClearPolicy::PreserveContent => {
                // Saved content already went through the identity chain.
                for v in 0..views {
                    self.backend
                        .copy_buffer(s, buffers.saved(v), buffers.draw(v))
                        .map_err(device(s))?;
                }
            }
            ClearPolicy::ClearAfterFlip => {
                for v in 0..views {
                    self.backend
                        .clear_buffer(s, buffers.draw(v), color)
                        .map_err(device(s))?;
                }
            }
            ClearPolicy::LeaveUndefined => {}
        }
        let draw = buffers.draw(0);
        self.traced_point(
            s,
            HookPoint::UserspaceBufferDrawingPrepare,
            0,
            StageBindings::new(draw, draw),
            flip_index,
            tracer,
        )?;

        let record = self.surfaces.get_mut(s)?;
        record.reset_cycle();
        record.last_flip = Some(*timing);
        record.phase = outcome;
        tracing::debug!(
            surface = ?s,
            flip = flip_index,
            vbl = ?timing.vbl,
            miss = ?timing.miss,
            ?outcome,
            "flip finished"
        );
        self.emit_phase(s, outcome, flip_index, tracer);
        Ok(())
    }

    /// Puts the participants back at the start of a cycle after a failure.
    fn abort_cycle(
        &mut self,
        participants: &[SurfaceHandle],
        err: &Error,
        flip_index: u64,
        tracer: &mut Tracer<'_>,
    ) {
        let failed = match err {
            Error::Device { surface, .. } => Some(*surface),
            _ => None,
        };
        for &s in participants {
            let Ok(record) = self.surfaces.get_mut(s) else {
                continue;
            };
            record.reset_cycle();
            if failed.is_none_or(|f| f == s) {
                record.phase = FlipPhase::Failed;
                record.stale = true;
                self.emit_phase(s, FlipPhase::Failed, flip_index, tracer);
            } else {
                record.phase = FlipPhase::Idle;
            }
        }
        tracing::error!(flip = flip_index, surface = ?failed, error = %err, "flip failed");
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn set_phase(
        &mut self,
        s: SurfaceHandle,
        phase: FlipPhase,
        flip_index: u64,
        tracer: &mut Tracer<'_>,
    ) -> Result<()> {
        self.surfaces.get_mut(s)?.phase = phase;
        self.emit_phase(s, phase, flip_index, tracer);
        Ok(())
    }

    fn emit_phase(&self, s: SurfaceHandle, phase: FlipPhase, flip_index: u64, tracer: &mut Tracer<'_>) {
        tracer.phase(&PhaseEvent {
            flip_index,
            surface: s,
            phase,
            timestamp: self.clock.now(),
        });
    }

    fn traced_point(
        &mut self,
        s: SurfaceHandle,
        point: HookPoint,
        view: usize,
        bindings: StageBindings,
        flip_index: u64,
        tracer: &mut Tracer<'_>,
    ) -> Result<StageBindings> {
        let stages = self.surfaces.get(s)?.hooks.chain(point).active().count();
        let started = self.clock.now();
        let out = self.run_point(s, point, view, bindings)?;
        tracer.hook_run(&HookRunEvent {
            flip_index,
            surface: s,
            point,
            stages,
            started,
            finished: self.clock.now(),
        });
        Ok(out)
    }
}

fn device(surface: SurfaceHandle) -> impl Fn(BackendError) -> Error {
    move |source| Error::Device {
        surface,
        point: None,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_modes() {
        assert_eq!(SyncMode::from_code(0), Some(SyncMode::FullSync), "0 is full sync");
        assert_eq!(SyncMode::from_code(3), Some(SyncMode::SpinWait), "3 spins");
        assert_eq!(SyncMode::from_code(4), None, "out of range");
        assert_eq!(MultiFlipMode::from_code(2), Some(MultiFlipMode::BlockMaster), "2 is block master");
        assert_eq!(MultiFlipMode::from_code(-1), None, "negative");
    }

    #[test]
    fn blocking_modes() {
        assert!(SyncMode::FullSync.is_blocking(), "full sync blocks");
        assert!(SyncMode::SpinWait.is_blocking(), "spin wait blocks");
        assert!(!SyncMode::QueueOnly.is_blocking(), "queue returns");
        assert_eq!(SyncMode::QueueOnly.swap_mode(), SwapMode::Synced, "queued swaps stay synced");
        assert_eq!(SyncMode::Immediate.swap_mode(), SwapMode::Immediate, "tearing swap");
    }

    #[test]
    fn request_builder() {
        let s = SurfaceHandle::from_raw(1, 0);
        let r = FlipRequest::new(s)
            .at(HostTime(5))
            .with_clear(ClearPolicy::PreserveContent)
            .with_multi(MultiFlipMode::BlockEach);
        assert_eq!(r.when, Some(HostTime(5)), "target set");
        assert_eq!(r.sync, SyncMode::FullSync, "default sync");
        assert_eq!(r.clear, ClearPolicy::PreserveContent, "clear set");
        assert!(FlipPhase::Missed.is_terminal() && !FlipPhase::Waiting.is_terminal(), "terminal phases");
    }
}
