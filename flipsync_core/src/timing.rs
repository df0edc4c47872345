// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flip timing results, the miss-estimate rule, and refresh estimation.
//!
//! # Miss estimate
//!
//! The verdict compares the observed VBL timestamp against an inferred
//! deadline:
//!
//! 1. Start from the requested target, or the flip's start time when none
//!    was given.
//! 2. If a previous VBL and a refresh interval are known, snap that time back
//!    onto the VBL grid: `last_vbl + floor((t - last_vbl) / ifi) * ifi`.
//! 3. Add `slack × ifi`, where slack is
//!    [`EngineConfig::slack`](crate::config::EngineConfig::slack) (1.05 with
//!    beam positions, 1.2 without).
//!
//! `miss = vbl - deadline`. A positive value means the flip landed at least
//! one refresh later than it could have. The rule is a best-effort
//! diagnostic: scheduler jitter right at the slack boundary can flip the
//! verdict either way.

use crate::time::{Duration, HostTime, Offset, Timebase, round_half_up};

/// What one flip observed.
///
/// Timestamps that were not observed (queued or unsynchronized flips) are
/// `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlipTiming {
    /// Start of the vertical blank in which the flip took effect.
    pub vbl: Option<HostTime>,
    /// When scanout of the new image began.
    pub onset: Option<HostTime>,
    /// When the engine saw the flip complete.
    pub completed: Option<HostTime>,
    /// `vbl - deadline`; positive means the deadline was missed.
    pub miss: Option<Offset>,
    /// Beam position sampled right after completion.
    pub beam: Option<i32>,
}

impl FlipTiming {
    /// Result for a flip whose completion was not observed.
    #[must_use]
    pub const fn unobserved() -> Self {
        Self {
            vbl: None,
            onset: None,
            completed: None,
            miss: None,
            beam: None,
        }
    }

    /// Whether the miss estimate is positive.
    #[must_use]
    pub fn missed(&self) -> bool {
        self.miss.is_some_and(Offset::is_positive)
    }

    /// Whether completion was observed.
    #[must_use]
    pub const fn is_observed(&self) -> bool {
        self.vbl.is_some()
    }
}

/// Computes the inferred deadline for a flip.
///
/// `reference` is the requested target, or the flip's start time.
#[must_use]
pub fn deadline(
    reference: HostTime,
    last_vbl: Option<HostTime>,
    refresh: Option<Duration>,
    slack: f64,
) -> HostTime {
    let Some(ifi) = refresh.filter(|d| d.ticks() > 0) else {
        return reference;
    };
    let snapped = match last_vbl {
        Some(last) if reference > last => {
            let elapsed = reference.saturating_duration_since(last).ticks();
            let whole = elapsed / ifi.ticks();
            last.saturating_add(Duration(whole.saturating_mul(ifi.ticks())))
        }
        _ => reference,
    };
    snapped.saturating_add(ifi.mul_f64(slack))
}

// ---------------------------------------------------------------------------
// Refresh estimation
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
struct Ema {
    value: f64,
    alpha: f64,
    initialized: bool,
}

impl Ema {
    const fn new(alpha: f64) -> Self {
        Self {
            value: 0.0,
            alpha,
            initialized: false,
        }
    }

    fn update(&mut self, sample: f64) {
        if self.initialized {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        } else {
            self.value = sample;
            self.initialized = true;
        }
    }

    fn get(&self) -> Option<f64> {
        self.initialized.then_some(self.value)
    }
}

/// Refines the refresh interval from consecutive VBL timestamps.
///
/// Deltas are divided by the nearest whole number of nominal intervals so a
/// skipped frame does not inflate the estimate. Deltas that do not sit near a
/// whole multiple are discarded.
#[derive(Clone, Copy, Debug)]
pub struct RefreshEstimator {
    nominal: Option<Duration>,
    ema: Ema,
    tolerance: f64,
    samples: u64,
}

impl RefreshEstimator {
    /// Creates an estimator seeded with the backend's nominal interval.
    #[must_use]
    pub const fn new(nominal: Option<Duration>, alpha: f64, tolerance: f64) -> Self {
        Self {
            nominal,
            ema: Ema::new(alpha),
            tolerance,
            samples: 0,
        }
    }

    /// Feeds one VBL-to-VBL delta.
    pub fn observe(&mut self, delta: Duration) {
        let Some(reference) = self.current() else {
            self.ema.update(delta.ticks() as f64);
            self.samples += 1;
            return;
        };
        let reference = reference.ticks() as f64;
        if reference <= 0.0 {
            return;
        }
        let ratio = delta.ticks() as f64 / reference;
        let frames = round_half_up(ratio);
        if frames < 1.0 || (ratio - frames).abs() > self.tolerance {
            return;
        }
        self.ema.update(delta.ticks() as f64 / frames);
        self.samples += 1;
    }

    /// Current estimate, falling back to the nominal interval.
    #[must_use]
    pub fn current(&self) -> Option<Duration> {
        match self.ema.get() {
            Some(v) => Some(Duration(1).mul_f64(v)),
            None => self.nominal,
        }
    }

    /// Number of deltas accepted so far.
    #[must_use]
    pub const fn samples(&self) -> u64 {
        self.samples
    }

    /// Replaces the nominal interval and forgets learned samples.
    pub fn reset(&mut self, nominal: Option<Duration>) {
        *self = Self::new(nominal, self.ema.alpha, self.tolerance);
    }
}

// ---------------------------------------------------------------------------
// Per-surface state
// ---------------------------------------------------------------------------

/// Timing bookkeeping kept on each surface.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TimingState {
    /// VBL of the last synchronized flip. Cleared by unsynchronized flips and
    /// by revalidation.
    pub(crate) last_vbl: Option<HostTime>,
    pub(crate) estimator: RefreshEstimator,
    pub(crate) flips: u64,
    pub(crate) missed: u64,
}

impl Default for TimingState {
    fn default() -> Self {
        Self::new(None, 0.1, 0.2)
    }
}

impl TimingState {
    pub(crate) const fn new(nominal: Option<Duration>, alpha: f64, tolerance: f64) -> Self {
        Self {
            last_vbl: None,
            estimator: RefreshEstimator::new(nominal, alpha, tolerance),
            flips: 0,
            missed: 0,
        }
    }

    /// Records an observed flip and returns whether it counts as a miss.
    ///
    /// The first flip after open or after an unsynchronized flip has no
    /// previous VBL and is never counted.
    pub(crate) fn record(&mut self, vbl: HostTime, miss: Offset) -> bool {
        let counted = self.last_vbl.is_some() && miss.is_positive();
        if let Some(last) = self.last_vbl
            && vbl > last
        {
            self.estimator.observe(vbl.saturating_duration_since(last));
        }
        self.last_vbl = Some(vbl);
        self.flips += 1;
        if counted {
            self.missed += 1;
        }
        counted
    }

    /// Records a flip whose completion was not observed.
    pub(crate) fn record_unobserved(&mut self) {
        self.last_vbl = None;
        self.flips += 1;
    }

    pub(crate) fn stats(&self, timebase: Timebase) -> FlipStats {
        FlipStats {
            flips: self.flips,
            missed: self.missed,
            refresh: self.estimator.current(),
            refresh_secs: self.estimator.current().map(|d| d.as_secs_f64(timebase)),
            last_vbl: self.last_vbl,
        }
    }
}

/// Per-surface flip statistics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlipStats {
    /// Flips attempted successfully since open.
    pub flips: u64,
    /// Flips counted as missed.
    pub missed: u64,
    /// Current refresh-interval estimate.
    pub refresh: Option<Duration>,
    /// Same estimate in seconds.
    pub refresh_secs: Option<f64>,
    /// VBL of the last synchronized flip.
    pub last_vbl: Option<HostTime>,
}
