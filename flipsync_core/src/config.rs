// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine configuration.

/// An RGBA clear color with components in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClearColor {
    /// Red.
    pub r: f32,
    /// Green.
    pub g: f32,
    /// Blue.
    pub b: f32,
    /// Alpha.
    pub a: f32,
}

impl ClearColor {
    /// Opaque black.
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    /// Opaque white.
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);

    /// Creates a color from components.
    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for ClearColor {
    fn default() -> Self {
        Self::BLACK
    }
}

/// Tunables for [`PresentationEngine`](crate::PresentationEngine).
///
/// The defaults ([`EngineConfig::new`]) match what a stimulus-presentation
/// setup expects on ordinary hardware. [`EngineConfig::strict`] tightens the
/// miss verdict.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Deadline slack, in refresh intervals, when the clock reports beam
    /// positions.
    pub slack_with_beam: f64,
    /// Deadline slack, in refresh intervals, without beam positions.
    pub slack_without_beam: f64,
    /// Flip targets further than this many seconds in the future are rejected.
    pub max_future_secs: f64,
    /// Smoothing factor for the refresh-interval estimator (`0.0..=1.0`).
    pub refresh_alpha: f64,
    /// Consecutive VBL deltas further than this fraction from the current
    /// estimate are treated as skipped frames and ignored by the estimator.
    pub refresh_tolerance: f64,
    /// Clear color given to newly opened surfaces that do not specify one.
    pub default_clear_color: ClearColor,
}

impl EngineConfig {
    /// Default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slack_with_beam: 1.05,
            slack_without_beam: 1.2,
            max_future_secs: 1000.0,
            refresh_alpha: 0.1,
            refresh_tolerance: 0.2,
            default_clear_color: ClearColor::BLACK,
        }
    }

    /// Tighter slack for setups with reliable beam-position queries.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            slack_with_beam: 1.0,
            slack_without_beam: 1.05,
            refresh_tolerance: 0.05,
            ..Self::new()
        }
    }

    /// Returns the slack factor to use for the given beam capability.
    #[must_use]
    pub const fn slack(&self, has_beam: bool) -> f64 {
        if has_beam {
            self.slack_with_beam
        } else {
            self.slack_without_beam
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
