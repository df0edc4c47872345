// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic host time, durations, and signed offsets.
//!
//! [`HostTime`] is a point on the clock source's monotonic timeline, counted
//! in clock-native ticks. [`Timebase`] converts ticks to nanoseconds with a
//! rational factor (`nanos = ticks * numer / denom`), so a clock that already
//! counts nanoseconds uses [`Timebase::NANOS`].
//!
//! [`Duration`] is an unsigned tick count and [`Offset`] a signed one. The
//! flip scheduler reports its miss estimate as an [`Offset`]: negative values
//! are headroom, positive values are overshoot.
//!
//! Conversions to and from floating-point seconds exist only for the
//! scripting boundary, which speaks seconds.

use core::fmt;
use core::ops::{Add, Sub};

/// A point in time expressed as clock-native monotonic ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(pub u64);

impl HostTime {
    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Returns the duration between `self` and an earlier time, or zero if
    /// `earlier` is after `self`.
    #[inline]
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    /// Returns the signed distance `self - other`.
    ///
    /// Saturates at the `i64` range.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, other: Self) -> Offset {
        let wide = self.0 as i128 - other.0 as i128;
        if wide > i64::MAX as i128 {
            Offset(i64::MAX)
        } else if wide < i64::MIN as i128 {
            Offset(i64::MIN)
        } else {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "range checked against i64 bounds above"
            )]
            Offset(wide as i64)
        }
    }

    /// Checked addition of a duration.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, duration: Duration) -> Option<Self> {
        match self.0.checked_add(duration.0) {
            Some(t) => Some(Self(t)),
            None => None,
        }
    }

    /// Saturating addition of a duration.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.0))
    }

    /// Converts this time to seconds on the clock's timeline.
    #[must_use]
    pub fn as_secs_f64(self, timebase: Timebase) -> f64 {
        timebase.ticks_to_nanos(self.0) as f64 / NANOS_PER_SECOND
    }

    /// Creates a time from seconds on the clock's timeline.
    ///
    /// Negative and non-finite inputs clamp to zero.
    #[must_use]
    pub fn from_secs_f64(secs: f64, timebase: Timebase) -> Self {
        Self(timebase.nanos_to_ticks(secs_to_nanos(secs)))
    }
}

impl Add<Duration> for HostTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub<Duration> for HostTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Duration) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Debug for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTime({})", self.0)
    }
}

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

fn secs_to_nanos(secs: f64) -> u64 {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    let nanos = secs * NANOS_PER_SECOND;
    if nanos >= u64::MAX as f64 {
        u64::MAX
    } else {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "range checked against u64 bounds above"
        )]
        {
            nanos as u64
        }
    }
}

/// Rational conversion factor from ticks to nanoseconds.
///
/// `nanoseconds = ticks * numer / denom`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timebase {
    /// Numerator of the ticks-to-nanoseconds ratio.
    pub numer: u32,
    /// Denominator of the ticks-to-nanoseconds ratio.
    pub denom: u32,
}

impl Timebase {
    /// A timebase where ticks are already nanoseconds (1:1).
    pub const NANOS: Self = Self { numer: 1, denom: 1 };

    /// Creates a new timebase with the given numerator and denominator.
    ///
    /// # Panics
    ///
    /// Panics if `denom` or `numer` is zero.
    #[inline]
    #[must_use]
    pub const fn new(numer: u32, denom: u32) -> Self {
        assert!(denom != 0, "timebase denominator must not be zero");
        assert!(numer != 0, "timebase numerator must not be zero");
        Self { numer, denom }
    }

    /// Converts a tick count to nanoseconds.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; truncation back to u64 is intentional"
    )]
    pub const fn ticks_to_nanos(self, ticks: u64) -> u64 {
        let wide = ticks as u128 * self.numer as u128 / self.denom as u128;
        wide as u64
    }

    /// Converts nanoseconds to a tick count.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; truncation back to u64 is intentional"
    )]
    pub const fn nanos_to_ticks(self, nanos: u64) -> u64 {
        let wide = nanos as u128 * self.denom as u128 / self.numer as u128;
        wide as u64
    }
}

impl fmt::Debug for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timebase({}/{})", self.numer, self.denom)
    }
}

/// A duration in clock-native ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Duration(pub u64);

impl Duration {
    /// A zero-length duration.
    pub const ZERO: Self = Self(0);

    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Creates a duration from nanoseconds.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64, timebase: Timebase) -> Self {
        Self(timebase.nanos_to_ticks(nanos))
    }

    /// Creates a duration from seconds. Negative input clamps to zero.
    #[must_use]
    pub fn from_secs_f64(secs: f64, timebase: Timebase) -> Self {
        Self(timebase.nanos_to_ticks(secs_to_nanos(secs)))
    }

    /// Converts this duration to seconds.
    #[must_use]
    pub fn as_secs_f64(self, timebase: Timebase) -> f64 {
        timebase.ticks_to_nanos(self.0) as f64 / NANOS_PER_SECOND
    }

    /// Multiplies by a non-negative factor, rounding to the nearest tick.
    #[must_use]
    pub fn mul_f64(self, factor: f64) -> Self {
        let scaled = self.0 as f64 * factor;
        if !scaled.is_finite() || scaled <= 0.0 {
            Self::ZERO
        } else if scaled >= u64::MAX as f64 {
            Self(u64::MAX)
        } else {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "range checked against u64 bounds above"
            )]
            Self(round_half_up(scaled) as u64)
        }
    }

    /// Saturating addition.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

/// Rounds a non-negative value to the nearest integer, halves up.
///
/// `f64::round` needs `std`.
pub(crate) fn round_half_up(x: f64) -> f64 {
    let floor = x - (x % 1.0);
    if x - floor >= 0.5 { floor + 1.0 } else { floor }
}

impl Add for Duration {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Duration {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({})", self.0)
    }
}

/// A signed tick distance between two [`HostTime`]s.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Offset(pub i64);

impl Offset {
    /// Returns the raw signed tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> i64 {
        self.0
    }

    /// Whether the offset is strictly positive.
    #[inline]
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Converts to signed seconds.
    #[must_use]
    pub fn as_secs_f64(self, timebase: Timebase) -> f64 {
        let magnitude = timebase.ticks_to_nanos(self.0.unsigned_abs()) as f64 / NANOS_PER_SECOND;
        if self.0 < 0 { -magnitude } else { magnitude }
    }
}

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_round_trip_identity_timebase() {
        let tb = Timebase::NANOS;
        let t = HostTime::from_secs_f64(1.5, tb);
        assert_eq!(t, HostTime(1_500_000_000), "1.5 s in nanosecond ticks");
        assert!(
            (t.as_secs_f64(tb) - 1.5).abs() < 1e-9,
            "seconds conversion should round-trip"
        );
    }

    #[test]
    fn seconds_conversion_with_coarse_ticks() {
        // 24 MHz counter: 125/3 ns per tick.
        let tb = Timebase::new(125, 3);
        let one_second = Duration::from_secs_f64(1.0, tb);
        assert_eq!(one_second.ticks(), 24_000_000, "24 MHz → 1 s");
    }

    #[test]
    fn negative_seconds_clamp_to_zero() {
        assert_eq!(
            HostTime::from_secs_f64(-3.0, Timebase::NANOS),
            HostTime(0),
            "negative times clamp"
        );
        assert_eq!(
            Duration::from_secs_f64(f64::NAN, Timebase::NANOS),
            Duration::ZERO,
            "NaN durations clamp"
        );
    }

    #[test]
    fn offset_is_signed() {
        let early = HostTime(1_000);
        let late = HostTime(1_600);
        assert_eq!(late.offset_from(early), Offset(600), "positive distance");
        assert_eq!(early.offset_from(late), Offset(-600), "negative distance");
        assert!(
            (early.offset_from(late).as_secs_f64(Timebase::NANOS) + 600e-9).abs() < 1e-15,
            "signed seconds"
        );
    }

    #[test]
    fn offset_saturates() {
        assert_eq!(
            HostTime(u64::MAX).offset_from(HostTime(0)),
            Offset(i64::MAX),
            "saturates at i64::MAX"
        );
    }

    #[test]
    fn duration_scaling_rounds() {
        let ifi = Duration(16_666_667);
        assert_eq!(ifi.mul_f64(1.2), Duration(20_000_000), "1.2 × IFI");
        assert_eq!(ifi.mul_f64(0.0), Duration::ZERO, "zero factor");
        assert_eq!(Duration(3).mul_f64(0.5), Duration(2), "half rounds up");
    }

    #[test]
    fn host_time_duration_ops() {
        let t = HostTime(1000);
        let d = Duration(200);
        assert_eq!((t + d).ticks(), 1200, "add");
        assert_eq!((t - d).ticks(), 800, "sub");
        assert_eq!(t.saturating_duration_since(HostTime(1500)), Duration::ZERO, "saturating");
        assert_eq!(HostTime(u64::MAX).saturating_add(d), HostTime(u64::MAX), "saturating add");
    }
}
