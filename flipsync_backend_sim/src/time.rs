// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host clock reads for the real-time mode.

use rustix::time::{ClockId, Timespec, clock_gettime};

use flipsync_core::backend::Clock;
use flipsync_core::time::{HostTime, Timebase};

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// `CLOCK_MONOTONIC` in nanosecond ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> HostTime {
        now()
    }

    fn timebase(&self) -> Timebase {
        Timebase::NANOS
    }

    fn sleep_until(&mut self, deadline: HostTime) {
        sleep_until(deadline);
    }
}

/// Current monotonic host time in nanoseconds.
#[must_use]
pub fn now() -> HostTime {
    timespec_to_host_time(clock_gettime(ClockId::Monotonic))
}

/// Sleeps until the monotonic clock reaches `deadline`.
pub fn sleep_until(deadline: HostTime) {
    let remaining = deadline.saturating_duration_since(now());
    if remaining.ticks() > 0 {
        std::thread::sleep(std::time::Duration::from_nanos(remaining.ticks()));
    }
}

fn timespec_to_host_time(timespec: Timespec) -> HostTime {
    let seconds = u64::try_from(timespec.tv_sec).unwrap_or(0);
    let nanos = u64::try_from(timespec.tv_nsec)
        .unwrap_or(0)
        .min(999_999_999);

    let ticks = u128::from(seconds)
        .saturating_mul(NANOS_PER_SECOND)
        .saturating_add(u128::from(nanos));
    HostTime(u64::try_from(ticks).unwrap_or(u64::MAX))
}
