// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounded log of completed presentations.

use std::collections::VecDeque;

use flipsync_core::backend::SwapMode;
use flipsync_core::surface::SurfaceHandle;
use flipsync_core::time::HostTime;

/// One swap that reached the screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresentRecord {
    /// Monotonic sequence number across all surfaces.
    pub seq: u64,
    /// Surface that presented.
    pub surface: SurfaceHandle,
    /// Synced or immediate.
    pub mode: SwapMode,
    /// When the image reached the screen (the VBL for synced swaps).
    pub at: HostTime,
    /// Content of each presented view, left first.
    pub views: Vec<Vec<String>>,
}

/// FIFO of [`PresentRecord`]s with a `drop_oldest` overflow policy.
///
/// Once full, new pushes remove the oldest record before inserting the
/// newest, so the most recent presentations stay inspectable.
#[derive(Clone, Debug)]
pub struct PresentLog {
    items: VecDeque<PresentRecord>,
    capacity: usize,
    dropped: u64,
}

impl PresentLog {
    /// Default capacity.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Creates a log holding at most `capacity` records. `0` is promoted to
    /// `1`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub(crate) fn push(&mut self, record: PresentRecord) {
        if self.items.len() == self.capacity {
            _ = self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back(record);
    }

    /// Records currently held, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PresentRecord> + '_ {
        self.items.iter()
    }

    /// Removes and returns every held record.
    pub fn drain(&mut self) -> Vec<PresentRecord> {
        self.items.drain(..).collect()
    }

    /// Number of held records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Records dropped because the log was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

impl Default for PresentLog {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}
