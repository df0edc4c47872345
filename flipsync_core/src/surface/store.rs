// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generational slot table holding every open surface.

use alloc::vec::Vec;

use super::SurfaceRecord;
use super::id::SurfaceHandle;
use crate::error::{Error, Result};

#[derive(Debug)]
struct Slot {
    generation: u32,
    record: Option<SurfaceRecord>,
}

/// Storage for all open surfaces.
///
/// The table is the single source of truth for handle validity. Closed slots
/// go on a free list; their generation is bumped on close so stale handles
/// fail with [`Error::InvalidHandle`].
#[derive(Debug, Default)]
pub struct SurfaceTable {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
}

impl SurfaceTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open surfaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    /// Whether no surface is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `handle` names an open surface.
    #[must_use]
    pub fn is_alive(&self, handle: SurfaceHandle) -> bool {
        self.slots
            .get(handle.idx as usize)
            .is_some_and(|s| s.generation == handle.generation && s.record.is_some())
    }

    /// Live handles in slot order.
    pub fn handles(&self) -> impl Iterator<Item = SurfaceHandle> + '_ {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| {
            slot.record.as_ref()?;
            Some(SurfaceHandle {
                idx: u32::try_from(idx).ok()?,
                generation: slot.generation,
            })
        })
    }

    pub(crate) fn insert(&mut self, record: SurfaceRecord) -> Result<SurfaceHandle> {
        if let Some(idx) = self.free_list.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.record = Some(record);
            return Ok(SurfaceHandle {
                idx,
                generation: slot.generation,
            });
        }
        let idx = u32::try_from(self.slots.len()).map_err(|_| Error::Resource("opening a surface"))?;
        self.slots
            .try_reserve(1)
            .map_err(|_| Error::Resource("opening a surface"))?;
        self.slots.push(Slot {
            generation: 0,
            record: Some(record),
        });
        Ok(SurfaceHandle { idx, generation: 0 })
    }

    pub(crate) fn remove(&mut self, handle: SurfaceHandle) -> Result<SurfaceRecord> {
        let slot = self
            .slots
            .get_mut(handle.idx as usize)
            .filter(|s| s.generation == handle.generation)
            .ok_or(Error::InvalidHandle(handle))?;
        let record = slot.record.take().ok_or(Error::InvalidHandle(handle))?;
        // Bump generation so old handles immediately fail validation.
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.idx);
        Ok(record)
    }

    pub(crate) fn get(&self, handle: SurfaceHandle) -> Result<&SurfaceRecord> {
        self.slots
            .get(handle.idx as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.record.as_ref())
            .ok_or(Error::InvalidHandle(handle))
    }

    pub(crate) fn get_mut(&mut self, handle: SurfaceHandle) -> Result<&mut SurfaceRecord> {
        self.slots
            .get_mut(handle.idx as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.record.as_mut())
            .ok_or(Error::InvalidHandle(handle))
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut SurfaceRecord> + '_ {
        self.slots.iter_mut().filter_map(|s| s.record.as_mut())
    }
}
