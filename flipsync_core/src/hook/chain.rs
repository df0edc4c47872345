// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ordered, tagged stage lists and the per-surface table of them.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;

use super::{HookPoint, HookStage, InsertPosition, StageInfo, StageSelector};

/// A stage together with its chain attributes.
#[derive(Clone, Debug)]
pub struct HookEntry {
    /// Unique tag within the chain.
    pub tag: String,
    /// The stage itself.
    pub stage: HookStage,
    /// Whether the stage runs.
    pub enabled: bool,
}

/// Chain edit failures, mapped to [`Error`](crate::Error) by the engine
/// which knows the surface and point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ChainError {
    DuplicateTag(String),
    NotFound(String),
    OutOfMemory,
}

/// The stages attached at one hook point.
#[derive(Clone, Debug)]
pub struct HookChain {
    entries: Vec<HookEntry>,
    enabled: bool,
}

impl Default for HookChain {
    fn default() -> Self {
        Self::new()
    }
}

impl HookChain {
    /// An empty, enabled chain.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            enabled: true,
        }
    }

    /// Number of stages, enabled or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the chain is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enabled and holding at least one enabled stage.
    #[must_use]
    pub fn is_operational(&self) -> bool {
        self.enabled && self.entries.iter().any(|e| e.enabled)
    }

    /// Stages in execution order.
    #[must_use]
    pub fn entries(&self) -> &[HookEntry] {
        &self.entries
    }

    /// Enabled stages in execution order, or nothing if the chain is off.
    pub fn active(&self) -> impl Iterator<Item = &HookEntry> + '_ {
        let take = if self.enabled { self.entries.len() } else { 0 };
        self.entries[..take].iter().filter(|e| e.enabled)
    }

    /// Position of the stage with `tag`.
    #[must_use]
    pub fn position(&self, tag: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.tag == tag)
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn insert(
        &mut self,
        tag: String,
        stage: HookStage,
        at: &InsertPosition,
    ) -> Result<usize, ChainError> {
        if self.position(&tag).is_some() {
            return Err(ChainError::DuplicateTag(tag));
        }
        let idx = match at {
            InsertPosition::Prepend => 0,
            InsertPosition::Append => self.entries.len(),
            InsertPosition::Before(anchor) => self
                .position(anchor)
                .ok_or_else(|| ChainError::NotFound(anchor.clone()))?,
            InsertPosition::After(anchor) => {
                self.position(anchor)
                    .ok_or_else(|| ChainError::NotFound(anchor.clone()))?
                    + 1
            }
            InsertPosition::At(i) => (*i).min(self.entries.len()),
        };
        self.entries
            .try_reserve(1)
            .map_err(|_| ChainError::OutOfMemory)?;
        self.entries.insert(
            idx,
            HookEntry {
                tag,
                stage,
                enabled: true,
            },
        );
        Ok(idx)
    }

    pub(crate) fn resolve(&self, selector: &StageSelector) -> Option<usize> {
        match selector {
            StageSelector::Tag(tag) => self.position(tag),
            StageSelector::Index(i) => (*i < self.entries.len()).then_some(*i),
        }
    }

    pub(crate) fn remove(&mut self, selector: &StageSelector) -> Option<HookEntry> {
        let idx = self.resolve(selector)?;
        Some(self.entries.remove(idx))
    }

    pub(crate) fn set_stage_enabled(&mut self, selector: &StageSelector, enabled: bool) -> Option<()> {
        let idx = self.resolve(selector)?;
        self.entries[idx].enabled = enabled;
        Some(())
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Snapshot of one stage.
    #[must_use]
    pub fn info(&self, idx: usize) -> Option<StageInfo> {
        let e = self.entries.get(idx)?;
        Some(StageInfo {
            index: idx,
            tag: e.tag.clone(),
            kind: e.stage.kind(),
            enabled: e.enabled,
            detail: e.stage.describe(),
        })
    }

    /// Snapshots of every stage in order.
    #[must_use]
    pub fn list(&self) -> Vec<StageInfo> {
        (0..self.entries.len()).filter_map(|i| self.info(i)).collect()
    }

    /// Human-readable multi-line dump.
    #[must_use]
    pub fn dump(&self, point: HookPoint) -> String {
        let mut out = String::new();
        let state = if self.enabled { "enabled" } else { "disabled" };
        _ = writeln!(out, "{point} ({state}, {} stages)", self.entries.len());
        for info in self.list() {
            let mark = if info.enabled { ' ' } else { '-' };
            _ = writeln!(
                out,
                "  {mark}{:>2}: [{}] {}: {}",
                info.index,
                info.kind.label(),
                info.tag,
                info.detail
            );
        }
        out
    }
}

/// One chain per [`HookPoint`].
#[derive(Clone, Debug)]
pub struct HookTable {
    chains: [HookChain; HookPoint::COUNT],
}

impl Default for HookTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HookTable {
    /// A table of empty, enabled chains.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chains: core::array::from_fn(|_| HookChain::new()),
        }
    }

    /// The chain at `point`.
    #[must_use]
    pub fn chain(&self, point: HookPoint) -> &HookChain {
        &self.chains[point.index()]
    }

    pub(crate) fn chain_mut(&mut self, point: HookPoint) -> &mut HookChain {
        &mut self.chains[point.index()]
    }

    /// Drops every stage of every chain.
    pub(crate) fn clear_all(&mut self) {
        for chain in &mut self.chains {
            chain.clear();
        }
    }

    /// Dump of every non-empty chain.
    #[must_use]
    pub fn dump_all(&self) -> String {
        let mut out = String::new();
        for point in HookPoint::ALL {
            let chain = self.chain(point);
            if !chain.is_empty() || !chain.is_enabled() {
                out.push_str(&chain.dump(point));
            }
        }
        out
    }
}
