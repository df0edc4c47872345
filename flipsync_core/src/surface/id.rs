// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Surface and buffer identity types.

use core::fmt;

/// A handle to a surface in a [`SurfaceTable`](super::SurfaceTable).
///
/// Carries a slot index and a generation counter. Closing a surface bumps the
/// slot's generation, so an old handle keeps failing even after the slot is
/// reused for a new surface.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurfaceHandle {
    pub(crate) idx: u32,
    pub(crate) generation: u32,
}

impl SurfaceHandle {
    /// Builds a handle from its parts.
    ///
    /// Intended for hosts that pass handles through an integer-only channel.
    /// A forged handle simply fails validation.
    #[inline]
    #[must_use]
    pub const fn from_raw(idx: u32, generation: u32) -> Self {
        Self { idx, generation }
    }

    /// Returns the raw slot index (for diagnostics only).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.idx
    }

    /// Returns the generation counter.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Packs index and generation into one integer.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.idx as u64
    }

    /// Inverse of [`to_bits`](Self::to_bits).
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "splitting a packed u64 into its two u32 halves"
    )]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            idx: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SurfaceHandle({}@gen{})", self.idx, self.generation)
    }
}

/// Names one of a surface's buffers as seen by the backend.
///
/// The backend owns storage; the engine only passes ids around while it wires
/// hook stages together.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub u32);

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferId({})", self.0)
    }
}

/// Role of a buffer within one surface.
///
/// Per-view roles come in left/right pairs; monoscopic surfaces only touch
/// the left member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Client drawing target for the left (or only) view.
    DrawLeft,
    /// Client drawing target for the right view.
    DrawRight,
    /// Side copy of the left draw buffer for content preservation.
    SavedLeft,
    /// Side copy of the right draw buffer for content preservation.
    SavedRight,
    /// Left view after its eye compositing chain.
    ProcessedLeft,
    /// Right view after its eye compositing chain.
    ProcessedRight,
    /// Left output after post-compositing.
    PostLeft,
    /// Right output after post-compositing.
    PostRight,
    /// Merged stereo image.
    Composite,
    /// First ping-pong scratch buffer for chain execution.
    ScratchA,
    /// Second ping-pong scratch buffer for chain execution.
    ScratchB,
    /// System backbuffer presented by the swap (left or only view).
    BackbufferLeft,
    /// System backbuffer for the right view of native stereo.
    BackbufferRight,
}

impl BufferRole {
    /// Number of roles.
    pub const COUNT: usize = 13;
}

/// The concrete buffer ids backing one surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceBuffers {
    ids: [BufferId; BufferRole::COUNT],
}

impl SurfaceBuffers {
    /// Allocates consecutive ids starting at `base`.
    #[must_use]
    pub fn starting_at(base: u32) -> Self {
        let mut ids = [BufferId(0); BufferRole::COUNT];
        let mut next = base;
        for id in &mut ids {
            *id = BufferId(next);
            next = next.wrapping_add(1);
        }
        Self { ids }
    }

    /// Returns the buffer playing `role`.
    #[must_use]
    pub const fn get(&self, role: BufferRole) -> BufferId {
        self.ids[role as usize]
    }

    /// Returns every buffer id of the surface.
    #[must_use]
    pub fn all(&self) -> &[BufferId] {
        &self.ids
    }

    /// Client draw buffer for a view (`0` = left, `1` = right).
    #[must_use]
    pub const fn draw(&self, view: usize) -> BufferId {
        self.pick(view, BufferRole::DrawLeft, BufferRole::DrawRight)
    }

    /// Preservation copy for a view.
    #[must_use]
    pub const fn saved(&self, view: usize) -> BufferId {
        self.pick(view, BufferRole::SavedLeft, BufferRole::SavedRight)
    }

    /// Eye-compositing output for a view.
    #[must_use]
    pub const fn processed(&self, view: usize) -> BufferId {
        self.pick(view, BufferRole::ProcessedLeft, BufferRole::ProcessedRight)
    }

    /// Post-compositing output for a view.
    #[must_use]
    pub const fn post(&self, view: usize) -> BufferId {
        self.pick(view, BufferRole::PostLeft, BufferRole::PostRight)
    }

    /// System backbuffer for a view.
    #[must_use]
    pub const fn backbuffer(&self, view: usize) -> BufferId {
        self.pick(view, BufferRole::BackbufferLeft, BufferRole::BackbufferRight)
    }

    const fn pick(&self, view: usize, left: BufferRole, right: BufferRole) -> BufferId {
        if view == 0 {
            self.get(left)
        } else {
            self.get(right)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip() {
        let h = SurfaceHandle::from_raw(12, 5);
        assert_eq!(SurfaceHandle::from_bits(h.to_bits()), h, "packing is lossless");
    }

    #[test]
    fn buffers_are_distinct() {
        let b = SurfaceBuffers::starting_at(100);
        assert_eq!(b.get(BufferRole::DrawLeft), BufferId(100), "first role");
        assert_eq!(b.get(BufferRole::BackbufferRight), BufferId(112), "last role");
        assert_eq!(b.all().len(), BufferRole::COUNT, "one id per role");
        assert_ne!(b.draw(0), b.draw(1), "left and right differ");
        assert_ne!(b.draw(0), b.saved(0), "draw and saved differ");
    }
}
