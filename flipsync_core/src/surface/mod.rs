// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Surface records: the unit of presentation state.
//!
//! A surface is one drawable known to the engine: an onscreen window, an
//! offscreen buffer, a texture, or a proxy. Only
//! [`SurfaceKind::OnscreenDoubleBuffer`] surfaces take part in VBL-synced
//! flips. Each record owns its hook chains, its timing bookkeeping, the
//! backend buffer ids it draws through, and an optional frame-lock link to a
//! master surface.

mod id;
mod store;

pub use id::{BufferId, BufferRole, SurfaceBuffers, SurfaceHandle};
pub use store::SurfaceTable;

use kurbo::{Rect, Size};

use crate::config::ClearColor;
use crate::flip::{FlipPhase, PendingFlip};
use crate::hook::HookTable;
use crate::timing::{FlipTiming, TimingState};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What kind of drawable a surface is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// Onscreen window without a back buffer.
    OnscreenSingleBuffer,
    /// Onscreen window with front and back buffers. The only flippable kind.
    OnscreenDoubleBuffer,
    /// Offscreen drawable in memory.
    OffscreenMemory,
    /// A texture.
    Texture,
    /// A proxy standing in for a real drawable.
    Proxy,
}

impl SurfaceKind {
    /// Whether the surface is shown on a display.
    #[must_use]
    pub const fn is_onscreen(self) -> bool {
        matches!(self, Self::OnscreenSingleBuffer | Self::OnscreenDoubleBuffer)
    }

    /// Whether the surface can be flipped.
    #[must_use]
    pub const fn is_flippable(self) -> bool {
        matches!(self, Self::OnscreenDoubleBuffer)
    }

    /// Returns the variant name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OnscreenSingleBuffer => "OnscreenSingleBuffer",
            Self::OnscreenDoubleBuffer => "OnscreenDoubleBuffer",
            Self::OffscreenMemory => "OffscreenMemory",
            Self::Texture => "Texture",
            Self::Proxy => "Proxy",
        }
    }
}

/// How left and right views reach the display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StereoMode {
    /// One view.
    #[default]
    Mono,
    /// Frame-sequential stereo with separate left and right backbuffers.
    NativeStereo,
    /// Both views squeezed vertically, left on top.
    VerticalCompressionLeftTop,
    /// Both views squeezed vertically, right on top.
    VerticalCompressionRightTop,
    /// Side by side, left view on the left.
    FreeFusion,
    /// Side by side, left view on the right.
    CrossFusion,
    /// Red left, green right.
    AnaglyphRedGreen,
    /// Green left, red right.
    AnaglyphGreenRed,
    /// Red left, blue right.
    AnaglyphRedBlue,
    /// Blue left, red right.
    AnaglyphBlueRed,
}

impl StereoMode {
    /// Maps the conventional integer stereo code (`0..=9`).
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::Mono,
            1 => Self::NativeStereo,
            2 => Self::VerticalCompressionLeftTop,
            3 => Self::VerticalCompressionRightTop,
            4 => Self::FreeFusion,
            5 => Self::CrossFusion,
            6 => Self::AnaglyphRedGreen,
            7 => Self::AnaglyphGreenRed,
            8 => Self::AnaglyphRedBlue,
            9 => Self::AnaglyphBlueRed,
            _ => return None,
        })
    }

    /// Number of client draw buffers (1 or 2).
    #[must_use]
    pub const fn view_count(self) -> usize {
        match self {
            Self::Mono => 1,
            _ => 2,
        }
    }

    /// Whether both views are merged into one output image before the swap.
    #[must_use]
    pub const fn needs_merge(self) -> bool {
        !matches!(self, Self::Mono | Self::NativeStereo)
    }

    /// Number of images handed to the swap (1 or 2).
    #[must_use]
    pub const fn output_count(self) -> usize {
        match self {
            Self::NativeStereo => 2,
            _ => 1,
        }
    }
}

/// What happens to the draw buffers after a flip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ClearPolicy {
    /// Clear to the surface's clear color.
    #[default]
    ClearAfterFlip,
    /// Restore the content drawn before the flip.
    PreserveContent,
    /// Leave whatever the backend left. The caller redraws everything.
    LeaveUndefined,
}

impl ClearPolicy {
    /// Maps the scripting code (`0` clear, `1` preserve, `2` undefined).
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::ClearAfterFlip),
            1 => Some(Self::PreserveContent),
            2 => Some(Self::LeaveUndefined),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Geometry and descriptors
// ---------------------------------------------------------------------------

/// Logical rectangle plus the physical framebuffer size.
///
/// The two differ when stereo packing or HDR output changes the backing
/// store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geometry {
    /// Logical rectangle in points.
    pub rect: Rect,
    /// Physical framebuffer size in pixels.
    pub physical: Size,
}

impl Geometry {
    /// Geometry whose physical size equals the logical size.
    #[must_use]
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            physical: rect.size(),
        }
    }

    /// A `width × height` rectangle at the origin.
    #[must_use]
    pub fn sized(width: f64, height: f64) -> Self {
        Self::new(Rect::new(0.0, 0.0, width, height))
    }

    /// Overrides the physical size.
    #[must_use]
    pub fn with_physical(mut self, physical: Size) -> Self {
        self.physical = physical;
        self
    }
}

/// Everything needed to open a surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceDesc {
    /// Drawable kind.
    pub kind: SurfaceKind,
    /// Geometry.
    pub geometry: Geometry,
    /// Stereo mode.
    pub stereo: StereoMode,
    /// Clear color, or `None` for the engine default.
    pub clear_color: Option<ClearColor>,
}

impl SurfaceDesc {
    /// A monoscopic double-buffered onscreen window.
    #[must_use]
    pub fn onscreen(width: f64, height: f64) -> Self {
        Self {
            kind: SurfaceKind::OnscreenDoubleBuffer,
            geometry: Geometry::sized(width, height),
            stereo: StereoMode::Mono,
            clear_color: None,
        }
    }

    /// Replaces the kind.
    #[must_use]
    pub fn with_kind(mut self, kind: SurfaceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Replaces the stereo mode.
    #[must_use]
    pub fn with_stereo(mut self, stereo: StereoMode) -> Self {
        self.stereo = stereo;
        self
    }

    /// Sets the clear color.
    #[must_use]
    pub fn with_clear_color(mut self, color: ClearColor) -> Self {
        self.clear_color = Some(color);
        self
    }

    /// Replaces the geometry.
    #[must_use]
    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }
}

/// Snapshot returned by [`PresentationEngine::surface_info`](crate::PresentationEngine::surface_info).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceInfo {
    /// Drawable kind.
    pub kind: SurfaceKind,
    /// Geometry.
    pub geometry: Geometry,
    /// Stereo mode.
    pub stereo: StereoMode,
    /// Current clear color.
    pub clear_color: ClearColor,
    /// Master surface, if this surface is frame-locked.
    pub frame_lock: Option<SurfaceHandle>,
    /// Phase of the most recent flip.
    pub phase: FlipPhase,
    /// Whether timing must be revalidated before the next flip.
    pub stale: bool,
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Per-surface engine state. Owned by the [`SurfaceTable`].
#[derive(Debug)]
pub(crate) struct SurfaceRecord {
    pub(crate) kind: SurfaceKind,
    pub(crate) geometry: Geometry,
    pub(crate) stereo: StereoMode,
    pub(crate) clear_color: ClearColor,
    pub(crate) buffers: SurfaceBuffers,
    pub(crate) hooks: HookTable,
    pub(crate) timing: TimingState,
    pub(crate) last_flip: Option<FlipTiming>,
    pub(crate) phase: FlipPhase,
    /// Master surface this one is frame-locked to.
    pub(crate) frame_lock: Option<SurfaceHandle>,
    /// A pipeline flush was issued this cycle.
    pub(crate) flush_done: bool,
    /// Pre-flip hook processing already ran this cycle.
    pub(crate) preflip_done: bool,
    /// Draw buffers were copied aside for content preservation this cycle.
    pub(crate) content_saved: bool,
    /// A device failure left timing untrustworthy.
    pub(crate) stale: bool,
    /// Asynchronous flip begun but not yet collected.
    pub(crate) pending_flip: Option<PendingFlip>,
}

impl SurfaceRecord {
    pub(crate) fn new(desc: &SurfaceDesc, clear_color: ClearColor, buffers: SurfaceBuffers) -> Self {
        Self {
            kind: desc.kind,
            geometry: desc.geometry,
            stereo: desc.stereo,
            clear_color,
            buffers,
            hooks: HookTable::new(),
            timing: TimingState::default(),
            last_flip: None,
            phase: FlipPhase::Idle,
            frame_lock: None,
            flush_done: false,
            preflip_done: false,
            content_saved: false,
            stale: false,
            pending_flip: None,
        }
    }

    pub(crate) fn info(&self) -> SurfaceInfo {
        SurfaceInfo {
            kind: self.kind,
            geometry: self.geometry,
            stereo: self.stereo,
            clear_color: self.clear_color,
            frame_lock: self.frame_lock,
            phase: self.phase,
            stale: self.stale,
        }
    }

    /// Forgets this cycle's flush, pre-flip, and preservation work.
    pub(crate) fn reset_cycle(&mut self) {
        self.flush_done = false;
        self.preflip_done = false;
        self.content_saved = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_double_buffer_flips() {
        for kind in [
            SurfaceKind::OnscreenSingleBuffer,
            SurfaceKind::OffscreenMemory,
            SurfaceKind::Texture,
            SurfaceKind::Proxy,
        ] {
            assert!(!kind.is_flippable(), "{} must not flip", kind.name());
        }
        assert!(SurfaceKind::OnscreenDoubleBuffer.is_flippable(), "double buffer flips");
    }

    #[test]
    fn stereo_view_and_output_counts() {
        assert_eq!(StereoMode::Mono.view_count(), 1, "mono has one view");
        assert!(!StereoMode::Mono.needs_merge(), "mono needs no merge");
        assert_eq!(StereoMode::NativeStereo.output_count(), 2, "native stereo swaps two");
        assert!(!StereoMode::NativeStereo.needs_merge(), "native stereo keeps views apart");
        assert!(StereoMode::FreeFusion.needs_merge(), "fusion merges");
        assert_eq!(StereoMode::FreeFusion.output_count(), 1, "merged into one");
        assert_eq!(StereoMode::from_code(9), Some(StereoMode::AnaglyphBlueRed), "code 9");
        assert_eq!(StereoMode::from_code(10), None, "out of range");
    }

    #[test]
    fn clear_policy_codes() {
        assert_eq!(ClearPolicy::from_code(1), Some(ClearPolicy::PreserveContent), "1 preserves");
        assert_eq!(ClearPolicy::from_code(3), None, "3 is invalid");
    }

    #[test]
    fn geometry_defaults_physical_to_logical() {
        let g = Geometry::sized(800.0, 600.0);
        assert_eq!(g.physical, Size::new(800.0, 600.0), "physical matches logical");
        let g = g.with_physical(Size::new(1600.0, 600.0));
        assert_eq!(g.rect.width(), 800.0, "logical unchanged");
    }
}
