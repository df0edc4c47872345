// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Collaborator traits implemented outside the engine.
//!
//! A platform integration provides a [`Clock`] and a [`GraphicsBackend`].
//! Hosts that support runtime-evaluated hook stages also install a
//! [`ScriptRuntime`]. The engine never touches the display, the GPU, or an
//! interpreter directly; everything goes through these seams.
//!
//! # Blocking
//!
//! [`Clock::sleep_until`] and [`GraphicsBackend::wait_for_swap`] are the only
//! calls expected to block. Neither has a timeout: if the display never
//! signals completion, the flip never returns. A watchdog belongs in the
//! backend.

use alloc::string::String;

use crate::config::ClearColor;
use crate::error::BackendError;
use crate::hook::{ShaderStage, StageBindings, StageContext};
use crate::surface::{BufferId, StereoMode, SurfaceBuffers, SurfaceHandle};
use crate::time::{Duration, HostTime, Timebase};

/// Monotonic time source.
pub trait Clock {
    /// Current host time.
    fn now(&self) -> HostTime;

    /// Ticks-to-nanoseconds factor for this clock.
    fn timebase(&self) -> Timebase;

    /// Suspends the caller until `deadline`. Returns at once if it has
    /// passed.
    fn sleep_until(&mut self, deadline: HostTime);

    /// Scanline currently being scanned out on the surface's display, if the
    /// platform can tell.
    fn beam_position(&self, surface: SurfaceHandle) -> Option<i32> {
        _ = surface;
        None
    }
}

/// How a swap relates to the vertical blank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SwapMode {
    /// Present at the next vertical blank.
    Synced,
    /// Present as soon as possible, possibly tearing.
    Immediate,
}

/// Completion report for a synced swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapStamp {
    /// Start of the vertical blank in which the swap took effect.
    pub vbl: HostTime,
    /// When scanout of the new image began, if the backend knows a delay
    /// after the blank. `None` means onset equals `vbl`.
    pub onset: Option<HostTime>,
}

/// Buffer swapping and image operations for one display system.
///
/// Buffer ids come from the engine ([`SurfaceBuffers`]); the backend creates
/// storage for them lazily and frees it in
/// [`release_surface`](Self::release_surface).
pub trait GraphicsBackend {
    /// Nominal refresh interval of the display showing `surface`.
    fn refresh_interval(&self, surface: SurfaceHandle) -> Option<Duration>;

    /// Submits all pending drawing commands for `surface`.
    fn flush(&mut self, surface: SurfaceHandle) -> Result<(), BackendError>;

    /// Issues a swap of the surface's backbuffers.
    fn swap(
        &mut self,
        surface: SurfaceHandle,
        buffers: &SurfaceBuffers,
        mode: SwapMode,
    ) -> Result<(), BackendError>;

    /// Blocks until the last synced swap of `surface` took effect.
    fn wait_for_swap(&mut self, surface: SurfaceHandle) -> Result<SwapStamp, BackendError>;

    /// Non-blocking variant of [`wait_for_swap`](Self::wait_for_swap).
    fn poll_swap(&mut self, surface: SurfaceHandle) -> Result<Option<SwapStamp>, BackendError>;

    /// Copies `src` into `dst`.
    fn copy_buffer(
        &mut self,
        surface: SurfaceHandle,
        src: BufferId,
        dst: BufferId,
    ) -> Result<(), BackendError>;

    /// Fills `buffer` with `color`.
    fn clear_buffer(
        &mut self,
        surface: SurfaceHandle,
        buffer: BufferId,
        color: ClearColor,
    ) -> Result<(), BackendError>;

    /// Packs `left` and `right` into `dest` according to `mode`.
    fn compose_stereo(
        &mut self,
        surface: SurfaceHandle,
        mode: StereoMode,
        left: BufferId,
        right: BufferId,
        dest: BufferId,
    ) -> Result<(), BackendError>;

    /// Runs a shader blit from `bindings.source` (and `source2`) into
    /// `bindings.dest`.
    fn run_shader(
        &mut self,
        surface: SurfaceHandle,
        shader: &ShaderStage,
        bindings: &StageBindings,
    ) -> Result<(), BackendError>;

    /// Checks that `shader` compiled and linked. Returns the driver log on
    /// failure.
    fn validate_shader(&mut self, shader: u32) -> Result<(), String>;

    /// Draws the stereo sync line for `view` into `dest`.
    fn draw_sync_line(
        &mut self,
        surface: SurfaceHandle,
        dest: BufferId,
        view: usize,
        config: &str,
    ) -> Result<(), BackendError> {
        _ = (surface, dest, view, config);
        Ok(())
    }

    /// Frees every buffer of a closed surface.
    fn release_surface(&mut self, surface: SurfaceHandle, buffers: &SurfaceBuffers);
}

/// Interpreter for [`HookStage::Runtime`](crate::hook::HookStage::Runtime)
/// source text.
pub trait ScriptRuntime {
    /// Checks that `source` is acceptable without running it.
    fn check(&mut self, source: &str) -> Result<(), String>;

    /// Evaluates `source` for one stage execution.
    fn eval(&mut self, source: &str, ctx: &mut StageContext<'_>) -> Result<(), String>;
}
