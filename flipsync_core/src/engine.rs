// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The presentation engine context.
//!
//! [`PresentationEngine`] owns the surface table, every hook chain (through
//! the surface records), and the callback registry. Create one with
//! [`PresentationEngine::new`] and tear it down with
//! [`PresentationEngine::shutdown`], which closes every remaining surface.
//!
//! Every operation that takes a [`SurfaceHandle`] validates it first and
//! fails with [`Error::InvalidHandle`] before touching any state.
//!
//! Flip operations live in [`flip`](crate::flip).

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::backend::{Clock, GraphicsBackend, ScriptRuntime};
use crate::callback::{CallbackArg, CallbackId, CallbackRegistry, FlipCallback};
use crate::config::{ClearColor, EngineConfig};
use crate::error::{Error, Result, StageError};
use crate::hook::{
    ChainError, ChainTarget, HookPoint, HookStage, InsertPosition, StageBindings, StageInfo,
    StageSelector, run_chain,
};
use crate::surface::{
    BufferId, BufferRole, SurfaceBuffers, SurfaceDesc, SurfaceHandle, SurfaceInfo, SurfaceRecord,
    SurfaceTable,
};
use crate::timing::TimingState;

/// Presentation state for one process: surfaces, hook chains, callbacks.
///
/// `B` is the display backend and `C` the clock. Both are owned; use
/// [`backend`](Self::backend) and [`clock`](Self::clock) to reach them.
pub struct PresentationEngine<B, C> {
    pub(crate) config: EngineConfig,
    pub(crate) backend: B,
    pub(crate) clock: C,
    pub(crate) surfaces: SurfaceTable,
    pub(crate) callbacks: CallbackRegistry,
    pub(crate) runtime: Option<Box<dyn ScriptRuntime + Send>>,
    next_buffer: u32,
    pub(crate) flip_counter: u64,
}

impl<B, C> fmt::Debug for PresentationEngine<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentationEngine")
            .field("config", &self.config)
            .field("surfaces", &self.surfaces.len())
            .field("callbacks", &self.callbacks.len())
            .field("runtime", &self.runtime.is_some())
            .field("flip_counter", &self.flip_counter)
            .finish_non_exhaustive()
    }
}

impl<B: GraphicsBackend, C: Clock> PresentationEngine<B, C> {
    /// Creates an engine with no open surfaces.
    pub fn new(config: EngineConfig, backend: B, clock: C) -> Self {
        tracing::debug!(?config, "presentation engine created");
        Self {
            config,
            backend,
            clock,
            surfaces: SurfaceTable::new(),
            callbacks: CallbackRegistry::new(),
            runtime: None,
            next_buffer: 0,
            flip_counter: 0,
        }
    }

    /// Closes every open surface and returns the collaborators.
    ///
    /// Close-hook failures are logged; shutdown always completes.
    pub fn shutdown(mut self) -> (B, C) {
        let handles: Vec<_> = self.surfaces.handles().collect();
        for handle in handles {
            if let Err(err) = self.close_surface(handle) {
                tracing::warn!(surface = ?handle, error = %err, "close during shutdown failed");
            }
        }
        let dropped = self.callbacks.clear_all();
        tracing::debug!(dropped, "presentation engine shut down");
        (self.backend, self.clock)
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The display backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The display backend, mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Installs the interpreter used by runtime hook stages.
    pub fn set_script_runtime(&mut self, runtime: Box<dyn ScriptRuntime + Send>) {
        self.runtime = Some(runtime);
    }

    /// Removes the interpreter. Runtime stages already attached fail when
    /// executed.
    pub fn clear_script_runtime(&mut self) -> Option<Box<dyn ScriptRuntime + Send>> {
        self.runtime.take()
    }

    // -----------------------------------------------------------------------
    // Surface lifecycle
    // -----------------------------------------------------------------------

    /// Opens a surface and returns its handle.
    pub fn open_surface(&mut self, desc: &SurfaceDesc) -> Result<SurfaceHandle> {
        let span = u32::try_from(BufferRole::COUNT).map_err(|_| Error::Resource("opening a surface"))?;
        let base = self.next_buffer;
        let next = base
            .checked_add(span)
            .ok_or(Error::Resource("allocating buffer ids"))?;
        let buffers = SurfaceBuffers::starting_at(base);
        let clear_color = desc.clear_color.unwrap_or(self.config.default_clear_color);
        let handle = self
            .surfaces
            .insert(SurfaceRecord::new(desc, clear_color, buffers))?;
        self.next_buffer = next;

        let nominal = self.backend.refresh_interval(handle);
        let record = self.surfaces.get_mut(handle)?;
        record.timing = TimingState::new(
            nominal,
            self.config.refresh_alpha,
            self.config.refresh_tolerance,
        );
        tracing::debug!(
            surface = ?handle,
            kind = desc.kind.name(),
            stereo = ?desc.stereo,
            refresh = ?nominal,
            "surface opened"
        );
        Ok(handle)
    }

    /// Closes a surface.
    ///
    /// Onscreen surfaces run their `CloseWindowPreGlShutdown` and
    /// `CloseWindowPostGlShutdown` chains first. Then every hook stage is
    /// released, pending callbacks are dropped unfired, frame locks pointing
    /// at the surface are removed, and the backend frees the buffers.
    pub fn close_surface(&mut self, handle: SurfaceHandle) -> Result<()> {
        let record = self.surfaces.get(handle)?;
        if record.kind.is_onscreen() {
            let draw = record.buffers.draw(0);
            for point in [
                HookPoint::CloseWindowPreGlShutdown,
                HookPoint::CloseWindowPostGlShutdown,
            ] {
                if let Err(err) = self.run_point(handle, point, 0, StageBindings::new(draw, draw)) {
                    tracing::warn!(surface = ?handle, %point, error = %err, "close hook failed");
                }
            }
        }

        let mut record = self.surfaces.remove(handle)?;
        record.hooks.clear_all();
        let dropped = self.callbacks.clear_for(handle);
        for other in self.surfaces.records_mut() {
            if other.frame_lock == Some(handle) {
                other.frame_lock = None;
            }
        }
        self.backend.release_surface(handle, &record.buffers);
        tracing::debug!(surface = ?handle, dropped_callbacks = dropped, "surface closed");
        Ok(())
    }

    /// Kind, geometry, stereo mode, and clear color of a surface.
    pub fn surface_info(&self, handle: SurfaceHandle) -> Result<SurfaceInfo> {
        Ok(self.surfaces.get(handle)?.info())
    }

    /// Whether `handle` names an open surface.
    #[must_use]
    pub fn is_open(&self, handle: SurfaceHandle) -> bool {
        self.surfaces.is_alive(handle)
    }

    /// Handles of all open surfaces.
    pub fn surfaces(&self) -> impl Iterator<Item = SurfaceHandle> + '_ {
        self.surfaces.handles()
    }

    /// Backend buffer ids of a surface.
    pub fn buffers(&self, handle: SurfaceHandle) -> Result<SurfaceBuffers> {
        Ok(self.surfaces.get(handle)?.buffers)
    }

    /// The buffer clients draw into for `view` (`0` = left or mono).
    pub fn draw_buffer(&self, handle: SurfaceHandle, view: usize) -> Result<BufferId> {
        let record = self.surfaces.get(handle)?;
        if view >= record.stereo.view_count() {
            return Err(Error::InvalidArgument {
                name: "view",
                reason: alloc::format!(
                    "surface has {} view(s), got {view}",
                    record.stereo.view_count()
                ),
            });
        }
        Ok(record.buffers.draw(view))
    }

    /// Sets the color used by `ClearAfterFlip`.
    pub fn set_clear_color(&mut self, handle: SurfaceHandle, color: ClearColor) -> Result<()> {
        self.surfaces.get_mut(handle)?.clear_color = color;
        Ok(())
    }

    /// Locks `slave` to `master` for multi-surface flips.
    ///
    /// Both must be flippable and distinct, `master` must not itself be
    /// locked to another surface, and nothing may be locked to `slave`.
    pub fn set_frame_lock(&mut self, master: SurfaceHandle, slave: SurfaceHandle) -> Result<()> {
        let m = self.surfaces.get(master)?;
        let s = self.surfaces.get(slave)?;
        for (h, r) in [(master, m), (slave, s)] {
            if !r.kind.is_flippable() {
                return Err(Error::NotFlippable {
                    surface: h,
                    kind: r.kind.name(),
                });
            }
        }
        if master == slave {
            return Err(Error::InvalidArgument {
                name: "slave",
                reason: String::from("a surface cannot be locked to itself"),
            });
        }
        if m.frame_lock.is_some() {
            return Err(Error::InvalidArgument {
                name: "master",
                reason: String::from("master is itself frame-locked"),
            });
        }
        if self
            .surfaces
            .handles()
            .any(|h| self.surfaces.get(h).is_ok_and(|r| r.frame_lock == Some(slave)))
        {
            return Err(Error::InvalidArgument {
                name: "slave",
                reason: String::from("slave is itself a frame-lock master"),
            });
        }
        self.surfaces.get_mut(slave)?.frame_lock = Some(master);
        tracing::debug!(?master, ?slave, "frame lock set");
        Ok(())
    }

    /// Removes the frame lock of `slave`, if any.
    pub fn clear_frame_lock(&mut self, slave: SurfaceHandle) -> Result<()> {
        self.surfaces.get_mut(slave)?.frame_lock = None;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Hook chains
    // -----------------------------------------------------------------------

    /// Attaches `stage` under `tag` at `point`. Returns its slot index.
    ///
    /// Shader stages are validated with the backend, and runtime stages with
    /// the installed script runtime. A rejected stage leaves the chain
    /// unchanged.
    pub fn add_stage(
        &mut self,
        handle: SurfaceHandle,
        point: HookPoint,
        stage: HookStage,
        tag: &str,
        position: InsertPosition,
    ) -> Result<usize> {
        self.surfaces.get(handle)?;
        if tag.is_empty() {
            return Err(Error::InvalidArgument {
                name: "tag",
                reason: String::from("stage tags must not be empty"),
            });
        }
        let reject = |source: StageError| Error::StageRejected {
            surface: handle,
            point,
            tag: tag.into(),
            source,
        };
        match &stage {
            HookStage::Shader(shader) => {
                if !point.accepts_shaders() {
                    return Err(reject(StageError::Unsupported(
                        "shader stages need a drawing context",
                    )));
                }
                self.backend
                    .validate_shader(shader.shader)
                    .map_err(|log| {
                        reject(StageError::Shader {
                            shader: shader.shader,
                            log,
                        })
                    })?;
            }
            HookStage::Runtime(source) => {
                let rt = self.runtime.as_mut().ok_or_else(|| reject(StageError::NoRuntime))?;
                rt.check(source).map_err(|e| reject(StageError::Script(e)))?;
            }
            HookStage::Builtin { .. } | HookStage::Native(_) => {}
        }

        let kind = stage.kind();
        let chain = self.surfaces.get_mut(handle)?.hooks.chain_mut(point);
        let idx = chain
            .insert(tag.into(), stage, &position)
            .map_err(|e| chain_error(e, handle, point))?;
        tracing::debug!(surface = ?handle, %point, tag, ?kind, idx, "hook stage added");
        Ok(idx)
    }

    /// Removes the stage tagged `tag`.
    pub fn remove_stage(&mut self, handle: SurfaceHandle, point: HookPoint, tag: &str) -> Result<()> {
        self.remove_selected(handle, point, &StageSelector::Tag(tag.into()))
    }

    /// Removes the stage at slot `index`.
    pub fn remove_stage_at(
        &mut self,
        handle: SurfaceHandle,
        point: HookPoint,
        index: usize,
    ) -> Result<()> {
        self.remove_selected(handle, point, &StageSelector::Index(index))
    }

    fn remove_selected(
        &mut self,
        handle: SurfaceHandle,
        point: HookPoint,
        selector: &StageSelector,
    ) -> Result<()> {
        let chain = self.surfaces.get_mut(handle)?.hooks.chain_mut(point);
        let removed = chain
            .remove(selector)
            .ok_or_else(|| not_found(handle, point, selector))?;
        tracing::debug!(surface = ?handle, %point, tag = %removed.tag, "hook stage removed");
        Ok(())
    }

    /// Enables the chain at `point`. Idempotent.
    pub fn enable_chain(&mut self, handle: SurfaceHandle, point: HookPoint) -> Result<()> {
        self.surfaces
            .get_mut(handle)?
            .hooks
            .chain_mut(point)
            .set_enabled(true);
        Ok(())
    }

    /// Disables the chain at `point`; it then behaves as if empty.
    /// Idempotent.
    pub fn disable_chain(&mut self, handle: SurfaceHandle, point: HookPoint) -> Result<()> {
        self.surfaces
            .get_mut(handle)?
            .hooks
            .chain_mut(point)
            .set_enabled(false);
        Ok(())
    }

    /// Drops every stage at `point`. Other chains are untouched.
    pub fn reset_chain(&mut self, handle: SurfaceHandle, point: HookPoint) -> Result<()> {
        self.surfaces.get_mut(handle)?.hooks.chain_mut(point).clear();
        tracing::debug!(surface = ?handle, %point, "hook chain reset");
        Ok(())
    }

    /// Snapshots of the stages at `point`, in execution order.
    pub fn list_stages(&self, handle: SurfaceHandle, point: HookPoint) -> Result<Vec<StageInfo>> {
        Ok(self.surfaces.get(handle)?.hooks.chain(point).list())
    }

    /// Enables or disables a single stage.
    pub fn set_stage_enabled(
        &mut self,
        handle: SurfaceHandle,
        point: HookPoint,
        selector: impl Into<StageSelector>,
        enabled: bool,
    ) -> Result<()> {
        let selector = selector.into();
        self.surfaces
            .get_mut(handle)?
            .hooks
            .chain_mut(point)
            .set_stage_enabled(&selector, enabled)
            .ok_or_else(|| not_found(handle, point, &selector))
    }

    /// Looks up a stage by tag or index.
    pub fn query_stage(
        &self,
        handle: SurfaceHandle,
        point: HookPoint,
        selector: impl Into<StageSelector>,
    ) -> Result<StageInfo> {
        let selector = selector.into();
        let chain = self.surfaces.get(handle)?.hooks.chain(point);
        chain
            .resolve(&selector)
            .and_then(|i| chain.info(i))
            .ok_or_else(|| not_found(handle, point, &selector))
    }

    /// Whether the chain is enabled and has at least one enabled stage.
    pub fn is_chain_operational(&self, handle: SurfaceHandle, point: HookPoint) -> Result<bool> {
        Ok(self.surfaces.get(handle)?.hooks.chain(point).is_operational())
    }

    /// Human-readable dump of one chain.
    pub fn dump_chain(&self, handle: SurfaceHandle, point: HookPoint) -> Result<String> {
        Ok(self.surfaces.get(handle)?.hooks.chain(point).dump(point))
    }

    /// Human-readable dump of every non-empty or disabled chain.
    pub fn dump_all_chains(&self, handle: SurfaceHandle) -> Result<String> {
        Ok(self.surfaces.get(handle)?.hooks.dump_all())
    }

    /// Runs the chain at `point` outside a flip, for example
    /// [`HookPoint::UserDefinedBlit`]. Returns the final bindings.
    pub fn run_chain(
        &mut self,
        handle: SurfaceHandle,
        point: HookPoint,
        bindings: StageBindings,
    ) -> Result<StageBindings> {
        self.run_point(handle, point, 0, bindings)
    }

    pub(crate) fn run_point(
        &mut self,
        handle: SurfaceHandle,
        point: HookPoint,
        view: usize,
        bindings: StageBindings,
    ) -> Result<StageBindings> {
        let record = self.surfaces.get(handle)?;
        let target = ChainTarget {
            surface: handle,
            buffers: &record.buffers,
            stereo: record.stereo,
            clear_color: record.clear_color,
            view,
        };
        run_chain(
            &mut self.backend,
            self.runtime.as_deref_mut(),
            &target,
            point,
            record.hooks.chain(point),
            bindings,
        )
    }

    // -----------------------------------------------------------------------
    // Flip callbacks
    // -----------------------------------------------------------------------

    /// Schedules `callable` to run after the next synchronized flip of
    /// `handle`, receiving the flip's timing and `args`.
    pub fn schedule_callback_on_flip(
        &mut self,
        handle: SurfaceHandle,
        label: &str,
        callable: FlipCallback,
        args: Vec<CallbackArg>,
    ) -> Result<CallbackId> {
        let record = self.surfaces.get(handle)?;
        if !record.kind.is_flippable() {
            return Err(Error::NotFlippable {
                surface: handle,
                kind: record.kind.name(),
            });
        }
        let id = self.callbacks.schedule(handle, label, callable, args)?;
        tracing::debug!(surface = ?handle, callback = ?id, label, "flip callback scheduled");
        Ok(id)
    }

    /// Drops every pending callback of `handle` unfired. Idempotent.
    pub fn clear_flip_callbacks(&mut self, handle: SurfaceHandle) -> Result<usize> {
        self.surfaces.get(handle)?;
        Ok(self.callbacks.clear_for(handle))
    }

    /// Drops every pending callback of every surface unfired.
    pub fn clear_all_flip_callbacks(&mut self) -> usize {
        self.callbacks.clear_all()
    }

    /// Number of callbacks waiting for the next flip of `handle`.
    pub fn pending_callbacks(&self, handle: SurfaceHandle) -> Result<usize> {
        self.surfaces.get(handle)?;
        Ok(self.callbacks.pending(handle))
    }
}

fn chain_error(err: ChainError, surface: SurfaceHandle, point: HookPoint) -> Error {
    match err {
        ChainError::DuplicateTag(tag) => Error::DuplicateTag {
            surface,
            point,
            tag,
        },
        ChainError::NotFound(selector) => Error::StageNotFound {
            surface,
            point,
            selector,
        },
        ChainError::OutOfMemory => Error::Resource("adding a hook stage"),
    }
}

fn not_found(surface: SurfaceHandle, point: HookPoint, selector: &StageSelector) -> Error {
    Error::StageNotFound {
        surface,
        point,
        selector: alloc::format!("{selector}"),
    }
}
