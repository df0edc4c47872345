// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chain execution.
//!
//! Blit stages ping-pong through the surface's two scratch buffers: each one
//! reads the current source and writes the next scratch buffer, except the
//! last blit, which writes the chain's destination. Its output becomes the
//! following stage's source. Native, runtime, and rebinding built-in stages
//! run in between with the current bindings and may rewrite them.
//!
//! An empty or disabled chain runs the point's [`DefaultAction`]. So does a
//! chain at a blit point whose enabled stages contain no blit, after those
//! stages ran, so the image still reaches the destination.

use alloc::string::String;

use super::{BuiltinKind, DefaultAction, HookChain, HookPoint, HookStage, StageBindings, StageContext};
use crate::backend::{GraphicsBackend, ScriptRuntime};
use crate::config::ClearColor;
use crate::error::{BackendError, Error};
use crate::surface::{BufferId, BufferRole, StereoMode, SurfaceBuffers, SurfaceHandle};

/// Surface-level inputs to one chain run.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ChainTarget<'a> {
    pub(crate) surface: SurfaceHandle,
    pub(crate) buffers: &'a SurfaceBuffers,
    pub(crate) stereo: StereoMode,
    pub(crate) clear_color: ClearColor,
    pub(crate) view: usize,
}

/// Runs `chain` at `point` and returns the final bindings.
pub(crate) fn run_chain<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    mut runtime: Option<&mut (dyn ScriptRuntime + Send + 'static)>,
    target: &ChainTarget<'_>,
    point: HookPoint,
    chain: &HookChain,
    bindings: StageBindings,
) -> Result<StageBindings, Error> {
    let device = |source: BackendError| Error::Device {
        surface: target.surface,
        point: Some(point),
        source,
    };

    let mut remaining_blits = chain.active().filter(|e| e.stage.is_blit()).count();
    let had_blits = remaining_blits > 0;
    let mut current = bindings;

    for entry in chain.active() {
        let stage_err = |reason: String| {
            device(BackendError::Stage {
                tag: entry.tag.clone(),
                reason,
            })
        };
        match &entry.stage {
            HookStage::Shader(shader) => {
                remaining_blits -= 1;
                let out = blit_target(target.buffers, &current, remaining_blits);
                let step = StageBindings { dest: out, ..current };
                backend
                    .run_shader(target.surface, shader, &step)
                    .map_err(device)?;
                current.source = out;
                current.source2 = None;
            }
            HookStage::Builtin { kind, config } => match kind {
                BuiltinKind::IdentityBlit => {
                    remaining_blits -= 1;
                    let out = blit_target(target.buffers, &current, remaining_blits);
                    backend
                        .copy_buffer(target.surface, current.source, out)
                        .map_err(device)?;
                    current.source = out;
                    current.source2 = None;
                }
                BuiltinKind::FlipBuffers => {
                    core::mem::swap(&mut current.source, &mut current.dest);
                }
                BuiltinKind::StereoSyncLine => {
                    backend
                        .draw_sync_line(target.surface, current.dest, target.view, config)
                        .map_err(device)?;
                }
                BuiltinKind::ClearBuffer => {
                    backend
                        .clear_buffer(target.surface, current.dest, target.clear_color)
                        .map_err(device)?;
                }
            },
            HookStage::Native(f) => {
                let mut ctx = StageContext {
                    surface: target.surface,
                    point,
                    view: target.view,
                    bindings: &mut current,
                };
                f(&mut ctx).map_err(stage_err)?;
            }
            HookStage::Runtime(source) => {
                let rt = runtime
                    .as_deref_mut()
                    .ok_or_else(|| stage_err(String::from("no script runtime installed")))?;
                let mut ctx = StageContext {
                    surface: target.surface,
                    point,
                    view: target.view,
                    bindings: &mut current,
                };
                rt.eval(source, &mut ctx).map_err(stage_err)?;
            }
        }
    }

    if !had_blits {
        run_default(backend, target, point, &current).map_err(device)?;
    }
    Ok(current)
}

/// Where the next blit writes: the destination for the last blit, otherwise
/// whichever scratch buffer is not the current source.
fn blit_target(buffers: &SurfaceBuffers, current: &StageBindings, remaining: usize) -> BufferId {
    if remaining == 0 {
        return current.dest;
    }
    let a = buffers.get(BufferRole::ScratchA);
    if current.source == a {
        buffers.get(BufferRole::ScratchB)
    } else {
        a
    }
}

fn run_default<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    target: &ChainTarget<'_>,
    point: HookPoint,
    b: &StageBindings,
) -> Result<(), BackendError> {
    match point.default_action() {
        DefaultAction::Nothing => Ok(()),
        DefaultAction::Copy if b.source == b.dest => Ok(()),
        DefaultAction::Copy => backend.copy_buffer(target.surface, b.source, b.dest),
        DefaultAction::StereoMerge => {
            let right = b.source2.unwrap_or(b.source);
            backend.compose_stereo(target.surface, target.stereo, b.source, right, b.dest)
        }
    }
}
