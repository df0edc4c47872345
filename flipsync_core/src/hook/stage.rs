// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hook stage variants, buffer bindings, and introspection snapshots.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use super::HookPoint;
use crate::surface::{BufferId, SurfaceHandle};

// ---------------------------------------------------------------------------
// Bindings and context
// ---------------------------------------------------------------------------

/// Buffers a stage reads from and writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageBindings {
    /// Primary input.
    pub source: BufferId,
    /// Secondary input (right view for stereo merging).
    pub source2: Option<BufferId>,
    /// Output.
    pub dest: BufferId,
}

impl StageBindings {
    /// Bindings with a single input.
    #[must_use]
    pub const fn new(source: BufferId, dest: BufferId) -> Self {
        Self {
            source,
            source2: None,
            dest,
        }
    }

    /// Bindings with two inputs.
    #[must_use]
    pub const fn pair(left: BufferId, right: BufferId, dest: BufferId) -> Self {
        Self {
            source: left,
            source2: Some(right),
            dest,
        }
    }
}

/// What a native or runtime stage sees while it runs.
///
/// Stages may rewrite [`bindings`](Self::bindings); the executor carries the
/// rewritten bindings on to the next stage.
#[derive(Debug)]
pub struct StageContext<'a> {
    /// Surface whose chain is running.
    pub surface: SurfaceHandle,
    /// Point being executed.
    pub point: HookPoint,
    /// View index (`0` = left or mono, `1` = right).
    pub view: usize,
    /// Current buffer bindings.
    pub bindings: &'a mut StageBindings,
}

// ---------------------------------------------------------------------------
// Stage variants
// ---------------------------------------------------------------------------

/// Built-in transforms implemented by the engine and backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BuiltinKind {
    /// Copy source to destination.
    IdentityBlit,
    /// Swap the source and destination bindings.
    FlipBuffers,
    /// Draw the stereo sync line used by shutter-glass emitters.
    StereoSyncLine,
    /// Clear the destination to the surface clear color.
    ClearBuffer,
}

impl BuiltinKind {
    /// Every built-in.
    pub const ALL: [Self; 4] = [
        Self::IdentityBlit,
        Self::FlipBuffers,
        Self::StereoSyncLine,
        Self::ClearBuffer,
    ];

    /// The built-in's name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::IdentityBlit => "IdentityBlit",
            Self::FlipBuffers => "FlipBuffers",
            Self::StereoSyncLine => "StereoSyncLine",
            Self::ClearBuffer => "ClearBuffer",
        }
    }

    /// Looks up a built-in by name. An optional `Builtin:` prefix is
    /// accepted.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let name = name.strip_prefix("Builtin:").unwrap_or(name);
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Whether this built-in produces an image in the ping-pong sequence.
    #[must_use]
    pub const fn is_blit(self) -> bool {
        matches!(self, Self::IdentityBlit)
    }
}

/// Parameters of a shader blit stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderStage {
    /// Backend shader program id.
    pub shader: u32,
    /// Blitter configuration string, interpreted by the backend.
    pub blitter: String,
    /// Optional lookup texture bound alongside the source.
    pub lookup_texture: Option<u32>,
}

impl ShaderStage {
    /// A shader stage with the default blitter and no lookup texture.
    #[must_use]
    pub fn new(shader: u32) -> Self {
        Self {
            shader,
            blitter: String::new(),
            lookup_texture: None,
        }
    }
}

/// Signature of a native stage function.
pub type NativeFn = dyn Fn(&mut StageContext<'_>) -> Result<(), String> + Send + Sync;

/// One step of a hook chain.
///
/// Cloning is cheap: native functions are reference counted.
#[derive(Clone)]
pub enum HookStage {
    /// Engine built-in with a free-form configuration string.
    Builtin {
        /// Which built-in.
        kind: BuiltinKind,
        /// Configuration passed through to the backend.
        config: String,
    },
    /// Host function called with the current [`StageContext`].
    Native(Arc<NativeFn>),
    /// Source text evaluated by the installed
    /// [`ScriptRuntime`](crate::backend::ScriptRuntime).
    Runtime(String),
    /// Shader blit executed by the backend.
    Shader(ShaderStage),
}

impl HookStage {
    /// A built-in stage without configuration.
    #[must_use]
    pub fn builtin(kind: BuiltinKind) -> Self {
        Self::Builtin {
            kind,
            config: String::new(),
        }
    }

    /// A native stage.
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&mut StageContext<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::Native(Arc::new(f))
    }

    /// A runtime-evaluated stage.
    pub fn runtime(source: impl Into<String>) -> Self {
        Self::Runtime(source.into())
    }

    /// A shader blit with the default blitter.
    #[must_use]
    pub fn shader(shader: u32) -> Self {
        Self::Shader(ShaderStage::new(shader))
    }

    /// Discriminator for introspection.
    #[must_use]
    pub const fn kind(&self) -> StageKind {
        match self {
            Self::Builtin { .. } => StageKind::Builtin,
            Self::Native(_) => StageKind::Native,
            Self::Runtime(_) => StageKind::Runtime,
            Self::Shader(_) => StageKind::Shader,
        }
    }

    /// Whether the stage writes a new image (and so takes part in
    /// ping-ponging) rather than only inspecting or rebinding.
    #[must_use]
    pub const fn is_blit(&self) -> bool {
        match self {
            Self::Shader(_) => true,
            Self::Builtin { kind, .. } => kind.is_blit(),
            Self::Native(_) | Self::Runtime(_) => false,
        }
    }

    /// Short human-readable description of the payload.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Builtin { kind, config } if config.is_empty() => String::from(kind.name()),
            Self::Builtin { kind, config } => format!("{} ({config})", kind.name()),
            Self::Native(_) => String::from("native function"),
            Self::Runtime(source) => format!("runtime `{source}`"),
            Self::Shader(s) => match s.lookup_texture {
                Some(lut) => format!("shader {} blitter=\"{}\" lut={lut}", s.shader, s.blitter),
                None => format!("shader {} blitter=\"{}\"", s.shader, s.blitter),
            },
        }
    }
}

impl fmt::Debug for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin { kind, config } => f
                .debug_struct("Builtin")
                .field("kind", kind)
                .field("config", config)
                .finish(),
            Self::Native(_) => f.write_str("Native(..)"),
            Self::Runtime(source) => f.debug_tuple("Runtime").field(source).finish(),
            Self::Shader(s) => f.debug_tuple("Shader").field(s).finish(),
        }
    }
}

/// Stage discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StageKind {
    /// [`HookStage::Builtin`].
    Builtin,
    /// [`HookStage::Native`].
    Native,
    /// [`HookStage::Runtime`].
    Runtime,
    /// [`HookStage::Shader`].
    Shader,
}

impl StageKind {
    /// Lowercase label used in dumps.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Native => "native",
            Self::Runtime => "runtime",
            Self::Shader => "shader",
        }
    }
}

// ---------------------------------------------------------------------------
// Introspection and placement
// ---------------------------------------------------------------------------

/// Snapshot of one stage, as returned by `list_stages`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StageInfo {
    /// Position in the chain.
    pub index: usize,
    /// Unique tag within the chain.
    pub tag: String,
    /// Stage variant.
    pub kind: StageKind,
    /// Whether the stage runs.
    pub enabled: bool,
    /// Payload description.
    pub detail: String,
}

/// Where to insert a new stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertPosition {
    /// Before every existing stage.
    Prepend,
    /// After every existing stage.
    Append,
    /// Immediately before the stage with this tag.
    Before(String),
    /// Immediately after the stage with this tag.
    After(String),
    /// At this slot. Indices past the end append.
    At(usize),
}

/// Selects a stage by tag or by position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageSelector {
    /// By tag.
    Tag(String),
    /// By slot index.
    Index(usize),
}

impl From<&str> for StageSelector {
    fn from(tag: &str) -> Self {
        Self::Tag(tag.into())
    }
}

impl From<usize> for StageSelector {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for StageSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => f.write_str(tag),
            Self::Index(i) => write!(f, "#{i}"),
        }
    }
}
