// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.
//!
//! Usage errors are detected before any state is touched. [`Error::Resource`]
//! leaves existing state unchanged. [`Error::Device`] aborts the current flip
//! and marks the surface stale. Callback failures never surface here; the
//! callback registry logs them and keeps going.

use alloc::string::String;

use crate::hook::HookPoint;
use crate::surface::SurfaceHandle;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors reported by [`PresentationEngine`](crate::PresentationEngine)
/// operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The handle does not name an open surface.
    #[error("invalid surface handle {0:?}")]
    InvalidHandle(SurfaceHandle),

    /// A flip was requested on a surface that is not double-buffered onscreen.
    #[error("surface {surface:?} of kind {kind} cannot be flipped")]
    NotFlippable {
        /// Offending surface.
        surface: SurfaceHandle,
        /// Its kind, as a name.
        kind: &'static str,
    },

    /// A parameter was outside its valid range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// Parameter name.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A hook-point name did not match any known insertion point.
    #[error("unknown hook point `{0}`")]
    UnknownHookPoint(String),

    /// A stage with this tag already exists in the chain.
    #[error("stage tag `{tag}` already present in {point} chain of {surface:?}")]
    DuplicateTag {
        /// Surface owning the chain.
        surface: SurfaceHandle,
        /// Chain insertion point.
        point: HookPoint,
        /// The conflicting tag.
        tag: String,
    },

    /// No stage matched the given tag or index.
    #[error("no stage `{selector}` in {point} chain of {surface:?}")]
    StageNotFound {
        /// Surface owning the chain.
        surface: SurfaceHandle,
        /// Chain insertion point.
        point: HookPoint,
        /// The tag or index that was looked up.
        selector: String,
    },

    /// Attach-time validation of a stage failed; the chain is unchanged.
    #[error("stage `{tag}` rejected for {point} chain of {surface:?}: {source}")]
    StageRejected {
        /// Surface owning the chain.
        surface: SurfaceHandle,
        /// Chain insertion point.
        point: HookPoint,
        /// Tag of the rejected stage.
        tag: String,
        /// Why validation failed.
        source: StageError,
    },

    /// An asynchronous flip of this surface has not been collected yet.
    #[error("asynchronous flip of {0:?} still pending")]
    FlipPending(SurfaceHandle),

    /// No asynchronous flip of this surface is outstanding.
    #[error("no asynchronous flip pending on {0:?}")]
    NoFlipPending(SurfaceHandle),

    /// Memory for a stage or callback entry could not be reserved.
    #[error("out of memory while {0}")]
    Resource(&'static str),

    /// The backend or a hook stage failed during a flip.
    #[error("device failure on {surface:?}{}: {source}", fmt_point(.point))]
    Device {
        /// Surface whose flip failed.
        surface: SurfaceHandle,
        /// Hook point that was executing, if any.
        point: Option<HookPoint>,
        /// The underlying failure.
        source: BackendError,
    },
}

fn fmt_point(point: &Option<HookPoint>) -> String {
    match point {
        Some(p) => alloc::format!(" at {p}"),
        None => String::new(),
    }
}

/// Why a hook stage was rejected at attach time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// The backend reported a compile or link failure for the shader.
    #[error("shader {shader} failed validation: {log}")]
    Shader {
        /// Shader program id.
        shader: u32,
        /// Driver compile/link log.
        log: String,
    },

    /// The built-in transform name is not known.
    #[error("unknown built-in `{0}`")]
    UnknownBuiltin(String),

    /// Runtime stages need an installed [`ScriptRuntime`](crate::backend::ScriptRuntime).
    #[error("no script runtime installed")]
    NoRuntime,

    /// The script runtime refused the source text.
    #[error("script rejected: {0}")]
    Script(String),

    /// The stage cannot run at this hook point.
    #[error("{0}")]
    Unsupported(&'static str),
}

/// A failure reported by a collaborator during a flip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The display device went away.
    #[error("device lost")]
    DeviceLost,

    /// The swap could not be issued or completed.
    #[error("swap failed: {0}")]
    Swap(String),

    /// A shader, native, or runtime hook stage failed while executing.
    #[error("stage `{tag}` failed: {reason}")]
    Stage {
        /// Tag of the failing stage.
        tag: String,
        /// What went wrong.
        reason: String,
    },

    /// Any other backend failure.
    #[error("{0}")]
    Other(String),
}

/// A failure returned by a flip callback. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    /// Creates a callback error from any message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A malformed scripting-boundary command or argument.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The hook subcommand is not recognized.
    #[error("unknown hook subcommand `{0}`")]
    UnknownCommand(String),

    /// A numeric code was out of range.
    #[error("{name} must be in {min}..={max}, got {value}")]
    OutOfRange {
        /// Argument name.
        name: &'static str,
        /// Received value.
        value: i64,
        /// Inclusive lower bound.
        min: i64,
        /// Inclusive upper bound.
        max: i64,
    },

    /// The `InsertAt<N>` index could not be parsed.
    #[error("bad insert index in `{0}`")]
    BadIndex(String),

    /// A required argument was missing.
    #[error("missing argument `{0}`")]
    Missing(&'static str),

    /// A numeric argument could not be parsed.
    #[error("{name} must be a number, got `{text}`")]
    BadNumber {
        /// Argument name.
        name: &'static str,
        /// Received text.
        text: String,
    },

    /// A time argument was NaN or infinite.
    #[error("{0} must be finite")]
    NotFinite(&'static str),
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        let name = match &err {
            ParseError::OutOfRange { name, .. }
            | ParseError::BadNumber { name, .. }
            | ParseError::Missing(name)
            | ParseError::NotFinite(name) => *name,
            ParseError::UnknownCommand(_) => "subcommand",
            ParseError::BadIndex(_) => "index",
        };
        Self::InvalidArgument {
            name,
            reason: alloc::format!("{err}"),
        }
    }
}

impl Error {
    /// Whether this is a caller mistake rather than a runtime failure.
    #[must_use]
    pub fn is_usage(&self) -> bool {
        !matches!(self, Self::Resource(_) | Self::Device { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn device_error_mentions_point() {
        let err = Error::Device {
            surface: SurfaceHandle::from_raw(3, 1),
            point: Some(HookPoint::FinalOutputFormattingBlit),
            source: BackendError::DeviceLost,
        };
        let text = err.to_string();
        assert!(text.contains("FinalOutputFormattingBlit"), "{text}");
        assert!(text.contains("device lost"), "{text}");
        assert!(!err.is_usage(), "device errors are not usage errors");
    }

    #[test]
    fn parse_error_becomes_invalid_argument() {
        let err: Error = ParseError::OutOfRange {
            name: "sync_mode",
            value: 7,
            min: 0,
            max: 3,
        }
        .into();
        assert!(
            matches!(err, Error::InvalidArgument { name: "sync_mode", .. }),
            "{err:?}"
        );
        assert!(err.is_usage(), "range errors are usage errors");
    }
}
