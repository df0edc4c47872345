// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The scripting boundary.
//!
//! Scripting hosts speak in integer codes, seconds as floats, and textual
//! subcommands. This module converts between that surface and the typed
//! engine API:
//!
//! - [`FlipArgs`] to [`FlipRequest`], with range checks on every code.
//! - [`FlipTiming`] to the five-element [`timing_vector`].
//! - Hook subcommand strings to a typed [`HookCommand`], applied with
//!   [`PresentationEngine::hook_command`].

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;

use crate::backend::{Clock, GraphicsBackend};
use crate::engine::PresentationEngine;
use crate::error::{Error, ParseError, Result, StageError};
use crate::flip::{FlipRequest, MultiFlipMode, SyncMode};
use crate::hook::{
    BuiltinKind, HookPoint, HookStage, InsertPosition, ShaderStage, StageInfo, StageSelector,
};
use crate::surface::{ClearPolicy, SurfaceHandle};
use crate::time::{HostTime, Timebase};
use crate::timing::FlipTiming;

// ---------------------------------------------------------------------------
// Flip arguments
// ---------------------------------------------------------------------------

/// Flip arguments as passed by a scripting host.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlipArgs {
    /// Surface to flip.
    pub window: SurfaceHandle,
    /// Target time in seconds on the engine clock. `0` or negative means as
    /// soon as possible.
    pub when: f64,
    /// `0` clear, `1` preserve, `2` leave undefined.
    pub clear_mode: i64,
    /// `0` full sync, `1` queue only, `2` immediate, `3` spin wait.
    pub sync_mode: i64,
    /// `0` single surface, `1` block on each, `2` block on master.
    pub multi_flip: i64,
}

impl FlipArgs {
    /// Defaults for every optional argument.
    #[must_use]
    pub const fn new(window: SurfaceHandle) -> Self {
        Self {
            window,
            when: 0.0,
            clear_mode: 0,
            sync_mode: 0,
            multi_flip: 0,
        }
    }

    /// Converts to a typed request.
    ///
    /// The future-horizon check happens in the engine, where the clock is
    /// known.
    pub fn to_request(&self, timebase: Timebase) -> Result<FlipRequest, ParseError> {
        let clear = ClearPolicy::from_code(self.clear_mode)
            .ok_or_else(|| out_of_range("clear_mode", self.clear_mode, 2))?;
        let sync = SyncMode::from_code(self.sync_mode)
            .ok_or_else(|| out_of_range("sync_mode", self.sync_mode, 3))?;
        let multi = MultiFlipMode::from_code(self.multi_flip)
            .ok_or_else(|| out_of_range("multi_flip", self.multi_flip, 2))?;
        if !self.when.is_finite() {
            return Err(ParseError::NotFinite("when"));
        }
        let mut request = FlipRequest::new(self.window)
            .with_clear(clear)
            .with_sync(sync)
            .with_multi(multi);
        if self.when > 0.0 {
            request = request.at(HostTime::from_secs_f64(self.when, timebase));
        }
        Ok(request)
    }
}

fn out_of_range(name: &'static str, value: i64, max: i64) -> ParseError {
    ParseError::OutOfRange {
        name,
        value,
        min: 0,
        max,
    }
}

/// `[vbl, onset, completed, miss, beam]` in seconds.
///
/// Unobserved timestamps and the miss estimate of an unobserved flip are
/// `0.0`. An unknown beam position is `-1.0`.
#[must_use]
pub fn timing_vector(timing: &FlipTiming, timebase: Timebase) -> [f64; 5] {
    let secs = |t: Option<HostTime>| t.map_or(0.0, |t| t.as_secs_f64(timebase));
    [
        secs(timing.vbl),
        secs(timing.onset),
        secs(timing.completed),
        timing.miss.map_or(0.0, |m| m.as_secs_f64(timebase)),
        timing.beam.map_or(-1.0, f64::from),
    ]
}

// ---------------------------------------------------------------------------
// Hook commands
// ---------------------------------------------------------------------------

/// Stage payload named by an `Append*`, `Prepend*`, or `InsertAt<N>*`
/// subcommand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageSpec {
    /// `*Shader point tag shader [blitter] [lut]`.
    Shader(ShaderStage),
    /// `*CFunction point tag name`: a native function looked up by name.
    CFunction(String),
    /// `*MFunction point tag source`: a runtime expression.
    MFunction(String),
    /// `*Builtin point tag name [config]`.
    Builtin {
        /// Built-in name as given.
        name: String,
        /// Configuration string.
        config: String,
    },
}

/// A parsed hook subcommand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookCommand {
    /// Attach a stage.
    Add {
        /// Chain to edit.
        point: HookPoint,
        /// Stage tag.
        tag: String,
        /// Insert position.
        position: InsertPosition,
        /// Stage payload.
        stage: StageSpec,
    },
    /// Remove a stage.
    Remove {
        /// Chain to edit.
        point: HookPoint,
        /// Index or tag.
        selector: StageSelector,
    },
    /// Drop every stage of one chain.
    Reset(HookPoint),
    /// Enable one chain.
    Enable(HookPoint),
    /// Disable one chain.
    Disable(HookPoint),
    /// Look up a stage.
    Query {
        /// Chain to inspect.
        point: HookPoint,
        /// Index or tag.
        selector: StageSelector,
    },
    /// Dump one chain.
    Dump(HookPoint),
    /// Dump every chain of the surface.
    DumpAll,
    /// List every hook point with its synopsis.
    ListAll,
}

impl HookCommand {
    /// Parses a subcommand and its arguments.
    pub fn parse(command: &str, args: &[&str]) -> Result<Self> {
        let point = |i: usize| -> Result<HookPoint> { arg(args, i, "hook")?.parse() };
        let selector = |i: usize| -> Result<StageSelector> {
            let text = arg(args, i, "selector")?;
            Ok(text
                .parse::<usize>()
                .map_or_else(|_| StageSelector::Tag(text.into()), StageSelector::Index))
        };

        match command.to_ascii_lowercase().as_str() {
            "dumpall" => return Ok(Self::DumpAll),
            "listall" => return Ok(Self::ListAll),
            "reset" => return Ok(Self::Reset(point(0)?)),
            "enable" => return Ok(Self::Enable(point(0)?)),
            "disable" => return Ok(Self::Disable(point(0)?)),
            "dump" => return Ok(Self::Dump(point(0)?)),
            "remove" => {
                return Ok(Self::Remove {
                    point: point(0)?,
                    selector: selector(1)?,
                });
            }
            "query" => {
                return Ok(Self::Query {
                    point: point(0)?,
                    selector: selector(1)?,
                });
            }
            _ => {}
        }

        let (position, kind) = split_insert(command)?;
        let point = point(0)?;
        let tag = String::from(arg(args, 1, "tag")?);
        let stage = match kind {
            StageKind::Shader => {
                let mut shader = ShaderStage::new(number(arg(args, 2, "shader")?, "shader")?);
                if let Some(blitter) = args.get(3) {
                    shader.blitter = String::from(*blitter);
                }
                if let Some(lut) = args.get(4) {
                    shader.lookup_texture = Some(number(lut, "lookup_texture")?);
                }
                StageSpec::Shader(shader)
            }
            StageKind::CFunction => StageSpec::CFunction(arg(args, 2, "function")?.into()),
            StageKind::MFunction => StageSpec::MFunction(arg(args, 2, "source")?.into()),
            StageKind::Builtin => StageSpec::Builtin {
                name: arg(args, 2, "builtin")?.into(),
                config: args.get(3).copied().unwrap_or_default().into(),
            },
        };
        Ok(Self::Add {
            point,
            tag,
            position,
            stage,
        })
    }
}

fn arg<'a>(args: &[&'a str], i: usize, name: &'static str) -> Result<&'a str, ParseError> {
    args.get(i).copied().ok_or(ParseError::Missing(name))
}

fn number(text: &str, name: &'static str) -> Result<u32, ParseError> {
    text.trim().parse().map_err(|_| ParseError::BadNumber {
        name,
        text: text.into(),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StageKind {
    Shader,
    CFunction,
    MFunction,
    Builtin,
}

/// Splits `Append*`, `Prepend*`, and `InsertAt<N>*` into position and kind.
///
/// Matching ignores ASCII case, like the management subcommands.
fn split_insert(command: &str) -> Result<(InsertPosition, StageKind), ParseError> {
    let unknown = || ParseError::UnknownCommand(command.into());
    let lower = command.to_ascii_lowercase();
    let (position, rest) = if let Some(rest) = lower.strip_prefix("append") {
        (InsertPosition::Append, rest)
    } else if let Some(rest) = lower.strip_prefix("prepend") {
        (InsertPosition::Prepend, rest)
    } else if let Some(rest) = lower.strip_prefix("insertat") {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return Err(ParseError::BadIndex(command.into()));
        }
        let (index, rest) = rest.split_at(digits);
        let index = index
            .parse()
            .map_err(|_| ParseError::BadIndex(command.into()))?;
        (InsertPosition::At(index), rest)
    } else {
        return Err(unknown());
    };
    let kind = match rest {
        "shader" => StageKind::Shader,
        "cfunction" => StageKind::CFunction,
        "mfunction" => StageKind::MFunction,
        "builtin" => StageKind::Builtin,
        _ => return Err(unknown()),
    };
    Ok((position, kind))
}

/// Result of [`PresentationEngine::hook_command`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookReply {
    /// The edit was applied.
    Done,
    /// A stage was added at this slot.
    Added(usize),
    /// Query result. `None` if no stage matched.
    Stage(Option<StageInfo>),
    /// Dump or listing text.
    Text(String),
}

/// Resolves `CFunction` names to native stages.
pub type NativeResolver<'a> = &'a dyn Fn(&str) -> Option<HookStage>;

/// One line per hook point: name and synopsis.
#[must_use]
pub fn list_hook_points() -> String {
    let mut out = String::new();
    for point in HookPoint::ALL {
        _ = writeln!(out, "{point}: {}", point.synopsis());
    }
    out
}

impl<B: GraphicsBackend, C: Clock> PresentationEngine<B, C> {
    /// Flips with scripting-host arguments and returns the timing vector.
    pub fn flip_scripted(&mut self, args: &FlipArgs) -> Result<[f64; 5]> {
        let timebase = self.clock().timebase();
        let request = args.to_request(timebase)?;
        let timing = self.flip(&request)?;
        Ok(timing_vector(&timing, timebase))
    }

    /// Applies a parsed hook command to `handle`.
    ///
    /// `natives` resolves `CFunction` names; unresolved names are rejected.
    pub fn hook_command(
        &mut self,
        handle: SurfaceHandle,
        command: HookCommand,
        natives: NativeResolver<'_>,
    ) -> Result<HookReply> {
        match command {
            HookCommand::Add {
                point,
                tag,
                position,
                stage,
            } => {
                let reject = |source| Error::StageRejected {
                    surface: handle,
                    point,
                    tag: tag.clone(),
                    source,
                };
                let stage = match stage {
                    StageSpec::Shader(shader) => HookStage::Shader(shader),
                    StageSpec::MFunction(source) => HookStage::Runtime(source),
                    StageSpec::CFunction(name) => natives(name.as_str()).ok_or_else(|| {
                        reject(StageError::Unsupported("unknown native function"))
                    })?,
                    StageSpec::Builtin { name, config } => {
                        let kind = BuiltinKind::from_name(&name)
                            .ok_or_else(|| reject(StageError::UnknownBuiltin(name.clone())))?;
                        HookStage::Builtin { kind, config }
                    }
                };
                self.add_stage(handle, point, stage, &tag, position)
                    .map(HookReply::Added)
            }
            HookCommand::Remove { point, selector } => {
                match selector {
                    StageSelector::Tag(tag) => self.remove_stage(handle, point, &tag)?,
                    StageSelector::Index(i) => self.remove_stage_at(handle, point, i)?,
                }
                Ok(HookReply::Done)
            }
            HookCommand::Reset(point) => self.reset_chain(handle, point).map(|()| HookReply::Done),
            HookCommand::Enable(point) => self.enable_chain(handle, point).map(|()| HookReply::Done),
            HookCommand::Disable(point) => {
                self.disable_chain(handle, point).map(|()| HookReply::Done)
            }
            HookCommand::Query { point, selector } => match self.query_stage(handle, point, selector) {
                Ok(info) => Ok(HookReply::Stage(Some(info))),
                Err(Error::StageNotFound { .. }) => Ok(HookReply::Stage(None)),
                Err(err) => Err(err),
            },
            HookCommand::Dump(point) => self.dump_chain(handle, point).map(HookReply::Text),
            HookCommand::DumpAll => self.dump_all_chains(handle).map(HookReply::Text),
            HookCommand::ListAll => Ok(HookReply::Text(list_hook_points())),
        }
    }
}

/// Splits a whitespace-separated command line into subcommand and args.
///
/// Convenience for hosts that pass a single string.
pub fn parse_line(line: &str) -> Result<HookCommand> {
    let mut words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Err(ParseError::Missing("subcommand").into());
    }
    let command = words.remove(0);
    HookCommand::parse(command, &words)
}

/// Formats a stage listing the way [`HookCommand::Query`] replies are shown.
#[must_use]
pub fn format_stage(info: &StageInfo) -> String {
    format!(
        "{} {} [{}] {}{}",
        info.index,
        info.tag,
        info.kind.label(),
        info.detail,
        if info.enabled { "" } else { " (disabled)" }
    )
}
