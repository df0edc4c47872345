// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hook chains: user-extensible image processing at fixed pipeline points.
//!
//! Every surface carries one [`HookChain`] per [`HookPoint`] in a
//! [`HookTable`]. A chain is an ordered list of tagged [`HookStage`]s; tags
//! are unique within a chain. Chains start enabled and empty. Editing or
//! resetting one chain never touches another.

mod chain;
mod exec;
mod point;
mod stage;

pub use chain::{HookChain, HookEntry, HookTable};
pub use point::{DefaultAction, HookPoint};
pub use stage::{
    BuiltinKind, HookStage, InsertPosition, NativeFn, ShaderStage, StageBindings, StageContext,
    StageInfo, StageKind, StageSelector,
};

pub(crate) use chain::ChainError;
pub(crate) use exec::{ChainTarget, run_chain};
