// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! VBL-synchronized flip scheduling for timed stimulus presentation.
//!
//! `flipsync_core` hands rendered frames to a display at a known moment
//! relative to the vertical blank, reports when that happened, and estimates
//! whether the requested deadline was missed. Client code can attach image
//! transforms in front of the swap (hook chains) and side effects behind it
//! (flip callbacks) without disturbing the timing path. It is `no_std`
//! compatible (with `alloc`).
//!
//! # Architecture
//!
//! All state lives in one [`PresentationEngine`](engine::PresentationEngine),
//! which owns the surface table and the callback registry and talks to the
//! outside world through two collaborator traits:
//!
//! ```text
//!   client ──► PresentationEngine::flip(FlipRequest)
//!                   │
//!                   ▼
//!   validate ──► pre-flip hook chains ──► flush ──► Clock::sleep_until
//!                                                        │
//!                   ┌────────────────────────────────────┘
//!                   ▼
//!   GraphicsBackend::swap / wait_for_swap ──► SwapStamp
//!                   │
//!                   ▼
//!   verdict (miss estimate) ──► post-flip restore/clear ──► callbacks
//!                   │
//!                   ▼
//!              FlipTiming ──► client
//! ```
//!
//! **[`surface`]**: Surface records behind generational
//! [`SurfaceHandle`](surface::SurfaceHandle)s. A closed handle never resolves
//! again.
//!
//! **[`hook`]**: Tagged hook stages grouped into per-surface chains at a
//! closed set of [`HookPoint`](hook::HookPoint)s, plus the chain executor
//! that threads buffer bindings from stage to stage.
//!
//! **[`flip`]**: Flip requests, sync and multi-flip modes, and the flip state
//! machine.
//!
//! **[`timing`]**: Timing results, the miss-estimate rule, and the refresh
//! interval estimator.
//!
//! **[`callback`]**: FIFO registry of move-once callbacks fired after a
//! synchronized flip.
//!
//! **[`backend`]**: The [`Clock`](backend::Clock),
//! [`GraphicsBackend`](backend::GraphicsBackend), and
//! [`ScriptRuntime`](backend::ScriptRuntime) collaborator traits.
//!
//! **[`script`]**: Integer-coded flip arguments, the five-element timing
//! vector, and textual hook commands as seen by a scripting host.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! flip instrumentation, with a zero-overhead [`Tracer`](trace::Tracer)
//! wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `serde` (disabled by default): Derives `Serialize`/`Deserialize` for
//!   configuration and stage introspection types.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod backend;
pub mod callback;
pub mod config;
pub mod engine;
pub mod error;
pub mod flip;
pub mod hook;
pub mod script;
pub mod surface;
pub mod time;
pub mod timing;
pub mod trace;

pub use engine::PresentationEngine;
pub use error::{Error, Result};
