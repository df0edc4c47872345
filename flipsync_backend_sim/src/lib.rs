// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Simulated display backend for flipsync.
//!
//! [`SimDisplay`] implements both [`Clock`](flipsync_core::backend::Clock)
//! and [`GraphicsBackend`](flipsync_core::backend::GraphicsBackend) against a
//! virtual VBL grid:
//!
//! - Deterministic virtual time, or real time on `CLOCK_MONOTONIC`
//! - Buffer contents recorded as operation labels
//! - A bounded log of completed presentations
//! - Fault injection (device loss, failing or unlinkable shaders)
//!
//! ```
//! use flipsync_backend_sim::{SimConfig, sim_engine};
//! use flipsync_core::config::EngineConfig;
//! use flipsync_core::flip::FlipRequest;
//! use flipsync_core::surface::SurfaceDesc;
//!
//! let (mut engine, display) = sim_engine(EngineConfig::new(), SimConfig::default());
//! let window = engine.open_surface(&SurfaceDesc::onscreen(800.0, 600.0)).unwrap();
//! display.draw(engine.draw_buffer(window, 0).unwrap(), "stimulus");
//! let timing = engine.flip(&FlipRequest::new(window)).unwrap();
//! assert!(timing.vbl.is_some());
//! assert_eq!(display.front(window, 0), ["stimulus"]);
//! ```

mod display;
mod queue;
mod time;

pub use display::{SimConfig, SimDisplay};
pub use queue::{PresentLog, PresentRecord};
pub use time::{MonotonicClock, now, sleep_until};

use flipsync_core::PresentationEngine;
use flipsync_core::config::EngineConfig;

/// An engine driven by a fresh [`SimDisplay`], plus a handle to that display
/// for drawing and inspection.
#[must_use]
pub fn sim_engine(
    config: EngineConfig,
    sim: SimConfig,
) -> (PresentationEngine<SimDisplay, SimDisplay>, SimDisplay) {
    let display = SimDisplay::new(sim);
    let engine = PresentationEngine::new(config, display.clone(), display.clone());
    (engine, display)
}
