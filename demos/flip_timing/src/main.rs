// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flip loop against the simulated display.
//!
//! Draws and flips a window for a number of frames, optionally stalling the
//! post-compositing chain every few frames to provoke deadline misses. Each
//! flip is traced to a [`RecorderSink`] and, with `--pretty`, to a
//! [`PrettyPrintSink`] on stderr. The recording can be exported as a Chrome
//! trace.

use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use flipsync_backend_sim::{SimConfig, SimDisplay, sim_engine};
use flipsync_core::PresentationEngine;
use flipsync_core::backend::Clock;
use flipsync_core::config::EngineConfig;
use flipsync_core::hook::{HookPoint, HookStage, InsertPosition};
use flipsync_core::script::{FlipArgs, timing_vector};
use flipsync_core::surface::{StereoMode, SurfaceDesc, SurfaceHandle};
use flipsync_core::time::Duration;
use flipsync_core::trace::{
    CallbackEvent, FlipSummary, HookRunEvent, PhaseEvent, SwapEvent, TraceSink, Tracer,
};

use flipsync_debug::chrome;
use flipsync_debug::pretty::PrettyPrintSink;
use flipsync_debug::recorder::RecorderSink;

type Engine = PresentationEngine<SimDisplay, SimDisplay>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Flip timing against a simulated display")]
struct Args {
    /// Number of frames to flip.
    #[arg(long, default_value_t = 120)]
    frames: u64,

    /// Display refresh rate in Hz.
    #[arg(long, default_value_t = 60.0)]
    hz: f64,

    /// Stereo mode code (0 mono, 1 native stereo, 4 free fusion, ...).
    #[arg(long, default_value_t = 0)]
    stereo: i64,

    /// Sync mode code (0 full sync, 1 queue only, 2 immediate, 3 spin wait).
    #[arg(long, default_value_t = 0)]
    sync: i64,

    /// Present every N refreshes using targeted flips. 1 flips as soon as possible.
    #[arg(long, default_value_t = 1)]
    period: u32,

    /// Stall the post-compositing chain for 1.5 refreshes every N frames. 0 disables.
    #[arg(long, default_value_t = 0)]
    stall_every: u64,

    /// Report beam positions.
    #[arg(long)]
    beam: bool,

    /// Follow the host monotonic clock instead of virtual time.
    #[arg(long)]
    realtime: bool,

    /// Print every trace event to stderr.
    #[arg(long)]
    pretty: bool,

    /// Write a Chrome trace of the run to this path.
    #[arg(long, value_name = "PATH")]
    trace: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    initialise_tracing();
    let args = Args::parse();

    let stereo = StereoMode::from_code(args.stereo)
        .ok_or_else(|| format!("unknown stereo mode {}", args.stereo))?;
    if !(args.hz.is_finite() && args.hz > 0.0) {
        return Err(format!("refresh rate must be positive, got {}", args.hz).into());
    }

    let mut sim = SimConfig::default()
        .with_refresh_hz(args.hz)
        .with_beam(args.beam);
    if args.realtime {
        sim = sim.realtime();
    }
    let (mut engine, display) = sim_engine(EngineConfig::new(), sim);
    let window = engine.open_surface(&SurfaceDesc::onscreen(1920.0, 1080.0).with_stereo(stereo))?;
    info!(?window, ?stereo, hz = args.hz, "opened window");

    if args.stall_every > 0 {
        install_stall(&mut engine, &display, window, args.stall_every)?;
    }

    let timebase = engine.clock().timebase();
    let mut recorder = RecorderSink::new();
    let mut pretty = args.pretty.then(|| PrettyPrintSink::stderr(timebase));

    let mut when = 0.0;
    for frame in 0..args.frames {
        draw_frame(&engine, &display, window, frame)?;

        let request = FlipArgs {
            when,
            sync_mode: args.sync,
            ..FlipArgs::new(window)
        }
        .to_request(timebase)?;

        let timing = {
            let mut tee = Tee {
                recorder: &mut recorder,
                pretty: pretty.as_mut(),
            };
            engine.flip_with_tracer(&request, &mut Tracer::new(&mut tee))?
        };

        let [vbl, onset, _, miss, beam] = timing_vector(&timing, timebase);
        if timing.missed() {
            warn!(frame, vbl, miss, "missed deadline");
        } else {
            debug!(frame, vbl, onset, beam, "flipped");
        }

        when = match timing.vbl {
            Some(_) if args.period > 1 => {
                vbl + (f64::from(args.period) - 0.5) * display.config().refresh.as_secs_f64(timebase)
            }
            _ => 0.0,
        };
    }

    let stats = engine.flip_stats(window)?;
    info!(
        flips = stats.flips,
        missed = stats.missed,
        refresh_secs = ?stats.refresh_secs,
        "run complete"
    );
    println!(
        "{} flips, {} missed, refresh {}",
        stats.flips,
        stats.missed,
        stats
            .refresh_secs
            .map_or_else(|| String::from("unknown"), |s| format!("{:.3}ms", s * 1e3)),
    );

    if let Some(path) = &args.trace {
        let file = File::create(path)?;
        chrome::export(recorder.as_bytes(), timebase, &mut BufWriter::new(file))?;
        info!(path = %path.display(), "wrote Chrome trace");
    }

    engine.close_surface(window)?;
    Ok(())
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Labels every view's draw buffer with the frame number.
fn draw_frame(
    engine: &Engine,
    display: &SimDisplay,
    window: SurfaceHandle,
    frame: u64,
) -> Result<(), Box<dyn Error>> {
    let views = engine.surface_info(window)?.stereo.view_count();
    for view in 0..views {
        display.draw(engine.draw_buffer(window, view)?, format!("frame{frame}"));
    }
    Ok(())
}

fn install_stall(
    engine: &mut Engine,
    display: &SimDisplay,
    window: SurfaceHandle,
    every: u64,
) -> Result<(), Box<dyn Error>> {
    let clock = display.clone();
    let stall = Duration(display.config().refresh.ticks() * 3 / 2);
    let counter = Mutex::new(0_u64);
    engine.add_stage(
        window,
        HookPoint::PostCompositingBlit,
        HookStage::native(move |_| {
            let mut n = counter.lock().map_err(|_| String::from("stall counter poisoned"))?;
            *n += 1;
            if *n % every == 0 {
                clock.advance(stall);
            }
            Ok(())
        }),
        "stall",
        InsertPosition::Append,
    )?;
    Ok(())
}

/// Forwards every event to the recorder and, when present, the pretty printer.
struct Tee<'a> {
    recorder: &'a mut RecorderSink,
    pretty: Option<&'a mut PrettyPrintSink>,
}

impl TraceSink for Tee<'_> {
    fn on_phase(&mut self, e: &PhaseEvent) {
        self.recorder.on_phase(e);
        if let Some(p) = self.pretty.as_deref_mut() {
            p.on_phase(e);
        }
    }

    fn on_hook_run(&mut self, e: &HookRunEvent) {
        self.recorder.on_hook_run(e);
        if let Some(p) = self.pretty.as_deref_mut() {
            p.on_hook_run(e);
        }
    }

    fn on_swap(&mut self, e: &SwapEvent) {
        self.recorder.on_swap(e);
        if let Some(p) = self.pretty.as_deref_mut() {
            p.on_swap(e);
        }
    }

    fn on_callbacks(&mut self, e: &CallbackEvent) {
        self.recorder.on_callbacks(e);
        if let Some(p) = self.pretty.as_deref_mut() {
            p.on_callbacks(e);
        }
    }

    fn on_flip_summary(&mut self, s: &FlipSummary) {
        self.recorder.on_flip_summary(s);
        if let Some(p) = self.pretty.as_deref_mut() {
            p.on_flip_summary(s);
        }
    }
}
