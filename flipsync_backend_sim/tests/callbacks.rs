// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flip callbacks fired by the engine.

use std::sync::{Arc, Mutex};

use flipsync_backend_sim::{SimConfig, SimDisplay, sim_engine};
use flipsync_core::callback::{CallbackArg, FlipCallback};
use flipsync_core::config::EngineConfig;
use flipsync_core::error::{CallbackError, Error};
use flipsync_core::flip::{FlipPhase, FlipRequest, MultiFlipMode, SyncMode};
use flipsync_core::hook::{HookPoint, HookStage, InsertPosition};
use flipsync_core::surface::{SurfaceDesc, SurfaceHandle, SurfaceKind};
use flipsync_core::time::HostTime;
use flipsync_core::timing::FlipTiming;
use flipsync_core::PresentationEngine;

type Engine = PresentationEngine<SimDisplay, SimDisplay>;
type Log = Arc<Mutex<Vec<(String, Option<HostTime>, Vec<CallbackArg>)>>>;

fn setup() -> (Engine, SimDisplay, SurfaceHandle) {
    let (mut engine, display) = sim_engine(EngineConfig::new(), SimConfig::default());
    let window = engine
        .open_surface(&SurfaceDesc::onscreen(1024.0, 768.0))
        .unwrap();
    (engine, display, window)
}

fn recorder(log: &Log, name: &str) -> FlipCallback {
    let log = Arc::clone(log);
    let name = String::from(name);
    Box::new(move |timing: &FlipTiming, args: Vec<CallbackArg>| -> Result<(), CallbackError> {
        log.lock().unwrap().push((name, timing.vbl, args));
        Ok(())
    })
}

#[test]
fn callbacks_fire_once_in_order_with_flip_timing() {
    let (mut engine, _display, w) = setup();
    let log = Log::default();
    engine
        .schedule_callback_on_flip(w, "first", recorder(&log, "first"), vec![CallbackArg::Int(1)])
        .unwrap();
    engine
        .schedule_callback_on_flip(
            w,
            "second",
            recorder(&log, "second"),
            vec![CallbackArg::from("trial"), CallbackArg::Float(0.5)],
        )
        .unwrap();
    assert_eq!(engine.pending_callbacks(w).unwrap(), 2, "queued");

    let timing = engine.flip(&FlipRequest::new(w)).unwrap();
    {
        let log = log.lock().unwrap();
        let names: Vec<_> = log.iter().map(|(n, ..)| n.as_str()).collect();
        assert_eq!(names, ["first", "second"], "scheduling order");
        assert!(log.iter().all(|(_, vbl, _)| *vbl == timing.vbl), "same VBL as returned");
        assert_eq!(
            log[1].2,
            [CallbackArg::Text("trial".into()), CallbackArg::Float(0.5)],
            "bound args delivered"
        );
    }
    assert_eq!(engine.pending_callbacks(w).unwrap(), 0, "consumed");

    engine.flip(&FlipRequest::new(w)).unwrap();
    assert_eq!(log.lock().unwrap().len(), 2, "no refire");
}

#[test]
fn unobserved_flips_keep_callbacks_pending() {
    let (mut engine, _display, w) = setup();
    let log = Log::default();
    engine
        .schedule_callback_on_flip(w, "cb", recorder(&log, "cb"), Vec::new())
        .unwrap();
    for sync in [SyncMode::QueueOnly, SyncMode::Immediate] {
        engine.flip(&FlipRequest::new(w).with_sync(sync)).unwrap();
        assert!(log.lock().unwrap().is_empty(), "{sync:?} does not fire");
    }
    engine.flip(&FlipRequest::new(w)).unwrap();
    assert_eq!(log.lock().unwrap().len(), 1, "fires on the next synced flip");
}

#[test]
fn callbacks_belong_to_their_surface() {
    let (mut engine, _display, a) = setup();
    let b = engine
        .open_surface(&SurfaceDesc::onscreen(640.0, 480.0))
        .unwrap();
    let log = Log::default();
    engine
        .schedule_callback_on_flip(a, "a", recorder(&log, "a"), Vec::new())
        .unwrap();
    engine
        .schedule_callback_on_flip(b, "b", recorder(&log, "b"), Vec::new())
        .unwrap();

    engine.flip(&FlipRequest::new(a)).unwrap();
    let names: Vec<_> = log.lock().unwrap().iter().map(|(n, ..)| n.clone()).collect();
    assert_eq!(names, ["a"], "only the flipped surface");
    assert_eq!(engine.pending_callbacks(b).unwrap(), 1, "other surface untouched");

    engine
        .flip(&FlipRequest::new(a).with_multi(MultiFlipMode::BlockEach))
        .unwrap();
    assert_eq!(engine.pending_callbacks(b).unwrap(), 0, "fired by the multi-flip");
}

#[test]
fn block_master_fires_only_master_callbacks() {
    let (mut engine, _display, a) = setup();
    let b = engine
        .open_surface(&SurfaceDesc::onscreen(640.0, 480.0))
        .unwrap();
    let log = Log::default();
    engine
        .schedule_callback_on_flip(b, "slave", recorder(&log, "slave"), Vec::new())
        .unwrap();
    engine
        .flip(&FlipRequest::new(a).with_multi(MultiFlipMode::BlockMaster))
        .unwrap();
    assert!(log.lock().unwrap().is_empty(), "slave swap was not observed");
    assert_eq!(engine.pending_callbacks(b).unwrap(), 1, "still pending");
}

#[test]
fn clearing_and_closing_drop_callbacks_unfired() {
    let (mut engine, _display, w) = setup();
    let log = Log::default();
    for name in ["x", "y"] {
        engine
            .schedule_callback_on_flip(w, name, recorder(&log, name), Vec::new())
            .unwrap();
    }
    assert_eq!(engine.clear_flip_callbacks(w), Ok(2), "two dropped");
    assert_eq!(engine.clear_flip_callbacks(w), Ok(0), "idempotent");
    engine.flip(&FlipRequest::new(w)).unwrap();
    assert!(log.lock().unwrap().is_empty(), "nothing fired");

    let held = Arc::new(());
    let token = Arc::clone(&held);
    engine
        .schedule_callback_on_flip(
            w,
            "holder",
            Box::new(move |_: &FlipTiming, _: Vec<CallbackArg>| -> Result<(), CallbackError> {
                drop(token);
                Ok(())
            }),
            Vec::new(),
        )
        .unwrap();
    assert_eq!(Arc::strong_count(&held), 2, "callable holds the token");
    engine.close_surface(w).unwrap();
    assert_eq!(Arc::strong_count(&held), 1, "callable dropped on close");
    assert_eq!(engine.pending_callbacks(w), Err(Error::InvalidHandle(w)), "surface gone");
}

#[test]
fn clear_all_spans_surfaces() {
    let (mut engine, _display, a) = setup();
    let b = engine
        .open_surface(&SurfaceDesc::onscreen(640.0, 480.0))
        .unwrap();
    let log = Log::default();
    for s in [a, b, b] {
        engine
            .schedule_callback_on_flip(s, "cb", recorder(&log, "cb"), Vec::new())
            .unwrap();
    }
    assert_eq!(engine.clear_all_flip_callbacks(), 3, "all dropped");
    assert_eq!(engine.pending_callbacks(a), Ok(0), "a empty");
    assert_eq!(engine.pending_callbacks(b), Ok(0), "b empty");
}

#[test]
fn failing_callback_does_not_fail_the_flip() {
    let (mut engine, _display, w) = setup();
    let log = Log::default();
    engine
        .schedule_callback_on_flip(
            w,
            "broken",
            Box::new(|_: &FlipTiming, _: Vec<CallbackArg>| -> Result<(), CallbackError> {
                Err(CallbackError::new("disk full"))
            }),
            Vec::new(),
        )
        .unwrap();
    engine
        .schedule_callback_on_flip(w, "after", recorder(&log, "after"), Vec::new())
        .unwrap();
    let timing = engine.flip(&FlipRequest::new(w)).unwrap();
    assert!(timing.is_observed(), "flip result unaffected");
    assert_eq!(log.lock().unwrap().len(), 1, "later callback still ran");
}

#[test]
fn offscreen_surfaces_reject_callbacks() {
    let (mut engine, _display, _) = setup();
    let offscreen = engine
        .open_surface(&SurfaceDesc::onscreen(256.0, 256.0).with_kind(SurfaceKind::OffscreenMemory))
        .unwrap();
    let log = Log::default();
    let err = engine
        .schedule_callback_on_flip(offscreen, "cb", recorder(&log, "cb"), Vec::new())
        .unwrap_err();
    assert!(matches!(err, Error::NotFlippable { .. }), "{err:?}");
    assert_eq!(engine.pending_callbacks(offscreen), Ok(0), "nothing queued");
}

#[test]
fn landed_master_keeps_its_callbacks_when_a_slave_fails() {
    let (mut engine, _display, master) = setup();
    let slave = engine
        .open_surface(&SurfaceDesc::onscreen(1024.0, 768.0))
        .unwrap();
    engine.set_frame_lock(master, slave).unwrap();
    engine
        .add_stage(
            slave,
            HookPoint::UserspaceBufferDrawingPrepare,
            HookStage::native(|_| Err(String::from("prepare failed"))),
            "broken",
            InsertPosition::Append,
        )
        .unwrap();
    let log = Log::default();
    engine
        .schedule_callback_on_flip(master, "m", recorder(&log, "m"), vec![])
        .unwrap();
    engine
        .schedule_callback_on_flip(slave, "s", recorder(&log, "s"), vec![])
        .unwrap();

    let err = engine
        .flip(&FlipRequest::new(master).with_multi(MultiFlipMode::BlockEach))
        .unwrap_err();
    assert!(matches!(err, Error::Device { surface, .. } if surface == slave), "{err:?}");

    let names: Vec<_> = log.lock().unwrap().iter().map(|(n, ..)| n.clone()).collect();
    assert_eq!(names, ["m"], "only the finished master fired");
    assert_eq!(engine.pending_callbacks(slave).unwrap(), 1, "slave callback kept");
    let phase = |h| engine.surface_info(h).unwrap().phase;
    assert_eq!(phase(master), FlipPhase::Completed, "master finished");
    assert_eq!(phase(slave), FlipPhase::Failed, "slave failed");
    assert!(engine.last_flip(master).unwrap().is_some(), "master timing cached");
}

#[test]
fn async_flip_fires_callbacks_when_collected() {
    let (mut engine, _display, w) = setup();
    let log = Log::default();
    engine
        .schedule_callback_on_flip(w, "a", recorder(&log, "a"), vec![])
        .unwrap();
    engine.flip_begin(&FlipRequest::new(w)).unwrap();
    assert!(log.lock().unwrap().is_empty(), "nothing fired at begin");
    let t = engine.flip_end(w).unwrap();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1, "fired once");
    assert_eq!(log[0].1, t.vbl, "collected timing");
}
