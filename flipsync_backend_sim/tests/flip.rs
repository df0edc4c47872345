// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flip scheduling against the simulated display.

use flipsync_backend_sim::{SimConfig, SimDisplay, sim_engine};
use flipsync_core::backend::{Clock, SwapMode};
use flipsync_core::config::EngineConfig;
use flipsync_core::error::{BackendError, Error};
use flipsync_core::flip::{FlipPhase, FlipRequest, MultiFlipMode, SyncMode};
use flipsync_core::hook::{HookPoint, HookStage, InsertPosition};
use flipsync_core::script::FlipArgs;
use flipsync_core::surface::{ClearPolicy, StereoMode, SurfaceDesc, SurfaceHandle, SurfaceKind};
use flipsync_core::time::{Duration, HostTime};
use flipsync_core::PresentationEngine;

type Engine = PresentationEngine<SimDisplay, SimDisplay>;

fn setup() -> (Engine, SimDisplay, SurfaceHandle) {
    let (mut engine, display) = sim_engine(EngineConfig::new(), SimConfig::default());
    let window = engine
        .open_surface(&SurfaceDesc::onscreen(1024.0, 768.0))
        .unwrap();
    (engine, display, window)
}

fn refresh(display: &SimDisplay) -> u64 {
    display.config().refresh.ticks()
}

#[test]
fn timestamps_are_ordered() {
    let (mut engine, display, w) = setup();
    let started = display.now();
    let t = engine.flip(&FlipRequest::new(w)).unwrap();
    let vbl = t.vbl.unwrap();
    let onset = t.onset.unwrap();
    let completed = t.completed.unwrap();
    assert!(vbl >= started, "VBL not before the request");
    assert!(onset >= vbl, "onset at or after VBL");
    assert!(completed >= vbl, "completion at or after VBL");
    assert!(!t.missed(), "ASAP flip on an idle display is on time");
    assert_eq!(t.beam, None, "beam unsupported by default");
}

#[test]
fn consecutive_flips_are_one_refresh_apart() {
    let (mut engine, display, w) = setup();
    let mut vbls = Vec::new();
    for i in 0..6 {
        display.draw(engine.draw_buffer(w, 0).unwrap(), format!("frame{i}"));
        vbls.push(engine.flip(&FlipRequest::new(w)).unwrap().vbl.unwrap());
    }
    for pair in vbls.windows(2) {
        assert_eq!(
            pair[1].saturating_duration_since(pair[0]).ticks(),
            refresh(&display),
            "spacing {pair:?}"
        );
    }
    let stats = engine.flip_stats(w).unwrap();
    assert_eq!(stats.flips, 6, "six flips");
    assert_eq!(stats.missed, 0, "none missed");
    let secs = stats.refresh_secs.unwrap();
    assert!((secs - 1.0 / 60.0).abs() < 1e-6, "refresh estimate {secs}");
}

#[test]
fn flip_presents_drawn_content_and_clears() {
    let (mut engine, display, w) = setup();
    let draw = engine.draw_buffer(w, 0).unwrap();
    display.draw(draw, "fixation");
    display.draw(draw, "target");
    engine.flip(&FlipRequest::new(w)).unwrap();
    assert_eq!(display.front(w, 0), ["fixation", "target"], "drawn content shown");
    assert!(display.contents(draw).is_empty(), "draw buffer cleared after flip");
}

#[test]
fn preserve_content_restores_draw_buffer() {
    let (mut engine, display, w) = setup();
    let draw = engine.draw_buffer(w, 0).unwrap();
    display.draw(draw, "background");
    engine
        .flip(&FlipRequest::new(w).with_clear(ClearPolicy::PreserveContent))
        .unwrap();
    assert_eq!(display.contents(draw), ["background"], "content kept for the next frame");
    display.draw(draw, "overlay");
    engine
        .flip(&FlipRequest::new(w).with_clear(ClearPolicy::LeaveUndefined))
        .unwrap();
    assert_eq!(display.front(w, 0), ["background", "overlay"], "incremental drawing");
}

#[test]
fn targeted_flip_lands_on_first_vbl_after_target() {
    let (mut engine, display, w) = setup();
    engine.flip(&FlipRequest::new(w)).unwrap();
    let target = display.now() + Duration(50_000_000);
    let t = engine.flip(&FlipRequest::new(w).at(target)).unwrap();
    let vbl = t.vbl.unwrap();
    assert!(vbl >= target, "not before target");
    assert!(
        vbl.saturating_duration_since(target).ticks() < refresh(&display),
        "within one refresh of the target"
    );
    assert!(!t.missed(), "deadline met");
}

#[test]
fn slow_frame_is_counted_as_missed() {
    let (mut engine, display, w) = setup();
    engine.flip(&FlipRequest::new(w)).unwrap();

    let slow = display.clone();
    let stall = Duration(refresh(&display) * 3 / 2);
    engine
        .add_stage(
            w,
            HookPoint::PostCompositingBlit,
            HookStage::native(move |_| {
                slow.advance(stall);
                Ok(())
            }),
            "stall",
            InsertPosition::Append,
        )
        .unwrap();
    let t = engine.flip(&FlipRequest::new(w)).unwrap();
    assert!(t.missed(), "miss {:?}", t.miss);
    assert_eq!(engine.surface_info(w).unwrap().phase, FlipPhase::Missed, "phase");
    assert_eq!(engine.flip_stats(w).unwrap().missed, 1, "counted");
}

#[test]
fn first_flip_is_not_counted_as_missed() {
    let (mut engine, display, w) = setup();
    let slow = display.clone();
    let stall = Duration(refresh(&display) * 3);
    engine
        .add_stage(
            w,
            HookPoint::UserspaceBufferDrawingFinished,
            HookStage::native(move |_| {
                slow.advance(stall);
                Ok(())
            }),
            "stall",
            InsertPosition::Append,
        )
        .unwrap();
    let t = engine.flip(&FlipRequest::new(w)).unwrap();
    assert!(t.missed(), "late relative to its start");
    assert_eq!(engine.flip_stats(w).unwrap().missed, 0, "no previous VBL, not counted");
}

#[test]
fn far_future_target_is_rejected_without_state_change() {
    let (mut engine, display, w) = setup();
    let target = display.now() + Duration(1_001_000_000_000);
    let err = engine.flip(&FlipRequest::new(w).at(target)).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { name: "when", .. }), "{err:?}");
    assert_eq!(engine.flip_stats(w).unwrap().flips, 0, "nothing recorded");
    assert_eq!(display.swap_count(), 0, "nothing swapped");
}

#[test]
fn non_double_buffered_surfaces_cannot_flip() {
    let (mut engine, display, _) = setup();
    for kind in [
        SurfaceKind::OnscreenSingleBuffer,
        SurfaceKind::OffscreenMemory,
        SurfaceKind::Texture,
    ] {
        let s = engine
            .open_surface(&SurfaceDesc::onscreen(64.0, 64.0).with_kind(kind))
            .unwrap();
        let err = engine.flip(&FlipRequest::new(s)).unwrap_err();
        assert!(matches!(err, Error::NotFlippable { .. }), "{kind:?}: {err:?}");
        assert!(err.is_usage(), "usage error");
        let info = engine.surface_info(s).unwrap();
        assert_eq!(info.phase, FlipPhase::Idle, "untouched");
        assert!(engine.last_flip(s).unwrap().is_none(), "no timing cached");
    }
    assert_eq!(display.swap_count(), 0, "nothing swapped");
}

#[test]
fn closed_handle_is_invalid() {
    let (mut engine, _display, w) = setup();
    engine.close_surface(w).unwrap();
    let err = engine.flip(&FlipRequest::new(w)).unwrap_err();
    assert_eq!(err, Error::InvalidHandle(w), "closed handle");
    let again = engine
        .open_surface(&SurfaceDesc::onscreen(64.0, 64.0))
        .unwrap();
    assert_ne!(again, w, "slot reuse bumps the generation");
    assert!(!engine.is_open(w), "old handle stays dead");
    assert_eq!(engine.close_surface(w), Err(Error::InvalidHandle(w)), "double close");
}

#[test]
fn unsynchronized_modes_report_no_timestamps() {
    let (mut engine, display, w) = setup();
    engine.flip(&FlipRequest::new(w)).unwrap();
    for sync in [SyncMode::QueueOnly, SyncMode::Immediate] {
        let t = engine.flip(&FlipRequest::new(w).with_sync(sync)).unwrap();
        assert!(!t.is_observed(), "{sync:?} is not measured");
        assert_eq!(t.miss, None, "{sync:?} has no verdict");
    }
    assert_eq!(engine.flip_stats(w).unwrap().last_vbl, None, "history invalidated");
    let immediate = display
        .presents()
        .into_iter()
        .filter(|p| p.mode == SwapMode::Immediate)
        .count();
    assert_eq!(immediate, 1, "one tearing swap presented");
}

#[test]
fn queued_flip_is_followed_one_refresh_later() {
    let (mut engine, display, w) = setup();
    engine
        .flip(&FlipRequest::new(w).with_sync(SyncMode::QueueOnly))
        .unwrap();
    let queued = display.next_vbl_after(display.now());
    let t = engine.flip(&FlipRequest::new(w)).unwrap();
    assert_eq!(
        t.vbl.unwrap().saturating_duration_since(queued).ticks(),
        refresh(&display),
        "second swap waits behind the queued one"
    );
}

#[test]
fn spin_wait_observes_completion() {
    let (mut engine, _display, w) = setup();
    let t = engine
        .flip(&FlipRequest::new(w).with_sync(SyncMode::SpinWait))
        .unwrap();
    assert!(t.completed.unwrap() >= t.vbl.unwrap(), "polled until the VBL passed");
}

#[test]
fn scanout_delay_and_beam_are_reported() {
    let sim = SimConfig::default()
        .with_scanout_delay(Duration(500_000))
        .with_beam(true);
    let (mut engine, _display) = sim_engine(EngineConfig::new(), sim);
    let w = engine
        .open_surface(&SurfaceDesc::onscreen(640.0, 480.0))
        .unwrap();
    let t = engine.flip(&FlipRequest::new(w)).unwrap();
    assert_eq!(
        t.onset.unwrap().saturating_duration_since(t.vbl.unwrap()),
        Duration(500_000),
        "onset trails VBL by the scanout delay"
    );
    assert!(t.beam.is_some(), "beam sampled");
}

#[test]
fn device_loss_marks_surface_stale_until_next_flip() {
    let (mut engine, display, w) = setup();
    engine.flip(&FlipRequest::new(w)).unwrap();
    display.set_device_lost(true);
    let err = engine.flip(&FlipRequest::new(w)).unwrap_err();
    assert!(
        matches!(
            err,
            Error::Device {
                source: BackendError::DeviceLost,
                ..
            }
        ),
        "{err:?}"
    );
    assert!(!err.is_usage(), "runtime failure");
    let info = engine.surface_info(w).unwrap();
    assert!(info.stale, "stale after failure");
    assert_eq!(info.phase, FlipPhase::Failed, "failed phase");

    display.set_device_lost(false);
    let t = engine.flip(&FlipRequest::new(w)).unwrap();
    assert!(t.is_observed(), "recovers");
    assert!(!engine.surface_info(w).unwrap().stale, "revalidated");
    assert_eq!(engine.flip_stats(w).unwrap().missed, 0, "first flip after recovery not counted");
}

#[test]
fn drawing_finished_does_the_flush_once() {
    let (mut engine, display, w) = setup();
    engine
        .drawing_finished(w, ClearPolicy::ClearAfterFlip)
        .unwrap();
    engine
        .drawing_finished(w, ClearPolicy::ClearAfterFlip)
        .unwrap();
    assert_eq!(display.flush_count(w), 1, "flushed once");
    engine.flip(&FlipRequest::new(w)).unwrap();
    assert_eq!(display.flush_count(w), 1, "flip reused the flush");
    engine.flip(&FlipRequest::new(w)).unwrap();
    assert_eq!(display.flush_count(w), 2, "new cycle flushes again");
}

#[test]
fn stereo_modes_route_views() {
    let (mut engine, display, _) = setup();
    let fused = engine
        .open_surface(&SurfaceDesc::onscreen(800.0, 600.0).with_stereo(StereoMode::FreeFusion))
        .unwrap();
    display.draw(engine.draw_buffer(fused, 0).unwrap(), "L");
    display.draw(engine.draw_buffer(fused, 1).unwrap(), "R");
    engine.flip(&FlipRequest::new(fused)).unwrap();
    assert_eq!(display.front(fused, 0), ["FreeFusion[L|R]"], "merged side by side");

    let native = engine
        .open_surface(&SurfaceDesc::onscreen(800.0, 600.0).with_stereo(StereoMode::NativeStereo))
        .unwrap();
    display.draw(engine.draw_buffer(native, 0).unwrap(), "L");
    display.draw(engine.draw_buffer(native, 1).unwrap(), "R");
    engine.flip(&FlipRequest::new(native)).unwrap();
    assert_eq!(display.front(native, 0), ["L"], "left backbuffer");
    assert_eq!(display.front(native, 1), ["R"], "right backbuffer");

    let mono = open_mono(&mut engine);
    let err = engine.draw_buffer(mono, 1).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { name: "view", .. }), "{err:?}");
}

fn open_mono(engine: &mut Engine) -> SurfaceHandle {
    engine
        .open_surface(&SurfaceDesc::onscreen(64.0, 64.0))
        .unwrap()
}

#[test]
fn block_each_flips_every_surface_on_the_same_vbl() {
    let (mut engine, display, a) = setup();
    let b = engine
        .open_surface(&SurfaceDesc::onscreen(1024.0, 768.0))
        .unwrap();
    let t = engine
        .flip(&FlipRequest::new(a).with_multi(MultiFlipMode::BlockEach))
        .unwrap();
    let tb = engine.last_flip(b).unwrap().unwrap();
    assert_eq!(tb.vbl, t.vbl, "same VBL");
    let mut surfaces: Vec<_> = display.presents().iter().map(|p| p.surface).collect();
    surfaces.sort_by_key(|s| s.to_bits());
    let mut expected = [a, b];
    expected.sort_by_key(|s| s.to_bits());
    assert_eq!(surfaces, expected, "both presented");
}

#[test]
fn block_master_swaps_slaves_immediately() {
    let (mut engine, display, a) = setup();
    let b = engine
        .open_surface(&SurfaceDesc::onscreen(1024.0, 768.0))
        .unwrap();
    engine.set_frame_lock(a, b).unwrap();
    let t = engine
        .flip(&FlipRequest::new(a).with_multi(MultiFlipMode::BlockMaster))
        .unwrap();
    assert!(t.is_observed(), "master measured");
    assert!(!engine.last_flip(b).unwrap().unwrap().is_observed(), "slave not measured");
    let slave = display
        .presents()
        .into_iter()
        .find(|p| p.surface == b)
        .unwrap();
    assert_eq!(slave.mode, SwapMode::Immediate, "slave swapped immediately");

    let err = engine
        .flip(
            &FlipRequest::new(a)
                .with_multi(MultiFlipMode::BlockMaster)
                .with_sync(SyncMode::QueueOnly),
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { name: "multi_flip", .. }), "{err:?}");
}

#[test]
fn frame_lock_limits_participants() {
    let (mut engine, display, a) = setup();
    let b = engine
        .open_surface(&SurfaceDesc::onscreen(1024.0, 768.0))
        .unwrap();
    let c = engine
        .open_surface(&SurfaceDesc::onscreen(1024.0, 768.0))
        .unwrap();
    engine.set_frame_lock(a, b).unwrap();
    engine
        .flip(&FlipRequest::new(a).with_multi(MultiFlipMode::BlockEach))
        .unwrap();
    assert!(engine.last_flip(b).unwrap().is_some(), "slave flipped");
    assert!(engine.last_flip(c).unwrap().is_none(), "unlocked surface left alone");
    assert_eq!(display.flush_count(c), 0, "no work on the bystander");

    assert!(engine.set_frame_lock(b, b).is_err(), "self lock rejected");
    assert!(engine.set_frame_lock(b, c).is_err(), "slave cannot be a master");
    assert!(engine.set_frame_lock(c, a).is_err(), "master cannot become a slave");
    engine.close_surface(a).unwrap();
    assert_eq!(engine.surface_info(b).unwrap().frame_lock, None, "lock dropped with master");
}

#[test]
fn scripted_flip_returns_timing_vector() {
    let (mut engine, _display, w) = setup();
    let v = engine.flip_scripted(&FlipArgs::new(w)).unwrap();
    assert!(v[0] > 0.0, "vbl in seconds");
    assert_eq!(v[1], v[0], "onset equals VBL without scanout delay");
    assert!(v[2] >= v[0], "completion after VBL");
    assert!(v[3] < 0.0, "on time");
    assert_eq!(v[4], -1.0, "no beam position");

    let err = engine
        .flip_scripted(&FlipArgs {
            multi_flip: 3,
            ..FlipArgs::new(w)
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { name: "multi_flip", .. }), "{err:?}");
}

#[test]
fn shutdown_releases_everything() {
    let (mut engine, display, w) = setup();
    engine.flip(&FlipRequest::new(w)).unwrap();
    assert!(display.knows_surface(w), "backend state exists");
    let (backend, clock) = engine.shutdown();
    assert!(!backend.knows_surface(w), "released on shutdown");
    assert!(clock.now() > HostTime(0), "clock handed back");
}

#[test]
fn async_flip_reports_timestamps_at_end() {
    let (mut engine, display, w) = setup();
    display.draw(engine.draw_buffer(w, 0).unwrap(), "async");
    let started = display.now();
    engine.flip_begin(&FlipRequest::new(w)).unwrap();
    assert!(engine.is_flip_pending(w).unwrap(), "parked until collected");
    assert_eq!(display.swap_count(), 1, "swap issued at begin");
    assert_eq!(engine.surface_info(w).unwrap().phase, FlipPhase::PostSwapMeasuring, "parked phase");

    let t = engine.flip_end(w).unwrap();
    let vbl = t.vbl.unwrap();
    assert!(vbl >= started, "VBL after the request");
    assert!(t.completed.unwrap() >= vbl, "completion after VBL");
    assert!(!t.missed(), "on time");
    assert!(!engine.is_flip_pending(w).unwrap(), "collected");
    assert_eq!(display.front(w, 0), ["async"], "content presented");
    assert_eq!(engine.last_flip(w).unwrap(), Some(t), "cached like a blocking flip");
    assert_eq!(engine.flip_stats(w).unwrap().flips, 1, "counted once");

    engine
        .flip_begin(&FlipRequest::new(w).with_sync(SyncMode::QueueOnly))
        .unwrap();
    let t = engine.flip_end(w).unwrap();
    assert!(!t.is_observed(), "queued flips carry no timestamps");
}

#[test]
fn async_check_end_waits_for_the_swap() {
    let (mut engine, display, w) = setup();
    engine.flip_begin(&FlipRequest::new(w)).unwrap();
    assert_eq!(engine.flip_check_end(w).unwrap(), None, "VBL still ahead");
    assert!(engine.is_flip_pending(w).unwrap(), "still pending");

    let mut timing = None;
    for _ in 0..1000 {
        timing = engine.flip_check_end(w).unwrap();
        if timing.is_some() {
            break;
        }
    }
    let t = timing.expect("swap completes while polling");
    assert!(t.vbl.unwrap() <= display.now(), "VBL has passed");
    assert!(!engine.is_flip_pending(w).unwrap(), "collected");
}

#[test]
fn async_targeted_flip_swaps_once_the_target_is_due() {
    let (mut engine, display, w) = setup();
    engine.flip(&FlipRequest::new(w)).unwrap();
    let swaps = display.swap_count();
    let target = display.now() + Duration(50_000_000);
    engine.flip_begin(&FlipRequest::new(w).at(target)).unwrap();
    assert_eq!(display.swap_count(), swaps, "swap deferred until the target");
    assert_eq!(engine.surface_info(w).unwrap().phase, FlipPhase::Waiting, "waiting phase");
    assert_eq!(engine.flip_check_end(w).unwrap(), None, "target ahead");

    let t = engine.flip_end(w).unwrap();
    let vbl = t.vbl.unwrap();
    assert_eq!(display.swap_count(), swaps + 1, "one swap");
    assert!(vbl >= target, "not before target");
    assert!(
        vbl.saturating_duration_since(target).ticks() < refresh(&display),
        "within one refresh of the target"
    );
}

#[test]
fn second_flip_while_async_pending_is_rejected() {
    let (mut engine, _display, w) = setup();
    let err = engine.flip_end(w).unwrap_err();
    assert_eq!(err, Error::NoFlipPending(w), "nothing to collect");

    engine.flip_begin(&FlipRequest::new(w)).unwrap();
    let err = engine.flip_begin(&FlipRequest::new(w)).unwrap_err();
    assert_eq!(err, Error::FlipPending(w), "second begin");
    assert!(err.is_usage(), "usage error");
    assert_eq!(
        engine.flip(&FlipRequest::new(w)).unwrap_err(),
        Error::FlipPending(w),
        "blocking flip"
    );
    assert_eq!(
        engine
            .drawing_finished(w, ClearPolicy::ClearAfterFlip)
            .unwrap_err(),
        Error::FlipPending(w),
        "drawing finished"
    );
    assert!(engine.is_flip_pending(w).unwrap(), "first flip untouched");

    engine.flip_end(w).unwrap();
    engine.flip_begin(&FlipRequest::new(w)).unwrap();
    engine.flip_end(w).unwrap();
    assert_eq!(engine.flip_stats(w).unwrap().flips, 2, "both flips counted");

    let err = engine
        .flip_begin(&FlipRequest::new(w).with_multi(MultiFlipMode::BlockEach))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { name: "multi_flip", .. }), "{err:?}");
}
