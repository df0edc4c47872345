// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The simulated display.
//!
//! VBLs fall on a fixed grid `epoch + k × refresh`. A synced swap takes
//! effect at the first VBL strictly after it was issued, or one refresh after
//! the previous still-pending swap of the same surface. Buffer contents are
//! lists of operation labels, so tests can read back exactly which stages
//! touched an image.
//!
//! In virtual mode time only moves when the engine sleeps or waits, or when
//! a test calls [`SimDisplay::advance`]. In real-time mode the grid is
//! anchored on `CLOCK_MONOTONIC` and waits really sleep.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flipsync_core::backend::{Clock, GraphicsBackend, SwapMode, SwapStamp};
use flipsync_core::config::ClearColor;
use flipsync_core::error::BackendError;
use flipsync_core::hook::{ShaderStage, StageBindings};
use flipsync_core::surface::{BufferId, StereoMode, SurfaceBuffers, SurfaceHandle};
use flipsync_core::time::{Duration, HostTime, Timebase};

use crate::queue::{PresentLog, PresentRecord};
use crate::time;

/// Simulated display settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimConfig {
    /// Refresh interval in nanoseconds.
    pub refresh: Duration,
    /// Delay from VBL to scanout of the first visible line. Zero reports
    /// onset equal to the VBL.
    pub scanout_delay: Duration,
    /// Delay from VBL until a blocked waiter wakes up.
    pub completion_latency: Duration,
    /// Whether beam positions can be queried.
    pub beam: bool,
    /// Scanlines per refresh, including the blanking interval.
    pub vtotal: u32,
    /// Virtual time consumed by each unsuccessful completion poll.
    pub spin_step: Duration,
    /// Virtual start time.
    pub start: HostTime,
    /// Capacity of the presentation log.
    pub log_capacity: usize,
    /// Anchor on the host monotonic clock instead of virtual time.
    pub realtime: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            refresh: Duration(16_666_667),
            scanout_delay: Duration::ZERO,
            completion_latency: Duration(100_000),
            beam: false,
            vtotal: 1125,
            spin_step: Duration(250_000),
            start: HostTime(1_000_000_000),
            log_capacity: PresentLog::DEFAULT_CAPACITY,
            realtime: false,
        }
    }
}

impl SimConfig {
    /// Sets the refresh rate in Hz.
    #[must_use]
    pub fn with_refresh_hz(mut self, hz: f64) -> Self {
        self.refresh = Duration::from_secs_f64(1.0 / hz, Timebase::NANOS);
        self
    }

    /// Sets the scanout delay.
    #[must_use]
    pub fn with_scanout_delay(mut self, delay: Duration) -> Self {
        self.scanout_delay = delay;
        self
    }

    /// Enables or disables beam position queries.
    #[must_use]
    pub fn with_beam(mut self, beam: bool) -> Self {
        self.beam = beam;
        self
    }

    /// Switches to the host monotonic clock.
    #[must_use]
    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }
}

#[derive(Debug)]
struct PendingSwap {
    vbl: HostTime,
    views: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
struct SimSurface {
    front: Vec<Vec<String>>,
    pending: VecDeque<PendingSwap>,
    last: Option<SwapStamp>,
    flushes: u64,
}

#[derive(Debug)]
struct State {
    config: SimConfig,
    epoch: HostTime,
    now: HostTime,
    buffers: HashMap<BufferId, Vec<String>>,
    surfaces: HashMap<SurfaceHandle, SimSurface>,
    log: PresentLog,
    seq: u64,
    swaps: u64,
    device_lost: bool,
    failing_shaders: HashSet<u32>,
    rejected_shaders: HashSet<u32>,
}

impl State {
    fn now(&self) -> HostTime {
        if self.config.realtime {
            time::now()
        } else {
            self.now
        }
    }

    /// First VBL strictly after `t`.
    fn next_vbl_after(&self, t: HostTime) -> HostTime {
        let r = self.config.refresh.ticks().max(1);
        if t < self.epoch {
            return self.epoch;
        }
        let k = t.saturating_duration_since(self.epoch).ticks() / r + 1;
        self.epoch.saturating_add(Duration(k.saturating_mul(r)))
    }

    /// Applies every pending swap whose VBL has passed.
    fn settle(&mut self) {
        let now = self.now();
        for (&surface, surf) in &mut self.surfaces {
            while surf.pending.front().is_some_and(|p| p.vbl <= now) {
                let Some(p) = surf.pending.pop_front() else {
                    break;
                };
                self.seq += 1;
                self.log.push(PresentRecord {
                    seq: self.seq,
                    surface,
                    mode: SwapMode::Synced,
                    at: p.vbl,
                    views: p.views.clone(),
                });
                surf.front = p.views;
            }
        }
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.device_lost {
            Err(BackendError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn contents(&self, buffer: BufferId) -> Vec<String> {
        self.buffers.get(&buffer).cloned().unwrap_or_default()
    }

    fn snapshot(&self, buffers: &SurfaceBuffers) -> Vec<Vec<String>> {
        let mut views = vec![self.contents(buffers.backbuffer(0))];
        if let Some(right) = self.buffers.get(&buffers.backbuffer(1)) {
            views.push(right.clone());
        }
        views
    }

    fn last_stamp(&self, surface: SurfaceHandle) -> Result<SwapStamp, BackendError> {
        self.surfaces
            .get(&surface)
            .and_then(|s| s.last)
            .ok_or_else(|| BackendError::Swap(format!("no swap issued on {surface:?}")))
    }
}

/// A simulated display, usable as both [`Clock`] and [`GraphicsBackend`].
///
/// Clones share state, so one clone can be handed to the engine as backend,
/// another as clock, and a third kept by the test to draw and inspect.
#[derive(Clone, Debug)]
pub struct SimDisplay {
    state: Arc<Mutex<State>>,
}

impl Default for SimDisplay {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimDisplay {
    /// Creates a display.
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let (epoch, now) = if config.realtime {
            let t = time::now();
            (t, t)
        } else {
            (HostTime(0), config.start)
        };
        tracing::debug!(?config, "simulated display created");
        Self {
            state: Arc::new(Mutex::new(State {
                config,
                epoch,
                now,
                buffers: HashMap::new(),
                surfaces: HashMap::new(),
                log: PresentLog::with_capacity(config.log_capacity),
                seq: 0,
                swaps: 0,
                device_lost: false,
                failing_shaders: HashSet::new(),
                rejected_shaders: HashSet::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settings this display was created with.
    #[must_use]
    pub fn config(&self) -> SimConfig {
        self.lock().config
    }

    /// Moves virtual time forward. Sleeps in real-time mode.
    pub fn advance(&self, by: Duration) {
        let target = self.lock().now().saturating_add(by);
        self.wait_until(target);
    }

    /// First VBL strictly after `t`.
    #[must_use]
    pub fn next_vbl_after(&self, t: HostTime) -> HostTime {
        self.lock().next_vbl_after(t)
    }

    /// Appends a drawing operation to a buffer.
    pub fn draw(&self, buffer: BufferId, label: impl Into<String>) {
        self.lock()
            .buffers
            .entry(buffer)
            .or_default()
            .push(label.into());
    }

    /// Current content of a buffer.
    #[must_use]
    pub fn contents(&self, buffer: BufferId) -> Vec<String> {
        self.lock().contents(buffer)
    }

    /// What the surface currently shows for `view`.
    #[must_use]
    pub fn front(&self, surface: SurfaceHandle, view: usize) -> Vec<String> {
        let mut st = self.lock();
        st.settle();
        st.surfaces
            .get(&surface)
            .and_then(|s| s.front.get(view).cloned())
            .unwrap_or_default()
    }

    /// Presentations logged so far, oldest first.
    #[must_use]
    pub fn presents(&self) -> Vec<PresentRecord> {
        let mut st = self.lock();
        st.settle();
        st.log.iter().cloned().collect()
    }

    /// Removes and returns the logged presentations.
    pub fn take_presents(&self) -> Vec<PresentRecord> {
        let mut st = self.lock();
        st.settle();
        st.log.drain()
    }

    /// Presentations dropped because the log was full.
    #[must_use]
    pub fn dropped_presents(&self) -> u64 {
        self.lock().log.dropped_count()
    }

    /// Total swaps issued.
    #[must_use]
    pub fn swap_count(&self) -> u64 {
        self.lock().swaps
    }

    /// Flushes issued for a surface.
    #[must_use]
    pub fn flush_count(&self, surface: SurfaceHandle) -> u64 {
        self.lock().surfaces.get(&surface).map_or(0, |s| s.flushes)
    }

    /// Whether the backend still holds state for `surface`.
    #[must_use]
    pub fn knows_surface(&self, surface: SurfaceHandle) -> bool {
        self.lock().surfaces.contains_key(&surface)
    }

    /// Makes every device operation fail with [`BackendError::DeviceLost`].
    pub fn set_device_lost(&self, lost: bool) {
        self.lock().device_lost = lost;
    }

    /// Makes shader `id` fail whenever it executes.
    pub fn fail_shader(&self, id: u32) {
        self.lock().failing_shaders.insert(id);
    }

    /// Makes shader `id` fail validation.
    pub fn reject_shader(&self, id: u32) {
        self.lock().rejected_shaders.insert(id);
    }

    /// Forgets all injected shader faults.
    pub fn clear_shader_faults(&self) {
        let mut st = self.lock();
        st.failing_shaders.clear();
        st.rejected_shaders.clear();
    }

    fn wait_until(&self, target: HostTime) {
        let realtime = self.lock().config.realtime;
        if realtime {
            time::sleep_until(target);
        } else {
            let mut st = self.lock();
            if st.now < target {
                st.now = target;
            }
        }
        self.lock().settle();
    }
}

impl Clock for SimDisplay {
    fn now(&self) -> HostTime {
        self.lock().now()
    }

    fn timebase(&self) -> Timebase {
        Timebase::NANOS
    }

    fn sleep_until(&mut self, deadline: HostTime) {
        self.wait_until(deadline);
    }

    fn beam_position(&self, _surface: SurfaceHandle) -> Option<i32> {
        let st = self.lock();
        if !st.config.beam {
            return None;
        }
        let r = u128::from(st.config.refresh.ticks().max(1));
        let phase = u128::from(st.now().saturating_duration_since(st.epoch).ticks()) % r;
        i32::try_from(phase * u128::from(st.config.vtotal) / r).ok()
    }
}

impl GraphicsBackend for SimDisplay {
    fn refresh_interval(&self, _surface: SurfaceHandle) -> Option<Duration> {
        let refresh = self.lock().config.refresh;
        (refresh.ticks() > 0).then_some(refresh)
    }

    fn flush(&mut self, surface: SurfaceHandle) -> Result<(), BackendError> {
        let mut st = self.lock();
        st.check()?;
        st.surfaces.entry(surface).or_default().flushes += 1;
        Ok(())
    }

    fn swap(
        &mut self,
        surface: SurfaceHandle,
        buffers: &SurfaceBuffers,
        mode: SwapMode,
    ) -> Result<(), BackendError> {
        let mut st = self.lock();
        st.check()?;
        st.settle();
        let views = st.snapshot(buffers);
        let now = st.now();
        let refresh = st.config.refresh;
        let delay = st.config.scanout_delay;
        let earliest = st.next_vbl_after(now);
        st.swaps += 1;

        match mode {
            SwapMode::Synced => {
                let surf = st.surfaces.entry(surface).or_default();
                let after_pending = surf.pending.back().map(|p| p.vbl.saturating_add(refresh));
                let vbl = after_pending.map_or(earliest, |t| t.max(earliest));
                surf.pending.push_back(PendingSwap { vbl, views });
                surf.last = Some(SwapStamp {
                    vbl,
                    onset: (delay.ticks() > 0).then(|| vbl.saturating_add(delay)),
                });
                tracing::trace!(?surface, ?vbl, "synced swap queued");
            }
            SwapMode::Immediate => {
                st.seq += 1;
                let seq = st.seq;
                st.log.push(PresentRecord {
                    seq,
                    surface,
                    mode,
                    at: now,
                    views: views.clone(),
                });
                let surf = st.surfaces.entry(surface).or_default();
                surf.pending.clear();
                surf.front = views;
                surf.last = Some(SwapStamp {
                    vbl: now,
                    onset: None,
                });
                tracing::trace!(?surface, ?now, "immediate swap");
            }
        }
        Ok(())
    }

    fn wait_for_swap(&mut self, surface: SurfaceHandle) -> Result<SwapStamp, BackendError> {
        let (stamp, target) = {
            let st = self.lock();
            st.check()?;
            let stamp = st.last_stamp(surface)?;
            (stamp, stamp.vbl.saturating_add(st.config.completion_latency))
        };
        self.wait_until(target);
        Ok(stamp)
    }

    fn poll_swap(&mut self, surface: SurfaceHandle) -> Result<Option<SwapStamp>, BackendError> {
        let mut st = self.lock();
        st.check()?;
        let stamp = st.last_stamp(surface)?;
        if st.now() >= stamp.vbl {
            st.settle();
            return Ok(Some(stamp));
        }
        if !st.config.realtime {
            let step = st.config.spin_step.ticks().max(1);
            st.now = st.now.saturating_add(Duration(step));
        }
        Ok(None)
    }

    fn copy_buffer(
        &mut self,
        _surface: SurfaceHandle,
        src: BufferId,
        dst: BufferId,
    ) -> Result<(), BackendError> {
        let mut st = self.lock();
        st.check()?;
        let content = st.contents(src);
        st.buffers.insert(dst, content);
        Ok(())
    }

    fn clear_buffer(
        &mut self,
        _surface: SurfaceHandle,
        buffer: BufferId,
        _color: ClearColor,
    ) -> Result<(), BackendError> {
        let mut st = self.lock();
        st.check()?;
        st.buffers.insert(buffer, Vec::new());
        Ok(())
    }

    fn compose_stereo(
        &mut self,
        _surface: SurfaceHandle,
        mode: StereoMode,
        left: BufferId,
        right: BufferId,
        dest: BufferId,
    ) -> Result<(), BackendError> {
        let mut st = self.lock();
        st.check()?;
        let merged = format!(
            "{mode:?}[{}|{}]",
            st.contents(left).join("+"),
            st.contents(right).join("+")
        );
        st.buffers.insert(dest, vec![merged]);
        Ok(())
    }

    fn run_shader(
        &mut self,
        _surface: SurfaceHandle,
        stage: &ShaderStage,
        bindings: &StageBindings,
    ) -> Result<(), BackendError> {
        let mut st = self.lock();
        st.check()?;
        if st.failing_shaders.contains(&stage.shader) {
            return Err(BackendError::Other(format!(
                "shader {} failed to execute",
                stage.shader
            )));
        }
        let mut out = st.contents(bindings.source);
        out.push(format!("shader:{}", stage.shader));
        st.buffers.insert(bindings.dest, out);
        Ok(())
    }

    fn validate_shader(&mut self, shader: u32) -> Result<(), String> {
        if self.lock().rejected_shaders.contains(&shader) {
            Err(format!("shader {shader} failed to link"))
        } else {
            Ok(())
        }
    }

    fn draw_sync_line(
        &mut self,
        _surface: SurfaceHandle,
        dest: BufferId,
        view: usize,
        _config: &str,
    ) -> Result<(), BackendError> {
        let mut st = self.lock();
        st.check()?;
        st.buffers
            .entry(dest)
            .or_default()
            .push(format!("syncline:{view}"));
        Ok(())
    }

    fn release_surface(&mut self, surface: SurfaceHandle, buffers: &SurfaceBuffers) {
        let mut st = self.lock();
        for id in buffers.all() {
            st.buffers.remove(id);
        }
        st.surfaces.remove(&surface);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> SurfaceHandle {
        SurfaceHandle::from_raw(0, 0)
    }

    #[test]
    fn vbl_grid() {
        let d = SimDisplay::default();
        let r = d.config().refresh.ticks();
        assert_eq!(d.next_vbl_after(HostTime(0)), HostTime(r), "strictly after");
        assert_eq!(d.next_vbl_after(HostTime(r - 1)), HostTime(r), "same slot");
        assert_eq!(d.next_vbl_after(HostTime(r)), HostTime(2 * r), "on a VBL goes to the next");
    }

    #[test]
    fn synced_swap_shows_at_vbl() {
        let mut d = SimDisplay::default();
        let buffers = SurfaceBuffers::starting_at(0);
        d.draw(buffers.backbuffer(0), "frame");
        d.swap(handle(), &buffers, SwapMode::Synced).unwrap();
        assert!(d.front(handle(), 0).is_empty(), "not before the VBL");
        let stamp = d.wait_for_swap(handle()).unwrap();
        assert_eq!(d.front(handle(), 0), ["frame"], "shown after wait");
        assert!(d.now() >= stamp.vbl, "clock moved to the VBL");
        assert_eq!(stamp.onset, None, "no scanout delay configured");
    }

    #[test]
    fn back_to_back_swaps_take_consecutive_vbls() {
        let mut d = SimDisplay::default();
        let buffers = SurfaceBuffers::starting_at(0);
        d.swap(handle(), &buffers, SwapMode::Synced).unwrap();
        let first = d.lock().last_stamp(handle()).unwrap().vbl;
        d.swap(handle(), &buffers, SwapMode::Synced).unwrap();
        let second = d.wait_for_swap(handle()).unwrap().vbl;
        assert_eq!(
            second.saturating_duration_since(first),
            d.config().refresh,
            "queued behind the pending swap"
        );
        assert_eq!(d.presents().len(), 2, "both presented");
    }

    #[test]
    fn poll_advances_virtual_time() {
        let mut d = SimDisplay::default();
        let buffers = SurfaceBuffers::starting_at(0);
        d.swap(handle(), &buffers, SwapMode::Synced).unwrap();
        let mut polls = 0;
        let stamp = loop {
            if let Some(s) = d.poll_swap(handle()).unwrap() {
                break s;
            }
            polls += 1;
            assert!(polls < 1000, "poll must make progress");
        };
        assert!(d.now() >= stamp.vbl, "completion observed at or after VBL");
    }

    #[test]
    fn device_loss_fails_operations() {
        let mut d = SimDisplay::default();
        d.set_device_lost(true);
        assert_eq!(d.flush(handle()), Err(BackendError::DeviceLost), "flush");
        assert_eq!(
            d.swap(handle(), &SurfaceBuffers::starting_at(0), SwapMode::Synced),
            Err(BackendError::DeviceLost),
            "swap"
        );
    }

    #[test]
    fn shader_appends_label() {
        let mut d = SimDisplay::default();
        d.draw(BufferId(1), "base");
        d.run_shader(handle(), &ShaderStage::new(7), &StageBindings::new(BufferId(1), BufferId(2)))
            .unwrap();
        assert_eq!(d.contents(BufferId(2)), ["base", "shader:7"], "shader applied");
        d.reject_shader(9);
        assert!(d.validate_shader(9).is_err(), "rejected at validation");
    }

    #[test]
    fn beam_position_is_within_frame() {
        let d = SimDisplay::new(SimConfig::default().with_beam(true));
        let beam = d.beam_position(handle()).unwrap();
        assert!((0..1125).contains(&beam), "beam {beam} inside vtotal");
        assert_eq!(SimDisplay::default().beam_position(handle()), None, "disabled by default");
    }
}
