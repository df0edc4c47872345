// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].

use flipsync_core::backend::SwapMode;
use flipsync_core::flip::{FlipPhase, SyncMode};
use flipsync_core::hook::HookPoint;
use flipsync_core::surface::SurfaceHandle;
use flipsync_core::time::{HostTime, Offset};
use flipsync_core::trace::{
    CallbackEvent, FlipSummary, HookRunEvent, PhaseEvent, SwapEvent, TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_PHASE: u8 = 1;
const TAG_HOOK_RUN: u8 = 2;
const TAG_SWAP: u8 = 3;
const TAG_CALLBACKS: u8 = 4;
const TAG_FLIP_SUMMARY: u8 = 5;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_count(&mut self, v: usize) {
        self.write_u32(u32::try_from(v).unwrap_or(u32::MAX));
    }

    fn write_option_u64(&mut self, v: Option<u64>) {
        match v {
            Some(val) => {
                self.write_u8(1);
                self.write_u64(val);
            }
            None => {
                self.write_u8(0);
                self.write_u64(0);
            }
        }
    }

    fn write_option_time(&mut self, t: Option<HostTime>) {
        self.write_option_u64(t.map(HostTime::ticks));
    }

    fn write_option_offset(&mut self, o: Option<Offset>) {
        self.write_option_u64(o.map(|o| u64::from_le_bytes(o.ticks().to_le_bytes())));
    }

    fn write_surface(&mut self, s: SurfaceHandle) {
        self.write_u64(s.to_bits());
    }

    fn write_phase(&mut self, p: FlipPhase) {
        self.write_u8(match p {
            FlipPhase::Idle => 0,
            FlipPhase::PreFlipHooksRunning => 1,
            FlipPhase::Waiting => 2,
            FlipPhase::Swapping => 3,
            FlipPhase::PostSwapMeasuring => 4,
            FlipPhase::Completed => 5,
            FlipPhase::Missed => 6,
            FlipPhase::Failed => 7,
        });
    }

    fn write_sync(&mut self, s: SyncMode) {
        self.write_u8(match s {
            SyncMode::FullSync => 0,
            SyncMode::QueueOnly => 1,
            SyncMode::Immediate => 2,
            SyncMode::SpinWait => 3,
        });
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "hook point count is far below u8::MAX"
    )]
    fn write_point(&mut self, p: HookPoint) {
        self.write_u8(p.index() as u8);
    }
}

impl TraceSink for RecorderSink {
    fn on_phase(&mut self, e: &PhaseEvent) {
        self.write_u8(TAG_PHASE);
        self.write_u64(e.flip_index);
        self.write_surface(e.surface);
        self.write_phase(e.phase);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_hook_run(&mut self, e: &HookRunEvent) {
        self.write_u8(TAG_HOOK_RUN);
        self.write_u64(e.flip_index);
        self.write_surface(e.surface);
        self.write_point(e.point);
        self.write_count(e.stages);
        self.write_u64(e.started.ticks());
        self.write_u64(e.finished.ticks());
    }

    fn on_swap(&mut self, e: &SwapEvent) {
        self.write_u8(TAG_SWAP);
        self.write_u64(e.flip_index);
        self.write_surface(e.surface);
        self.write_u8(match e.mode {
            SwapMode::Synced => 0,
            SwapMode::Immediate => 1,
        });
        self.write_u64(e.issued_at.ticks());
    }

    fn on_callbacks(&mut self, e: &CallbackEvent) {
        self.write_u8(TAG_CALLBACKS);
        self.write_u64(e.flip_index);
        self.write_surface(e.surface);
        self.write_count(e.fired);
        self.write_count(e.failed);
    }

    fn on_flip_summary(&mut self, s: &FlipSummary) {
        self.write_u8(TAG_FLIP_SUMMARY);
        self.write_u64(s.flip_index);
        self.write_surface(s.surface);
        self.write_sync(s.sync);
        self.write_option_time(s.target);
        self.write_u64(s.started.ticks());
        self.write_option_time(s.vbl);
        self.write_option_time(s.onset);
        self.write_option_time(s.completed);
        self.write_option_offset(s.miss);
        self.write_u64(s.preflip_ticks);
        self.write_u64(s.wait_ticks);
        self.write_u64(s.swap_ticks);
        self.write_phase(s.outcome);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`PhaseEvent`].
    Phase(PhaseEvent),
    /// A [`HookRunEvent`].
    HookRun(HookRunEvent),
    /// A [`SwapEvent`].
    Swap(SwapEvent),
    /// A [`CallbackEvent`].
    Callbacks(CallbackEvent),
    /// A [`FlipSummary`].
    FlipSummary(FlipSummary),
}

impl RecordedEvent {
    /// Flip counter of the event.
    #[must_use]
    pub fn flip_index(&self) -> u64 {
        match self {
            Self::Phase(e) => e.flip_index,
            Self::HookRun(e) => e.flip_index,
            Self::Swap(e) => e.flip_index,
            Self::Callbacks(e) => e.flip_index,
            Self::FlipSummary(s) => s.flip_index,
        }
    }
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
///
/// Stops at the first unknown tag or truncated record.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.pos.checked_add(N)?;
        let bytes = self.data.get(self.pos..end)?.try_into().ok()?;
        self.pos = end;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_count(&mut self) -> Option<usize> {
        usize::try_from(self.read_u32()?).ok()
    }

    fn read_time(&mut self) -> Option<HostTime> {
        self.read_u64().map(HostTime)
    }

    fn read_option_u64(&mut self) -> Option<Option<u64>> {
        let present = self.read_u8()?;
        let val = self.read_u64()?;
        Some((present != 0).then_some(val))
    }

    fn read_option_time(&mut self) -> Option<Option<HostTime>> {
        Some(self.read_option_u64()?.map(HostTime))
    }

    fn read_option_offset(&mut self) -> Option<Option<Offset>> {
        Some(
            self.read_option_u64()?
                .map(|v| Offset(i64::from_le_bytes(v.to_le_bytes()))),
        )
    }

    fn read_surface(&mut self) -> Option<SurfaceHandle> {
        self.read_u64().map(SurfaceHandle::from_bits)
    }

    fn read_phase(&mut self) -> Option<FlipPhase> {
        Some(match self.read_u8()? {
            0 => FlipPhase::Idle,
            1 => FlipPhase::PreFlipHooksRunning,
            2 => FlipPhase::Waiting,
            3 => FlipPhase::Swapping,
            4 => FlipPhase::PostSwapMeasuring,
            5 => FlipPhase::Completed,
            6 => FlipPhase::Missed,
            _ => FlipPhase::Failed,
        })
    }

    fn read_sync(&mut self) -> Option<SyncMode> {
        Some(match self.read_u8()? {
            0 => SyncMode::FullSync,
            1 => SyncMode::QueueOnly,
            2 => SyncMode::Immediate,
            _ => SyncMode::SpinWait,
        })
    }

    fn read_point(&mut self) -> Option<HookPoint> {
        HookPoint::ALL.get(usize::from(self.read_u8()?)).copied()
    }

    fn decode_phase(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Phase(PhaseEvent {
            flip_index: self.read_u64()?,
            surface: self.read_surface()?,
            phase: self.read_phase()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_hook_run(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::HookRun(HookRunEvent {
            flip_index: self.read_u64()?,
            surface: self.read_surface()?,
            point: self.read_point()?,
            stages: self.read_count()?,
            started: self.read_time()?,
            finished: self.read_time()?,
        }))
    }

    fn decode_swap(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Swap(SwapEvent {
            flip_index: self.read_u64()?,
            surface: self.read_surface()?,
            mode: match self.read_u8()? {
                0 => SwapMode::Synced,
                _ => SwapMode::Immediate,
            },
            issued_at: self.read_time()?,
        }))
    }

    fn decode_callbacks(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Callbacks(CallbackEvent {
            flip_index: self.read_u64()?,
            surface: self.read_surface()?,
            fired: self.read_count()?,
            failed: self.read_count()?,
        }))
    }

    fn decode_flip_summary(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::FlipSummary(FlipSummary {
            flip_index: self.read_u64()?,
            surface: self.read_surface()?,
            sync: self.read_sync()?,
            target: self.read_option_time()?,
            started: self.read_time()?,
            vbl: self.read_option_time()?,
            onset: self.read_option_time()?,
            completed: self.read_option_time()?,
            miss: self.read_option_offset()?,
            preflip_ticks: self.read_u64()?,
            wait_ticks: self.read_u64()?,
            swap_ticks: self.read_u64()?,
            outcome: self.read_phase()?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_u8()? {
            TAG_PHASE => self.decode_phase(),
            TAG_HOOK_RUN => self.decode_hook_run(),
            TAG_SWAP => self.decode_swap(),
            TAG_CALLBACKS => self.decode_callbacks(),
            TAG_FLIP_SUMMARY => self.decode_flip_summary(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> SurfaceHandle {
        SurfaceHandle::from_raw(2, 5)
    }

    fn sample_summary() -> FlipSummary {
        FlipSummary {
            flip_index: 7,
            surface: surface(),
            sync: SyncMode::SpinWait,
            target: Some(HostTime(1_000_000)),
            started: HostTime(990_000),
            vbl: Some(HostTime(1_016_667)),
            onset: Some(HostTime(1_017_000)),
            completed: None,
            miss: Some(Offset(-3_000)),
            preflip_ticks: 100,
            wait_ticks: 400,
            swap_ticks: 1500,
            outcome: FlipPhase::Completed,
        }
    }

    #[test]
    fn summary_survives_recording() {
        let mut rec = RecorderSink::new();
        let orig = sample_summary();
        rec.on_flip_summary(&orig);

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 1, "one event");
        match &events[0] {
            RecordedEvent::FlipSummary(s) => {
                assert_eq!(s.surface, orig.surface, "surface handle");
                assert_eq!(s.sync, orig.sync, "sync mode");
                assert_eq!(s.target, orig.target, "target");
                assert_eq!(s.completed, None, "absent completion");
                assert_eq!(s.miss, Some(Offset(-3_000)), "negative miss");
                assert_eq!(s.swap_ticks, orig.swap_ticks, "swap span");
                assert_eq!(s.outcome, orig.outcome, "outcome");
            }
            other => panic!("expected FlipSummary, got {other:?}"),
        }
    }

    #[test]
    fn mixed_events_decode_in_order() {
        let mut rec = RecorderSink::new();
        rec.on_phase(&PhaseEvent {
            flip_index: 1,
            surface: surface(),
            phase: FlipPhase::Waiting,
            timestamp: HostTime(10),
        });
        rec.on_hook_run(&HookRunEvent {
            flip_index: 1,
            surface: surface(),
            point: HookPoint::FinalOutputFormattingBlit,
            stages: 2,
            started: HostTime(11),
            finished: HostTime(19),
        });
        rec.on_swap(&SwapEvent {
            flip_index: 1,
            surface: surface(),
            mode: SwapMode::Immediate,
            issued_at: HostTime(20),
        });
        rec.on_callbacks(&CallbackEvent {
            flip_index: 1,
            surface: surface(),
            fired: 3,
            failed: 1,
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 4, "four events");
        assert!(
            matches!(events[0], RecordedEvent::Phase(PhaseEvent { phase: FlipPhase::Waiting, .. })),
            "{:?}",
            events[0]
        );
        match &events[1] {
            RecordedEvent::HookRun(e) => {
                assert_eq!(e.point, HookPoint::FinalOutputFormattingBlit, "point");
                assert_eq!(e.stages, 2, "stage count");
            }
            other => panic!("expected HookRun, got {other:?}"),
        }
        assert!(
            matches!(events[2], RecordedEvent::Swap(SwapEvent { mode: SwapMode::Immediate, .. })),
            "{:?}",
            events[2]
        );
        assert!(
            matches!(events[3], RecordedEvent::Callbacks(CallbackEvent { fired: 3, failed: 1, .. })),
            "{:?}",
            events[3]
        );
        assert!(events.iter().all(|e| e.flip_index() == 1), "flip index kept");
    }

    #[test]
    fn truncated_record_stops_decoding() {
        let mut rec = RecorderSink::new();
        rec.on_flip_summary(&sample_summary());
        rec.on_flip_summary(&sample_summary());
        let bytes = rec.into_bytes();
        let cut = &bytes[..bytes.len() - 3];
        assert_eq!(decode(cut).count(), 1, "partial second record dropped");
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        assert_eq!(decode(&[]).count(), 0, "nothing recorded");
    }
}
