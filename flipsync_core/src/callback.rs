// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred callbacks fired after a synchronized flip.
//!
//! Each entry owns its callable and its bound arguments. An entry is consumed
//! exactly once: it fires on the next synchronized flip of its surface, or it
//! is dropped unfired by an explicit clear or by closing the surface.
//! Entries of one surface fire in scheduling order.
//!
//! Callables receive the [`FlipTiming`] and their arguments but no access to
//! the engine, so they cannot re-enter it.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::error::{CallbackError, Error, Result};
use crate::surface::SurfaceHandle;
use crate::timing::FlipTiming;

/// Identifies a scheduled callback.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(pub u64);

impl fmt::Debug for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackId({})", self.0)
    }
}

/// An owned argument bound at scheduling time.
#[derive(Clone, Debug, PartialEq)]
pub enum CallbackArg {
    /// Integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Text.
    Text(String),
    /// Numeric array.
    Floats(Vec<f64>),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl From<i64> for CallbackArg {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for CallbackArg {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for CallbackArg {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for CallbackArg {
    fn from(v: &str) -> Self {
        Self::Text(v.into())
    }
}

impl From<String> for CallbackArg {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// The callable half of a pending callback.
pub type FlipCallback =
    Box<dyn FnOnce(&FlipTiming, Vec<CallbackArg>) -> Result<(), CallbackError> + Send>;

struct PendingCallback {
    id: CallbackId,
    surface: SurfaceHandle,
    label: String,
    callable: FlipCallback,
    args: Vec<CallbackArg>,
}

impl fmt::Debug for PendingCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCallback")
            .field("id", &self.id)
            .field("surface", &self.surface)
            .field("label", &self.label)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Outcome of one [`CallbackRegistry::fire`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FireReport {
    /// Callbacks invoked.
    pub fired: usize,
    /// Of those, how many returned an error.
    pub failed: usize,
}

/// FIFO list of pending callbacks across all surfaces.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    entries: Vec<PendingCallback>,
    next_id: u64,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Appends a callback for `surface`.
    ///
    /// Fails with [`Error::Resource`] if the entry cannot be allocated; the
    /// registry is left unchanged.
    pub fn schedule(
        &mut self,
        surface: SurfaceHandle,
        label: impl Into<String>,
        callable: FlipCallback,
        args: Vec<CallbackArg>,
    ) -> Result<CallbackId> {
        self.entries
            .try_reserve(1)
            .map_err(|_| Error::Resource("scheduling a flip callback"))?;
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.entries.push(PendingCallback {
            id,
            surface,
            label: label.into(),
            callable,
            args,
        });
        Ok(id)
    }

    /// Drops every pending callback of `surface` without invoking it.
    /// Returns how many were dropped.
    pub fn clear_for(&mut self, surface: SurfaceHandle) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.surface != surface);
        before - self.entries.len()
    }

    /// Drops every pending callback. Returns how many were dropped.
    pub fn clear_all(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Number of callbacks pending for `surface`.
    #[must_use]
    pub fn pending(&self, surface: SurfaceHandle) -> usize {
        self.entries.iter().filter(|e| e.surface == surface).count()
    }

    /// Total number of pending callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invokes and removes every callback of `surface`, in scheduling order.
    ///
    /// Entries of other surfaces stay untouched. A failing callback is
    /// logged and does not stop the rest.
    pub fn fire(&mut self, surface: SurfaceHandle, timing: &FlipTiming) -> FireReport {
        let (due, keep): (Vec<_>, Vec<_>) = core::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.surface == surface);
        self.entries = keep;

        let mut report = FireReport::default();
        for entry in due {
            report.fired += 1;
            if let Err(err) = (entry.callable)(timing, entry.args) {
                report.failed += 1;
                tracing::warn!(
                    surface = ?surface,
                    callback = ?entry.id,
                    label = %entry.label,
                    error = %err,
                    "flip callback failed"
                );
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::sync::Arc;
    use alloc::vec;
    use std::sync::Mutex;

    use super::*;
    use crate::time::HostTime;

    fn handle(i: u32) -> SurfaceHandle {
        SurfaceHandle::from_raw(i, 0)
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> FlipCallback {
        let log = Arc::clone(log);
        Box::new(move |_, args| {
            let mut line = String::from(name);
            for a in args {
                if let CallbackArg::Int(i) = a {
                    line.push_str(&alloc::format!(":{i}"));
                }
            }
            log.lock().unwrap().push(line);
            Ok(())
        })
    }

    #[test]
    fn fires_fifo_with_bound_args() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = CallbackRegistry::new();
        let s = handle(0);
        reg.schedule(s, "first", recorder(&log, "a"), vec![1_i64.into()]).unwrap();
        reg.schedule(s, "second", recorder(&log, "b"), vec![2_i64.into(), 3_i64.into()])
            .unwrap();
        reg.schedule(s, "third", recorder(&log, "c"), vec![]).unwrap();
        let report = reg.fire(s, &FlipTiming::unobserved());
        assert_eq!(report.fired, 3, "all fired");
        assert_eq!(*log.lock().unwrap(), ["a:1", "b:2:3", "c"], "scheduling order");
        assert!(reg.is_empty(), "entries consumed");
        assert_eq!(reg.fire(s, &FlipTiming::unobserved()).fired, 0, "never fire twice");
    }

    #[test]
    fn other_surfaces_are_kept() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = CallbackRegistry::new();
        reg.schedule(handle(0), "s", recorder(&log, "s"), vec![]).unwrap();
        reg.schedule(handle(1), "t", recorder(&log, "t"), vec![]).unwrap();
        reg.fire(handle(1), &FlipTiming::unobserved());
        assert_eq!(*log.lock().unwrap(), ["t"], "only T fired");
        assert_eq!(reg.pending(handle(0)), 1, "S still pending");
    }

    #[test]
    fn failure_does_not_stop_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = CallbackRegistry::new();
        let s = handle(0);
        reg.schedule(
            s,
            "broken",
            Box::new(|_, _| Err(CallbackError::new("boom"))),
            vec![],
        )
        .unwrap();
        reg.schedule(s, "fine", recorder(&log, "fine"), vec![]).unwrap();
        let report = reg.fire(s, &FlipTiming::unobserved());
        assert_eq!(report, FireReport { fired: 2, failed: 1 }, "one failure");
        assert_eq!(*log.lock().unwrap(), ["fine"], "later callback still ran");
    }

    #[test]
    fn clearing_drops_unfired_and_is_idempotent() {
        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);
        let mut reg = CallbackRegistry::new();
        let s = handle(0);
        reg.schedule(
            s,
            "x",
            Box::new(move |_, _| {
                *flag.lock().unwrap() = true;
                Ok(())
            }),
            vec![],
        )
        .unwrap();
        assert_eq!(reg.clear_for(s), 1, "one dropped");
        assert_eq!(reg.clear_for(s), 0, "second clear is a no-op");
        reg.fire(s, &FlipTiming::unobserved());
        assert!(!*fired.lock().unwrap(), "dropped callback never ran");
        assert_eq!(Arc::strong_count(&fired), 1, "callable was freed");
    }

    #[test]
    fn timing_is_injected() {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let mut reg = CallbackRegistry::new();
        let s = handle(0);
        reg.schedule(
            s,
            "t",
            Box::new(move |t, _| {
                *slot.lock().unwrap() = t.completed;
                Ok(())
            }),
            vec![],
        )
        .unwrap();
        let timing = FlipTiming {
            completed: Some(HostTime(42)),
            ..FlipTiming::unobserved()
        };
        reg.fire(s, &timing);
        assert_eq!(*seen.lock().unwrap(), Some(HostTime(42)), "timing passed through");
    }
}
