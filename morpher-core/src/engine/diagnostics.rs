//! Lock-free stream counters.
//!
//! The audio thread never logs per callback; it bumps these instead, and a
//! non-real-time reader takes a [`DiagnosticsSnapshot`].

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct StreamDiagnostics {
    pub callbacks: AtomicUsize,
    pub frames_in: AtomicUsize,
    pub frames_out: AtomicUsize,
    pub underruns: AtomicUsize,
    /// Silent frames written by underruns.
    pub underrun_frames: AtomicUsize,
    pub skipped_triggers: AtomicUsize,
    pub inference_requests: AtomicUsize,
    pub dropped_requests: AtomicUsize,
    pub inference_completed: AtomicUsize,
    pub inference_errors: AtomicUsize,
    pub discarded_results: AtomicUsize,
}

impl StreamDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            underrun_frames: self.underrun_frames.load(Ordering::Relaxed),
            skipped_triggers: self.skipped_triggers.load(Ordering::Relaxed),
            inference_requests: self.inference_requests.load(Ordering::Relaxed),
            dropped_requests: self.dropped_requests.load(Ordering::Relaxed),
            inference_completed: self.inference_completed.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            discarded_results: self.discarded_results.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn counters(&self) -> [&AtomicUsize; 11] {
        [
            &self.callbacks,
            &self.frames_in,
            &self.frames_out,
            &self.underruns,
            &self.underrun_frames,
            &self.skipped_triggers,
            &self.inference_requests,
            &self.dropped_requests,
            &self.inference_completed,
            &self.inference_errors,
            &self.discarded_results,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub callbacks: usize,
    pub frames_in: usize,
    pub frames_out: usize,
    pub underruns: usize,
    pub underrun_frames: usize,
    pub skipped_triggers: usize,
    pub inference_requests: usize,
    pub dropped_requests: usize,
    pub inference_completed: usize,
    pub inference_errors: usize,
    pub discarded_results: usize,
}
