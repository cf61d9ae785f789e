//! # Run State Tracking
//!
//! A long evaluation is polled from outside (the status endpoint of the
//! surrounding service), so the run's fractional completion and running
//! flag live in a small thread-safe tracker rather than ambient globals.
//! Entry is guarded by compare-and-swap: [`RunTracker::begin`] fails if a
//! run is already active, and the returned RAII guard forces the state
//! back to `progress = 1.0, is_running = false` on every exit path,
//! including error propagation and panics. Only the guard holder mutates
//! progress; everyone else takes read-only snapshots.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("an evaluation run is already in progress")]
pub struct RunInProgress;

/// Point-in-time view of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunStatus {
    /// Fractional completion in `[0, 1]`.
    pub progress: f64,
    pub is_running: bool,
}

/// Shared run state. Cheap to clone behind an `Arc` and safe to poll from
/// any thread.
#[derive(Debug, Default)]
pub struct RunTracker {
    /// `f64` progress stored as its bit pattern.
    progress_bits: AtomicU64,
    running: AtomicBool,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the tracker for a new run. Fails if one is already active.
    pub fn begin(&self) -> Result<RunGuard<'_>, RunInProgress> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RunInProgress)?;
        self.progress_bits.store(0.0f64.to_bits(), Ordering::SeqCst);
        Ok(RunGuard { tracker: self })
    }

    pub fn snapshot(&self) -> RunStatus {
        RunStatus {
            progress: f64::from_bits(self.progress_bits.load(Ordering::SeqCst)),
            is_running: self.running.load(Ordering::SeqCst),
        }
    }

    /// Monotonic within a run: a lower fraction than the current one is a
    /// no-op rather than a visible regression.
    fn advance_to(&self, fraction: f64) {
        let clamped = fraction.clamp(0.0, 1.0);
        let mut current = self.progress_bits.load(Ordering::SeqCst);
        while f64::from_bits(current) < clamped {
            match self.progress_bits.compare_exchange(
                current,
                clamped.to_bits(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Write handle for the active run. Dropping it completes the run.
pub struct RunGuard<'a> {
    tracker: &'a RunTracker,
}

impl RunGuard<'_> {
    pub fn advance_to(&self, fraction: f64) {
        self.tracker.advance_to(fraction);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.tracker
            .progress_bits
            .store(1.0f64.to_bits(), Ordering::SeqCst);
        self.tracker.running.store(false, Ordering::SeqCst);
    }
}
