//! Progress reporting for test runs

use crate::types::TestPhase;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// One progress event emitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub phase: TestPhase,
    /// 0..=100, never decreasing within a run except when the run fails
    pub percent: f64,
    pub message: String,
    pub failed: bool,
}

/// Observer for progress events (console renderer, logs, tests)
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
}

/// Sink that discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

/// Sink that keeps every update, for inspection after a run
#[derive(Debug, Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update.clone());
        }
    }
}

/// Clamps reported progress so it never moves backwards
pub struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    current: f64,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self { sink, current: 0.0 }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    /// Report `percent`, or the current value if `percent` is lower
    pub fn advance(&mut self, phase: TestPhase, percent: f64, message: impl Into<String>) {
        self.current = self.current.max(percent.clamp(0.0, 100.0));
        self.sink.on_progress(&ProgressUpdate {
            phase,
            percent: self.current,
            message: message.into(),
            failed: false,
        });
    }

    /// Report `start + fraction * span`, for progress within a phase
    pub fn advance_within(&mut self, phase: TestPhase, start: f64, span: f64, fraction: f64, message: impl Into<String>) {
        self.advance(phase, start + span * fraction.clamp(0.0, 1.0), message);
    }

    /// Mark the run failed; this is the one update allowed to drop to 0
    pub fn fail(&mut self, message: impl Into<String>) {
        self.current = 0.0;
        self.sink.on_progress(&ProgressUpdate {
            phase: TestPhase::Failed,
            percent: 0.0,
            message: message.into(),
            failed: true,
        });
    }
}
