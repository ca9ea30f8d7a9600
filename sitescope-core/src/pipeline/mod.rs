//! The analysis pipeline.
//!
//! A [`PipelineSession`] moves through
//! `Planning → Researching → Synthesizing → Evaluating → Writing → Done`,
//! ending in `Failed` or `Cancelled` when a stage cannot finish. The
//! [`Pipeline`] owns the stage components and drives a session through
//! them, reporting progress through a [`PipelineCallback`].

pub mod engine;
pub mod session;

use std::sync::{Mutex, MutexGuard};

pub use engine::Pipeline;
pub use session::{NoOpPipelineCallback, PipelineCallback, PipelineSession, PipelineState};

use crate::research::{Aspect, AspectFinding};

/// A callback that records every event, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingCallback {
    states: Mutex<Vec<PipelineState>>,
    planned: Mutex<Vec<Aspect>>,
    completed: Mutex<Vec<(String, usize, usize)>>,
    failures: Mutex<Vec<(PipelineState, String)>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// States entered, in order.
    pub fn states(&self) -> Vec<PipelineState> {
        lock(&self.states).clone()
    }

    pub fn planned_aspects(&self) -> Vec<Aspect> {
        lock(&self.planned).clone()
    }

    /// `(aspect name, completed, total)` for each finished aspect.
    pub fn completed_aspects(&self) -> Vec<(String, usize, usize)> {
        lock(&self.completed).clone()
    }

    pub fn failures(&self) -> Vec<(PipelineState, String)> {
        lock(&self.failures).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PipelineCallback for RecordingCallback {
    fn on_state_change(&self, state: PipelineState, _progress: f32) {
        lock(&self.states).push(state);
    }

    fn on_aspects_planned(&self, aspects: &[Aspect]) {
        lock(&self.planned).extend_from_slice(aspects);
    }

    fn on_aspect_complete(&self, finding: &AspectFinding, completed: usize, total: usize) {
        lock(&self.completed).push((finding.aspect.name.clone(), completed, total));
    }

    fn on_failed(&self, stage: PipelineState, error: &str) {
        lock(&self.failures).push((stage, error.to_string()));
    }
}
