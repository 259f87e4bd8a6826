use std::time::Duration;

use crate::config::ScenarioExecutorKind;

#[derive(Debug, Clone)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    /// Time since the run started.
    pub elapsed: Duration,
    pub scenario: String,
    pub exec: ScenarioExecutorKind,
    /// `false` until the scenario's start offset has passed.
    pub started: bool,
    pub active_vus: u64,
    pub target_vus: u64,
    /// Nominal scenario length (stage total, duration or safety cutoff).
    pub total_duration: Duration,
    pub stage: Option<StageProgress>,

    pub requests_total: u64,
    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,
    pub iterations_total: u64,
    pub expected_total: u64,
    pub unexpected_total: u64,
}

pub type ProgressFn = std::sync::Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
