use std::sync::Arc;
use std::time::Duration;

use crate::classify::OutcomeRules;
use crate::plan::RequestPlan;

/// Default safety cutoff for `per-vu-iterations`.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(600);

/// Upper bound for any configured span: start offsets, durations, stages,
/// cutoffs, budgets and request timeouts.
pub const MAX_CONFIGURED_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub vus: Option<u64>,
    pub iterations: Option<u64>,
    pub duration: Option<Duration>,
    /// Restrict the run to these scenario names. Empty means all.
    pub only: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioExecutor {
    /// Piecewise-linear VU target over stages.
    RampingVus { start_vus: u64, stages: Vec<Stage> },

    ConstantVus { vus: u64, duration: Duration },

    /// Each VU runs `iterations` iterations, bounded by `max_duration`.
    PerVuIterations {
        vus: u64,
        iterations: u64,
        max_duration: Duration,
    },
}

impl ScenarioExecutor {
    pub fn kind(&self) -> ScenarioExecutorKind {
        match self {
            Self::RampingVus { .. } => ScenarioExecutorKind::RampingVus,
            Self::ConstantVus { .. } => ScenarioExecutorKind::ConstantVus,
            Self::PerVuIterations { .. } => ScenarioExecutorKind::PerVuIterations,
        }
    }

    /// Upper bound of concurrently active VUs.
    pub fn max_vus(&self) -> u64 {
        match self {
            Self::RampingVus { start_vus, stages } => stages
                .iter()
                .map(|s| s.target)
                .max()
                .unwrap_or(0)
                .max(*start_vus),
            Self::ConstantVus { vus, .. } | Self::PerVuIterations { vus, .. } => *vus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ScenarioExecutorKind {
    #[strum(serialize = "ramping-vus")]
    RampingVus,

    #[strum(to_string = "constant-vus", serialize = "constant")]
    ConstantVus,

    #[strum(serialize = "per-vu-iterations")]
    PerVuIterations,
}

/// Scenario as declared, before validation and CLI overrides.
#[derive(Debug, Clone)]
pub struct ScenarioOptions {
    pub name: String,
    pub executor: Option<String>,
    pub start_time: Duration,

    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    pub iterations: Option<u64>,
    pub max_duration: Option<Duration>,

    pub start_vus: Option<u64>,
    pub stages: Vec<Stage>,

    pub plan: Arc<RequestPlan>,
    pub rules: Arc<OutcomeRules>,
}

/// Validated scenario, immutable for the whole run.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub name: Arc<str>,
    pub start_time: Duration,
    pub executor: ScenarioExecutor,
    pub plan: Arc<RequestPlan>,
    pub rules: Arc<OutcomeRules>,
}
