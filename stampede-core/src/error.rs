use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("setup failed: {0}")]
    Setup(#[source] crate::HookError),

    #[error("scenario `{scenario}`: `vus` must be a positive integer")]
    InvalidVus { scenario: String },

    #[error("scenario `{scenario}`: `iterations` must be a positive integer")]
    InvalidIterations { scenario: String },

    #[error("scenario `{scenario}`: `duration` must be a positive duration")]
    InvalidDuration { scenario: String },

    #[error(
        "scenario `{scenario}`: invalid executor `{executor}` (expected `ramping-vus`, `constant-vus`, or `per-vu-iterations`)"
    )]
    InvalidExecutor { scenario: String, executor: String },

    #[error("scenario `{scenario}`: `stages` must be a non-empty array of {{ duration, target }}")]
    InvalidStages { scenario: String },

    #[error("scenario `{scenario}`: `maxDuration` must be positive, got {max_duration:?}")]
    InvalidMaxDuration {
        scenario: String,
        max_duration: Duration,
    },

    #[error("scenario `{scenario}`: `{field}` of {value:?} exceeds the one-week limit")]
    DurationTooLong {
        scenario: String,
        field: &'static str,
        value: Duration,
    },

    #[error(
        "scenario `{scenario}`: {declared} metric `{name}` clashes with an existing {existing} series"
    )]
    MetricNameConflict {
        scenario: String,
        name: String,
        existing: stampede_metrics::MetricKind,
        declared: stampede_metrics::MetricKind,
    },

    #[error("duplicate scenario name `{0}`")]
    DuplicateScenario(String),

    #[error("unknown scenario `{0}`")]
    UnknownScenario(String),

    #[error("no scenarios to run")]
    NoScenarios,

    #[error("invalid threshold expression for metric `{metric}`: {error}")]
    InvalidThreshold { metric: String, error: String },
}

impl Error {
    #[must_use]
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup(_))
    }
}
