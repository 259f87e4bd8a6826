mod classify;
mod config;
mod error;
mod gate;
mod hooks;
mod outcome;
mod plan;
mod progress;
mod run;
mod schedule;
mod select;
mod shared;
mod summary;
mod template;
mod think;
mod thresholds;
mod transport;
mod vu;

pub use classify::{
    Classification, DecodeError, ErrorBody, Matcher, OutcomeRules, Signature,
    TRANSPORT_TIMEOUT_LABEL, Verdict, classify, classify_response, classify_transport_error,
    decode,
};
pub use config::{
    DEFAULT_MAX_DURATION, MAX_CONFIGURED_DURATION, RunConfig, ScenarioConfig, ScenarioExecutor,
    ScenarioExecutorKind, ScenarioOptions, Stage,
};
pub use error::{Error, Result};
pub use gate::{IterationGate, Signal};
pub use hooks::{HookContext, HookError, HookStep, NoHooks, RunHooks, StepHooks};
pub use outcome::{
    ActiveVuGuard, ENDPOINT_TAG, MetricNameClash, RequestOutcome, ScenarioMetrics,
    check_metric_names, names,
};
pub use plan::{Capture, Endpoint, EndpointMetrics, EndpointSpec, PlanError, RequestPlan};
pub use progress::{ProgressFn, ProgressUpdate, StageProgress};
pub use run::{RunCoordinator, RunOptions, scenarios_from_options};
pub use schedule::{RampSchedule, RampingSchedule, StageSnapshot};
pub use select::WeightedTable;
pub use shared::SharedVars;
pub use summary::{
    Completion, EndpointSummary, IncompleteReason, OutcomeCounts, RunRecord, ScenarioRecord,
    ScenarioSummary, SummaryReport, build_summary,
};
pub use template::{IterationVars, JsonTemplate, Placeholder, StrTemplate, TemplateContext};
pub use think::ThinkTime;
pub use thresholds::{
    ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdSet, ThresholdViolation, ViolationReason,
    evaluate_thresholds, parse_threshold_expr,
};
pub use transport::Transport;

pub use stampede_http::{HttpClient, HttpRequest, HttpResponse};
pub use stampede_metrics::{MetricKind, MetricSeriesSummary, MetricValue, Registry, TrendSummary};
