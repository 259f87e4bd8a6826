use std::collections::BTreeMap;
use std::time::Duration;

use stampede_metrics::{MetricKind, MetricSeriesSummary, Registry, TrendSummary, summarize_samples};

use crate::config::{ScenarioConfig, ScenarioExecutorKind};
use crate::outcome::{ENDPOINT_TAG, names};
use crate::thresholds::{ThresholdSet, ThresholdViolation, evaluate_thresholds};

/// Terminal, read-only view of a run. Built once, after every VU has finished.
#[derive(Debug, Clone)]
pub struct SummaryReport {
    pub elapsed: Duration,
    pub budget: Option<Duration>,
    /// The budget expired before every scenario finished on its own.
    pub budget_exceeded: bool,
    pub scenarios: Vec<ScenarioSummary>,
    pub threshold_violations: Vec<ThresholdViolation>,
}

impl SummaryReport {
    pub fn unexpected_total(&self) -> u64 {
        self.scenarios
            .iter()
            .map(|s| s.outcomes.unexpected + s.outcomes.parse_error)
            .sum()
    }

    pub fn has_unexpected(&self) -> bool {
        self.unexpected_total() > 0
    }

    pub fn thresholds_failed(&self) -> bool {
        !self.threshold_violations.is_empty()
    }

    pub fn requests_total(&self) -> u64 {
        self.scenarios.iter().map(|s| s.requests).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum IncompleteReason {
    /// `per-vu-iterations` hit its safety cutoff.
    MaxDurationReached,
    BudgetExceeded,
    /// The budget expired before the scenario's start offset.
    NotStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Completed,
    Incomplete(IncompleteReason),
}

impl Completion {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub success: u64,
    pub expected: u64,
    pub unexpected: u64,
    pub parse_error: u64,
    /// Subset of `unexpected` (or `expected`, for tolerated timeouts) with no response.
    pub transport_errors: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.success + self.expected + self.unexpected + self.parse_error
    }
}

#[derive(Debug, Clone)]
pub struct EndpointSummary {
    pub name: String,
    pub requests: u64,
    pub latency: TrendSummary,
}

#[derive(Debug, Clone)]
pub struct ScenarioSummary {
    pub name: String,
    pub exec: ScenarioExecutorKind,
    pub start_time: Duration,
    pub completion: Completion,
    pub iterations: u64,
    pub requests: u64,
    pub outcomes: OutcomeCounts,
    pub expected_by_signature: BTreeMap<String, u64>,
    /// `http_req_duration` over every endpoint, in milliseconds.
    pub latency: TrendSummary,
    pub iteration_duration: TrendSummary,
    pub endpoints: Vec<EndpointSummary>,
    pub vus_max: u64,
    pub plan_errors: u64,
    /// Every series of the scenario registry, custom metrics included.
    pub metrics: Vec<MetricSeriesSummary>,
}

/// Everything the summary needs to know about one finished scenario.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioRecord<'a> {
    pub config: &'a ScenarioConfig,
    pub registry: &'a Registry,
    pub started: bool,
    pub interrupted: bool,
    pub cut_off: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RunRecord {
    pub elapsed: Duration,
    pub budget: Option<Duration>,
    pub budget_exceeded: bool,
}

pub fn build_summary(
    run: RunRecord,
    scenarios: &[ScenarioRecord<'_>],
    thresholds: &[ThresholdSet],
) -> SummaryReport {
    let registries: Vec<(&str, &Registry)> = scenarios
        .iter()
        .map(|s| (&*s.config.name, s.registry))
        .collect();

    SummaryReport {
        elapsed: run.elapsed,
        budget: run.budget,
        budget_exceeded: run.budget_exceeded,
        scenarios: scenarios.iter().map(scenario_summary).collect(),
        threshold_violations: evaluate_thresholds(&registries, thresholds),
    }
}

fn counter(registry: &Registry, name: &str) -> u64 {
    registry
        .lookup(name)
        .map(|(id, _)| registry.query(id).sum_counter_total())
        .unwrap_or(0)
}

fn trend(registry: &Registry, name: &str) -> TrendSummary {
    registry
        .lookup(name)
        .map(|(id, _)| summarize_samples(&registry.query(id).trend_samples()))
        .unwrap_or_default()
}

fn scenario_summary(record: &ScenarioRecord<'_>) -> ScenarioSummary {
    let r = record.registry;
    let config = record.config;

    let completion = if !record.started {
        Completion::Incomplete(IncompleteReason::NotStarted)
    } else if record.interrupted {
        Completion::Incomplete(IncompleteReason::BudgetExceeded)
    } else if record.cut_off {
        Completion::Incomplete(IncompleteReason::MaxDurationReached)
    } else {
        Completion::Completed
    };

    let expected_by_signature = config
        .rules
        .labels()
        .into_iter()
        .map(|label| {
            let n = counter(r, &label);
            (label.to_string(), n)
        })
        .collect();

    let endpoints = config
        .plan
        .endpoints()
        .into_iter()
        .map(|ep| {
            let (requests, samples) = match (
                r.lookup(names::HTTP_REQS),
                r.lookup(names::HTTP_REQ_DURATION),
            ) {
                (Some((reqs, _)), Some((dur, _))) => (
                    r.query(reqs).where_eq(ENDPOINT_TAG, &ep.name).sum_counter_total(),
                    r.query(dur).where_eq(ENDPOINT_TAG, &ep.name).trend_samples(),
                ),
                _ => (0, Vec::new()),
            };
            EndpointSummary {
                name: ep.name.to_string(),
                requests,
                latency: summarize_samples(&samples),
            }
        })
        .collect();

    let vus_max = r
        .lookup(names::VUS_MAX)
        .filter(|(_, kind)| *kind == MetricKind::Gauge)
        .and_then(|(id, _)| r.query(id).max_gauge())
        .unwrap_or(0)
        .max(0) as u64;

    ScenarioSummary {
        name: config.name.to_string(),
        exec: config.executor.kind(),
        start_time: config.start_time,
        completion,
        iterations: counter(r, names::ITERATIONS),
        requests: counter(r, names::HTTP_REQS),
        outcomes: OutcomeCounts {
            success: counter(r, names::OUTCOME_SUCCESS),
            expected: counter(r, names::OUTCOME_EXPECTED),
            unexpected: counter(r, names::OUTCOME_UNEXPECTED),
            parse_error: counter(r, names::OUTCOME_PARSE_ERROR),
            transport_errors: counter(r, names::TRANSPORT_ERRORS),
        },
        expected_by_signature,
        latency: trend(r, names::HTTP_REQ_DURATION),
        iteration_duration: trend(r, names::ITERATION_DURATION),
        endpoints,
        vus_max,
        plan_errors: counter(r, names::PLAN_ERRORS),
        metrics: r.summarize(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classification, Matcher, OutcomeRules, Signature};
    use crate::config::ScenarioExecutor;
    use crate::outcome::{RequestOutcome, ScenarioMetrics};
    use crate::plan::{EndpointSpec, RequestPlan};
    use crate::think::ThinkTime;
    use std::sync::Arc;

    fn config() -> ScenarioConfig {
        let spec = EndpointSpec {
            name: "issue".into(),
            method: "POST".into(),
            path: "/api/coupons/1/issue".into(),
            weight: 1.0,
            ..EndpointSpec::default()
        };
        let plan = match RequestPlan::new(vec![spec], ThinkTime::default()) {
            Ok(p) => p,
            Err(e) => panic!("{e}"),
        };
        ScenarioConfig {
            name: "coupon".into(),
            start_time: Duration::ZERO,
            executor: ScenarioExecutor::PerVuIterations {
                vus: 1,
                iterations: 3,
                max_duration: Duration::from_secs(60),
            },
            plan: Arc::new(plan),
            rules: Arc::new(OutcomeRules::with_signatures(vec![Signature::new(
                "coupon_sold_out",
                Matcher::CodeEquals("COUPON_SOLD_OUT".into()),
            )])),
        }
    }

    fn outcome(classification: Classification, ms: u64) -> RequestOutcome {
        RequestOutcome {
            classification,
            latency: Duration::from_millis(ms),
            status: Some(200),
            scenario: "coupon".into(),
            endpoint: 0,
        }
    }

    #[test]
    fn summary_reflects_recorded_outcomes() {
        let config = config();
        let registry = Arc::new(Registry::default());
        let metrics = ScenarioMetrics::new(registry.clone(), &config.plan, &config.rules);
        metrics.record(outcome(Classification::Success, 10));
        metrics.record(outcome(
            Classification::ExpectedBusinessFailure {
                signature: "coupon_sold_out".into(),
            },
            20,
        ));
        metrics.record(outcome(Classification::ParseError, 30));
        metrics.record_iteration(Duration::from_millis(60));

        let report = build_summary(
            RunRecord {
                elapsed: Duration::from_secs(1),
                budget: None,
                budget_exceeded: false,
            },
            &[ScenarioRecord {
                config: &config,
                registry: &registry,
                started: true,
                interrupted: false,
                cut_off: false,
            }],
            &[],
        );

        let s = &report.scenarios[0];
        assert_eq!(s.requests, 3);
        assert_eq!(s.outcomes.total(), 3);
        assert_eq!(s.outcomes.expected, 1);
        assert_eq!(s.expected_by_signature.get("coupon_sold_out"), Some(&1));
        assert_eq!(s.latency.count, 3);
        assert_eq!(s.latency.p50, Some(20.0));
        assert_eq!(s.endpoints[0].requests, 3);
        assert_eq!(s.completion, Completion::Completed);
        assert!(report.has_unexpected());
        assert!(!report.thresholds_failed());
    }

    #[test]
    fn interrupted_and_unstarted_scenarios_are_incomplete() {
        let config = config();
        let registry = Registry::default();
        let run = RunRecord {
            elapsed: Duration::from_secs(5),
            budget: Some(Duration::from_secs(5)),
            budget_exceeded: true,
        };
        let record = ScenarioRecord {
            config: &config,
            registry: &registry,
            started: true,
            interrupted: true,
            cut_off: false,
        };
        let report = build_summary(run, &[record], &[]);
        assert_eq!(
            report.scenarios[0].completion,
            Completion::Incomplete(IncompleteReason::BudgetExceeded)
        );

        let report = build_summary(
            run,
            &[ScenarioRecord {
                started: false,
                ..record
            }],
            &[],
        );
        assert_eq!(
            report.scenarios[0].completion,
            Completion::Incomplete(IncompleteReason::NotStarted)
        );
        assert_eq!(report.scenarios[0].requests, 0);
        assert!(!report.has_unexpected());
    }
}
