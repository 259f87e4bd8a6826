use std::sync::Arc;
use std::time::Duration;

use stampede_metrics::{MetricHandle, MetricKind, Registry};

use crate::classify::{Classification, OutcomeRules};
use crate::plan::RequestPlan;

/// Standard per-scenario metric names.
pub mod names {
    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    /// Share of requests that failed unexpectedly or could not be parsed.
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    /// Share of requests classified as success.
    pub const SUCCESS_RATE: &str = "success_rate";
    pub const OUTCOME_SUCCESS: &str = "outcome_success";
    pub const OUTCOME_EXPECTED: &str = "outcome_expected_failure";
    pub const OUTCOME_UNEXPECTED: &str = "outcome_unexpected_failure";
    pub const OUTCOME_PARSE_ERROR: &str = "outcome_parse_error";
    pub const TRANSPORT_ERRORS: &str = "transport_errors";
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const PLAN_ERRORS: &str = "plan_errors";
    pub const VUS: &str = "vus";
    pub const VUS_MAX: &str = "vus_max";
    /// Latency-threshold heuristic, not an authoritative cache signal.
    pub const CACHE_HIT_ESTIMATE: &str = "cache_hit_estimate";
}

pub const ENDPOINT_TAG: &str = "endpoint";

const STANDARD_SERIES: &[(&str, MetricKind)] = &[
    (names::HTTP_REQS, MetricKind::Counter),
    (names::HTTP_REQ_DURATION, MetricKind::Trend),
    (names::HTTP_REQ_FAILED, MetricKind::Rate),
    (names::SUCCESS_RATE, MetricKind::Rate),
    (names::OUTCOME_SUCCESS, MetricKind::Counter),
    (names::OUTCOME_EXPECTED, MetricKind::Counter),
    (names::OUTCOME_UNEXPECTED, MetricKind::Counter),
    (names::OUTCOME_PARSE_ERROR, MetricKind::Counter),
    (names::TRANSPORT_ERRORS, MetricKind::Counter),
    (names::ITERATIONS, MetricKind::Counter),
    (names::ITERATION_DURATION, MetricKind::Trend),
    (names::PLAN_ERRORS, MetricKind::Counter),
    (names::VUS, MetricKind::Gauge),
    (names::VUS_MAX, MetricKind::Gauge),
    (names::CACHE_HIT_ESTIMATE, MetricKind::Rate),
];

/// A declared metric name that would share a series it must not share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricNameClash {
    pub name: String,
    pub existing: MetricKind,
    pub declared: MetricKind,
}

/// Checks signature labels and per-endpoint metric names before any series is
/// registered. A declared name may not reuse a standard series, and one name
/// may not be declared with two kinds.
pub fn check_metric_names(plan: &RequestPlan, rules: &OutcomeRules) -> Result<(), MetricNameClash> {
    let labels = rules.labels();
    let endpoints = plan.endpoints();
    let declared = labels
        .iter()
        .map(|l| (&**l, MetricKind::Counter))
        .chain(endpoints.iter().flat_map(|ep| {
            let success = ep.metrics.success.as_deref().map(|n| (n, MetricKind::Counter));
            let latency = ep.metrics.latency.as_deref().map(|n| (n, MetricKind::Trend));
            success.into_iter().chain(latency)
        }));

    let mut seen: Vec<(&str, MetricKind)> = Vec::new();
    for (name, kind) in declared {
        if let Some((_, existing)) = STANDARD_SERIES.iter().find(|(n, _)| *n == name) {
            return Err(MetricNameClash {
                name: name.to_string(),
                existing: *existing,
                declared: kind,
            });
        }
        match seen.iter().find(|(n, _)| *n == name) {
            Some((_, existing)) if *existing != kind => {
                return Err(MetricNameClash {
                    name: name.to_string(),
                    existing: *existing,
                    declared: kind,
                });
            }
            Some(_) => {}
            None => seen.push((name, kind)),
        }
    }
    Ok(())
}

/// Result of one request, produced once and consumed by [`ScenarioMetrics::record`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub classification: Classification,
    pub latency: Duration,
    /// `None` when the transport failed before a status arrived.
    pub status: Option<u16>,
    pub scenario: Arc<str>,
    /// Endpoint id within the scenario's plan.
    pub endpoint: usize,
}

#[derive(Debug)]
struct EndpointHandles {
    reqs: MetricHandle,
    duration: MetricHandle,
    success: Option<MetricHandle>,
    latency: Option<MetricHandle>,
    cache_hit: Option<(Duration, MetricHandle)>,
}

/// Pre-resolved handles into one scenario's registry.
#[derive(Debug)]
pub struct ScenarioMetrics {
    registry: Arc<Registry>,
    endpoints: Vec<EndpointHandles>,
    failed: MetricHandle,
    success_rate: MetricHandle,
    outcome_success: MetricHandle,
    outcome_expected: MetricHandle,
    outcome_unexpected: MetricHandle,
    outcome_parse_error: MetricHandle,
    transport_errors: MetricHandle,
    signatures: Vec<(Arc<str>, MetricHandle)>,
    iterations: MetricHandle,
    iteration_duration: MetricHandle,
    plan_errors: MetricHandle,
    vus: MetricHandle,
    vus_max: MetricHandle,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

impl ScenarioMetrics {
    pub fn new(registry: Arc<Registry>, plan: &RequestPlan, rules: &OutcomeRules) -> Self {
        let r = &registry;
        let counter = |name: &str| r.handle(name, MetricKind::Counter, &[]);

        let endpoints = plan
            .endpoints()
            .into_iter()
            .map(|ep| {
                let tags = [(ENDPOINT_TAG, &*ep.name)];
                EndpointHandles {
                    reqs: r.handle(names::HTTP_REQS, MetricKind::Counter, &tags),
                    duration: r.handle(names::HTTP_REQ_DURATION, MetricKind::Trend, &tags),
                    success: ep
                        .metrics
                        .success
                        .as_deref()
                        .map(|n| r.handle(n, MetricKind::Counter, &[])),
                    latency: ep
                        .metrics
                        .latency
                        .as_deref()
                        .map(|n| r.handle(n, MetricKind::Trend, &[])),
                    cache_hit: ep.cache_hit_below.map(|below| {
                        (
                            below,
                            r.handle(names::CACHE_HIT_ESTIMATE, MetricKind::Rate, &tags),
                        )
                    }),
                }
            })
            .collect();

        let signatures = rules
            .labels()
            .into_iter()
            .map(|label| {
                let h = counter(&*label);
                (label, h)
            })
            .collect();

        Self {
            endpoints,
            failed: r.handle(names::HTTP_REQ_FAILED, MetricKind::Rate, &[]),
            success_rate: r.handle(names::SUCCESS_RATE, MetricKind::Rate, &[]),
            outcome_success: counter(names::OUTCOME_SUCCESS),
            outcome_expected: counter(names::OUTCOME_EXPECTED),
            outcome_unexpected: counter(names::OUTCOME_UNEXPECTED),
            outcome_parse_error: counter(names::OUTCOME_PARSE_ERROR),
            transport_errors: counter(names::TRANSPORT_ERRORS),
            signatures,
            iterations: counter(names::ITERATIONS),
            iteration_duration: r.handle(names::ITERATION_DURATION, MetricKind::Trend, &[]),
            plan_errors: counter(names::PLAN_ERRORS),
            vus: r.handle(names::VUS, MetricKind::Gauge, &[]),
            vus_max: r.handle(names::VUS_MAX, MetricKind::Gauge, &[]),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Appends one outcome. Never fails.
    pub fn record(&self, outcome: RequestOutcome) {
        let latency_ms = ms(outcome.latency);

        if let Some(ep) = self.endpoints.get(outcome.endpoint) {
            ep.reqs.increment(1);
            ep.duration.observe_trend(latency_ms);
            if let Some(h) = &ep.latency {
                h.observe_trend(latency_ms);
            }
            if outcome.classification.is_success() {
                if let Some(h) = &ep.success {
                    h.increment(1);
                }
                if let Some((below, h)) = &ep.cache_hit {
                    h.add_rate(outcome.latency < *below);
                }
            }
        }

        if outcome.status.is_none() {
            self.transport_errors.increment(1);
        }

        let failed = matches!(
            outcome.classification,
            Classification::UnexpectedFailure | Classification::ParseError
        );
        self.failed.add_rate(failed);
        self.success_rate
            .add_rate(outcome.classification.is_success());

        match &outcome.classification {
            Classification::Success => self.outcome_success.increment(1),
            Classification::ExpectedBusinessFailure { signature } => {
                self.outcome_expected.increment(1);
                if let Some((_, h)) = self.signatures.iter().find(|(l, _)| l == signature) {
                    h.increment(1);
                }
            }
            Classification::UnexpectedFailure => self.outcome_unexpected.increment(1),
            Classification::ParseError => self.outcome_parse_error.increment(1),
        }
    }

    pub fn record_iteration(&self, duration: Duration) {
        self.iterations.increment(1);
        self.iteration_duration.observe_trend(ms(duration));
    }

    pub fn record_plan_error(&self) {
        self.plan_errors.increment(1);
    }

    /// Counts a VU as active until the guard drops, tracking the peak.
    pub fn enter_active_vu(&self) -> ActiveVuGuard {
        let now = self.vus.increment_gauge(1);
        self.vus_max.max_gauge(now);
        ActiveVuGuard {
            vus: self.vus.clone(),
        }
    }

    pub fn active_vus(&self) -> i64 {
        self.vus.get_gauge()
    }

    pub fn requests_total(&self) -> u64 {
        self.endpoints.iter().map(|e| e.reqs.get_counter()).sum()
    }

    pub fn iterations_total(&self) -> u64 {
        self.iterations.get_counter()
    }

    pub fn unexpected_total(&self) -> u64 {
        self.outcome_unexpected.get_counter() + self.outcome_parse_error.get_counter()
    }

    pub fn expected_total(&self) -> u64 {
        self.outcome_expected.get_counter()
    }
}

#[must_use]
pub struct ActiveVuGuard {
    vus: MetricHandle,
}

impl Drop for ActiveVuGuard {
    fn drop(&mut self) {
        self.vus.decrement_gauge(1);
    }
}
