use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use stampede_core::{
    Completion, MetricValue, ProgressUpdate, ScenarioSummary, SummaryReport, TrendSummary,
};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _document: &Path, _scenarios: &[stampede_core::ScenarioConfig]) {}

    fn progress(&self) -> Option<stampede_core::ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, summary: &SummaryReport) -> anyhow::Result<()> {
        let doc = summary_document(summary);
        let mut stdout = std::io::stdout().lock();
        serde_json::to_writer(&mut stdout, &doc)?;
        writeln!(stdout)?;
        Ok(())
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut stdout = std::io::stdout().lock();
    if serde_json::to_writer(&mut stdout, line).is_ok() {
        let _ = writeln!(stdout);
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub scenario: String,
    pub executor: String,
    pub started: bool,
    pub active_vus: u64,
    pub target_vus: u64,
    pub stage: Option<usize>,
    pub stages: Option<usize>,
    pub requests_total: u64,
    pub requests_per_sec: f64,
    pub iterations_total: u64,
    pub expected_total: u64,
    pub unexpected_total: u64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        scenario: u.scenario.clone(),
        executor: u.exec.to_string(),
        started: u.started,
        active_vus: u.active_vus,
        target_vus: u.target_vus,
        stage: u.stage.as_ref().map(|s| s.stage),
        stages: u.stage.as_ref().map(|s| s.stages),
        requests_total: u.requests_total,
        requests_per_sec: u.rps_now,
        iterations_total: u.iterations_total,
        expected_total: u.expected_total,
        unexpected_total: u.unexpected_total,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummary {
    pub kind: &'static str,
    pub elapsed_secs: f64,
    pub budget_secs: Option<f64>,
    pub budget_exceeded: bool,
    pub passed: bool,
    pub scenarios: Vec<JsonScenarioSummary>,
    pub totals: JsonTotals,
    pub threshold_violations: Vec<JsonThresholdViolation>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonScenarioSummary {
    pub scenario: String,
    pub executor: String,
    pub start_time_secs: f64,
    pub completed: bool,
    /// `max_duration_reached`, `budget_exceeded` or `not_started`.
    pub incomplete_reason: Option<String>,

    pub requests_total: u64,
    pub iterations_total: u64,
    pub success: u64,
    pub expected_failures: u64,
    pub unexpected_failures: u64,
    pub parse_errors: u64,
    pub transport_errors: u64,
    pub plan_errors: u64,
    pub vus_max: u64,
    pub expected_by_signature: BTreeMap<String, u64>,

    pub latency_ms: JsonTrend,
    pub iteration_duration_ms: JsonTrend,
    pub endpoints: Vec<JsonEndpoint>,
    pub metrics: Vec<JsonMetric>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonTrend {
    pub count: u64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

impl From<&TrendSummary> for JsonTrend {
    fn from(t: &TrendSummary) -> Self {
        Self {
            count: t.count,
            avg: t.avg,
            min: t.min,
            max: t.max,
            p50: t.p50,
            p90: t.p90,
            p95: t.p95,
            p99: t.p99,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonEndpoint {
    pub name: String,
    pub requests: u64,
    pub latency_ms: JsonTrend,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonMetric {
    pub name: String,
    pub kind: String,
    pub tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub value: JsonMetricValue,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum JsonMetricValue {
    Count { count: u64 },
    Gauge { value: i64 },
    Rate { total: u64, hits: u64, rate: Option<f64> },
    Trend { trend: JsonTrend },
}

#[derive(Debug, Serialize, Default)]
pub(crate) struct JsonTotals {
    pub requests_total: u64,
    pub iterations_total: u64,
    pub unexpected_failures: u64,
    pub parse_errors: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThresholdViolation {
    pub metric: String,
    pub scenario: Option<String>,
    pub expression: String,
    pub observed: Option<f64>,
    /// `not_met`, `no_samples` or `missing_series`.
    pub reason: String,
}

/// The document printed by `--output json` and written by `--summary-out`.
pub(crate) fn summary_document(summary: &SummaryReport) -> JsonSummary {
    let mut totals = JsonTotals::default();
    let scenarios = summary
        .scenarios
        .iter()
        .map(|s| {
            totals.requests_total = totals.requests_total.saturating_add(s.requests);
            totals.iterations_total = totals.iterations_total.saturating_add(s.iterations);
            totals.unexpected_failures = totals
                .unexpected_failures
                .saturating_add(s.outcomes.unexpected);
            totals.parse_errors = totals.parse_errors.saturating_add(s.outcomes.parse_error);
            scenario_json(s)
        })
        .collect();

    let threshold_violations = summary
        .threshold_violations
        .iter()
        .map(|v| JsonThresholdViolation {
            metric: v.metric.clone(),
            scenario: v.scenario.clone(),
            expression: v.expression.clone(),
            observed: v.observed,
            reason: v.reason.to_string(),
        })
        .collect();

    JsonSummary {
        kind: "summary",
        elapsed_secs: summary.elapsed.as_secs_f64(),
        budget_secs: summary.budget.map(|b| b.as_secs_f64()),
        budget_exceeded: summary.budget_exceeded,
        passed: !summary.has_unexpected() && !summary.thresholds_failed(),
        scenarios,
        totals,
        threshold_violations,
    }
}

fn scenario_json(s: &ScenarioSummary) -> JsonScenarioSummary {
    let incomplete_reason = match s.completion {
        Completion::Completed => None,
        Completion::Incomplete(reason) => Some(reason.to_string()),
    };

    JsonScenarioSummary {
        scenario: s.name.clone(),
        executor: s.exec.to_string(),
        start_time_secs: s.start_time.as_secs_f64(),
        completed: s.completion.is_complete(),
        incomplete_reason,
        requests_total: s.requests,
        iterations_total: s.iterations,
        success: s.outcomes.success,
        expected_failures: s.outcomes.expected,
        unexpected_failures: s.outcomes.unexpected,
        parse_errors: s.outcomes.parse_error,
        transport_errors: s.outcomes.transport_errors,
        plan_errors: s.plan_errors,
        vus_max: s.vus_max,
        expected_by_signature: s.expected_by_signature.clone(),
        latency_ms: JsonTrend::from(&s.latency),
        iteration_duration_ms: JsonTrend::from(&s.iteration_duration),
        endpoints: s
            .endpoints
            .iter()
            .map(|ep| JsonEndpoint {
                name: ep.name.clone(),
                requests: ep.requests,
                latency_ms: JsonTrend::from(&ep.latency),
            })
            .collect(),
        metrics: s
            .metrics
            .iter()
            .map(|m| JsonMetric {
                name: m.name.clone(),
                kind: m.kind.to_string(),
                tags: m.tags.iter().cloned().collect(),
                value: match &m.values {
                    MetricValue::Counter(count) => JsonMetricValue::Count { count: *count },
                    MetricValue::Gauge(value) => JsonMetricValue::Gauge { value: *value },
                    MetricValue::Rate { total, hits, rate } => JsonMetricValue::Rate {
                        total: *total,
                        hits: *hits,
                        rate: *rate,
                    },
                    MetricValue::Trend(t) => JsonMetricValue::Trend {
                        trend: JsonTrend::from(t),
                    },
                },
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stampede_core::{ThresholdViolation, ViolationReason};

    #[test]
    fn summary_document_reports_failures_and_budget() -> anyhow::Result<()> {
        let report = SummaryReport {
            elapsed: Duration::from_millis(1500),
            budget: Some(Duration::from_secs(1)),
            budget_exceeded: true,
            scenarios: Vec::new(),
            threshold_violations: vec![ThresholdViolation {
                metric: "http_req_duration".to_string(),
                scenario: Some("coupon".to_string()),
                expression: "p(99)<3000".to_string(),
                observed: Some(3200.0),
                reason: ViolationReason::NotMet,
            }],
        };

        let value = serde_json::to_value(summary_document(&report))?;
        anyhow::ensure!(value["kind"] == "summary");
        anyhow::ensure!(value["budget_exceeded"] == true);
        anyhow::ensure!(value["passed"] == false);
        anyhow::ensure!(value["elapsed_secs"] == 1.5);
        anyhow::ensure!(value["threshold_violations"][0]["scenario"] == "coupon");
        anyhow::ensure!(value["threshold_violations"][0]["reason"] == "not_met");
        Ok(())
    }
}
