use std::fmt::Write as _;

use stampede_core::{
    Completion, MetricSeriesSummary, MetricValue, ScenarioSummary, SummaryReport, TrendSummary,
    names,
};

use super::format::*;

/// Series already rendered by the fixed part of the scenario block.
const STANDARD: &[&str] = &[
    names::HTTP_REQS,
    names::HTTP_REQ_DURATION,
    names::HTTP_REQ_FAILED,
    names::SUCCESS_RATE,
    names::OUTCOME_SUCCESS,
    names::OUTCOME_EXPECTED,
    names::OUTCOME_UNEXPECTED,
    names::OUTCOME_PARSE_ERROR,
    names::TRANSPORT_ERRORS,
    names::ITERATIONS,
    names::ITERATION_DURATION,
    names::PLAN_ERRORS,
    names::VUS,
    names::VUS_MAX,
];

pub(crate) fn render(summary: &SummaryReport) -> String {
    let mut out = String::new();

    if summary.scenarios.is_empty() {
        out.push_str("summary: no scenarios\n");
        return out;
    }

    write!(&mut out, "summary (elapsed {}", format_duration(summary.elapsed)).ok();
    if let Some(budget) = summary.budget {
        write!(&mut out, ", budget {}", format_duration(budget)).ok();
    }
    if summary.budget_exceeded {
        out.push_str(", budget exceeded: partial completion");
    }
    out.push_str(")\n");

    for s in &summary.scenarios {
        render_scenario(s, &mut out);
        out.push('\n');
    }

    let totals = Totals::of(summary);
    out.push_str("totals\n");
    writeln!(
        &mut out,
        "  requests: {} (success {}, expected {}, unexpected {}, parse_error {})",
        totals.requests, totals.success, totals.expected, totals.unexpected, totals.parse_error
    )
    .ok();
    writeln!(&mut out, "  iterations: {}", totals.iterations).ok();
    let secs = summary.elapsed.as_secs_f64().max(1e-9);
    writeln!(
        &mut out,
        "  rates: rps={}",
        format_rate((totals.requests as f64) / secs)
    )
    .ok();
    writeln!(
        &mut out,
        "  thresholds: {}",
        if summary.thresholds_failed() {
            format!("{} failed", summary.threshold_violations.len())
        } else {
            "passed".to_string()
        }
    )
    .ok();

    out
}

fn render_scenario(s: &ScenarioSummary, out: &mut String) {
    let status = match s.completion {
        Completion::Completed => "completed".to_string(),
        Completion::Incomplete(reason) => format!("incomplete ({reason})"),
    };
    writeln!(out, "scenario: {} [{}] {status}", s.name, s.exec).ok();

    let o = &s.outcomes;
    writeln!(
        out,
        "  requests: {} (success {}, expected {}, unexpected {}, parse_error {}, transport_errors {})",
        s.requests, o.success, o.expected, o.unexpected, o.parse_error, o.transport_errors
    )
    .ok();
    if !s.expected_by_signature.is_empty() {
        let parts = s
            .expected_by_signature
            .iter()
            .map(|(label, n)| format!("{label}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "  expected: {parts}").ok();
    }
    writeln!(
        out,
        "  iterations: {} vus_max: {} plan_errors: {}",
        s.iterations, s.vus_max, s.plan_errors
    )
    .ok();

    render_trend(out, "  http_req_duration", &s.latency);
    render_trend(out, "  iteration_duration", &s.iteration_duration);

    if s.endpoints.len() > 1 {
        for ep in &s.endpoints {
            render_trend(
                out,
                &format!("  endpoint {} ({} reqs)", ep.name, ep.requests),
                &ep.latency,
            );
        }
    }

    let extra: Vec<&MetricSeriesSummary> = s
        .metrics
        .iter()
        .filter(|m| !STANDARD.contains(&m.name.as_str()))
        .filter(|m| !s.expected_by_signature.contains_key(&m.name))
        .collect();
    if !extra.is_empty() {
        out.push_str("  metrics:\n");
        for m in extra {
            render_series(m, out);
        }
    }
}

fn render_trend(out: &mut String, label: &str, t: &TrendSummary) {
    if t.count == 0 {
        writeln!(out, "{label}: n/a").ok();
        return;
    }
    writeln!(
        out,
        "{label} = avg={} min={} p50={} p90={} p95={} p99={} max={} (n={})",
        format_ms(t.avg),
        format_ms(t.min),
        format_ms(t.p50),
        format_ms(t.p90),
        format_ms(t.p95),
        format_ms(t.p99),
        format_ms(t.max),
        t.count
    )
    .ok();
}

fn render_series(m: &MetricSeriesSummary, out: &mut String) {
    let tags = format_tags_inline(&m.tags, &["scenario"]);
    let label = if m.name == names::CACHE_HIT_ESTIMATE {
        format!("    {}{tags} (heuristic)", m.name)
    } else {
        format!("    {}{tags}", m.name)
    };

    match &m.values {
        MetricValue::Counter(n) => {
            writeln!(out, "{label}: {n}").ok();
        }
        MetricValue::Gauge(v) => {
            writeln!(out, "{label}: {v}").ok();
        }
        MetricValue::Rate { total, hits, .. } => {
            writeln!(out, "{label}: {} ({hits}/{total})", format_pct(*hits, *total)).ok();
        }
        MetricValue::Trend(t) => render_trend(out, &label, t),
    }
}

#[derive(Default)]
struct Totals {
    requests: u64,
    success: u64,
    expected: u64,
    unexpected: u64,
    parse_error: u64,
    iterations: u64,
}

impl Totals {
    fn of(summary: &SummaryReport) -> Self {
        summary.scenarios.iter().fold(Self::default(), |mut t, s| {
            t.requests = t.requests.saturating_add(s.requests);
            t.success = t.success.saturating_add(s.outcomes.success);
            t.expected = t.expected.saturating_add(s.outcomes.expected);
            t.unexpected = t.unexpected.saturating_add(s.outcomes.unexpected);
            t.parse_error = t.parse_error.saturating_add(s.outcomes.parse_error);
            t.iterations = t.iterations.saturating_add(s.iterations);
            t
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use stampede_core::{IncompleteReason, MetricKind, OutcomeCounts, ScenarioExecutorKind};

    fn scenario() -> ScenarioSummary {
        ScenarioSummary {
            name: "popular".to_string(),
            exec: ScenarioExecutorKind::ConstantVus,
            start_time: Duration::ZERO,
            completion: Completion::Incomplete(IncompleteReason::BudgetExceeded),
            iterations: 40,
            requests: 40,
            outcomes: OutcomeCounts {
                success: 40,
                ..OutcomeCounts::default()
            },
            expected_by_signature: BTreeMap::new(),
            latency: TrendSummary {
                count: 40,
                avg: Some(8.0),
                min: Some(1.0),
                max: Some(30.0),
                p50: Some(5.0),
                p90: Some(20.0),
                p95: Some(25.0),
                p99: Some(30.0),
            },
            iteration_duration: TrendSummary::default(),
            endpoints: Vec::new(),
            vus_max: 4,
            plan_errors: 0,
            metrics: vec![MetricSeriesSummary {
                name: names::CACHE_HIT_ESTIMATE.to_string(),
                kind: MetricKind::Rate,
                tags: vec![
                    ("scenario".to_string(), "popular".to_string()),
                    ("endpoint".to_string(), "top".to_string()),
                ],
                values: MetricValue::Rate {
                    total: 40,
                    hits: 30,
                    rate: Some(0.75),
                },
            }],
        }
    }

    #[test]
    fn cache_hit_estimate_is_labelled_heuristic() {
        let report = SummaryReport {
            elapsed: Duration::from_secs(10),
            budget: Some(Duration::from_secs(10)),
            budget_exceeded: true,
            scenarios: vec![scenario()],
            threshold_violations: Vec::new(),
        };

        let text = render(&report);
        assert!(text.contains("budget exceeded: partial completion"), "{text}");
        assert!(text.contains("incomplete (budget_exceeded)"), "{text}");
        assert!(
            text.contains("cache_hit_estimate{endpoint=top} (heuristic): 75.00% (30/40)"),
            "{text}"
        );
        assert!(text.contains("p95=25.00ms"), "{text}");
        assert!(text.contains("thresholds: passed"), "{text}");
    }

    #[test]
    fn empty_report() {
        let report = SummaryReport {
            elapsed: Duration::ZERO,
            budget: None,
            budget_exceeded: false,
            scenarios: Vec::new(),
            threshold_violations: Vec::new(),
        };
        assert_eq!(render(&report), "summary: no scenarios\n");
    }
}
