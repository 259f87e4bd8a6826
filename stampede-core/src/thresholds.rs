use stampede_metrics::{MetricKind, Registry, nearest_rank};

use crate::error::{Error, Result};

/// Pass/fail assertions over one metric, optionally scoped to a scenario.
#[derive(Debug, Clone)]
pub struct ThresholdSet {
    pub metric: String,
    pub scenario: Option<String>,
    pub expressions: Vec<(String, ThresholdExpr)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    P(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

/// Why an expression did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ViolationReason {
    /// The observed value does not satisfy the comparison.
    NotMet,
    /// The series exists but recorded nothing, e.g. a rate over zero requests.
    NoSamples,
    /// No scenario in scope registered the metric, or the aggregate does not
    /// apply to its kind.
    MissingSeries,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdViolation {
    pub metric: String,
    pub scenario: Option<String>,
    pub expression: String,
    pub observed: Option<f64>,
    pub reason: ViolationReason,
}

impl ThresholdSet {
    /// `key` is `metric` or `metric{scenario=name}`.
    pub fn parse(key: &str, expressions: &[String]) -> Result<Self> {
        let (metric, scenario) = parse_key(key).map_err(|error| Error::InvalidThreshold {
            metric: key.to_string(),
            error,
        })?;
        let expressions = expressions
            .iter()
            .map(|raw| {
                parse_threshold_expr(raw)
                    .map(|expr| (raw.clone(), expr))
                    .map_err(|error| Error::InvalidThreshold {
                        metric: key.to_string(),
                        error,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            metric,
            scenario,
            expressions,
        })
    }
}

fn parse_key(key: &str) -> std::result::Result<(String, Option<String>), String> {
    let key = key.trim();
    let Some(open) = key.find('{') else {
        if key.is_empty() {
            return Err("empty metric name".to_string());
        }
        return Ok((key.to_string(), None));
    };

    let metric = key[..open].trim();
    let inner = key[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| format!("unterminated tag filter in `{key}`"))?;
    let (tag, value) = inner
        .split_once('=')
        .ok_or_else(|| format!("invalid tag filter in `{key}`"))?;
    if tag.trim() != "scenario" {
        return Err(format!("unsupported tag `{}` in `{key}`", tag.trim()));
    }
    let value = value.trim();
    if metric.is_empty() || value.is_empty() {
        return Err(format!("invalid threshold key `{key}`"));
    }
    Ok((metric.to_string(), Some(value.to_string())))
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = if left.eq_ignore_ascii_case("avg") {
        ThresholdAgg::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdAgg::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdAgg::Max
    } else if left.eq_ignore_ascii_case("med") {
        ThresholdAgg::Med
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdAgg::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdAgg::Rate
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: f64 = inner
            .parse()
            .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
        if !(p > 0.0 && p <= 100.0) {
            return Err(format!("percentile out of range in threshold: {raw}"));
        }
        ThresholdAgg::P(p)
    } else {
        return Err(format!("unknown aggregation `{left}` in threshold: {raw}"));
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;

    Ok(ThresholdExpr { agg, op, value })
}

/// Evaluates every set against the per-scenario registries.
///
/// Unscoped sets aggregate over all scenarios that recorded the metric. A
/// metric (or scenario) that does not exist fails every expression, and so
/// does a series with no samples: `rate<0.01` over zero requests fails with
/// [`ViolationReason::NoSamples`].
pub fn evaluate_thresholds(
    scenarios: &[(&str, &Registry)],
    sets: &[ThresholdSet],
) -> Vec<ThresholdViolation> {
    let mut out = Vec::new();

    for set in sets {
        let sources: Vec<&Registry> = scenarios
            .iter()
            .filter(|(name, _)| set.scenario.as_deref().is_none_or(|s| s == *name))
            .map(|(_, r)| *r)
            .collect();

        let observed_data = collect(&sources, &set.metric);
        for (raw, expr) in &set.expressions {
            let observed = observed_data
                .as_ref()
                .and_then(|data| observed_value(data, &expr.agg));
            let reason = match (&observed_data, observed) {
                (_, Some(v)) if compare(v, expr.op, expr.value) => continue,
                (_, Some(_)) => ViolationReason::NotMet,
                (Some(data), None) if data.is_empty_for(&expr.agg) => ViolationReason::NoSamples,
                _ => ViolationReason::MissingSeries,
            };
            out.push(ThresholdViolation {
                metric: set.metric.clone(),
                scenario: set.scenario.clone(),
                expression: raw.clone(),
                observed,
                reason,
            });
        }
    }

    out
}

enum Observed {
    Counter(u64),
    Gauge(i64),
    Rate { total: u64, hits: u64 },
    Trend(Vec<f64>),
}

impl Observed {
    /// The aggregate applies to this kind but there is nothing to aggregate.
    fn is_empty_for(&self, agg: &ThresholdAgg) -> bool {
        match (self, agg) {
            (Self::Rate { total, .. }, ThresholdAgg::Rate) => *total == 0,
            (Self::Trend(samples), agg) => samples.is_empty() && *agg != ThresholdAgg::Count,
            _ => false,
        }
    }
}

fn collect(sources: &[&Registry], metric: &str) -> Option<Observed> {
    let mut acc: Option<Observed> = None;

    for registry in sources {
        let Some((id, kind)) = registry.lookup(metric) else {
            continue;
        };
        let q = registry.query(id);
        let next = match kind {
            MetricKind::Counter => Observed::Counter(q.sum_counter_total()),
            MetricKind::Gauge => match q.max_gauge() {
                Some(v) => Observed::Gauge(v),
                None => continue,
            },
            MetricKind::Rate => {
                let (total, hits) = q.sum_rate();
                Observed::Rate { total, hits }
            }
            MetricKind::Trend => Observed::Trend(q.trend_samples()),
        };

        acc = Some(match (acc, next) {
            (None, next) => next,
            (Some(Observed::Counter(a)), Observed::Counter(b)) => Observed::Counter(a + b),
            (Some(Observed::Gauge(a)), Observed::Gauge(b)) => Observed::Gauge(a.max(b)),
            (Some(Observed::Rate { total, hits }), Observed::Rate { total: t, hits: h }) => {
                Observed::Rate {
                    total: total + t,
                    hits: hits + h,
                }
            }
            (Some(Observed::Trend(mut a)), Observed::Trend(b)) => {
                a.extend(b);
                Observed::Trend(a)
            }
            // Registered with a different kind elsewhere; keep the first.
            (Some(prev), _) => prev,
        });
    }

    acc
}

fn observed_value(data: &Observed, agg: &ThresholdAgg) -> Option<f64> {
    match (data, agg) {
        (Observed::Counter(v), ThresholdAgg::Count) => Some(*v as f64),
        (Observed::Rate { total, .. }, ThresholdAgg::Count) => Some(*total as f64),
        (Observed::Rate { total, hits }, ThresholdAgg::Rate) => {
            (*total > 0).then(|| *hits as f64 / *total as f64)
        }
        (Observed::Gauge(v), ThresholdAgg::Max | ThresholdAgg::Min | ThresholdAgg::Avg) => {
            Some(*v as f64)
        }
        (Observed::Trend(samples), agg) => trend_value(samples, agg),
        _ => None,
    }
}

fn trend_value(samples: &[f64], agg: &ThresholdAgg) -> Option<f64> {
    if let ThresholdAgg::Count = agg {
        return Some(samples.len() as f64);
    }
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    match agg {
        ThresholdAgg::Avg => Some(sorted.iter().sum::<f64>() / sorted.len() as f64),
        ThresholdAgg::Min => sorted.first().copied(),
        ThresholdAgg::Max => sorted.last().copied(),
        ThresholdAgg::Med => nearest_rank(&sorted, 50.0),
        ThresholdAgg::P(p) => nearest_rank(&sorted, *p),
        ThresholdAgg::Count | ThresholdAgg::Rate => None,
    }
}

fn compare(observed: f64, op: ThresholdOp, expected: f64) -> bool {
    match op {
        ThresholdOp::Lt => observed < expected,
        ThresholdOp::Lte => observed <= expected,
        ThresholdOp::Gt => observed > expected,
        ThresholdOp::Gte => observed >= expected,
        ThresholdOp::Eq => observed == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(key: &str, exprs: &[&str]) -> ThresholdSet {
        let exprs: Vec<String> = exprs.iter().map(|s| s.to_string()).collect();
        match ThresholdSet::parse(key, &exprs) {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        }
    }

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse_threshold_expr("  avg  <=  123  ").unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(expr.agg, ThresholdAgg::Avg));
        assert!(matches!(expr.op, ThresholdOp::Lte));
        assert_eq!(expr.value, 123.0);
    }

    #[test]
    fn parse_threshold_expr_accepts_fractional_percentiles() {
        let expr = parse_threshold_expr("p(99.9)<500").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.agg, ThresholdAgg::P(99.9));
        assert_eq!(expr.op, ThresholdOp::Lt);
    }

    #[test]
    fn parse_threshold_expr_rejects_out_of_range_percentiles() {
        let err = match parse_threshold_expr("p(101)<1") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.contains("out of range"));
    }

    #[test]
    fn parse_key_with_scenario_scope() {
        let s = set("http_req_duration{scenario=coupon_rush}", &["p(99)<3000"]);
        assert_eq!(s.metric, "http_req_duration");
        assert_eq!(s.scenario.as_deref(), Some("coupon_rush"));

        let err = ThresholdSet::parse("x{endpoint=a}", &[]);
        assert!(err.is_err());
    }

    #[test]
    fn missing_metric_fails_threshold() {
        let registry = Registry::default();
        let v = evaluate_thresholds(&[("s", &registry)], &[set("nope", &["count>0"])]);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].metric, "nope");
        assert!(v[0].observed.is_none());
        assert_eq!(v[0].reason, ViolationReason::MissingSeries);
    }

    #[test]
    fn unscoped_counters_and_rates_sum_across_scenarios() {
        let a = Registry::default();
        let b = Registry::default();
        a.handle("coupon_issued", MetricKind::Counter, &[]).increment(300);
        b.handle("coupon_issued", MetricKind::Counter, &[]).increment(200);
        let failed_a = a.handle("http_req_failed", MetricKind::Rate, &[]);
        let failed_b = b.handle("http_req_failed", MetricKind::Rate, &[]);
        for i in 0..100 {
            failed_a.add_rate(i == 0);
            failed_b.add_rate(false);
        }

        let sets = [
            set("coupon_issued", &["count<=500"]),
            set("http_req_failed", &["rate<0.01"]),
        ];
        let v = evaluate_thresholds(&[("a", &a), ("b", &b)], &sets);
        assert!(v.is_empty(), "{v:?}");

        let v = evaluate_thresholds(&[("a", &a), ("b", &b)], &[set("coupon_issued", &["count<500"])]);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].observed, Some(500.0));
        assert_eq!(v[0].reason, ViolationReason::NotMet);
    }

    #[test]
    fn scoped_trend_uses_only_that_scenario() {
        let fast = Registry::default();
        let slow = Registry::default();
        let h = fast.handle("http_req_duration", MetricKind::Trend, &[]);
        for v in 1..=100 {
            h.observe_trend(v as f64);
        }
        slow.handle("http_req_duration", MetricKind::Trend, &[])
            .observe_trend(10_000.0);

        let sets = [set("http_req_duration{scenario=fast}", &["p(95)<96", "med==50", "max<=100"])];
        let v = evaluate_thresholds(&[("fast", &fast), ("slow", &slow)], &sets);
        assert!(v.is_empty(), "{v:?}");

        let sets = [set("http_req_duration", &["max<=100"])];
        let v = evaluate_thresholds(&[("fast", &fast), ("slow", &slow)], &sets);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].observed, Some(10_000.0));
    }

    #[test]
    fn empty_rate_fails_with_no_samples() {
        let r = Registry::default();
        r.register("http_req_failed", MetricKind::Rate);
        r.register("http_req_duration", MetricKind::Trend);

        let sets = [
            set("http_req_failed", &["rate<0.01"]),
            set("http_req_duration", &["p(95)<500", "count==0"]),
            set("http_req_failed", &["p(95)<1"]),
        ];
        let v = evaluate_thresholds(&[("s", &r)], &sets);
        let reasons: Vec<_> = v.iter().map(|v| (v.expression.as_str(), v.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                ("rate<0.01", ViolationReason::NoSamples),
                ("p(95)<500", ViolationReason::NoSamples),
                ("p(95)<1", ViolationReason::MissingSeries),
            ]
        );
        assert_eq!(ViolationReason::NoSamples.to_string(), "no_samples");
    }

    #[test]
    fn unknown_scenario_scope_fails() {
        let r = Registry::default();
        r.handle("iterations", MetricKind::Counter, &[]).increment(1);
        let v = evaluate_thresholds(&[("a", &r)], &[set("iterations{scenario=b}", &["count>0"])]);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].scenario.as_deref(), Some("b"));
    }
}
