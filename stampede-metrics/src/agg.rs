use smallvec::SmallVec;
use std::sync::atomic::Ordering;

use crate::key::KeyId;
use crate::metrics::MetricStorage;
use crate::registry::{MetricId, Registry};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub total: u64,
}

impl CounterSnapshot {
    pub fn new(total: u64) -> Self {
        Self { total }
    }

    pub fn delta_since(self, prev: Option<Self>) -> u64 {
        match prev {
            Some(prev) => self.total.saturating_sub(prev.total),
            None => self.total,
        }
    }

    pub fn per_sec_since(self, prev: Option<Self>, dt_secs: f64) -> f64 {
        per_sec(self.delta_since(prev), dt_secs)
    }
}

#[inline]
pub fn per_sec(delta: u64, dt_secs: f64) -> f64 {
    delta as f64 / dt_secs.max(1e-9)
}

/// Aggregation across the series of one metric, optionally filtered by tag.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    registry: &'a Registry,
    metric: MetricId,
    filters: SmallVec<[(KeyId, KeyId); 2]>,
    unmatched: bool,
}

impl<'a> Query<'a> {
    pub(crate) fn new(registry: &'a Registry, metric: MetricId) -> Self {
        Self {
            registry,
            metric,
            filters: SmallVec::new(),
            unmatched: false,
        }
    }

    /// Restricts to series tagged `key=value`. Unknown strings match nothing.
    #[must_use]
    pub fn where_eq(mut self, key: &str, value: &str) -> Self {
        match (self.registry.lookup_key(key), self.registry.lookup_key(value)) {
            (Some(k), Some(v)) => self.filters.push((k, v)),
            _ => self.unmatched = true,
        }
        self
    }

    fn for_each(&self, mut f: impl FnMut(&MetricStorage)) {
        if self.unmatched {
            return;
        }
        self.registry.visit_series(self.metric, |tags: &TagSet, storage| {
            if tags.matches(&self.filters) {
                f(storage);
            }
        });
    }

    pub fn sum_counter_total(self) -> u64 {
        let mut total = 0u64;
        self.for_each(|s| {
            if let MetricStorage::Counter(c) = s {
                total = total.saturating_add(c.load(Ordering::Relaxed));
            }
        });
        total
    }

    /// `(total, hits)` summed over matching series.
    pub fn sum_rate(self) -> (u64, u64) {
        let (mut total, mut hits) = (0u64, 0u64);
        self.for_each(|s| {
            if let MetricStorage::Rate(r) = s {
                total = total.saturating_add(r.total.load(Ordering::Relaxed));
                hits = hits.saturating_add(r.hits.load(Ordering::Relaxed));
            }
        });
        (total, hits)
    }

    pub fn max_gauge(self) -> Option<i64> {
        let mut out: Option<i64> = None;
        self.for_each(|s| {
            if let MetricStorage::Gauge(g) = s {
                let v = g.load(Ordering::Relaxed);
                out = Some(out.map_or(v, |cur| cur.max(v)));
            }
        });
        out
    }

    /// All trend samples of matching series, merged.
    pub fn trend_samples(self) -> Vec<f64> {
        let mut out = Vec::new();
        self.for_each(|s| {
            if let MetricStorage::Trend(t) = s {
                out.extend(t.snapshot());
            }
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricKind;

    #[test]
    fn counter_snapshot_delta_and_rate() {
        let now = CounterSnapshot::new(10);
        assert_eq!(now.delta_since(None), 10);
        assert_eq!(now.delta_since(Some(CounterSnapshot::new(7))), 3);
        assert_eq!(now.delta_since(Some(CounterSnapshot::new(999))), 0);

        let rps = now.per_sec_since(Some(CounterSnapshot::new(7)), 1.0);
        assert!((rps - 3.0).abs() < 1e-9);
        let _ = now.per_sec_since(Some(CounterSnapshot::new(7)), 0.0);
    }

    #[test]
    fn query_filters_by_tag_and_merges_trends() {
        let reg = Registry::default();
        let reqs = reg.register("http_reqs", MetricKind::Counter);
        reg.handle("http_reqs", MetricKind::Counter, &[("endpoint", "a")])
            .increment(10);
        reg.handle("http_reqs", MetricKind::Counter, &[("endpoint", "b")])
            .increment(3);

        assert_eq!(reg.query(reqs).sum_counter_total(), 13);
        assert_eq!(reg.query(reqs).where_eq("endpoint", "b").sum_counter_total(), 3);
        assert_eq!(reg.query(reqs).where_eq("endpoint", "zzz").sum_counter_total(), 0);

        let dur = reg.register("http_req_duration", MetricKind::Trend);
        reg.handle("http_req_duration", MetricKind::Trend, &[("endpoint", "a")])
            .observe_trend(1.0);
        reg.handle("http_req_duration", MetricKind::Trend, &[("endpoint", "b")])
            .observe_trend(2.0);
        let mut merged = reg.query(dur).trend_samples();
        merged.sort_by(f64::total_cmp);
        assert_eq!(merged, vec![1.0, 2.0]);
    }

    #[test]
    fn query_sums_rates_and_maxes_gauges() {
        let reg = Registry::default();
        let failed = reg.register("http_req_failed", MetricKind::Rate);
        reg.handle("http_req_failed", MetricKind::Rate, &[]).add_rate(true);
        reg.handle("http_req_failed", MetricKind::Rate, &[("endpoint", "x")])
            .add_rate(false);
        assert_eq!(reg.query(failed).sum_rate(), (2, 1));

        let vus = reg.register("vus_max", MetricKind::Gauge);
        assert_eq!(reg.query(vus).max_gauge(), None);
        reg.handle("vus_max", MetricKind::Gauge, &[]).max_gauge(7);
        assert_eq!(reg.query(vus).max_gauge(), Some(7));
    }
}
