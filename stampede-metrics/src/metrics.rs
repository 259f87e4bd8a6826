use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Rate {
        total: u64,
        hits: u64,
        rate: Option<f64>,
    },
    Trend(TrendSummary),
}

/// Read-time view of a trend. Percentiles use the nearest-rank method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendSummary {
    pub count: u64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

/// Value at rank `ceil(p/100 * N)` of the ascending samples.
///
/// `sorted` must already be sorted ascending.
pub fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    // Guard against 0.95 * 100 landing a hair above an integer.
    let rank = ((p / 100.0) * n as f64 - 1e-9).ceil();
    let rank = (rank.max(1.0) as usize).min(n);
    sorted.get(rank - 1).copied()
}

pub fn summarize_samples(samples: &[f64]) -> TrendSummary {
    if samples.is_empty() {
        return TrendSummary::default();
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let count = sorted.len() as u64;
    let sum: f64 = sorted.iter().sum();

    TrendSummary {
        count,
        avg: Some(sum / count as f64),
        min: sorted.first().copied(),
        max: sorted.last().copied(),
        p50: nearest_rank(&sorted, 50.0),
        p90: nearest_rank(&sorted, 90.0),
        p95: nearest_rank(&sorted, 95.0),
        p99: nearest_rank(&sorted, 99.0),
    }
}

#[derive(Debug, Default)]
pub struct Rate {
    pub total: AtomicU64,
    pub hits: AtomicU64,
}

/// Unbounded multiset of samples. Nothing is derived until read time.
#[derive(Debug, Default)]
pub struct Trend {
    samples: Mutex<Vec<f64>>,
}

impl Trend {
    pub fn add(&self, value: f64) {
        self.samples.lock().push(value);
    }

    pub fn snapshot(&self) -> Vec<f64> {
        self.samples.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub enum MetricStorage {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Trend(Arc<Trend>),
}

impl MetricStorage {
    pub fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricStorage::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Gauge => MetricStorage::Gauge(Arc::new(AtomicI64::new(0))),
            MetricKind::Rate => MetricStorage::Rate(Arc::new(Rate::default())),
            MetricKind::Trend => MetricStorage::Trend(Arc::new(Trend::default())),
        }
    }

    pub(crate) fn handle(&self) -> MetricHandle {
        match self {
            MetricStorage::Counter(a) => MetricHandle::Counter(a.clone()),
            MetricStorage::Gauge(a) => MetricHandle::Gauge(a.clone()),
            MetricStorage::Rate(a) => MetricHandle::Rate(a.clone()),
            MetricStorage::Trend(a) => MetricHandle::Trend(a.clone()),
        }
    }

    pub(crate) fn value(&self) -> MetricValue {
        match self {
            MetricStorage::Counter(a) => MetricValue::Counter(a.load(Ordering::Relaxed)),
            MetricStorage::Gauge(a) => MetricValue::Gauge(a.load(Ordering::Relaxed)),
            MetricStorage::Rate(r) => {
                let total = r.total.load(Ordering::Relaxed);
                let hits = r.hits.load(Ordering::Relaxed);
                let rate = (total > 0).then(|| hits as f64 / total as f64);
                MetricValue::Rate { total, hits, rate }
            }
            MetricStorage::Trend(t) => MetricValue::Trend(summarize_samples(&t.snapshot())),
        }
    }
}

/// Write handle. Mutations on a handle of the wrong kind are ignored.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Trend(Arc<Trend>),
}

impl MetricHandle {
    #[inline]
    pub fn increment(&self, value: u64) {
        if let MetricHandle::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    /// Adds to the gauge and returns the new value (0 for other kinds).
    #[inline]
    pub fn increment_gauge(&self, value: i64) -> i64 {
        match self {
            MetricHandle::Gauge(g) => g.fetch_add(value, Ordering::Relaxed).saturating_add(value),
            _ => 0,
        }
    }

    #[inline]
    pub fn decrement_gauge(&self, value: i64) {
        if let MetricHandle::Gauge(g) = self {
            g.fetch_sub(value, Ordering::Relaxed);
        }
    }

    /// Raises the gauge to `value` if it is currently lower.
    #[inline]
    pub fn max_gauge(&self, value: i64) {
        if let MetricHandle::Gauge(g) = self {
            g.fetch_max(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_rate(&self, hit: bool) {
        if let MetricHandle::Rate(r) = self {
            r.hits.fetch_add(u64::from(hit), Ordering::Relaxed);
            r.total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn observe_trend(&self, value: f64) {
        if let MetricHandle::Trend(t) = self {
            t.add(value);
        }
    }

    pub fn get_counter(&self) -> u64 {
        match self {
            MetricHandle::Counter(c) => c.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn get_gauge(&self) -> i64 {
        match self {
            MetricHandle::Gauge(g) => g.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// `(total, hits)`
    pub fn get_rate(&self) -> (u64, u64) {
        match self {
            MetricHandle::Rate(r) => (
                r.total.load(Ordering::Relaxed),
                r.hits.load(Ordering::Relaxed),
            ),
            _ => (0, 0),
        }
    }
}
