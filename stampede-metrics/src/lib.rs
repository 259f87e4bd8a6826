pub mod agg;
pub mod key;
pub mod metrics;
pub mod registry;
pub mod tags;

pub use agg::{CounterSnapshot, per_sec};
pub use key::KeyId;
pub use metrics::{
    MetricHandle, MetricKind, MetricSeriesSummary, MetricValue, TrendSummary, nearest_rank,
    summarize_samples,
};
pub use registry::{MetricId, Registry};
pub use tags::TagSet;
