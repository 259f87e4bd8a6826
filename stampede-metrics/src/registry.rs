use dashmap::DashMap;
use parking_lot::RwLock;

use crate::agg::Query;
use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricStorage};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
pub struct MetricDef {
    pub name: KeyId,
    pub kind: MetricKind,
}

/// One set of metric sinks. A run owns one registry per scenario.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    storage: DashMap<MetricId, DashMap<TagSet, MetricStorage>>,
}

impl Registry {
    /// Registering an existing name returns its id; the first registered kind wins.
    pub fn register(&self, name: &str, kind: MetricKind) -> MetricId {
        let name_id = self.interner.get_or_intern(name);

        let mut defs = self.defs.write();
        if let Some(idx) = defs.iter().position(|d| d.name == name_id) {
            return MetricId(idx as u32);
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_id,
            kind,
        });
        self.storage.insert(id, DashMap::new());
        id
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let name_id = self.interner.lookup(name)?;
        let defs = self.defs.read();
        defs.iter()
            .position(|d| d.name == name_id)
            .and_then(|idx| defs.get(idx).map(|d| (MetricId(idx as u32), d.kind)))
    }

    pub fn kind_of(&self, metric: MetricId) -> Option<MetricKind> {
        self.defs.read().get(metric.0 as usize).map(|d| d.kind)
    }

    pub fn resolve_key(&self, key: &str) -> KeyId {
        self.interner.get_or_intern(key)
    }

    pub fn lookup_key(&self, key: &str) -> Option<KeyId> {
        self.interner.lookup(key)
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        TagSet::new(
            tags.iter()
                .map(|(k, v)| (self.resolve_key(k), self.resolve_key(v))),
        )
    }

    pub fn get_handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        let kind = self.kind_of(metric)?;
        let series_map = self.storage.get(&metric)?;
        let handle = series_map
            .entry(tags)
            .or_insert_with(|| MetricStorage::new(kind))
            .handle();
        Some(handle)
    }

    /// Registers `name` if needed and returns the handle for the given series.
    pub fn handle(&self, name: &str, kind: MetricKind, tags: &[(&str, &str)]) -> MetricHandle {
        let id = self.register(name, kind);
        let kind = self.kind_of(id).unwrap_or(kind);
        let tags = self.resolve_tags(tags);
        self.storage
            .entry(id)
            .or_default()
            .entry(tags)
            .or_insert_with(|| MetricStorage::new(kind))
            .handle()
    }

    pub fn query(&self, metric: MetricId) -> Query<'_> {
        Query::new(self, metric)
    }

    pub(crate) fn visit_series(&self, metric: MetricId, mut f: impl FnMut(&TagSet, &MetricStorage)) {
        let Some(series_map) = self.storage.get(&metric) else {
            return;
        };
        for series in series_map.iter() {
            f(series.key(), series.value());
        }
    }

    fn resolve_str(&self, id: KeyId) -> String {
        self.interner
            .resolve(id)
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    /// Terminal value of every series, sorted by name then tags.
    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        let mut out = Vec::new();
        let defs = self.defs.read();

        for entry in self.storage.iter() {
            let Some(def) = defs.get(entry.key().0 as usize) else {
                continue;
            };
            let name = self.resolve_str(def.name);

            for series in entry.value().iter() {
                let tags = series
                    .key()
                    .iter()
                    .map(|(k, v)| (self.resolve_str(k), self.resolve_str(v)))
                    .collect();

                out.push(MetricSeriesSummary {
                    name: name.clone(),
                    kind: def.kind,
                    tags,
                    values: series.value().value(),
                });
            }
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }
}
