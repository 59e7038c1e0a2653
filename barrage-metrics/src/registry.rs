use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::key::Interner;
use crate::metrics::{MetricKind, SeriesStorage};
use crate::snapshot::{MetricSnapshot, SeriesSnapshot, Snapshot};
use crate::tags::TagSet;
use crate::{Error, Result, Sample};

/// Values retained per trend series before percentiles switch to the histogram.
pub const DEFAULT_TREND_RETENTION: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: Arc<str>,
    kind: MetricKind,
}

#[derive(Debug, Default)]
struct Defs {
    list: Vec<MetricDef>,
    by_name: AHashMap<Arc<str>, MetricId>,
}

/// Concurrent store of every metric series in a run.
///
/// Counters and rates update lock-free; gauges and trends take a per-series mutex
/// for the in-memory update only.
#[derive(Debug)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Defs>,
    storage: DashMap<MetricId, DashMap<TagSet, Arc<SeriesStorage>>>,
    dropped: AtomicU64,
    trend_retention: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_trend_retention(DEFAULT_TREND_RETENTION)
    }
}

impl Registry {
    pub fn with_trend_retention(trend_retention: usize) -> Self {
        Self {
            interner: Interner::default(),
            defs: RwLock::new(Defs::default()),
            storage: DashMap::new(),
            dropped: AtomicU64::new(0),
            trend_retention: trend_retention.max(1),
        }
    }

    /// Registers `name` with `kind`, or returns the existing id.
    ///
    /// The kind of a metric is fixed by its first registration.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        if name.is_empty() {
            return Err(Error::EmptyName);
        }

        if let Some(id) = self.check_existing(name, kind)? {
            return Ok(id);
        }

        let mut defs = self.defs.write();
        if let Some(id) = defs.by_name.get(name).copied() {
            drop(defs);
            return self
                .check_existing(name, kind)
                .map(|existing| existing.unwrap_or(id));
        }

        let id = MetricId(defs.list.len() as u32);
        let name: Arc<str> = Arc::from(name);
        defs.list.push(MetricDef {
            name: name.clone(),
            kind,
        });
        defs.by_name.insert(name, id);
        self.storage.insert(id, DashMap::new());
        Ok(id)
    }

    fn check_existing(&self, name: &str, kind: MetricKind) -> Result<Option<MetricId>> {
        let defs = self.defs.read();
        let Some(id) = defs.by_name.get(name).copied() else {
            return Ok(None);
        };

        let registered = defs.list[id.0 as usize].kind;
        if registered != kind {
            return Err(Error::KindConflict {
                name: name.to_string(),
                registered,
                requested: kind,
            });
        }

        Ok(Some(id))
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let defs = self.defs.read();
        let id = defs.by_name.get(name).copied()?;
        Some((id, defs.list[id.0 as usize].kind))
    }

    pub fn resolve_tags<K: AsRef<str>, V: AsRef<str>>(&self, tags: &[(K, V)]) -> TagSet {
        TagSet::from_pairs(tags.iter().map(|(k, v)| {
            (
                self.interner.intern(k.as_ref()),
                self.interner.intern(v.as_ref()),
            )
        }))
    }

    fn series(&self, id: MetricId, tags: TagSet) -> Option<Arc<SeriesStorage>> {
        let series_map = self.storage.get(&id)?;
        if let Some(existing) = series_map.get(&tags) {
            return Some(existing.value().clone());
        }

        let kind = self.defs.read().list.get(id.0 as usize)?.kind;
        let storage = series_map
            .entry(tags)
            .or_insert_with(|| Arc::new(SeriesStorage::new(kind, self.trend_retention)));
        Some(storage.value().clone())
    }

    /// Folds one sample into its series.
    ///
    /// Samples that conflict with the metric's registered kind, or carry a non-finite
    /// value, are rejected and counted as dropped.
    pub fn record(&self, sample: &Sample) -> Result<()> {
        if !sample.value.is_finite() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(Error::NonFinite {
                name: sample.metric.to_string(),
            });
        }

        let id = match self.register(&sample.metric, sample.kind) {
            Ok(id) => id,
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };

        let tags = self.resolve_tags(&sample.tags);
        let Some(series) = self.series(id, tags) else {
            return Ok(());
        };
        if let Err(err) = series.record(sample.value) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }
        Ok(())
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Point-in-time view of every registered metric, including ones without samples.
    pub fn snapshot(&self) -> Snapshot {
        let taken_at = Instant::now();
        let defs: Vec<(MetricId, Arc<str>, MetricKind)> = {
            let defs = self.defs.read();
            defs.list
                .iter()
                .enumerate()
                .map(|(idx, d)| (MetricId(idx as u32), d.name.clone(), d.kind))
                .collect()
        };

        let mut metrics = std::collections::BTreeMap::new();
        for (id, name, kind) in defs {
            let handles: Vec<(TagSet, Arc<SeriesStorage>)> = match self.storage.get(&id) {
                Some(series_map) => series_map
                    .iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect(),
                None => Vec::new(),
            };

            let detached: Vec<_> = handles
                .into_iter()
                .map(|(tags, storage)| (tags, storage.detach()))
                .collect();

            let series = detached
                .into_iter()
                .map(|(tags, values)| SeriesSnapshot {
                    tags: self.tag_strings(&tags),
                    values: values.finish(),
                })
                .collect();

            metrics.insert(
                name.to_string(),
                MetricSnapshot::new(name.to_string(), kind, series),
            );
        }

        Snapshot {
            taken_at,
            metrics,
            dropped_samples: self.dropped_samples(),
        }
    }

    fn tag_strings(&self, tags: &TagSet) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = tags
            .iter()
            .map(|(k, v)| {
                (
                    self.interner
                        .resolve(k)
                        .map(|s| s.to_string())
                        .unwrap_or_default(),
                    self.interner
                        .resolve(v)
                        .map(|s| s.to_string())
                        .unwrap_or_default(),
                )
            })
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetricValues;

    #[test]
    fn register_returns_same_id_for_same_kind() {
        let reg = Registry::default();
        let a = reg
            .register("iterations", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        let b = reg
            .register("iterations", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a, b);
        assert_eq!(reg.lookup("iterations"), Some((a, MetricKind::Counter)));
    }

    #[test]
    fn kind_conflict_is_rejected_and_counted() {
        let reg = Registry::default();
        if let Err(e) = reg.record(&Sample::rate("errors", true)) {
            panic!("unexpected error: {e}");
        }

        let err = match reg.record(&Sample::trend("errors", 12.0)) {
            Ok(()) => panic!("expected kind conflict"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            Error::KindConflict {
                registered: MetricKind::Rate,
                requested: MetricKind::Trend,
                ..
            }
        ));
        assert_eq!(reg.dropped_samples(), 1);

        let snap = reg.snapshot();
        let rate = snap.rate("errors").unwrap_or_else(|| panic!("missing rate"));
        assert_eq!(rate.total, 1);
        assert_eq!(snap.dropped_samples, 1);
    }

    #[test]
    fn trends_past_retention_fall_back_to_histogram() {
        let reg = Registry::with_trend_retention(4);
        for v in 1..=100 {
            if let Err(e) = reg.record(&Sample::trend("latency", v as f64)) {
                panic!("unexpected error: {e}");
            }
        }

        let snap = reg.snapshot();
        let trend = snap.trend("latency").unwrap_or_else(|| panic!("missing trend"));
        assert!(!trend.is_exact());
        assert_eq!(trend.count(), 100);
        assert_eq!(trend.max(), Some(100.0));
        assert_eq!(reg.dropped_samples(), 0);
    }

    #[test]
    fn non_finite_values_are_dropped() {
        let reg = Registry::default();
        assert!(reg.record(&Sample::trend("latency", f64::NAN)).is_err());
        assert_eq!(reg.dropped_samples(), 1);
        assert!(reg.snapshot().get("latency").is_none());
    }

    #[test]
    fn tagged_samples_land_in_separate_series() {
        let reg = Registry::default();
        for (name, v) in [("GetBalance", 10.0), ("GetBalance", 20.0), ("List", 30.0)] {
            let sample = Sample::trend("http_req_duration", v).with_tag("name", name);
            if let Err(e) = reg.record(&sample) {
                panic!("unexpected error: {e}");
            }
        }

        let snap = reg.snapshot();
        let metric = snap
            .get("http_req_duration")
            .unwrap_or_else(|| panic!("missing metric"));
        assert_eq!(metric.series.len(), 2);
        assert_eq!(
            metric.series[0].tags,
            vec![("name".to_string(), "GetBalance".to_string())]
        );
        match metric.values() {
            MetricValues::Trend(t) => assert_eq!(t.count(), 3),
            other => panic!("expected trend, got {other:?}"),
        }
    }

    #[test]
    fn registered_metric_without_samples_is_in_snapshot() {
        let reg = Registry::default();
        if let Err(e) = reg.register("http_req_failed", MetricKind::Rate) {
            panic!("unexpected error: {e}");
        }
        let snap = reg.snapshot();
        let rate = snap
            .rate("http_req_failed")
            .unwrap_or_else(|| panic!("missing metric"));
        assert_eq!(rate.total, 0);
        assert_eq!(rate.rate(), 0.0);
    }

    #[test]
    fn concurrent_counter_writes_are_not_lost() {
        let reg = Arc::new(Registry::default());
        let workers: Vec<_> = (0..200)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let _ = reg.record(&Sample::counter("hits", 1.0));
                    }
                })
            })
            .collect();

        for w in workers {
            if w.join().is_err() {
                panic!("worker thread panicked");
            }
        }

        assert_eq!(reg.snapshot().counter("hits"), Some(20_000.0));
    }
}
