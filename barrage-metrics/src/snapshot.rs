use std::collections::BTreeMap;
use std::time::Instant;

use crate::MetricKind;
use crate::trend::TrendSnapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateValues {
    pub total: u64,
    pub passes: u64,
}

impl RateValues {
    /// `passes / max(1, total)`; zero when nothing was recorded.
    pub fn rate(&self) -> f64 {
        self.passes as f64 / self.total.max(1) as f64
    }

    pub fn fails(&self) -> u64 {
        self.total.saturating_sub(self.passes)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GaugeValues {
    pub value: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum MetricValues {
    Counter(f64),
    Gauge(GaugeValues),
    Rate(RateValues),
    Trend(TrendSnapshot),
}

impl MetricValues {
    pub fn empty(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(0.0),
            MetricKind::Gauge => Self::Gauge(GaugeValues::default()),
            MetricKind::Rate => Self::Rate(RateValues::default()),
            MetricKind::Trend => Self::Trend(TrendSnapshot::default()),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    /// Number of observations behind these values (counters report their sum).
    pub fn count(&self) -> f64 {
        match self {
            Self::Counter(v) => *v,
            Self::Gauge(g) => {
                if g.value.is_some() {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Rate(r) => r.total as f64,
            Self::Trend(t) => t.count() as f64,
        }
    }

    /// Folds same-kind values from several series.
    ///
    /// Gauges combine as the sum of last values with the overall min/max.
    fn merge<'a>(kind: MetricKind, parts: impl IntoIterator<Item = &'a MetricValues>) -> Self {
        let parts: Vec<&MetricValues> = parts.into_iter().collect();
        match kind {
            MetricKind::Counter => Self::Counter(
                parts
                    .iter()
                    .filter_map(|p| match p {
                        Self::Counter(v) => Some(*v),
                        _ => None,
                    })
                    .sum(),
            ),
            MetricKind::Rate => {
                let mut out = RateValues::default();
                for p in &parts {
                    if let Self::Rate(r) = p {
                        out.total = out.total.saturating_add(r.total);
                        out.passes = out.passes.saturating_add(r.passes);
                    }
                }
                Self::Rate(out)
            }
            MetricKind::Gauge => {
                let mut out = GaugeValues::default();
                for p in &parts {
                    let Self::Gauge(g) = p else { continue };
                    if let Some(v) = g.value {
                        out.value = Some(out.value.unwrap_or(0.0) + v);
                    }
                    out.min = min_opt(out.min, g.min);
                    out.max = max_opt(out.max, g.max);
                }
                Self::Gauge(out)
            }
            MetricKind::Trend => Self::Trend(TrendSnapshot::merge(parts.iter().filter_map(
                |p| match p {
                    Self::Trend(t) => Some(t),
                    _ => None,
                },
            ))),
        }
    }
}

fn min_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    /// Tag pairs sorted by key.
    pub tags: Vec<(String, String)>,
    pub values: MetricValues,
}

impl SeriesSnapshot {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn matches(&self, selector: &[(String, String)]) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.tag(k).is_some_and(|have| have == v))
    }
}

#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub series: Vec<SeriesSnapshot>,
    merged: MetricValues,
}

impl MetricSnapshot {
    pub(crate) fn new(name: String, kind: MetricKind, mut series: Vec<SeriesSnapshot>) -> Self {
        series.sort_by(|a, b| a.tags.cmp(&b.tags));
        let merged = MetricValues::merge(kind, series.iter().map(|s| &s.values));
        Self {
            name,
            kind,
            series,
            merged,
        }
    }

    /// Values across every series of the metric.
    pub fn values(&self) -> &MetricValues {
        &self.merged
    }

    /// Values across the series whose tags include every selector pair.
    ///
    /// Returns `None` when no series matches.
    pub fn select(&self, selector: &[(String, String)]) -> Option<MetricValues> {
        if selector.is_empty() {
            return Some(self.merged.clone());
        }

        let matching: Vec<&MetricValues> = self
            .series
            .iter()
            .filter(|s| s.matches(selector))
            .map(|s| &s.values)
            .collect();

        if matching.is_empty() {
            return None;
        }

        Some(MetricValues::merge(self.kind, matching))
    }

    /// Series that carry at least one tag.
    pub fn tagged_series(&self) -> impl Iterator<Item = &SeriesSnapshot> {
        self.series.iter().filter(|s| !s.tags.is_empty())
    }
}

/// Point-in-time view of every metric in a registry.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub taken_at: Instant,
    pub metrics: BTreeMap<String, MetricSnapshot>,
    /// Samples rejected because of a metric kind conflict.
    pub dropped_samples: u64,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.get(name)
    }

    pub fn counter(&self, name: &str) -> Option<f64> {
        match self.get(name)?.values() {
            MetricValues::Counter(v) => Some(*v),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> Option<RateValues> {
        match self.get(name)?.values() {
            MetricValues::Rate(r) => Some(*r),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str) -> Option<GaugeValues> {
        match self.get(name)?.values() {
            MetricValues::Gauge(g) => Some(*g),
            _ => None,
        }
    }

    pub fn trend(&self, name: &str) -> Option<&TrendSnapshot> {
        match self.get(name)?.values() {
            MetricValues::Trend(t) => Some(t),
            _ => None,
        }
    }
}
