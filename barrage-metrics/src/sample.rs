use std::sync::Arc;
use std::time::Instant;

use crate::MetricKind;

/// One timed observation produced by a workload iteration.
#[derive(Debug, Clone)]
pub struct Sample {
    pub metric: Arc<str>,
    pub kind: MetricKind,
    pub value: f64,
    pub tags: Vec<(String, String)>,
    pub timestamp: Instant,
}

impl Sample {
    pub fn new(metric: impl Into<Arc<str>>, kind: MetricKind, value: f64) -> Self {
        Self {
            metric: metric.into(),
            kind,
            value,
            tags: Vec::new(),
            timestamp: Instant::now(),
        }
    }

    pub fn counter(metric: impl Into<Arc<str>>, value: f64) -> Self {
        Self::new(metric, MetricKind::Counter, value)
    }

    pub fn gauge(metric: impl Into<Arc<str>>, value: f64) -> Self {
        Self::new(metric, MetricKind::Gauge, value)
    }

    /// A rate observation; `true` counts towards the rate.
    pub fn rate(metric: impl Into<Arc<str>>, hit: bool) -> Self {
        Self::new(metric, MetricKind::Rate, if hit { 1.0 } else { 0.0 })
    }

    pub fn trend(metric: impl Into<Arc<str>>, value: f64) -> Self {
        Self::new(metric, MetricKind::Trend, value)
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_tags<K, V>(mut self, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}
