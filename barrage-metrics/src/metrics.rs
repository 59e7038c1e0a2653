use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::snapshot::{GaugeValues, MetricValues, RateValues};
use crate::Result;
use crate::trend::{DetachedTrend, TrendState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    /// Sums every sample value.
    Counter,
    /// Keeps the last value plus the observed min/max.
    Gauge,
    /// Fraction of samples with a non-zero value.
    Rate,
    /// Distribution of sample values (avg, min, max, percentiles).
    Trend,
}

/// `f64` accumulator built on an `AtomicU64` bit pattern.
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn add(&self, v: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + v).to_bits())
            });
    }

    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
}

#[derive(Debug, Default)]
pub(crate) struct RateCells {
    total: AtomicU64,
    passes: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct GaugeState {
    last: f64,
    min: f64,
    max: f64,
    samples: u64,
}

impl Default for GaugeState {
    fn default() -> Self {
        Self {
            last: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            samples: 0,
        }
    }
}

/// Storage for one `(metric, tags)` series.
#[derive(Debug)]
pub(crate) enum SeriesStorage {
    Counter(AtomicF64),
    Gauge(Mutex<GaugeState>),
    Rate(RateCells),
    Trend(Mutex<TrendState>),
}

pub(crate) enum DetachedValues {
    Ready(MetricValues),
    Trend(DetachedTrend),
}

impl DetachedValues {
    pub(crate) fn finish(self) -> MetricValues {
        match self {
            Self::Ready(v) => v,
            Self::Trend(t) => MetricValues::Trend(t.finish()),
        }
    }
}

impl SeriesStorage {
    pub(crate) fn new(kind: MetricKind, trend_retention: usize) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(AtomicF64::default()),
            MetricKind::Gauge => Self::Gauge(Mutex::new(GaugeState::default())),
            MetricKind::Rate => Self::Rate(RateCells::default()),
            MetricKind::Trend => Self::Trend(Mutex::new(TrendState::new(trend_retention))),
        }
    }

    /// Fails only when a trend series cannot build its overflow histogram.
    #[inline]
    pub(crate) fn record(&self, value: f64) -> Result<()> {
        match self {
            Self::Counter(c) => c.add(value),
            Self::Gauge(g) => {
                let mut g = g.lock();
                g.last = value;
                g.min = g.min.min(value);
                g.max = g.max.max(value);
                g.samples = g.samples.saturating_add(1);
            }
            Self::Rate(r) => {
                if value != 0.0 {
                    r.passes.fetch_add(1, Ordering::Relaxed);
                }
                r.total.fetch_add(1, Ordering::AcqRel);
            }
            Self::Trend(t) => return t.lock().record(value),
        }
        Ok(())
    }

    /// Reads the series under its own lock only; trend sorting is deferred to `finish`.
    pub(crate) fn detach(&self) -> DetachedValues {
        match self {
            Self::Counter(c) => DetachedValues::Ready(MetricValues::Counter(c.load())),
            Self::Gauge(g) => {
                let g = *g.lock();
                DetachedValues::Ready(MetricValues::Gauge(GaugeValues {
                    value: (g.samples > 0).then_some(g.last),
                    min: (g.samples > 0).then_some(g.min),
                    max: (g.samples > 0).then_some(g.max),
                }))
            }
            Self::Rate(r) => {
                let total = r.total.load(Ordering::Acquire);
                let passes = r.passes.load(Ordering::Relaxed).min(total);
                DetachedValues::Ready(MetricValues::Rate(RateValues { total, passes }))
            }
            Self::Trend(t) => DetachedValues::Trend(t.lock().detach()),
        }
    }
}
