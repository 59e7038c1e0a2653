//! Sample aggregation for barrage runs.
//!
//! Workers submit [`Sample`]s through a [`Sampler`]; the [`Registry`] folds them into
//! named counter, gauge, rate and trend series, and [`Registry::snapshot`] produces the
//! point-in-time view used for threshold evaluation and reporting.

mod error;
mod key;
mod metrics;
mod registry;
mod sample;
mod sampler;
mod snapshot;
mod tags;
mod trend;

pub use error::{Error, Result};
pub use key::KeyId;
pub use metrics::MetricKind;
pub use registry::{DEFAULT_TREND_RETENTION, MetricId, Registry};
pub use sample::Sample;
pub use sampler::Sampler;
pub use snapshot::{
    GaugeValues, MetricSnapshot, MetricValues, RateValues, SeriesSnapshot, Snapshot,
};
pub use tags::TagSet;
pub use trend::{TrendSnapshot, percentile_sorted};
