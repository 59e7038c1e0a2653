//! Run engine for barrage: stage scheduling, virtual-user execution, threshold
//! evaluation and run summaries.

mod config;
mod error;
mod executor;
mod progress;
mod run;
mod schedule;
mod summary;
mod thresholds;
mod vu;
mod workload;

pub use config::{
    DEFAULT_GRACEFUL_STOP, DEFAULT_THRESHOLD_INTERVAL, DEFAULT_TICK, EnvVars, RunConfig, Stage,
    default_trend_stats,
};
pub use error::{Error, Result};
pub use executor::{IterationStatus, VuPool};
pub use progress::{ProgressFn, ProgressUpdate, StageProgress};
pub use run::{RunController, RunOutcome, RunStatus};
pub use schedule::{RampingSchedule, StageSnapshot};
pub use summary::{
    CheckSummary, JsonArtifact, MetricSummary, RunSummary, SeriesSummary, SummaryReporter,
    ThresholdSummary, TrendStat, render_json, render_text,
};
pub use thresholds::{
    Threshold, ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdOutcome, ThresholdSet,
    ThresholdSpec, evaluate_thresholds, parse_metric_key, parse_threshold_expr,
};
pub use vu::VuContext;
pub use workload::{FnWorkload, Workload, WorkloadError};

pub use barrage_metrics as metrics;
