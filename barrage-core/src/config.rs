use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::summary::TrendStat;
use crate::thresholds::{Threshold, ThresholdSet, compile_thresholds};

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
pub const DEFAULT_THRESHOLD_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(10);

pub type EnvVars = Arc<[(Arc<str>, Arc<str>)]>;

/// One ramp segment: concurrency moves linearly to `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub const fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

pub fn default_trend_stats() -> Vec<TrendStat> {
    vec![
        TrendStat::Avg,
        TrendStat::Min,
        TrendStat::Med,
        TrendStat::Max,
        TrendStat::P(90.0),
        TrendStat::P(95.0),
    ]
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub stages: Vec<Stage>,
    pub thresholds: Vec<ThresholdSet>,

    /// How often the worker population is reconciled with the schedule.
    pub tick: Duration,

    /// How often thresholds are evaluated while the run is in progress.
    pub threshold_interval: Duration,

    /// How long in-flight iterations may keep running once the schedule is over.
    pub graceful_stop: Duration,

    pub summary_trend_stats: Vec<TrendStat>,
    pub env: EnvVars,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            thresholds: Vec::new(),
            tick: DEFAULT_TICK,
            threshold_interval: DEFAULT_THRESHOLD_INTERVAL,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            summary_trend_stats: default_trend_stats(),
            env: Arc::from(Vec::new()),
        }
    }
}

impl RunConfig {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Vec<ThresholdSet>) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn with_env<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let vars: Vec<(Arc<str>, Arc<str>)> = vars
            .into_iter()
            .map(|(k, v)| (Arc::from(k.as_ref()), Arc::from(v.as_ref())))
            .collect();
        self.env = Arc::from(vars);
        self
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }

    pub fn max_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Checks intervals and parses every threshold.
    pub fn validate(&self) -> Result<Vec<Threshold>> {
        if self.tick.is_zero() {
            return Err(Error::InvalidTick);
        }
        if self.threshold_interval.is_zero() {
            return Err(Error::InvalidThresholdInterval);
        }

        compile_thresholds(&self.thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::ThresholdSet;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.tick, Duration::from_millis(100));
        assert_eq!(cfg.threshold_interval, Duration::from_secs(2));
        assert_eq!(cfg.graceful_stop, Duration::from_secs(10));
        assert_eq!(cfg.summary_trend_stats.len(), 6);
    }

    #[test]
    fn total_duration_sums_stages() {
        let cfg = RunConfig::new(vec![
            Stage::new(Duration::from_secs(30), 10),
            Stage::new(Duration::from_secs(60), 10),
            Stage::new(Duration::from_secs(30), 0),
        ]);
        assert_eq!(cfg.total_duration(), Duration::from_secs(120));
        assert_eq!(cfg.max_target(), 10);
    }

    #[test]
    fn validate_rejects_zero_tick() {
        let cfg = RunConfig {
            tick: Duration::ZERO,
            ..RunConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidTick)));
    }

    #[test]
    fn validate_surfaces_bad_thresholds() {
        let cfg = RunConfig::default().with_thresholds(vec![ThresholdSet::new(
            "http_req_duration",
            ["p(95)<<500"],
        )]);
        assert!(matches!(
            cfg.validate(),
            Err(Error::InvalidThresholdExpr { .. })
        ));
    }
}
