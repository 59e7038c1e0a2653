use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use barrage_metrics::{MetricValues, Snapshot, TrendSnapshot};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::run::RunStatus;
use crate::thresholds::{Threshold, ThresholdOutcome};

/// A trend aggregate shown in summaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrendStat {
    Avg,
    Min,
    Med,
    Max,
    Count,
    P(f64),
}

impl TrendStat {
    pub fn value(&self, trend: &TrendSnapshot) -> Option<f64> {
        match self {
            Self::Avg => trend.avg(),
            Self::Min => trend.min(),
            Self::Med => trend.med(),
            Self::Max => trend.max(),
            Self::Count => Some(trend.count() as f64),
            Self::P(p) => trend.percentile(*p),
        }
    }
}

impl fmt::Display for TrendStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Med => f.write_str("med"),
            Self::Max => f.write_str("max"),
            Self::Count => f.write_str("count"),
            Self::P(p) => write!(f, "p({p})"),
        }
    }
}

impl FromStr for TrendStat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "med" => Ok(Self::Med),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            lower => lower
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|p| *p > 0.0 && *p <= 100.0)
                .map(Self::P)
                .ok_or_else(|| Error::InvalidTrendStat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesSummary {
    pub tags: BTreeMap<String, String>,
    pub values: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    #[serde(rename = "type")]
    pub kind: String,
    pub values: BTreeMap<String, Option<f64>>,

    /// Expression → passed, for thresholds declared on exactly this key.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub thresholds: BTreeMap<String, bool>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<SeriesSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSummary {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub ok: bool,
    pub abort_on_fail: bool,
}

impl From<&ThresholdOutcome> for ThresholdSummary {
    fn from(o: &ThresholdOutcome) -> Self {
        Self {
            metric: o.metric.clone(),
            expression: o.expression.clone(),
            observed: o.observed,
            ok: o.passed,
            abort_on_fail: o.abort_on_fail,
        }
    }
}

/// End-of-run report, built once from the final snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub state: RunStatus,
    /// Completed with every threshold passing.
    pub passed: bool,
    /// The run was aborted before its schedule finished.
    pub incomplete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub elapsed_ms: f64,
    pub dropped_samples: u64,
    pub trend_stats: Vec<String>,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<ThresholdSummary>,
}

impl RunSummary {
    pub fn build(
        state: RunStatus,
        abort_reason: Option<String>,
        elapsed: Duration,
        snapshot: &Snapshot,
        thresholds: &[Threshold],
        outcomes: &[ThresholdOutcome],
        trend_stats: &[TrendStat],
    ) -> Self {
        let mut metrics: BTreeMap<String, MetricSummary> = BTreeMap::new();

        for (name, metric) in &snapshot.metrics {
            let series = metric
                .tagged_series()
                .map(|s| SeriesSummary {
                    tags: s.tags.iter().cloned().collect(),
                    values: summarize_values(&s.values, elapsed, trend_stats),
                })
                .collect();

            metrics.insert(
                name.clone(),
                MetricSummary {
                    kind: metric.kind.to_string(),
                    values: summarize_values(metric.values(), elapsed, trend_stats),
                    thresholds: BTreeMap::new(),
                    series,
                },
            );
        }

        // Selector thresholds get their own sub-metric entry, keyed as declared.
        for t in thresholds.iter().filter(|t| !t.selector.is_empty()) {
            if metrics.contains_key(&t.key) {
                continue;
            }
            let Some(metric) = snapshot.get(&t.metric) else {
                continue;
            };
            let values = metric
                .select(&t.selector)
                .unwrap_or_else(|| MetricValues::empty(metric.kind));
            metrics.insert(
                t.key.clone(),
                MetricSummary {
                    kind: metric.kind.to_string(),
                    values: summarize_values(&values, elapsed, trend_stats),
                    thresholds: BTreeMap::new(),
                    series: Vec::new(),
                },
            );
        }

        for o in outcomes {
            if let Some(m) = metrics.get_mut(&o.metric) {
                m.thresholds.insert(o.expression.clone(), o.passed);
            }
        }

        let thresholds_ok = outcomes.iter().all(|o| o.passed);

        Self {
            state,
            passed: state == RunStatus::Completed && thresholds_ok,
            incomplete: state == RunStatus::Aborted,
            abort_reason,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            dropped_samples: snapshot.dropped_samples,
            trend_stats: trend_stats.iter().map(ToString::to_string).collect(),
            metrics,
            checks: collect_checks(snapshot),
            thresholds: outcomes.iter().map(ThresholdSummary::from).collect(),
        }
    }

    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.ok)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_ms.max(0.0) / 1000.0)
    }
}

fn summarize_values(
    values: &MetricValues,
    elapsed: Duration,
    trend_stats: &[TrendStat],
) -> BTreeMap<String, Option<f64>> {
    let mut out = BTreeMap::new();
    match values {
        MetricValues::Counter(count) => {
            let secs = elapsed.as_secs_f64();
            out.insert("count".to_string(), Some(*count));
            out.insert("rate".to_string(), (secs > 0.0).then(|| count / secs));
        }
        MetricValues::Gauge(g) => {
            out.insert("value".to_string(), g.value);
            out.insert("min".to_string(), g.min);
            out.insert("max".to_string(), g.max);
        }
        MetricValues::Rate(r) => {
            out.insert("rate".to_string(), Some(r.rate()));
            out.insert("passes".to_string(), Some(r.passes as f64));
            out.insert("fails".to_string(), Some(r.fails() as f64));
        }
        MetricValues::Trend(t) => {
            for stat in trend_stats {
                out.insert(stat.to_string(), stat.value(t));
            }
        }
    }
    out
}

fn collect_checks(snapshot: &Snapshot) -> Vec<CheckSummary> {
    let Some(metric) = snapshot.get("checks") else {
        return Vec::new();
    };

    let mut by_name: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for s in &metric.series {
        let MetricValues::Rate(r) = &s.values else {
            continue;
        };
        let name = s.tag("check").unwrap_or("-").to_string();
        let entry = by_name.entry(name).or_default();
        entry.0 = entry.0.saturating_add(r.passes);
        entry.1 = entry.1.saturating_add(r.fails());
    }

    by_name
        .into_iter()
        .map(|(name, (passes, fails))| CheckSummary {
            name,
            passes,
            fails,
        })
        .collect()
}

pub fn render_json(summary: &RunSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}

const NAME_WIDTH: usize = 32;

/// Condensed console rendering: checks, then one aligned row per metric.
pub fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();

    if !summary.checks.is_empty() {
        for c in &summary.checks {
            let mark = if c.fails == 0 { '✓' } else { '✗' };
            writeln!(out, "     {mark} {}", c.name).ok();
            if c.fails > 0 {
                let total = c.passes.saturating_add(c.fails).max(1);
                let pct = (c.passes as f64) * 100.0 / (total as f64);
                writeln!(
                    out,
                    "      ↳  {pct:.0}% ✓ {} / ✗ {}",
                    c.passes, c.fails
                )
                .ok();
            }
        }
        out.push('\n');
    }

    for (name, m) in &summary.metrics {
        let prefix = if m.thresholds.is_empty() {
            "  "
        } else if m.thresholds.values().all(|ok| *ok) {
            "✓ "
        } else {
            "✗ "
        };

        let dots = NAME_WIDTH.saturating_sub(name.chars().count()).max(2);
        writeln!(
            out,
            "   {prefix}{name}{}: {}",
            ".".repeat(dots),
            format_values(name, m, &summary.trend_stats)
        )
        .ok();

        for (expr, ok) in &m.thresholds {
            let mark = if *ok { '✓' } else { '✗' };
            writeln!(out, "       {mark} {expr}").ok();
        }
    }

    let failed = summary.thresholds.iter().filter(|t| !t.ok).count();
    if !summary.thresholds.is_empty() {
        writeln!(
            out,
            "\n     thresholds: {} passed, {failed} failed",
            summary.thresholds.len() - failed
        )
        .ok();
    }

    write!(
        out,
        "\n     run: {} in {}",
        summary.state,
        format_duration(summary.elapsed())
    )
    .ok();
    if let Some(reason) = &summary.abort_reason {
        write!(out, " ({reason})").ok();
    }
    out.push('\n');

    if summary.dropped_samples > 0 {
        writeln!(out, "     dropped samples: {}", summary.dropped_samples).ok();
    }

    out
}

fn format_values(name: &str, m: &MetricSummary, trend_stats: &[String]) -> String {
    let get = |k: &str| m.values.get(k).copied().flatten();
    let base = name.split('{').next().unwrap_or(name);
    let as_value = |v: Option<f64>| -> String {
        match v {
            None => "-".to_string(),
            Some(v) if base.ends_with("duration") => format_millis(v),
            Some(v) if base.starts_with("data_") => format_bytes(v),
            Some(v) => format_number(v),
        }
    };

    match m.kind.as_str() {
        "counter" => format!(
            "{} {}/s",
            as_value(get("count")),
            get("rate").map(format_number).unwrap_or_else(|| "-".to_string())
        ),
        "gauge" => format!(
            "{} min={} max={}",
            as_value(get("value")),
            as_value(get("min")),
            as_value(get("max"))
        ),
        "rate" => format!(
            "{:.2}% ✓ {} ✗ {}",
            get("rate").unwrap_or(0.0) * 100.0,
            format_number(get("passes").unwrap_or(0.0)),
            format_number(get("fails").unwrap_or(0.0))
        ),
        _ => trend_stats
            .iter()
            .map(|stat| format!("{stat}={}", as_value(get(stat))))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        format!("{v:.2}")
    }
}

fn format_millis(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else if ms >= 1.0 {
        format!("{ms:.2}ms")
    } else {
        format!("{:.2}µs", ms * 1000.0)
    }
}

fn format_bytes(b: f64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    if b >= GIB {
        format!("{:.2}GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.2}MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.2}KiB", b / KIB)
    } else {
        format!("{b:.0}B")
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (m, s) = (secs / 60, secs % 60);
    let tenths = d.subsec_millis() / 100;
    if m > 0 {
        format!("{m}m{s:02}.{tenths}s")
    } else {
        format!("{s}.{tenths}s")
    }
}

/// Receives the final summary exactly once per run.
pub trait SummaryReporter: Send + Sync {
    fn report(&self, summary: &RunSummary) -> Result<()>;
}

/// Writes the JSON summary to `path`, creating parent directories.
#[derive(Debug, Clone)]
pub struct JsonArtifact {
    pub path: PathBuf,
}

impl JsonArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SummaryReporter for JsonArtifact {
    fn report(&self, summary: &RunSummary) -> Result<()> {
        let json = render_json(summary)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        tracing::info!(path = %self.path.display(), "summary written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::{ThresholdSet, compile_thresholds, evaluate_thresholds};
    use barrage_metrics::{MetricKind, Registry, Sample};

    fn record(reg: &Registry, sample: Sample) {
        if let Err(e) = reg.record(&sample) {
            panic!("unexpected error: {e}");
        }
    }

    fn sample_registry() -> Registry {
        let reg = Registry::default();
        for v in [100.0, 200.0, 300.0, 400.0, 500.0] {
            record(
                &reg,
                Sample::trend("http_req_duration", v).with_tag("name", "GetBalance"),
            );
        }
        for ok in [true, true, true, false] {
            record(
                &reg,
                Sample::rate("checks", ok).with_tag("check", "status is 200"),
            );
        }
        record(&reg, Sample::counter("iterations", 4.0).with_tag("status", "success"));
        if let Err(e) = reg.register("errors", MetricKind::Rate) {
            panic!("unexpected error: {e}");
        }
        reg
    }

    fn build(reg: &Registry, sets: &[ThresholdSet]) -> RunSummary {
        let thresholds = compile_thresholds(sets).unwrap_or_else(|e| panic!("{e}"));
        let snap = reg.snapshot();
        let elapsed = Duration::from_secs(2);
        let outcomes = evaluate_thresholds(&snap, &thresholds, elapsed);
        RunSummary::build(
            RunStatus::Completed,
            None,
            elapsed,
            &snap,
            &thresholds,
            &outcomes,
            &crate::config::default_trend_stats(),
        )
    }

    #[test]
    fn trend_stat_round_trips_through_text() {
        for raw in ["avg", "min", "med", "max", "count", "p(90)", "p(99.9)"] {
            let stat: TrendStat = raw.parse().unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(stat.to_string(), raw);
        }
        assert!("p(0)".parse::<TrendStat>().is_err());
        assert!("stdev".parse::<TrendStat>().is_err());
    }

    #[test]
    fn summary_contains_kind_appropriate_values() {
        let summary = build(&sample_registry(), &[]);
        assert!(summary.passed);
        assert!(!summary.incomplete);

        let duration = &summary.metrics["http_req_duration"];
        assert_eq!(duration.kind, "trend");
        assert_eq!(duration.values["p(95)"], Some(480.0));
        assert_eq!(duration.values["avg"], Some(300.0));
        assert_eq!(duration.series.len(), 1);

        let iterations = &summary.metrics["iterations"];
        assert_eq!(iterations.values["count"], Some(4.0));
        assert_eq!(iterations.values["rate"], Some(2.0));

        // Registered but never observed: present with zero values.
        let errors = &summary.metrics["errors"];
        assert_eq!(errors.values["rate"], Some(0.0));
        assert_eq!(errors.values["passes"], Some(0.0));

        assert_eq!(
            summary.checks,
            vec![CheckSummary {
                name: "status is 200".to_string(),
                passes: 3,
                fails: 1,
            }]
        );
    }

    #[test]
    fn empty_trend_renders_null() {
        let reg = Registry::default();
        if let Err(e) = reg.register("iteration_duration", MetricKind::Trend) {
            panic!("unexpected error: {e}");
        }
        let summary = build(&reg, &[]);
        let trend = &summary.metrics["iteration_duration"];
        assert!(trend.values.values().all(Option::is_none));

        let json = render_json(&summary).unwrap_or_else(|e| panic!("{e}"));
        let parsed: serde_json::Value =
            serde_json::from_str(&json).unwrap_or_else(|e| panic!("{e}"));
        assert!(parsed["metrics"]["iteration_duration"]["values"]["avg"].is_null());

        let text = render_text(&summary);
        assert!(text.contains("iteration_duration"), "{text}");
        assert!(text.contains("avg=-"), "{text}");
    }

    #[test]
    fn threshold_outcomes_flow_into_summary() {
        let sets = vec![
            ThresholdSet::new("http_req_duration{name:GetBalance}", ["p(95)<500"]),
            ThresholdSet::new("errors", ["rate<0.1"]),
        ];
        let summary = build(&sample_registry(), &sets);

        assert!(!summary.passed);
        assert!(!summary.thresholds_passed());
        assert_eq!(summary.thresholds.len(), 2);

        let scoped = &summary.metrics["http_req_duration{name:GetBalance}"];
        assert_eq!(scoped.thresholds.get("p(95)<500"), Some(&true));
        assert_eq!(scoped.values["p(95)"], Some(480.0));

        let errors = &summary.metrics["errors"];
        assert_eq!(errors.thresholds.get("rate<0.1"), Some(&false));

        let text = render_text(&summary);
        assert!(text.contains("✓ p(95)<500"), "{text}");
        assert!(text.contains("✗ rate<0.1"), "{text}");
        assert!(text.contains("1 passed, 1 failed"), "{text}");
    }

    #[test]
    fn json_keys_are_stably_ordered() {
        let summary = build(&sample_registry(), &[]);
        let a = render_json(&summary).unwrap_or_else(|e| panic!("{e}"));
        let b = render_json(&summary).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a, b);

        let checks = a.find("\"checks\"").unwrap_or_else(|| panic!("no checks"));
        let duration = a
            .find("\"http_req_duration\"")
            .unwrap_or_else(|| panic!("no duration"));
        assert!(checks < duration);
    }

    #[test]
    fn json_artifact_writes_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out").join("summary.json");
        let summary = build(&sample_registry(), &[]);

        JsonArtifact::new(&path).report(&summary)?;

        let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["state"], "completed");
        assert_eq!(parsed["metrics"]["checks"]["values"]["passes"], 3.0);
        Ok(())
    }
}
