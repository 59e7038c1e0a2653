use std::time::Duration;

use barrage_metrics::{MetricValues, Snapshot};

use crate::error::{Error, Result};

/// Threshold expressions declared for one metric key.
///
/// The key is a metric name, optionally followed by a tag selector:
/// `http_req_duration{name:GetBalance}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<ThresholdSpec>,
}

impl ThresholdSet {
    pub fn new<S: Into<ThresholdSpec>>(
        metric: impl Into<String>,
        expressions: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            metric: metric.into(),
            expressions: expressions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdSpec {
    pub expression: String,
    /// Abort the run as soon as a periodic evaluation sees this threshold fail.
    pub abort_on_fail: bool,
}

impl ThresholdSpec {
    pub fn aborting(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            abort_on_fail: true,
        }
    }
}

impl From<&str> for ThresholdSpec {
    fn from(expression: &str) -> Self {
        Self {
            expression: expression.to_string(),
            abort_on_fail: false,
        }
    }
}

impl From<String> for ThresholdSpec {
    fn from(expression: String) -> Self {
        Self {
            expression,
            abort_on_fail: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "==")]
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Count,
    Rate,
    Avg,
    Min,
    Max,
    Med,
    Value,
    P(f64),
    /// The bare metric name: count for counters, rate for rates, avg for trends and
    /// value for gauges.
    Natural,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

/// A parsed threshold, ready to evaluate against snapshots.
#[derive(Debug, Clone)]
pub struct Threshold {
    /// Metric key as declared, including any selector.
    pub key: String,
    pub metric: String,
    pub selector: Vec<(String, String)>,
    pub source: String,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
    pub abort_on_fail: bool,
}

/// Splits `name{key:value,...}` into the metric name and its tag selector.
pub fn parse_metric_key(raw: &str) -> std::result::Result<(String, Vec<(String, String)>), String> {
    let raw = raw.trim();
    let Some(open) = raw.find('{') else {
        if raw.is_empty() {
            return Err("empty metric name".to_string());
        }
        return Ok((raw.to_string(), Vec::new()));
    };

    let name = raw[..open].trim();
    if name.is_empty() {
        return Err("empty metric name".to_string());
    }

    let inner = raw[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| "unterminated tag selector".to_string())?;

    let mut selector = Vec::new();
    for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = part
            .split_once(':')
            .ok_or_else(|| format!("invalid tag selector `{part}` (expected key:value)"))?;
        let k = k.trim();
        let v = v.trim();
        if k.is_empty() {
            return Err(format!("invalid tag selector `{part}` (empty key)"));
        }
        selector.push((k.to_string(), v.to_string()));
    }

    Ok((name.to_string(), selector))
}

pub fn parse_threshold_expr(metric: &str, raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "value" => ThresholdAgg::Value,
        _ if left == metric => ThresholdAgg::Natural,
        lower => {
            let Some(inner) = lower.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) else {
                return Err(format!("unknown aggregation `{left}` in threshold: {raw}"));
            };
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile out of range in threshold: {raw}"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value in threshold: {raw}"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

/// Parses every declared threshold; the first invalid one is an error.
pub(crate) fn compile_thresholds(sets: &[ThresholdSet]) -> Result<Vec<Threshold>> {
    let mut out = Vec::new();
    for set in sets {
        let (metric, selector) =
            parse_metric_key(&set.metric).map_err(|error| Error::InvalidThresholdMetric {
                key: set.metric.clone(),
                error,
            })?;

        for spec in &set.expressions {
            let expr = parse_threshold_expr(&metric, &spec.expression).map_err(|error| {
                Error::InvalidThresholdExpr {
                    metric: set.metric.clone(),
                    error,
                }
            })?;

            out.push(Threshold {
                key: set.metric.clone(),
                metric: metric.clone(),
                selector: selector.clone(),
                source: spec.expression.clone(),
                expr,
                abort_on_fail: spec.abort_on_fail,
            });
        }
    }
    Ok(out)
}

/// Evaluates thresholds against a snapshot. `elapsed` feeds per-second counter rates.
pub fn evaluate_thresholds(
    snapshot: &Snapshot,
    thresholds: &[Threshold],
    elapsed: Duration,
) -> Vec<ThresholdOutcome> {
    thresholds
        .iter()
        .map(|t| {
            let observed = snapshot
                .get(&t.metric)
                .filter(|m| !m.series.is_empty())
                .and_then(|m| m.select(&t.selector))
                .and_then(|values| observed_value(&values, t.expr.agg, elapsed));

            let passed = observed.is_some_and(|v| compare(v, t.expr.op, t.expr.value));
            ThresholdOutcome {
                metric: t.key.clone(),
                expression: t.source.clone(),
                observed,
                passed,
                abort_on_fail: t.abort_on_fail,
            }
        })
        .collect()
}

fn observed_value(values: &MetricValues, agg: ThresholdAgg, elapsed: Duration) -> Option<f64> {
    match (agg, values) {
        (ThresholdAgg::Count | ThresholdAgg::Natural, MetricValues::Counter(v)) => Some(*v),
        (ThresholdAgg::Count, MetricValues::Rate(r)) => Some(r.total as f64),
        (ThresholdAgg::Count, MetricValues::Trend(t)) => Some(t.count() as f64),

        (ThresholdAgg::Rate | ThresholdAgg::Natural, MetricValues::Rate(r)) => Some(r.rate()),
        (ThresholdAgg::Rate, MetricValues::Counter(v)) => {
            let secs = elapsed.as_secs_f64();
            (secs > 0.0).then(|| v / secs)
        }

        (ThresholdAgg::Avg | ThresholdAgg::Natural, MetricValues::Trend(t)) => t.avg(),
        (ThresholdAgg::Min, MetricValues::Trend(t)) => t.min(),
        (ThresholdAgg::Max, MetricValues::Trend(t)) => t.max(),
        (ThresholdAgg::Med, MetricValues::Trend(t)) => t.med(),
        (ThresholdAgg::P(p), MetricValues::Trend(t)) => t.percentile(p),

        (ThresholdAgg::Value | ThresholdAgg::Natural, MetricValues::Gauge(g)) => g.value,
        (ThresholdAgg::Min, MetricValues::Gauge(g)) => g.min,
        (ThresholdAgg::Max, MetricValues::Gauge(g)) => g.max,

        _ => None,
    }
}

fn compare(observed: f64, op: ThresholdOp, expected: f64) -> bool {
    match op {
        ThresholdOp::Lt => observed < expected,
        ThresholdOp::Lte => observed <= expected,
        ThresholdOp::Gt => observed > expected,
        ThresholdOp::Gte => observed >= expected,
        ThresholdOp::Eq => observed == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barrage_metrics::{Registry, Sample};

    fn record(reg: &Registry, sample: Sample) {
        if let Err(e) = reg.record(&sample) {
            panic!("unexpected error: {e}");
        }
    }

    fn compile(metric: &str, exprs: &[&str]) -> Vec<Threshold> {
        compile_thresholds(&[ThresholdSet::new(metric, exprs.iter().copied())])
            .unwrap_or_else(|e| panic!("{e}"))
    }

    fn rate_with(hits: u64, total: u64) -> Registry {
        let reg = Registry::default();
        for i in 0..total {
            record(&reg, Sample::rate("http_req_failed", i < hits));
        }
        reg
    }

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse_threshold_expr("m", "  avg  <=  123  ").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.agg, ThresholdAgg::Avg);
        assert_eq!(expr.op, ThresholdOp::Lte);
        assert_eq!(expr.value, 123.0);
    }

    #[test]
    fn parse_threshold_expr_accepts_fractional_percentiles() {
        let expr = parse_threshold_expr("m", "p(99.9)<1500").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.agg, ThresholdAgg::P(99.9));
        assert_eq!(expr.op, ThresholdOp::Lt);
    }

    #[test]
    fn parse_threshold_expr_rejects_out_of_range_percentiles() {
        for raw in ["p(101)<1", "p(0)<1"] {
            let err = match parse_threshold_expr("m", raw) {
                Ok(_) => panic!("expected error for {raw}"),
                Err(e) => e,
            };
            assert!(err.contains("out of range"), "{err}");
        }
    }

    #[test]
    fn parse_threshold_expr_rejects_garbage() {
        for raw in ["", "avg", "avg<", "<5", "foo<5", "avg<abc", "p(x)<5"] {
            assert!(parse_threshold_expr("m", raw).is_err(), "{raw} should fail");
        }
    }

    #[test]
    fn bare_metric_name_means_natural_aggregate() {
        let expr = parse_threshold_expr("errors", "errors<0.1").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.agg, ThresholdAgg::Natural);
    }

    #[test]
    fn parse_metric_key_reads_selector() {
        let (name, selector) = parse_metric_key("http_req_duration{name:GetBalance, method:POST}")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(name, "http_req_duration");
        assert_eq!(
            selector,
            vec![
                ("name".to_string(), "GetBalance".to_string()),
                ("method".to_string(), "POST".to_string()),
            ]
        );

        assert!(parse_metric_key("http_req_duration{name:x").is_err());
        assert!(parse_metric_key("{name:x}").is_err());
        assert!(parse_metric_key("m{novalue}").is_err());
    }

    #[test]
    fn rate_threshold_follows_observed_fraction() {
        let thresholds = compile("http_req_failed", &["rate<0.1"]);

        let low = rate_with(5, 100).snapshot();
        let out = evaluate_thresholds(&low, &thresholds, Duration::from_secs(1));
        assert!(out[0].passed);
        assert_eq!(out[0].observed, Some(0.05));

        let high = rate_with(15, 100).snapshot();
        let out = evaluate_thresholds(&high, &thresholds, Duration::from_secs(1));
        assert!(!out[0].passed);
        assert_eq!(out[0].observed, Some(0.15));
    }

    #[test]
    fn missing_metric_fails_threshold() {
        let reg = Registry::default();
        let out = evaluate_thresholds(
            &reg.snapshot(),
            &compile("nope", &["count>0"]),
            Duration::from_secs(1),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].metric, "nope");
        assert!(!out[0].passed);
        assert!(out[0].observed.is_none());
    }

    #[test]
    fn registered_but_unobserved_metric_fails() {
        let reg = Registry::default();
        if let Err(e) = reg.register("http_req_failed", barrage_metrics::MetricKind::Rate) {
            panic!("unexpected error: {e}");
        }
        let out = evaluate_thresholds(
            &reg.snapshot(),
            &compile("http_req_failed", &["rate<0.1"]),
            Duration::from_secs(1),
        );
        assert!(!out[0].passed);
        assert!(out[0].observed.is_none());
    }

    #[test]
    fn trend_percentile_and_selector() {
        let reg = Registry::default();
        for v in [100.0, 200.0, 300.0, 400.0, 500.0] {
            record(
                &reg,
                Sample::trend("http_req_duration", v).with_tag("name", "GetBalance"),
            );
        }
        record(
            &reg,
            Sample::trend("http_req_duration", 5_000.0).with_tag("name", "Slow"),
        );

        let snap = reg.snapshot();
        let scoped = compile("http_req_duration{name:GetBalance}", &["p(95)<500"]);
        let out = evaluate_thresholds(&snap, &scoped, Duration::from_secs(1));
        assert!(out[0].passed);
        assert_eq!(out[0].observed, Some(480.0));
        assert_eq!(out[0].metric, "http_req_duration{name:GetBalance}");

        let global = compile("http_req_duration", &["max<1000"]);
        let out = evaluate_thresholds(&snap, &global, Duration::from_secs(1));
        assert!(!out[0].passed);
        assert_eq!(out[0].observed, Some(5_000.0));

        let unmatched = compile("http_req_duration{name:Nope}", &["avg<1"]);
        let out = evaluate_thresholds(&snap, &unmatched, Duration::from_secs(1));
        assert!(out[0].observed.is_none());
    }

    #[test]
    fn inapplicable_aggregate_fails_without_observation() {
        let reg = Registry::default();
        record(&reg, Sample::counter("iterations", 3.0));
        let out = evaluate_thresholds(
            &reg.snapshot(),
            &compile("iterations", &["p(95)<1"]),
            Duration::from_secs(1),
        );
        assert!(!out[0].passed);
        assert!(out[0].observed.is_none());
    }

    #[test]
    fn counter_rate_is_per_second() {
        let reg = Registry::default();
        record(&reg, Sample::counter("http_reqs", 50.0));
        let thresholds = compile("http_reqs", &["rate>=5", "count==50", "http_reqs>10"]);
        let out = evaluate_thresholds(&reg.snapshot(), &thresholds, Duration::from_secs(10));
        assert!(out.iter().all(|o| o.passed), "{out:?}");
        assert_eq!(out[0].observed, Some(5.0));
    }

    #[test]
    fn abort_flag_is_carried_through() {
        let sets = vec![ThresholdSet {
            metric: "errors".to_string(),
            expressions: vec![ThresholdSpec::aborting("rate<0.1")],
        }];
        let thresholds = compile_thresholds(&sets).unwrap_or_else(|e| panic!("{e}"));
        assert!(thresholds[0].abort_on_fail);
    }
}
