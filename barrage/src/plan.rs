use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use barrage_core::{
    DEFAULT_GRACEFUL_STOP, DEFAULT_THRESHOLD_INTERVAL, DEFAULT_TICK, EnvVars, RunConfig, Stage,
    ThresholdSet, ThresholdSpec, TrendStat, default_trend_stats,
};
use serde::Deserialize;

use crate::workload::{HttpPlan, RequestPlan, Selection};

pub(crate) const DEFAULT_BASE_URL_ENV: &str = "BASE_URL";
pub(crate) const DEFAULT_BASE_URL: &str = "http://localhost:22555";

/// A YAML test plan as written on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PlanYaml {
    #[serde(default)]
    pub stages: Vec<StageYaml>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdYaml>,

    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,
    #[serde(default)]
    pub tick: Option<YamlDuration>,
    #[serde(default)]
    pub threshold_interval: Option<YamlDuration>,

    #[serde(default)]
    pub summary_trend_stats: Option<Vec<String>>,
    #[serde(default)]
    pub summary_export: Option<PathBuf>,

    #[serde(default)]
    pub target: TargetYaml,

    #[serde(default)]
    pub requests: Vec<RequestYaml>,

    /// `sequence` sends every request per iteration; `rotate` sends one.
    #[serde(default)]
    pub selection: Selection,

    /// Think time at the end of every iteration.
    #[serde(default)]
    pub sleep: Option<YamlDuration>,

    /// Rate metric fed with `true` whenever a request misses its checks.
    #[serde(default)]
    pub error_metric: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub duration: YamlDuration,
    pub target: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdYaml {
    One(ThresholdItemYaml),
    Many(Vec<ThresholdItemYaml>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdItemYaml {
    Expr(String),
    Full(ThresholdFullYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ThresholdFullYaml {
    pub threshold: String,
    #[serde(default)]
    pub abort_on_fail: bool,
}

impl From<ThresholdItemYaml> for ThresholdSpec {
    fn from(value: ThresholdItemYaml) -> Self {
        match value {
            ThresholdItemYaml::Expr(expression) => ThresholdSpec::from(expression),
            ThresholdItemYaml::Full(full) => ThresholdSpec {
                expression: full.threshold,
                abort_on_fail: full.abort_on_fail,
            },
        }
    }
}

impl ThresholdYaml {
    fn into_specs(self) -> Vec<ThresholdSpec> {
        match self {
            Self::One(item) => vec![item.into()],
            Self::Many(items) => items.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct TargetYaml {
    #[serde(default = "default_base_url_env")]
    pub base_url_env: String,
    #[serde(default = "default_base_url")]
    pub default_base_url: String,

    /// Per-request deadline.
    #[serde(default)]
    pub timeout: Option<YamlDuration>,

    /// Send one GET to the base URL before starting workers.
    #[serde(default = "default_true")]
    pub probe: bool,
}

impl Default for TargetYaml {
    fn default() -> Self {
        Self {
            base_url_env: default_base_url_env(),
            default_base_url: default_base_url(),
            timeout: None,
            probe: true,
        }
    }
}

fn default_base_url_env() -> String {
    DEFAULT_BASE_URL_ENV.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_expect_status() -> u16 {
    200
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestYaml {
    /// Value of the `name` tag on every sample this request produces.
    pub name: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<BodyYaml>,
    #[serde(default = "default_expect_status")]
    pub expect_status: u16,
    /// Top-level key the JSON response body must contain.
    #[serde(default)]
    pub expect_json_key: Option<String>,
    #[serde(default)]
    pub max_duration: Option<YamlDuration>,
    #[serde(default)]
    pub sleep: Option<YamlDuration>,
}

/// Raw text is sent as-is; structured YAML is serialized to JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum BodyYaml {
    Text(String),
    Json(serde_json::Value),
}

impl BodyYaml {
    fn into_bytes(self) -> anyhow::Result<bytes::Bytes> {
        Ok(match self {
            Self::Text(s) => bytes::Bytes::from(s),
            Self::Json(v) => bytes::Bytes::from(serde_json::to_vec(&v)?),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 30s, 1m), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let v = v.trim();
                if v == "0" {
                    return Ok(YamlDuration(Duration::ZERO));
                }
                let d = humantime::parse_duration(v).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

impl PlanYaml {
    pub(crate) async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read plan: {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid plan: {}", path.display()))
    }

    pub(crate) fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Resolves the plan against `env` into a core run config and the HTTP workload plan.
    pub(crate) fn resolve(self, env: EnvVars) -> anyhow::Result<(RunConfig, HttpPlan)> {
        if self.requests.is_empty() {
            anyhow::bail!("plan has no requests");
        }

        let summary_trend_stats = match self.summary_trend_stats {
            Some(raw) => raw
                .iter()
                .map(|s| s.parse::<TrendStat>())
                .collect::<Result<Vec<_>, _>>()?,
            None => default_trend_stats(),
        };

        let config = RunConfig {
            stages: self
                .stages
                .iter()
                .map(|s| Stage::new(s.duration.into_inner(), s.target))
                .collect(),
            thresholds: self
                .thresholds
                .into_iter()
                .map(|(metric, t)| ThresholdSet::new(metric, t.into_specs()))
                .collect(),
            tick: self.tick.map_or(DEFAULT_TICK, YamlDuration::into_inner),
            threshold_interval: self
                .threshold_interval
                .map_or(DEFAULT_THRESHOLD_INTERVAL, YamlDuration::into_inner),
            graceful_stop: self
                .graceful_stop
                .map_or(DEFAULT_GRACEFUL_STOP, YamlDuration::into_inner),
            summary_trend_stats,
            env: env.clone(),
        };
        config.validate()?;

        let base_url = env
            .iter()
            .find(|(k, _)| k.as_ref() == self.target.base_url_env)
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(self.target.default_base_url);

        let requests = self
            .requests
            .into_iter()
            .enumerate()
            .map(|(idx, r)| -> anyhow::Result<RequestPlan> {
                let method =
                    barrage_http::Method::from_bytes(r.method.to_ascii_uppercase().as_bytes())
                        .with_context(|| {
                            format!("requests[{idx}]: invalid method `{}`", r.method)
                        })?;
                let name = r.name.unwrap_or_else(|| format!("{} {}", method, r.path));
                let body = match r.body {
                    Some(b) => b.into_bytes()?,
                    None => bytes::Bytes::new(),
                };
                Ok(RequestPlan {
                    url: join_url(&base_url, &r.path),
                    name,
                    method,
                    headers: r.headers.into_iter().collect(),
                    body,
                    expect_status: r.expect_status,
                    expect_json_key: r.expect_json_key,
                    max_duration: r.max_duration.map(YamlDuration::into_inner),
                    sleep: r.sleep.map(YamlDuration::into_inner),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        if self.selection == Selection::Batch {
            if let Some(r) = requests.iter().find(|r| r.sleep.is_some()) {
                anyhow::bail!(
                    "request `{}`: per-request sleep is not allowed with `selection: batch`",
                    r.name
                );
            }
        }

        let http = HttpPlan {
            base_url,
            timeout: self.target.timeout.map(YamlDuration::into_inner),
            probe: self.target.probe,
            requests,
            selection: self.selection,
            sleep: self.sleep.map(YamlDuration::into_inner),
            error_metric: self.error_metric,
        };

        Ok((config, http))
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.is_empty() || path == "/" {
        return format!("{base}/");
    }
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
