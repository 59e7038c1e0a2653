//! The bundled workload: replays the plan's HTTP requests once per iteration.

use std::sync::Arc;
use std::time::Duration;

use barrage_core::metrics::{MetricKind, Registry};
use barrage_core::{VuContext, Workload, WorkloadError};
use barrage_http::{HttpClient, HttpRequest, HttpResponse, Method};
use bytes::Bytes;
use futures::future::join_all;
use rand::Rng;
use serde::Deserialize;

pub(crate) const METRIC_HTTP_REQS: &str = "http_reqs";
pub(crate) const METRIC_HTTP_REQ_DURATION: &str = "http_req_duration";
pub(crate) const METRIC_HTTP_REQ_FAILED: &str = "http_req_failed";
pub(crate) const METRIC_DATA_SENT: &str = "data_sent";
pub(crate) const METRIC_DATA_RECEIVED: &str = "data_received";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Selection {
    /// Every request, in order, each iteration.
    #[default]
    Sequence,
    /// One request per iteration, rotating by worker and iteration.
    Rotate,
    /// One request per iteration, picked uniformly at random.
    Random,
    /// Every request at once; the iteration waits for all of them.
    Batch,
}

impl Selection {
    /// Indices of the requests one iteration sends.
    fn pick(self, len: usize, vu_id: u64, iteration: u64) -> Vec<usize> {
        if len == 0 {
            return Vec::new();
        }
        match self {
            Selection::Sequence | Selection::Batch => (0..len).collect(),
            Selection::Rotate => {
                vec![(vu_id.wrapping_add(iteration) % len as u64) as usize]
            }
            Selection::Random => vec![rand::thread_rng().gen_range(0..len)],
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RequestPlan {
    pub name: String,
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub expect_status: u16,
    pub expect_json_key: Option<String>,
    pub max_duration: Option<Duration>,
    pub sleep: Option<Duration>,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpPlan {
    pub base_url: String,
    pub timeout: Option<Duration>,
    pub probe: bool,
    pub requests: Vec<RequestPlan>,
    pub selection: Selection,
    pub sleep: Option<Duration>,
    pub error_metric: Option<String>,
}

pub(crate) struct HttpWorkload {
    client: HttpClient,
    plan: Arc<HttpPlan>,
    check_labels: Arc<[CheckLabels]>,
}

struct CheckLabels {
    status: String,
    json_key: Option<String>,
    max_duration: Option<String>,
}

impl HttpWorkload {
    /// Registers the HTTP metrics up front so they show in the summary even if nothing is sent.
    pub(crate) fn new(plan: HttpPlan, registry: &Registry) -> anyhow::Result<Self> {
        registry.register(METRIC_HTTP_REQS, MetricKind::Counter)?;
        registry.register(METRIC_HTTP_REQ_DURATION, MetricKind::Trend)?;
        registry.register(METRIC_HTTP_REQ_FAILED, MetricKind::Rate)?;
        registry.register(METRIC_DATA_SENT, MetricKind::Counter)?;
        registry.register(METRIC_DATA_RECEIVED, MetricKind::Counter)?;
        if let Some(name) = &plan.error_metric {
            registry.register(name, MetricKind::Rate)?;
        }

        let check_labels = plan
            .requests
            .iter()
            .map(|r| CheckLabels {
                status: format!("status is {}", r.expect_status),
                json_key: r.expect_json_key.as_ref().map(|k| format!("has {k}")),
                max_duration: r
                    .max_duration
                    .map(|d| format!("response time < {}", humantime::format_duration(d))),
            })
            .collect::<Vec<_>>();

        Ok(Self {
            client: HttpClient::default(),
            plan: Arc::new(plan),
            check_labels: Arc::from(check_labels),
        })
    }

    fn build_request(&self, req: &RequestPlan) -> HttpRequest {
        let mut out =
            HttpRequest::new(req.method.clone(), req.url.clone()).with_body(req.body.clone());
        out.headers = req.headers.clone();
        if let Some(timeout) = self.plan.timeout {
            out = out.with_timeout(timeout);
        }
        out
    }

    /// Sends one request and records its samples; `Ok(false)` means a check missed.
    async fn send(&self, ctx: &VuContext, idx: usize) -> Result<bool, barrage_http::Error> {
        let req = &self.plan.requests[idx];
        let labels = &self.check_labels[idx];
        let sampler = ctx.sampler();
        let method = req.method.as_str();

        let res = self.client.request(self.build_request(req)).await;
        let res = match res {
            Ok(res) => res,
            Err(err) => {
                let kind = err.kind();
                let tags = [
                    ("name", req.name.as_str()),
                    ("method", method),
                    ("status", "0"),
                    ("error", kind.as_ref()),
                ];
                sampler.add(METRIC_HTTP_REQS, 1.0, &tags);
                sampler.rate(METRIC_HTTP_REQ_FAILED, true, &tags);
                if let Ok(sent) = barrage_http::estimate_request_bytes(&self.build_request(req)) {
                    sampler.add(METRIC_DATA_SENT, sent as f64, &tags[..2]);
                }
                ctx.check(false, &labels.status);
                if let Some(name) = &self.plan.error_metric {
                    sampler.rate(name, true, &tags[..1]);
                }
                tracing::debug!(
                    vu = ctx.vu_id(),
                    request = %req.name,
                    error = %err,
                    "request failed"
                );
                return Err(err);
            }
        };

        let status = res.status.to_string();
        let tags = [
            ("name", req.name.as_str()),
            ("method", method),
            ("status", status.as_str()),
        ];
        let status_ok = res.status == req.expect_status;

        sampler.add(METRIC_HTTP_REQS, 1.0, &tags);
        sampler.trend(
            METRIC_HTTP_REQ_DURATION,
            res.duration.as_secs_f64() * 1000.0,
            &tags,
        );
        sampler.rate(METRIC_HTTP_REQ_FAILED, !status_ok, &tags);
        sampler.add(METRIC_DATA_SENT, res.bytes_sent as f64, &tags[..2]);
        sampler.add(METRIC_DATA_RECEIVED, res.bytes_received as f64, &tags[..2]);

        let mut ok = ctx.check(status_ok, &labels.status);
        if let (Some(key), Some(label)) = (&req.expect_json_key, &labels.json_key) {
            ok &= ctx.check(has_json_key(&res, key), label);
        }
        if let (Some(max), Some(label)) = (req.max_duration, &labels.max_duration) {
            ok &= ctx.check(res.duration < max, label);
        }

        if let Some(name) = &self.plan.error_metric {
            sampler.rate(name, !ok, &tags[..1]);
        }

        Ok(ok)
    }
}

fn has_json_key(res: &HttpResponse, key: &str) -> bool {
    serde_json::from_slice::<serde_json::Value>(&res.body)
        .ok()
        .and_then(|v| v.get(key).map(|v| !v.is_null()))
        .unwrap_or(false)
}

impl Workload for HttpWorkload {
    async fn setup(&self) -> Result<(), WorkloadError> {
        if !self.plan.probe {
            return Ok(());
        }

        let mut probe = HttpRequest::get(self.plan.base_url.clone());
        probe = probe.with_timeout(self.plan.timeout.unwrap_or(Duration::from_secs(10)));
        match self.client.request(probe).await {
            Ok(res) => {
                tracing::info!(
                    target_url = %self.plan.base_url,
                    status = res.status,
                    "target reachable"
                );
                Ok(())
            }
            Err(err) => Err(WorkloadError::msg(format!(
                "target {} unreachable: {err}",
                self.plan.base_url
            ))),
        }
    }

    async fn iterate(&self, ctx: &VuContext) -> Result<(), WorkloadError> {
        let picked = self
            .plan
            .selection
            .pick(self.plan.requests.len(), ctx.vu_id(), ctx.iteration());

        let mut transport_errors = 0usize;
        if self.plan.selection == Selection::Batch {
            let sent = join_all(picked.iter().map(|&idx| self.send(ctx, idx))).await;
            transport_errors = sent.iter().filter(|r| r.is_err()).count();
        } else {
            for idx in picked {
                if self.send(ctx, idx).await.is_err() {
                    transport_errors += 1;
                }
                if let Some(d) = self.plan.requests[idx].sleep {
                    ctx.sleep(d).await?;
                }
            }
        }

        if let Some(d) = self.plan.sleep {
            ctx.sleep(d).await?;
        }

        if transport_errors > 0 {
            return Err(WorkloadError::msg(format!(
                "{transport_errors} request(s) failed"
            )));
        }
        Ok(())
    }
}
