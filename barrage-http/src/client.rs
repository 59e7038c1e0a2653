use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::wire::{has_header, host_header_value, parse_url, request_bytes, response_head_bytes};
use crate::{Error, HttpRequest, HttpResponse, Result};

/// Pooled HTTP/1.1 client; cheap to clone and share between workers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // OS connect timeouts run to tens of seconds against unreachable hosts.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);
        http_connector.set_nodelay(true);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self { inner }
    }

    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let (parsed, uri) = parse_url(&req.url)?;
        let bytes_sent = request_bytes(&req, &parsed, &uri);
        let timeout = req.timeout;

        let mut builder = Request::builder().method(req.method).uri(uri);

        // Explicit Host/Content-Length keep the byte accounting deterministic.
        if !has_header(&req.headers, "host")
            && let Some(host) = host_header_value(&parsed)
        {
            builder = builder.header(http::header::HOST, host);
        }
        if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
            builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
        }

        for (k, v) in req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = http::header::HeaderValue::from_str(&v)?;
            builder = builder.header(name, value);
        }

        let request: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;

        let started = Instant::now();
        let exchange = async {
            let res: hyper::Response<Incoming> = self.inner.request(request).await?;
            let (parts, body) = res.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, Error>((parts, body))
        };

        let (parts, body) = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| Error::Timeout(timeout))??,
            None => exchange.await?,
        };
        let duration = started.elapsed();

        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &parts.headers {
            let v = String::from_utf8_lossy(value.as_bytes()).into_owned();
            merged
                .entry(name.as_str().to_ascii_lowercase())
                .and_modify(|cur| {
                    if !cur.is_empty() {
                        cur.push_str(", ");
                    }
                    cur.push_str(&v);
                })
                .or_insert(v);
        }

        let bytes_received = response_head_bytes(parts.version, parts.status, &parts.headers)
            .saturating_add(body.len() as u64);

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            body,
            headers: merged.into_iter().collect(),
            bytes_sent,
            bytes_received,
            duration,
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(HttpRequest::get(url)).await
    }
}
