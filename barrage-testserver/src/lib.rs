//! In-process wallet-style JSON-RPC target for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{Json, Router};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_RPC: &str = "/";
pub const PATH_HEALTH: &str = "/health";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_UNAVAILABLE: &str = "/unavailable";

const METHOD_NOT_FOUND: i64 = -32601;
const PARSE_ERROR: i64 = -32700;

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    rpc_ok: Arc<AtomicU64>,
    rpc_errors: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn rpc_ok(&self) -> u64 {
        self.rpc_ok.load(Ordering::Relaxed)
    }

    pub fn rpc_errors(&self) -> u64 {
        self.rpc_errors.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    #[serde(default)]
    id: Value,
}

fn rpc_result(method: &str) -> Option<Value> {
    match method.to_ascii_lowercase().as_str() {
        "getbalance" => Some(json!(1234.5)),
        "listtransactions" => Some(json!([
            {"txid": "a1", "category": "receive", "amount": 10.0},
            {"txid": "b2", "category": "send", "amount": -2.5},
        ])),
        "getinfo" => Some(json!({"version": 1_140_600, "blocks": 4_200_000, "connections": 8})),
        "getunconfirmedbalance" => Some(json!(0.0)),
        "getnewaddress" => Some(json!("DTestAddress1111111111111111111111")),
        _ => None,
    }
}

async fn handle_rpc(
    State(stats): State<TestServerStats>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    TestServerStats::inc(&stats.requests_total);

    let req: RpcRequest = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            TestServerStats::inc(&stats.rpc_errors);
            let res = json!({
                "result": null,
                "error": {"code": PARSE_ERROR, "message": "Parse error"},
                "id": null,
            });
            return (StatusCode::BAD_REQUEST, Json(res));
        }
    };

    match rpc_result(&req.method) {
        Some(result) => {
            TestServerStats::inc(&stats.rpc_ok);
            let res = json!({"result": result, "error": null, "id": req.id});
            (StatusCode::OK, Json(res))
        }
        None => {
            TestServerStats::inc(&stats.rpc_errors);
            let res = json!({
                "result": null,
                "error": {"code": METHOD_NOT_FOUND, "message": "Method not found"},
                "id": req.id,
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(res))
        }
    }
}

async fn handle_health(State(stats): State<TestServerStats>) -> &'static str {
    TestServerStats::inc(&stats.requests_total);
    "ok"
}

async fn handle_slow(State(stats): State<TestServerStats>) -> &'static str {
    TestServerStats::inc(&stats.requests_total);
    sleep(Duration::from_millis(50)).await;
    "slow"
}

async fn handle_unavailable(State(stats): State<TestServerStats>) -> StatusCode {
    TestServerStats::inc(&stats.requests_total);
    StatusCode::SERVICE_UNAVAILABLE
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_RPC, post(handle_rpc).get(handle_health))
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_SLOW, get(handle_slow).post(handle_slow))
        .route(PATH_UNAVAILABLE, get(handle_unavailable).post(handle_unavailable))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_methods_have_results() {
        assert!(rpc_result("getbalance").is_some());
        assert!(rpc_result("GetBalance").is_some());
        assert!(rpc_result("listtransactions").is_some());
        assert!(rpc_result("sendtoaddress").is_none());
    }

    #[tokio::test]
    async fn rpc_handler_answers_and_counts() {
        let stats = TestServerStats::default();

        let body =
            Bytes::from_static(br#"{"method":"getbalance","params":[],"jsonrpc":"1.0","id":"t"}"#);
        let (status, Json(v)) = handle_rpc(State(stats.clone()), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["result"], json!(1234.5));
        assert_eq!(v["id"], "t");

        let (status, _) = handle_rpc(State(stats.clone()), Bytes::from_static(b"nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(stats.requests_total(), 2);
        assert_eq!(stats.rpc_ok(), 1);
        assert_eq!(stats.rpc_errors(), 1);
    }
}
