use std::time::Duration;

use barrage_http::{ErrorKind, HttpClient, HttpRequest, estimate_request_bytes};

const GETBALANCE: &str = r#"{"method":"getbalance","params":[],"jsonrpc":"1.0","id":"it"}"#;

#[tokio::test]
async fn post_rpc_reports_status_body_and_sizes() -> anyhow::Result<()> {
    let server = barrage_testserver::TestServer::start().await?;
    let client = HttpClient::default();

    let req = HttpRequest::post(server.url("/"), GETBALANCE)
        .with_header("Content-Type", "application/json");
    let expected_sent = estimate_request_bytes(&req)?;

    let res = client.request(req).await?;
    assert_eq!(res.status, 200);
    assert!(res.is_success());
    assert_eq!(res.bytes_sent, expected_sent);
    assert!(res.bytes_received > res.body.len() as u64);

    let body: serde_json::Value = serde_json::from_slice(&res.body)?;
    assert!(body.get("result").is_some());
    assert_eq!(body["id"], "it");

    assert_eq!(server.stats().rpc_ok(), 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unknown_method_is_a_server_error_not_a_transport_error() -> anyhow::Result<()> {
    let server = barrage_testserver::TestServer::start().await?;
    let client = HttpClient::default();

    let res = client
        .request(HttpRequest::post(
            server.url("/"),
            r#"{"method":"nosuch","id":1}"#,
        ))
        .await?;
    assert_eq!(res.status, 500);
    assert!(!res.is_success());
    assert_eq!(server.stats().rpc_errors(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn slow_response_past_deadline_times_out() -> anyhow::Result<()> {
    let server = barrage_testserver::TestServer::start().await?;
    let client = HttpClient::default();

    let err = match client
        .request(HttpRequest::get(server.url("/slow")).with_timeout(Duration::from_millis(5)))
        .await
    {
        Ok(res) => panic!("expected timeout, got status {}", res.status),
        Err(e) => e,
    };
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let res = client
        .request(HttpRequest::get(server.url("/slow")).with_timeout(Duration::from_secs(5)))
        .await?;
    assert_eq!(res.status, 200);
    assert!(res.duration >= Duration::from_millis(50));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn one_client_serves_repeated_requests() -> anyhow::Result<()> {
    let server = barrage_testserver::TestServer::start().await?;
    let client = HttpClient::default();

    for _ in 0..5 {
        let res = client.get(&server.url("/health")).await?;
        assert_eq!(res.body_utf8(), Some("ok"));
    }
    assert_eq!(server.stats().requests_total(), 5);

    server.shutdown().await;
    Ok(())
}
