//! Integration tests for the HTTP layer
//!
//! These tests use wiremock to exercise retries, rate limiting, downloads
//! and the proxy-pool client against real sockets.

use policy_trawl::config::{ProxyConfig, RequestConfig};
use policy_trawl::crawler::{Attempt, Fetcher, ProxyError, ProxyPool};
use reqwest::header::HeaderMap;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> RequestConfig {
    RequestConfig {
        delay_ms: 0,
        timeout_secs: 5,
        max_retries: 3,
        retry_delay_ms: 10,
        rate_limit_delay_ms: 10,
        session_rotate_interval: 50,
    }
}

fn fetcher() -> Fetcher {
    Fetcher::new(settings(), HeaderMap::new(), None).expect("Failed to build fetcher")
}

async fn get_text(fetcher: &mut Fetcher, url: &str) -> Option<String> {
    fetcher
        .execute(
            "test",
            |client| client.get(url),
            |response| Attempt::Done(response.body.clone()),
        )
        .await
        .expect("Session rebuild failed")
}

async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_retries_after_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let mut fetcher = fetcher();
    let body = get_text(&mut fetcher, &format!("{}/data", mock_server.uri())).await;

    assert_eq!(body.as_deref(), Some("ok"));
    assert_eq!(request_count(&mock_server).await, 2);
}

#[tokio::test]
async fn test_not_found_gives_up_immediately() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let mut fetcher = fetcher();
    let body = get_text(&mut fetcher, &format!("{}/missing", mock_server.uri())).await;

    assert!(body.is_none());
    assert_eq!(request_count(&mock_server).await, 1);
}

#[tokio::test]
async fn test_rate_limit_then_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("finally"))
        .mount(&mock_server)
        .await;

    let mut fetcher = fetcher();
    let body = get_text(&mut fetcher, &format!("{}/busy", mock_server.uri())).await;

    assert_eq!(body.as_deref(), Some("finally"));
    assert_eq!(request_count(&mock_server).await, 3);
}

#[tokio::test]
async fn test_exhausted_retries_return_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let mut fetcher = fetcher();
    let body = get_text(&mut fetcher, &format!("{}/down", mock_server.uri())).await;

    assert!(body.is_none());
    assert_eq!(request_count(&mock_server).await, 3);
}

#[tokio::test]
async fn test_interpreter_can_request_retry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .mount(&mock_server)
        .await;

    let url = format!("{}/api", mock_server.uri());
    let mut fetcher = fetcher();
    let value = fetcher
        .execute(
            "json",
            |client| client.get(&url),
            |response| match serde_json::from_str::<serde_json::Value>(&response.body) {
                Ok(value) => Attempt::Done(value),
                Err(e) => Attempt::Retry(e.to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(value.unwrap()["ok"], true);
    assert_eq!(request_count(&mock_server).await, 2);
}

#[tokio::test]
async fn test_download_streams_to_file() {
    let mock_server = MockServer::start().await;
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

    Mock::given(method("GET"))
        .and(path("/files/report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("report.pdf");
    let mut fetcher = fetcher();

    let saved = fetcher
        .download(&format!("{}/files/report.pdf", mock_server.uri()), &dest)
        .await
        .unwrap();

    assert!(saved);
    assert_eq!(std::fs::read(&dest).unwrap(), payload);
}

#[tokio::test]
async fn test_empty_download_is_a_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("empty.bin");
    let mut fetcher = fetcher();

    let saved = fetcher
        .download(&format!("{}/empty", mock_server.uri()), &dest)
        .await
        .unwrap();
    assert!(!saved);
}

/// Serves every connection a response that declares `declared` bytes but
/// closes after sending `sent`
async fn truncating_server(declared: usize, sent: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }

            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                declared
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&vec![b'x'; sent]).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn test_truncated_download_is_a_failure() {
    let base = truncating_server(30_000, 20_000).await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("cut.pdf");
    let mut fetcher = fetcher();

    let saved = fetcher
        .download(&format!("{}/files/cut.pdf", base), &dest)
        .await
        .unwrap();

    assert!(!saved);
    // The partial body reached disk, it just was not accepted
    let len = std::fs::metadata(&dest).unwrap().len();
    assert!(len > 0 && len <= 20_000);
}

#[tokio::test]
async fn test_failed_download_ignores_stale_file() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("stale.pdf");
    std::fs::write(&dest, b"left over from an earlier run").unwrap();
    let mut fetcher = fetcher();

    let saved = fetcher
        .download(&format!("{}/files/stale.pdf", mock_server.uri()), &dest)
        .await
        .unwrap();

    assert!(!saved);
    assert_eq!(request_count(&mock_server).await, 3);
}

fn proxy_config(api_url: &str) -> ProxyConfig {
    ProxyConfig {
        enabled: true,
        api_url: Some(api_url.to_string()),
        secret_id: Some("sid".to_string()),
        secret_key: Some("skey".to_string()),
        api_key: None,
    }
}

#[tokio::test]
async fn test_proxy_pool_json() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/getdps/"))
        .and(query_param("secret_id", "sid"))
        .and(query_param("signature", "skey"))
        .and(query_param("num", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "msg": "",
            "data": { "proxy_list": ["10.0.0.1:8080", "10.0.0.2:8080"] }
        })))
        .mount(&mock_server)
        .await;

    let pool = ProxyPool::from_config(
        &proxy_config(&format!("{}/getdps/", mock_server.uri())),
        Duration::from_secs(5),
    )
    .expect("Pool should be enabled");

    let proxies = pool.fetch(2, "json").await.unwrap();
    assert_eq!(proxies, vec!["10.0.0.1:8080", "10.0.0.2:8080"]);
}

#[tokio::test]
async fn test_proxy_pool_text_and_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("format", "text"))
        .respond_with(ResponseTemplate::new(200).set_body_string("10.0.0.3:3128\n\n"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": -1,
            "msg": "bad signature"
        })))
        .mount(&mock_server)
        .await;

    let pool = ProxyPool::from_config(&proxy_config(&mock_server.uri()), Duration::from_secs(5))
        .expect("Pool should be enabled");

    assert_eq!(pool.fetch(1, "text").await.unwrap(), vec!["10.0.0.3:3128"]);
    assert!(matches!(
        pool.fetch(1, "json").await,
        Err(ProxyError::Api { code: -1, .. })
    ));
}

#[tokio::test]
async fn test_proxy_failure_falls_back_to_direct() {
    let pool_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&pool_server)
        .await;

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("direct"))
        .mount(&upstream)
        .await;

    let pool = ProxyPool::from_config(&proxy_config(&pool_server.uri()), Duration::from_secs(5));
    let mut fetcher = Fetcher::new(settings(), HeaderMap::new(), pool).unwrap();
    assert!(fetcher.has_proxy_support());

    let body = get_text(&mut fetcher, &format!("{}/page", upstream.uri())).await;
    assert_eq!(body.as_deref(), Some("direct"));
    assert!(fetcher.session().proxy.is_none());
}

#[tokio::test]
async fn test_malformed_pool_proxy_falls_back_to_direct() {
    let pool_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "msg": "",
            "data": { "proxy_list": ["bad proxy:80"] }
        })))
        .mount(&pool_server)
        .await;

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("direct"))
        .mount(&upstream)
        .await;

    let pool = ProxyPool::from_config(&proxy_config(&pool_server.uri()), Duration::from_secs(5));
    let mut fetcher = Fetcher::new(settings(), HeaderMap::new(), pool).unwrap();

    let body = fetcher
        .execute(
            "page",
            |client| client.get(format!("{}/page", upstream.uri())),
            |response| Attempt::Done(response.body.clone()),
        )
        .await
        .expect("An unusable proxy must not end the session");

    assert_eq!(body.as_deref(), Some("direct"));
    assert!(fetcher.session().proxy.is_none());
    assert_eq!(request_count(&upstream).await, 1);
}
