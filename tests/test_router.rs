//! End-to-end router tests: forwarding, static fallback, upstream failure

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use devgate::config::{RuleConfig, StaticFilesConfig};
use devgate::http::request::{Method, Request, RequestBuilder};
use devgate::proxy::router::ForwardingRouter;
use devgate::proxy::rules::RuleSet;
use devgate::proxy::upstream::UpstreamClient;
use devgate::static_files::StaticFiles;

fn glob_rule(context: &str, target: &str) -> RuleConfig {
    RuleConfig {
        context: Some(context.to_string()),
        path: None,
        target: target.to_string(),
        change_origin: true,
    }
}

fn prefix_rule(path: &str, target: &str) -> RuleConfig {
    RuleConfig {
        context: None,
        path: Some(path.to_string()),
        target: target.to_string(),
        change_origin: true,
    }
}

fn router_with(rules: &[RuleConfig], static_root: PathBuf) -> ForwardingRouter {
    ForwardingRouter::new(
        RuleSet::from_config(rules).unwrap(),
        UpstreamClient::new(Duration::from_secs(2), Duration::from_secs(5)),
        StaticFiles::new(&StaticFilesConfig {
            root: static_root,
            index: "index.html".to_string(),
        }),
    )
}

fn get(path: &str) -> Request {
    RequestBuilder::new()
        .method(Method::GET)
        .path(path)
        .header("Host", "localhost:8080")
        .build()
        .unwrap()
}

/// Creates a fresh static root with an index.html and an app.js.
fn static_root(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("devgate-test-{}-{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("index.html"), "<html>home</html>").unwrap();
    std::fs::write(dir.join("app.js"), "console.log(1)").unwrap();
    dir
}

/// One-shot upstream: accepts a single connection, returns the raw request
/// head it received and answers with `response`.
async fn spawn_upstream(response: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if n == 0 || buf.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }

        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();

        String::from_utf8_lossy(&buf).to_string()
    });

    (port, handle)
}

#[tokio::test]
async fn test_forwarded_request_relays_upstream_response() {
    // Scenario A shape: glob context, path forwarded unchanged
    let (port, upstream) = spawn_upstream(
        "HTTP/1.1 201 Created\r\nContent-Length: 2\r\nX-Upstream: yes\r\nConnection: close\r\n\r\nok",
    )
    .await;

    let router = router_with(
        &[glob_rule("/Alchemy/IAlchemyApi/**", &format!("http://localhost:{port}/"))],
        static_root("fwd"),
    );

    let response = router.handle(&get("/Alchemy/IAlchemyApi/ping")).await;

    assert_eq!(response.status.as_u16(), 201);
    assert_eq!(response.body, b"ok".to_vec());
    assert_eq!(response.header("X-Upstream"), Some("yes"));
    // Per-hop headers are not relayed
    assert_eq!(response.header("Connection"), None);

    let seen = upstream.await.unwrap();
    assert!(seen.starts_with("GET /Alchemy/IAlchemyApi/ping HTTP/1.1\r\n"));
    assert!(seen.contains(&format!("Host: localhost:{port}")));
}

#[tokio::test]
async fn test_prefix_key_rule_rewrites_forwarded_path() {
    // Scenario B shape: /IAlchemyApi/ping → /Alchemy/ping on the upstream
    let (port, upstream) =
        spawn_upstream("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;

    let router = router_with(
        &[prefix_rule("/IAlchemyApi/**", &format!("http://localhost:{port}/Alchemy"))],
        static_root("rewrite"),
    );

    let response = router.handle(&get("/IAlchemyApi/ping")).await;
    assert_eq!(response.status.as_u16(), 200);

    let seen = upstream.await.unwrap();
    assert!(seen.starts_with("GET /Alchemy/ping HTTP/1.1\r\n"));
}

#[tokio::test]
async fn test_forwarded_head_is_not_awaited_for_a_body() {
    // A correct upstream answers HEAD with headers only: Content-Length
    // set, no body, socket left open. The relay must return immediately
    // instead of waiting out the declared length.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let hold = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if n == 0 || buf.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }

        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let router = router_with(
        &[glob_rule("/api/**", &format!("http://127.0.0.1:{port}/"))],
        static_root("head-fwd"),
    );

    let request = RequestBuilder::new()
        .method(Method::HEAD)
        .path("/api/resource")
        .header("Host", "localhost:8080")
        .build()
        .unwrap();

    let response = router.handle(&request).await;
    assert_eq!(response.status.as_u16(), 200);
    assert!(response.body.is_empty());
    // The upstream's advertised length survives the hop
    assert_eq!(response.header("Content-Length"), Some("100"));

    hold.abort();
}

#[tokio::test]
async fn test_forwarded_304_ends_at_the_header_block() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let hold = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if n == 0 || buf.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }

        socket
            .write_all(b"HTTP/1.1 304 Not Modified\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let router = router_with(
        &[glob_rule("/api/**", &format!("http://127.0.0.1:{port}/"))],
        static_root("not-modified"),
    );

    let response = router.handle(&get("/api/cached")).await;
    assert_eq!(response.status.as_u16(), 304);
    assert!(response.body.is_empty());

    hold.abort();
}

#[tokio::test]
async fn test_upstream_without_content_length_is_read_to_eof() {
    let (port, upstream) = spawn_upstream(
        "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nstreamed until close",
    )
    .await;

    let router = router_with(
        &[glob_rule("/api/**", &format!("http://localhost:{port}/"))],
        static_root("eof"),
    );

    let response = router.handle(&get("/api/stream")).await;
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.body, b"streamed until close".to_vec());
    assert_eq!(response.header("Content-Length"), Some("20"));

    upstream.await.unwrap();
}

#[tokio::test]
async fn test_unmatched_request_served_statically() {
    // Scenario C: no rule matches, the static collaborator answers
    let router = router_with(
        &[glob_rule("/Alchemy/IAlchemyApi/**", "http://localhost:5000/")],
        static_root("static"),
    );

    let response = router.handle(&get("/app.js")).await;
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.body, b"console.log(1)".to_vec());
    assert_eq!(response.header("Content-Type"), Some("application/javascript"));
}

#[tokio::test]
async fn test_root_path_serves_index() {
    let router = router_with(&[], static_root("index"));

    let response = router.handle(&get("/")).await;
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.body, b"<html>home</html>".to_vec());
    assert_eq!(response.header("Content-Type"), Some("text/html; charset=utf-8"));
}

#[tokio::test]
async fn test_missing_static_file_is_404() {
    let router = router_with(&[], static_root("missing"));

    let response = router.handle(&get("/no-such-file.css")).await;
    assert_eq!(response.status.as_u16(), 404);
}

#[tokio::test]
async fn test_parent_traversal_is_rejected() {
    let router = router_with(&[], static_root("traversal"));

    let response = router.handle(&get("/../../etc/passwd")).await;
    assert_eq!(response.status.as_u16(), 404);
}

#[tokio::test]
async fn test_static_head_reports_length_without_body() {
    let router = router_with(&[], static_root("head-static"));

    let request = RequestBuilder::new()
        .method(Method::HEAD)
        .path("/app.js")
        .build()
        .unwrap();

    let response = router.handle(&request).await;
    assert_eq!(response.status.as_u16(), 200);
    assert!(response.body.is_empty());
    // Length of the body the matching GET would return ("console.log(1)")
    assert_eq!(response.header("Content-Length"), Some("14"));
}

#[tokio::test]
async fn test_non_get_static_request_is_405() {
    let router = router_with(&[], static_root("method"));

    let request = RequestBuilder::new()
        .method(Method::POST)
        .path("/app.js")
        .build()
        .unwrap();

    let response = router.handle(&request).await;
    assert_eq!(response.status.as_u16(), 405);
}

#[tokio::test]
async fn test_unreachable_upstream_yields_502_and_serving_continues() {
    // Scenario D: grab a free port, close it, point a rule at it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = listener.local_addr().unwrap().port();
    drop(listener);

    let router = router_with(
        &[glob_rule("/api/**", &format!("http://127.0.0.1:{dead_port}/"))],
        static_root("dead"),
    );

    let response = router.handle(&get("/api/ping")).await;
    assert_eq!(response.status.as_u16(), 502);
    assert!(!response.body.is_empty());

    // The failure is isolated: the next request is served normally
    let response = router.handle(&get("/")).await;
    assert_eq!(response.status.as_u16(), 200);
}

#[tokio::test]
async fn test_slow_upstream_yields_504() {
    // Upstream accepts but never answers; the request timeout must fire.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let hold = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let router = ForwardingRouter::new(
        RuleSet::from_config(&[glob_rule("/api/**", &format!("http://127.0.0.1:{port}/"))])
            .unwrap(),
        UpstreamClient::new(Duration::from_secs(2), Duration::from_millis(200)),
        StaticFiles::new(&StaticFilesConfig {
            root: static_root("slow"),
            index: "index.html".to_string(),
        }),
    );

    let response = router.handle(&get("/api/ping")).await;
    assert_eq!(response.status.as_u16(), 504);

    hold.abort();
}
