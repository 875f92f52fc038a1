//! End-to-end tests: a real proxy in front of an in-process origin.

use futures::stream;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use reqwest::Client;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stub_proxy::config::{HookConfig, ProxyMode};
use stub_proxy::fingerprint::fingerprint;
use stub_proxy::proxy::ProxyState;
use stub_proxy::{Config, ProxyServer};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const SHOW_PATH: &str = "/1/statuses/show.json";
const SHOW_BODY: &str = r#"{"id":20,"text":"just setting up my twttr"}"#;
const STREAM_CHUNKS: [&str; 4] = ["first,", "second,", "third,", "last"];
const SLOW_BODY: &str = "worth the wait";

struct Origin {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    endless: Arc<EndlessStream>,
}

/// Observes the origin side of the never-ending `/endless` response.
#[derive(Default)]
struct EndlessStream {
    sent: AtomicUsize,
    dropped: AtomicBool,
}

/// Lives inside the `/endless` body stream; marks the stream dropped.
struct DropFlag(Arc<EndlessStream>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.dropped.store(true, Ordering::SeqCst);
    }
}

impl Origin {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn origin_reply(
    req: Request<Incoming>,
    endless: Arc<EndlessStream>,
) -> Response<BoxBody<Bytes, Infallible>> {
    let path = req.uri().path().to_string();
    match path.as_str() {
        "/slow" => {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Response::builder()
                .body(Full::new(Bytes::from(SLOW_BODY)).boxed())
                .unwrap()
        }
        "/endless" => {
            let frames = stream::unfold(DropFlag(endless), |flag| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.0.sent.fetch_add(1, Ordering::SeqCst);
                Some((Ok::<_, Infallible>(Frame::data(Bytes::from("tick\n"))), flag))
            });
            Response::builder()
                .body(StreamBody::new(frames).boxed())
                .unwrap()
        }
        SHOW_PATH => Response::builder()
            .header("content-type", "application/json")
            .header("x-origin", "real")
            .body(Full::new(Bytes::from(SHOW_BODY)).boxed())
            .unwrap(),
        "/echo" => {
            let body = req.into_body().collect().await.unwrap().to_bytes();
            Response::builder()
                .status(201)
                .header("x-origin", "echo")
                .body(Full::new(body).boxed())
                .unwrap()
        }
        "/stream" => {
            let frames = stream::iter(
                STREAM_CHUNKS
                    .iter()
                    .map(|chunk| Ok::<_, Infallible>(Frame::data(Bytes::from(*chunk))))
                    .collect::<Vec<_>>(),
            );
            Response::builder()
                .header("x-origin", "stream")
                .body(StreamBody::new(frames).boxed())
                .unwrap()
        }
        _ => Response::builder()
            .status(404)
            .body(Full::new(Bytes::from("no such thing")).boxed())
            .unwrap(),
    }
}

async fn start_origin() -> Origin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let endless = Arc::new(EndlessStream::default());
    let counter = Arc::clone(&hits);
    let tracker = Arc::clone(&endless);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let counter = Arc::clone(&counter);
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let tracker = Arc::clone(&tracker);
                    async move { Ok::<_, Infallible>(origin_reply(req, tracker).await) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    Origin {
        addr,
        hits,
        endless,
    }
}

/// Origin that promises 100 bytes, sends a few, then hangs up.
async fn start_truncating_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\npartial")
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn proxy_config(origin_port: u16, dir: &Path) -> Config {
    let mut config = Config::for_origin("127.0.0.1", origin_port);
    config.listen.host = "127.0.0.1".to_string();
    config.listen.port = 0;
    config.stubs.dir = dir.join("stubs");
    config.recording.dir = dir.join("sessions");
    config
}

fn hooks(yaml: &str) -> Vec<HookConfig> {
    serde_yaml::from_str(yaml).unwrap()
}

async fn start_proxy(config: Config) -> (String, Arc<ProxyState>) {
    let bound = ProxyServer::new(config).unwrap().bind().await.unwrap();
    let base = format!("http://{}", bound.local_addr());
    let state = bound.state();
    tokio::spawn(bound.serve());
    (base, state)
}

/// Session files are flushed by a background task after the response.
async fn read_session(path: &Path, expect: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(text) = tokio::fs::read_to_string(path).await {
            if text.contains(expect) || Instant::now() > deadline {
                return text;
            }
        } else if Instant::now() > deadline {
            panic!("session file {} never appeared", path.display());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_miss_then_hit_serves_identical_stub() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let (base, state) = start_proxy(proxy_config(origin.addr.port(), dir.path())).await;
    let client = Client::new();

    let first = client.get(format!("{base}{SHOW_PATH}")).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(
        first.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(first.headers().get("x-origin").unwrap(), "real");
    let first_body = first.bytes().await.unwrap();
    assert_eq!(&first_body[..], SHOW_BODY.as_bytes());
    assert_eq!(origin.hits(), 1);

    let second = client.get(format!("{base}{SHOW_PATH}")).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(
        second.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(second.headers().get("x-origin").unwrap(), "real");
    assert_eq!(second.bytes().await.unwrap(), first_body);
    assert_eq!(origin.hits(), 1, "cached fingerprint must not reach the origin");
    assert_eq!(state.request_count(), 2);

    let fp = fingerprint("GET", SHOW_PATH, b"");
    let stored = std::fs::read(state.stubs().body_path(&fp)).unwrap();
    assert_eq!(stored, SHOW_BODY.as_bytes());
    let head = std::fs::read_to_string(state.stubs().head_path(&fp)).unwrap();
    assert!(head.contains(r#""code":200"#));
    assert!(head.contains(r#""x-origin":"real""#));
}

#[tokio::test]
async fn test_stubs_survive_restart() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let client = Client::new();

    let (base, _) = start_proxy(proxy_config(origin.addr.port(), dir.path())).await;
    let body = client
        .get(format!("{base}{SHOW_PATH}"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, SHOW_BODY);

    // A fresh instance with an unreachable origin still answers from disk.
    let (base, state) = start_proxy(proxy_config(closed_port(), dir.path())).await;
    assert!(state.stubs().is_empty());
    let replay = client.get(format!("{base}{SHOW_PATH}")).send().await.unwrap();
    assert_eq!(replay.status(), 200);
    assert_eq!(replay.text().await.unwrap(), SHOW_BODY);
    assert_eq!(origin.hits(), 1);
}

#[tokio::test]
async fn test_request_body_is_part_of_identity() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let (base, _) = start_proxy(proxy_config(origin.addr.port(), dir.path())).await;
    let client = Client::new();

    for body in ["status=a", "status=b", "status=a"] {
        let response = client
            .post(format!("{base}/echo"))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(response.text().await.unwrap(), body);
    }
    assert_eq!(origin.hits(), 2);
}

#[tokio::test]
async fn test_headers_do_not_change_identity() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let (base, _) = start_proxy(proxy_config(origin.addr.port(), dir.path())).await;
    let client = Client::new();

    for agent in ["first-agent", "second-agent"] {
        let response = client
            .get(format!("{base}{SHOW_PATH}"))
            .header("user-agent", agent)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }
    assert_eq!(origin.hits(), 1);
}

#[tokio::test]
async fn test_unreachable_origin_yields_500() {
    let dir = TempDir::new().unwrap();
    let (base, _) = start_proxy(proxy_config(closed_port(), dir.path())).await;

    let response = Client::new()
        .get(format!("{base}{SHOW_PATH}"))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
    let body = response.text().await.unwrap();
    assert!(body.starts_with("Something bad happened:"), "{body}");
}

#[tokio::test]
async fn test_latency_hook_delays_then_serves() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let mut config = proxy_config(origin.addr.port(), dir.path());
    config.hooks = hooks(
        r#"
- id: added-latency
  action:
    delay: { ms: 300 }
"#,
    );
    let (base, _) = start_proxy(config).await;

    let start = Instant::now();
    let response = Client::new()
        .get(format!("{base}{SHOW_PATH}"))
        .send()
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("x-stub-proxy-hook").is_none());
    assert_eq!(response.text().await.unwrap(), SHOW_BODY);
    assert_eq!(origin.hits(), 1);
}

#[tokio::test]
async fn test_failure_hook_never_contacts_origin() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let mut config = proxy_config(origin.addr.port(), dir.path());
    config.hooks = hooks(
        r#"
- id: slow-failure
  action:
    respond: { status: 500, body: "Really long request man\n", delay_ms: 100 }
"#,
    );
    let (base, _) = start_proxy(config).await;

    let start = Instant::now();
    let response = Client::new()
        .get(format!("{base}{SHOW_PATH}"))
        .send()
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(response.status(), 500);
    assert_eq!(
        response.headers().get("x-stub-proxy-hook").unwrap(),
        "slow-failure"
    );
    assert_eq!(response.text().await.unwrap(), "Really long request man\n");
    assert_eq!(origin.hits(), 0);
}

#[tokio::test]
async fn test_count_based_hooks_follow_request_sequence() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let mut config = proxy_config(origin.addr.port(), dir.path());
    config.hooks = hooks(
        r#"
- id: every-third
  match: { every: 3 }
  action:
    respond: { status: 503, body: "busy" }
- id: every-request
  action:
    delay: { ms: 0 }
"#,
    );
    let (base, _) = start_proxy(config).await;
    let client = Client::new();

    let mut statuses = Vec::new();
    for _ in 0..6 {
        let response = client.get(format!("{base}{SHOW_PATH}")).send().await.unwrap();
        statuses.push(response.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 503, 200, 200, 503]);
    assert_eq!(origin.hits(), 1);
}

#[tokio::test]
async fn test_session_log_records_response_headers() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let (base, _) = start_proxy(proxy_config(origin.addr.port(), dir.path())).await;

    let response = Client::new()
        .get(format!("{base}{SHOW_PATH}"))
        .header("x-client-only", "yes")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.bytes().await.unwrap();

    let text = read_session(&dir.path().join("sessions/0.txt"), SHOW_BODY).await;
    assert!(text.starts_with(&format!("GET {SHOW_PATH} HTTP/1.1\n")));
    let (request_part, response_part) = text.split_once("\nRESPONSE\n").unwrap();
    assert!(request_part.contains("x-client-only: yes"));
    assert!(response_part.contains("Status: 200\n"));
    assert!(response_part.contains("x-origin: real\n"));
    assert!(!response_part.contains("x-client-only"));
    assert!(response_part.ends_with(SHOW_BODY));
}

#[tokio::test]
async fn test_truncated_origin_body_logs_interruption() {
    let origin = start_truncating_origin().await;
    let dir = TempDir::new().unwrap();
    let (base, state) = start_proxy(proxy_config(origin.port(), dir.path())).await;

    let response = Client::new()
        .get(format!("{base}/cut-short"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body = response.text().await.unwrap();
    assert!(body.starts_with("Something bad happened: "));

    let text = read_session(&dir.path().join("sessions/0.txt"), &body).await;
    let (_, response_part) = text.split_once("\nRESPONSE\n").unwrap();
    let (origin_part, replacement) = response_part.split_once("\nINTERRUPTED\n").unwrap();
    assert!(origin_part.contains("Status: 200\n"));
    assert!(origin_part.ends_with("partial"));
    assert!(replacement.contains("Status: 500\n"));
    assert!(replacement.ends_with(&body));
    assert!(state.stubs().is_empty(), "a truncated response must not be stored");
}

#[tokio::test]
async fn test_recording_can_be_disabled() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let mut config = proxy_config(origin.addr.port(), dir.path());
    config.recording.enabled = false;
    let (base, _) = start_proxy(config).await;

    let response = Client::new()
        .get(format!("{base}{SHOW_PATH}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.bytes().await.unwrap();
    assert!(!dir.path().join("sessions").exists());
}

#[tokio::test]
async fn test_transparent_mode_streams_every_request() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let mut config = proxy_config(origin.addr.port(), dir.path());
    config.mode = ProxyMode::Transparent;
    let (base, _) = start_proxy(config).await;
    let client = Client::new();
    let expected: String = STREAM_CHUNKS.concat();

    for _ in 0..2 {
        let response = client.get(format!("{base}/stream")).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().get("x-origin").unwrap(), "stream");
        assert_eq!(response.text().await.unwrap(), expected);
    }
    assert_eq!(origin.hits(), 2);
    assert!(!dir.path().join("stubs").exists());

    let text = read_session(&dir.path().join("sessions/1.txt"), &expected).await;
    assert!(text.contains("GET /stream HTTP/1.1\n"));
    assert!(text.contains("x-origin: stream\n"));
    assert!(text.ends_with(&expected));
}

#[tokio::test]
async fn test_transparent_mode_streams_request_body() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let mut config = proxy_config(origin.addr.port(), dir.path());
    config.mode = ProxyMode::Transparent;
    let (base, _) = start_proxy(config).await;

    let response = Client::new()
        .post(format!("{base}/echo"))
        .body("status=streamed")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.text().await.unwrap(), "status=streamed");

    let text = read_session(&dir.path().join("sessions/0.txt"), "x-origin: echo").await;
    assert!(text.contains("status=streamed"));
    assert!(text.contains("Status: 201\n"));
}

#[tokio::test]
async fn test_transparent_mode_unreachable_origin() {
    let dir = TempDir::new().unwrap();
    let mut config = proxy_config(closed_port(), dir.path());
    config.mode = ProxyMode::Transparent;
    let (base, _) = start_proxy(config).await;

    let response = Client::new()
        .get(format!("{base}/stream"))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert!(!response.text().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_misses_fetch_origin_once() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let (base, state) = start_proxy(proxy_config(origin.addr.port(), dir.path())).await;
    let client = Client::new();

    let requests = (0..8).map(|_| {
        let client = client.clone();
        let url = format!("{base}/slow");
        async move {
            let response = client.get(url).send().await.unwrap();
            assert_eq!(response.status(), 200);
            response.text().await.unwrap()
        }
    });
    let bodies = futures::future::join_all(requests).await;

    assert!(bodies.iter().all(|body| body == SLOW_BODY));
    assert_eq!(origin.hits(), 1, "identical misses must share one origin fetch");
    assert_eq!(state.request_count(), 8);
    assert_eq!(state.stubs().len(), 1);
}

#[tokio::test]
async fn test_transparent_client_disconnect_stops_origin_stream() {
    let origin = start_origin().await;
    let dir = TempDir::new().unwrap();
    let mut config = proxy_config(origin.addr.port(), dir.path());
    config.mode = ProxyMode::Transparent;
    let (base, _) = start_proxy(config).await;

    let mut response = Client::new()
        .get(format!("{base}/endless"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let first = response.chunk().await.unwrap().unwrap();
    assert!(first.starts_with(b"tick"));
    drop(response);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !origin.endless.dropped.load(Ordering::SeqCst) {
        assert!(
            Instant::now() < deadline,
            "origin body was still being read after the client left"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let sent = origin.endless.sent.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(origin.endless.sent.load(Ordering::SeqCst), sent);
}
