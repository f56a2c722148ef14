//! Shared test infrastructure for integration tests.
//!
//! Provides throwaway HTTP backend servers, configuration builders, and
//! utility functions used across all integration test modules.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use edgegate::{
    build_client, BoxBody, Config, HttpClient, HttpProber, ProbesConfig, RuntimeConfig,
    StateStore,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// A synthetic client address used in all test invocations.
const TEST_CLIENT_ADDR: &str = "192.168.1.100:54321";

/// Hostname the test configs use for the admin surface.
pub const ADMIN_HOST: &str = "admin.test";

/// Initializes a tracing subscriber for test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

pub fn test_addr() -> SocketAddr {
    TEST_CLIENT_ADDR.parse().unwrap()
}

pub fn test_client() -> HttpClient {
    build_client()
}

/// Collects a [`BoxBody`] into [`Bytes`], mapping any body error to a
/// descriptive panic so test assertions remain concise.
pub async fn collect_body(body: BoxBody) -> Bytes {
    body.collect()
        .await
        .expect("failed to collect response body")
        .to_bytes()
}

/// Returns a unique path under the system temp directory for a test's
/// state file, removing any leftover from a previous run.
pub fn temp_state_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("edgegate-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}-{}.json", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

/// Opens a fresh state store backed by a unique temp file.
pub fn test_store(name: &str) -> Arc<StateStore> {
    Arc::new(StateStore::open(temp_state_path(name)))
}

/// Builds a `RuntimeConfig` forwarding to the given local origin, with no
/// probe endpoints configured.
pub fn test_config(origin: SocketAddr) -> Arc<RuntimeConfig> {
    Arc::new(
        Config {
            origin: format!("http://{origin}"),
            admin_domain: ADMIN_HOST.into(),
            ..Default::default()
        }
        .into_runtime()
        .expect("test config must be valid"),
    )
}

/// Builds a `RuntimeConfig` whose prober targets the given endpoints.
pub fn test_config_with_probes(
    origin: SocketAddr,
    origin_probe: Option<SocketAddr>,
    registry_probe: Option<SocketAddr>,
) -> Arc<RuntimeConfig> {
    Arc::new(
        Config {
            origin: format!("http://{origin}"),
            admin_domain: ADMIN_HOST.into(),
            probes: ProbesConfig {
                origin_url: origin_probe.map(|a| format!("http://{a}/up")),
                origin_timeout_ms: Some(500),
                registry_url: registry_probe.map(|a| format!("http://{a}/health")),
                registry_timeout_ms: Some(500),
                ..Default::default()
            },
            ..Default::default()
        }
        .into_runtime()
        .expect("test config must be valid"),
    )
}

/// Builds the prober matching a runtime config.
pub fn test_prober(config: &RuntimeConfig) -> HttpProber {
    HttpProber::new(config.probes.clone(), config.provider.clone())
}

/// Returns a local address with no listener behind it, for dead-endpoint
/// scenarios. The port is taken from a bound-then-dropped listener.
pub async fn unreachable_addr() -> SocketAddr {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind throwaway listener");
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Starts a local HTTP server that responds to every request with the
/// given status, content-type, and body. Returns the server address and a
/// handle to shut it down.
pub async fn start_backend(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> (SocketAddr, oneshot::Sender<()>) {
    start_backend_with_headers(status, content_type, body, &[]).await
}

/// Starts a backend that mimics the edge provider: responses carry the
/// `server: cloudflare` and `cf-ray` fingerprint headers.
pub async fn start_edge_backend(
    status: StatusCode,
    body: &'static str,
) -> (SocketAddr, oneshot::Sender<()>) {
    start_backend_with_headers(
        status,
        "text/html",
        body,
        &[("server", "cloudflare"), ("cf-ray", "8f2b3c4d5e6f-CDG")],
    )
    .await
}

/// Starts a backend with arbitrary extra response headers.
pub async fn start_backend_with_headers(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
    extra_headers: &'static [(&'static str, &'static str)],
) -> (SocketAddr, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind test backend");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut shutdown = std::pin::pin!(async {
            let _ = rx.await;
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, _) = result.expect("accept failed");
                    let service = service_fn(move |_req: Request<Incoming>| {
                        async move {
                            let mut builder = Response::builder()
                                .status(status)
                                .header("content-type", content_type);
                            for (name, value) in extra_headers {
                                builder = builder.header(*name, *value);
                            }
                            Ok::<_, std::convert::Infallible>(
                                builder
                                    .body(Full::new(Bytes::from(body)))
                                    .expect("test response must build"),
                            )
                        }
                    });
                    tokio::spawn(async move {
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    });
                }
                () = &mut shutdown => break,
            }
        }
    });

    (addr, tx)
}

/// Starts a backend that rejects HEAD with 405 but answers GET with the
/// given status, recording the method of every request it sees.
pub async fn start_head_rejecting_backend(
    get_status: StatusCode,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let log_handle = Arc::clone(&log);

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind test backend");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut shutdown = std::pin::pin!(async {
            let _ = rx.await;
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, _) = result.expect("accept failed");
                    let log = Arc::clone(&log_handle);
                    let service = service_fn(move |req: Request<Incoming>| {
                        let log = Arc::clone(&log);
                        async move {
                            log.lock().unwrap().push(req.method().to_string());
                            let status = if req.method() == Method::HEAD {
                                StatusCode::METHOD_NOT_ALLOWED
                            } else {
                                get_status
                            };
                            Ok::<_, std::convert::Infallible>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from("ok")))
                                    .expect("test response must build"),
                            )
                        }
                    });
                    tokio::spawn(async move {
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    });
                }
                () = &mut shutdown => break,
            }
        }
    });

    (addr, log, tx)
}

/// Starts a backend that sleeps for the given duration before responding.
pub async fn start_slow_backend(delay: Duration) -> (SocketAddr, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind test backend");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut shutdown = std::pin::pin!(async {
            let _ = rx.await;
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, _) = result.expect("accept failed");
                    let service = service_fn(move |_req: Request<Incoming>| async move {
                        tokio::time::sleep(delay).await;
                        Ok::<_, std::convert::Infallible>(
                            Response::builder()
                                .status(StatusCode::OK)
                                .header("content-type", "text/plain")
                                .body(Full::new(Bytes::from("slow")))
                                .expect("test response must build"),
                        )
                    });
                    tokio::spawn(async move {
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    });
                }
                () = &mut shutdown => break,
            }
        }
    });

    (addr, tx)
}
