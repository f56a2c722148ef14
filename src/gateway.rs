//! The routing shell: request forwarding and response interception.
//!
//! Every inbound request flows through [`handle_request`]: admin-domain
//! traffic short-circuits to the control page or admin API, everything
//! else is forwarded to the single configured origin. Once the origin
//! fetch completes (or fails), the classifier decides whether the real
//! response passes through, gets the announcement banner injected, or is
//! replaced by a canned error page.
//!
//! Every inbound request is assigned a monotonically increasing request
//! ID and wrapped in a [`tracing::Span`] carrying structured fields for
//! observability.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::header::HeaderMap;
use hyper::http::response::Parts;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};

use crate::admin::{self, ADMIN_API_PREFIX};
use crate::classify::{classify, Decision, ErrorContext, ResponseSnapshot, TransportError};
use crate::config::RuntimeConfig;
use crate::error::full_body;
use crate::pages::{self, render_error_page};
use crate::probe::Probe;
use crate::state::{GatewayState, StateStore};
use crate::{headers, tls, GatewayError, Result};

/// An alias to simplify the calls to `Box<dyn std::error::Error + Send + Sync>`.
pub type StdError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased body used for both request forwarding and response
/// streaming.
///
/// Wraps any body implementation behind a single boxed trait object,
/// allowing the handler to accept requests with arbitrary body types
/// (e.g. `Incoming`, `Full<Bytes>`, `Empty<Bytes>`) and return a uniform
/// response type regardless of origin.
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, StdError>;

/// The HTTP client type for origin connections. The HTTPS connector
/// passes plain `http://` origins through unmodified.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, BoxBody>;

/// Global monotonic counter for assigning unique request IDs.
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Constructs the [`HttpClient`] used for origin fetches.
pub fn build_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build(tls::build_https_connector())
}

/// Processes a single inbound request through the gateway pipeline.
///
/// The pipeline performs the following steps in order:
///
/// 1. **State snapshot** — Maintenance and banner state is read once; the
///    rest of the request sees a consistent view.
/// 2. **Admin routing** — On the admin domain, `GET /` serves the control
///    page and `/gateway/api/*` routes to the admin API. The API prefix
///    on any other host is rejected with 403.
/// 3. **Forwarding** — Hop-by-hop headers are stripped, `X-Forwarded-*`
///    headers injected, the `Host` header and URI rewritten to the
///    origin, and the body streamed through, bounded by the request
///    timeout.
/// 4. **Classification** — The classifier sees every outcome: transport
///    failures, 5xx and 403 responses (with their bodies buffered for
///    inspection), and clean responses (maintenance can override those
///    too). A `Page` decision renders the corresponding error page with
///    the `x-edge-handled` marker.
/// 5. **Banner injection** — Pass-through HTML responses for
///    banner-listed subdomains get the announcement banner inserted after
///    the opening `<body>` tag.
pub async fn handle_request<B, P>(
    req: Request<B>,
    client: HttpClient,
    config: Arc<RuntimeConfig>,
    store: Arc<StateStore>,
    prober: &P,
    client_addr: SocketAddr,
) -> Result<Response<BoxBody>>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<StdError>,
    P: Probe,
{
    let request_id = REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    let method = req.method().clone();
    let uri = req.uri().clone();

    let span = tracing::info_span!(
        "request",
        id = request_id,
        method = %method,
        uri = %uri,
        client = %client_addr,
    );

    async move {
        let state = store.snapshot().await;
        let host = request_host(&req);

        if uri.path().starts_with(ADMIN_API_PREFIX) {
            if host != config.admin_domain {
                warn!(%host, "admin API prefix on non-admin host");
                return Err(GatewayError::Forbidden(format!(
                    "admin API is only served on {}",
                    config.admin_domain
                )));
            }
            return admin::handle(req, &store).await;
        }

        if host == config.admin_domain && method == Method::GET && uri.path() == "/" {
            return Ok(pages::render_control_page(&state));
        }

        let maintenance = state.is_maintenance(&host);

        let origin_authority = config
            .origin
            .authority()
            .ok_or_else(|| GatewayError::InvalidOrigin("origin has no authority".into()))?
            .clone();
        let rewritten_uri = rewrite_uri(&uri, &config.origin)?;

        let (mut parts, body) = req.into_parts();
        headers::strip_hop_by_hop(&mut parts.headers);
        headers::inject_forwarding_headers(&mut parts.headers, client_addr);
        headers::rewrite_host(&mut parts.headers, &origin_authority);
        parts.uri = rewritten_uri;

        debug!(origin_uri = %parts.uri, "forwarding request");

        let start = std::time::Instant::now();
        let boxed_body = body.map_err(|e| e.into()).boxed();
        let proxy_req = Request::from_parts(parts, boxed_body);

        let upstream_result = timeout(config.request_timeout, client.request(proxy_req)).await;

        let response = match upstream_result {
            Ok(Ok(resp)) => {
                info!(
                    status = resp.status().as_u16(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    "origin responded"
                );
                resp
            }
            Ok(Err(e)) => {
                warn!(
                    error = %e,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "origin request failed"
                );
                let transport = TransportError::new(e.to_string());
                let ctx = ErrorContext {
                    response: None,
                    error: Some(&transport),
                    maintenance,
                    policy: &config.statuses,
                    fingerprint: &config.provider,
                };
                return match classify(ctx, prober).await {
                    Decision::Page { status, variant } => {
                        Ok(render_error_page(&config.pages, status, variant))
                    }
                    Decision::PassThrough => Err(GatewayError::Upstream(e)),
                };
            }
            Err(_elapsed) => {
                warn!(
                    timeout = ?config.request_timeout,
                    "origin request timed out"
                );
                let transport = TransportError::new(format!(
                    "origin timed out after {:?}",
                    config.request_timeout
                ));
                let ctx = ErrorContext {
                    response: None,
                    error: Some(&transport),
                    maintenance,
                    policy: &config.statuses,
                    fingerprint: &config.provider,
                };
                return match classify(ctx, prober).await {
                    Decision::Page { status, variant } => {
                        Ok(render_error_page(&config.pages, status, variant))
                    }
                    Decision::PassThrough => Err(GatewayError::Timeout(config.request_timeout)),
                };
            }
        };

        let status = response.status();

        // 5xx and 403 responses may be replaced by an error page, so their
        // bodies are buffered for the classifier to inspect. The buffered
        // copy is what passes through if classification declines.
        if status.is_server_error() || status == StatusCode::FORBIDDEN {
            let (resp_parts, body) = response.into_parts();
            let body_bytes = body
                .collect()
                .await
                .map_err(|e| GatewayError::Internal(format!("failed to read origin body: {e}")))?
                .to_bytes();

            let snapshot =
                ResponseSnapshot::new(status, resp_parts.headers.clone(), body_bytes.clone());
            let ctx = ErrorContext {
                response: Some(&snapshot),
                error: None,
                maintenance,
                policy: &config.statuses,
                fingerprint: &config.provider,
            };
            if let Decision::Page { status, variant } = classify(ctx, prober).await {
                return Ok(render_error_page(&config.pages, status, variant));
            }
            return Ok(pass_through_buffered(resp_parts, body_bytes, &state, &host));
        }

        let snapshot = ResponseSnapshot::new(status, response.headers().clone(), Bytes::new());
        let ctx = ErrorContext {
            response: Some(&snapshot),
            error: None,
            maintenance,
            policy: &config.statuses,
            fingerprint: &config.provider,
        };
        if let Decision::Page { status, variant } = classify(ctx, prober).await {
            return Ok(render_error_page(&config.pages, status, variant));
        }

        if state.banner_for(&host).is_some() && is_html(response.headers()) {
            let (resp_parts, body) = response.into_parts();
            let body_bytes = body
                .collect()
                .await
                .map_err(|e| GatewayError::Internal(format!("failed to read origin body: {e}")))?
                .to_bytes();
            return Ok(pass_through_buffered(resp_parts, body_bytes, &state, &host));
        }

        let (resp_parts, body) = response.into_parts();
        Ok(Response::from_parts(
            resp_parts,
            body.map_err(|e| -> StdError { Box::new(e) }).boxed(),
        ))
    }
    .instrument(span)
    .await
}

/// Resolves the request host: the `Host` header when present, the URI
/// authority otherwise, with any port stripped.
fn request_host<B>(req: &Request<B>) -> String {
    let raw = req
        .headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| req.uri().host().map(str::to_owned))
        .unwrap_or_default();

    raw.split(':').next().unwrap_or(&raw).to_owned()
}

/// Rewrites the original request URI to target the configured origin,
/// preserving the path and query string.
fn rewrite_uri(original: &Uri, origin: &Uri) -> Result<Uri> {
    let authority = origin
        .authority()
        .ok_or_else(|| GatewayError::InvalidOrigin("origin has no authority".into()))?;

    let scheme = origin
        .scheme()
        .ok_or_else(|| GatewayError::InvalidOrigin("origin has no scheme".into()))?;

    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Uri::builder()
        .scheme(scheme.clone())
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| GatewayError::Internal(format!("failed to build origin URI: {e}")))
}

/// Returns a buffered response to the client, injecting the banner when
/// the host is banner-listed and the payload is HTML.
fn pass_through_buffered(
    mut parts: Parts,
    body: Bytes,
    state: &GatewayState,
    host: &str,
) -> Response<BoxBody> {
    if let Some(message) = state.banner_for(host) {
        if is_html(&parts.headers) {
            let injected = pages::inject_banner(&String::from_utf8_lossy(&body), message);
            // The banner changed the payload length; let hyper recompute it.
            parts.headers.remove(hyper::header::CONTENT_LENGTH);
            return Response::from_parts(parts, full_body(injected));
        }
    }

    Response::from_parts(parts, full_body(body))
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .is_some_and(|ct| ct.contains("text/html"))
}
