//! Reachability probing for the origin host and the secondary service.
//!
//! A probe answers "is this endpoint currently responding to a health
//! check?" without ever failing out: configuration absence reads as
//! [`ProbeResult::Unknown`], transport failures and timeouts as
//! [`ProbeResult::Unreachable`]. Each probe issues a lightweight HEAD
//! request first and falls back to a single GET when the target rejects
//! the method or the HEAD attempt dies at the transport level. The whole
//! probe, fallback included, is bounded by a caller-supplied timeout that
//! cancels the in-flight request on expiry.
//!
//! Probes carry no state and cache nothing; every invocation reflects the
//! endpoint as it is right now.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::header::HeaderMap;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use regex::Regex;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{ProbeEndpoints, ProviderFingerprint};
use crate::tls;

/// The HTTP client type used for reachability probes. Probes never send a
/// body, so the client is specialized to [`Empty`].
pub type ProbeClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Empty<Bytes>>;

/// Matches the short numeric code the edge provider embeds in its error
/// page bodies, e.g. `Error 1033`.
static PROVIDER_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Error\s+(\d{3,4})").expect("provider code pattern must compile")
});

/// Outcome of a single reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint answered with a status below 500.
    Reachable,
    /// The endpoint did not answer usefully: transport failure, timeout,
    /// a 5xx, or an edge-generated 52x response.
    Unreachable,
    /// No endpoint is configured; reachability cannot be judged.
    Unknown,
}

impl ProbeResult {
    /// Returns `true` only for a definite [`ProbeResult::Unreachable`].
    /// `Unknown` deliberately reads as "not known to be down".
    pub fn is_unreachable(self) -> bool {
        matches!(self, Self::Unreachable)
    }
}

/// The probing seam consumed by the classifier.
///
/// The production implementation is [`HttpProber`]; tests substitute
/// deterministic outcomes to exercise the decision table without touching
/// the network.
pub trait Probe {
    /// Probes the origin ping endpoint.
    fn origin(&self) -> impl Future<Output = ProbeResult> + Send;
    /// Probes the secondary-service health endpoint.
    fn registry(&self) -> impl Future<Output = ProbeResult> + Send;
}

/// Probes the configured endpoints over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: ProbeClient,
    endpoints: ProbeEndpoints,
    fingerprint: ProviderFingerprint,
}

impl HttpProber {
    /// Creates a prober for the given endpoints using a fresh HTTPS-capable
    /// client.
    pub fn new(endpoints: ProbeEndpoints, fingerprint: ProviderFingerprint) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(tls::build_https_connector());
        Self {
            client,
            endpoints,
            fingerprint,
        }
    }

    /// Probes a single endpoint, bounding the whole attempt (including the
    /// HEAD to GET fallback) by `limit`.
    pub async fn probe(&self, target: Option<&Uri>, limit: Duration) -> ProbeResult {
        let Some(uri) = target else {
            return ProbeResult::Unknown;
        };

        match timeout(limit, self.attempt(uri)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                debug!(endpoint = %uri, timeout = ?limit, "probe timed out");
                ProbeResult::Unreachable
            }
        }
    }

    /// Issues the HEAD request with its single GET fallback and classifies
    /// whatever response comes back. Never returns an error.
    async fn attempt(&self, uri: &Uri) -> ProbeResult {
        let response = match self.request(Method::HEAD, uri).await {
            Ok(resp) if resp.status() == StatusCode::METHOD_NOT_ALLOWED => {
                debug!(endpoint = %uri, "HEAD rejected with 405, retrying with GET");
                match self.request(Method::GET, uri).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        debug!(endpoint = %uri, error = %e, "GET fallback failed");
                        return ProbeResult::Unreachable;
                    }
                }
            }
            Ok(resp) => resp,
            Err(e) => {
                debug!(endpoint = %uri, error = %e, "HEAD failed, retrying with GET");
                match self.request(Method::GET, uri).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        debug!(endpoint = %uri, error = %e, "GET fallback failed");
                        return ProbeResult::Unreachable;
                    }
                }
            }
        };

        let status = response.status();
        let result = classify_probe_response(status, response.headers(), &self.fingerprint);
        debug!(endpoint = %uri, status = status.as_u16(), ?result, "probe completed");
        result
    }

    async fn request(
        &self,
        method: Method,
        uri: &Uri,
    ) -> std::result::Result<Response<hyper::body::Incoming>, hyper_util::client::legacy::Error>
    {
        let req = Request::builder()
            .method(method)
            .uri(uri.clone())
            .body(Empty::<Bytes>::new())
            .expect("probe request from a validated URI must build");
        self.client.request(req).await
    }
}

impl Probe for HttpProber {
    async fn origin(&self) -> ProbeResult {
        self.probe(
            self.endpoints.origin_url.as_ref(),
            self.endpoints.origin_timeout,
        )
        .await
    }

    async fn registry(&self) -> ProbeResult {
        self.probe(
            self.endpoints.registry_url.as_ref(),
            self.endpoints.registry_timeout,
        )
        .await
    }
}

/// Classifies a probe response.
///
/// A status below 500 means the endpoint is alive. A 520-529 response
/// carrying the provider fingerprint is the edge saying it could not
/// reach anything behind it, so it counts as unreachable even though the
/// edge itself answered; any other 5xx likewise reads as down.
fn classify_probe_response(
    status: StatusCode,
    headers: &HeaderMap,
    fingerprint: &ProviderFingerprint,
) -> ProbeResult {
    let code = status.as_u16();
    if (520..=529).contains(&code) && is_provider_edge(headers, fingerprint) {
        return ProbeResult::Unreachable;
    }
    if code < 500 {
        ProbeResult::Reachable
    } else {
        ProbeResult::Unreachable
    }
}

/// Returns `true` iff the response headers carry the edge provider's
/// fingerprint: a `server` header naming the provider and a non-empty
/// trace header.
pub fn is_provider_edge(headers: &HeaderMap, fingerprint: &ProviderFingerprint) -> bool {
    let server = headers
        .get(hyper::header::SERVER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let trace = headers
        .get(fingerprint.trace_header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    server
        .to_ascii_lowercase()
        .contains(&fingerprint.server_substring)
        && !trace.is_empty()
}

/// Best-effort extraction of the short numeric code the provider embeds
/// in its error page body (`Error 1033` and the like). Works on an
/// already-buffered copy of the body, so the caller's response stays
/// intact. Returns `None` when no code is present.
pub fn extract_provider_code(body: &str) -> Option<u16> {
    PROVIDER_CODE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderName, HeaderValue};

    fn fingerprint() -> ProviderFingerprint {
        ProviderFingerprint {
            server_substring: "cloudflare".into(),
            trace_header: "cf-ray".into(),
        }
    }

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        pairs
            .iter()
            .fold(HeaderMap::new(), |mut map, (name, value)| {
                map.insert(
                    HeaderName::from_bytes(name.as_bytes()).unwrap(),
                    HeaderValue::from_str(value).unwrap(),
                );
                map
            })
    }

    #[test]
    fn fingerprint_requires_both_headers() {
        let fp = fingerprint();

        let both = header_map(&[("server", "cloudflare"), ("cf-ray", "8f2b-CDG")]);
        assert!(is_provider_edge(&both, &fp));

        let server_only = header_map(&[("server", "cloudflare")]);
        assert!(!is_provider_edge(&server_only, &fp));

        let trace_only = header_map(&[("cf-ray", "8f2b-CDG")]);
        assert!(!is_provider_edge(&trace_only, &fp));

        let empty_trace = header_map(&[("server", "cloudflare"), ("cf-ray", "")]);
        assert!(!is_provider_edge(&empty_trace, &fp));
    }

    #[test]
    fn fingerprint_matches_server_substring_case_insensitively() {
        let fp = fingerprint();
        let headers = header_map(&[("server", "CloudFlare-nginx"), ("cf-ray", "abc123")]);
        assert!(is_provider_edge(&headers, &fp));
    }

    #[test]
    fn foreign_server_header_does_not_match() {
        let fp = fingerprint();
        let headers = header_map(&[("server", "nginx/1.25"), ("cf-ray", "abc123")]);
        assert!(!is_provider_edge(&headers, &fp));
    }

    #[test]
    fn extracts_code_from_error_page_body() {
        assert_eq!(
            extract_provider_code("<html>Error 1033: tunnel down</html>"),
            Some(1033)
        );
        assert_eq!(extract_provider_code("error   521"), Some(521));
    }

    #[test]
    fn extraction_tolerates_missing_or_malformed_codes() {
        assert_eq!(extract_provider_code(""), None);
        assert_eq!(extract_provider_code("all fine here"), None);
        assert_eq!(extract_provider_code("Error twelve"), None);
        // Two digits is not a provider code.
        assert_eq!(extract_provider_code("Error 42"), None);
    }

    #[test]
    fn extraction_takes_the_first_match() {
        assert_eq!(
            extract_provider_code("Error 1033 then later Error 1101"),
            Some(1033)
        );
    }

    #[test]
    fn sub_500_statuses_are_reachable() {
        let fp = fingerprint();
        for code in [200u16, 204, 301, 404, 405, 403, 499] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                classify_probe_response(status, &HeaderMap::new(), &fp),
                ProbeResult::Reachable,
                "status {code} should be reachable"
            );
        }
    }

    #[test]
    fn plain_5xx_is_unreachable() {
        let fp = fingerprint();
        for code in [500u16, 502, 503, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                classify_probe_response(status, &HeaderMap::new(), &fp),
                ProbeResult::Unreachable
            );
        }
    }

    #[test]
    fn fingerprinted_52x_is_unreachable() {
        let fp = fingerprint();
        let headers = header_map(&[("server", "cloudflare"), ("cf-ray", "8f2b-CDG")]);
        for code in [520u16, 521, 522, 523, 524, 525, 526, 529] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                classify_probe_response(status, &headers, &fp),
                ProbeResult::Unreachable
            );
        }
    }

    #[test]
    fn unknown_only_for_unconfigured_endpoint() {
        assert!(!ProbeResult::Unknown.is_unreachable());
        assert!(!ProbeResult::Reachable.is_unreachable());
        assert!(ProbeResult::Unreachable.is_unreachable());
    }
}
