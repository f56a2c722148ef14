//! The error-classification and response-selection decision engine.
//!
//! [`classify`] is called once per inbound request after the origin fetch
//! completed or failed. Given the buffered upstream response (if any), the
//! transport error (if any), and the resolved maintenance flag, it decides
//! which canned error experience to present, or whether to pass the real
//! response through untouched.
//!
//! The decision is a short ordered tree; the first matching branch wins:
//!
//! 1. maintenance flag set — maintenance page, no probe issued;
//! 2. transport failure — known tunnel access codes short-circuit to the
//!    origin-down page, otherwise the origin probe and then the registry
//!    probe narrow the failure down;
//! 3. upstream 5xx — origin probe first, then edge-provider fingerprinting
//!    decides between the dependency pages and the generic one;
//! 4. provider-fingerprinted 403 carrying a tunnel access code — the
//!    access layer rejected the connection, shown as origin-down;
//! 5. anything else passes through.
//!
//! Every invocation is stateless and pure given its inputs plus the
//! outcome of at most two sequential probes. The function never fails:
//! probes downgrade their own failures to `Unreachable`, body parsing is
//! best-effort, and an unrecognized error simply falls through the tree.

use std::borrow::Cow;

use bytes::Bytes;
use hyper::header::HeaderMap;
use hyper::StatusCode;
use tracing::debug;

use crate::config::{ProviderFingerprint, StatusPolicy};
use crate::probe::{extract_provider_code, is_provider_edge, Probe};

/// Codes the access-control tunnel reports when it rejected or could not
/// establish the connection to the origin.
const TUNNEL_ACCESS_CODES: [u16; 2] = [1033, 1101];

/// Provider code meaning the tunnel connector behind the edge is down.
const TUNNEL_CONNECTOR_DOWN: u16 = 1033;

/// Statuses the edge produces when it cannot complete the round trip to
/// the origin (bad gateway, origin refused or timed out, TLS failures).
const EDGE_FAILURE_STATUSES: [u16; 6] = [502, 521, 522, 524, 525, 526];

/// Status the edge produces when the origin's TLS handshake fails.
const ORIGIN_HANDSHAKE_FAILED: u16 = 523;

/// A buffered copy of the upstream response, safe for the classifier to
/// inspect without disturbing the body the shell may still pass through.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseSnapshot {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// The body as text, lossily decoded. Error-page bodies are ASCII in
    /// practice; anything else simply fails to match the code pattern.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    fn provider_code(&self) -> Option<u16> {
        extract_provider_code(&self.body_text())
    }
}

/// A transport-level fetch failure: DNS, connect, TLS, or a tunnel
/// rejection that surfaced as an error value carrying a numeric code.
#[derive(Debug, Clone)]
pub struct TransportError {
    /// Numeric code attached to the error, when the failing layer
    /// provides one.
    pub code: Option<u16>,
    /// Human-readable description, used for logging only.
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// The attached code, if it is one of the known tunnel access codes.
    fn tunnel_access_code(&self) -> Option<u16> {
        self.code.filter(|code| TUNNEL_ACCESS_CODES.contains(code))
    }
}

/// Everything the classifier needs for one invocation. Configuration is
/// resolved before classification begins and is never mutated here.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    /// The completed upstream response, buffered, if the fetch produced one.
    pub response: Option<&'a ResponseSnapshot>,
    /// The transport error, if the fetch failed outright.
    pub error: Option<&'a TransportError>,
    /// Resolved maintenance flag (global or host-listed).
    pub maintenance: bool,
    /// Per-variant status codes.
    pub policy: &'a StatusPolicy,
    /// Edge-provider fingerprint rule.
    pub fingerprint: &'a ProviderFingerprint,
}

/// Which canned error experience to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVariant {
    /// Planned downtime announced by the operator.
    Maintenance,
    /// The machine hosting the origin is unreachable (no IP, tunnel down,
    /// access layer rejecting connections).
    OriginDown,
    /// The origin host is up but a service it depends on is not.
    ServiceDown,
    /// A genuine application-level server error.
    ServerError,
}

/// The classifier's verdict for one request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Return the real upstream response unchanged.
    PassThrough,
    /// Replace the response with the given error page.
    Page {
        status: StatusCode,
        variant: PageVariant,
    },
}

impl Decision {
    fn page(status: StatusCode, variant: PageVariant) -> Self {
        Self::Page { status, variant }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough)
    }
}

/// Classifies one request cycle. See the module docs for the branch order.
///
/// Issues at most two probes, sequentially: the registry probe is only
/// worth paying for once the origin probe has already come back alive.
pub async fn classify<P: Probe>(ctx: ErrorContext<'_>, prober: &P) -> Decision {
    if ctx.maintenance {
        debug!("maintenance flag set, overriding response");
        return Decision::page(ctx.policy.maintenance, PageVariant::Maintenance);
    }

    if let (Some(error), None) = (ctx.error, ctx.response) {
        return classify_transport_failure(&ctx, error, prober).await;
    }

    if let Some(snapshot) = ctx.response {
        if snapshot.status.is_server_error() {
            return classify_upstream_5xx(&ctx, snapshot, prober).await;
        }

        // An edge-fingerprinted 403 whose body names a tunnel access code
        // is the access layer refusing the connection, not the origin
        // denying the user. Any other 403 belongs to the application.
        if snapshot.status == StatusCode::FORBIDDEN
            && is_provider_edge(&snapshot.headers, ctx.fingerprint)
        {
            if let Some(code) = snapshot.provider_code() {
                if TUNNEL_ACCESS_CODES.contains(&code) {
                    debug!(code, "access-control rejection surfaced as 403");
                    return Decision::page(StatusCode::BAD_GATEWAY, PageVariant::OriginDown);
                }
            }
        }
    }

    Decision::PassThrough
}

/// Branch 2: the origin fetch failed without producing a response.
async fn classify_transport_failure<P: Probe>(
    ctx: &ErrorContext<'_>,
    error: &TransportError,
    prober: &P,
) -> Decision {
    // Known tunnel access codes are unambiguous: the access layer itself
    // rejected the connection, so probing would add nothing.
    if let Some(code) = error.tunnel_access_code() {
        debug!(code, message = %error.message, "tunnel access code on transport failure");
        return Decision::page(StatusCode::BAD_GATEWAY, PageVariant::OriginDown);
    }

    debug!(message = %error.message, "transport failure, probing origin");

    if prober.origin().await.is_unreachable() {
        return Decision::page(ctx.policy.origin_down, PageVariant::OriginDown);
    }

    if prober.registry().await.is_unreachable() {
        return Decision::page(ctx.policy.service_down, PageVariant::ServiceDown);
    }

    Decision::page(ctx.policy.server_error, PageVariant::ServerError)
}

/// Branch 3: the origin fetch completed with a 5xx status.
async fn classify_upstream_5xx<P: Probe>(
    ctx: &ErrorContext<'_>,
    snapshot: &ResponseSnapshot,
    prober: &P,
) -> Decision {
    if prober.origin().await.is_unreachable() {
        debug!(status = snapshot.status.as_u16(), "origin probe dead behind 5xx");
        return Decision::page(ctx.policy.origin_down, PageVariant::OriginDown);
    }

    let status = snapshot.status.as_u16();

    if is_provider_edge(&snapshot.headers, ctx.fingerprint) {
        let code = snapshot.provider_code();
        if code == Some(TUNNEL_CONNECTOR_DOWN) || EDGE_FAILURE_STATUSES.contains(&status) {
            debug!(status, ?code, "edge could not reach the origin, probing registry");
            if prober.registry().await.is_unreachable() {
                return Decision::page(ctx.policy.service_down, PageVariant::ServiceDown);
            }
            return Decision::page(StatusCode::BAD_GATEWAY, PageVariant::OriginDown);
        }
    }

    if status == ORIGIN_HANDSHAKE_FAILED {
        return Decision::page(StatusCode::BAD_GATEWAY, PageVariant::OriginDown);
    }

    Decision::page(ctx.policy.server_error, PageVariant::ServerError)
}
