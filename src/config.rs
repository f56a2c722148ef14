//! Configuration loading, validation, and resolved runtime state.
//!
//! The gateway reads its YAML configuration exactly once at startup.
//! Status-code policy, probe endpoints, and page texts are resolved at
//! load time into a [`RuntimeConfig`] shared across all request handlers,
//! so the hot path never re-parses URIs or consults defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper::{StatusCode, Uri};
use serde::{Deserialize, Serialize};

use crate::{GatewayError, Result};

/// Default socket address the gateway binds to.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8100";

/// Default total request timeout covering the entire origin round-trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum number of concurrent in-flight requests the gateway
/// will handle before returning 503 Service Unavailable.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 1000;

/// Default timeout for the origin reachability probe.
pub const DEFAULT_ORIGIN_PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Default timeout for the registry (secondary service) reachability probe.
pub const DEFAULT_REGISTRY_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default substring identifying the edge provider in the `server` header.
pub const DEFAULT_PROVIDER_SERVER: &str = "cloudflare";

/// Default provider trace header whose presence marks an edge-generated
/// response.
pub const DEFAULT_PROVIDER_TRACE_HEADER: &str = "cf-ray";

/// Default path of the persisted gateway state file.
pub const DEFAULT_STATE_PATH: &str = "./gateway-state.json";

/// Raw configuration as deserialized from the YAML file.
///
/// This struct maps directly to the on-disk schema. After loading, it is
/// transformed into a [`RuntimeConfig`] that holds validated URIs and the
/// fully resolved status-code policy.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Socket address the gateway listens on (default `"127.0.0.1:8100"`).
    #[serde(default)]
    pub listen: Option<String>,
    /// The origin server this gateway fronts (e.g. `"http://origin:3000"`).
    pub origin: String,
    /// Hostname serving the maintenance control page and admin API.
    pub admin_domain: String,
    /// Path of the JSON file holding maintenance/banner state
    /// (default `"./gateway-state.json"`).
    #[serde(default)]
    pub state_path: Option<String>,
    /// Whether the origin sits behind an access-control tunnel. Selects
    /// the status codes used for the origin-down and service-down pages.
    #[serde(default = "default_tunnel_mode")]
    pub tunnel_mode: bool,
    /// Reachability probe endpoints and timeouts.
    #[serde(default)]
    pub probes: ProbesConfig,
    /// Edge-provider fingerprint detection rule.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Per-variant HTTP status code overrides.
    #[serde(default)]
    pub status_codes: StatusCodesConfig,
    /// Per-variant display text for the rendered error pages.
    #[serde(default)]
    pub pages: PagesConfig,
    /// Total origin round-trip timeout in milliseconds (default: 30000).
    /// Requests exceeding this are classified as transport failures.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Maximum concurrent in-flight requests before returning 503
    /// Service Unavailable (default: 1000).
    #[serde(default)]
    pub max_concurrent_requests: Option<usize>,
}

fn default_tunnel_mode() -> bool {
    true
}

/// Health-check endpoints probed when the origin misbehaves.
///
/// Both endpoints are optional: an unconfigured endpoint makes the
/// corresponding probe report [`crate::ProbeResult::Unknown`] without
/// touching the network.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbesConfig {
    /// URL pinged to decide whether the origin host is reachable at all.
    #[serde(default)]
    pub origin_url: Option<String>,
    /// Origin probe timeout in milliseconds (default: 1500).
    #[serde(default)]
    pub origin_timeout_ms: Option<u64>,
    /// URL of the secondary service (e.g. the package registry) whose
    /// reachability distinguishes "whole host down" from "one dependency
    /// down".
    #[serde(default)]
    pub registry_url: Option<String>,
    /// Registry probe timeout in milliseconds (default: 10000).
    #[serde(default)]
    pub registry_timeout_ms: Option<u64>,
}

/// Detection rule for responses generated by the network edge provider
/// rather than the origin application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Substring matched (case-insensitively) against the `server` header.
    #[serde(default = "default_provider_server")]
    pub server_substring: String,
    /// Trace header whose non-empty presence confirms the fingerprint.
    #[serde(default = "default_provider_trace_header")]
    pub trace_header: String,
}

fn default_provider_server() -> String {
    DEFAULT_PROVIDER_SERVER.into()
}

fn default_provider_trace_header() -> String {
    DEFAULT_PROVIDER_TRACE_HEADER.into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            server_substring: default_provider_server(),
            trace_header: default_provider_trace_header(),
        }
    }
}

/// Optional per-variant status code overrides. Unset fields fall back to
/// the tunnel-mode-aware defaults resolved in [`Config::into_runtime`].
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusCodesConfig {
    #[serde(default)]
    pub maintenance: Option<u16>,
    #[serde(default)]
    pub origin_down: Option<u16>,
    #[serde(default)]
    pub service_down: Option<u16>,
    #[serde(default)]
    pub server_error: Option<u16>,
}

/// Display text for a single error-page variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageText {
    /// Short heading shown on the page.
    pub title: String,
    /// Longer explanation shown under the heading.
    pub message: String,
    /// Optional image or animation URL embedded in the page.
    #[serde(default)]
    pub media_url: String,
}

/// Per-variant display text with built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PagesConfig {
    #[serde(default = "default_maintenance_text")]
    pub maintenance: PageText,
    #[serde(default = "default_origin_down_text")]
    pub origin_down: PageText,
    #[serde(default = "default_service_down_text")]
    pub service_down: PageText,
    #[serde(default = "default_server_error_text")]
    pub server_error: PageText,
}

fn default_maintenance_text() -> PageText {
    PageText {
        title: "Scheduled maintenance".into(),
        message: "This service is briefly offline for planned work. \
                  Please check back in a few minutes."
            .into(),
        media_url: String::new(),
    }
}

fn default_origin_down_text() -> PageText {
    PageText {
        title: "Server unreachable".into(),
        message: "The machine hosting this service cannot be reached right now.".into(),
        media_url: String::new(),
    }
}

fn default_service_down_text() -> PageText {
    PageText {
        title: "Service dependency offline".into(),
        message: "A service this application depends on is not responding.".into(),
        media_url: String::new(),
    }
}

fn default_server_error_text() -> PageText {
    PageText {
        title: "Something went wrong".into(),
        message: "The application hit an unexpected error. Please try again later.".into(),
        media_url: String::new(),
    }
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            maintenance: default_maintenance_text(),
            origin_down: default_origin_down_text(),
            service_down: default_service_down_text(),
            server_error: default_server_error_text(),
        }
    }
}

/// Resolved probe endpoints with validated URIs.
#[derive(Debug, Clone)]
pub struct ProbeEndpoints {
    pub origin_url: Option<Uri>,
    pub origin_timeout: Duration,
    pub registry_url: Option<Uri>,
    pub registry_timeout: Duration,
}

/// Resolved edge-provider fingerprint rule. The server substring is
/// stored lowercased so matching never re-normalizes per request.
#[derive(Debug, Clone)]
pub struct ProviderFingerprint {
    pub server_substring: String,
    pub trace_header: String,
}

/// Fully resolved status codes for each error-page variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPolicy {
    pub maintenance: StatusCode,
    pub origin_down: StatusCode,
    pub service_down: StatusCode,
    pub server_error: StatusCode,
}

/// Fully validated, ready-to-use configuration.
///
/// Created once at startup and shared across all request handlers via
/// `Arc`. Contains every value the gateway needs at runtime without
/// touching the filesystem or re-parsing URIs on the hot path.
#[derive(Debug)]
pub struct RuntimeConfig {
    /// Socket address the gateway binds to.
    pub listen: SocketAddr,
    /// Validated origin URI all traffic is forwarded to.
    pub origin: Uri,
    /// Hostname serving the control page and admin API.
    pub admin_domain: String,
    /// Path of the persisted gateway state file.
    pub state_path: PathBuf,
    /// Whether the deployment runs behind an access-control tunnel.
    pub tunnel_mode: bool,
    /// Validated probe endpoints and their timeouts.
    pub probes: ProbeEndpoints,
    /// Edge-provider fingerprint rule.
    pub provider: ProviderFingerprint,
    /// Resolved per-variant status codes.
    pub statuses: StatusPolicy,
    /// Per-variant display text.
    pub pages: PagesConfig,
    /// Total origin round-trip timeout. Expiry is treated as a transport
    /// failure and goes through classification.
    pub request_timeout: Duration,
    /// Maximum concurrent in-flight requests. Overflow yields 503.
    pub max_concurrent_requests: usize,
}

/// Validates a URL string into a `hyper::Uri` with scheme and authority.
fn validate_url(field: &str, value: &str) -> Result<Uri> {
    if value.is_empty() {
        return Err(GatewayError::Config(format!("{field} must not be empty")));
    }

    let uri = value
        .parse::<Uri>()
        .map_err(|e| GatewayError::Config(format!("invalid {field} \"{value}\": {e}")))?;

    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(GatewayError::Config(format!(
            "{field} must be an absolute http(s) URL: {value}"
        )));
    }

    Ok(uri)
}

/// Resolves an optional status override, rejecting codes outside the
/// valid HTTP range.
fn resolve_status(field: &str, override_code: Option<u16>, default: StatusCode) -> Result<StatusCode> {
    match override_code {
        None => Ok(default),
        Some(code) => StatusCode::from_u16(code)
            .map_err(|_| GatewayError::Config(format!("invalid {field} status code: {code}"))),
    }
}

impl Config {
    /// Loads configuration from a YAML file at the given path.
    ///
    /// Returns a [`GatewayError::Config`] if the file cannot be opened or
    /// its contents fail YAML deserialization.
    pub fn load_from_file(file_path: &(impl AsRef<Path> + ?Sized)) -> Result<Self> {
        let file = std::fs::File::open(file_path).map_err(|e| {
            GatewayError::Config(format!(
                "failed to open {}: {e}",
                file_path.as_ref().display()
            ))
        })?;

        serde_yaml::from_reader(file)
            .map_err(|e| GatewayError::Config(format!("failed to parse config: {e}")))
    }

    /// Validates all fields and resolves defaults, producing a
    /// [`RuntimeConfig`] suitable for the request hot path.
    ///
    /// The origin-down and service-down status codes depend on
    /// `tunnel_mode`: behind a tunnel the edge rejecting the connection is
    /// a bad gateway (502) and a dead dependency a gateway timeout (504);
    /// fronting the origin directly, an unreachable host reads as 504 and
    /// a dead dependency as a plain 500.
    pub fn into_runtime(self) -> Result<RuntimeConfig> {
        let listen_str = self.listen.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR);
        let listen = listen_str.parse::<SocketAddr>().map_err(|e| {
            GatewayError::Config(format!("invalid listen address \"{listen_str}\": {e}"))
        })?;

        if self.origin.is_empty() {
            return Err(GatewayError::InvalidOrigin("origin must not be empty".into()));
        }
        let origin = self
            .origin
            .parse::<Uri>()
            .map_err(|e| GatewayError::InvalidOrigin(format!("{e}")))?;
        if origin.scheme().is_none() || origin.authority().is_none() {
            return Err(GatewayError::InvalidOrigin(format!(
                "origin must be an absolute http(s) URL: {}",
                self.origin
            )));
        }

        if self.admin_domain.is_empty() {
            return Err(GatewayError::Config("admin_domain must not be empty".into()));
        }

        let origin_probe_url = self
            .probes
            .origin_url
            .as_deref()
            .map(|url| validate_url("probes.origin_url", url))
            .transpose()?;
        let registry_probe_url = self
            .probes
            .registry_url
            .as_deref()
            .map(|url| validate_url("probes.registry_url", url))
            .transpose()?;

        let probes = ProbeEndpoints {
            origin_url: origin_probe_url,
            origin_timeout: self
                .probes
                .origin_timeout_ms
                .map_or(DEFAULT_ORIGIN_PROBE_TIMEOUT, Duration::from_millis),
            registry_url: registry_probe_url,
            registry_timeout: self
                .probes
                .registry_timeout_ms
                .map_or(DEFAULT_REGISTRY_PROBE_TIMEOUT, Duration::from_millis),
        };

        let (origin_down_default, service_down_default) = if self.tunnel_mode {
            (StatusCode::BAD_GATEWAY, StatusCode::GATEWAY_TIMEOUT)
        } else {
            (StatusCode::GATEWAY_TIMEOUT, StatusCode::INTERNAL_SERVER_ERROR)
        };

        let statuses = StatusPolicy {
            maintenance: resolve_status(
                "maintenance",
                self.status_codes.maintenance,
                StatusCode::SERVICE_UNAVAILABLE,
            )?,
            origin_down: resolve_status(
                "origin_down",
                self.status_codes.origin_down,
                origin_down_default,
            )?,
            service_down: resolve_status(
                "service_down",
                self.status_codes.service_down,
                service_down_default,
            )?,
            server_error: resolve_status(
                "server_error",
                self.status_codes.server_error,
                StatusCode::INTERNAL_SERVER_ERROR,
            )?,
        };

        let provider = ProviderFingerprint {
            server_substring: self.provider.server_substring.to_ascii_lowercase(),
            trace_header: self.provider.trace_header.to_ascii_lowercase(),
        };

        Ok(RuntimeConfig {
            listen,
            origin,
            admin_domain: self.admin_domain,
            state_path: PathBuf::from(self.state_path.as_deref().unwrap_or(DEFAULT_STATE_PATH)),
            tunnel_mode: self.tunnel_mode,
            probes,
            provider,
            statuses,
            pages: self.pages,
            request_timeout: self
                .request_timeout_ms
                .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_millis),
            max_concurrent_requests: self
                .max_concurrent_requests
                .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS),
        })
    }
}
