//!
//! An edge HTTP gateway serving maintenance and error pages in front of
//! a tunneled origin, built on [Hyper].
//!
//! The gateway forwards all traffic to a single origin. When the origin
//! misbehaves — a transport failure, a 5xx, or an edge-provider error
//! surfaced as a fingerprinted 403 — a deterministic classifier backed by
//! best-effort reachability probes picks the error page to show instead.
//! Operators toggle maintenance mode and an announcement banner through a
//! small admin API persisted to a JSON state file.
//!
//! [Hyper]: https://hyper.rs/

pub mod admin;
pub mod classify;
pub mod config;
pub mod error;
pub mod gateway;
pub mod headers;
pub mod pages;
pub mod probe;
pub mod server;
pub mod state;
pub mod tls;

pub use classify::{
    classify, Decision, ErrorContext, PageVariant, ResponseSnapshot, TransportError,
};
pub use config::{
    Config, PageText, PagesConfig, ProbeEndpoints, ProbesConfig, ProviderConfig,
    ProviderFingerprint, RuntimeConfig, StatusCodesConfig, StatusPolicy,
};
pub use error::GatewayError;
pub use gateway::{build_client, handle_request, BoxBody, HttpClient};
pub use probe::{extract_provider_code, is_provider_edge, HttpProber, Probe, ProbeResult};
pub use server::{serve, shutdown_signal, ServerState};
pub use state::{GatewayState, StateStore};

/// Crate-wide result type carrying a [`GatewayError`].
pub type Result<T> = std::result::Result<T, GatewayError>;
