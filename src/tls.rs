//! Outbound TLS for origin fetches and reachability probes.
//!
//! The gateway itself listens on plain HTTP (the provider edge in front
//! of it terminates TLS), but the origin and the probe endpoints are
//! routinely `https://` URLs, so every outbound client is built over an
//! HTTPS-capable connector.

use hyper_rustls::HttpsConnectorBuilder;

/// Builds an HTTPS connector for outbound connections.
///
/// Uses the Mozilla root certificate store via [`webpki_roots`] for
/// server verification. The resulting connector supports both `http://`
/// and `https://` schemes; plain HTTP connections pass through
/// unmodified.
pub fn build_https_connector()
-> hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .build()
}
