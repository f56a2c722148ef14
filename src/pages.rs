//! HTML rendering: canned error pages, the admin control page, and
//! banner injection into pass-through responses.
//!
//! Error pages come from a single embedded template with placeholder
//! substitution; the status code, heading, message, and optional media
//! URL vary per [`PageVariant`]. Every synthesized page carries the
//! `x-edge-handled` marker so downstream layers can distinguish it from
//! a genuine origin response.

use std::sync::LazyLock;

use hyper::{Response, StatusCode};
use regex::Regex;

use crate::classify::PageVariant;
use crate::config::{PageText, PagesConfig};
use crate::error::full_body;
use crate::headers::mark_edge_handled;
use crate::state::GatewayState;
use crate::BoxBody;

/// Matches the opening `<body>` tag, attributes included.
static BODY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<body[^>]*>").expect("body tag pattern must compile"));

const ERROR_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>ERROR_CODE ERROR_TITLE</title>
  <style>
    body { font-family: system-ui, sans-serif; background: #f5f5f5; color: #222;
           display: flex; align-items: center; justify-content: center;
           min-height: 100vh; margin: 0; text-align: center; }
    .card { max-width: 32rem; padding: 2rem; }
    .code { font-size: 4rem; font-weight: 700; color: #888; margin: 0; }
    h1 { font-size: 1.5rem; margin: 0.5rem 0; }
    p { color: #555; }
    img { max-width: 16rem; margin-top: 1rem; }
  </style>
</head>
<body>
  <div class="card">
    <p class="code">ERROR_CODE</p>
    <h1>ERROR_TITLE</h1>
    <p>ERROR_MESSAGE</p>
    ERROR_MEDIA
  </div>
</body>
</html>
"#;

/// Selects the display text for a variant.
fn variant_text<'a>(pages: &'a PagesConfig, variant: PageVariant) -> &'a PageText {
    match variant {
        PageVariant::Maintenance => &pages.maintenance,
        PageVariant::OriginDown => &pages.origin_down,
        PageVariant::ServiceDown => &pages.service_down,
        PageVariant::ServerError => &pages.server_error,
    }
}

/// Renders the error page HTML for the given status and variant.
pub fn render_error_html(pages: &PagesConfig, status: StatusCode, variant: PageVariant) -> String {
    let text = variant_text(pages, variant);
    let media = if text.media_url.is_empty() {
        String::new()
    } else {
        format!(r#"<img src="{}" alt="">"#, text.media_url)
    };

    ERROR_TEMPLATE
        .replace("ERROR_CODE", status.as_str())
        .replace("ERROR_TITLE", &text.title)
        .replace("ERROR_MESSAGE", &text.message)
        .replace("ERROR_MEDIA", &media)
}

/// Builds the complete error-page response: rendered HTML body,
/// `text/html` content type, and the handled marker.
pub fn render_error_page(
    pages: &PagesConfig,
    status: StatusCode,
    variant: PageVariant,
) -> Response<BoxBody> {
    let html = render_error_html(pages, status, variant);

    let mut response = Response::builder()
        .status(status)
        .header("content-type", "text/html; charset=utf-8")
        .body(full_body(html))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(full_body(""))
                .expect("building fallback response must not fail")
        });
    mark_edge_handled(response.headers_mut());
    response
}

/// Injects the announcement banner immediately after the opening
/// `<body>` tag. Documents without a `<body>` tag are returned unchanged.
pub fn inject_banner(html: &str, message: &str) -> String {
    BODY_TAG
        .replace(html, |caps: &regex::Captures<'_>| {
            format!(
                "{}<div style=\"background:#ffc; color:#222; padding:12px; \
                 text-align:center; border-bottom:1px solid #eee; \
                 font-weight:bold;\">{message}</div>",
                &caps[0]
            )
        })
        .into_owned()
}

/// Renders the admin control page showing the current maintenance and
/// banner state, with plain-fetch controls against the admin API.
pub fn render_control_page(state: &GatewayState) -> Response<BoxBody> {
    let maintenance_items = render_list(&state.maintenance_subdomains);
    let banner_items = render_list(&state.banner_subdomains);
    let global_label = if state.global_maintenance { "ON" } else { "OFF" };
    let banner_message = state.banner_message.as_deref().unwrap_or("");

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Gateway control</title>
  <style>
    body {{ font-family: system-ui, sans-serif; max-width: 40rem; margin: 2rem auto; }}
    section {{ margin-bottom: 2rem; }}
    ul {{ padding-left: 1.2rem; }}
  </style>
  <script>
    async function api(path, payload) {{
      await fetch('/gateway/api/' + path, {{
        method: 'POST',
        headers: {{ 'content-type': 'application/json' }},
        body: payload ? JSON.stringify(payload) : null
      }});
      location.reload();
    }}
    function addSubdomain(path, inputId) {{
      const value = document.getElementById(inputId).value.trim();
      if (value) api(path, {{ subdomain: value }});
    }}
    function setMessage() {{
      api('banner/message', {{ message: document.getElementById('banner-msg').value }});
    }}
  </script>
</head>
<body>
  <h1>Gateway control</h1>
  <section>
    <h2>Maintenance</h2>
    <p>Global maintenance: <strong>{global_label}</strong>
      <button onclick="api('maintenance/global/toggle')">Toggle</button></p>
    <ul>{maintenance_items}</ul>
    <input id="maintenance-host" placeholder="host.example.com">
    <button onclick="addSubdomain('maintenance/subdomains/add', 'maintenance-host')">Add host</button>
  </section>
  <section>
    <h2>Banner</h2>
    <p>Message: <em>{banner_message}</em></p>
    <input id="banner-msg" placeholder="Announcement text">
    <button onclick="setMessage()">Set message</button>
    <ul>{banner_items}</ul>
    <input id="banner-label" placeholder="subdomain label">
    <button onclick="addSubdomain('banner/subdomains/add', 'banner-label')">Add label</button>
  </section>
</body>
</html>
"#
    );

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/html; charset=utf-8")
        .body(full_body(html))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(full_body(""))
                .expect("building fallback response must not fail")
        });
    mark_edge_handled(response.headers_mut());
    response
}

fn render_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("<li>{item}</li>"))
        .collect()
}
