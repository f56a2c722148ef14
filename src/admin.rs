//! Admin API: JSON-over-POST mutation of maintenance and banner state.
//!
//! Served only under [`ADMIN_API_PREFIX`] on the configured admin
//! hostname; the gateway rejects the prefix on any other host before this
//! module sees the request. Unknown routes fall back to 403, matching the
//! control surface's closed-by-default posture.

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use tracing::info;

use crate::error::full_body;
use crate::state::StateStore;
use crate::{GatewayError, Result};

use crate::gateway::{BoxBody, StdError};

/// Path prefix namespacing the admin API away from application routes.
pub const ADMIN_API_PREFIX: &str = "/gateway/api/";

#[derive(Debug, Deserialize)]
struct SubdomainPayload {
    subdomain: String,
}

#[derive(Debug, Deserialize)]
struct SubdomainsPayload {
    subdomains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    message: String,
}

/// Dispatches one admin API request.
pub async fn handle<B>(req: Request<B>, store: &StateStore) -> Result<Response<BoxBody>>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<StdError>,
{
    if req.method() != Method::POST {
        return Err(GatewayError::Forbidden(
            "admin API only accepts POST".into(),
        ));
    }

    let path = req.uri().path().to_owned();
    let route = path
        .strip_prefix(ADMIN_API_PREFIX)
        .ok_or_else(|| GatewayError::Forbidden("not an admin route".into()))?
        .to_owned();

    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| {
            let e: StdError = e.into();
            GatewayError::BadRequest(format!("failed to read body: {e}"))
        })?
        .to_bytes();

    match route.as_str() {
        "maintenance/global/toggle" => {
            let state = store
                .update(|s| s.global_maintenance = !s.global_maintenance)
                .await?;
            info!(enabled = state.global_maintenance, "global maintenance toggled");
            json_ok(serde_json::json!({ "global_maintenance": state.global_maintenance }))
        }
        "maintenance/subdomains/add" => {
            let payload: SubdomainPayload = parse(&body)?;
            let state = store
                .update(|s| {
                    if !s.maintenance_subdomains.contains(&payload.subdomain) {
                        s.maintenance_subdomains.push(payload.subdomain.clone());
                    }
                })
                .await?;
            info!(subdomain = %payload.subdomain, "maintenance host added");
            json_ok(serde_json::json!({ "maintenance_subdomains": state.maintenance_subdomains }))
        }
        "maintenance/subdomains/remove" => {
            let payload: SubdomainPayload = parse(&body)?;
            let state = store
                .update(|s| s.maintenance_subdomains.retain(|d| d != &payload.subdomain))
                .await?;
            info!(subdomain = %payload.subdomain, "maintenance host removed");
            json_ok(serde_json::json!({ "maintenance_subdomains": state.maintenance_subdomains }))
        }
        "banner/subdomains" => {
            let payload: SubdomainsPayload = parse(&body)?;
            let state = store
                .update(|s| s.banner_subdomains = payload.subdomains)
                .await?;
            json_ok(serde_json::json!({ "banner_subdomains": state.banner_subdomains }))
        }
        "banner/subdomains/add" => {
            let payload: SubdomainPayload = parse(&body)?;
            let state = store
                .update(|s| {
                    if !s.banner_subdomains.contains(&payload.subdomain) {
                        s.banner_subdomains.push(payload.subdomain.clone());
                    }
                })
                .await?;
            json_ok(serde_json::json!({ "banner_subdomains": state.banner_subdomains }))
        }
        "banner/subdomains/remove" => {
            let payload: SubdomainPayload = parse(&body)?;
            let state = store
                .update(|s| s.banner_subdomains.retain(|d| d != &payload.subdomain))
                .await?;
            json_ok(serde_json::json!({ "banner_subdomains": state.banner_subdomains }))
        }
        "banner/message" => {
            let payload: MessagePayload = parse(&body)?;
            let state = store
                .update(|s| s.banner_message = Some(payload.message))
                .await?;
            json_ok(serde_json::json!({ "banner_message": state.banner_message }))
        }
        _ => Err(GatewayError::Forbidden(format!(
            "unknown admin route: {route}"
        ))),
    }
}

fn parse<'a, T: Deserialize<'a>>(body: &'a Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| GatewayError::BadRequest(format!("invalid payload: {e}")))
}

fn json_ok(value: serde_json::Value) -> Result<Response<BoxBody>> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(full_body(value.to_string()))?)
}
