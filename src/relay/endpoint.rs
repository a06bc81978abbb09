//! Relay node HTTP endpoint
//!
//! Serves the node's stats and its published room listing. The load
//! balancer polls `/api/stats` and `/api/servers`; clients not using a load
//! balancer read the listing directly, usually the compressed form.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::{Error, Result};
use crate::http::response::{cors_headers, json_body, preflight};

use super::listing::RelayListing;

/// Shared state of the endpoint routes
#[derive(Debug, Clone)]
pub struct EndpointState {
    pub listing: Arc<RelayListing>,
    /// When false the listing routes answer 403
    pub server_list_enabled: bool,
}

/// Route table of the relay endpoint
pub fn router(state: EndpointState) -> Router {
    Router::new()
        .route("/api/stats", get(stats))
        .route("/api/servers", get(servers))
        .route("/api/servers/{app_id}", get(app_servers))
        .route(
            "/api/compressed/servers",
            get(compressed_servers).options(cors_preflight),
        )
        .route(
            "/api/compressed/servers/{app_id}",
            get(compressed_app_servers).options(cors_preflight),
        )
        .with_state(Arc::new(state))
}

async fn stats(State(state): State<Arc<EndpointState>>) -> impl IntoResponse {
    Json(state.listing.stats().await)
}

async fn servers(State(state): State<Arc<EndpointState>>) -> Result<Response> {
    state.ensure_listing_enabled()?;
    Ok(json_body(state.listing.listing(None).await.json))
}

async fn app_servers(
    State(state): State<Arc<EndpointState>>,
    Path(app_id): Path<String>,
) -> Result<Response> {
    state.ensure_listing_enabled()?;
    let app_id = parse_app_id(&app_id)?;
    Ok(json_body(state.listing.listing(Some(app_id)).await.json))
}

async fn compressed_servers(State(state): State<Arc<EndpointState>>) -> Result<Response> {
    state.ensure_listing_enabled()?;
    let body = state.listing.listing(None).await.compressed;
    Ok((cors_headers(), body).into_response())
}

async fn compressed_app_servers(
    State(state): State<Arc<EndpointState>>,
    Path(app_id): Path<String>,
) -> Result<Response> {
    state.ensure_listing_enabled()?;
    let app_id = parse_app_id(&app_id)?;
    let body = state.listing.listing(Some(app_id)).await.compressed;
    Ok((cors_headers(), body).into_response())
}

async fn cors_preflight(headers: HeaderMap) -> Response {
    preflight(&headers)
}

impl EndpointState {
    fn ensure_listing_enabled(&self) -> Result<()> {
        if self.server_list_enabled {
            Ok(())
        } else {
            Err(Error::Auth)
        }
    }
}

pub(crate) fn parse_app_id(raw: &str) -> Result<i32> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Validation(format!("invalid app id {:?}", raw)))
}
