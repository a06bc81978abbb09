//! Load balancer HTTP surface
//!
//! Relay nodes register through `/api/auth` and report room changes through
//! `/api/roomsupdated`. Game clients ask `/api/join` for a node and
//! `/api/masterlist` for the rooms of the whole cluster.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::{Error, Result};
use crate::http::response::{cors_headers, json_body, preflight};
use crate::relay::endpoint::parse_app_id;
use crate::types::{LoadBalancerStats, RelayAddress, Region};

use super::cache::ServerListCache;
use super::client::NodeClient;
use super::registry::NodeRegistry;
use super::selection::select_node;

/// Everything the route handlers share
pub struct BalancerState<C: NodeClient> {
    pub registry: Arc<NodeRegistry>,
    pub cache: Arc<ServerListCache<C>>,
    pub client: Arc<C>,
    pub auth_key: String,
    pub probe_timeout: Duration,
    pub room_id_length: usize,
    pub started_at: Instant,
}

/// Route table of the load balancer
pub fn router<C: NodeClient>(state: Arc<BalancerState<C>>) -> Router {
    Router::new()
        .route("/api/auth", get(auth::<C>))
        .route("/api/roomsupdated", get(rooms_updated::<C>))
        .route("/api/join", get(join::<C>).options(cors_preflight))
        .route("/api/join/", get(join::<C>).options(cors_preflight))
        .route(
            "/api/masterlist",
            get(masterlist::<C>).options(cors_preflight),
        )
        .route(
            "/api/masterlist/",
            get(masterlist::<C>).options(cors_preflight),
        )
        .route(
            "/api/masterlist/{app_id}",
            get(app_masterlist::<C>).options(cors_preflight),
        )
        .route("/api/stats", get(stats::<C>))
        .route("/api/stats/", get(stats::<C>))
        .route("/api/get/id", get(room_id::<C>))
        .with_state(state)
}

impl<C: NodeClient> BalancerState<C> {
    fn check_key(&self, headers: &HeaderMap) -> Result<()> {
        match headers.get(header::AUTHORIZATION) {
            Some(key) if key.as_bytes() == self.auth_key.as_bytes() => Ok(()),
            _ => Err(Error::Auth),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn required_port(headers: &HeaderMap, name: &str) -> Result<u16> {
    header_str(headers, name)
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| Error::Validation(format!("missing or invalid {} header", name)))
}

/// Region requested by a client; anything unusable means `Any`
fn requested_region(headers: &HeaderMap) -> Region {
    header_str(headers, "x-Region")
        .and_then(Region::from_header)
        .unwrap_or(Region::Any)
}

async fn auth<C: NodeClient>(
    State(state): State<Arc<BalancerState<C>>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    state.check_key(&headers)?;

    let endpoint_port = required_port(&headers, "x-EndpointPort")?;
    let game_port = required_port(&headers, "x-GamePort")?;
    let region = header_str(&headers, "x-Region")
        .and_then(Region::from_header)
        .ok_or_else(|| Error::Validation("missing or invalid x-Region header".into()))?;

    let remote_ip = remote.ip().to_string();
    let address = match header_str(&headers, "x-PIP").map(str::trim) {
        Some(public) if !public.is_empty() => public.to_string(),
        _ => remote_ip.clone(),
    };

    let node = RelayAddress {
        address,
        endpoint_address: remote_ip,
        game_port,
        endpoint_port,
        region,
    };

    state
        .registry
        .admit(state.client.as_ref(), node, state.probe_timeout)
        .await?;
    state.cache.request_refresh();

    Ok(StatusCode::OK)
}

async fn rooms_updated<C: NodeClient>(
    State(state): State<Arc<BalancerState<C>>>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    state.check_key(&headers)?;
    state.cache.request_refresh();
    Ok(StatusCode::OK)
}

async fn join<C: NodeClient>(
    State(state): State<Arc<BalancerState<C>>>,
    headers: HeaderMap,
) -> Result<Response> {
    let region = requested_region(&headers);
    let snapshot = state.registry.snapshot().await;

    let node = select_node(&snapshot, region)?;
    if node.address.is_empty() {
        return Err(Error::NoAddressResolvable);
    }

    tracing::debug!(node = %node, requested = %region, "Join request served");
    Ok((cors_headers(), Json(node)).into_response())
}

async fn masterlist<C: NodeClient>(
    State(state): State<Arc<BalancerState<C>>>,
    headers: HeaderMap,
) -> Response {
    let body = state.cache.room_list(requested_region(&headers)).await;
    (cors_headers(), json_body(body)).into_response()
}

async fn app_masterlist<C: NodeClient>(
    State(state): State<Arc<BalancerState<C>>>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let app_id = parse_app_id(&app_id)?;
    let body = state
        .cache
        .app_room_list(requested_region(&headers), app_id)
        .await;
    Ok((cors_headers(), json_body(body)).into_response())
}

async fn stats<C: NodeClient>(State(state): State<Arc<BalancerState<C>>>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot().await;
    Json(LoadBalancerStats::aggregate(
        snapshot.iter().map(|(_, stats)| stats),
        state.started_at.elapsed(),
    ))
}

async fn room_id<C: NodeClient>(State(state): State<Arc<BalancerState<C>>>) -> Result<String> {
    state.cache.generate_room_id(state.room_id_length).await
}

async fn cors_preflight(headers: HeaderMap) -> Response {
    preflight(&headers)
}
