pub mod commands;
pub mod config;
pub mod entities;
pub mod error;
pub mod fleet;
pub mod poller;
pub mod webhook;

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use nna_obs::{
    encode_prometheus, handler_latency_seconds, health_router, http_requests_total, SpanExt,
    PROMETHEUS_CONTENT_TYPE,
};
use nna_signals::Dispatcher;
use smartcar_client::{Vehicle, VehicleApi};
use tokio::sync::RwLock;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use config::{CredentialSummary, VehicleGatewayConfig};
use entities::{EntityState, EntityStore};
use webhook::WebhookState;

pub const SERVICE_NAME: &str = "vehicle-gateway";
const REQUEST_ID_HEADER: &str = "x-request-id";

pub struct AppState {
    pub webhook: WebhookState,
    pub dispatcher: Dispatcher,
    pub entities: EntityStore,
    pub api: Arc<dyn VehicleApi>,
    pub fleet: RwLock<BTreeMap<String, Vehicle>>,
    pub credentials: CredentialSummary,
}

impl AppState {
    pub fn new(config: &VehicleGatewayConfig, api: Arc<dyn VehicleApi>) -> Self {
        Self {
            webhook: WebhookState::new(
                config.webhook.webhook_id.clone(),
                config.webhook.management_token.clone(),
            ),
            dispatcher: Dispatcher::new(),
            entities: EntityStore::new(config.unit_system, config.event_buffer),
            api,
            fleet: RwLock::new(BTreeMap::new()),
            credentials: config.smartcar.summary(),
        }
    }

    pub async fn vehicle_ids(&self) -> Vec<String> {
        self.fleet.read().await.keys().cloned().collect()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let vehicles = Router::new()
        .route("/v1/vehicles/:vehicle_id/lock", post(commands::lock))
        .route("/v1/vehicles/:vehicle_id/unlock", post(commands::unlock))
        .route(
            "/v1/vehicles/:vehicle_id/charge/start",
            post(commands::start_charge),
        )
        .route(
            "/v1/vehicles/:vehicle_id/charge/stop",
            post(commands::stop_charge),
        )
        .route(
            "/v1/vehicles/:vehicle_id/charge/limit",
            post(commands::set_charge_limit),
        )
        .route("/v1/vehicles/:vehicle_id/refresh", post(commands::refresh));

    Router::new()
        .route("/v1/webhooks/smartcar/status", get(webhook::status))
        .route(webhook::WEBHOOK_ROUTE, post(webhook::receive))
        .route("/v1/entities", get(list_entities))
        .route("/v1/entities/events", get(stream_entities))
        .merge(vehicles)
        .route("/metrics", get(metrics))
        .with_state(state)
        .merge(health_router(SERVICE_NAME))
        .layer(from_fn(track_http_metrics))
        .layer(from_fn(request_context))
}

async fn list_entities(State(state): State<Arc<AppState>>) -> Json<Vec<EntityState>> {
    Json(state.entities.list())
}

async fn stream_entities(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.entities.subscribe()).filter_map(|update| async move {
        match update {
            Ok(update) => match serde_json::to_string(&update) {
                Ok(payload) => Some(Ok(Event::default().event("entity_update").data(payload))),
                Err(err) => {
                    tracing::warn!(error = %err, "entity update not serializable");
                    None
                }
            },
            Err(err) => {
                tracing::debug!(error = %err, "entity stream subscriber lagged");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::new())
}

async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
        )],
        encode_prometheus(),
    )
}

async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or(path);

    let start = Instant::now();
    let response = next.run(req).await;
    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    http_requests_total().inc(&[SERVICE_NAME, route.as_str(), status.as_str()], 1);
    handler_latency_seconds().observe(&[SERVICE_NAME, route.as_str()], latency);

    response
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&request_id)
        .unwrap_or_else(|_| HeaderValue::from_static("invalid"));
    req.headers_mut()
        .insert(REQUEST_ID_HEADER, header_value.clone());

    let span = info_span!(
        "http.request",
        method = %method,
        path = %path,
        request_id = tracing::field::Empty
    );
    span.with_req(&request_id);

    let start = Instant::now();
    span.in_scope(|| {
        tracing::info!(event = "request_start", method = %method, path = %path);
    });
    let mut response = next.run(req).instrument(span.clone()).await;

    let status = response.status();
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    {
        let _guard = span.enter();
        tracing::info!(
            event = "request_end",
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms
        );
    }

    response
        .headers_mut()
        .insert(REQUEST_ID_HEADER, header_value);
    response
}
