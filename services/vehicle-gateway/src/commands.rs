//! Remote commands. A successful command optimistically updates the
//! affected entities through the dispatcher; the next webhook or poll
//! delivers the authoritative value.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use nna_signals::{SignalMap, SignalValue};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::{poller, AppState};

const LOCKED_PATH: &str = "closure.isLocked";
const CHARGE_STATE_PATH: &str = "charge.state";
const CHARGE_LIMIT_PATH: &str = "charge.limit";

#[derive(Debug, Deserialize)]
pub struct ChargeLimitRequest {
    pub limit: f64,
}

async fn known_vehicle(state: &AppState, vehicle_id: &str) -> Result<(), ApiError> {
    if state.fleet.read().await.contains_key(vehicle_id) {
        Ok(())
    } else {
        Err(ApiError::not_found(format!("vehicle {vehicle_id}")))
    }
}

fn apply_optimistic(state: &AppState, vehicle_id: &str, path: &str, value: SignalValue) -> Value {
    let mut signals = SignalMap::new();
    signals.insert(path.to_string(), value);
    let updated = state.dispatcher.dispatch(vehicle_id, &signals);
    json!({ "status": "ok", "updated": updated })
}

pub async fn lock(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    known_vehicle(&state, &vehicle_id).await?;
    state.api.lock(&vehicle_id).await?;
    tracing::info!(%vehicle_id, "vehicle locked");
    Ok(Json(apply_optimistic(
        &state,
        &vehicle_id,
        LOCKED_PATH,
        true.into(),
    )))
}

pub async fn unlock(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    known_vehicle(&state, &vehicle_id).await?;
    state.api.unlock(&vehicle_id).await?;
    tracing::info!(%vehicle_id, "vehicle unlocked");
    Ok(Json(apply_optimistic(
        &state,
        &vehicle_id,
        LOCKED_PATH,
        false.into(),
    )))
}

pub async fn start_charge(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    known_vehicle(&state, &vehicle_id).await?;
    state.api.start_charge(&vehicle_id).await?;
    tracing::info!(%vehicle_id, "charging started");
    Ok(Json(apply_optimistic(
        &state,
        &vehicle_id,
        CHARGE_STATE_PATH,
        "CHARGING".into(),
    )))
}

pub async fn stop_charge(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    known_vehicle(&state, &vehicle_id).await?;
    state.api.stop_charge(&vehicle_id).await?;
    tracing::info!(%vehicle_id, "charging stopped");
    Ok(Json(apply_optimistic(
        &state,
        &vehicle_id,
        CHARGE_STATE_PATH,
        "NOT_CHARGING".into(),
    )))
}

pub async fn set_charge_limit(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<String>,
    Json(request): Json<ChargeLimitRequest>,
) -> Result<Json<Value>, ApiError> {
    known_vehicle(&state, &vehicle_id).await?;
    if !request.limit.is_finite() {
        return Err(ApiError::Validation {
            message: "limit must be a number between 0 and 100".into(),
        });
    }
    let limit = request.limit.round().clamp(0.0, 100.0) as u8;
    state.api.set_charge_limit(&vehicle_id, limit).await?;
    tracing::info!(%vehicle_id, limit, "charge limit set");
    Ok(Json(apply_optimistic(
        &state,
        &vehicle_id,
        CHARGE_LIMIT_PATH,
        i64::from(limit).into(),
    )))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    known_vehicle(&state, &vehicle_id).await?;
    let updated = poller::refresh_vehicle(&state, &vehicle_id).await?;
    tracing::info!(%vehicle_id, updated = updated.len(), "vehicle status refreshed");
    Ok(Json(json!({ "status": "ok", "updated": updated })))
}
