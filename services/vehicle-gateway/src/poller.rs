//! Periodic status polling, the fallback when webhooks are quiet.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use nna_signals::EntityId;
use smartcar_client::SmartcarError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{fleet, AppState};

pub fn spawn(state: Arc<AppState>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let updated = poll_once(&state).await;
            tracing::debug!(updated, "poll complete");
        }
    })
}

/// Reconcile the fleet with the account's vehicle list, then refresh every
/// known vehicle. Returns the number of entity updates dispatched.
///
/// A failed listing keeps the known fleet polling, except when the account
/// needs re-authorization, where every call would fail the same way.
pub async fn poll_once(state: &AppState) -> usize {
    match fleet::discover(state).await {
        Ok(0) => {}
        Ok(added) => tracing::info!(added, "vehicle discovery complete"),
        Err(SmartcarError::ReauthRequired) => {
            tracing::warn!("smartcar authorization expired, skipping poll");
            return 0;
        }
        Err(err) => {
            tracing::warn!(error = %err, "vehicle discovery failed, retrying next poll");
        }
    }

    let mut updated = 0;
    for vehicle_id in state.vehicle_ids().await {
        match refresh_vehicle(state, &vehicle_id).await {
            Ok(entities) => updated += entities.len(),
            Err(err) => tracing::warn!(%vehicle_id, error = %err, "status poll failed"),
        }
    }
    updated
}

pub async fn refresh_vehicle(
    state: &AppState,
    vehicle_id: &str,
) -> Result<BTreeSet<EntityId>, SmartcarError> {
    let status = state.api.vehicle_status(vehicle_id).await?;
    Ok(nna_signals::ingest(&state.dispatcher, vehicle_id, &status))
}
