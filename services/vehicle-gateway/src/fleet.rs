//! Vehicle discovery and entity setup.

use std::collections::BTreeSet;
use std::sync::Arc;

use nna_signals::catalog::negotiate;
use nna_signals::{BindError, EntityBinding, EntitySpec, UpdateHandler};
use smartcar_client::{SmartcarError, Vehicle};

use crate::AppState;

/// List the account's vehicles, set up the ones not seen before and tear
/// down the ones no longer listed. Returns the number of vehicles added.
pub async fn discover(state: &AppState) -> Result<usize, SmartcarError> {
    let listed: BTreeSet<String> = state.api.list_vehicles().await?.into_iter().collect();
    let known: BTreeSet<String> = state.fleet.read().await.keys().cloned().collect();

    for gone in known.difference(&listed) {
        remove_vehicle(state, gone).await;
    }

    let mut added = 0;
    for vehicle_id in listed.difference(&known) {
        let vehicle = match state.api.vehicle_attributes(vehicle_id).await {
            Ok(vehicle) => vehicle,
            Err(SmartcarError::ReauthRequired) => return Err(SmartcarError::ReauthRequired),
            Err(err) => {
                tracing::warn!(%vehicle_id, error = %err, "vehicle attributes unavailable");
                Vehicle::new(vehicle_id.as_str())
            }
        };
        let permissions = state
            .api
            .permissions(vehicle_id)
            .await
            .map_err(|err| {
                tracing::warn!(%vehicle_id, error = %err, "permission lookup failed");
            })
            .ok();
        let signals = state
            .api
            .signals(vehicle_id)
            .await
            .map_err(|err| {
                tracing::debug!(%vehicle_id, error = %err, "signal lookup failed");
            })
            .ok();

        let specs = negotiate(signals.as_ref(), permissions.as_ref());
        let bound = setup_vehicle(state, &vehicle, &specs);
        tracing::info!(
            %vehicle_id,
            vehicle = %vehicle.display_name(),
            entities = bound,
            "vehicle set up"
        );
        state.fleet.write().await.insert(vehicle_id.clone(), vehicle);
        added += 1;
    }
    Ok(added)
}

/// Register and bind one entity per spec. Returns the number bound.
pub fn setup_vehicle(state: &AppState, vehicle: &Vehicle, specs: &[&'static EntitySpec]) -> usize {
    let handler: Arc<dyn UpdateHandler> = Arc::new(state.entities.clone());
    let mut bound = 0;
    for spec in specs {
        let entity_id = state.entities.register(vehicle, spec);
        let binding = EntityBinding::new(
            entity_id.clone(),
            vehicle.id.clone(),
            spec.paths.iter().copied(),
            handler.clone(),
        );
        match state.dispatcher.bind(binding) {
            Ok(()) => bound += 1,
            Err(BindError::AlreadyBound(_)) => {
                tracing::debug!(entity_id = %entity_id, "entity already bound");
            }
            Err(err) => {
                tracing::warn!(entity_id = %entity_id, error = %err, "entity binding rejected");
            }
        }
    }
    bound
}

pub async fn remove_vehicle(state: &AppState, vehicle_id: &str) {
    let unbound = state.dispatcher.unbind_vehicle(vehicle_id);
    let removed = state.entities.remove_vehicle(vehicle_id);
    state.fleet.write().await.remove(vehicle_id);
    tracing::info!(vehicle_id, unbound, removed, "vehicle removed");
}
