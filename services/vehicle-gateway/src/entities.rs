//! In-memory entity state fed by the signal dispatcher.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use nna_obs::entity_updates_total;
use nna_signals::{
    DeviceClass, EntityId, EntitySpec, Platform, SignalMap, SignalValue, UnitSystem,
    UpdateHandler,
};
use serde::Serialize;
use smartcar_client::Vehicle;
use tokio::sync::broadcast;

use crate::SERVICE_NAME;

const CHARGING: &str = "CHARGING";

#[derive(Debug, Clone, Serialize)]
pub struct EntityState {
    pub entity_id: EntityId,
    pub vehicle_id: String,
    pub vehicle_name: String,
    pub key: &'static str,
    pub name: &'static str,
    pub platform: Platform,
    /// Unit of `state` after conversion to the configured unit system.
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub icon: Option<&'static str>,
    pub state: Option<SignalValue>,
    /// Latest raw value per subscribed path.
    pub attributes: SignalMap,
    pub available: bool,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    spec: &'static EntitySpec,
}

/// Pushed to stream subscribers after every applied delivery.
#[derive(Debug, Clone, Serialize)]
pub struct EntityUpdate {
    pub entity_id: EntityId,
    pub changed: Vec<String>,
    pub entity: EntityState,
}

#[derive(Clone)]
pub struct EntityStore {
    entities: Arc<RwLock<BTreeMap<EntityId, EntityState>>>,
    updates: broadcast::Sender<EntityUpdate>,
    unit_system: UnitSystem,
}

impl EntityStore {
    pub fn new(unit_system: UnitSystem, buffer: usize) -> Self {
        let (updates, _) = broadcast::channel(buffer.max(1));
        Self {
            entities: Arc::new(RwLock::new(BTreeMap::new())),
            updates,
            unit_system,
        }
    }

    pub fn unit_system(&self) -> UnitSystem {
        self.unit_system
    }

    /// Create the entity in the unavailable state. Re-registering keeps the
    /// values already received.
    pub fn register(&self, vehicle: &Vehicle, spec: &'static EntitySpec) -> EntityId {
        let entity_id = EntityId::for_vehicle(&vehicle.id, spec.key);
        let unit = spec.unit.map(|unit| self.unit_system.display_unit(unit));
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entities
            .entry(entity_id.clone())
            .and_modify(|entity| entity.vehicle_name = vehicle.display_name())
            .or_insert_with(|| EntityState {
                entity_id: entity_id.clone(),
                vehicle_id: vehicle.id.clone(),
                vehicle_name: vehicle.display_name(),
                key: spec.key,
                name: spec.name,
                platform: spec.platform,
                unit,
                device_class: spec.device_class,
                icon: spec.icon,
                state: None,
                attributes: SignalMap::new(),
                available: false,
                updated_at: None,
                spec,
            });
        entity_id
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<EntityState> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .cloned()
    }

    pub fn list(&self) -> Vec<EntityState> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove_vehicle(&self, vehicle_id: &str) -> usize {
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entities.len();
        entities.retain(|_, entity| entity.vehicle_id != vehicle_id);
        before - entities.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityUpdate> {
        self.updates.subscribe()
    }

    fn state_for(&self, spec: &EntitySpec, attributes: &SignalMap) -> Option<SignalValue> {
        let primary = spec.paths.iter().find_map(|path| attributes.get(*path))?;
        if spec.platform == Platform::Switch {
            let charging = primary
                .as_str()
                .is_some_and(|state| state.eq_ignore_ascii_case(CHARGING));
            return Some(SignalValue::Bool(charging));
        }
        match (spec.unit, primary.as_f64()) {
            (Some(unit), Some(value)) if self.unit_system != UnitSystem::Metric => {
                Some(SignalValue::from(self.unit_system.convert(value, unit)))
            }
            _ => Some(primary.clone()),
        }
    }
}

impl UpdateHandler for EntityStore {
    fn apply(&self, entity_id: &EntityId, signals: SignalMap) {
        let update = {
            let mut entities = self
                .entities
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(entity) = entities.get_mut(entity_id) else {
                tracing::debug!(entity_id = %entity_id, "update for unknown entity dropped");
                return;
            };
            let changed: Vec<String> = signals.keys().cloned().collect();
            entity.attributes.extend(signals);
            entity.state = self.state_for(entity.spec, &entity.attributes);
            entity.available = true;
            entity.updated_at = Some(Utc::now());
            EntityUpdate {
                entity_id: entity_id.clone(),
                changed,
                entity: entity.clone(),
            }
        };

        entity_updates_total().inc(&[SERVICE_NAME], 1);
        tracing::debug!(
            entity_id = %entity_id,
            state = ?update.entity.state,
            "entity updated"
        );
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }
}
