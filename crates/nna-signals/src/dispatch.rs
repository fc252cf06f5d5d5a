//! Fan flattened signals out to the entities bound to a vehicle.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog;
use crate::flatten::SignalMap;

/// Opaque entity handle, `<vehicle_id>_<entity key>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn for_vehicle(vehicle_id: &str, key: &str) -> Self {
        Self(format!("{vehicle_id}_{key}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receives the subset of a delivery an entity subscribed to.
pub trait UpdateHandler: Send + Sync {
    fn apply(&self, entity_id: &EntityId, signals: SignalMap);
}

impl<F> UpdateHandler for F
where
    F: Fn(&EntityId, SignalMap) + Send + Sync,
{
    fn apply(&self, entity_id: &EntityId, signals: SignalMap) {
        self(entity_id, signals)
    }
}

#[derive(Clone)]
pub struct EntityBinding {
    pub entity_id: EntityId,
    pub vehicle_id: String,
    pub paths: BTreeSet<String>,
    pub handler: Arc<dyn UpdateHandler>,
}

impl EntityBinding {
    pub fn new<I, P>(
        entity_id: EntityId,
        vehicle_id: impl Into<String>,
        paths: I,
        handler: Arc<dyn UpdateHandler>,
    ) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            entity_id,
            vehicle_id: vehicle_id.into(),
            paths: paths.into_iter().map(Into::into).collect(),
            handler,
        }
    }

    fn matching(&self, signals: &SignalMap) -> SignalMap {
        self.paths
            .iter()
            .filter_map(|path| {
                signals
                    .get_key_value(path)
                    .map(|(path, value)| (path.clone(), value.clone()))
            })
            .collect()
    }
}

impl fmt::Debug for EntityBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityBinding")
            .field("entity_id", &self.entity_id)
            .field("vehicle_id", &self.vehicle_id)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("entity {0} is already bound")]
    AlreadyBound(EntityId),
    #[error("signal path {path} is not in the catalog")]
    UnknownSignal { path: String },
    #[error("binding subscribes to no signals")]
    Empty,
}

#[derive(Default)]
struct BindingTable {
    by_vehicle: HashMap<String, Vec<EntityBinding>>,
}

impl BindingTable {
    fn contains(&self, entity_id: &EntityId) -> bool {
        self.by_vehicle
            .values()
            .flatten()
            .any(|binding| &binding.entity_id == entity_id)
    }
}

/// Binding table shared by setup, teardown and every inbound delivery.
#[derive(Default, Clone)]
pub struct Dispatcher {
    table: Arc<RwLock<BindingTable>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding. Every path must be a catalog signal.
    pub fn bind(&self, binding: EntityBinding) -> Result<(), BindError> {
        if binding.paths.is_empty() {
            return Err(BindError::Empty);
        }
        if let Some(path) = binding.paths.iter().find(|path| !catalog::is_known(path)) {
            return Err(BindError::UnknownSignal { path: path.clone() });
        }

        let mut table = self.write();
        if table.contains(&binding.entity_id) {
            return Err(BindError::AlreadyBound(binding.entity_id));
        }
        tracing::debug!(
            entity_id = %binding.entity_id,
            vehicle_id = %binding.vehicle_id,
            paths = binding.paths.len(),
            "entity bound"
        );
        table
            .by_vehicle
            .entry(binding.vehicle_id.clone())
            .or_default()
            .push(binding);
        Ok(())
    }

    /// Remove one binding; returns whether it existed.
    pub fn unbind(&self, entity_id: &EntityId) -> bool {
        let mut table = self.write();
        let mut removed = false;
        table.by_vehicle.retain(|_, bindings| {
            let before = bindings.len();
            bindings.retain(|binding| &binding.entity_id != entity_id);
            removed |= bindings.len() != before;
            !bindings.is_empty()
        });
        removed
    }

    /// Remove every binding of a vehicle, returning how many were dropped.
    pub fn unbind_vehicle(&self, vehicle_id: &str) -> usize {
        self.write()
            .by_vehicle
            .remove(vehicle_id)
            .map_or(0, |bindings| bindings.len())
    }

    pub fn bindings_for(&self, vehicle_id: &str) -> Vec<EntityBinding> {
        self.read()
            .by_vehicle
            .get(vehicle_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn vehicles(&self) -> BTreeSet<String> {
        self.read().by_vehicle.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().by_vehicle.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver the signals each binding of `vehicle_id` subscribed to.
    ///
    /// Handlers run after the table lock is released and receive one map per
    /// call. A vehicle with no bindings is a no-op; nothing is buffered.
    pub fn dispatch(&self, vehicle_id: &str, signals: &SignalMap) -> BTreeSet<EntityId> {
        let deliveries: Vec<(EntityId, Arc<dyn UpdateHandler>, SignalMap)> = {
            let table = self.read();
            let Some(bindings) = table.by_vehicle.get(vehicle_id) else {
                tracing::debug!(vehicle_id, "no bindings for vehicle, dropping update");
                return BTreeSet::new();
            };
            bindings
                .iter()
                .filter_map(|binding| {
                    let matching = binding.matching(signals);
                    (!matching.is_empty()).then(|| {
                        (binding.entity_id.clone(), binding.handler.clone(), matching)
                    })
                })
                .collect()
        };

        let mut updated = BTreeSet::new();
        for (entity_id, handler, matching) in deliveries {
            handler.apply(&entity_id, matching);
            updated.insert(entity_id);
        }
        tracing::debug!(vehicle_id, updated = updated.len(), "dispatched signals");
        updated
    }

    fn read(&self) -> RwLockReadGuard<'_, BindingTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BindingTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread;

    use super::*;
    use crate::flatten::SignalValue;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(EntityId, SignalMap)>>,
    }

    impl UpdateHandler for Recorder {
        fn apply(&self, entity_id: &EntityId, signals: SignalMap) {
            self.calls.lock().unwrap().push((entity_id.clone(), signals));
        }
    }

    fn binding(vehicle: &str, key: &str, paths: &[&str], handler: Arc<Recorder>) -> EntityBinding {
        EntityBinding::new(
            EntityId::for_vehicle(vehicle, key),
            vehicle,
            paths.iter().copied(),
            handler,
        )
    }

    fn signals(entries: &[(&str, SignalValue)]) -> SignalMap {
        entries
            .iter()
            .map(|(path, value)| (path.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn non_intersecting_binding_receives_nothing() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new();
        dispatcher
            .bind(binding("v1", "battery_level", &["battery.percentRemaining"], recorder.clone()))
            .unwrap();

        let updated = dispatcher.dispatch("v1", &signals(&[("odometer", 100i64.into())]));
        assert!(updated.is_empty());
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn delivers_only_intersecting_pairs_in_one_call() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new();
        dispatcher
            .bind(binding(
                "v1",
                "charging",
                &["charge.state", "charge.isPluggedIn"],
                recorder.clone(),
            ))
            .unwrap();
        dispatcher
            .bind(binding("v1", "odometer", &["odometer"], recorder.clone()))
            .unwrap();

        let updated = dispatcher.dispatch(
            "v1",
            &signals(&[
                ("charge.state", "CHARGING".into()),
                ("charge.isPluggedIn", true.into()),
                ("battery.range", 210i64.into()),
            ]),
        );

        assert_eq!(updated, BTreeSet::from([EntityId::for_vehicle("v1", "charging")]));
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].1,
            signals(&[
                ("charge.isPluggedIn", true.into()),
                ("charge.state", "CHARGING".into()),
            ])
        );
    }

    #[test]
    fn unknown_vehicle_is_a_no_op() {
        let dispatcher = Dispatcher::new();
        let updated = dispatcher.dispatch("ghost", &signals(&[("odometer", 1i64.into())]));
        assert!(updated.is_empty());
    }

    #[test]
    fn other_vehicles_are_untouched() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new();
        dispatcher
            .bind(binding("v1", "odometer", &["odometer"], first.clone()))
            .unwrap();
        dispatcher
            .bind(binding("v2", "odometer", &["odometer"], second.clone()))
            .unwrap();

        dispatcher.dispatch("v2", &signals(&[("odometer", 5i64.into())]));
        assert!(first.calls.lock().unwrap().is_empty());
        assert_eq!(second.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn rejects_unknown_paths_duplicates_and_empty_bindings() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new();

        assert_eq!(
            dispatcher.bind(binding("v1", "bogus", &["not.a.signal"], recorder.clone())),
            Err(BindError::UnknownSignal {
                path: "not.a.signal".into()
            })
        );
        assert_eq!(
            dispatcher.bind(binding("v1", "nothing", &[], recorder.clone())),
            Err(BindError::Empty)
        );

        dispatcher
            .bind(binding("v1", "odometer", &["odometer"], recorder.clone()))
            .unwrap();
        assert!(matches!(
            dispatcher.bind(binding("v1", "odometer", &["odometer"], recorder)),
            Err(BindError::AlreadyBound(_))
        ));
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn unbind_removes_delivery() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new();
        dispatcher
            .bind(binding("v1", "odometer", &["odometer"], recorder.clone()))
            .unwrap();
        dispatcher
            .bind(binding("v1", "range", &["battery.range"], recorder.clone()))
            .unwrap();

        assert!(dispatcher.unbind(&EntityId::for_vehicle("v1", "odometer")));
        assert!(!dispatcher.unbind(&EntityId::for_vehicle("v1", "odometer")));
        assert!(dispatcher
            .dispatch("v1", &signals(&[("odometer", 1i64.into())]))
            .is_empty());

        assert_eq!(dispatcher.unbind_vehicle("v1"), 1);
        assert!(dispatcher.is_empty());
        assert!(dispatcher.vehicles().is_empty());
    }

    #[test]
    fn closures_are_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let dispatcher = Dispatcher::new();
        dispatcher
            .bind(EntityBinding::new(
                EntityId::new("v1_online"),
                "v1",
                ["connectivity.isOnline"],
                Arc::new(move |id: &EntityId, signals: SignalMap| {
                    sink.lock().unwrap().push((id.to_string(), signals.len()));
                }),
            ))
            .unwrap();

        dispatcher.dispatch("v1", &signals(&[("connectivity.isOnline", true.into())]));
        assert_eq!(*seen.lock().unwrap(), vec![("v1_online".to_string(), 1)]);
    }

    #[test]
    fn binding_while_dispatching_is_safe() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new();
        dispatcher
            .bind(binding("v1", "odometer", &["odometer"], recorder.clone()))
            .unwrap();

        let writer = {
            let dispatcher = dispatcher.clone();
            let recorder = recorder.clone();
            thread::spawn(move || {
                for key in ["range", "battery_level", "online"] {
                    let path = match key {
                        "range" => "battery.range",
                        "battery_level" => "battery.percentRemaining",
                        _ => "connectivity.isOnline",
                    };
                    dispatcher
                        .bind(binding("v1", key, &[path], recorder.clone()))
                        .unwrap();
                }
            })
        };
        for _ in 0..100 {
            dispatcher.dispatch("v1", &signals(&[("odometer", 1i64.into())]));
        }
        writer.join().unwrap();

        assert_eq!(dispatcher.len(), 4);
        assert_eq!(recorder.calls.lock().unwrap().len(), 100);
    }
}
