//! Webhook ingestion and signal fan-out for Smartcar vehicle data.
//!
//! The pipeline for one inbound delivery is
//! [`signature::verify`] → [`event::classify`] → [`flatten::flatten`] →
//! [`dispatch::Dispatcher::dispatch`]. Every stage is synchronous, in-memory
//! work; nothing here performs I/O.

pub mod catalog;
pub mod dispatch;
pub mod event;
pub mod flatten;
pub mod signature;
pub mod units;

use std::collections::BTreeSet;

pub use catalog::{DeviceClass, EntitySpec, Platform};
pub use dispatch::{BindError, Dispatcher, EntityBinding, EntityId, UpdateHandler};
pub use event::{classify, ClassifyError, VerificationState, WebhookEvent};
pub use flatten::{flatten, SignalMap, SignalValue};
pub use signature::{hash_challenge, verify, WebhookSecret};
pub use units::UnitSystem;

/// Flatten a vehicle state document and fan it out to the bound entities.
pub fn ingest(
    dispatcher: &Dispatcher,
    vehicle_id: &str,
    data: &serde_json::Value,
) -> BTreeSet<EntityId> {
    let signals = flatten(data);
    tracing::debug!(vehicle_id, signals = signals.len(), "flattened state document");
    dispatcher.dispatch(vehicle_id, &signals)
}
