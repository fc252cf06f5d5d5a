//! Classification of inbound Smartcar webhook payloads.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const EVENT_TYPE_FIELD: &str = "eventType";
pub const VEHICLE_ID_FIELD: &str = "vehicleId";
const CHALLENGE_FIELD: &str = "challenge";
const DATA_FIELD: &str = "data";
/// Envelope keys stripped from a state payload that has no `data` object.
const ENVELOPE_FIELDS: &[&str] = &[EVENT_TYPE_FIELD, VEHICLE_ID_FIELD, "eventId", "meta"];

/// A classified webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    /// Challenge-response handshake sent before live delivery starts.
    Verify { challenge: String },
    /// Nested vehicle state document.
    VehicleState { vehicle_id: String, data: Value },
    /// Error notification for a vehicle.
    VehicleError { vehicle_id: String, error: String },
}

impl WebhookEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::Verify { .. } => "verify",
            WebhookEvent::VehicleState { .. } => "vehicle_state",
            WebhookEvent::VehicleError { .. } => "vehicle_error",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("verify event carries no challenge")]
    MissingChallenge,
    #[error("{event_type} event carries no vehicleId")]
    MissingVehicleId { event_type: String },
    #[error("unrecognized event type {event_type:?}")]
    UnrecognizedEvent { event_type: Option<String> },
}

impl ClassifyError {
    /// Malformed deliveries are answered with a client error; unknown event
    /// types are acknowledged so the vendor does not retry them.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ClassifyError::UnrecognizedEvent { .. })
    }
}

/// Webhook activation lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    #[default]
    Unverified,
    Verified,
}

impl VerificationState {
    /// State after an authenticated event has been accepted.
    pub fn accept(self, event: &WebhookEvent) -> Self {
        match (self, event) {
            // Smartcar repeats the challenge when the webhook is re-saved.
            (VerificationState::Verified, _) => VerificationState::Verified,
            (VerificationState::Unverified, WebhookEvent::Verify { .. }) => {
                VerificationState::Verified
            }
            // Live deliveries only arrive on a webhook the vendor activated.
            (
                VerificationState::Unverified,
                WebhookEvent::VehicleState { .. } | WebhookEvent::VehicleError { .. },
            ) => VerificationState::Verified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Verify,
    State,
    Error,
}

fn marker(event_type: &str) -> Option<Marker> {
    let normalized: String = event_type
        .trim()
        .chars()
        .map(|c| match c {
            '.' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect();
    match normalized.as_str() {
        "VERIFY" => Some(Marker::Verify),
        "VEHICLE_STATE" => Some(Marker::State),
        "VEHICLE_ERROR" => Some(Marker::Error),
        _ => None,
    }
}

/// Classify a parsed webhook payload.
pub fn classify(payload: &Value) -> Result<WebhookEvent, ClassifyError> {
    let object = payload.as_object().ok_or(ClassifyError::NotAnObject)?;
    let event_type = object.get(EVENT_TYPE_FIELD).and_then(Value::as_str);
    let marker = event_type.and_then(marker);

    if let Some(challenge) = find_challenge(object, marker) {
        return Ok(WebhookEvent::Verify { challenge });
    }

    match marker {
        Some(Marker::Verify) => Err(ClassifyError::MissingChallenge),
        Some(Marker::State) => Ok(WebhookEvent::VehicleState {
            vehicle_id: vehicle_id(object, event_type)?,
            data: state_data(object),
        }),
        Some(Marker::Error) => Ok(WebhookEvent::VehicleError {
            vehicle_id: vehicle_id(object, event_type)?,
            error: error_text(object),
        }),
        None => Err(ClassifyError::UnrecognizedEvent {
            event_type: event_type.map(str::to_string),
        }),
    }
}

fn find_challenge(object: &Map<String, Value>, marker: Option<Marker>) -> Option<String> {
    if let Some(challenge) = object.get(CHALLENGE_FIELD).and_then(Value::as_str) {
        return Some(challenge.to_string());
    }
    // a nested challenge only counts on verify-shaped payloads
    if matches!(marker, Some(Marker::Verify) | None) {
        return object
            .get(DATA_FIELD)
            .and_then(|data| data.get(CHALLENGE_FIELD))
            .and_then(Value::as_str)
            .map(str::to_string);
    }
    None
}

fn vehicle_id(
    object: &Map<String, Value>,
    event_type: Option<&str>,
) -> Result<String, ClassifyError> {
    object
        .get(VEHICLE_ID_FIELD)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ClassifyError::MissingVehicleId {
            event_type: event_type.unwrap_or_default().to_string(),
        })
}

fn state_data(object: &Map<String, Value>) -> Value {
    if let Some(data @ Value::Object(_)) = object.get(DATA_FIELD) {
        return data.clone();
    }
    let remainder: Map<String, Value> = object
        .iter()
        .filter(|(key, _)| !ENVELOPE_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(remainder)
}

fn error_text(object: &Map<String, Value>) -> String {
    match object.get(DATA_FIELD).or_else(|| object.get("error")) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => "unknown error".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn top_level_challenge_is_verify() {
        let event = classify(&json!({ "challenge": "abc123" })).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Verify {
                challenge: "abc123".into()
            }
        );
    }

    #[test]
    fn smartcar_verify_envelope() {
        let event = classify(&json!({
            "eventType": "VERIFY",
            "data": { "challenge": "test_challenge" }
        }))
        .unwrap();
        assert_eq!(event.kind(), "verify");
    }

    #[test]
    fn verify_without_challenge_is_client_error() {
        let err = classify(&json!({ "eventType": "VERIFY", "data": {} })).unwrap_err();
        assert_eq!(err, ClassifyError::MissingChallenge);
        assert!(err.is_client_error());
    }

    #[test]
    fn state_event_takes_data_object() {
        let event = classify(&json!({
            "eventType": "VEHICLE_STATE",
            "vehicleId": "vehicle_123",
            "data": { "some": "data" }
        }))
        .unwrap();
        assert_eq!(
            event,
            WebhookEvent::VehicleState {
                vehicle_id: "vehicle_123".into(),
                data: json!({ "some": "data" }),
            }
        );
    }

    #[test]
    fn state_event_without_data_uses_remaining_payload() {
        let event = classify(&json!({
            "eventType": "vehicle.state",
            "vehicleId": "v1",
            "battery": { "percentRemaining": { "value": 72, "meta": {} } }
        }))
        .unwrap();
        let WebhookEvent::VehicleState { vehicle_id, data } = event else {
            panic!("expected state event");
        };
        assert_eq!(vehicle_id, "v1");
        assert_eq!(
            data,
            json!({ "battery": { "percentRemaining": { "value": 72, "meta": {} } } })
        );
    }

    #[test]
    fn state_event_requires_vehicle_id() {
        let err = classify(&json!({ "eventType": "VEHICLE_STATE", "data": {} })).unwrap_err();
        assert!(matches!(err, ClassifyError::MissingVehicleId { .. }));
        assert!(err.is_client_error());
    }

    #[test]
    fn nested_challenge_on_state_event_is_plain_data() {
        let event = classify(&json!({
            "eventType": "VEHICLE_STATE",
            "vehicleId": "v1",
            "data": { "challenge": "not-a-handshake" }
        }))
        .unwrap();
        assert_eq!(event.kind(), "vehicle_state");
    }

    #[test]
    fn error_event_renders_data() {
        let event = classify(&json!({
            "eventType": "VEHICLE_ERROR",
            "vehicleId": "v1",
            "data": { "code": "VEHICLE_ASLEEP" }
        }))
        .unwrap();
        assert_eq!(
            event,
            WebhookEvent::VehicleError {
                vehicle_id: "v1".into(),
                error: r#"{"code":"VEHICLE_ASLEEP"}"#.into(),
            }
        );
    }

    #[test]
    fn unknown_event_type_is_acknowledged() {
        let err = classify(&json!({ "eventType": "UNKNOWN_EVENT", "vehicleId": "v1" }))
            .unwrap_err();
        assert_eq!(
            err,
            ClassifyError::UnrecognizedEvent {
                event_type: Some("UNKNOWN_EVENT".into())
            }
        );
        assert!(!err.is_client_error());
    }

    #[test]
    fn non_object_payload_is_malformed() {
        assert_eq!(classify(&json!([1, 2])), Err(ClassifyError::NotAnObject));
    }

    #[test]
    fn verification_state_is_sticky() {
        let verify = WebhookEvent::Verify {
            challenge: "c".into(),
        };
        let state = VerificationState::default().accept(&verify);
        assert_eq!(state, VerificationState::Verified);
        assert_eq!(state.accept(&verify), VerificationState::Verified);
    }

    #[test]
    fn signed_deliveries_promote_an_unverified_webhook() {
        let state_event = WebhookEvent::VehicleState {
            vehicle_id: "v1".into(),
            data: json!({}),
        };
        let error_event = WebhookEvent::VehicleError {
            vehicle_id: "v1".into(),
            error: "VEHICLE_ASLEEP".into(),
        };
        for event in [&state_event, &error_event] {
            assert_eq!(
                VerificationState::Unverified.accept(event),
                VerificationState::Verified
            );
            assert_eq!(
                VerificationState::Verified.accept(event),
                VerificationState::Verified
            );
        }
    }
}
