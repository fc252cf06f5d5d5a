//! Smartcar webhook endpoint.

use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use nna_obs::webhook_events_total;
use nna_signals::{
    classify, hash_challenge, verify, ClassifyError, VerificationState, WebhookEvent,
    WebhookSecret,
};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::{AppState, SERVICE_NAME};

pub const SIGNATURE_HEADER: &str = "sc-signature";
pub const WEBHOOK_ROUTE: &str = "/v1/webhooks/smartcar/:webhook_id";

/// The single configured webhook and its verification state.
#[derive(Debug)]
pub struct WebhookState {
    id: String,
    secret: Option<WebhookSecret>,
    verification: Mutex<VerificationState>,
}

impl WebhookState {
    pub fn new(id: impl Into<String>, secret: WebhookSecret) -> Self {
        Self {
            id: id.into(),
            secret: (!secret.is_empty()).then_some(secret),
            verification: Mutex::new(VerificationState::Unverified),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> String {
        format!("/v1/webhooks/smartcar/{}", self.id)
    }

    pub fn secret(&self) -> Option<&WebhookSecret> {
        self.secret.as_ref()
    }

    pub fn verification(&self) -> VerificationState {
        *self
            .verification
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn accept(&self, event: &WebhookEvent) {
        let mut verification = self
            .verification
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let next = verification.accept(event);
        if next != *verification {
            tracing::info!(webhook_id = %self.id, kind = event.kind(), "webhook verified");
        }
        *verification = next;
    }
}

fn record(kind: &str) {
    webhook_events_total().inc(&[SERVICE_NAME, kind], 1);
}

pub async fn receive(
    State(state): State<Arc<AppState>>,
    Path(webhook_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let webhook = &state.webhook;
    if webhook_id != webhook.id() {
        tracing::warn!(%webhook_id, "delivery for unknown webhook");
        return Err(ApiError::not_found(format!("webhook {webhook_id}")));
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|err| {
        tracing::warn!(error = %err, "webhook body is not valid json");
        record("malformed");
        ApiError::MalformedPayload {
            message: err.to_string(),
        }
    })?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    // Verification requests are answered before any signature is required.
    let classified = classify(&payload);
    match &classified {
        Ok(event @ WebhookEvent::Verify { .. }) => {
            return answer_challenge(webhook, event, &body, signature);
        }
        Err(err @ ClassifyError::MissingChallenge) => {
            record("malformed");
            tracing::error!("no challenge in verification request");
            return Err(ApiError::MalformedPayload {
                message: err.to_string(),
            });
        }
        _ => {}
    }

    if signature.is_none() {
        tracing::warn!("webhook delivery without signature header");
        record("signature_invalid");
        return Err(ApiError::SignatureInvalid);
    }
    let Some(secret) = webhook.secret() else {
        tracing::error!("management token not configured, cannot verify webhook signature");
        return Err(ApiError::MissingSecret);
    };
    if !verify(&body, signature, Some(secret)) {
        tracing::warn!("invalid webhook signature");
        record("signature_invalid");
        return Err(ApiError::SignatureInvalid);
    }

    match classified {
        Ok(event) => {
            record(event.kind());
            let response = match &event {
                WebhookEvent::VehicleState { vehicle_id, data } => {
                    let updated = nna_signals::ingest(&state.dispatcher, vehicle_id, data);
                    tracing::info!(
                        %vehicle_id,
                        updated = updated.len(),
                        "vehicle state delivered"
                    );
                    json!({ "status": "ok", "updated": updated })
                }
                WebhookEvent::VehicleError { vehicle_id, error } => {
                    tracing::warn!(%vehicle_id, %error, "vehicle error reported by smartcar");
                    json!({ "status": "ok" })
                }
                // Answered before the signature check.
                WebhookEvent::Verify { .. } => return Err(ApiError::Internal),
            };
            webhook.accept(&event);
            Ok(Json(response))
        }
        Err(ClassifyError::UnrecognizedEvent { event_type }) => {
            record("unrecognized");
            tracing::info!(event_type = ?event_type, "unrecognized webhook event dropped");
            Ok(Json(json!({ "status": "ignored" })))
        }
        Err(err) => {
            record("malformed");
            tracing::warn!(error = %err, "malformed webhook payload");
            Err(ApiError::MalformedPayload {
                message: err.to_string(),
            })
        }
    }
}

fn answer_challenge(
    webhook: &WebhookState,
    event: &WebhookEvent,
    body: &[u8],
    signature: Option<&str>,
) -> Result<Json<Value>, ApiError> {
    let WebhookEvent::Verify { challenge } = event else {
        return Err(ApiError::Internal);
    };
    let Some(secret) = webhook.secret() else {
        tracing::error!("management token not configured for webhook verification");
        return Err(ApiError::MissingSecret);
    };
    if signature.is_some() && !verify(body, signature, Some(secret)) {
        tracing::warn!("verification request carries an invalid signature");
        record("signature_invalid");
        return Err(ApiError::SignatureInvalid);
    }

    record(event.kind());
    webhook.accept(event);
    tracing::debug!("webhook challenge answered");
    Ok(Json(json!({ "challenge": hash_challenge(secret, challenge) })))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let webhook = &state.webhook;
    Json(json!({
        "webhook_id": webhook.id(),
        "path": webhook.path(),
        "verification": webhook.verification(),
        "secret_configured": webhook.secret().is_some(),
        "vehicles": state.dispatcher.vehicles(),
        "bindings": state.dispatcher.len(),
        "entities": state.entities.len(),
        "unit_system": state.entities.unit_system(),
        "smartcar": state.credentials,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_secret_counts_as_missing() {
        let webhook = WebhookState::new("abc", WebhookSecret::default());
        assert!(webhook.secret().is_none());
        assert_eq!(webhook.path(), "/v1/webhooks/smartcar/abc");
        assert_eq!(webhook.verification(), VerificationState::Unverified);
    }

    #[test]
    fn accepted_events_verify_the_webhook() {
        let webhook = WebhookState::new("abc", WebhookSecret::new("token"));
        webhook.accept(&WebhookEvent::Verify {
            challenge: "c".into(),
        });
        assert_eq!(webhook.verification(), VerificationState::Verified);
    }
}
