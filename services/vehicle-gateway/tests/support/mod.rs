#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use nna_signals::signature::sign;
use nna_signals::WebhookSecret;
use serde_json::Value;
use smartcar_client::{Result, SmartcarError, Vehicle, VehicleApi};
use tower::ServiceExt;
use vehicle_gateway::config::VehicleGatewayConfig;
use vehicle_gateway::{build_router, fleet, AppState};

pub const WEBHOOK_ID: &str = "nissan_na";
pub const SECRET: &str = "management-token";
pub const WEBHOOK_URI: &str = "/v1/webhooks/smartcar/nissan_na";

/// In-memory stand-in for the Smartcar API.
#[derive(Default)]
pub struct FakeVehicleApi {
    pub vehicles: Mutex<Vec<String>>,
    pub permissions: Option<BTreeSet<String>>,
    pub signals: Option<BTreeSet<String>>,
    pub status: Option<Value>,
    pub reauth_required: bool,
    /// Number of upcoming vehicle listings that fail.
    pub listing_failures: AtomicUsize,
    /// Listing fails with a non-authorization error while set.
    pub listing_broken: AtomicBool,
    pub status_calls: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
}

impl FakeVehicleApi {
    pub fn with_vehicles(vehicles: &[&str], permissions: &[&str], signals: &[&str]) -> Self {
        Self {
            vehicles: Mutex::new(vehicles.iter().map(|id| id.to_string()).collect()),
            permissions: Some(set(permissions)),
            signals: Some(set(signals)),
            ..Self::default()
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn command(&self, vehicle_id: &str, name: &str) -> Result<()> {
        if self.reauth_required {
            return Err(SmartcarError::ReauthRequired);
        }
        self.commands
            .lock()
            .unwrap()
            .push(format!("{name} {vehicle_id}"));
        Ok(())
    }
}

fn unavailable(vehicle_id: &str) -> SmartcarError {
    SmartcarError::StatusUnavailable {
        vehicle_id: vehicle_id.to_string(),
    }
}

#[async_trait]
impl VehicleApi for FakeVehicleApi {
    async fn list_vehicles(&self) -> Result<Vec<String>> {
        let failing = self
            .listing_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SmartcarError::ReauthRequired);
        }
        if self.listing_broken.load(Ordering::SeqCst) {
            return Err(SmartcarError::MissingRefreshToken);
        }
        Ok(self.vehicles.lock().unwrap().clone())
    }

    async fn vehicle_attributes(&self, vehicle_id: &str) -> Result<Vehicle> {
        let mut vehicle = Vehicle::new(vehicle_id);
        vehicle.make = Some("NISSAN".into());
        vehicle.model = Some("LEAF".into());
        vehicle.year = Some(2022);
        Ok(vehicle)
    }

    async fn permissions(&self, vehicle_id: &str) -> Result<BTreeSet<String>> {
        self.permissions.clone().ok_or_else(|| unavailable(vehicle_id))
    }

    async fn signals(&self, vehicle_id: &str) -> Result<BTreeSet<String>> {
        self.signals.clone().ok_or_else(|| unavailable(vehicle_id))
    }

    async fn vehicle_status(&self, vehicle_id: &str) -> Result<Value> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status.clone().ok_or_else(|| unavailable(vehicle_id))
    }

    async fn lock(&self, vehicle_id: &str) -> Result<()> {
        self.command(vehicle_id, "lock")
    }

    async fn unlock(&self, vehicle_id: &str) -> Result<()> {
        self.command(vehicle_id, "unlock")
    }

    async fn start_charge(&self, vehicle_id: &str) -> Result<()> {
        self.command(vehicle_id, "start_charge")
    }

    async fn stop_charge(&self, vehicle_id: &str) -> Result<()> {
        self.command(vehicle_id, "stop_charge")
    }

    async fn set_charge_limit(&self, vehicle_id: &str, limit: u8) -> Result<()> {
        self.command(vehicle_id, &format!("charge_limit={limit}"))
    }
}

pub fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|item| item.to_string()).collect()
}

pub fn config(secret: &str) -> VehicleGatewayConfig {
    let mut config = VehicleGatewayConfig::default();
    config.webhook.webhook_id = WEBHOOK_ID.to_string();
    config.webhook.management_token = WebhookSecret::new(secret);
    config
}

pub fn bare_state(api: Arc<FakeVehicleApi>, secret: &str) -> Arc<AppState> {
    Arc::new(AppState::new(&config(secret), api))
}

/// Build the state and run discovery against the fake.
pub async fn state_with(api: Arc<FakeVehicleApi>, secret: &str) -> Arc<AppState> {
    let state = bare_state(api, secret);
    fleet::discover(&state).await.expect("discovery");
    state
}

pub fn router(state: &Arc<AppState>) -> Router {
    build_router(state.clone())
}

pub fn signature(body: &[u8]) -> String {
    sign(&WebhookSecret::new(SECRET), body)
}

pub fn post_json(uri: &str, body: &[u8], signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("SC-Signature", signature);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

pub fn signed_webhook(payload: &Value) -> Request<Body> {
    let body = serde_json::to_vec(payload).unwrap();
    let signature = signature(&body);
    post_json(WEBHOOK_URI, &body, Some(&signature))
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}
