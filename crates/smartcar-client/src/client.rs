use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use crate::error::{Result, SmartcarError};
use crate::model::{
    ActionRequest, ChargeAction, PermissionList, SecurityAction, TokenGrant, Vehicle, VehicleList,
};

pub const DEFAULT_API_BASE: &str = "https://api.smartcar.com/v2.0";
pub const DEFAULT_AUTH_URL: &str = "https://auth.smartcar.com/oauth/token";

#[derive(Debug, Clone)]
pub struct SmartcarConfig {
    pub api_base: String,
    pub auth_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub timeout: Duration,
}

impl Default for SmartcarConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            access_token: String::new(),
            refresh_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Vehicle operations the gateway depends on.
#[async_trait]
pub trait VehicleApi: Send + Sync {
    async fn list_vehicles(&self) -> Result<Vec<String>>;
    async fn vehicle_attributes(&self, vehicle_id: &str) -> Result<Vehicle>;
    async fn permissions(&self, vehicle_id: &str) -> Result<BTreeSet<String>>;
    async fn signals(&self, vehicle_id: &str) -> Result<BTreeSet<String>>;
    /// Current state composed into the same nested shape webhooks deliver.
    async fn vehicle_status(&self, vehicle_id: &str) -> Result<Value>;
    async fn lock(&self, vehicle_id: &str) -> Result<()>;
    async fn unlock(&self, vehicle_id: &str) -> Result<()>;
    async fn start_charge(&self, vehicle_id: &str) -> Result<()>;
    async fn stop_charge(&self, vehicle_id: &str) -> Result<()>;
    async fn set_charge_limit(&self, vehicle_id: &str, limit: u8) -> Result<()>;
}

struct Tokens {
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Clone)]
pub struct SmartcarClient {
    http: reqwest::Client,
    api_base: String,
    auth_url: Url,
    client_id: String,
    client_secret: String,
    tokens: Arc<RwLock<Tokens>>,
}

impl SmartcarClient {
    pub fn new(config: SmartcarConfig) -> Result<Self> {
        let api_base = config.api_base.trim_end_matches('/').to_string();
        Url::parse(&api_base).map_err(|err| SmartcarError::Url(format!("{api_base}: {err}")))?;
        let auth_url = Url::parse(&config.auth_url)
            .map_err(|err| SmartcarError::Url(format!("{}: {err}", config.auth_url)))?;
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            api_base,
            auth_url,
            client_id: config.client_id,
            client_secret: config.client_secret,
            tokens: Arc::new(RwLock::new(Tokens {
                access_token: config.access_token,
                refresh_token: config.refresh_token.filter(|token| !token.is_empty()),
            })),
        })
    }

    pub async fn access_token(&self) -> String {
        self.tokens.read().await.access_token.clone()
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh_access_token(&self) -> Result<()> {
        let stale = self.access_token().await;
        self.refresh_if_stale(&stale).await
    }

    /// Refresh unless another caller already replaced `stale`.
    async fn refresh_if_stale(&self, stale: &str) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        if tokens.access_token != stale {
            return Ok(());
        }
        let refresh_token = tokens
            .refresh_token
            .clone()
            .ok_or(SmartcarError::MissingRefreshToken)?;

        let response = self
            .http
            .post(self.auth_url.clone())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "smartcar rejected the refresh token");
            return Err(SmartcarError::ReauthRequired);
        }

        let grant: TokenGrant = response.json().await?;
        tokens.access_token = grant.access_token;
        if let Some(rotated) = grant.refresh_token {
            tokens.refresh_token = Some(rotated);
        }
        tracing::info!("smartcar access token refreshed");
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    async fn request(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<(Response, String)> {
        let token = self.access_token().await;
        let mut builder = self.http.request(method.clone(), url).bearer_auth(&token);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok((builder.send().await?, token))
    }

    /// Send a request, refreshing the access token and retrying once when
    /// Smartcar answers 401.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let url = self.url(path);
        let (response, token) = self.request(&method, &url, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check(response).await;
        }

        tracing::info!(%method, path, "access token rejected, refreshing");
        self.refresh_if_stale(&token).await.map_err(|err| match err {
            SmartcarError::Http(err) => SmartcarError::Http(err),
            _ => SmartcarError::ReauthRequired,
        })?;

        let (retried, _) = self.request(&method, &url, body).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(%method, path, "still unauthorized after token refresh");
            return Err(SmartcarError::ReauthRequired);
        }
        check(retried).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self.send(Method::GET, path, None).await?.json().await?)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let body = serde_json::to_value(body)
            .map_err(|err| SmartcarError::InvalidArgument(err.to_string()))?;
        self.send(Method::POST, path, Some(&body)).await?;
        Ok(())
    }

    async fn security(&self, vehicle_id: &str, action: SecurityAction) -> Result<()> {
        self.post(
            &format!("vehicles/{vehicle_id}/security"),
            &ActionRequest { action },
        )
        .await?;
        tracing::info!(vehicle_id, ?action, "security command accepted");
        Ok(())
    }

    async fn charge(&self, vehicle_id: &str, action: ChargeAction) -> Result<()> {
        self.post(
            &format!("vehicles/{vehicle_id}/charge"),
            &ActionRequest { action },
        )
        .await?;
        tracing::info!(vehicle_id, ?action, "charge command accepted");
        Ok(())
    }

    async fn optional(&self, vehicle_id: &str, endpoint: &str) -> Option<Value> {
        match self
            .get::<Value>(&format!("vehicles/{vehicle_id}/{endpoint}"))
            .await
        {
            Ok(body) => Some(body),
            Err(error) => {
                tracing::warn!(vehicle_id, endpoint, %error, "status endpoint failed, skipping");
                None
            }
        }
    }
}

#[async_trait]
impl VehicleApi for SmartcarClient {
    async fn list_vehicles(&self) -> Result<Vec<String>> {
        let list: VehicleList = self.get("vehicles").await?;
        Ok(list.vehicles)
    }

    async fn vehicle_attributes(&self, vehicle_id: &str) -> Result<Vehicle> {
        self.get(&format!("vehicles/{vehicle_id}")).await
    }

    async fn permissions(&self, vehicle_id: &str) -> Result<BTreeSet<String>> {
        let list: PermissionList = self
            .get(&format!("vehicles/{vehicle_id}/permissions"))
            .await?;
        Ok(list.permissions.into_iter().collect())
    }

    async fn signals(&self, vehicle_id: &str) -> Result<BTreeSet<String>> {
        let body: Value = self.get(&format!("vehicles/{vehicle_id}/signals")).await?;
        Ok(parse_signals(&body))
    }

    async fn vehicle_status(&self, vehicle_id: &str) -> Result<Value> {
        let (battery, charge, limit, odometer, location, tires) = tokio::join!(
            self.optional(vehicle_id, "battery"),
            self.optional(vehicle_id, "charge"),
            self.optional(vehicle_id, "charge/limit"),
            self.optional(vehicle_id, "odometer"),
            self.optional(vehicle_id, "location"),
            self.optional(vehicle_id, "tires/pressure"),
        );
        compose_status(battery, charge, limit, odometer, location, tires).ok_or_else(|| {
            SmartcarError::StatusUnavailable {
                vehicle_id: vehicle_id.to_string(),
            }
        })
    }

    async fn lock(&self, vehicle_id: &str) -> Result<()> {
        self.security(vehicle_id, SecurityAction::Lock).await
    }

    async fn unlock(&self, vehicle_id: &str) -> Result<()> {
        self.security(vehicle_id, SecurityAction::Unlock).await
    }

    async fn start_charge(&self, vehicle_id: &str) -> Result<()> {
        self.charge(vehicle_id, ChargeAction::Start).await
    }

    async fn stop_charge(&self, vehicle_id: &str) -> Result<()> {
        self.charge(vehicle_id, ChargeAction::Stop).await
    }

    async fn set_charge_limit(&self, vehicle_id: &str, limit: u8) -> Result<()> {
        if limit > 100 {
            return Err(SmartcarError::InvalidArgument(format!(
                "charge limit {limit} outside 0..=100"
            )));
        }
        self.post(
            &format!("vehicles/{vehicle_id}/charge/limit"),
            &json!({ "limit": limit }),
        )
        .await?;
        tracing::info!(vehicle_id, limit, "charge limit set");
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| {
            body.get("description")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(text);
    Err(SmartcarError::Status { status, message })
}

/// Accept either a bare list or `{"signals": [...]}`, with entries given as
/// strings or objects carrying `path` or `code`.
fn parse_signals(body: &Value) -> BTreeSet<String> {
    let entries = match body {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(object) => object
            .get("signals")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice),
        _ => &[],
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(path) => Some(path.clone()),
            Value::Object(object) => object
                .get("path")
                .or_else(|| object.get("code"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

/// Compose the REST responses into a webhook-shaped state document.
/// Smartcar reports fractions for battery level and charge limit; the
/// document carries percentages.
fn compose_status(
    battery: Option<Value>,
    charge: Option<Value>,
    limit: Option<Value>,
    odometer: Option<Value>,
    location: Option<Value>,
    tires: Option<Value>,
) -> Option<Value> {
    let mut document = Map::new();

    if let Some(battery) = battery {
        let mut section = Map::new();
        if let Some(fraction) = battery.get("percentRemaining").and_then(Value::as_f64) {
            section.insert("percentRemaining".into(), percent(fraction));
        }
        if let Some(range) = battery.get("range").filter(|range| range.is_number()) {
            section.insert("range".into(), range.clone());
        }
        document.insert("battery".into(), Value::Object(section));
    }

    let mut charge_section = Map::new();
    if let Some(charge) = charge {
        for field in ["isPluggedIn", "state"] {
            if let Some(value) = charge.get(field) {
                charge_section.insert(field.into(), value.clone());
            }
        }
    }
    if let Some(fraction) = limit
        .as_ref()
        .and_then(|limit| limit.get("limit"))
        .and_then(Value::as_f64)
    {
        charge_section.insert("limit".into(), percent(fraction));
    }
    if !charge_section.is_empty() {
        document.insert("charge".into(), Value::Object(charge_section));
    }

    if let Some(distance) = odometer
        .as_ref()
        .and_then(|odometer| odometer.get("distance"))
    {
        document.insert("odometer".into(), distance.clone());
    }

    if let Some(location) = location {
        if let (Some(latitude), Some(longitude)) =
            (location.get("latitude"), location.get("longitude"))
        {
            document.insert(
                "location".into(),
                json!({ "latitude": latitude, "longitude": longitude }),
            );
        }
    }

    if let Some(Value::Object(tires)) = tires {
        let section: Map<String, Value> = ["frontLeft", "frontRight", "backLeft", "backRight"]
            .into_iter()
            .filter_map(|wheel| tires.get(wheel).map(|value| (wheel.to_string(), value.clone())))
            .collect();
        document.insert("tires".into(), Value::Object(section));
    }

    (!document.is_empty()).then_some(Value::Object(document))
}

fn percent(fraction: f64) -> Value {
    let value = if fraction <= 1.0 { fraction * 100.0 } else { fraction };
    json!((value * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_accept_strings_and_objects() {
        let from_list = parse_signals(&json!(["odometer", { "path": "battery.range" }]));
        let from_object = parse_signals(&json!({
            "signals": [{ "code": "charge.state" }, 42]
        }));
        assert_eq!(
            from_list,
            BTreeSet::from(["odometer".to_string(), "battery.range".to_string()])
        );
        assert_eq!(from_object, BTreeSet::from(["charge.state".to_string()]));
        assert!(parse_signals(&json!("nope")).is_empty());
    }

    #[test]
    fn status_document_matches_webhook_shape() {
        let document = compose_status(
            Some(json!({ "percentRemaining": 0.72, "range": 210.5 })),
            Some(json!({ "isPluggedIn": true, "state": "CHARGING" })),
            Some(json!({ "limit": 0.8 })),
            Some(json!({ "distance": 6218.5 })),
            None,
            None,
        )
        .unwrap();
        assert_eq!(
            document,
            json!({
                "battery": { "percentRemaining": 72.0, "range": 210.5 },
                "charge": { "isPluggedIn": true, "state": "CHARGING", "limit": 80.0 },
                "odometer": 6218.5
            })
        );
    }

    #[test]
    fn empty_status_is_none() {
        assert!(compose_status(None, None, None, None, None, None).is_none());
    }

    #[test]
    fn url_joins_paths_under_the_version_prefix() {
        let client = SmartcarClient::new(SmartcarConfig {
            api_base: "http://localhost:9/v2.0/".into(),
            ..SmartcarConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.url("/vehicles/abc"),
            "http://localhost:9/v2.0/vehicles/abc"
        );
    }

    #[test]
    fn rejects_bad_base_url() {
        let result = SmartcarClient::new(SmartcarConfig {
            api_base: "not a url".into(),
            ..SmartcarConfig::default()
        });
        assert!(matches!(result, Err(SmartcarError::Url(_))));
    }
}
