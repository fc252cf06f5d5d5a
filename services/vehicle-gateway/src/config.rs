use std::net::SocketAddr;
use std::time::Duration;

use nna_config::{override_parsed, override_string, ConfigError, ServiceConfig};
use nna_signals::{UnitSystem, WebhookSecret};
use serde::{Deserialize, Serialize};
use smartcar_client::{SmartcarConfig, DEFAULT_API_BASE, DEFAULT_AUTH_URL};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VehicleGatewayConfig {
    pub bind_address: String,
    pub port: u16,
    pub webhook: WebhookConfig,
    pub smartcar: SmartcarSettings,
    pub unit_system: UnitSystem,
    pub poll_interval_secs: u64,
    /// Capacity of the entity update broadcast channel.
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub webhook_id: String,
    /// Smartcar Application Management Token.
    pub management_token: WebhookSecret,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SmartcarSettings {
    pub api_base: String,
    pub auth_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for SmartcarSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartcarSettings")
            .field("api_base", &self.api_base)
            .field("auth_url", &self.auth_url)
            .field("client_id", &self.client_id)
            .field("has_access_token", &!self.access_token.is_empty())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

const REDACTED: &str = "**REDACTED**";

/// Smartcar credential presence, safe to expose on diagnostics routes.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CredentialSummary {
    pub client_id: Option<&'static str>,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
}

impl SmartcarSettings {
    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            client_id: (!self.client_id.is_empty()).then_some(REDACTED),
            has_access_token: !self.access_token.is_empty(),
            has_refresh_token: self.refresh_token.is_some(),
        }
    }
}

impl Default for VehicleGatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8010,
            webhook: WebhookConfig::default(),
            smartcar: SmartcarSettings::default(),
            unit_system: UnitSystem::Metric,
            poll_interval_secs: 15 * 60,
            event_buffer: 128,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            webhook_id: "nissan_na".to_string(),
            management_token: WebhookSecret::default(),
        }
    }
}

impl Default for SmartcarSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            access_token: String::new(),
            refresh_token: None,
            request_timeout_secs: 30,
        }
    }
}

impl VehicleGatewayConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|err| ConfigError::Invalid(format!("bind address: {err}")))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn webhook_path(&self) -> String {
        format!("/v1/webhooks/smartcar/{}", self.webhook.webhook_id)
    }

    pub fn smartcar_config(&self) -> SmartcarConfig {
        SmartcarConfig {
            api_base: self.smartcar.api_base.clone(),
            auth_url: self.smartcar.auth_url.clone(),
            client_id: self.smartcar.client_id.clone(),
            client_secret: self.smartcar.client_secret.clone(),
            access_token: self.smartcar.access_token.clone(),
            refresh_token: self.smartcar.refresh_token.clone(),
            timeout: Duration::from_secs(self.smartcar.request_timeout_secs),
        }
    }
}

impl ServiceConfig for VehicleGatewayConfig {
    const PREFIX: &'static str = "VEHICLE_GATEWAY_";

    fn apply_environment_overrides(&mut self, prefix: &str) {
        override_string(&mut self.bind_address, &format!("{prefix}BIND_ADDRESS"));
        override_parsed(&mut self.port, &format!("{prefix}PORT"));
        override_string(&mut self.webhook.webhook_id, &format!("{prefix}WEBHOOK_ID"));
        if let Some(token) = nna_config::env_string(&format!("{prefix}MANAGEMENT_TOKEN")) {
            self.webhook.management_token = WebhookSecret::new(token);
        }

        let smartcar = &mut self.smartcar;
        override_string(&mut smartcar.api_base, &format!("{prefix}SMARTCAR_API_BASE"));
        override_string(&mut smartcar.auth_url, &format!("{prefix}SMARTCAR_AUTH_URL"));
        override_string(&mut smartcar.client_id, &format!("{prefix}SMARTCAR_CLIENT_ID"));
        override_string(
            &mut smartcar.client_secret,
            &format!("{prefix}SMARTCAR_CLIENT_SECRET"),
        );
        override_string(
            &mut smartcar.access_token,
            &format!("{prefix}SMARTCAR_ACCESS_TOKEN"),
        );
        if let Some(token) = nna_config::env_string(&format!("{prefix}SMARTCAR_REFRESH_TOKEN")) {
            smartcar.refresh_token = Some(token);
        }
        override_parsed(
            &mut smartcar.request_timeout_secs,
            &format!("{prefix}SMARTCAR_TIMEOUT_SECS"),
        );

        override_parsed(&mut self.unit_system, &format!("{prefix}UNIT_SYSTEM"));
        override_parsed(
            &mut self.poll_interval_secs,
            &format!("{prefix}POLL_INTERVAL_SECS"),
        );
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook.webhook_id.trim().is_empty() {
            return Err(ConfigError::Invalid("webhook_id must not be empty".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be positive".into(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be positive".into()));
        }
        Ok(())
    }
}
