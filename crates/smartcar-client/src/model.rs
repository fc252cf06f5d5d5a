use serde::{Deserialize, Serialize};

/// Vehicle attributes as reported by `GET /vehicles/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub vin: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

impl Vehicle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            make: None,
            model: None,
            year: None,
            vin: None,
            nickname: None,
        }
    }

    /// Nickname, else "year make model", else VIN, else the Smartcar id.
    pub fn display_name(&self) -> String {
        if let Some(nickname) = self.nickname.as_deref().filter(|name| !name.is_empty()) {
            return nickname.to_string();
        }
        if let (Some(year), Some(make), Some(model)) = (self.year, &self.make, &self.model) {
            return format!("{year} {make} {model}");
        }
        self.vin.clone().unwrap_or_else(|| self.id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityAction {
    Lock,
    Unlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeAction {
    Start,
    Stop,
}

#[derive(Debug, Serialize)]
pub(crate) struct ActionRequest<A> {
    pub action: A,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VehicleList {
    pub vehicles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PermissionList {
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_nickname() {
        let mut vehicle = Vehicle::new("abc");
        vehicle.year = Some(2023);
        vehicle.make = Some("NISSAN".into());
        vehicle.model = Some("Ariya".into());
        assert_eq!(vehicle.display_name(), "2023 NISSAN Ariya");

        vehicle.nickname = Some("Blue".into());
        assert_eq!(vehicle.display_name(), "Blue");
    }

    #[test]
    fn display_name_falls_back_to_vin_then_id() {
        let mut vehicle = Vehicle::new("abc");
        vehicle.make = Some("NISSAN".into());
        assert_eq!(vehicle.display_name(), "abc");
        vehicle.vin = Some("1N4AZ1CP0JC300000".into());
        assert_eq!(vehicle.display_name(), "1N4AZ1CP0JC300000");
    }

    #[test]
    fn actions_serialize_in_smartcar_casing() {
        let body = serde_json::to_value(ActionRequest {
            action: SecurityAction::Unlock,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "action": "UNLOCK" }));
        assert_eq!(
            serde_json::to_value(ChargeAction::Start).unwrap(),
            serde_json::json!("START")
        );
    }
}
