//! Static catalog of the vehicle signals and the entities built on them.
//!
//! At setup the gateway asks Smartcar which signals a vehicle reports and
//! which permissions the owner granted, then [`negotiate`] picks the entities
//! worth creating. Dispatch never consults the catalog.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Sensor,
    BinarySensor,
    DeviceTracker,
    Lock,
    Switch,
    Number,
}

impl Platform {
    /// Platforms that issue commands to the vehicle.
    pub fn is_control(self) -> bool {
        matches!(self, Platform::Lock | Platform::Switch | Platform::Number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Battery,
    Distance,
    Pressure,
    Door,
    Window,
    Lock,
    Connectivity,
    Plug,
    Heat,
}

/// Static description of one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySpec {
    pub key: &'static str,
    pub name: &'static str,
    pub platform: Platform,
    pub paths: &'static [&'static str],
    /// Metric unit of the upstream value, if numeric.
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub icon: Option<&'static str>,
    pub permission: Option<&'static str>,
}

pub const READ_BATTERY: &str = "read_battery";
pub const READ_CHARGE: &str = "read_charge";
pub const READ_ODOMETER: &str = "read_odometer";
pub const READ_TIRES: &str = "read_tires";
pub const READ_SECURITY: &str = "read_security";
pub const READ_LOCATION: &str = "read_location";
pub const CONTROL_SECURITY: &str = "control_security";
pub const CONTROL_CHARGE: &str = "control_charge";

const fn sensor(
    key: &'static str,
    name: &'static str,
    paths: &'static [&'static str],
    unit: Option<&'static str>,
    device_class: Option<DeviceClass>,
    permission: &'static str,
) -> EntitySpec {
    EntitySpec {
        key,
        name,
        platform: Platform::Sensor,
        paths,
        unit,
        device_class,
        icon: None,
        permission: Some(permission),
    }
}

const fn binary(
    key: &'static str,
    name: &'static str,
    paths: &'static [&'static str],
    device_class: Option<DeviceClass>,
    icon: &'static str,
    permission: Option<&'static str>,
) -> EntitySpec {
    EntitySpec {
        key,
        name,
        platform: Platform::BinarySensor,
        paths,
        unit: None,
        device_class,
        icon: Some(icon),
        permission,
    }
}

const SECURITY: Option<&str> = Some(READ_SECURITY);
const CHARGE: Option<&str> = Some(READ_CHARGE);

pub static CATALOG: &[EntitySpec] = &[
    sensor(
        "battery_level",
        "Battery Level",
        &["battery.percentRemaining"],
        Some("%"),
        Some(DeviceClass::Battery),
        READ_BATTERY,
    ),
    sensor(
        "range",
        "Range",
        &["battery.range"],
        Some("km"),
        Some(DeviceClass::Distance),
        READ_BATTERY,
    ),
    sensor(
        "odometer",
        "Odometer",
        &["odometer"],
        Some("km"),
        Some(DeviceClass::Distance),
        READ_ODOMETER,
    ),
    sensor(
        "charging_status",
        "Charging Status",
        &["charge.state"],
        None,
        None,
        READ_CHARGE,
    ),
    sensor(
        "plug_status",
        "Plug Status",
        &["charge.isPluggedIn"],
        None,
        None,
        READ_CHARGE,
    ),
    sensor(
        "charge_limit_level",
        "Charge Limit",
        &["charge.limit"],
        Some("%"),
        Some(DeviceClass::Battery),
        READ_CHARGE,
    ),
    sensor(
        "tire_pressure_front_left",
        "Tire Pressure Front Left",
        &["tires.frontLeft"],
        Some("kPa"),
        Some(DeviceClass::Pressure),
        READ_TIRES,
    ),
    sensor(
        "tire_pressure_front_right",
        "Tire Pressure Front Right",
        &["tires.frontRight"],
        Some("kPa"),
        Some(DeviceClass::Pressure),
        READ_TIRES,
    ),
    sensor(
        "tire_pressure_back_left",
        "Tire Pressure Back Left",
        &["tires.backLeft"],
        Some("kPa"),
        Some(DeviceClass::Pressure),
        READ_TIRES,
    ),
    sensor(
        "tire_pressure_back_right",
        "Tire Pressure Back Right",
        &["tires.backRight"],
        Some("kPa"),
        Some(DeviceClass::Pressure),
        READ_TIRES,
    ),
    sensor(
        "location",
        "Location",
        &["location"],
        None,
        None,
        READ_LOCATION,
    ),
    binary(
        "front_left_door",
        "Front Left Door",
        &["closure.doors.frontLeft.isOpen"],
        Some(DeviceClass::Door),
        "mdi:car-door",
        SECURITY,
    ),
    binary(
        "front_right_door",
        "Front Right Door",
        &["closure.doors.frontRight.isOpen"],
        Some(DeviceClass::Door),
        "mdi:car-door",
        SECURITY,
    ),
    binary(
        "back_left_door",
        "Back Left Door",
        &["closure.doors.backLeft.isOpen"],
        Some(DeviceClass::Door),
        "mdi:car-door",
        SECURITY,
    ),
    binary(
        "back_right_door",
        "Back Right Door",
        &["closure.doors.backRight.isOpen"],
        Some(DeviceClass::Door),
        "mdi:car-door",
        SECURITY,
    ),
    binary(
        "front_left_door_lock",
        "Front Left Door Lock",
        &["closure.doors.frontLeft.isLocked"],
        Some(DeviceClass::Lock),
        "mdi:lock",
        SECURITY,
    ),
    binary(
        "front_right_door_lock",
        "Front Right Door Lock",
        &["closure.doors.frontRight.isLocked"],
        Some(DeviceClass::Lock),
        "mdi:lock",
        SECURITY,
    ),
    binary(
        "back_left_door_lock",
        "Back Left Door Lock",
        &["closure.doors.backLeft.isLocked"],
        Some(DeviceClass::Lock),
        "mdi:lock",
        SECURITY,
    ),
    binary(
        "back_right_door_lock",
        "Back Right Door Lock",
        &["closure.doors.backRight.isLocked"],
        Some(DeviceClass::Lock),
        "mdi:lock",
        SECURITY,
    ),
    binary(
        "front_left_window",
        "Front Left Window",
        &["closure.windows.frontLeft.isOpen"],
        Some(DeviceClass::Window),
        "mdi:window-closed",
        SECURITY,
    ),
    binary(
        "front_right_window",
        "Front Right Window",
        &["closure.windows.frontRight.isOpen"],
        Some(DeviceClass::Window),
        "mdi:window-closed",
        SECURITY,
    ),
    binary(
        "back_left_window",
        "Back Left Window",
        &["closure.windows.backLeft.isOpen"],
        Some(DeviceClass::Window),
        "mdi:window-closed",
        SECURITY,
    ),
    binary(
        "back_right_window",
        "Back Right Window",
        &["closure.windows.backRight.isOpen"],
        Some(DeviceClass::Window),
        "mdi:window-closed",
        SECURITY,
    ),
    binary(
        "front_trunk",
        "Front Trunk",
        &["closure.frontTrunk.isOpen"],
        Some(DeviceClass::Door),
        "mdi:car-door",
        SECURITY,
    ),
    binary(
        "front_trunk_lock",
        "Front Trunk Lock",
        &["closure.frontTrunk.isLocked"],
        Some(DeviceClass::Lock),
        "mdi:lock",
        SECURITY,
    ),
    binary(
        "rear_trunk",
        "Rear Trunk",
        &["closure.rearTrunk.isOpen"],
        Some(DeviceClass::Door),
        "mdi:car-door",
        SECURITY,
    ),
    binary(
        "rear_trunk_lock",
        "Rear Trunk Lock",
        &["closure.rearTrunk.isLocked"],
        Some(DeviceClass::Lock),
        "mdi:lock",
        SECURITY,
    ),
    binary(
        "sunroof",
        "Sunroof",
        &["closure.sunroof.isOpen"],
        Some(DeviceClass::Window),
        "mdi:window-closed",
        SECURITY,
    ),
    binary(
        "engine_cover",
        "Engine Cover",
        &["closure.engineCover.isOpen"],
        Some(DeviceClass::Door),
        "mdi:car-door",
        SECURITY,
    ),
    binary(
        "battery_heater",
        "Battery Heater Active",
        &["tractionBattery.isHeaterActive"],
        Some(DeviceClass::Heat),
        "mdi:fire",
        None,
    ),
    binary(
        "online",
        "Online",
        &["connectivity.isOnline"],
        Some(DeviceClass::Connectivity),
        "mdi:wifi",
        None,
    ),
    binary(
        "asleep",
        "Asleep",
        &["connectivity.isAsleep"],
        None,
        "mdi:sleep",
        None,
    ),
    binary(
        "digital_key_paired",
        "Digital Key Paired",
        &["connectivity.isDigitalKeyPaired"],
        None,
        "mdi:key",
        None,
    ),
    binary(
        "surveillance",
        "Surveillance Enabled",
        &["surveillance.isEnabled"],
        None,
        "mdi:cctv",
        None,
    ),
    binary(
        "fast_charger_connected",
        "Fast Charger Connected",
        &["charge.isFastChargerConnected"],
        None,
        "mdi:lightning-bolt",
        CHARGE,
    ),
    binary(
        "plugged_in",
        "Charging Cable Plugged In",
        &["charge.isPluggedIn"],
        Some(DeviceClass::Plug),
        "mdi:power-plug",
        CHARGE,
    ),
    EntitySpec {
        key: "tracker",
        name: "Location",
        platform: Platform::DeviceTracker,
        paths: &["location"],
        unit: None,
        device_class: None,
        icon: Some("mdi:car"),
        permission: Some(READ_LOCATION),
    },
    EntitySpec {
        key: "door_lock",
        name: "Door Lock",
        platform: Platform::Lock,
        paths: &["closure.isLocked"],
        unit: None,
        device_class: None,
        icon: Some("mdi:car-key"),
        permission: Some(CONTROL_SECURITY),
    },
    EntitySpec {
        key: "charging",
        name: "Charging",
        platform: Platform::Switch,
        paths: &["charge.state"],
        unit: None,
        device_class: None,
        icon: Some("mdi:ev-station"),
        permission: Some(CONTROL_CHARGE),
    },
    EntitySpec {
        key: "charge_limit",
        name: "Charge Limit",
        platform: Platform::Number,
        paths: &["charge.limit"],
        unit: Some("%"),
        device_class: Some(DeviceClass::Battery),
        icon: Some("mdi:battery-charging-80"),
        permission: Some(CONTROL_CHARGE),
    },
];

static SIGNAL_PATHS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    CATALOG
        .iter()
        .flat_map(|spec| spec.paths.iter().copied())
        .collect()
});

/// Every signal path some entity can subscribe to.
pub fn signal_paths() -> &'static BTreeSet<&'static str> {
    &SIGNAL_PATHS
}

pub fn is_known(path: &str) -> bool {
    SIGNAL_PATHS.contains(path)
}

pub fn entity_spec(key: &str) -> Option<&'static EntitySpec> {
    CATALOG.iter().find(|spec| spec.key == key)
}

/// Pick the entities to create for one vehicle.
///
/// `None` means the upstream lookup failed. An empty signal list is treated
/// like an unknown one, so entities are created and stay unavailable until
/// data arrives. Control entities always need their permission granted.
pub fn negotiate(
    available_signals: Option<&BTreeSet<String>>,
    permissions: Option<&BTreeSet<String>>,
) -> Vec<&'static EntitySpec> {
    let available_signals = available_signals.filter(|signals| !signals.is_empty());
    CATALOG
        .iter()
        .filter(|spec| permitted(spec, permissions))
        .filter(|spec| match available_signals {
            Some(signals) => spec.paths.iter().any(|path| signals.contains(*path)),
            None => true,
        })
        .collect()
}

fn permitted(spec: &EntitySpec, permissions: Option<&BTreeSet<String>>) -> bool {
    let Some(required) = spec.permission else {
        return true;
    };
    match permissions {
        Some(granted) => granted.contains(required),
        None => !spec.platform.is_control(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn keys(specs: &[&EntitySpec]) -> Vec<&'static str> {
        specs.iter().map(|spec| spec.key).collect()
    }

    #[test]
    fn catalog_keys_are_unique() {
        let unique: BTreeSet<_> = CATALOG.iter().map(|spec| spec.key).collect();
        assert_eq!(unique.len(), CATALOG.len());
    }

    #[test]
    fn every_spec_subscribes_to_something() {
        assert!(CATALOG.iter().all(|spec| !spec.paths.is_empty()));
        assert!(is_known("battery.percentRemaining"));
        assert!(is_known("closure.doors.backRight.isLocked"));
        assert!(!is_known("battery"));
    }

    #[test]
    fn binary_sensors_cover_the_vehicle_flags() {
        let count = CATALOG
            .iter()
            .filter(|spec| spec.platform == Platform::BinarySensor)
            .count();
        assert_eq!(count, 25);
    }

    #[test]
    fn known_signals_gate_entity_creation() {
        let signals = set(&["battery.percentRemaining", "connectivity.isOnline"]);
        let permissions = set(&[READ_BATTERY]);
        let created = negotiate(Some(&signals), Some(&permissions));
        assert_eq!(keys(&created), vec!["battery_level", "online"]);
    }

    #[test]
    fn missing_permission_blocks_available_signal() {
        let signals = set(&["odometer"]);
        let created = negotiate(Some(&signals), Some(&set(&[READ_BATTERY])));
        assert!(created.is_empty());
    }

    #[test]
    fn unknown_signals_fall_back_to_permissions() {
        let permissions = set(&[READ_TIRES, CONTROL_CHARGE]);
        let created = keys(&negotiate(Some(&BTreeSet::new()), Some(&permissions)));
        assert!(created.contains(&"tire_pressure_front_left"));
        assert!(created.contains(&"charging"));
        assert!(created.contains(&"charge_limit"));
        assert!(created.contains(&"surveillance"));
        assert!(!created.contains(&"odometer"));
        assert!(!created.contains(&"door_lock"));
    }

    #[test]
    fn nothing_known_creates_every_read_entity_but_no_controls() {
        let created = negotiate(None, None);
        assert!(created.iter().all(|spec| !spec.platform.is_control()));
        assert_eq!(
            created.len(),
            CATALOG.iter().filter(|spec| !spec.platform.is_control()).count()
        );
    }

    #[test]
    fn lookup_by_key() {
        let spec = entity_spec("charge_limit").expect("charge limit spec");
        assert_eq!(spec.platform, Platform::Number);
        assert_eq!(spec.permission, Some(CONTROL_CHARGE));
        assert!(entity_spec("missing").is_none());
    }
}
