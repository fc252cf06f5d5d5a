//! Metric to imperial conversion for displayed entity values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const KM_TO_MI: f64 = 0.621371;
const L_TO_GAL: f64 = 0.264172;
const KPA_TO_PSI: f64 = 0.145038;
const BAR_TO_PSI: f64 = 14.5038;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

impl UnitSystem {
    /// Convert a value reported in `metric_unit`. Imperial results are
    /// rounded to two decimals; units without an imperial form pass through.
    pub fn convert(self, value: f64, metric_unit: &str) -> f64 {
        convert(value, metric_unit, self)
    }

    pub fn display_unit(self, metric_unit: &str) -> &str {
        display_unit(metric_unit, self)
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitSystem::Metric => f.write_str("metric"),
            UnitSystem::Imperial => f.write_str("imperial"),
        }
    }
}

impl FromStr for UnitSystem {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "metric" => Ok(UnitSystem::Metric),
            "imperial" => Ok(UnitSystem::Imperial),
            other => Err(format!("unknown unit system {other:?}")),
        }
    }
}

pub fn convert(value: f64, metric_unit: &str, system: UnitSystem) -> f64 {
    if system == UnitSystem::Metric {
        return value;
    }
    let converted = match metric_unit {
        "km" | "km/h" => value * KM_TO_MI,
        "L" => value * L_TO_GAL,
        "°C" => value * 9.0 / 5.0 + 32.0,
        "kPa" => value * KPA_TO_PSI,
        "bar" => value * BAR_TO_PSI,
        _ => return value,
    };
    (converted * 100.0).round() / 100.0
}

pub fn display_unit(metric_unit: &str, system: UnitSystem) -> &str {
    if system == UnitSystem::Metric {
        return metric_unit;
    }
    match metric_unit {
        "km" => "mi",
        "km/h" => "mph",
        "L" => "gal",
        "°C" => "°F",
        "kPa" | "bar" => "psi",
        other => other,
    }
}
