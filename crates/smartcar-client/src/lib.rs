//! Async client for the Smartcar vehicle API: discovery, status polling and
//! remote commands, with one transparent token refresh on 401.

mod client;
mod error;
mod model;

pub use client::{SmartcarClient, SmartcarConfig, VehicleApi, DEFAULT_API_BASE, DEFAULT_AUTH_URL};
pub use error::{Result, SmartcarError};
pub use model::{ChargeAction, SecurityAction, Vehicle};
