use std::sync::Arc;

use nna_config::load;
use nna_obs::ObsInit;
use smartcar_client::{SmartcarClient, VehicleApi};
use tokio::net::TcpListener;
use vehicle_gateway::config::VehicleGatewayConfig;
use vehicle_gateway::{build_router, poller, AppState, SERVICE_NAME};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn build_sha() -> &'static str {
    option_env!("BUILD_SHA").unwrap_or("unknown")
}

fn build_time() -> &'static str {
    option_env!("BUILD_TIME").unwrap_or("unknown")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ObsInit::init(SERVICE_NAME).map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;

    let config = load::<VehicleGatewayConfig>()?;
    let addr = config.socket_addr()?;
    tracing::info!(
        event = "service_start",
        service = SERVICE_NAME,
        version = VERSION,
        build_sha = build_sha(),
        build_time = build_time(),
        listen_addr = %addr,
        webhook_path = %config.webhook_path(),
        unit_system = %config.unit_system,
        "starting service"
    );
    if config.webhook.management_token.is_empty() {
        tracing::warn!("management token not configured, webhook deliveries will be rejected");
    }

    let api: Arc<dyn VehicleApi> = Arc::new(SmartcarClient::new(config.smartcar_config())?);
    let state = Arc::new(AppState::new(&config, api));
    let _poller = poller::spawn(state.clone(), config.poll_interval());

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state).into_make_service()).await?;

    tracing::info!(event = "service_stop", service = SERVICE_NAME);
    Ok(())
}
