use std::sync::Arc;

use crate::{api::sync::EventBusSyncReporter, config::Config, events::EventBus};
use advisor_gateway::{FileStore, Gateway, GatewayConfig};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub event_bus: EventBus,
}

pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

fn load_gateway_config(config: &Config) -> anyhow::Result<GatewayConfig> {
    let mut gateway_config = match &config.providers_file {
        Some(path) => {
            tracing::info!("Loading providers from {}", path.display());
            GatewayConfig::from_file(path)?
        }
        None => GatewayConfig::default(),
    };
    if let Some(timeout) = config.request_timeout {
        gateway_config.default_options.timeout = timeout;
    }
    Ok(gateway_config)
}

/// Build the gateway over the file-backed store and start its background tasks.
pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let gateway_config = load_gateway_config(config)?;
    tracing::info!("State file in use: {}", config.state_file.display());
    let store = FileStore::new(config.state_file.clone(), config.secret_key.as_deref())?;

    let event_bus = EventBus::new(256);
    let gateway = Gateway::builder(gateway_config)
        .store(Arc::new(store))
        .reporter(Arc::new(EventBusSyncReporter::new(event_bus.clone())))
        .build()?;
    gateway.start();

    Ok(Arc::new(AppState {
        gateway: Arc::new(gateway),
        event_bus,
    }))
}
