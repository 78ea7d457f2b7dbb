//! Texnouz CPO Service
//!
//! Boots one charging station operator and streams its outward events to the log.
//! Reads configuration from TOML file (~/.config/texnouz-cpo/config.toml).

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use texnouz_cpo::application::{Identifiable, RoamingNetwork};
use texnouz_cpo::config::LoggingConfig;
use texnouz_cpo::domain::OperatorId;
use texnouz_cpo::{
    create_event_bus, default_config_path, AppConfig, ChargingStationOperator, InMemoryRoamingNetwork,
    NodeDraft, OperatorSettings,
};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Load configuration ─────────────────────────────────────
    let config_path = std::env::var("CPO_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let app_cfg = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            init_tracing(&cfg.logging);
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            error!("Failed to load config: {}. Using defaults.", e);
            AppConfig::default()
        }
    };

    info!("Starting Texnouz CPO service...");

    // ── Prometheus metrics (must be installed before any metrics calls) ──
    if app_cfg.metrics.enabled {
        let listen: SocketAddr = app_cfg.metrics.listen.parse()?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(listen)
            .install()?;
        info!(%listen, "Prometheus exporter listening");
    }

    // ── Operator ───────────────────────────────────────────────
    let events = create_event_bus(app_cfg.events.channel_capacity);
    let operator_id: OperatorId = app_cfg.operator.id.parse()?;
    let operator = ChargingStationOperator::new(
        operator_id,
        NodeDraft::named("en", &app_cfg.operator.name),
        OperatorSettings::from(&app_cfg),
        events.clone(),
    );

    let roaming: Arc<dyn RoamingNetwork> = Arc::new(InMemoryRoamingNetwork::default());
    operator.set_roaming_network(Some(roaming));

    // ── Event log ──────────────────────────────────────────────
    let mut subscriber = events.subscribe();
    let event_log = tokio::spawn(async move {
        while let Some(message) = subscriber.recv().await {
            info!(
                event = message.event.event_type(),
                subject = message.event.subject_id(),
                "{}",
                serde_json::to_string(&message).unwrap_or_default()
            );
        }
    });

    info!(operator_id = %operator.id(), "Operator ready. Press Ctrl-C to stop.");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
    }

    event_log.abort();
    info!("Texnouz CPO service stopped");
    Ok(())
}
