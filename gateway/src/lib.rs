mod auth;
mod bridge;
mod broker;
pub mod config;
mod correlation;
pub mod errors;
mod handler;
pub mod metrics_defs;
mod model;
mod store;
mod validator;

#[cfg(test)]
mod testutils;

use bridge::{Bridge, PendingReplies};
use broker::BusClient;
use config::Config;
use errors::GatewayError;
use handler::ForecastService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use store::PostgresStore;
use tokio::sync::watch;
use validator::IdentifierValidator;

/// Connects to the reference store and the message broker, then serves the
/// forecast endpoint and the admin endpoints until the process is asked to stop.
pub async fn run(config: Config) -> Result<(), GatewayError> {
    config.validate()?;

    let store = PostgresStore::new(&config.store)?;
    store.check_connection().await?;
    tracing::info!("Connected to reference store");

    let pending = Arc::new(PendingReplies::new());
    let bus = Arc::new(BusClient::connect(&config.broker, pending.clone()).await?);

    let forecast_service = ForecastService::new(
        IdentifierValidator::new(Arc::new(store)),
        Bridge::new(pending, bus.clone(), config.calculation.timeout()),
        config.authorization.clone(),
        config.calculation.forecast_size,
    );
    let admin_service = AdminService::new(bus.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let served = tokio::try_join!(
        run_http_service(
            &config.listener.host,
            config.listener.port,
            forecast_service,
            stopped(shutdown_rx.clone()),
        ),
        run_http_service(
            &config.admin_listener.host,
            config.admin_listener.port,
            admin_service,
            stopped(shutdown_rx),
        ),
    );

    if let Err(e) = bus.shutdown().await {
        tracing::warn!(error = %e, "Could not close message broker connection cleanly");
    }
    served?;
    Ok(())
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
    // An error means the sender is gone, which only happens once it has fired.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopped_resolves_once_signalled() {
        let (tx, rx) = watch::channel(false);
        let waiting = tokio::spawn(stopped(rx));
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        tx.send(true).unwrap();
        waiting.await.unwrap();
    }

    #[tokio::test]
    async fn invalid_config_fails_before_connecting() {
        let yaml = r#"
            listener: {host: 0.0.0.0, port: 0}
            admin_listener: {host: 127.0.0.1, port: 8001}
            broker: {url: "amqp://localhost:5672/%2f"}
            store: {url: "postgres://localhost/wisdom"}
        "#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            run(config).await,
            Err(GatewayError::Config(config::ValidationError::InvalidPort))
        ));
    }
}
