mod config;

use clap::{Parser, Subcommand};
use config::{CommonConfig, Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const METRICS_PREFIX: &str = "wateruse";

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve water usage forecasts computed by the calculation module
    Gateway {
        #[arg(long, default_value = "config.yaml")]
        config_file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Gateway { config_file } => {
            let config = match Config::from_file(&config_file) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{}: {e}", config_file.display());
                    process::exit(1);
                }
            };

            let _sentry = init_logging(config.common.logging.as_ref());
            init_metrics(&config.common);

            let Some(gateway_config) = config.gateway else {
                tracing::error!("No gateway section in {}", config_file.display());
                process::exit(1);
            };

            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!(error = %e, "Could not start runtime");
                    process::exit(1);
                }
            };

            tracing::info!("Starting forecast gateway");
            if let Err(e) = runtime.block_on(gateway::run(gateway_config)) {
                tracing::error!(error = %e, "Forecast gateway failed");
                process::exit(1);
            }
            tracing::info!("Forecast gateway stopped");
        }
    }
}

/// Logs to stdout, and to Sentry when a DSN is configured. The returned guard
/// flushes pending Sentry events when dropped.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let sentry = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    sentry
}

fn init_metrics(common: &CommonConfig) {
    let Some(MetricsConfig {
        statsd_host,
        statsd_port,
    }) = &common.metrics
    else {
        return;
    };

    let recorder = match StatsdBuilder::from(statsd_host.as_str(), *statsd_port)
        .build(Some(METRICS_PREFIX))
    {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::error!(error = %e, "Could not create StatsD recorder, metrics are disabled");
            return;
        }
    };

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::error!("A metrics recorder is already installed");
        return;
    }
    shared::metrics_defs::describe_all(gateway::metrics_defs::ALL_METRICS);
}
