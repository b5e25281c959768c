//! Scheduler Tester - Kubernetes scheduling latency probe
//!
//! Repeatedly deploys a canary whose replicas must land on distinct nodes,
//! measures how long they take to become ready, exports that as Prometheus
//! metrics and deletes the canary again.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tester_lib::{
    observability::static_info, shutdown, sweep_leftovers, ClusterClient, CycleController,
    HealthRegistry, KubeClusterClient, ProbeScheduler, StructuredLogger, TesterMetrics,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::{Cli, LogFormat, Settings};

const TESTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli).context("failed to load configuration")?;

    init_tracing(&settings);

    let test_config = settings.test_config()?;
    let interval = settings.interval()?;

    let logger = StructuredLogger::new(&test_config.namespace);
    logger.log_startup(TESTER_VERSION, settings.single);

    let client = KubeClusterClient::connect(&settings.connect_options()).await?;
    let server_version = client.ping().await?;
    info!(server_version = %server_version, "Connected to Kubernetes API server");
    let cluster: Arc<dyn ClusterClient> = Arc::new(client);

    let metrics = TesterMetrics::new()?;
    let health_registry = HealthRegistry::new(settings.failure_threshold);

    if !settings.single {
        metrics.set_static_info(&static_info(&test_config, interval, TESTER_VERSION))?;

        let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
        let listener = api::bind(settings.prometheus_port).await?;
        tokio::spawn(async move {
            if let Err(e) = api::serve(listener, app_state).await {
                error!(error = %e, "Metrics server stopped");
            }
        });
    }

    sweep_leftovers(cluster.as_ref(), &test_config.namespace).await?;
    health_registry.set_ready(true).await;

    let (trigger, mut shutdown_rx) = shutdown::channel();
    let signal_logger = logger.clone();
    tokio::spawn(async move {
        let reason = shutdown_signal().await;
        signal_logger.log_shutdown(reason);
        trigger.trigger();
    });

    let controller = CycleController::new(cluster, test_config, metrics);
    let scheduler = ProbeScheduler::new(controller, interval, health_registry);

    if settings.single {
        let report = scheduler.run_once(&mut shutdown_rx).await?;
        info!(
            deployment = %report.deployment,
            result = ?report.result,
            cleaned_up = report.cleaned_up,
            "Single run complete"
        );
    } else {
        scheduler.run(shutdown_rx).await;
    }

    Ok(())
}

fn init_tracing(settings: &Settings) {
    let level = if settings.debug || settings.wirelog {
        "debug"
    } else {
        "info"
    };
    // Client internals stay quiet unless wire logging is on
    let client_level = if settings.wirelog { "debug" } else { "warn" };
    let default_filter = format!(
        "{level},kube={client_level},kube_client={client_level},hyper={client_level},tower={client_level}"
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match settings.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init(),
    }
}

/// Resolves on SIGINT or SIGTERM, naming the signal received
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => "SIGINT received",
            Err(e) => {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM received"
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        reason = ctrl_c => reason,
        reason = terminate => reason,
    }
}
