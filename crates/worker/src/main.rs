//! Casework worker binary.
//!
//! Runs the async executor against PostgreSQL, optionally receiving jobs
//! via NATS.

use anyhow::Result;
use casework_engine::ProcessEngine;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use casework_worker::{Worker, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,casework_engine=debug,casework_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    tracing::info!("Starting Casework worker");

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        worker_id = %config.worker_id,
        dispatch = ?config.dispatch,
        "Worker configuration loaded"
    );

    let builder = ProcessEngine::builder().delegate_fn("log-variables", |variables| {
        tracing::info!(variables = %serde_json::Value::Object(variables.clone()), "Service task");
        Ok(())
    });

    let worker = Worker::new(config, builder).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    let result = tokio::select! {
        result = worker.run() => result,
        _ = shutdown => Ok(()),
    };

    worker.shutdown().await;

    if let Err(e) = &result {
        tracing::error!(error = %e, "Worker error");
    }
    tracing::info!("Worker stopped");
    result
}
