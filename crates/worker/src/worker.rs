//! Worker lifecycle management.

use anyhow::{Context, Result};
use casework_engine::executor::{ConsumeOutcome, JobOutcome};
use casework_engine::model::Deployment;
use casework_engine::{
    AsyncExecutor, DispatchMode, EngineStore, MessageJobConsumer, ProcessEngine,
    ProcessEngineBuilder, SemaphoreWorkerPool,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::{DispatchKind, WorkerConfig};
use crate::db::{create_pool, ensure_schema, health_check, PgStore};
use crate::nats::{subscriber, JobSubscriber, NatsError, NatsJobPublisher};

/// Delay before a message whose claim was released is redelivered.
const REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// One worker process: the async executor loops plus, in NATS mode, a
/// consumer for job messages.
pub struct Worker {
    config: WorkerConfig,

    engine: ProcessEngine,

    /// Timer, reset-expired and (when polling) acquisition loops.
    executor: AsyncExecutor,

    /// Present in NATS mode.
    subscriber: Option<JobSubscriber>,

    /// Bounds concurrently running message-driven jobs.
    semaphore: Arc<Semaphore>,
}

impl Worker {
    /// Create a worker. `builder` carries the delegates and any definitions
    /// deployed in code; store, config and dispatch are set here.
    pub async fn new(mut config: WorkerConfig, builder: ProcessEngineBuilder) -> Result<Self> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        config.engine.lock_owner = config.lock_owner(&hostname);

        let pool = create_pool(&config.database).await?;
        if !health_check(&pool).await {
            anyhow::bail!("database health check failed");
        }
        ensure_schema(&pool).await?;
        let store: Arc<dyn EngineStore> = Arc::new(PgStore::new(pool));

        let mut builder = builder.store(store).config(config.engine.clone());

        let subscriber = match config.dispatch {
            DispatchKind::Polling => None,
            DispatchKind::Nats => {
                let client = async_nats::connect(&config.nats_url)
                    .await
                    .map_err(|e| NatsError::Connection(format!("{}: {}", config.nats_url, e)))?;
                let publisher =
                    NatsJobPublisher::new(client.clone(), &config.nats_subject, &config.nats_stream)
                        .await?;
                builder = builder.dispatch_mode(DispatchMode::Message(Arc::new(publisher)));

                let subscriber = JobSubscriber::from_client(
                    client,
                    &config.nats_stream,
                    &config.nats_consumer,
                    &config.nats_subject,
                )
                .await?;
                Some(subscriber)
            }
        };

        if let Some(path) = &config.definitions_path {
            let deployment = load_deployment(path)?;
            tracing::info!(
                path = %path.display(),
                processes = deployment.processes.len(),
                cases = deployment.cases.len(),
                "Loaded definitions"
            );
            builder = builder.deployment(deployment);
        }

        let engine = builder.build()?;

        let worker_pool = Arc::new(SemaphoreWorkerPool::new(config.engine.max_concurrent_jobs));
        let mut executor = engine.async_executor(worker_pool);
        if subscriber.is_some() {
            executor = executor.without_job_acquisition();
        }

        let semaphore = Arc::new(Semaphore::new(config.engine.max_concurrent_jobs.max(1)));

        tracing::info!(
            worker_id = %config.worker_id,
            lock_owner = %config.engine.lock_owner,
            dispatch = ?config.dispatch,
            hostname = %hostname,
            "Worker initialized"
        );

        Ok(Self {
            config,
            engine,
            executor,
            subscriber,
            semaphore,
        })
    }

    pub fn engine(&self) -> &ProcessEngine {
        &self.engine
    }

    /// Run the worker until the future is dropped.
    pub async fn run(&self) -> Result<()> {
        self.executor.start();

        match &self.subscriber {
            Some(subscriber) => self.process_messages(subscriber).await,
            None => {
                tracing::info!(worker_id = %self.config.worker_id, "Polling for jobs");
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    /// Stop the executor loops and wait for them.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
        tracing::info!(worker_id = %self.config.worker_id, "Worker shut down");
    }

    /// Claim and run jobs announced on NATS.
    async fn process_messages(&self, subscriber: &JobSubscriber) -> Result<()> {
        tracing::info!(consumer = %subscriber.consumer_name(), "Consuming job messages");
        let consumer = self.engine.message_consumer();

        loop {
            // Wait for available slot
            let permit = self.semaphore.clone().acquire_owned().await?;

            let received = match subscriber.receive().await {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to receive job message");
                    drop(permit);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            match received {
                Some((message, msg)) => {
                    tracing::debug!(
                        job_id = %message.job_id,
                        handler_type = %message.handler_type,
                        "Received job message"
                    );

                    let consumer = consumer.clone();
                    tokio::spawn(async move {
                        // Keep permit until done
                        let _permit = permit;
                        settle(&consumer, message, msg).await;
                    });
                }
                None => {
                    drop(permit);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn settle(
    consumer: &MessageJobConsumer,
    message: casework_engine::JobMessage,
    msg: async_nats::jetstream::Message,
) {
    let redeliver = match consumer.consume(&message).await {
        Ok(ConsumeOutcome::Executed(JobOutcome::Released)) => true,
        Ok(outcome) => {
            tracing::debug!(job_id = %message.job_id, outcome = ?outcome, "Job message handled");
            false
        }
        Err(e) => {
            tracing::error!(job_id = %message.job_id, error = %e, "Job message failed");
            true
        }
    };

    let result = if redeliver {
        subscriber::nack(&msg, Some(REDELIVERY_DELAY)).await
    } else {
        subscriber::ack(&msg).await
    };
    if let Err(e) = result {
        tracing::warn!(job_id = %message.job_id, error = %e, "Failed to settle job message");
    }
}

/// Read a JSON deployment file.
pub fn load_deployment(path: &Path) -> Result<Deployment> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let deployment = serde_json::from_str(&raw)
        .with_context(|| format!("invalid deployment in {}", path.display()))?;
    Ok(deployment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_deployment_reads_json() {
        let path = std::env::temp_dir().join(format!("casework-{}.json", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"processes": [], "cases": []}}"#).unwrap();

        let deployment = load_deployment(&path).unwrap();
        assert!(deployment.processes.is_empty());
        assert!(deployment.cases.is_empty());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_deployment_reports_missing_file() {
        let err = load_deployment(Path::new("/nonexistent/casework.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
