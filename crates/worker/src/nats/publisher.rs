//! Job message publisher.

use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use casework_engine::{EngineError, EngineResult, JobMessage, MessageChannel};
use thiserror::Error;

/// Default NATS subject for job messages.
pub const DEFAULT_SUBJECT: &str = "casework.jobs";

/// Default JetStream stream name.
pub const DEFAULT_STREAM: &str = "casework_jobs";

/// Errors that can occur during NATS operations.
#[derive(Debug, Error)]
pub enum NatsError {
    #[error("NATS connection error: {0}")]
    Connection(String),

    #[error("JetStream error: {0}")]
    JetStream(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Receive error: {0}")]
    Receive(String),

    #[error("Invalid job message: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<NatsError> for EngineError {
    fn from(e: NatsError) -> Self {
        EngineError::Channel(e.to_string())
    }
}

/// Publishes job messages to a JetStream subject.
#[derive(Clone)]
pub struct NatsJobPublisher {
    js: Context,
    subject: String,
}

impl NatsJobPublisher {
    /// Create a publisher from a connected client, creating the stream if it
    /// does not exist yet.
    pub async fn new(
        client: async_nats::Client,
        subject: &str,
        stream: &str,
    ) -> Result<Self, NatsError> {
        let js = jetstream::new(client);
        ensure_stream(&js, stream, subject).await?;

        Ok(Self {
            js,
            subject: subject.to_string(),
        })
    }

    pub async fn publish(&self, message: &JobMessage) -> Result<(), NatsError> {
        let payload = serde_json::to_vec(message)?;

        self.js
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| NatsError::Publish(e.to_string()))?
            .await
            .map_err(|e| NatsError::Publish(e.to_string()))?;

        tracing::debug!(
            job_id = %message.job_id,
            handler_type = %message.handler_type,
            "Published job message"
        );

        Ok(())
    }
}

#[async_trait]
impl MessageChannel for NatsJobPublisher {
    async fn send(&self, message: JobMessage) -> EngineResult<()> {
        self.publish(&message).await.map_err(EngineError::from)
    }
}

/// Ensure the JetStream stream exists.
pub(crate) async fn ensure_stream(js: &Context, stream: &str, subject: &str) -> Result<(), NatsError> {
    match js.get_stream(stream).await {
        Ok(_) => {
            tracing::debug!(stream = %stream, "Using existing NATS stream");
            Ok(())
        }
        Err(_) => {
            // Work queue retention: a message is gone once one worker acks it.
            let config = jetstream::stream::Config {
                name: stream.to_string(),
                subjects: vec![subject.to_string()],
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            };

            js.create_stream(config)
                .await
                .map_err(|e| NatsError::JetStream(e.to_string()))?;

            tracing::info!(stream = %stream, subject = %subject, "Created NATS stream");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_errors_become_channel_errors() {
        let err: EngineError = NatsError::Publish("timed out".to_string()).into();
        match err {
            EngineError::Channel(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_job_message_payload() {
        let message = JobMessage {
            job_id: Uuid::nil(),
            handler_type: "async-continuation".to_string(),
            tenant_id: None,
        };

        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("async-continuation"));
        assert!(!json.contains("tenant_id"));
    }

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_SUBJECT, "casework.jobs");
        assert_eq!(DEFAULT_STREAM, "casework_jobs");
    }
}
