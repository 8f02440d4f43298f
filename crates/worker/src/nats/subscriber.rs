//! NATS JetStream subscriber for job messages.

use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull, AckKind, Message};
use casework_engine::JobMessage;
use futures::StreamExt;

use super::publisher::{ensure_stream, NatsError};

/// Pull subscriber bound to one durable consumer.
pub struct JobSubscriber {
    consumer: jetstream::consumer::Consumer<pull::Config>,
    consumer_name: String,
}

impl JobSubscriber {
    /// Bind to the durable consumer on an existing connection, creating the
    /// stream and the consumer when they do not exist yet.
    ///
    /// # Arguments
    ///
    /// * `client` - Connected NATS client, usually shared with the publisher
    /// * `stream` - JetStream stream name
    /// * `consumer` - Durable consumer name shared by all workers
    /// * `subject` - Subject filter for job messages
    ///
    /// # Errors
    ///
    /// Returns [`NatsError::JetStream`] when the stream or consumer cannot be
    /// looked up or created.
    pub async fn from_client(
        client: async_nats::Client,
        stream: &str,
        consumer: &str,
        subject: &str,
    ) -> Result<Self, NatsError> {
        let js = jetstream::new(client);
        ensure_stream(&js, stream, subject).await?;

        let stream_handle = js
            .get_stream(stream)
            .await
            .map_err(|e| NatsError::JetStream(e.to_string()))?;

        let consumer_handle = match stream_handle.get_consumer(consumer).await {
            Ok(existing) => existing,
            Err(_) => {
                let config = pull::Config {
                    durable_name: Some(consumer.to_string()),
                    filter_subject: subject.to_string(),
                    ..Default::default()
                };
                let created = stream_handle
                    .create_consumer(config)
                    .await
                    .map_err(|e| NatsError::JetStream(e.to_string()))?;
                tracing::info!(consumer = %consumer, "Created NATS consumer");
                created
            }
        };

        Ok(Self {
            consumer: consumer_handle,
            consumer_name: consumer.to_string(),
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Receive the next job message, or `None` when nothing is pending.
    ///
    /// A payload that does not decode is terminated so it is not redelivered.
    pub async fn receive(&self) -> Result<Option<(JobMessage, Message)>, NatsError> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(1)
            .messages()
            .await
            .map_err(|e| NatsError::Receive(e.to_string()))?;

        let Some(next) = messages.next().await else {
            return Ok(None);
        };
        let msg = next.map_err(|e| NatsError::Receive(e.to_string()))?;

        match serde_json::from_slice::<JobMessage>(&msg.payload) {
            Ok(job_message) => Ok(Some((job_message, msg))),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding undecodable job message");
                term(&msg).await?;
                Err(NatsError::Decode(e))
            }
        }
    }
}

/// Acknowledge a message.
pub async fn ack(msg: &Message) -> Result<(), NatsError> {
    msg.ack()
        .await
        .map_err(|e| NatsError::Receive(format!("Failed to ack message: {}", e)))
}

/// Negatively acknowledge a message; it is redelivered after `delay`.
pub async fn nack(msg: &Message, delay: Option<Duration>) -> Result<(), NatsError> {
    msg.ack_with(AckKind::Nak(delay))
        .await
        .map_err(|e| NatsError::Receive(format!("Failed to nack message: {}", e)))
}

async fn term(msg: &Message) -> Result<(), NatsError> {
    msg.ack_with(AckKind::Term)
        .await
        .map_err(|e| NatsError::Receive(format!("Failed to terminate message: {}", e)))
}
