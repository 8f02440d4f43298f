//! NATS JetStream transport for job messages.
//!
//! In message dispatch mode the engine publishes a [`JobMessage`] after the
//! creating unit of work commits. Any worker subscribed to the durable
//! consumer may receive it, claim the job and run it.
//!
//! [`JobMessage`]: casework_engine::JobMessage

pub mod publisher;
pub mod subscriber;

pub use publisher::{NatsError, NatsJobPublisher, DEFAULT_STREAM, DEFAULT_SUBJECT};
pub use subscriber::JobSubscriber;
