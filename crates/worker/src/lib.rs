//! Casework Worker
//!
//! Runs the casework engine against shared infrastructure.
//!
//! This crate provides:
//! - PostgreSQL implementation of the engine store
//! - NATS JetStream channel for message-dispatched jobs
//! - Worker lifecycle around the async executor

pub mod config;
pub mod db;
pub mod nats;
pub mod worker;

pub use config::{DatabaseConfig, DispatchKind, WorkerConfig};
pub use db::PgStore;
pub use worker::Worker;
