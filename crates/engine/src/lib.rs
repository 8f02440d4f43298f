//! Casework Engine Library
//!
//! This crate drives long-running process and case instances through
//! atomic, recoverable state transitions, shared safely between worker
//! processes that use one store:
//!
//! - **Command Pipeline**: every external request runs as a command whose
//!   agenda of internal operations is drained before the unit of work
//!   commits
//! - **Transaction Listeners**: deferred callbacks per commit/rollback phase;
//!   post-commit work runs in its own unit of work
//! - **Async Jobs**: due-date driven jobs claimed under optimistic
//!   concurrency, retried, and dead-lettered when retries run out
//! - **Event Correlation**: correlation keys over contiguous windows of an
//!   event's parameters
//!
//! ## Modules
//!
//! - [`command`]: Command context, agenda, interceptor chain, transactions
//! - [`executor`]: Acquisition, timer and reset-expired loops, worker pool
//! - [`job`]: Job model, job manager, job handlers
//! - [`store`]: Store trait, unit-of-work session, in-memory store
//! - [`model`]: Process and case definitions and instances
//! - [`correlation`]: Correlation key generation
//! - [`config`]: Configuration loading from environment variables
//! - [`error`]: Engine error types
//!
//! ## Example
//!
//! ```ignore
//! use casework_engine::model::{Activity, ProcessDefinition, Variables};
//! use casework_engine::{ProcessEngine, SemaphoreWorkerPool};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = ProcessEngine::builder()
//!         .deploy_process(
//!             ProcessDefinition::new("order")
//!                 .activity(Activity::user_task("review"))
//!                 .activity(Activity::service_task("ship", "shipping").async_before()),
//!         )
//!         .delegate_fn("shipping", |_vars| Ok(()))
//!         .build()?;
//!
//!     let executor = engine.async_executor(Arc::new(SemaphoreWorkerPool::new(8)));
//!     executor.start();
//!
//!     let id = engine.start_process("order", Variables::new()).await?;
//!     engine.complete_task(id, "review", Variables::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod command;
pub mod config;
pub mod correlation;
pub mod delegate;
pub mod engine;
pub mod error;
pub mod executor;
pub mod job;
pub mod model;
pub mod result_ext;
pub mod services;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandContext, CommandExecutor, Operation, TransactionPhase};
pub use config::EngineConfig;
pub use correlation::{generate_correlation_keys, CorrelationKey, CorrelationParameter};
pub use delegate::{DelegateRegistry, ServiceDelegate};
pub use engine::{ProcessEngine, ProcessEngineBuilder};
pub use error::{EngineError, EngineResult};
pub use executor::{AsyncExecutor, MessageJobConsumer, SemaphoreWorkerPool, WorkerPool};
pub use job::{DispatchMode, Job, JobHandler, JobManager, JobMessage, MessageChannel};
pub use result_ext::ResultExt;
pub use services::EngineServices;
pub use store::{EngineStore, MemoryStore};
