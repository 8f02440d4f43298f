//! Async job execution.
//!
//! - [`AsyncExecutor`]: per-tenant acquisition, timer and reset-expired loops
//! - [`WorkerPool`]: bounded execution of claimed jobs
//! - [`JobRunner`]: execute one claimed job, record failures
//! - [`MessageJobConsumer`]: the same contract for jobs received as messages

pub mod async_executor;
pub mod consumer;
pub mod loops;
pub mod pool;
pub mod runner;

pub use async_executor::AsyncExecutor;
pub use consumer::{ConsumeOutcome, MessageJobConsumer};
pub use loops::{
    drive, idle_wait, AcquireJobsLoop, AcquisitionRound, ExecutorLoop, ResetExpiredLoop, TimerLoop,
};
pub use pool::{SemaphoreWorkerPool, WorkerPool};
pub use runner::{JobOutcome, JobRunner};
