//! Jobs: deferred work shared between workers through the store.

pub mod handler;
pub mod manager;
pub mod signals;
pub mod types;

pub use handler::{
    ActivityJobConfig, AsyncContinuationHandler, JobHandler, JobHandlerRegistry,
    TriggerTimerHandler, ASYNC_CONTINUATION, TRIGGER_TIMER,
};
pub use manager::{DispatchMode, FailureOutcome, JobManager, MessageChannel};
pub use signals::JobSignals;
pub use types::{Job, JobKind, JobMessage, JobSpec, JobState};
