//! Executes jobs received through a message channel.

use std::sync::Arc;

use super::runner::{JobOutcome, JobRunner};
use crate::command::CommandExecutor;
use crate::error::EngineResult;
use crate::job::JobMessage;

/// Result of consuming one job message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The job no longer exists.
    Missing,
    /// The job exists but is not claimable now (locked, suspended, not due).
    NotAcquirable,
    /// Another worker claimed it first.
    ClaimLost,
    Executed(JobOutcome),
}

/// Claims and runs jobs named by incoming [`JobMessage`]s, with the same
/// contract as the acquisition loop.
#[derive(Clone)]
pub struct MessageJobConsumer {
    executor: Arc<CommandExecutor>,
    runner: JobRunner,
}

impl MessageJobConsumer {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        let lock_owner = executor.services().config.lock_owner.clone();
        Self {
            runner: JobRunner::new(executor.clone(), lock_owner),
            executor,
        }
    }

    pub async fn consume(&self, message: &JobMessage) -> EngineResult<ConsumeOutcome> {
        let services = self.executor.services();
        let Some(job) = services.store.find_job(message.job_id).await? else {
            tracing::debug!(job_id = %message.job_id, "Job from message no longer exists");
            return Ok(ConsumeOutcome::Missing);
        };

        let now = services.clock.now();
        if !job.is_acquirable(now) {
            tracing::debug!(job_id = %job.id, state = job.state.as_str(), "Job from message is not acquirable");
            return Ok(ConsumeOutcome::NotAcquirable);
        }

        let claimed = services
            .store
            .claim_job(
                job.id,
                job.version,
                self.runner.lock_owner(),
                now + services.config.lock_duration(),
            )
            .await?;
        if !claimed {
            tracing::debug!(job_id = %job.id, "Job from message claimed by another worker");
            return Ok(ConsumeOutcome::ClaimLost);
        }

        Ok(ConsumeOutcome::Executed(self.runner.run(job.id).await))
    }
}
