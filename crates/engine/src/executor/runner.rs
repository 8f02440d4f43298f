//! Runs one claimed job to an outcome.

use std::sync::Arc;
use uuid::Uuid;

use crate::command::{CommandExecutor, Operation};
use crate::result_ext::ResultExt;

/// How a job run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Handler succeeded; the job is gone.
    Completed,
    /// Handler failed; retries were decremented.
    Failed,
    /// A concurrent writer won; the claim was released untouched.
    Released,
}

/// Executes claimed jobs for one lock owner.
#[derive(Clone)]
pub struct JobRunner {
    executor: Arc<CommandExecutor>,
    lock_owner: String,
}

impl JobRunner {
    pub fn new(executor: Arc<CommandExecutor>, lock_owner: impl Into<String>) -> Self {
        Self {
            executor,
            lock_owner: lock_owner.into(),
        }
    }

    pub fn lock_owner(&self) -> &str {
        &self.lock_owner
    }

    /// Execute a job this runner's owner holds.
    ///
    /// A failed execution is rolled back and recorded by a separate
    /// command; nothing is returned to the caller but the outcome.
    pub async fn run(&self, job_id: Uuid) -> JobOutcome {
        let operation = Operation::ExecuteJob {
            job_id,
            lock_owner: self.lock_owner.clone(),
        };

        match self.executor.execute(operation).await {
            Ok(_) => {
                tracing::debug!(job_id = %job_id, "Job completed");
                JobOutcome::Completed
            }
            Err(e) if e.is_optimistic_lock() => {
                tracing::debug!(job_id = %job_id, error = %e, "Job lost a concurrent update, releasing");
                let services = self.executor.services();
                let _ = services
                    .job_manager
                    .unacquire(services.store.as_ref(), job_id, &self.lock_owner)
                    .await
                    .log_warn(format!("unacquire job {}", job_id));
                JobOutcome::Released
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job execution failed");
                let failure = Operation::HandleJobFailure {
                    job_id,
                    lock_owner: self.lock_owner.clone(),
                    message: e.to_string(),
                };
                let _ = self
                    .executor
                    .execute(failure)
                    .await
                    .log(format!("record failure of job {}", job_id));
                JobOutcome::Failed
            }
        }
    }
}
