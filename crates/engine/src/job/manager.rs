//! Job creation, hand-off and failure bookkeeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::signals::JobSignals;
use super::types::{Job, JobKind, JobMessage, JobSpec, JobState};
use crate::command::{CommandContext, Operation, TransactionPhase};
use crate::error::{EngineError, EngineResult};
use crate::store::EngineStore;

/// Transport for job references when execution happens elsewhere.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(&self, message: JobMessage) -> EngineResult<()>;
}

/// How executable jobs reach an executor.
#[derive(Clone)]
pub enum DispatchMode {
    /// Wake the local acquisition loop after commit.
    InProcess,
    /// Publish a [`JobMessage`] after commit; the receiving worker claims
    /// and runs the job.
    Message(Arc<dyn MessageChannel>),
}

impl fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::InProcess => write!(f, "InProcess"),
            DispatchMode::Message(_) => write!(f, "Message"),
        }
    }
}

/// What a recorded failure did to the job.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    Retrying {
        retries: u32,
        due_date: DateTime<Utc>,
    },
    DeadLettered,
    Deleted,
}

/// Creates jobs and moves them through their lifecycle inside a command
/// context. All changes go to the context's session and become visible on
/// commit.
#[derive(Debug)]
pub struct JobManager {
    dispatch: DispatchMode,
    signals: Arc<JobSignals>,
}

impl JobManager {
    pub fn new(dispatch: DispatchMode) -> Self {
        Self {
            dispatch,
            signals: Arc::new(JobSignals::new()),
        }
    }

    pub fn dispatch_mode(&self) -> &DispatchMode {
        &self.dispatch
    }

    pub fn is_message_mode(&self) -> bool {
        matches!(self.dispatch, DispatchMode::Message(_))
    }

    pub fn signals(&self) -> &Arc<JobSignals> {
        &self.signals
    }

    /// Create a job in the current unit of work.
    ///
    /// Executable jobs are handed off once the unit commits. Timer jobs wait
    /// for the timer loop.
    pub fn schedule_job(&self, ctx: &mut CommandContext, spec: JobSpec) -> Job {
        let job = Job::from_spec(spec, ctx.config().default_retries, ctx.now());
        tracing::debug!(
            job_id = %job.id,
            handler_type = %job.handler_type,
            kind = job.kind.as_str(),
            due_date = ?job.due_date,
            "Scheduling job"
        );

        ctx.insert_job(job.clone());
        if job.state == JobState::Executable {
            self.hand_off(ctx, &job);
        }
        job
    }

    /// Register the post-commit hand-off for an executable job.
    fn hand_off(&self, ctx: &mut CommandContext, job: &Job) {
        match &self.dispatch {
            DispatchMode::InProcess => {
                let signals = self.signals.clone();
                let tenant_id = job.tenant_id.clone();
                ctx.transaction_mut().add_listener(
                    TransactionPhase::Committed,
                    move |_| {
                        signals.notify(tenant_id.as_deref());
                        Ok(())
                    },
                );
            }
            DispatchMode::Message(_) => {
                let message = JobMessage::from(job);
                ctx.transaction_mut().add_listener(
                    TransactionPhase::Committed,
                    move |unit| {
                        unit.plan(Operation::SendJobMessage { message });
                        Ok(())
                    },
                );
            }
        }
    }

    pub async fn send_job_message(&self, message: JobMessage) -> EngineResult<()> {
        match &self.dispatch {
            DispatchMode::Message(channel) => {
                tracing::debug!(job_id = %message.job_id, handler_type = %message.handler_type, "Sending job message");
                channel.send(message).await
            }
            DispatchMode::InProcess => Err(EngineError::Configuration(
                "no message channel configured".to_string(),
            )),
        }
    }

    /// Record a failed execution attempt.
    ///
    /// Releases the lock, decrements retries and stores the failure
    /// message. With retries left the job becomes due again after the
    /// retry wait; at zero it is dead-lettered, or deleted for history
    /// jobs. A job already dead-lettered is left unchanged.
    pub fn handle_failure(
        &self,
        ctx: &mut CommandContext,
        mut job: Job,
        message: &str,
    ) -> FailureOutcome {
        if job.state == JobState::DeadLetter {
            return FailureOutcome::DeadLettered;
        }

        job.release_lock();
        job.retries = job.retries.saturating_sub(1);
        job.exception_message = Some(message.to_string());

        if job.retries == 0 {
            if job.kind == JobKind::History {
                tracing::warn!(job_id = %job.id, error = %message, "History job failed, deleting");
                ctx.delete_job(job);
                return FailureOutcome::Deleted;
            }

            tracing::warn!(job_id = %job.id, error = %message, "Job retries exhausted, moving to dead letter");
            job.state = JobState::DeadLetter;
            ctx.save_job(job);
            return FailureOutcome::DeadLettered;
        }

        let due_date = ctx.now() + ctx.config().retry_wait();
        job.due_date = Some(due_date);
        // Without a local acquisition loop the timer loop re-dispatches the
        // job once it is due.
        job.state = if self.is_message_mode() {
            JobState::Timer
        } else {
            JobState::Executable
        };

        tracing::info!(job_id = %job.id, retries = job.retries, due_date = %due_date, "Job will be retried");
        let retries = job.retries;
        ctx.save_job(job);
        FailureOutcome::Retrying { retries, due_date }
    }

    /// Release a claim without counting it as a failure.
    pub async fn unacquire(
        &self,
        store: &dyn EngineStore,
        job_id: Uuid,
        lock_owner: &str,
    ) -> EngineResult<bool> {
        let released = store.unacquire_job(job_id, lock_owner).await?;
        if released {
            tracing::debug!(job_id = %job_id, "Job unacquired");
        } else {
            tracing::debug!(job_id = %job_id, "Job was no longer held, nothing to unacquire");
        }
        Ok(released)
    }

    /// Promote a due timer job to executable.
    pub fn activate_timer(&self, ctx: &mut CommandContext, mut job: Job) {
        job.state = JobState::Executable;
        tracing::debug!(job_id = %job.id, "Timer job activated");
        ctx.save_job(job.clone());
        self.hand_off(ctx, &job);
    }

    /// Move a dead-letter job back to executable with fresh retries.
    pub fn retry_dead_letter(
        &self,
        ctx: &mut CommandContext,
        mut job: Job,
        retries: u32,
    ) -> EngineResult<()> {
        if job.state != JobState::DeadLetter {
            return Err(EngineError::InvalidState(format!(
                "job {} is not dead-lettered",
                job.id
            )));
        }

        job.state = JobState::Executable;
        job.retries = retries;
        job.due_date = None;
        job.exception_message = None;
        job.release_lock();
        tracing::info!(job_id = %job.id, retries, "Dead-letter job rescheduled");
        ctx.save_job(job.clone());
        self.hand_off(ctx, &job);
        Ok(())
    }

    pub fn set_suspended(&self, ctx: &mut CommandContext, jobs: Vec<Job>, suspended: bool) {
        for mut job in jobs {
            if job.suspended == suspended {
                continue;
            }
            job.suspended = suspended;
            let resumed_executable = !suspended && job.state == JobState::Executable;
            ctx.save_job(job.clone());
            if resumed_executable {
                self.hand_off(ctx, &job);
            }
        }
    }

    /// Park an executable job whose message could not be sent.
    ///
    /// The job becomes a timer due after the retry wait; the timer loop
    /// promotes it and the hand-off runs again. Claimed or no longer
    /// executable jobs are left alone.
    pub fn park_unsent(&self, ctx: &mut CommandContext, mut job: Job) -> bool {
        if job.state != JobState::Executable || job.lock_owner.is_some() {
            return false;
        }

        let due_date = ctx.now() + ctx.config().retry_wait();
        job.state = JobState::Timer;
        job.due_date = Some(due_date);
        tracing::warn!(job_id = %job.id, due_date = %due_date, "Job message not sent, parked for the timer loop");
        ctx.save_job(job);
        true
    }
}
