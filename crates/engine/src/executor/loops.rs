//! Background loops of the async executor.
//!
//! Each loop does one round of work per [`ExecutorLoop::run_once`] and
//! reports how long to idle before the next one. [`drive`] repeats that until
//! the loop's stop channel fires. Idle waits end early on stop or on a
//! wake-up signal, so stopping a loop is bounded by the store call in
//! flight, not by the idle interval.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use super::pool::WorkerPool;
use super::runner::JobRunner;
use crate::command::{CommandExecutor, Operation};
use crate::error::EngineResult;
use crate::job::JobMessage;
use crate::result_ext::ResultExt;
use crate::store::JobQuery;

/// One background loop.
#[async_trait]
pub trait ExecutorLoop: Send {
    fn name(&self) -> &'static str;

    /// Do one round of work and return the idle wait before the next.
    async fn run_once(&mut self) -> Duration;
}

/// Counters of one acquisition round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionRound {
    pub queried: bool,
    pub claimed: usize,
    pub submitted: usize,
    pub rejected: usize,
}

/// Claims due jobs and hands them to the worker pool.
pub struct AcquireJobsLoop {
    executor: Arc<CommandExecutor>,
    pool: Arc<dyn WorkerPool>,
    runner: JobRunner,
    tenant_id: Option<String>,
}

impl AcquireJobsLoop {
    pub fn new(
        executor: Arc<CommandExecutor>,
        pool: Arc<dyn WorkerPool>,
        tenant_id: Option<String>,
    ) -> Self {
        let lock_owner = executor.services().config.lock_owner.clone();
        Self {
            runner: JobRunner::new(executor.clone(), lock_owner),
            executor,
            pool,
            tenant_id,
        }
    }

    /// One acquisition round.
    ///
    /// With no pool capacity the store is not queried at all. Jobs claimed
    /// but rejected by the pool are unacquired without touching retries.
    pub async fn acquire(&self) -> EngineResult<AcquisitionRound> {
        let mut round = AcquisitionRound::default();
        let capacity = self.pool.remaining_capacity();
        if capacity == 0 {
            tracing::trace!(tenant = ?self.tenant_id, "Worker pool full, skipping acquisition");
            return Ok(round);
        }

        let services = self.executor.services();
        let config = &services.config;
        let now = services.clock.now();
        let query = JobQuery::new(
            now,
            self.tenant_id.clone(),
            capacity.min(config.max_jobs_per_acquisition),
        );

        let jobs = services.store.find_due_jobs(&query).await?;
        round.queried = true;

        let lock_owner = self.runner.lock_owner();
        let lock_expiration = now + config.lock_duration();
        let mut claimed: Vec<Uuid> = Vec::with_capacity(jobs.len());
        for job in jobs {
            match services
                .store
                .claim_job(job.id, job.version, lock_owner, lock_expiration)
                .await
            {
                Ok(true) => claimed.push(job.id),
                Ok(false) => {
                    tracing::debug!(job_id = %job.id, "Job claimed by another worker");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to claim job");
                }
            }
        }
        round.claimed = claimed.len();

        for job_id in claimed {
            let runner = self.runner.clone();
            if self.pool.submit(Box::pin(async move {
                runner.run(job_id).await;
            })) {
                round.submitted += 1;
            } else {
                round.rejected += 1;
                tracing::debug!(job_id = %job_id, "Worker pool rejected job");
                let _ = services
                    .job_manager
                    .unacquire(services.store.as_ref(), job_id, lock_owner)
                    .await
                    .log_warn(format!("unacquire rejected job {}", job_id));
            }
        }

        if round.claimed > 0 {
            tracing::debug!(
                tenant = ?self.tenant_id,
                claimed = round.claimed,
                submitted = round.submitted,
                rejected = round.rejected,
                "Acquired jobs"
            );
        }
        Ok(round)
    }

    fn idle_wait_after(&self, round: &AcquisitionRound) -> Duration {
        let config = &self.executor.services().config;
        if round.rejected == 0 && round.claimed > 0 && round.claimed >= config.max_jobs_per_acquisition {
            Duration::ZERO
        } else {
            config.acquire_wait()
        }
    }
}

#[async_trait]
impl ExecutorLoop for AcquireJobsLoop {
    fn name(&self) -> &'static str {
        "acquire-jobs"
    }

    async fn run_once(&mut self) -> Duration {
        match self.acquire().await {
            Ok(round) => self.idle_wait_after(&round),
            Err(e) => {
                tracing::warn!(tenant = ?self.tenant_id, error = %e, "Job acquisition failed");
                self.executor.services().config.acquire_wait()
            }
        }
    }
}

/// Promotes due timer jobs to executable.
pub struct TimerLoop {
    executor: Arc<CommandExecutor>,
    tenant_id: Option<String>,
}

impl TimerLoop {
    pub fn new(executor: Arc<CommandExecutor>, tenant_id: Option<String>) -> Self {
        Self {
            executor,
            tenant_id,
        }
    }

    /// Returns the number of timers found and the number promoted.
    pub async fn activate_due_timers(&self) -> EngineResult<(usize, usize)> {
        let services = self.executor.services();
        let query = JobQuery::new(
            services.clock.now(),
            self.tenant_id.clone(),
            services.config.max_jobs_per_acquisition,
        );
        let timers = services.store.find_due_timers(&query).await?;
        let found = timers.len();

        let mut activated = 0;
        for job in timers {
            let operation = Operation::ActivateTimerJob {
                job_id: job.id,
                expected_version: job.version,
            };
            match self.executor.execute(operation).await {
                Ok(_) => activated += 1,
                Err(e) if e.is_optimistic_lock() => {
                    tracing::debug!(job_id = %job.id, "Timer job activated elsewhere");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to activate timer job");
                }
            }
        }
        Ok((found, activated))
    }
}

#[async_trait]
impl ExecutorLoop for TimerLoop {
    fn name(&self) -> &'static str {
        "timer"
    }

    async fn run_once(&mut self) -> Duration {
        let config = &self.executor.services().config;
        match self.activate_due_timers().await {
            Ok((found, _)) if found > 0 && found >= config.max_jobs_per_acquisition => Duration::ZERO,
            Ok(_) => config.timer_wait(),
            Err(e) => {
                tracing::warn!(tenant = ?self.tenant_id, error = %e, "Timer scan failed");
                config.timer_wait()
            }
        }
    }
}

/// Clears locks whose expiration has passed.
pub struct ResetExpiredLoop {
    executor: Arc<CommandExecutor>,
    tenant_id: Option<String>,
}

impl ResetExpiredLoop {
    pub fn new(executor: Arc<CommandExecutor>, tenant_id: Option<String>) -> Self {
        Self {
            executor,
            tenant_id,
        }
    }

    /// Returns the number of jobs reset.
    pub async fn reset_expired(&self) -> EngineResult<usize> {
        let services = self.executor.services();
        let query = JobQuery::new(
            services.clock.now(),
            self.tenant_id.clone(),
            services.config.reset_expired_batch_size,
        );
        let expired = services.store.find_expired_jobs(&query).await?;

        let mut reset = 0;
        for job in expired {
            if !services.store.reset_expired_job(job.id, job.version).await? {
                tracing::debug!(job_id = %job.id, "Expired job changed concurrently");
                continue;
            }
            reset += 1;
            tracing::info!(
                job_id = %job.id,
                lock_owner = ?job.lock_owner,
                "Released expired job lock"
            );
            // In-process mode needs nothing: the acquisition loop finds the
            // job on its next round.
            if services.job_manager.is_message_mode() {
                let operation = Operation::SendJobMessage {
                    message: JobMessage::from(&job),
                };
                let _ = self
                    .executor
                    .execute(operation)
                    .await
                    .log_warn(format!("redispatch job {}", job.id));
            }
        }
        Ok(reset)
    }
}

#[async_trait]
impl ExecutorLoop for ResetExpiredLoop {
    fn name(&self) -> &'static str {
        "reset-expired"
    }

    async fn run_once(&mut self) -> Duration {
        let _ = self
            .reset_expired()
            .await
            .log_warn(format!("reset expired jobs for tenant {:?}", self.tenant_id));
        self.executor.services().config.reset_expired_interval()
    }
}

async fn wake_signal(wake: Option<&Notify>) {
    match wake {
        Some(notify) => notify.notified().await,
        None => std::future::pending::<()>().await,
    }
}

/// Idle for `wait`, returning early on stop or wake-up.
///
/// Returns `false` once the loop should stop.
pub async fn idle_wait(
    wait: Duration,
    stop: &mut watch::Receiver<bool>,
    wake: Option<&Notify>,
) -> bool {
    if *stop.borrow() {
        return false;
    }
    if wait.is_zero() {
        return true;
    }

    tokio::select! {
        changed = stop.changed() => changed.is_ok() && !*stop.borrow(),
        _ = wake_signal(wake) => true,
        _ = tokio::time::sleep(wait) => true,
    }
}

/// Run a loop until its stop channel fires.
pub async fn drive<L: ExecutorLoop>(
    mut executor_loop: L,
    mut stop: watch::Receiver<bool>,
    wake: Option<Arc<Notify>>,
) {
    let name = executor_loop.name();
    tracing::debug!(loop_name = name, "Executor loop started");

    loop {
        if *stop.borrow() {
            break;
        }
        let wait = executor_loop.run_once().await;
        if !idle_wait(wait, &mut stop, wake.as_deref()).await {
            break;
        }
    }

    tracing::debug!(loop_name = name, "Executor loop stopped");
}
