//! Job operations.

use uuid::Uuid;

use crate::command::CommandContext;
use crate::error::{EngineError, EngineResult};
use crate::job::{JobMessage, JobState};

/// Run a claimed job's handler and remove the job.
pub(super) async fn execute(
    ctx: &mut CommandContext,
    job_id: Uuid,
    lock_owner: &str,
) -> EngineResult<()> {
    let job = ctx.load_job(job_id).await?;
    if job.lock_owner.as_deref() != Some(lock_owner) {
        return Err(EngineError::OptimisticLock(format!(
            "job {} is not locked by {}",
            job_id, lock_owner
        )));
    }

    tracing::debug!(job_id = %job_id, handler_type = %job.handler_type, retries = job.retries, "Executing job");
    let services = ctx.services().clone();
    services.job_handlers.execute(ctx, &job).await?;
    ctx.delete_job(job);
    Ok(())
}

/// Record a failed run for the worker that still holds the claim. A worker
/// whose lock expired and was taken over records nothing.
pub(super) async fn handle_failure(
    ctx: &mut CommandContext,
    job_id: Uuid,
    lock_owner: &str,
    message: &str,
) -> EngineResult<()> {
    let Some(job) = ctx.find_job(job_id).await? else {
        tracing::debug!(job_id = %job_id, "Failed job no longer exists");
        return Ok(());
    };
    if job.lock_owner.as_deref() != Some(lock_owner) {
        tracing::debug!(
            job_id = %job_id,
            lock_owner = %lock_owner,
            holder = ?job.lock_owner,
            "Failure reported by a worker that no longer holds the job"
        );
        return Ok(());
    }

    let services = ctx.services().clone();
    services.job_manager.handle_failure(ctx, job, message);
    Ok(())
}

pub(super) async fn activate_timer(
    ctx: &mut CommandContext,
    job_id: Uuid,
    expected_version: u64,
) -> EngineResult<()> {
    let job = match ctx.find_job(job_id).await? {
        Some(job) if job.version == expected_version && job.state == JobState::Timer => job,
        _ => {
            return Err(EngineError::OptimisticLock(format!(
                "timer job {} changed since it was found",
                job_id
            )))
        }
    };

    let services = ctx.services().clone();
    services.job_manager.activate_timer(ctx, job);
    Ok(())
}

/// Publish a job reference. A failed send parks the job instead of failing
/// the unit, so the job is published again later.
pub(super) async fn send_message(
    ctx: &mut CommandContext,
    message: JobMessage,
) -> EngineResult<()> {
    let services = ctx.services().clone();
    let job_id = message.job_id;
    let Err(e) = services.job_manager.send_job_message(message).await else {
        return Ok(());
    };

    tracing::warn!(job_id = %job_id, error = %e, "Failed to send job message");
    if let Some(job) = ctx.find_job(job_id).await? {
        services.job_manager.park_unsent(ctx, job);
    }
    Ok(())
}

pub(super) async fn retry_dead_letter(
    ctx: &mut CommandContext,
    job_id: Uuid,
    retries: u32,
) -> EngineResult<()> {
    let job = ctx.load_job(job_id).await?;
    let services = ctx.services().clone();
    services.job_manager.retry_dead_letter(ctx, job, retries)
}
