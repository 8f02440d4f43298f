//! Process operations.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::command::{CommandContext, Operation};
use crate::correlation::{generate_correlation_keys, CorrelationKey, CorrelationParameter};
use crate::error::{EngineError, EngineResult};
use crate::job::{ActivityJobConfig, JobSpec, ASYNC_CONTINUATION, TRIGGER_TIMER};
use crate::model::{
    Activity, ActivityKind, CaseLink, EventSubscription, PlanItemState, ProcessDefinition,
    ProcessInstance, Variables,
};

pub(super) async fn start(
    ctx: &mut CommandContext,
    definition_key: String,
    variables: Variables,
    parent: Option<CaseLink>,
    tenant_id: Option<String>,
) -> EngineResult<()> {
    let definition = ctx.services().definitions.process(&definition_key)?;
    let is_root = parent.is_none();
    let process = ProcessInstance::new(&definition.key, variables, parent, tenant_id, ctx.now());
    let process_instance_id = process.id;

    tracing::info!(
        process_instance_id = %process_instance_id,
        definition_key = %definition.key,
        tenant = ?process.tenant_id,
        "Process started"
    );
    ctx.insert_process(process);
    if is_root {
        ctx.set_result_if_absent(json!({ "process_instance_id": process_instance_id }));
    }
    ctx.plan(Operation::ContinueProcess {
        process_instance_id,
    });
    Ok(())
}

pub(super) async fn continue_process(
    ctx: &mut CommandContext,
    process_instance_id: Uuid,
) -> EngineResult<()> {
    let process = ctx.load_process(process_instance_id).await?;
    if !process.is_active() {
        return Ok(());
    }

    let definition = ctx.services().definitions.process(&process.definition_key)?;
    match definition.activity_at(process.position) {
        None => ctx.plan(Operation::EndProcess {
            process_instance_id,
        }),
        Some(activity) if activity.async_before => {
            let spec = JobSpec::async_job(
                ASYNC_CONTINUATION,
                ActivityJobConfig::new(&activity.id).to_value(),
            )
            .for_process(process_instance_id)
            .tenant(process.tenant_id.clone());
            let services = ctx.services().clone();
            services.job_manager.schedule_job(ctx, spec);
        }
        Some(activity) => ctx.plan(Operation::ExecuteActivity {
            process_instance_id,
            activity_id: activity.id.clone(),
        }),
    }
    Ok(())
}

/// The activity the process currently waits at, which must be `activity_id`.
fn current_activity<'d>(
    definition: &'d ProcessDefinition,
    process: &ProcessInstance,
    activity_id: &str,
) -> EngineResult<&'d Activity> {
    if !process.is_active() {
        return Err(EngineError::InvalidState(format!(
            "process instance {} is not active",
            process.id
        )));
    }

    match definition.activity_at(process.position) {
        Some(activity) if activity.id == activity_id => Ok(activity),
        Some(activity) => Err(EngineError::InvalidState(format!(
            "process instance {} is at activity '{}', not '{}'",
            process.id, activity.id, activity_id
        ))),
        None => Err(EngineError::InvalidState(format!(
            "process instance {} has no current activity",
            process.id
        ))),
    }
}

fn ensure_not_suspended(process: &ProcessInstance) -> EngineResult<()> {
    if process.suspended {
        return Err(EngineError::InvalidState(format!(
            "process instance {} is suspended",
            process.id
        )));
    }
    Ok(())
}

/// Due date of a timer activity; durations chrono cannot represent are
/// rejected rather than wrapped.
fn timer_due_date(
    now: DateTime<Utc>,
    activity_id: &str,
    duration_secs: u64,
) -> EngineResult<DateTime<Utc>> {
    i64::try_from(duration_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|duration| now.checked_add_signed(duration))
        .ok_or_else(|| {
            EngineError::InvalidState(format!(
                "timer '{}' duration of {}s is out of range",
                activity_id, duration_secs
            ))
        })
}

pub(super) async fn execute_activity(
    ctx: &mut CommandContext,
    process_instance_id: Uuid,
    activity_id: String,
) -> EngineResult<()> {
    let mut process = ctx.load_process(process_instance_id).await?;
    let definition = ctx.services().definitions.process(&process.definition_key)?;
    let activity = current_activity(&definition, &process, &activity_id)?;

    match &activity.kind {
        ActivityKind::UserTask => {
            tracing::debug!(process_instance_id = %process_instance_id, activity_id = %activity_id, "Waiting at user task");
        }
        ActivityKind::ServiceTask { delegate } => {
            let delegate = ctx.services().delegates.get(delegate)?;
            delegate.execute(ctx, &mut process).await?;
            ctx.save_process(process);
            ctx.plan(Operation::LeaveActivity {
                process_instance_id,
                activity_id,
            });
        }
        ActivityKind::Timer { duration_secs } => {
            let due_date = timer_due_date(ctx.now(), &activity_id, *duration_secs)?;
            let spec = JobSpec::timer(
                TRIGGER_TIMER,
                ActivityJobConfig::new(&activity_id).to_value(),
                due_date,
            )
            .for_process(process_instance_id)
            .tenant(process.tenant_id.clone());
            let services = ctx.services().clone();
            services.job_manager.schedule_job(ctx, spec);
        }
        ActivityKind::ReceiveEvent {
            event_name,
            correlation_parameters,
        } => {
            let correlation_key = if correlation_parameters.is_empty() {
                None
            } else {
                let parameters = correlation_parameters
                    .iter()
                    .map(|name| {
                        process
                            .variables
                            .get(name)
                            .map(|value| CorrelationParameter::new(name.as_str(), value.clone()))
                            .ok_or_else(|| {
                                EngineError::InvalidState(format!(
                                    "process instance {} has no variable '{}' to correlate on",
                                    process_instance_id, name
                                ))
                            })
                    })
                    .collect::<EngineResult<Vec<_>>>()?;
                Some(CorrelationKey::derive(&parameters).value)
            };

            let subscription = EventSubscription::new(
                event_name.as_str(),
                correlation_key,
                process_instance_id,
                activity_id.as_str(),
                process.tenant_id.clone(),
                ctx.now(),
            );
            tracing::debug!(
                process_instance_id = %process_instance_id,
                event_name = %event_name,
                "Waiting for event"
            );
            ctx.insert_subscription(subscription);
        }
    }
    Ok(())
}

pub(super) async fn leave_activity(
    ctx: &mut CommandContext,
    process_instance_id: Uuid,
    activity_id: &str,
) -> EngineResult<()> {
    let mut process = ctx.load_process(process_instance_id).await?;
    let definition = ctx.services().definitions.process(&process.definition_key)?;
    current_activity(&definition, &process, activity_id)?;

    process.position += 1;
    ctx.save_process(process);
    ctx.plan(Operation::ContinueProcess {
        process_instance_id,
    });
    Ok(())
}

pub(super) async fn end(ctx: &mut CommandContext, process_instance_id: Uuid) -> EngineResult<()> {
    let mut process = ctx.load_process(process_instance_id).await?;
    if !process.is_active() {
        return Ok(());
    }

    process.complete(ctx.now());
    let parent = process.parent.clone();
    ctx.save_process(process);
    tracing::info!(process_instance_id = %process_instance_id, "Process completed");

    let Some(link) = parent else {
        return Ok(());
    };

    let mut case = ctx.load_case(link.case_instance_id).await?;
    if case.plan_item_state(&link.plan_item_id) != Some(PlanItemState::Active) {
        tracing::warn!(
            case_instance_id = %link.case_instance_id,
            plan_item_id = %link.plan_item_id,
            "Parent plan item is no longer active"
        );
        return Ok(());
    }
    case.set_plan_item_state(&link.plan_item_id, PlanItemState::Completed);
    ctx.save_case(case);
    ctx.touch_case(link.case_instance_id);
    Ok(())
}

pub(super) async fn complete_task(
    ctx: &mut CommandContext,
    process_instance_id: Uuid,
    activity_id: String,
    variables: Variables,
) -> EngineResult<()> {
    let mut process = ctx.load_process(process_instance_id).await?;
    ensure_not_suspended(&process)?;
    let definition = ctx.services().definitions.process(&process.definition_key)?;
    let activity = current_activity(&definition, &process, &activity_id)?;
    if activity.kind != ActivityKind::UserTask {
        return Err(EngineError::InvalidState(format!(
            "activity '{}' is not a user task",
            activity_id
        )));
    }

    process.merge_variables(&variables);
    ctx.save_process(process);
    ctx.plan(Operation::LeaveActivity {
        process_instance_id,
        activity_id,
    });
    Ok(())
}

pub(super) async fn fire_timer(
    ctx: &mut CommandContext,
    process_instance_id: Uuid,
    activity_id: String,
) -> EngineResult<()> {
    let process = ctx.load_process(process_instance_id).await?;
    ensure_not_suspended(&process)?;
    let definition = ctx.services().definitions.process(&process.definition_key)?;
    let activity = current_activity(&definition, &process, &activity_id)?;
    if !matches!(activity.kind, ActivityKind::Timer { .. }) {
        return Err(EngineError::InvalidState(format!(
            "activity '{}' is not a timer",
            activity_id
        )));
    }

    ctx.plan(Operation::LeaveActivity {
        process_instance_id,
        activity_id,
    });
    Ok(())
}

/// Resume every process waiting for the event. Sets the number of resumed
/// processes as the command result.
pub(super) async fn correlate_event(
    ctx: &mut CommandContext,
    event_name: &str,
    parameters: &[CorrelationParameter],
    payload: &Variables,
    tenant_id: Option<String>,
) -> EngineResult<()> {
    let keys: Vec<String> = generate_correlation_keys(parameters)
        .into_iter()
        .map(|key| key.value)
        .collect();
    let subscriptions = ctx
        .find_subscriptions(event_name, &keys, tenant_id.as_deref())
        .await?;

    let mut matched = 0usize;
    for subscription in subscriptions {
        let mut process = ctx.load_process(subscription.process_instance_id).await?;
        if !process.is_active() {
            ctx.delete_subscription(subscription);
            continue;
        }
        if process.suspended {
            tracing::debug!(process_instance_id = %process.id, "Skipping suspended process");
            continue;
        }

        process.merge_variables(payload);
        ctx.save_process(process);
        ctx.plan(Operation::LeaveActivity {
            process_instance_id: subscription.process_instance_id,
            activity_id: subscription.activity_id.clone(),
        });
        ctx.delete_subscription(subscription);
        matched += 1;
    }

    tracing::info!(event_name = %event_name, keys = keys.len(), matched, "Event correlated");
    ctx.set_result_if_absent(json!({ "matched": matched }));
    Ok(())
}

pub(super) async fn set_suspended(
    ctx: &mut CommandContext,
    process_instance_id: Uuid,
    suspended: bool,
) -> EngineResult<()> {
    let mut process = ctx.load_process(process_instance_id).await?;
    if !process.is_active() {
        return Err(EngineError::InvalidState(format!(
            "process instance {} is not active",
            process_instance_id
        )));
    }
    if process.suspended == suspended {
        return Ok(());
    }

    process.suspended = suspended;
    ctx.save_process(process);

    let jobs = ctx.jobs_for_process(process_instance_id).await?;
    let services = ctx.services().clone();
    services.job_manager.set_suspended(ctx, jobs, suspended);
    tracing::info!(process_instance_id = %process_instance_id, suspended, "Process suspension changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timer_due_date_adds_duration() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let due = timer_due_date(now, "wait", 90).unwrap();
        assert_eq!(due, now + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_timer_due_date_rejects_unrepresentable_durations() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        for duration_secs in [u64::MAX, 1u64 << 62, 1u64 << 45] {
            let err = timer_due_date(now, "wait", duration_secs).unwrap_err();
            assert!(matches!(err, EngineError::InvalidState(_)), "{}", duration_secs);
        }
    }
}
