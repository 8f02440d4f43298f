//! Operation implementations, dispatched by [`run`].

mod case;
mod job;
mod process;

use super::context::CommandContext;
use super::Operation;
use crate::error::EngineResult;

/// Execute one operation against the context.
pub(crate) async fn run(ctx: &mut CommandContext, operation: Operation) -> EngineResult<()> {
    match operation {
        Operation::StartProcess {
            definition_key,
            variables,
            parent,
            tenant_id,
        } => process::start(ctx, definition_key, variables, parent, tenant_id).await,
        Operation::ContinueProcess {
            process_instance_id,
        } => process::continue_process(ctx, process_instance_id).await,
        Operation::ExecuteActivity {
            process_instance_id,
            activity_id,
        } => process::execute_activity(ctx, process_instance_id, activity_id).await,
        Operation::LeaveActivity {
            process_instance_id,
            activity_id,
        } => process::leave_activity(ctx, process_instance_id, &activity_id).await,
        Operation::EndProcess {
            process_instance_id,
        } => process::end(ctx, process_instance_id).await,
        Operation::CompleteTask {
            process_instance_id,
            activity_id,
            variables,
        } => process::complete_task(ctx, process_instance_id, activity_id, variables).await,
        Operation::FireTimer {
            process_instance_id,
            activity_id,
        } => process::fire_timer(ctx, process_instance_id, activity_id).await,
        Operation::CorrelateEvent {
            event_name,
            parameters,
            payload,
            tenant_id,
        } => process::correlate_event(ctx, &event_name, &parameters, &payload, tenant_id).await,
        Operation::SuspendProcess {
            process_instance_id,
        } => process::set_suspended(ctx, process_instance_id, true).await,
        Operation::ActivateProcess {
            process_instance_id,
        } => process::set_suspended(ctx, process_instance_id, false).await,

        Operation::StartCase {
            definition_key,
            variables,
            tenant_id,
        } => case::start(ctx, definition_key, variables, tenant_id),
        Operation::EvaluateCriteria { case_instance_id } => {
            case::evaluate_criteria(ctx, case_instance_id).await
        }
        Operation::ActivatePlanItem {
            case_instance_id,
            plan_item_id,
        } => case::activate_plan_item(ctx, case_instance_id, plan_item_id).await,
        Operation::CompletePlanItem {
            case_instance_id,
            plan_item_id,
        } => case::complete_plan_item(ctx, case_instance_id, &plan_item_id).await,
        Operation::CompleteHumanTask {
            case_instance_id,
            plan_item_id,
            variables,
        } => case::complete_human_task(ctx, case_instance_id, plan_item_id, variables).await,
        Operation::SetCaseVariables {
            case_instance_id,
            variables,
        } => case::set_variables(ctx, case_instance_id, variables).await,

        Operation::ExecuteJob { job_id, lock_owner } => {
            job::execute(ctx, job_id, &lock_owner).await
        }
        Operation::HandleJobFailure {
            job_id,
            lock_owner,
            message,
        } => job::handle_failure(ctx, job_id, &lock_owner, &message).await,
        Operation::ActivateTimerJob {
            job_id,
            expected_version,
        } => job::activate_timer(ctx, job_id, expected_version).await,
        Operation::SendJobMessage { message } => job::send_message(ctx, message).await,
        Operation::RetryDeadLetterJob { job_id, retries } => {
            job::retry_dead_letter(ctx, job_id, retries).await
        }
    }
}
