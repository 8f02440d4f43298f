//! Case operations.

use serde_json::json;
use uuid::Uuid;

use crate::command::{CommandContext, Operation};
use crate::error::{EngineError, EngineResult};
use crate::model::{CaseInstance, CaseLink, PlanItemKind, PlanItemState, Variables};

pub(super) fn start(
    ctx: &mut CommandContext,
    definition_key: String,
    variables: Variables,
    tenant_id: Option<String>,
) -> EngineResult<()> {
    let definition = ctx.services().definitions.case(&definition_key)?;
    let case = CaseInstance::new(&definition, variables, tenant_id, ctx.now());
    let case_instance_id = case.id;

    tracing::info!(case_instance_id = %case_instance_id, definition_key = %definition.key, "Case started");
    ctx.insert_case(case);
    ctx.set_result_if_absent(json!({ "case_instance_id": case_instance_id }));
    ctx.plan(Operation::EvaluateCriteria { case_instance_id });
    Ok(())
}

fn ensure_active(case: &CaseInstance) -> EngineResult<()> {
    if !case.is_active() {
        return Err(EngineError::InvalidState(format!(
            "case instance {} is not active",
            case.id
        )));
    }
    Ok(())
}

fn ensure_item_active(case: &CaseInstance, plan_item_id: &str) -> EngineResult<()> {
    match case.plan_item_state(plan_item_id) {
        Some(PlanItemState::Active) => Ok(()),
        Some(state) => Err(EngineError::InvalidState(format!(
            "plan item '{}' of case {} is {:?}",
            plan_item_id, case.id, state
        ))),
        None => Err(EngineError::NotFound(format!(
            "plan item '{}' of case {}",
            plan_item_id, case.id
        ))),
    }
}

/// Activate ready plan items, or complete the case when nothing is left.
pub(super) async fn evaluate_criteria(
    ctx: &mut CommandContext,
    case_instance_id: Uuid,
) -> EngineResult<()> {
    let mut case = ctx.load_case(case_instance_id).await?;
    if !case.is_active() {
        return Ok(());
    }

    let definition = ctx.services().definitions.case(&case.definition_key)?;
    let ready = case.ready_plan_items(&definition);
    if ready.is_empty() {
        if case.all_completed() {
            case.complete(ctx.now());
            ctx.save_case(case);
            tracing::info!(case_instance_id = %case_instance_id, "Case completed");
        }
        return Ok(());
    }

    // Marked active here so a later evaluation in the same drain skips them.
    for plan_item_id in &ready {
        case.set_plan_item_state(plan_item_id, PlanItemState::Active);
    }
    ctx.save_case(case);

    for plan_item_id in ready {
        tracing::debug!(case_instance_id = %case_instance_id, plan_item_id = %plan_item_id, "Plan item activated");
        ctx.plan(Operation::ActivatePlanItem {
            case_instance_id,
            plan_item_id,
        });
    }
    Ok(())
}

pub(super) async fn activate_plan_item(
    ctx: &mut CommandContext,
    case_instance_id: Uuid,
    plan_item_id: String,
) -> EngineResult<()> {
    let case = ctx.load_case(case_instance_id).await?;
    ensure_item_active(&case, &plan_item_id)?;

    let definition = ctx.services().definitions.case(&case.definition_key)?;
    let item = definition.find_plan_item(&plan_item_id).ok_or_else(|| {
        EngineError::NotFound(format!(
            "plan item '{}' in case definition '{}'",
            plan_item_id, definition.key
        ))
    })?;

    match &item.kind {
        PlanItemKind::HumanTask => {}
        PlanItemKind::ProcessTask { process_key } => ctx.plan(Operation::StartProcess {
            definition_key: process_key.clone(),
            variables: case.variables.clone(),
            parent: Some(CaseLink {
                case_instance_id,
                plan_item_id,
            }),
            tenant_id: case.tenant_id.clone(),
        }),
        PlanItemKind::Milestone => ctx.plan(Operation::CompletePlanItem {
            case_instance_id,
            plan_item_id,
        }),
    }
    Ok(())
}

pub(super) async fn complete_plan_item(
    ctx: &mut CommandContext,
    case_instance_id: Uuid,
    plan_item_id: &str,
) -> EngineResult<()> {
    let mut case = ctx.load_case(case_instance_id).await?;
    ensure_item_active(&case, plan_item_id)?;

    case.set_plan_item_state(plan_item_id, PlanItemState::Completed);
    ctx.save_case(case);
    ctx.touch_case(case_instance_id);
    tracing::debug!(case_instance_id = %case_instance_id, plan_item_id = %plan_item_id, "Plan item completed");
    Ok(())
}

pub(super) async fn complete_human_task(
    ctx: &mut CommandContext,
    case_instance_id: Uuid,
    plan_item_id: String,
    variables: Variables,
) -> EngineResult<()> {
    let mut case = ctx.load_case(case_instance_id).await?;
    ensure_active(&case)?;
    ensure_item_active(&case, &plan_item_id)?;

    let definition = ctx.services().definitions.case(&case.definition_key)?;
    let is_human_task = definition
        .find_plan_item(&plan_item_id)
        .map_or(false, |item| item.kind == PlanItemKind::HumanTask);
    if !is_human_task {
        return Err(EngineError::InvalidState(format!(
            "plan item '{}' is not a human task",
            plan_item_id
        )));
    }

    case.merge_variables(&variables);
    ctx.save_case(case);
    ctx.plan(Operation::CompletePlanItem {
        case_instance_id,
        plan_item_id,
    });
    Ok(())
}

pub(super) async fn set_variables(
    ctx: &mut CommandContext,
    case_instance_id: Uuid,
    variables: Variables,
) -> EngineResult<()> {
    let mut case = ctx.load_case(case_instance_id).await?;
    ensure_active(&case)?;

    case.merge_variables(&variables);
    ctx.save_case(case);
    ctx.touch_case(case_instance_id);
    Ok(())
}
