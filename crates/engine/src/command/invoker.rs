//! Terminal interceptor: drains the agenda.

use async_trait::async_trait;
use serde_json::Value;

use super::context::CommandContext;
use super::interceptor::{CommandInterceptor, Next};
use super::{operations, Operation};
use crate::error::EngineResult;

/// Plans the triggering operation and drains the agenda.
#[derive(Debug, Default)]
pub struct CommandInvoker;

#[async_trait]
impl CommandInterceptor for CommandInvoker {
    fn name(&self) -> &'static str {
        "invoker"
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        ctx: &mut CommandContext,
        operation: Operation,
        _next: Next<'_>,
    ) -> EngineResult<Value> {
        ctx.plan(operation);
        run_to_completion(ctx).await?;
        Ok(ctx.take_result().unwrap_or(Value::Null))
    }
}

/// Drain the agenda, then give touched cases one re-evaluation pass.
///
/// Cases touched during the re-evaluation pass itself are not evaluated
/// again; the next command that touches them picks them up.
pub(crate) async fn run_to_completion(ctx: &mut CommandContext) -> EngineResult<()> {
    drain(ctx).await?;

    let touched = ctx.take_touched_cases();
    if touched.is_empty() {
        return Ok(());
    }

    tracing::trace!(cases = touched.len(), "Re-evaluating touched cases");
    for case_instance_id in touched {
        ctx.plan(Operation::EvaluateCriteria { case_instance_id });
    }
    drain(ctx).await?;

    let deferred = ctx.take_touched_cases();
    if !deferred.is_empty() {
        tracing::debug!(
            cases = deferred.len(),
            "Cases touched during re-evaluation left for the next command"
        );
    }
    Ok(())
}

/// Execute planned operations one at a time until none are left.
///
/// The first failure clears the rest of the agenda and propagates.
async fn drain(ctx: &mut CommandContext) -> EngineResult<()> {
    ctx.agenda_mut().set_draining(true);

    while let Some(operation) = ctx.agenda_mut().next() {
        let name = operation.name();
        tracing::trace!(operation = name, "Executing operation");

        if let Err(e) = operations::run(ctx, operation).await {
            let remaining = ctx.agenda().len();
            tracing::debug!(operation = name, remaining, error = %e, "Operation failed, abandoning agenda");
            ctx.agenda_mut().clear();
            ctx.agenda_mut().set_draining(false);
            ctx.set_failure(e.to_string());
            return Err(e);
        }
    }

    ctx.agenda_mut().set_draining(false);
    Ok(())
}
