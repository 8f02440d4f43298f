//! Transaction phases and deferred listeners.
//!
//! Commit order:
//! 1. `Committing` listeners run against the still-open session
//! 2. the session's write batch is applied to the store in one call
//! 3. `Committed` listeners run in a fresh unit of work, which drains its
//!    own agenda and commits on its own
//!
//! Rollback order:
//! 1. `RollingBack` listeners run; failures are recorded
//! 2. pending writes and planned operations are discarded
//! 3. `RolledBack` listeners run; failures are recorded
//!
//! A unit that rolls back never fires its `Committed` listeners.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::context::CommandContext;
use super::interceptor::{CommandInterceptor, Next};
use super::invoker;
use super::Operation;
use crate::error::EngineResult;
use crate::services::EngineServices;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

impl TransactionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionPhase::Committing => "committing",
            TransactionPhase::Committed => "committed",
            TransactionPhase::RollingBack => "rolling_back",
            TransactionPhase::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback fired once when its phase is reached.
pub type TransactionListener = Box<dyn FnOnce(&mut CommandContext) -> EngineResult<()> + Send>;

/// A listener failure that did not abort its phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerFailure {
    pub phase: TransactionPhase,
    pub message: String,
}

/// Phase-keyed listeners of one unit of work.
#[derive(Default)]
pub struct TransactionContext {
    listeners: HashMap<TransactionPhase, Vec<TransactionListener>>,
    failures: Vec<ListenerFailure>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&mut self, phase: TransactionPhase, listener: F)
    where
        F: FnOnce(&mut CommandContext) -> EngineResult<()> + Send + 'static,
    {
        self.listeners
            .entry(phase)
            .or_default()
            .push(Box::new(listener));
    }

    pub fn listener_count(&self, phase: TransactionPhase) -> usize {
        self.listeners.get(&phase).map_or(0, Vec::len)
    }

    pub(crate) fn take_listeners(&mut self, phase: TransactionPhase) -> Vec<TransactionListener> {
        self.listeners.remove(&phase).unwrap_or_default()
    }

    pub(crate) fn record_failure(&mut self, phase: TransactionPhase, message: String) {
        self.failures.push(ListenerFailure { phase, message });
    }

    /// Listener failures recorded during rollback.
    pub fn failures(&self) -> &[ListenerFailure] {
        &self.failures
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(phase, listeners)| (phase.as_str(), listeners.len()))
            .collect();
        f.debug_struct("TransactionContext")
            .field("listeners", &counts)
            .field("failures", &self.failures)
            .finish()
    }
}

/// Commits the unit of work when the rest of the chain succeeds and rolls
/// it back otherwise.
#[derive(Debug, Default)]
pub struct TransactionInterceptor;

#[async_trait]
impl CommandInterceptor for TransactionInterceptor {
    fn name(&self) -> &'static str {
        "transaction"
    }

    async fn execute(
        &self,
        ctx: &mut CommandContext,
        operation: Operation,
        next: Next<'_>,
    ) -> EngineResult<Value> {
        match next.run(ctx, operation).await {
            Ok(value) => {
                commit(ctx).await?;
                Ok(value)
            }
            Err(e) => {
                rollback(ctx);
                Err(e)
            }
        }
    }
}

/// Flush the unit of work, then run its committed listeners.
pub(crate) async fn commit(ctx: &mut CommandContext) -> EngineResult<()> {
    if let Err(e) = flush(ctx).await {
        rollback(ctx);
        return Err(e);
    }

    let committed = ctx.transaction_mut().take_listeners(TransactionPhase::Committed);
    run_committed_listeners(ctx.services().clone(), committed).await;
    Ok(())
}

async fn flush(ctx: &mut CommandContext) -> EngineResult<()> {
    let committing = ctx
        .transaction_mut()
        .take_listeners(TransactionPhase::Committing);
    for listener in committing {
        listener(ctx)?;
    }

    let batch = ctx.session_mut().take_batch();
    if batch.is_empty() {
        return Ok(());
    }
    let writes = batch.len();
    ctx.store().commit(batch).await?;
    tracing::trace!(writes, "Unit of work committed");
    Ok(())
}

/// Run committed listeners, each generation in its own unit of work.
///
/// The outer unit is already durable, so failures here are logged and go
/// no further.
async fn run_committed_listeners(
    services: Arc<EngineServices>,
    mut pending: Vec<TransactionListener>,
) {
    while !pending.is_empty() {
        let mut unit = CommandContext::new(services.clone());
        match run_committed_unit(&mut unit, std::mem::take(&mut pending)).await {
            Ok(()) => {
                pending = unit
                    .transaction_mut()
                    .take_listeners(TransactionPhase::Committed);
            }
            Err(e) => {
                tracing::error!(error = %e, "Post-commit unit of work failed");
                rollback(&mut unit);
            }
        }
    }
}

async fn run_committed_unit(
    unit: &mut CommandContext,
    listeners: Vec<TransactionListener>,
) -> EngineResult<()> {
    for listener in listeners {
        listener(unit)?;
    }
    invoker::run_to_completion(unit).await?;
    flush(unit).await
}

/// Discard the unit of work, firing rollback listeners around it.
pub(crate) fn rollback(ctx: &mut CommandContext) {
    fire_recording(ctx, TransactionPhase::RollingBack);

    ctx.session_mut().discard();
    ctx.agenda_mut().clear();
    ctx.transaction_mut()
        .take_listeners(TransactionPhase::Committing);
    ctx.transaction_mut()
        .take_listeners(TransactionPhase::Committed);

    fire_recording(ctx, TransactionPhase::RolledBack);

    for failure in ctx.transaction().failures() {
        tracing::warn!(phase = %failure.phase, error = %failure.message, "Transaction listener failed during rollback");
    }
}

fn fire_recording(ctx: &mut CommandContext, phase: TransactionPhase) {
    let listeners = ctx.transaction_mut().take_listeners(phase);
    for listener in listeners {
        if let Err(e) = listener(ctx) {
            ctx.transaction_mut().record_failure(phase, e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_listeners_grouped_by_phase() {
        let mut transaction = TransactionContext::new();
        transaction.add_listener(TransactionPhase::Committed, |_| Ok(()));
        transaction.add_listener(TransactionPhase::Committed, |_| Ok(()));
        transaction.add_listener(TransactionPhase::RolledBack, |_| {
            Err(EngineError::Internal("boom".to_string()))
        });

        assert_eq!(transaction.listener_count(TransactionPhase::Committed), 2);
        assert_eq!(transaction.take_listeners(TransactionPhase::Committed).len(), 2);
        assert_eq!(transaction.listener_count(TransactionPhase::Committed), 0);
        assert_eq!(transaction.listener_count(TransactionPhase::RolledBack), 1);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(TransactionPhase::RollingBack.to_string(), "rolling_back");
    }
}
