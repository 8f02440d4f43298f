//! Job handler registry and dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::types::Job;
use crate::command::{CommandContext, Operation};
use crate::error::{EngineError, EngineResult};

/// Handler type of jobs that enter an `async_before` activity.
pub const ASYNC_CONTINUATION: &str = "async-continuation";

/// Handler type of jobs that fire a timer activity.
pub const TRIGGER_TIMER: &str = "trigger-timer";

/// Executes the payload of one job type.
///
/// Runs inside the command that claimed the job; anything it writes
/// commits or rolls back together with the job's completion.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Returns the job type this handler serves.
    fn handler_type(&self) -> &'static str;

    async fn execute(&self, ctx: &mut CommandContext, job: &Job) -> EngineResult<()>;
}

/// Registry of job handlers keyed by handler type.
#[derive(Clone, Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in process handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(AsyncContinuationHandler);
        registry.register(TriggerTimerHandler);
        registry
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register<H: JobHandler + 'static>(&mut self, handler: H) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn JobHandler>) {
        let handler_type = handler.handler_type().to_string();
        tracing::debug!(handler_type = %handler_type, "Registered job handler");
        self.handlers.insert(handler_type, handler);
    }

    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(handler_type).cloned()
    }

    pub fn has(&self, handler_type: &str) -> bool {
        self.handlers.contains_key(handler_type)
    }

    /// List all registered handler types.
    pub fn list(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    /// Look up the handler for a job and run it.
    pub async fn execute(&self, ctx: &mut CommandContext, job: &Job) -> EngineResult<()> {
        let handler = self.get(&job.handler_type).ok_or_else(|| {
            EngineError::NotFound(format!("job handler '{}'", job.handler_type))
        })?;
        handler.execute(ctx, job).await
    }
}

/// Configuration of jobs bound to a process activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityJobConfig {
    pub activity_id: String,
}

impl ActivityJobConfig {
    pub fn new(activity_id: impl Into<String>) -> Self {
        Self {
            activity_id: activity_id.into(),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "activity_id": self.activity_id })
    }

    fn from_job(job: &Job) -> EngineResult<(uuid::Uuid, Self)> {
        let process_instance_id = job.process_instance_id.ok_or_else(|| {
            EngineError::InvalidState(format!("job {} has no process instance", job.id))
        })?;
        let config: Self = serde_json::from_value(job.handler_config.clone())?;
        Ok((process_instance_id, config))
    }
}

/// Enters the activity a process was parked at.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsyncContinuationHandler;

#[async_trait]
impl JobHandler for AsyncContinuationHandler {
    fn handler_type(&self) -> &'static str {
        ASYNC_CONTINUATION
    }

    async fn execute(&self, ctx: &mut CommandContext, job: &Job) -> EngineResult<()> {
        let (process_instance_id, config) = ActivityJobConfig::from_job(job)?;
        ctx.execute_nested(Operation::ExecuteActivity {
            process_instance_id,
            activity_id: config.activity_id,
        })
        .await?;
        Ok(())
    }
}

/// Fires the timer activity a process is waiting at.
#[derive(Debug, Default, Clone, Copy)]
pub struct TriggerTimerHandler;

#[async_trait]
impl JobHandler for TriggerTimerHandler {
    fn handler_type(&self) -> &'static str {
        TRIGGER_TIMER
    }

    async fn execute(&self, ctx: &mut CommandContext, job: &Job) -> EngineResult<()> {
        let (process_instance_id, config) = ActivityJobConfig::from_job(job)?;
        ctx.execute_nested(Operation::FireTimer {
            process_instance_id,
            activity_id: config.activity_id,
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = JobHandlerRegistry::with_defaults();
        assert!(registry.has(ASYNC_CONTINUATION));
        assert!(registry.has(TRIGGER_TIMER));
        assert!(!registry.has("http"));

        let mut types = registry.list();
        types.sort();
        assert_eq!(types, vec![ASYNC_CONTINUATION, TRIGGER_TIMER]);
    }

    #[test]
    fn test_activity_config_round_trip() {
        let value = ActivityJobConfig::new("ship").to_value();
        let parsed: ActivityJobConfig = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.activity_id, "ship");
    }
}
