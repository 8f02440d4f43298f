//! Interceptor chain and command executor.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::context::CommandContext;
use super::invoker::CommandInvoker;
use super::transaction::TransactionInterceptor;
use super::Operation;
use crate::error::{EngineError, EngineResult};
use crate::services::EngineServices;

/// One link of the command pipeline.
#[async_trait]
pub trait CommandInterceptor: Send + Sync {
    fn name(&self) -> &'static str;

    /// A terminal interceptor ends the chain; nothing may follow it.
    fn is_terminal(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        ctx: &mut CommandContext,
        operation: Operation,
        next: Next<'_>,
    ) -> EngineResult<Value>;
}

/// The remainder of the chain after the current interceptor.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn CommandInterceptor>],
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: &mut CommandContext, operation: Operation) -> EngineResult<Value> {
        match self.chain.split_first() {
            Some((interceptor, rest)) => interceptor.execute(ctx, operation, Next { chain: rest }).await,
            None => Err(EngineError::Configuration(
                "interceptor chain ended without a terminal interceptor".to_string(),
            )),
        }
    }
}

/// Logs every command with its duration.
#[derive(Debug, Default)]
pub struct LogInterceptor;

#[async_trait]
impl CommandInterceptor for LogInterceptor {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn execute(
        &self,
        ctx: &mut CommandContext,
        operation: Operation,
        next: Next<'_>,
    ) -> EngineResult<Value> {
        let name = operation.name();
        let started = Instant::now();
        tracing::debug!(command = name, "Executing command");

        let result = next.run(ctx, operation).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::debug!(
                command = name,
                operations = ctx.agenda().executed(),
                elapsed_ms,
                "Command completed"
            ),
            Err(e) if e.is_optimistic_lock() => {
                tracing::debug!(command = name, error = %e, elapsed_ms, "Command lost a concurrent update")
            }
            Err(e) => tracing::warn!(command = name, error = %e, elapsed_ms, "Command failed"),
        }
        result
    }
}

/// Entry point for running operations through the interceptor chain.
#[derive(Clone)]
pub struct CommandExecutor {
    services: Arc<EngineServices>,
    chain: Arc<[Arc<dyn CommandInterceptor>]>,
}

impl CommandExecutor {
    pub fn builder(services: Arc<EngineServices>) -> CommandExecutorBuilder {
        CommandExecutorBuilder::new(services)
    }

    /// Executor with the standard chain: logging, transaction, invoker.
    pub fn with_default_chain(services: Arc<EngineServices>) -> EngineResult<Self> {
        Self::builder(services)
            .with(Arc::new(LogInterceptor))?
            .with(Arc::new(TransactionInterceptor))?
            .with(Arc::new(CommandInvoker))?
            .build()
    }

    pub fn services(&self) -> &Arc<EngineServices> {
        &self.services
    }

    pub fn new_context(&self) -> CommandContext {
        CommandContext::new(self.services.clone())
    }

    /// Run an operation in a new context and return its result.
    pub async fn execute(&self, operation: Operation) -> EngineResult<Value> {
        let mut ctx = self.new_context();
        self.execute_in(&mut ctx, operation).await
    }

    /// Run an operation in a caller-provided context.
    pub async fn execute_in(
        &self,
        ctx: &mut CommandContext,
        operation: Operation,
    ) -> EngineResult<Value> {
        Next { chain: &self.chain }.run(ctx, operation).await
    }
}

/// Assembles an interceptor chain.
pub struct CommandExecutorBuilder {
    services: Arc<EngineServices>,
    chain: Vec<Arc<dyn CommandInterceptor>>,
}

impl CommandExecutorBuilder {
    pub fn new(services: Arc<EngineServices>) -> Self {
        Self {
            services,
            chain: Vec::new(),
        }
    }

    /// Append an interceptor. Fails when the chain is already terminated.
    pub fn with(mut self, interceptor: Arc<dyn CommandInterceptor>) -> EngineResult<Self> {
        if let Some(last) = self.chain.last().filter(|last| last.is_terminal()) {
            return Err(EngineError::Configuration(format!(
                "interceptor '{}' cannot follow terminal interceptor '{}'",
                interceptor.name(),
                last.name()
            )));
        }
        self.chain.push(interceptor);
        Ok(self)
    }

    pub fn build(self) -> EngineResult<CommandExecutor> {
        if !self.chain.last().map_or(false, |last| last.is_terminal()) {
            return Err(EngineError::Configuration(
                "interceptor chain must end with a terminal interceptor".to_string(),
            ));
        }
        Ok(CommandExecutor {
            services: self.services,
            chain: self.chain.into(),
        })
    }
}
