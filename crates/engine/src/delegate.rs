//! Service task delegates.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::command::CommandContext;
use crate::error::{EngineError, EngineResult};
use crate::model::{ProcessInstance, Variables};

/// Work performed by a service task.
///
/// Runs inside the command that reached the task and may change the
/// instance's variables; an error rolls the whole command back.
#[async_trait]
pub trait ServiceDelegate: Send + Sync {
    async fn execute(
        &self,
        ctx: &mut CommandContext,
        process: &mut ProcessInstance,
    ) -> EngineResult<()>;
}

struct FnDelegate<F>(F);

#[async_trait]
impl<F> ServiceDelegate for FnDelegate<F>
where
    F: Fn(&mut Variables) -> EngineResult<()> + Send + Sync,
{
    async fn execute(
        &self,
        _ctx: &mut CommandContext,
        process: &mut ProcessInstance,
    ) -> EngineResult<()> {
        (self.0)(&mut process.variables)
    }
}

/// Delegates by name.
#[derive(Clone, Default)]
pub struct DelegateRegistry {
    delegates: HashMap<String, Arc<dyn ServiceDelegate>>,
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, delegate: Arc<dyn ServiceDelegate>) {
        self.delegates.insert(name.into(), delegate);
    }

    /// Register a synchronous delegate that only touches variables.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, delegate: F)
    where
        F: Fn(&mut Variables) -> EngineResult<()> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnDelegate(delegate)));
    }

    pub fn get(&self, name: &str) -> EngineResult<Arc<dyn ServiceDelegate>> {
        self.delegates
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("delegate '{}'", name)))
    }

    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }
}
