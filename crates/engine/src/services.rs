//! Shared services handed to every command context.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::delegate::DelegateRegistry;
use crate::job::{JobHandlerRegistry, JobManager};
use crate::model::DefinitionRepository;
use crate::store::EngineStore;

/// Long-lived engine collaborators.
pub struct EngineServices {
    pub store: Arc<dyn EngineStore>,
    pub clock: Arc<dyn Clock>,
    pub config: EngineConfig,
    pub definitions: DefinitionRepository,
    pub delegates: DelegateRegistry,
    pub job_handlers: JobHandlerRegistry,
    pub job_manager: JobManager,
}

impl EngineServices {
    pub fn new(
        store: Arc<dyn EngineStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        job_manager: JobManager,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            definitions: DefinitionRepository::new(),
            delegates: DelegateRegistry::new(),
            job_handlers: JobHandlerRegistry::with_defaults(),
            job_manager,
        }
    }

    pub fn with_delegates(mut self, delegates: DelegateRegistry) -> Self {
        self.delegates = delegates;
        self
    }

    pub fn with_job_handlers(mut self, job_handlers: JobHandlerRegistry) -> Self {
        self.job_handlers = job_handlers;
        self
    }

    pub fn with_definitions(mut self, definitions: DefinitionRepository) -> Self {
        self.definitions = definitions;
        self
    }
}
