//! Process engine facade.

use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::command::{CommandExecutor, Operation};
use crate::config::EngineConfig;
use crate::correlation::CorrelationParameter;
use crate::delegate::{DelegateRegistry, ServiceDelegate};
use crate::error::{EngineError, EngineResult};
use crate::executor::{AsyncExecutor, JobRunner, MessageJobConsumer, WorkerPool};
use crate::job::{DispatchMode, Job, JobHandler, JobHandlerRegistry, JobManager};
use crate::model::{
    CaseDefinition, CaseInstance, DefinitionRepository, Deployment, ProcessDefinition,
    ProcessInstance, Variables,
};
use crate::services::EngineServices;
use crate::store::{EngineStore, MemoryStore};

/// Entry point for driving processes and cases.
///
/// Every mutating call runs one command through the standard interceptor
/// chain and returns once that command has committed.
#[derive(Clone)]
pub struct ProcessEngine {
    executor: Arc<CommandExecutor>,
}

impl ProcessEngine {
    pub fn builder() -> ProcessEngineBuilder {
        ProcessEngineBuilder::default()
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    pub fn services(&self) -> &Arc<EngineServices> {
        self.executor.services()
    }

    pub fn store(&self) -> &Arc<dyn EngineStore> {
        &self.services().store
    }

    pub async fn start_process(
        &self,
        definition_key: &str,
        variables: Variables,
    ) -> EngineResult<Uuid> {
        self.start_process_for_tenant(definition_key, variables, None)
            .await
    }

    pub async fn start_process_for_tenant(
        &self,
        definition_key: &str,
        variables: Variables,
        tenant_id: Option<String>,
    ) -> EngineResult<Uuid> {
        let result = self
            .executor
            .execute(Operation::StartProcess {
                definition_key: definition_key.to_string(),
                variables,
                parent: None,
                tenant_id,
            })
            .await?;
        id_field(&result, "process_instance_id")
    }

    /// Complete the user task a process waits at.
    pub async fn complete_task(
        &self,
        process_instance_id: Uuid,
        activity_id: &str,
        variables: Variables,
    ) -> EngineResult<()> {
        self.executor
            .execute(Operation::CompleteTask {
                process_instance_id,
                activity_id: activity_id.to_string(),
                variables,
            })
            .await?;
        Ok(())
    }

    pub async fn start_case(&self, definition_key: &str, variables: Variables) -> EngineResult<Uuid> {
        self.start_case_for_tenant(definition_key, variables, None)
            .await
    }

    pub async fn start_case_for_tenant(
        &self,
        definition_key: &str,
        variables: Variables,
        tenant_id: Option<String>,
    ) -> EngineResult<Uuid> {
        let result = self
            .executor
            .execute(Operation::StartCase {
                definition_key: definition_key.to_string(),
                variables,
                tenant_id,
            })
            .await?;
        id_field(&result, "case_instance_id")
    }

    pub async fn complete_human_task(
        &self,
        case_instance_id: Uuid,
        plan_item_id: &str,
        variables: Variables,
    ) -> EngineResult<()> {
        self.executor
            .execute(Operation::CompleteHumanTask {
                case_instance_id,
                plan_item_id: plan_item_id.to_string(),
                variables,
            })
            .await?;
        Ok(())
    }

    /// Merge variables into a case and re-evaluate its sentries.
    pub async fn set_case_variables(
        &self,
        case_instance_id: Uuid,
        variables: Variables,
    ) -> EngineResult<()> {
        self.executor
            .execute(Operation::SetCaseVariables {
                case_instance_id,
                variables,
            })
            .await?;
        Ok(())
    }

    /// Deliver an event to the processes waiting for it. Returns the number
    /// of processes resumed.
    pub async fn correlate_event(
        &self,
        event_name: &str,
        parameters: Vec<CorrelationParameter>,
        payload: Variables,
        tenant_id: Option<String>,
    ) -> EngineResult<usize> {
        let result = self
            .executor
            .execute(Operation::CorrelateEvent {
                event_name: event_name.to_string(),
                parameters,
                payload,
                tenant_id,
            })
            .await?;
        result
            .get("matched")
            .and_then(Value::as_u64)
            .map(|matched| matched as usize)
            .ok_or_else(|| EngineError::Internal("correlation returned no match count".to_string()))
    }

    pub async fn suspend_process(&self, process_instance_id: Uuid) -> EngineResult<()> {
        self.executor
            .execute(Operation::SuspendProcess {
                process_instance_id,
            })
            .await?;
        Ok(())
    }

    pub async fn activate_process(&self, process_instance_id: Uuid) -> EngineResult<()> {
        self.executor
            .execute(Operation::ActivateProcess {
                process_instance_id,
            })
            .await?;
        Ok(())
    }

    /// Put a dead-letter job back into execution with `retries` attempts.
    pub async fn retry_dead_letter_job(&self, job_id: Uuid, retries: u32) -> EngineResult<()> {
        self.executor
            .execute(Operation::RetryDeadLetterJob { job_id, retries })
            .await?;
        Ok(())
    }

    pub async fn dead_letter_jobs(&self, tenant_id: Option<&str>) -> EngineResult<Vec<Job>> {
        self.store().find_dead_letter_jobs(tenant_id).await
    }

    pub async fn process_instance(&self, id: Uuid) -> EngineResult<Option<ProcessInstance>> {
        self.store().load_process(id).await
    }

    pub async fn case_instance(&self, id: Uuid) -> EngineResult<Option<CaseInstance>> {
        self.store().load_case(id).await
    }

    pub async fn jobs_for_process(&self, process_instance_id: Uuid) -> EngineResult<Vec<Job>> {
        self.store().find_jobs_for_process(process_instance_id).await
    }

    pub fn async_executor(&self, pool: Arc<dyn WorkerPool>) -> AsyncExecutor {
        AsyncExecutor::new(self.executor.clone(), pool)
    }

    pub fn message_consumer(&self) -> MessageJobConsumer {
        MessageJobConsumer::new(self.executor.clone())
    }

    pub fn job_runner(&self) -> JobRunner {
        JobRunner::new(
            self.executor.clone(),
            self.services().config.lock_owner.clone(),
        )
    }
}

fn id_field(result: &Value, field: &str) -> EngineResult<Uuid> {
    result
        .get(field)
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or_else(|| EngineError::Internal(format!("command result has no '{}'", field)))
}

/// Builder for [`ProcessEngine`].
pub struct ProcessEngineBuilder {
    store: Option<Arc<dyn EngineStore>>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    dispatch: DispatchMode,
    definitions: DefinitionRepository,
    delegates: DelegateRegistry,
    job_handlers: JobHandlerRegistry,
}

impl Default for ProcessEngineBuilder {
    fn default() -> Self {
        Self {
            store: None,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            dispatch: DispatchMode::InProcess,
            definitions: DefinitionRepository::new(),
            delegates: DelegateRegistry::new(),
            job_handlers: JobHandlerRegistry::with_defaults(),
        }
    }
}

impl ProcessEngineBuilder {
    /// Store to use; an in-memory store when unset.
    pub fn store(mut self, store: Arc<dyn EngineStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dispatch_mode(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn delegate(mut self, name: &str, delegate: Arc<dyn ServiceDelegate>) -> Self {
        self.delegates.register(name, delegate);
        self
    }

    pub fn delegate_fn<F>(mut self, name: &str, delegate: F) -> Self
    where
        F: Fn(&mut Variables) -> EngineResult<()> + Send + Sync + 'static,
    {
        self.delegates.register_fn(name, delegate);
        self
    }

    pub fn job_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.job_handlers.register(handler);
        self
    }

    pub fn deploy_process(self, definition: ProcessDefinition) -> Self {
        self.definitions.deploy_process(definition);
        self
    }

    pub fn deploy_case(self, definition: CaseDefinition) -> Self {
        self.definitions.deploy_case(definition);
        self
    }

    pub fn deployment(self, deployment: Deployment) -> Self {
        self.definitions.deploy(deployment);
        self
    }

    pub fn build(self) -> EngineResult<ProcessEngine> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn EngineStore>);
        let services = EngineServices::new(
            store,
            self.clock,
            self.config,
            JobManager::new(self.dispatch),
        )
        .with_definitions(self.definitions)
        .with_delegates(self.delegates)
        .with_job_handlers(self.job_handlers);

        let executor = CommandExecutor::with_default_chain(Arc::new(services))?;
        Ok(ProcessEngine {
            executor: Arc::new(executor),
        })
    }
}
