//! Per-command unit of work.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::agenda::{Agenda, Operation};
use super::transaction::TransactionContext;
use super::{invoker, operations};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::job::Job;
use crate::model::{CaseInstance, EventSubscription, ProcessInstance};
use crate::services::EngineServices;
use crate::store::{EngineStore, Lookup, Session};

/// State of one command execution.
///
/// Holds the session (entities read and written so far), the transaction
/// listeners, and the agenda of planned operations. Passed explicitly to
/// every operation, handler and delegate; never shared between commands.
pub struct CommandContext {
    services: Arc<EngineServices>,
    session: Session,
    transaction: TransactionContext,
    agenda: Agenda,
    result: Option<Value>,
    nesting: usize,
    failure: Option<String>,
    touched_cases: Vec<Uuid>,
}

impl CommandContext {
    pub fn new(services: Arc<EngineServices>) -> Self {
        Self {
            services,
            session: Session::new(),
            transaction: TransactionContext::new(),
            agenda: Agenda::new(),
            result: None,
            nesting: 0,
            failure: None,
            touched_cases: Vec::new(),
        }
    }

    pub fn services(&self) -> &Arc<EngineServices> {
        &self.services
    }

    pub fn store(&self) -> Arc<dyn EngineStore> {
        self.services.store.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.services.clock.now()
    }

    pub fn plan(&mut self, operation: Operation) {
        self.agenda.plan(operation);
    }

    pub fn agenda(&self) -> &Agenda {
        &self.agenda
    }

    pub fn agenda_mut(&mut self) -> &mut Agenda {
        &mut self.agenda
    }

    pub fn transaction(&self) -> &TransactionContext {
        &self.transaction
    }

    pub fn transaction_mut(&mut self) -> &mut TransactionContext {
        &mut self.transaction
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Whether an operation is running nested inside another one.
    pub fn is_reused(&self) -> bool {
        self.nesting > 0
    }

    /// Message of the operation failure that aborted the agenda, if any.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub(crate) fn set_failure(&mut self, message: String) {
        self.failure = Some(message);
    }

    pub fn set_result_if_absent(&mut self, value: Value) {
        if self.result.is_none() {
            self.result = Some(value);
        }
    }

    pub fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    /// Mark a case for sentry re-evaluation once the agenda has drained.
    pub fn touch_case(&mut self, case_instance_id: Uuid) {
        if !self.touched_cases.contains(&case_instance_id) {
            self.touched_cases.push(case_instance_id);
        }
    }

    pub(crate) fn take_touched_cases(&mut self) -> Vec<Uuid> {
        std::mem::take(&mut self.touched_cases)
    }

    /// Run an operation from inside another one.
    ///
    /// While the agenda is draining the operation runs in place and its
    /// result is returned; otherwise it is planned and the agenda drains.
    pub fn execute_nested(&mut self, operation: Operation) -> BoxFuture<'_, EngineResult<Value>> {
        Box::pin(async move {
            if self.agenda.is_draining() {
                let outer = self.result.take();
                self.nesting += 1;
                let outcome = operations::run(self, operation).await;
                self.nesting -= 1;
                let inner = std::mem::replace(&mut self.result, outer);
                outcome?;
                Ok(inner.unwrap_or(Value::Null))
            } else {
                self.agenda.plan(operation);
                invoker::run_to_completion(self).await?;
                Ok(self.result.take().unwrap_or(Value::Null))
            }
        })
    }

    pub async fn load_process(&mut self, id: Uuid) -> EngineResult<ProcessInstance> {
        match self.session.processes.lookup(id) {
            Lookup::Cached(process) => Ok(process),
            Lookup::Deleted => Err(not_found("process instance", id)),
            Lookup::Unknown => {
                let process = self
                    .services
                    .store
                    .load_process(id)
                    .await?
                    .ok_or_else(|| not_found("process instance", id))?;
                self.session.processes.cache_loaded(process.clone());
                Ok(process)
            }
        }
    }

    pub fn insert_process(&mut self, process: ProcessInstance) {
        self.session.processes.insert_new(process);
    }

    pub fn save_process(&mut self, process: ProcessInstance) {
        self.session.processes.update(process);
    }

    pub async fn load_case(&mut self, id: Uuid) -> EngineResult<CaseInstance> {
        match self.session.cases.lookup(id) {
            Lookup::Cached(case) => Ok(case),
            Lookup::Deleted => Err(not_found("case instance", id)),
            Lookup::Unknown => {
                let case = self
                    .services
                    .store
                    .load_case(id)
                    .await?
                    .ok_or_else(|| not_found("case instance", id))?;
                self.session.cases.cache_loaded(case.clone());
                Ok(case)
            }
        }
    }

    pub fn insert_case(&mut self, case: CaseInstance) {
        self.session.cases.insert_new(case);
    }

    pub fn save_case(&mut self, case: CaseInstance) {
        self.session.cases.update(case);
    }

    pub async fn find_job(&mut self, id: Uuid) -> EngineResult<Option<Job>> {
        match self.session.jobs.lookup(id) {
            Lookup::Cached(job) => Ok(Some(job)),
            Lookup::Deleted => Ok(None),
            Lookup::Unknown => {
                let job = self.services.store.find_job(id).await?;
                if let Some(job) = &job {
                    self.session.jobs.cache_loaded(job.clone());
                }
                Ok(job)
            }
        }
    }

    pub async fn load_job(&mut self, id: Uuid) -> EngineResult<Job> {
        self.find_job(id).await?.ok_or_else(|| not_found("job", id))
    }

    /// Jobs of a process as this unit of work sees them.
    pub async fn jobs_for_process(&mut self, process_instance_id: Uuid) -> EngineResult<Vec<Job>> {
        let stored = self
            .services
            .store
            .find_jobs_for_process(process_instance_id)
            .await?;

        let mut jobs = Vec::with_capacity(stored.len());
        for job in stored {
            match self.session.jobs.lookup(job.id) {
                Lookup::Cached(cached) => jobs.push(cached),
                Lookup::Deleted => {}
                Lookup::Unknown => {
                    self.session.jobs.cache_loaded(job.clone());
                    jobs.push(job);
                }
            }
        }
        jobs.extend(
            self.session
                .jobs
                .pending_inserts()
                .filter(|job| job.process_instance_id == Some(process_instance_id))
                .cloned(),
        );
        Ok(jobs)
    }

    pub fn insert_job(&mut self, job: Job) {
        self.session.jobs.insert_new(job);
    }

    pub fn save_job(&mut self, job: Job) {
        self.session.jobs.update(job);
    }

    pub fn delete_job(&mut self, job: Job) {
        self.session.jobs.delete(job);
    }

    pub fn insert_subscription(&mut self, subscription: EventSubscription) {
        self.session.subscriptions.insert_new(subscription);
    }

    pub fn delete_subscription(&mut self, subscription: EventSubscription) {
        self.session.subscriptions.delete(subscription);
    }

    /// Subscriptions matching an event, including ones created in this unit
    /// of work and excluding ones already consumed by it.
    pub async fn find_subscriptions(
        &mut self,
        event_name: &str,
        correlation_keys: &[String],
        tenant_id: Option<&str>,
    ) -> EngineResult<Vec<EventSubscription>> {
        let stored = self
            .services
            .store
            .find_subscriptions(event_name, correlation_keys, tenant_id)
            .await?;

        let mut subscriptions: Vec<EventSubscription> = stored
            .into_iter()
            .filter(|s| !self.session.subscriptions.is_deleted(s.id))
            .collect();
        subscriptions.extend(
            self.session
                .subscriptions
                .pending_inserts()
                .filter(|s| s.matches(event_name, correlation_keys))
                .filter(|s| tenant_id.map_or(true, |tenant| s.tenant_id.as_deref() == Some(tenant)))
                .cloned(),
        );
        Ok(subscriptions)
    }
}

fn not_found(kind: &str, id: Uuid) -> EngineError {
    EngineError::NotFound(format!("{} {}", kind, id))
}
