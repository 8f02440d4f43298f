//! In-process store.
//!
//! Backs single-process deployments and the test suite. Commits are applied
//! to a copy of the tables and swapped in only when every write passed its
//! version check, so a failed batch leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{EngineStore, JobQuery, Write, WriteBatch};
use crate::error::{EngineError, EngineResult};
use crate::job::{Job, JobState};
use crate::model::{CaseInstance, EventSubscription, ProcessInstance};

#[derive(Debug, Clone, Default)]
struct Tables {
    processes: HashMap<Uuid, ProcessInstance>,
    cases: HashMap<Uuid, CaseInstance>,
    jobs: HashMap<Uuid, Job>,
    subscriptions: HashMap<Uuid, EventSubscription>,
}

impl Tables {
    fn apply(&mut self, write: Write) -> EngineResult<()> {
        match write {
            Write::InsertProcess(process) => insert(&mut self.processes, process.id, process),
            Write::UpdateProcess(mut process) => {
                check_version(&self.processes, process.id, process.version, |p| p.version)?;
                process.version += 1;
                self.processes.insert(process.id, process);
                Ok(())
            }
            Write::InsertCase(case) => insert(&mut self.cases, case.id, case),
            Write::UpdateCase(mut case) => {
                check_version(&self.cases, case.id, case.version, |c| c.version)?;
                case.version += 1;
                self.cases.insert(case.id, case);
                Ok(())
            }
            Write::InsertJob(job) => insert(&mut self.jobs, job.id, job),
            Write::UpdateJob(mut job) => {
                check_version(&self.jobs, job.id, job.version, |j| j.version)?;
                job.version += 1;
                self.jobs.insert(job.id, job);
                Ok(())
            }
            Write::DeleteJob { id, version } => {
                check_version(&self.jobs, id, version, |j| j.version)?;
                self.jobs.remove(&id);
                Ok(())
            }
            Write::InsertSubscription(subscription) => {
                insert(&mut self.subscriptions, subscription.id, subscription)
            }
            Write::DeleteSubscription(id) => match self.subscriptions.remove(&id) {
                Some(_) => Ok(()),
                None => Err(EngineError::OptimisticLock(format!(
                    "subscription {} was already removed",
                    id
                ))),
            },
        }
    }
}

fn insert<T>(table: &mut HashMap<Uuid, T>, id: Uuid, row: T) -> EngineResult<()> {
    if table.contains_key(&id) {
        return Err(EngineError::OptimisticLock(format!("row {} already exists", id)));
    }
    table.insert(id, row);
    Ok(())
}

fn check_version<T>(
    table: &HashMap<Uuid, T>,
    id: Uuid,
    expected: u64,
    version: impl Fn(&T) -> u64,
) -> EngineResult<()> {
    match table.get(&id) {
        Some(row) if version(row) == expected => Ok(()),
        Some(row) => Err(EngineError::OptimisticLock(format!(
            "row {} is at version {}, expected {}",
            id,
            version(row),
            expected
        ))),
        None => Err(EngineError::OptimisticLock(format!(
            "row {} was removed concurrently",
            id
        ))),
    }
}

fn due_order(a: &Job, b: &Job) -> std::cmp::Ordering {
    a.due_date
        .cmp(&b.due_date)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// [`EngineStore`] kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    due_job_queries: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `find_due_jobs` calls served so far.
    pub fn due_job_queries(&self) -> usize {
        self.due_job_queries.load(Ordering::SeqCst)
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Snapshot of every job.
    pub async fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.tables.read().await.jobs.values().cloned().collect();
        jobs.sort_by(due_order);
        jobs
    }

    pub async fn subscriptions(&self) -> Vec<EventSubscription> {
        self.tables
            .read()
            .await
            .subscriptions
            .values()
            .cloned()
            .collect()
    }

    async fn scan_jobs(&self, query: &JobQuery, filter: impl Fn(&Job) -> bool) -> Vec<Job> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<Job> = tables
            .jobs
            .values()
            .filter(|job| job.matches_tenant(query.tenant_id.as_deref()))
            .filter(|job| filter(job))
            .cloned()
            .collect();
        jobs.sort_by(due_order);
        jobs.truncate(query.limit);
        jobs
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn find_due_jobs(&self, query: &JobQuery) -> EngineResult<Vec<Job>> {
        self.due_job_queries.fetch_add(1, Ordering::SeqCst);
        let now = query.now;
        Ok(self.scan_jobs(query, |job| job.is_acquirable(now)).await)
    }

    async fn claim_job(
        &self,
        id: Uuid,
        expected_version: u64,
        lock_owner: &str,
        lock_expiration: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(job) = tables.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.version != expected_version || job.state != JobState::Executable || job.suspended {
            return Ok(false);
        }

        job.lock_owner = Some(lock_owner.to_string());
        job.lock_expiration = Some(lock_expiration);
        job.version += 1;
        Ok(true)
    }

    async fn unacquire_job(&self, id: Uuid, lock_owner: &str) -> EngineResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.jobs.get_mut(&id) {
            Some(job) if job.lock_owner.as_deref() == Some(lock_owner) => {
                job.release_lock();
                job.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_due_timers(&self, query: &JobQuery) -> EngineResult<Vec<Job>> {
        let now = query.now;
        Ok(self
            .scan_jobs(query, |job| {
                job.state == JobState::Timer && !job.suspended && job.is_due(now)
            })
            .await)
    }

    async fn find_expired_jobs(&self, query: &JobQuery) -> EngineResult<Vec<Job>> {
        let now = query.now;
        Ok(self
            .scan_jobs(query, |job| {
                job.state == JobState::Executable && job.is_lock_expired(now)
            })
            .await)
    }

    async fn reset_expired_job(&self, id: Uuid, expected_version: u64) -> EngineResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.jobs.get_mut(&id) {
            Some(job) if job.version == expected_version => {
                job.release_lock();
                job.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_job(&self, id: Uuid) -> EngineResult<Option<Job>> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn find_dead_letter_jobs(&self, tenant_id: Option<&str>) -> EngineResult<Vec<Job>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<Job> = tables
            .jobs
            .values()
            .filter(|job| job.state == JobState::DeadLetter && job.matches_tenant(tenant_id))
            .cloned()
            .collect();
        jobs.sort_by(due_order);
        Ok(jobs)
    }

    async fn find_jobs_for_process(&self, process_instance_id: Uuid) -> EngineResult<Vec<Job>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<Job> = tables
            .jobs
            .values()
            .filter(|job| job.process_instance_id == Some(process_instance_id))
            .cloned()
            .collect();
        jobs.sort_by(due_order);
        Ok(jobs)
    }

    async fn load_process(&self, id: Uuid) -> EngineResult<Option<ProcessInstance>> {
        Ok(self.tables.read().await.processes.get(&id).cloned())
    }

    async fn load_case(&self, id: Uuid) -> EngineResult<Option<CaseInstance>> {
        Ok(self.tables.read().await.cases.get(&id).cloned())
    }

    async fn find_subscriptions(
        &self,
        event_name: &str,
        correlation_keys: &[String],
        tenant_id: Option<&str>,
    ) -> EngineResult<Vec<EventSubscription>> {
        let tables = self.tables.read().await;
        let mut subscriptions: Vec<EventSubscription> = tables
            .subscriptions
            .values()
            .filter(|s| s.matches(event_name, correlation_keys))
            .filter(|s| tenant_id.map_or(true, |tenant| s.tenant_id.as_deref() == Some(tenant)))
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(subscriptions)
    }

    async fn commit(&self, batch: WriteBatch) -> EngineResult<()> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let writes = batch.len();
        for write in batch {
            let description = write.describe();
            staged.apply(write).map_err(|e| {
                tracing::debug!(write = %description, error = %e, "Commit rejected");
                e
            })?;
        }
        *tables = staged;
        self.commits.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(writes, "Batch committed");
        Ok(())
    }
}
