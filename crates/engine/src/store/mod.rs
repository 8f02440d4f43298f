//! Persistence seam of the engine.
//!
//! The store is the only state shared between workers. Reads are plain
//! queries; every mutation of process, case, job and subscription rows goes
//! through [`EngineStore::commit`] as one atomic, version-checked
//! [`WriteBatch`]. The few single-row job updates the executor loops need
//! (claim, unacquire, reset) are conditional writes of their own.

pub mod memory;
pub mod session;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::job::Job;
use crate::model::{CaseInstance, EventSubscription, ProcessInstance};

pub use memory::MemoryStore;
pub use session::{Entity, EntityCache, Lookup, Session};

/// Parameters of a job scan.
#[derive(Debug, Clone)]
pub struct JobQuery {
    pub now: DateTime<Utc>,
    /// `None` scans every tenant.
    pub tenant_id: Option<String>,
    pub limit: usize,
}

impl JobQuery {
    pub fn new(now: DateTime<Utc>, tenant_id: Option<String>, limit: usize) -> Self {
        Self {
            now,
            tenant_id,
            limit,
        }
    }
}

/// One pending mutation.
///
/// Updates and deletes carry the version the writer read; the store rejects
/// them with [`crate::EngineError::OptimisticLock`] when the row moved on,
/// and stores updated rows with `version + 1`.
#[derive(Debug, Clone)]
pub enum Write {
    InsertProcess(ProcessInstance),
    UpdateProcess(ProcessInstance),
    InsertCase(CaseInstance),
    UpdateCase(CaseInstance),
    InsertJob(Job),
    UpdateJob(Job),
    DeleteJob { id: Uuid, version: u64 },
    InsertSubscription(EventSubscription),
    DeleteSubscription(Uuid),
}

impl Write {
    pub fn describe(&self) -> String {
        match self {
            Write::InsertProcess(p) => format!("insert process {}", p.id),
            Write::UpdateProcess(p) => format!("update process {}", p.id),
            Write::InsertCase(c) => format!("insert case {}", c.id),
            Write::UpdateCase(c) => format!("update case {}", c.id),
            Write::InsertJob(j) => format!("insert job {}", j.id),
            Write::UpdateJob(j) => format!("update job {}", j.id),
            Write::DeleteJob { id, .. } => format!("delete job {}", id),
            Write::InsertSubscription(s) => format!("insert subscription {}", s.id),
            Write::DeleteSubscription(id) => format!("delete subscription {}", id),
        }
    }
}

/// Writes applied all-or-nothing by [`EngineStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Write> {
        self.writes.iter()
    }
}

impl IntoIterator for WriteBatch {
    type Item = Write;
    type IntoIter = std::vec::IntoIter<Write>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

/// Shared store of engine state.
#[async_trait]
pub trait EngineStore: Send + Sync {
    /// Acquirable jobs ordered by due date (jobs without one first), then
    /// creation time.
    async fn find_due_jobs(&self, query: &JobQuery) -> EngineResult<Vec<Job>>;

    /// Claim a job if it is still at `expected_version`, executable and not
    /// suspended.
    ///
    /// # Arguments
    ///
    /// * `id` - Job to claim
    /// * `expected_version` - Version the caller read the job at
    /// * `lock_owner` - Identity written on the claim
    /// * `lock_expiration` - When the reset-expired loop may release the claim
    ///
    /// # Returns
    ///
    /// `false` when another writer got there first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`](crate::EngineError::Store) when the
    /// store is unreachable.
    async fn claim_job(
        &self,
        id: Uuid,
        expected_version: u64,
        lock_owner: &str,
        lock_expiration: DateTime<Utc>,
    ) -> EngineResult<bool>;

    /// Clear the lock of a job held by `lock_owner`. Retries and due date
    /// are untouched.
    async fn unacquire_job(&self, id: Uuid, lock_owner: &str) -> EngineResult<bool>;

    /// Timer-state jobs whose due date has passed.
    async fn find_due_timers(&self, query: &JobQuery) -> EngineResult<Vec<Job>>;

    /// Executable jobs whose lock expired.
    async fn find_expired_jobs(&self, query: &JobQuery) -> EngineResult<Vec<Job>>;

    /// Clear an expired lock if the job is still at `expected_version`.
    async fn reset_expired_job(&self, id: Uuid, expected_version: u64) -> EngineResult<bool>;

    async fn find_job(&self, id: Uuid) -> EngineResult<Option<Job>>;

    async fn find_dead_letter_jobs(&self, tenant_id: Option<&str>) -> EngineResult<Vec<Job>>;

    async fn find_jobs_for_process(&self, process_instance_id: Uuid) -> EngineResult<Vec<Job>>;

    async fn load_process(&self, id: Uuid) -> EngineResult<Option<ProcessInstance>>;

    async fn load_case(&self, id: Uuid) -> EngineResult<Option<CaseInstance>>;

    /// Subscriptions for `event_name` that are unkeyed or whose key is one
    /// of `correlation_keys`.
    async fn find_subscriptions(
        &self,
        event_name: &str,
        correlation_keys: &[String],
        tenant_id: Option<&str>,
    ) -> EngineResult<Vec<EventSubscription>>;

    /// Apply a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::OptimisticLock`](crate::EngineError::OptimisticLock)
    /// when an update or delete finds a different version than the one it
    /// was read at. Nothing in the batch is applied then.
    async fn commit(&self, batch: WriteBatch) -> EngineResult<()>;
}
