//! Unit-of-work cache for one command context.

use std::collections::HashMap;
use uuid::Uuid;

use super::{Write, WriteBatch};
use crate::job::Job;
use crate::model::{CaseInstance, EventSubscription, ProcessInstance};

/// A row the session can track.
pub trait Entity: Clone + Send {
    fn entity_id(&self) -> Uuid;

    fn insert_write(self) -> Write;

    /// `None` for entities that are never updated in place.
    fn update_write(self) -> Option<Write>;

    /// `None` for entities that are never deleted.
    fn delete_write(self) -> Option<Write>;
}

impl Entity for ProcessInstance {
    fn entity_id(&self) -> Uuid {
        self.id
    }

    fn insert_write(self) -> Write {
        Write::InsertProcess(self)
    }

    fn update_write(self) -> Option<Write> {
        Some(Write::UpdateProcess(self))
    }

    fn delete_write(self) -> Option<Write> {
        None
    }
}

impl Entity for CaseInstance {
    fn entity_id(&self) -> Uuid {
        self.id
    }

    fn insert_write(self) -> Write {
        Write::InsertCase(self)
    }

    fn update_write(self) -> Option<Write> {
        Some(Write::UpdateCase(self))
    }

    fn delete_write(self) -> Option<Write> {
        None
    }
}

impl Entity for Job {
    fn entity_id(&self) -> Uuid {
        self.id
    }

    fn insert_write(self) -> Write {
        Write::InsertJob(self)
    }

    fn update_write(self) -> Option<Write> {
        Some(Write::UpdateJob(self))
    }

    fn delete_write(self) -> Option<Write> {
        Some(Write::DeleteJob {
            id: self.id,
            version: self.version,
        })
    }
}

impl Entity for EventSubscription {
    fn entity_id(&self) -> Uuid {
        self.id
    }

    fn insert_write(self) -> Write {
        Write::InsertSubscription(self)
    }

    fn update_write(self) -> Option<Write> {
        None
    }

    fn delete_write(self) -> Option<Write> {
        Some(Write::DeleteSubscription(self.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    New,
    Loaded,
    Dirty,
    Deleted,
}

#[derive(Debug, Clone)]
struct Tracked<T> {
    value: T,
    status: Status,
}

/// Result of looking an entity up in the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Cached(T),
    /// Deleted earlier in this unit of work.
    Deleted,
    /// Not seen yet; ask the store.
    Unknown,
}

/// Tracked entities of one type.
#[derive(Debug)]
pub struct EntityCache<T> {
    entries: HashMap<Uuid, Tracked<T>>,
    /// First-touch order, so flushed writes are deterministic.
    order: Vec<Uuid>,
}

impl<T> Default for EntityCache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T: Entity> EntityCache<T> {
    pub fn lookup(&self, id: Uuid) -> Lookup<T> {
        match self.entries.get(&id) {
            Some(tracked) if tracked.status == Status::Deleted => Lookup::Deleted,
            Some(tracked) => Lookup::Cached(tracked.value.clone()),
            None => Lookup::Unknown,
        }
    }

    pub fn is_deleted(&self, id: Uuid) -> bool {
        matches!(self.lookup(id), Lookup::Deleted)
    }

    /// Remember a row read from the store. A row already tracked wins.
    pub fn cache_loaded(&mut self, value: T) {
        let id = value.entity_id();
        if !self.entries.contains_key(&id) {
            self.order.push(id);
            self.entries.insert(
                id,
                Tracked {
                    value,
                    status: Status::Loaded,
                },
            );
        }
    }

    pub fn insert_new(&mut self, value: T) {
        let id = value.entity_id();
        if !self.entries.contains_key(&id) {
            self.order.push(id);
        }
        self.entries.insert(
            id,
            Tracked {
                value,
                status: Status::New,
            },
        );
    }

    /// Record a modification. New rows stay new.
    pub fn update(&mut self, value: T) {
        let id = value.entity_id();
        let status = match self.entries.get(&id).map(|tracked| tracked.status) {
            Some(Status::New) => Status::New,
            None => {
                self.order.push(id);
                Status::Dirty
            }
            Some(_) => Status::Dirty,
        };
        self.entries.insert(id, Tracked { value, status });
    }

    /// Mark a row deleted. A row created in this unit of work is dropped.
    pub fn delete(&mut self, value: T) {
        let id = value.entity_id();
        match self.entries.get(&id).map(|tracked| tracked.status) {
            Some(Status::New) => {
                self.entries.remove(&id);
                self.order.retain(|tracked| *tracked != id);
            }
            previous => {
                if previous.is_none() {
                    self.order.push(id);
                }
                self.entries.insert(
                    id,
                    Tracked {
                        value,
                        status: Status::Deleted,
                    },
                );
            }
        }
    }

    /// Rows created in this unit of work, in creation order.
    pub fn pending_inserts(&self) -> impl Iterator<Item = &T> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|tracked| tracked.status == Status::New)
            .map(|tracked| &tracked.value)
    }

    fn drain_into(&mut self, batch: &mut WriteBatch) {
        let mut entries = std::mem::take(&mut self.entries);
        for id in self.order.drain(..) {
            let Some(tracked) = entries.remove(&id) else {
                continue;
            };
            let write = match tracked.status {
                Status::New => Some(tracked.value.insert_write()),
                Status::Dirty => tracked.value.update_write(),
                Status::Deleted => tracked.value.delete_write(),
                Status::Loaded => None,
            };
            if let Some(write) = write {
                batch.push(write);
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Entities read and written by one command context.
///
/// Owned exclusively by its context. [`Session::take_batch`] turns the
/// pending changes into a [`WriteBatch`] on commit; [`Session::discard`]
/// throws them away on rollback.
#[derive(Debug, Default)]
pub struct Session {
    pub processes: EntityCache<ProcessInstance>,
    pub cases: EntityCache<CaseInstance>,
    pub jobs: EntityCache<Job>,
    pub subscriptions: EntityCache<EventSubscription>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_batch(&mut self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        self.processes.drain_into(&mut batch);
        self.cases.drain_into(&mut batch);
        self.subscriptions.drain_into(&mut batch);
        self.jobs.drain_into(&mut batch);
        batch
    }

    pub fn discard(&mut self) {
        self.processes.clear();
        self.cases.clear();
        self.jobs.clear();
        self.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;
    use crate::model::Variables;
    use chrono::Utc;
    use serde_json::json;

    fn process() -> ProcessInstance {
        ProcessInstance::new("order", Variables::new(), None, None, Utc::now())
    }

    #[test]
    fn test_new_then_updated_is_single_insert() {
        let mut session = Session::new();
        let mut instance = process();
        session.processes.insert_new(instance.clone());
        instance.position = 2;
        session.processes.update(instance.clone());

        let writes: Vec<Write> = session.take_batch().into_iter().collect();
        assert_eq!(writes.len(), 1);
        assert!(matches!(&writes[0], Write::InsertProcess(p) if p.position == 2));
    }

    #[test]
    fn test_loaded_rows_are_not_written() {
        let mut session = Session::new();
        session.processes.cache_loaded(process());
        assert!(session.take_batch().is_empty());
    }

    #[test]
    fn test_new_then_deleted_disappears() {
        let mut session = Session::new();
        let job = Job::from_spec(JobSpec::async_job("noop", json!({})), 3, Utc::now());
        session.jobs.insert_new(job.clone());
        session.jobs.delete(job.clone());

        assert_eq!(session.jobs.lookup(job.id), Lookup::Unknown);
        assert!(session.take_batch().is_empty());
    }

    #[test]
    fn test_deleted_loaded_row_yields_versioned_delete() {
        let mut session = Session::new();
        let mut job = Job::from_spec(JobSpec::async_job("noop", json!({})), 3, Utc::now());
        job.version = 4;
        session.jobs.cache_loaded(job.clone());
        session.jobs.delete(job.clone());

        assert!(session.jobs.is_deleted(job.id));
        let writes: Vec<Write> = session.take_batch().into_iter().collect();
        assert!(matches!(writes[..], [Write::DeleteJob { version: 4, .. }]));
    }

    #[test]
    fn test_discard_drops_everything() {
        let mut session = Session::new();
        session.processes.insert_new(process());
        session.discard();
        assert!(session.take_batch().is_empty());
    }
}
