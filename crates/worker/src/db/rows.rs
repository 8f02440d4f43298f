//! Row types and their conversion to engine entities.

use casework_engine::job::{Job, JobKind, JobState};
use casework_engine::model::EventSubscription;
use casework_engine::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::FromRow;
use uuid::Uuid;

/// Columns selected for every job query.
pub const JOB_COLUMNS: &str = "id, kind, state, suspended, handler_type, handler_config, \
    process_instance_id, case_instance_id, due_date, lock_owner, lock_expiration, retries, \
    exception_message, tenant_id, version, created_at";

pub const SUBSCRIPTION_COLUMNS: &str =
    "id, event_name, correlation_key, process_instance_id, activity_id, tenant_id, created_at";

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub kind: String,
    pub state: String,
    pub suspended: bool,
    pub handler_type: String,
    pub handler_config: serde_json::Value,
    pub process_instance_id: Option<Uuid>,
    pub case_instance_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    pub lock_owner: Option<String>,
    pub lock_expiration: Option<DateTime<Utc>>,
    pub retries: i32,
    pub exception_message: Option<String>,
    pub tenant_id: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = EngineError;

    fn try_from(row: JobRow) -> EngineResult<Self> {
        let kind: JobKind = row.kind.parse().map_err(EngineError::Store)?;
        let state: JobState = row.state.parse().map_err(EngineError::Store)?;
        Ok(Job {
            id: row.id,
            kind,
            state,
            suspended: row.suspended,
            handler_type: row.handler_type,
            handler_config: row.handler_config,
            process_instance_id: row.process_instance_id,
            case_instance_id: row.case_instance_id,
            due_date: row.due_date,
            lock_owner: row.lock_owner,
            lock_expiration: row.lock_expiration,
            retries: u32::try_from(row.retries).unwrap_or(0),
            exception_message: row.exception_message,
            tenant_id: row.tenant_id,
            version: row.version.max(0) as u64,
            created_at: row.created_at,
        })
    }
}

pub fn into_jobs(rows: Vec<JobRow>) -> EngineResult<Vec<Job>> {
    rows.into_iter().map(Job::try_from).collect()
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub event_name: String,
    pub correlation_key: Option<String>,
    pub process_instance_id: Uuid,
    pub activity_id: String,
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<SubscriptionRow> for EventSubscription {
    fn from(row: SubscriptionRow) -> Self {
        EventSubscription {
            id: row.id,
            event_name: row.event_name,
            correlation_key: row.correlation_key,
            process_instance_id: row.process_instance_id,
            activity_id: row.activity_id,
            tenant_id: row.tenant_id,
            created_at: row.created_at,
        }
    }
}

/// A process or case instance document with its row version.
#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub data: serde_json::Value,
    pub version: i64,
}

impl DocumentRow {
    /// Deserialize the document. The version column is authoritative; the
    /// caller writes it back onto the entity.
    pub fn decode<T: DeserializeOwned>(self) -> EngineResult<(T, u64)> {
        let entity = serde_json::from_value(self.data)?;
        Ok((entity, self.version.max(0) as u64))
    }
}
