//! Job entity and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job class. Decides what happens when retries run out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Async continuation or other deferred work; dead-lettered on exhaustion.
    Async,
    /// Due-date driven work; dead-lettered on exhaustion.
    Timer,
    /// Best-effort bookkeeping; deleted on exhaustion.
    History,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Async => "async",
            JobKind::Timer => "timer",
            JobKind::History => "history",
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "async" => Ok(JobKind::Async),
            "timer" => Ok(JobKind::Timer),
            "history" => Ok(JobKind::History),
            _ => Err(format!("Unknown job kind: {}", s)),
        }
    }
}

/// Where a job sits in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Can be claimed once due.
    Executable,
    /// Waiting for its due date; promoted to executable by the timer loop.
    Timer,
    /// Retries exhausted; kept for inspection and manual retry.
    DeadLetter,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Executable => "executable",
            JobState::Timer => "timer",
            JobState::DeadLetter => "dead_letter",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executable" => Ok(JobState::Executable),
            "timer" => Ok(JobState::Timer),
            "dead_letter" => Ok(JobState::DeadLetter),
            _ => Err(format!("Unknown job state: {}", s)),
        }
    }
}

/// A unit of deferred work persisted in the shared store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub state: JobState,
    /// Suspension is independent of `state` and of the retry count.
    pub suspended: bool,
    /// Discriminator used to look up the job handler.
    pub handler_type: String,
    pub handler_config: serde_json::Value,
    pub process_instance_id: Option<Uuid>,
    pub case_instance_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    pub lock_owner: Option<String>,
    pub lock_expiration: Option<DateTime<Utc>>,
    pub retries: u32,
    pub exception_message: Option<String>,
    pub tenant_id: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn from_spec(spec: JobSpec, default_retries: u32, now: DateTime<Utc>) -> Self {
        let state = match spec.kind {
            JobKind::Timer => JobState::Timer,
            JobKind::Async | JobKind::History => JobState::Executable,
        };

        Self {
            id: Uuid::new_v4(),
            kind: spec.kind,
            state,
            suspended: false,
            handler_type: spec.handler_type,
            handler_config: spec.handler_config,
            process_instance_id: spec.process_instance_id,
            case_instance_id: spec.case_instance_id,
            due_date: spec.due_date,
            lock_owner: None,
            lock_expiration: None,
            retries: spec.retries.unwrap_or(default_retries),
            exception_message: None,
            tenant_id: spec.tenant_id,
            version: 0,
            created_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_date.map_or(true, |due| due <= now)
    }

    /// Locked by someone whose claim has not yet expired.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_owner.is_some() && self.lock_expiration.map_or(true, |expires| expires > now)
    }

    pub fn is_lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.lock_owner.is_some() && self.lock_expiration.map_or(false, |expires| expires <= now)
    }

    /// Eligible for claiming: executable, not suspended, due, and unlocked
    /// or with an expired lock.
    pub fn is_acquirable(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Executable
            && !self.suspended
            && self.is_due(now)
            && !self.is_locked(now)
    }

    pub fn release_lock(&mut self) {
        self.lock_owner = None;
        self.lock_expiration = None;
    }

    pub fn matches_tenant(&self, tenant_id: Option<&str>) -> bool {
        tenant_id.map_or(true, |tenant| self.tenant_id.as_deref() == Some(tenant))
    }
}

/// Request to create a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub kind: JobKind,
    pub handler_type: String,
    pub handler_config: serde_json::Value,
    pub process_instance_id: Option<Uuid>,
    pub case_instance_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    pub retries: Option<u32>,
    pub tenant_id: Option<String>,
}

impl JobSpec {
    fn new(kind: JobKind, handler_type: impl Into<String>, handler_config: serde_json::Value) -> Self {
        Self {
            kind,
            handler_type: handler_type.into(),
            handler_config,
            process_instance_id: None,
            case_instance_id: None,
            due_date: None,
            retries: None,
            tenant_id: None,
        }
    }

    pub fn async_job(handler_type: impl Into<String>, handler_config: serde_json::Value) -> Self {
        Self::new(JobKind::Async, handler_type, handler_config)
    }

    pub fn timer(
        handler_type: impl Into<String>,
        handler_config: serde_json::Value,
        due_date: DateTime<Utc>,
    ) -> Self {
        let mut spec = Self::new(JobKind::Timer, handler_type, handler_config);
        spec.due_date = Some(due_date);
        spec
    }

    pub fn history(handler_type: impl Into<String>, handler_config: serde_json::Value) -> Self {
        Self::new(JobKind::History, handler_type, handler_config)
    }

    pub fn for_process(mut self, process_instance_id: Uuid) -> Self {
        self.process_instance_id = Some(process_instance_id);
        self
    }

    pub fn for_case(mut self, case_instance_id: Uuid) -> Self {
        self.case_instance_id = Some(case_instance_id);
        self
    }

    pub fn tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Job reference handed to an external message channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMessage {
    pub job_id: Uuid,
    pub handler_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl From<&Job> for JobMessage {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            handler_type: job.handler_type.clone(),
            tenant_id: job.tenant_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn async_job(now: DateTime<Utc>) -> Job {
        Job::from_spec(JobSpec::async_job("noop", json!({})), 3, now)
    }

    #[test]
    fn test_from_spec_states() {
        let now = Utc::now();
        let job = async_job(now);
        assert_eq!(job.state, JobState::Executable);
        assert_eq!(job.retries, 3);

        let timer = Job::from_spec(
            JobSpec::timer("trigger-timer", json!({}), now + Duration::minutes(1)).retries(1),
            3,
            now,
        );
        assert_eq!(timer.state, JobState::Timer);
        assert_eq!(timer.retries, 1);
        assert!(!timer.is_due(now));
    }

    #[test]
    fn test_acquirable_rules() {
        let now = Utc::now();
        let mut job = async_job(now);
        assert!(job.is_acquirable(now));

        job.lock_owner = Some("worker-a".to_string());
        job.lock_expiration = Some(now + Duration::minutes(5));
        assert!(!job.is_acquirable(now));
        assert!(job.is_acquirable(now + Duration::minutes(5)));
        assert!(job.is_lock_expired(now + Duration::minutes(6)));

        job.release_lock();
        job.suspended = true;
        assert!(!job.is_acquirable(now));

        job.suspended = false;
        job.state = JobState::DeadLetter;
        assert!(!job.is_acquirable(now));
    }

    #[test]
    fn test_tenant_filter() {
        let mut job = async_job(Utc::now());
        assert!(job.matches_tenant(None));
        assert!(!job.matches_tenant(Some("acme")));

        job.tenant_id = Some("acme".to_string());
        assert!(job.matches_tenant(Some("acme")));
        assert!(job.matches_tenant(None));
    }

    #[test]
    fn test_kind_and_state_round_trip_through_str() {
        for kind in [JobKind::Async, JobKind::Timer, JobKind::History] {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
        for state in [JobState::Executable, JobState::Timer, JobState::DeadLetter] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("paused".parse::<JobState>().is_err());
    }

    #[test]
    fn test_job_message_serialization() {
        let job = async_job(Utc::now());
        let message = JobMessage::from(&job);
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains(&job.id.to_string()));
        assert!(!json.contains("tenant_id"));

        let parsed: JobMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, message);
    }
}
