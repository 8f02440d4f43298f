//! Process instance state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{InstanceState, Variables};

/// Link from a process instance to the case plan item that started it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaseLink {
    pub case_instance_id: Uuid,
    pub plan_item_id: String,
}

/// Runtime state of one process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessInstance {
    pub id: Uuid,
    pub definition_key: String,
    pub state: InstanceState,
    /// Index of the current activity in the definition.
    pub position: usize,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CaseLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub suspended: bool,
    /// Row version used for optimistic concurrency.
    #[serde(default)]
    pub version: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ProcessInstance {
    pub fn new(
        definition_key: impl Into<String>,
        variables: Variables,
        parent: Option<CaseLink>,
        tenant_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition_key: definition_key.into(),
            state: InstanceState::Active,
            position: 0,
            variables,
            parent,
            tenant_id,
            suspended: false,
            version: 0,
            started_at: now,
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == InstanceState::Active
    }

    pub fn merge_variables(&mut self, variables: &Variables) {
        for (name, value) in variables {
            self.variables.insert(name.clone(), value.clone());
        }
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.state = InstanceState::Completed;
        self.ended_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_variables_overwrites() {
        let mut variables = Variables::new();
        variables.insert("amount".to_string(), json!(10));
        let mut instance = ProcessInstance::new("order", variables, None, None, Utc::now());

        let mut update = Variables::new();
        update.insert("amount".to_string(), json!(25));
        update.insert("approved".to_string(), json!(true));
        instance.merge_variables(&update);

        assert_eq!(instance.variables["amount"], json!(25));
        assert_eq!(instance.variables["approved"], json!(true));
    }

    #[test]
    fn test_complete() {
        let now = Utc::now();
        let mut instance = ProcessInstance::new("order", Variables::new(), None, None, now);
        assert!(instance.is_active());

        instance.complete(now);
        assert!(!instance.is_active());
        assert_eq!(instance.ended_at, Some(now));
    }
}
