//! Case instance state and sentry evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::definition::{CaseDefinition, Sentry};
use super::{InstanceState, Variables};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemState {
    Available,
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanItemInstance {
    pub id: String,
    pub state: PlanItemState,
}

/// Runtime state of one case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseInstance {
    pub id: Uuid,
    pub definition_key: String,
    pub state: InstanceState,
    pub plan_items: Vec<PlanItemInstance>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub version: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl CaseInstance {
    pub fn new(
        definition: &CaseDefinition,
        variables: Variables,
        tenant_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition_key: definition.key.clone(),
            state: InstanceState::Active,
            plan_items: definition
                .plan_items
                .iter()
                .map(|item| PlanItemInstance {
                    id: item.id.clone(),
                    state: PlanItemState::Available,
                })
                .collect(),
            variables,
            tenant_id,
            version: 0,
            started_at: now,
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == InstanceState::Active
    }

    pub fn plan_item_state(&self, id: &str) -> Option<PlanItemState> {
        self.plan_items
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.state)
    }

    /// Set a plan item's state. Returns false when the plan item is unknown.
    pub fn set_plan_item_state(&mut self, id: &str, state: PlanItemState) -> bool {
        match self.plan_items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.state = state;
                true
            }
            None => false,
        }
    }

    pub fn all_completed(&self) -> bool {
        self.plan_items
            .iter()
            .all(|item| item.state == PlanItemState::Completed)
    }

    pub fn sentry_satisfied(&self, sentry: &Sentry) -> bool {
        let completed = sentry
            .on_completed
            .iter()
            .all(|id| self.plan_item_state(id) == Some(PlanItemState::Completed));

        let variable_matches = match &sentry.if_variable {
            Some(condition) => self.variables.get(&condition.name) == Some(&condition.equals),
            None => true,
        };

        completed && variable_matches
    }

    /// Available plan items whose entry sentry (if any) is satisfied, in
    /// definition order.
    pub fn ready_plan_items(&self, definition: &CaseDefinition) -> Vec<String> {
        definition
            .plan_items
            .iter()
            .filter(|item| self.plan_item_state(&item.id) == Some(PlanItemState::Available))
            .filter(|item| {
                item.entry
                    .as_ref()
                    .map_or(true, |sentry| self.sentry_satisfied(sentry))
            })
            .map(|item| item.id.clone())
            .collect()
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
