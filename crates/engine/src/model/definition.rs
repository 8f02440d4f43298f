//! Process and case definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{EngineError, EngineResult};

/// A process: activities executed in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub key: String,
    pub activities: Vec<Activity>,
}

impl ProcessDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            activities: Vec::new(),
        }
    }

    pub fn activity(mut self, activity: Activity) -> Self {
        self.activities.push(activity);
        self
    }

    pub fn activity_at(&self, position: usize) -> Option<&Activity> {
        self.activities.get(position)
    }
}

/// One step of a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub kind: ActivityKind,
    /// Enter this activity through an async continuation job instead of
    /// inline.
    #[serde(default)]
    pub async_before: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityKind {
    /// Wait state left by an external task completion.
    UserTask,
    /// Runs a registered delegate and moves on.
    ServiceTask { delegate: String },
    /// Wait state left when the timer job fires.
    Timer { duration_secs: u64 },
    /// Wait state left when a matching event is correlated.
    ReceiveEvent {
        event_name: String,
        #[serde(default)]
        correlation_parameters: Vec<String>,
    },
}

impl Activity {
    fn new(id: impl Into<String>, kind: ActivityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            async_before: false,
        }
    }

    pub fn user_task(id: impl Into<String>) -> Self {
        Self::new(id, ActivityKind::UserTask)
    }

    pub fn service_task(id: impl Into<String>, delegate: impl Into<String>) -> Self {
        Self::new(
            id,
            ActivityKind::ServiceTask {
                delegate: delegate.into(),
            },
        )
    }

    pub fn timer(id: impl Into<String>, duration_secs: u64) -> Self {
        Self::new(id, ActivityKind::Timer { duration_secs })
    }

    pub fn receive_event(
        id: impl Into<String>,
        event_name: impl Into<String>,
        correlation_parameters: &[&str],
    ) -> Self {
        Self::new(
            id,
            ActivityKind::ReceiveEvent {
                event_name: event_name.into(),
                correlation_parameters: correlation_parameters
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            },
        )
    }

    pub fn async_before(mut self) -> Self {
        self.async_before = true;
        self
    }
}

/// A case plan: plan items activated when their entry sentry is satisfied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub key: String,
    pub plan_items: Vec<PlanItemDefinition>,
}

impl CaseDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            plan_items: Vec::new(),
        }
    }

    pub fn plan_item(mut self, item: PlanItemDefinition) -> Self {
        self.plan_items.push(item);
        self
    }

    pub fn find_plan_item(&self, id: &str) -> Option<&PlanItemDefinition> {
        self.plan_items.iter().find(|item| item.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItemDefinition {
    pub id: String,
    pub kind: PlanItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<Sentry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanItemKind {
    HumanTask,
    ProcessTask { process_key: String },
    Milestone,
}

impl PlanItemDefinition {
    fn new(id: impl Into<String>, kind: PlanItemKind) -> Self {
        Self {
            id: id.into(),
            kind,
            entry: None,
        }
    }

    pub fn human_task(id: impl Into<String>) -> Self {
        Self::new(id, PlanItemKind::HumanTask)
    }

    pub fn process_task(id: impl Into<String>, process_key: impl Into<String>) -> Self {
        Self::new(
            id,
            PlanItemKind::ProcessTask {
                process_key: process_key.into(),
            },
        )
    }

    pub fn milestone(id: impl Into<String>) -> Self {
        Self::new(id, PlanItemKind::Milestone)
    }

    pub fn entry(mut self, sentry: Sentry) -> Self {
        self.entry = Some(sentry);
        self
    }
}

/// Entry condition of a plan item.
///
/// Satisfied when every plan item in `on_completed` is completed and, if
/// set, the case variable equals the expected value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sentry {
    #[serde(default)]
    pub on_completed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_variable: Option<VariableCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableCondition {
    pub name: String,
    pub equals: serde_json::Value,
}

impl Sentry {
    pub fn on_completed(plan_items: &[&str]) -> Self {
        Self {
            on_completed: plan_items.iter().map(|p| p.to_string()).collect(),
            if_variable: None,
        }
    }

    pub fn if_variable(mut self, name: impl Into<String>, equals: serde_json::Value) -> Self {
        self.if_variable = Some(VariableCondition {
            name: name.into(),
            equals,
        });
        self
    }
}

/// A bundle of definitions deployed together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub processes: Vec<ProcessDefinition>,
    #[serde(default)]
    pub cases: Vec<CaseDefinition>,
}

/// Deployed definitions, looked up by key.
#[derive(Debug, Default)]
pub struct DefinitionRepository {
    processes: RwLock<HashMap<String, Arc<ProcessDefinition>>>,
    cases: RwLock<HashMap<String, Arc<CaseDefinition>>>,
}

impl DefinitionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy a process definition, replacing any previous one with the same key.
    pub fn deploy_process(&self, definition: ProcessDefinition) {
        tracing::debug!(key = %definition.key, activities = definition.activities.len(), "Deployed process definition");
        self.processes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.key.clone(), Arc::new(definition));
    }

    /// Deploy a case definition, replacing any previous one with the same key.
    pub fn deploy_case(&self, definition: CaseDefinition) {
        tracing::debug!(key = %definition.key, plan_items = definition.plan_items.len(), "Deployed case definition");
        self.cases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.key.clone(), Arc::new(definition));
    }

    pub fn deploy(&self, deployment: Deployment) {
        for process in deployment.processes {
            self.deploy_process(process);
        }
        for case in deployment.cases {
            self.deploy_case(case);
        }
    }

    pub fn process(&self, key: &str) -> EngineResult<Arc<ProcessDefinition>> {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("process definition '{}'", key)))
    }

    pub fn case(&self, key: &str) -> EngineResult<Arc<CaseDefinition>> {
        self.cases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("case definition '{}'", key)))
    }
}
