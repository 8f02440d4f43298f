//! Process and case model driven by the agenda.
//!
//! - **Definitions**: linear process definitions and case plans, deployed
//!   programmatically into a [`DefinitionRepository`]
//! - **Instances**: runtime state of processes and cases, persisted through
//!   the store
//! - **Subscriptions**: processes waiting for a correlated event

pub mod case;
pub mod definition;
pub mod process;
pub mod subscription;

use serde::{Deserialize, Serialize};

pub use case::{CaseInstance, PlanItemInstance, PlanItemState};
pub use definition::{
    Activity, ActivityKind, CaseDefinition, DefinitionRepository, Deployment,
    PlanItemDefinition, PlanItemKind, ProcessDefinition, Sentry, VariableCondition,
};
pub use process::{CaseLink, ProcessInstance};
pub use subscription::EventSubscription;

/// Instance variables.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Lifecycle state shared by process and case instances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Active,
    Completed,
}
