//! Pending operations of a command context.

use std::collections::VecDeque;
use uuid::Uuid;

use crate::correlation::CorrelationParameter;
use crate::job::JobMessage;
use crate::model::{CaseLink, Variables};

/// An internal engine operation.
///
/// Operations are planned on an [`Agenda`] and executed one at a time, in
/// the order they were planned, by the command invoker.
#[derive(Debug, Clone)]
pub enum Operation {
    StartProcess {
        definition_key: String,
        variables: Variables,
        parent: Option<CaseLink>,
        tenant_id: Option<String>,
    },
    /// Move the process to its current activity, or end it past the last one.
    ContinueProcess { process_instance_id: Uuid },
    ExecuteActivity {
        process_instance_id: Uuid,
        activity_id: String,
    },
    LeaveActivity {
        process_instance_id: Uuid,
        activity_id: String,
    },
    EndProcess { process_instance_id: Uuid },
    CompleteTask {
        process_instance_id: Uuid,
        activity_id: String,
        variables: Variables,
    },
    FireTimer {
        process_instance_id: Uuid,
        activity_id: String,
    },
    CorrelateEvent {
        event_name: String,
        parameters: Vec<CorrelationParameter>,
        payload: Variables,
        tenant_id: Option<String>,
    },
    SuspendProcess { process_instance_id: Uuid },
    ActivateProcess { process_instance_id: Uuid },

    StartCase {
        definition_key: String,
        variables: Variables,
        tenant_id: Option<String>,
    },
    /// Activate every plan item whose entry sentry is now satisfied.
    EvaluateCriteria { case_instance_id: Uuid },
    ActivatePlanItem {
        case_instance_id: Uuid,
        plan_item_id: String,
    },
    CompletePlanItem {
        case_instance_id: Uuid,
        plan_item_id: String,
    },
    CompleteHumanTask {
        case_instance_id: Uuid,
        plan_item_id: String,
        variables: Variables,
    },
    SetCaseVariables {
        case_instance_id: Uuid,
        variables: Variables,
    },

    ExecuteJob { job_id: Uuid, lock_owner: String },
    HandleJobFailure {
        job_id: Uuid,
        lock_owner: String,
        message: String,
    },
    ActivateTimerJob { job_id: Uuid, expected_version: u64 },
    SendJobMessage { message: JobMessage },
    RetryDeadLetterJob { job_id: Uuid, retries: u32 },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::StartProcess { .. } => "start-process",
            Operation::ContinueProcess { .. } => "continue-process",
            Operation::ExecuteActivity { .. } => "execute-activity",
            Operation::LeaveActivity { .. } => "leave-activity",
            Operation::EndProcess { .. } => "end-process",
            Operation::CompleteTask { .. } => "complete-task",
            Operation::FireTimer { .. } => "fire-timer",
            Operation::CorrelateEvent { .. } => "correlate-event",
            Operation::SuspendProcess { .. } => "suspend-process",
            Operation::ActivateProcess { .. } => "activate-process",
            Operation::StartCase { .. } => "start-case",
            Operation::EvaluateCriteria { .. } => "evaluate-criteria",
            Operation::ActivatePlanItem { .. } => "activate-plan-item",
            Operation::CompletePlanItem { .. } => "complete-plan-item",
            Operation::CompleteHumanTask { .. } => "complete-human-task",
            Operation::SetCaseVariables { .. } => "set-case-variables",
            Operation::ExecuteJob { .. } => "execute-job",
            Operation::HandleJobFailure { .. } => "handle-job-failure",
            Operation::ActivateTimerJob { .. } => "activate-timer-job",
            Operation::SendJobMessage { .. } => "send-job-message",
            Operation::RetryDeadLetterJob { .. } => "retry-dead-letter-job",
        }
    }
}

/// FIFO queue of planned operations.
#[derive(Debug, Default)]
pub struct Agenda {
    operations: VecDeque<Operation>,
    draining: bool,
    executed: usize,
}

impl Agenda {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&mut self, operation: Operation) {
        self.operations.push_back(operation);
    }

    /// Pop the next operation, counting it as executed.
    pub fn next(&mut self) -> Option<Operation> {
        let operation = self.operations.pop_front();
        if operation.is_some() {
            self.executed += 1;
        }
        operation
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the invoker is currently working through this agenda.
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub(crate) fn set_draining(&mut self, draining: bool) {
        self.draining = draining;
    }

    pub fn clear(&mut self) {
        self.operations.clear();
    }

    /// Operations popped so far.
    pub fn executed(&self) -> usize {
        self.executed
    }
}
