use crate::error::{Result, WorkflowError};
use crate::state_machine::ProcessStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Working data of a process instance, including the user's tentative attributes.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Variable the workflow uses to publish the user's lifecycle status.
pub const STATUS_VARIABLE: &str = "status";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Human,
    #[default]
    Automatic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human => f.write_str("HUMAN"),
            Self::Automatic => f.write_str("AUTOMATIC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimState {
    Unclaimed,
    Claimed {
        claimant: String,
        claimed_at: DateTime<Utc>,
    },
}

impl ClaimState {
    pub fn claimant(&self) -> Option<&str> {
        match self {
            Self::Unclaimed => None,
            Self::Claimed { claimant, .. } => Some(claimant),
        }
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.claimant() == Some(identity)
    }
}

/// An executable step of one process instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub step_id: String,
    pub kind: TaskKind,
    /// Step this task was reached from; `None` for the initial task.
    pub reached_from: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Store-wide creation order, breaks ties between equal timestamps.
    pub sequence: u64,
    pub claim: ClaimState,
}

impl Task {
    pub fn new(
        step_id: &str,
        kind: TaskKind,
        reached_from: Option<&str>,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            step_id: step_id.to_string(),
            kind,
            reached_from: reached_from.map(str::to_string),
            created_at: now,
            sequence,
            claim: ClaimState::Unclaimed,
        }
    }

    pub fn is_human(&self) -> bool {
        self.kind == TaskKind::Human
    }

    pub fn claimant(&self) -> Option<&str> {
        self.claim.claimant()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub task_id: String,
    pub step_id: String,
    pub executed_by: String,
    pub executed_at: DateTime<Utc>,
    pub next_steps: Vec<String>,
}

/// One user's traversal through a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub user_key: String,
    pub workflow_kind: String,
    pub status: ProcessStatus,
    pub tasks: Vec<Task>,
    pub variables: Variables,
    pub history: Vec<HistoryEntry>,
    /// Join steps reached by one branch while another can still arrive.
    #[serde(default)]
    pub pending_joins: Vec<String>,
    /// Bumped by the store on every successful write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessInstance {
    pub fn new(user_key: &str, workflow_kind: &str, variables: Variables, now: DateTime<Utc>) -> Self {
        Self {
            user_key: user_key.to_string(),
            workflow_kind: workflow_kind.to_string(),
            status: ProcessStatus::Active,
            tasks: Vec::new(),
            variables,
            history: Vec::new(),
            pending_joins: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn has_step(&self, step_id: &str) -> bool {
        self.tasks.iter().any(|t| t.step_id == step_id)
    }

    /// Pending human tasks, oldest first.
    pub fn human_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.iter().filter(|t| t.is_human()).collect();
        tasks.sort_by_key(|t| (t.created_at, t.sequence));
        tasks
    }

    /// Guards claim, submit and execute.
    pub fn ensure_accepts_work(&self) -> Result<()> {
        match self.status {
            ProcessStatus::Suspended => Err(WorkflowError::Suspended {
                user_key: self.user_key.clone(),
            }),
            status if status.is_terminal() => Err(WorkflowError::not_found("active process", &self.user_key)),
            _ => Ok(()),
        }
    }
}

/// Read-side filter for form listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowFormQuery {
    pub user_key: Option<String>,
    pub kind: Option<TaskKind>,
    /// 1-based page number.
    pub page: u32,
    /// Falls back to the configured default page size.
    pub size: Option<u32>,
}

impl Default for WorkflowFormQuery {
    fn default() -> Self {
        Self {
            user_key: None,
            kind: None,
            page: 1,
            size: None,
        }
    }
}

impl WorkflowFormQuery {
    pub fn for_user(user_key: &str) -> Self {
        Self {
            user_key: Some(user_key.to_string()),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_page(mut self, page: u32, size: u32) -> Self {
        self.page = page;
        self.size = Some(size);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub page: u32,
    pub size: u32,
    pub total_count: usize,
    pub result: Vec<T>,
}

impl<T> PagedResult<T> {
    /// Slices an already ordered list into the requested page.
    pub fn paginate(items: Vec<T>, page: u32, size: u32) -> Self {
        let page = page.max(1);
        let size = size.max(1);
        let total_count = items.len();
        let skip = usize::try_from(page.saturating_sub(1))
            .unwrap_or(usize::MAX)
            .saturating_mul(usize::try_from(size).unwrap_or(usize::MAX));
        let result = items
            .into_iter()
            .skip(skip)
            .take(usize::try_from(size).unwrap_or(usize::MAX))
            .collect();
        Self {
            page,
            size,
            total_count,
            result,
        }
    }
}

/// Summary of one currently executable task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub step_id: String,
    pub name: String,
    pub kind: TaskKind,
    pub claimant: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// User-facing state materialised from a process instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub user_key: String,
    pub workflow_kind: String,
    pub process_status: ProcessStatus,
    /// Lifecycle status published by the workflow, e.g. `active`.
    pub status: Option<String>,
    pub attributes: Variables,
    pub current_tasks: Vec<String>,
    pub version: u64,
}

impl UserState {
    pub fn from_instance(instance: &ProcessInstance, hidden_variables: &[String]) -> Self {
        let attributes = instance
            .variables
            .iter()
            .filter(|(name, _)| {
                name.as_str() != STATUS_VARIABLE && !hidden_variables.iter().any(|h| h == *name)
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self {
            user_key: instance.user_key.clone(),
            workflow_kind: instance.workflow_kind.clone(),
            process_status: instance.status,
            status: instance
                .variables
                .get(STATUS_VARIABLE)
                .and_then(|v| v.as_str())
                .map(str::to_string),
            attributes,
            current_tasks: instance.tasks.iter().map(|t| t.id.clone()).collect(),
            version: instance.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pagination_is_one_based() {
        let page = PagedResult::paginate((1..=7).collect::<Vec<_>>(), 2, 3);
        assert_eq!(page.result, vec![4, 5, 6]);
        assert_eq!(page.total_count, 7);

        let last = PagedResult::paginate((1..=7).collect::<Vec<_>>(), 3, 3);
        assert_eq!(last.result, vec![7]);

        let zero = PagedResult::paginate((1..=7).collect::<Vec<_>>(), 0, 3);
        assert_eq!(zero.page, 1);
        assert_eq!(zero.result, vec![1, 2, 3]);

        let past_end = PagedResult::paginate((1..=7).collect::<Vec<_>>(), 9, 3);
        assert!(past_end.result.is_empty());
    }

    #[test]
    fn test_user_state_hides_variables() {
        let mut variables = Variables::new();
        variables.insert("username".into(), json!("alice"));
        variables.insert("password".into(), json!("s3cret!"));
        variables.insert(STATUS_VARIABLE.into(), json!("active"));
        let instance = ProcessInstance::new("alice", "user", variables, Utc::now());

        let state = UserState::from_instance(&instance, &["password".to_string()]);
        assert_eq!(state.status.as_deref(), Some("active"));
        assert!(state.attributes.contains_key("username"));
        assert!(!state.attributes.contains_key("password"));
        assert!(!state.attributes.contains_key(STATUS_VARIABLE));
    }

    #[test]
    fn test_terminal_instance_rejects_work() {
        let mut instance = ProcessInstance::new("alice", "user", Variables::new(), Utc::now());
        assert!(instance.ensure_accepts_work().is_ok());

        instance.status = ProcessStatus::Suspended;
        assert_eq!(instance.ensure_accepts_work().unwrap_err().code(), "SUSPENDED");

        instance.status = ProcessStatus::Completed;
        assert_eq!(instance.ensure_accepts_work().unwrap_err().code(), "NOT_FOUND");
    }
}
