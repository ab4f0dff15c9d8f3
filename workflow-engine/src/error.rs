use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A single offending form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("No pending human task for user {user_key}")]
    NoActiveTask { user_key: String },

    #[error("Task {task_id} is already claimed by {claimant}")]
    AlreadyClaimed { task_id: String, claimant: String },

    #[error("Task {task_id} is not claimed by {caller}")]
    NotClaimedByCaller {
        task_id: String,
        caller: String,
        claimant: Option<String>,
    },

    #[error("Form validation failed for fields: {}", field_list(.violations))]
    Validation { violations: Vec<FieldViolation> },

    #[error("Process for user {user_key} is suspended")]
    Suspended { user_key: String },

    #[error("No applicable transition out of step {step_id}")]
    NoApplicableTransition { step_id: String },

    #[error("Concurrent update on process {user_key}: expected version {expected}, found {found}")]
    ConcurrencyConflict {
        user_key: String,
        expected: u64,
        found: u64,
    },

    #[error("Task {task_id} is not a human task")]
    NotHumanTask { task_id: String },

    #[error("Process for user {user_key} already exists")]
    InstanceExists { user_key: String },

    #[error("Invalid process status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Effect {effect} failed: {message}")]
    Effect { effect: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config_engine::ConfigError),
}

fn field_list(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for the gateway layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NoActiveTask { .. } => "NO_ACTIVE_TASK",
            Self::AlreadyClaimed { .. } => "ALREADY_CLAIMED",
            Self::NotClaimedByCaller { .. } => "NOT_CLAIMED_BY_CALLER",
            Self::Validation { .. } => "VALIDATION",
            Self::Suspended { .. } => "SUSPENDED",
            Self::NoApplicableTransition { .. } => "NO_APPLICABLE_TRANSITION",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::NotHumanTask { .. } => "NOT_HUMAN_TASK",
            Self::InstanceExists { .. } => "INSTANCE_EXISTS",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::InvalidDefinition(_) => "INVALID_DEFINITION",
            Self::Effect { .. } => "EFFECT_FAILED",
            Self::Storage(_) => "STORAGE",
            Self::Config(_) => "CONFIG",
        }
    }

    /// Field names carried by a validation error, empty otherwise.
    pub fn invalid_fields(&self) -> Vec<&str> {
        match self {
            Self::Validation { violations } => violations.iter().map(|v| v.field.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_fields() {
        let err = WorkflowError::Validation {
            violations: vec![
                FieldViolation::new("approve", "required"),
                FieldViolation::new("dueDate", "expected date matching %Y-%m-%d"),
            ],
        };
        assert_eq!(err.code(), "VALIDATION");
        assert_eq!(err.invalid_fields(), vec!["approve", "dueDate"]);
        assert_eq!(
            err.to_string(),
            "Form validation failed for fields: approve, dueDate"
        );
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        let conflict = WorkflowError::ConcurrencyConflict {
            user_key: "alice".into(),
            expected: 2,
            found: 3,
        };
        assert!(conflict.is_conflict());
        assert!(!WorkflowError::not_found("task", "t1").is_conflict());
    }
}
