//! Form rendering and validation for human tasks.
//!
//! Forms are never stored. [`FormRenderer::render`] derives one from the step
//! definition and the current process variables on every read, and
//! [`FormRenderer::submit`] validates submitted values before anything is
//! written.

use crate::definition::{DefinitionRegistry, EnumValue, FieldDefinition, FieldType, StepDefinition};
use crate::error::{FieldViolation, Result, WorkflowError};
use crate::models::{ProcessInstance, Task, UserState, Variables};
use crate::transition::{Submission, TransitionEngine};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    pub readable: bool,
    pub writable: bool,
    pub value: Option<Value>,
    pub default_value: Option<Value>,
    pub date_pattern: Option<String>,
    pub allowed_values: Vec<EnumValue>,
}

/// Rendered input schema of one human task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowForm {
    pub task_id: String,
    pub user_key: String,
    pub workflow_kind: String,
    pub step_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Current claimant, if any.
    pub owner: Option<String>,
    pub fields: Vec<FormField>,
}

impl WorkflowForm {
    pub fn field(&self, field_id: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.id == field_id)
    }

    /// Sets the value of a field. Returns `false` if the form has no such field.
    pub fn set_value(&mut self, field_id: &str, value: impl Into<Value>) -> bool {
        match self.fields.iter_mut().find(|f| f.id == field_id) {
            Some(field) => {
                field.value = Some(value.into());
                true
            }
            None => false,
        }
    }

    /// Values of writable fields that carry one; this is what gets submitted.
    pub fn values(&self) -> Variables {
        self.fields
            .iter()
            .filter(|f| f.writable)
            .filter_map(|f| f.value.clone().map(|v| (f.id.clone(), v)))
            .collect()
    }
}

/// Checks `value` against the field type and returns its normalised form.
///
/// Strings that parse as the field type are accepted: `"42"` for a long,
/// `"true"` for a boolean. Dates stay strings but must match the field pattern.
pub fn coerce_value(field: &FieldDefinition, value: &Value) -> std::result::Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match field.field_type {
        FieldType::String => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err("expected a string".to_string()),
        },
        FieldType::Long => match value {
            Value::Number(n) if n.is_i64() => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("'{s}' is not an integer")),
            _ => Err("expected an integer".to_string()),
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err("expected a boolean".to_string()),
        },
        FieldType::Date => {
            let pattern = field.pattern();
            match value {
                Value::String(s)
                    if NaiveDate::parse_from_str(s, pattern).is_ok()
                        || NaiveDateTime::parse_from_str(s, pattern).is_ok() =>
                {
                    Ok(value.clone())
                }
                _ => Err(format!("expected a date matching {pattern}")),
            }
        }
        FieldType::Enum => match value {
            Value::String(s) if field.allowed_values.iter().any(|v| &v.key == s) => Ok(value.clone()),
            _ => Err(format!(
                "expected one of: {}",
                field
                    .allowed_values
                    .iter()
                    .map(|v| v.key.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        },
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Validates submitted values against a step's fields.
///
/// Every offending field is reported at once. Read-only fields may be echoed
/// back unchanged but are never written.
pub fn validate_values(step: &StepDefinition, values: &Variables, current: &Variables) -> Result<Variables> {
    let mut violations = Vec::new();
    let mut normalized = Variables::new();

    for (name, value) in values {
        let Some(field) = step.field_definition(name) else {
            violations.push(FieldViolation::new(name, "unknown field"));
            continue;
        };
        if !field.writable {
            if current.get(name).unwrap_or(&Value::Null) != value {
                violations.push(FieldViolation::new(name, "field is read-only"));
            }
            continue;
        }
        match coerce_value(field, value) {
            Ok(coerced) => {
                normalized.insert(name.clone(), coerced);
            }
            Err(reason) => violations.push(FieldViolation::new(name, reason)),
        }
    }

    for field in step.fields.iter().filter(|f| f.required && f.writable) {
        let missing = normalized.get(&field.id).map_or(true, is_blank);
        let already_reported = violations.iter().any(|v| v.field == field.id);
        if missing && !already_reported {
            violations.push(FieldViolation::new(&field.id, "required"));
        }
    }

    if violations.is_empty() {
        Ok(normalized)
    } else {
        Err(WorkflowError::Validation { violations })
    }
}

/// Renders forms and accepts their submission.
pub struct FormRenderer {
    definitions: Arc<DefinitionRegistry>,
    transitions: Arc<TransitionEngine>,
}

impl FormRenderer {
    pub fn new(definitions: Arc<DefinitionRegistry>, transitions: Arc<TransitionEngine>) -> Self {
        Self {
            definitions,
            transitions,
        }
    }

    /// Pure function of the step definition and the instance variables.
    pub fn render(&self, instance: &ProcessInstance, task: &Task) -> Result<WorkflowForm> {
        if !task.is_human() {
            return Err(WorkflowError::NotHumanTask {
                task_id: task.id.clone(),
            });
        }
        let definition = self.definitions.get(&instance.workflow_kind)?;
        let step = definition.require_step(&task.step_id)?;

        let fields = step
            .fields
            .iter()
            .map(|field| {
                let current = if field.readable {
                    instance.variables.get(&field.id).cloned()
                } else {
                    None
                };
                FormField {
                    id: field.id.clone(),
                    name: field.name.clone(),
                    field_type: field.field_type,
                    required: field.required,
                    readable: field.readable,
                    writable: field.writable,
                    value: current.or_else(|| field.default_value.clone()),
                    default_value: field.default_value.clone(),
                    date_pattern: match field.field_type {
                        FieldType::Date => Some(field.pattern().to_string()),
                        _ => None,
                    },
                    allowed_values: field.allowed_values.clone(),
                }
            })
            .collect();

        Ok(WorkflowForm {
            task_id: task.id.clone(),
            user_key: instance.user_key.clone(),
            workflow_kind: instance.workflow_kind.clone(),
            step_id: step.id.clone(),
            name: step.name.clone(),
            description: step.description.clone(),
            created_at: task.created_at,
            owner: task.claimant().map(str::to_string),
            fields,
        })
    }

    /// Validates, checks the claim, then advances the task.
    pub async fn submit(&self, task_id: &str, values: &Variables, caller: &str) -> Result<UserState> {
        self.transitions
            .apply(task_id, caller, Submission::Form(values))
            .await
    }

    pub async fn submit_form(&self, form: &WorkflowForm, caller: &str) -> Result<UserState> {
        self.submit(&form.task_id, &form.values(), caller).await
    }
}
