//! Transition predicates.
//!
//! Conditions are evaluated purely against the process variable map, so the
//! same variables always select the same branch.

use crate::models::Variables;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    Equals { variable: String, value: Value },
    NotEquals { variable: String, value: Value },
    Exists { variable: String },
    Missing { variable: String },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn equals(variable: &str, value: impl Into<Value>) -> Self {
        Self::Equals {
            variable: variable.to_string(),
            value: value.into(),
        }
    }

    pub fn not_equals(variable: &str, value: impl Into<Value>) -> Self {
        Self::NotEquals {
            variable: variable.to_string(),
            value: value.into(),
        }
    }

    pub fn exists(variable: &str) -> Self {
        Self::Exists {
            variable: variable.to_string(),
        }
    }

    pub fn missing(variable: &str) -> Self {
        Self::Missing {
            variable: variable.to_string(),
        }
    }

    pub fn evaluate(&self, variables: &Variables) -> bool {
        match self {
            Self::Always => true,
            Self::Equals { variable, value } => variables.get(variable) == Some(value),
            Self::NotEquals { variable, value } => variables.get(variable) != Some(value),
            // null counts as absent, matching how forms clear optional fields
            Self::Exists { variable } => variables.get(variable).is_some_and(|v| !v.is_null()),
            Self::Missing { variable } => variables.get(variable).map_or(true, Value::is_null),
            Self::All(conditions) => conditions.iter().all(|c| c.evaluate(variables)),
            Self::Any(conditions) => conditions.iter().any(|c| c.evaluate(variables)),
            Self::Not(inner) => !inner.evaluate(variables),
        }
    }
}
