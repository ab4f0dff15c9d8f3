//! Operations tooling for the user workflow engine.
//!
//! The `userworkflow` binary validates and inspects workflow definition
//! files, and replays scripted sessions against an in-memory engine:
//!
//! ```bash
//! userworkflow validate config/workflows.yaml
//! userworkflow inspect config/workflows.yaml --kind user
//! userworkflow simulate --script demos/approve-user.yaml
//! ```
//!
//! Task ids are generated by the engine, so scripts address work by user
//! key and, where a user has several current tasks, by step id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use workflow_engine::{
    DefinitionRegistry, TaskKind, Variables, WorkflowDefinition, WorkflowEngine, WorkflowError,
    WorkflowFormQuery,
};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid script: {0}")]
    Script(#[from] serde_yaml::Error),

    #[error("Cannot encode result: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl CliError {
    /// Engine error codes pass through; local failures get their own.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "IO",
            Self::Script(_) => "SCRIPT",
            Self::Json(_) => "JSON",
            Self::Workflow(err) => err.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

fn default_kind() -> String {
    "user".to_string()
}

fn system_caller() -> String {
    "system".to_string()
}

/// One engine call in a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Start {
        user: String,
        #[serde(default = "default_kind")]
        kind: String,
        #[serde(default)]
        variables: Variables,
    },
    Claim {
        user: String,
        caller: String,
        #[serde(default)]
        step: Option<String>,
    },
    Release {
        user: String,
        caller: String,
        #[serde(default)]
        step: Option<String>,
        #[serde(default)]
        administrative: bool,
    },
    Submit {
        user: String,
        caller: String,
        #[serde(default)]
        step: Option<String>,
        #[serde(default)]
        values: Variables,
    },
    Execute {
        user: String,
        #[serde(default = "system_caller")]
        caller: String,
        #[serde(default)]
        step: Option<String>,
        #[serde(default)]
        payload: Variables,
    },
    Forms {
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        page: Option<u32>,
        #[serde(default)]
        size: Option<u32>,
    },
    Tasks {
        user: String,
    },
    State {
        user: String,
    },
    Suspend {
        user: String,
    },
    Resume {
        user: String,
    },
    Terminate {
        user: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Claim { .. } => "claim",
            Self::Release { .. } => "release",
            Self::Submit { .. } => "submit",
            Self::Execute { .. } => "execute",
            Self::Forms { .. } => "forms",
            Self::Tasks { .. } => "tasks",
            Self::State { .. } => "state",
            Self::Suspend { .. } => "suspend",
            Self::Resume { .. } => "resume",
            Self::Terminate { .. } => "terminate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    #[serde(flatten)]
    pub operation: Operation,
    /// Error code the step is expected to fail with, e.g. `ALREADY_CLAIMED`.
    #[serde(default)]
    pub expect_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub steps: Vec<ScriptStep>,
}

impl Script {
    /// YAML or JSON; JSON parses as YAML.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::parse(&read_file(path)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub op: &'static str,
    /// Whether the outcome matched the step's expectation.
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulationReport {
    pub steps: Vec<StepOutcome>,
    pub failures: usize,
}

pub fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_definitions(path: &Path) -> Result<DefinitionRegistry> {
    Ok(workflow_engine::load_definitions(path)?)
}

/// Task of `user` to act on: the one at `step`, else the first current task.
async fn resolve_task(
    engine: &WorkflowEngine,
    user: &str,
    step: Option<&str>,
    human_only: bool,
) -> workflow_engine::Result<String> {
    let tasks = engine.get_available_tasks(user).await?;
    tasks
        .into_iter()
        .filter(|t| !human_only || t.kind == TaskKind::Human)
        .find(|t| step.map_or(true, |s| t.step_id == s))
        .map(|t| t.task_id)
        .ok_or_else(|| match step {
            Some(step) => WorkflowError::not_found("task for step", step),
            None => WorkflowError::NoActiveTask {
                user_key: user.to_string(),
            },
        })
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

async fn run_operation(engine: &WorkflowEngine, operation: &Operation) -> Result<Value> {
    match operation {
        Operation::Start { user, kind, variables } => {
            to_value(&engine.start(user, kind, variables.clone()).await?)
        }
        Operation::Claim { user, caller, step } => {
            let task_id = resolve_task(engine, user, step.as_deref(), true).await?;
            to_value(&engine.claim_form(&task_id, caller).await?)
        }
        Operation::Release {
            user,
            caller,
            step,
            administrative,
        } => {
            let task_id = resolve_task(engine, user, step.as_deref(), true).await?;
            to_value(&engine.release_claim(&task_id, caller, *administrative).await?)
        }
        Operation::Submit {
            user,
            caller,
            step,
            values,
        } => {
            let task_id = resolve_task(engine, user, step.as_deref(), true).await?;
            to_value(&engine.submit(&task_id, values, caller).await?)
        }
        Operation::Execute {
            user,
            caller,
            step,
            payload,
        } => {
            let task_id = resolve_task(engine, user, step.as_deref(), false).await?;
            to_value(&engine.execute_task(&task_id, payload, caller).await?)
        }
        Operation::Forms { user, page, size } => {
            let query = WorkflowFormQuery {
                user_key: user.clone(),
                kind: None,
                page: page.unwrap_or(1),
                size: *size,
            };
            to_value(&engine.list_forms(&query).await?)
        }
        Operation::Tasks { user } => to_value(&engine.get_available_tasks(user).await?),
        Operation::State { user } => to_value(&engine.get_user_state(user).await?),
        Operation::Suspend { user } => to_value(&engine.suspend(user).await?),
        Operation::Resume { user } => to_value(&engine.resume(user).await?),
        Operation::Terminate { user } => to_value(&engine.terminate(user).await?),
    }
}

/// Replays a script. Every step runs; mismatches are counted, not fatal.
pub async fn run_script(engine: &WorkflowEngine, script: &Script) -> SimulationReport {
    let mut report = SimulationReport::default();
    for (index, step) in script.steps.iter().enumerate() {
        let op = step.operation.name();
        let outcome = match (run_operation(engine, &step.operation).await, &step.expect_error) {
            (Ok(result), None) => StepOutcome {
                index,
                op,
                passed: true,
                result: Some(result),
                error: None,
            },
            (Ok(result), Some(_)) => StepOutcome {
                index,
                op,
                passed: false,
                result: Some(result),
                error: None,
            },
            (Err(err), expected) => StepOutcome {
                index,
                op,
                passed: expected.as_deref() == Some(err.code()),
                result: None,
                error: Some(ErrorReport {
                    code: err.code().to_string(),
                    message: err.to_string(),
                }),
            },
        };
        debug!(index, op, passed = outcome.passed, "Script step replayed");
        if !outcome.passed {
            report.failures = report.failures.saturating_add(1);
        }
        report.steps.push(outcome);
    }
    info!(steps = report.steps.len(), failures = report.failures, "Simulation finished");
    report
}

/// Human-readable outline of a definition.
pub fn describe_definition(definition: &WorkflowDefinition) -> String {
    let mut out = format!("{} (initial: {})\n", definition.kind, definition.initial_step);
    for step in &definition.steps {
        let kind = if step.terminal {
            "TERMINAL".to_string()
        } else {
            step.kind.to_string()
        };
        out.push_str(&format!("  {} [{}] {}\n", step.id, kind, step.name));
        for field in &step.fields {
            let mut flags = Vec::new();
            if field.required {
                flags.push("required");
            }
            if !field.writable {
                flags.push("read-only");
            }
            out.push_str(&format!(
                "    field {}: {:?}{}\n",
                field.id,
                field.field_type,
                if flags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", flags.join(", "))
                }
            ));
        }
        if let Some(effect) = &step.effect {
            out.push_str(&format!("    effect: {effect}\n"));
        }
        for transition in &step.transitions {
            out.push_str(&format!("    {:?} -> {}\n", transition.when, transition.to.join(", ")));
        }
        if let Some(default) = &step.default {
            out.push_str(&format!("    otherwise -> {}\n", default.join(", ")));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
steps:
  - op: start
    user: alice
    variables: { username: alice }
  - op: claim
    user: alice
    caller: bob
  - op: claim
    user: alice
    caller: carol
    expect_error: ALREADY_CLAIMED
  - op: submit
    user: alice
    caller: bob
    values: { approve: true }
  - op: execute
    user: alice
    step: activate
  - op: state
    user: alice
"#;

    #[test]
    fn test_parse_script() {
        let script = Script::parse(SCRIPT).unwrap();
        assert_eq!(script.steps.len(), 6);
        assert_eq!(script.steps[2].expect_error.as_deref(), Some("ALREADY_CLAIMED"));
        match &script.steps[4].operation {
            Operation::Execute { caller, step, .. } => {
                assert_eq!(caller, "system");
                assert_eq!(step.as_deref(), Some("activate"));
            }
            other => panic!("unexpected operation: {other:?}"),
        }
        match &script.steps[0].operation {
            Operation::Start { kind, .. } => assert_eq!(kind, "user"),
            other => panic!("unexpected operation: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_op() {
        assert!(Script::parse("steps:\n  - op: explode\n    user: alice\n").is_err());
    }

    #[tokio::test]
    async fn test_run_script_against_default_workflow() {
        let engine = WorkflowEngine::builder().build().unwrap();
        let report = run_script(&engine, &Script::parse(SCRIPT).unwrap()).await;

        assert_eq!(report.failures, 0, "{report:?}");
        let state = report.steps[5].result.as_ref().unwrap();
        assert_eq!(state["status"], "active");
        assert_eq!(report.steps[2].error.as_ref().unwrap().code, "ALREADY_CLAIMED");
    }

    #[tokio::test]
    async fn test_unexpected_success_counts_as_failure() {
        let engine = WorkflowEngine::builder().build().unwrap();
        let script = Script::parse(
            "steps:\n  - op: start\n    user: alice\n    expect_error: NOT_FOUND\n  - op: tasks\n    user: nobody\n",
        )
        .unwrap();
        let report = run_script(&engine, &script).await;
        assert_eq!(report.failures, 2);
        assert_eq!(report.steps[1].error.as_ref().unwrap().code, "NOT_FOUND");
    }

    #[test]
    fn test_error_codes() {
        let err = CliError::from(WorkflowError::NoActiveTask {
            user_key: "alice".into(),
        });
        assert_eq!(err.code(), "NO_ACTIVE_TASK");

        let json_err = serde_json::from_str::<Value>("{").unwrap_err();
        let err = CliError::from(json_err);
        assert_eq!(err.code(), "JSON");
        assert!(err.to_string().starts_with("Cannot encode result"));

        let err = Script::parse("steps: 3").unwrap_err();
        assert_eq!(err.code(), "SCRIPT");
    }

    #[test]
    fn test_describe_default_definition() {
        let outline = describe_definition(&WorkflowDefinition::default_user_workflow());
        assert!(outline.starts_with("user (initial: createApproval)"));
        assert!(outline.contains("field approve: Boolean (required)"));
        assert!(outline.contains("rejected [TERMINAL]"));
        assert!(outline.contains("effect: provision"));
    }
}
