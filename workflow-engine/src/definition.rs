//! Workflow definitions: the directed graph of steps a user traverses.
//!
//! A definition is plain data. It can be assembled in code through
//! [`WorkflowDefinition::builder`] or deserialized from YAML, and is always
//! validated before the engine accepts it.

use crate::conditions::Condition;
use crate::error::{Result, WorkflowError};
use crate::models::{TaskKind, Variables};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_DATE_PATTERN: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Long,
    Boolean,
    Date,
    Enum,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub key: String,
    pub label: String,
}

/// One input declared by a human step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub readable: bool,
    #[serde(default = "default_true")]
    pub writable: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub date_pattern: Option<String>,
    #[serde(default)]
    pub allowed_values: Vec<EnumValue>,
}

fn default_true() -> bool {
    true
}

impl FieldDefinition {
    pub fn new(id: &str, field_type: FieldType) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            field_type,
            required: false,
            readable: true,
            writable: true,
            default_value: None,
            date_pattern: None,
            allowed_values: Vec::new(),
        }
    }

    pub fn string(id: &str) -> Self {
        Self::new(id, FieldType::String)
    }

    pub fn long(id: &str) -> Self {
        Self::new(id, FieldType::Long)
    }

    pub fn boolean(id: &str) -> Self {
        Self::new(id, FieldType::Boolean)
    }

    pub fn date(id: &str, pattern: &str) -> Self {
        let mut field = Self::new(id, FieldType::Date);
        field.date_pattern = Some(pattern.to_string());
        field
    }

    pub fn enumeration(id: &str, values: &[(&str, &str)]) -> Self {
        let mut field = Self::new(id, FieldType::Enum);
        field.allowed_values = values
            .iter()
            .map(|(key, label)| EnumValue {
                key: key.to_string(),
                label: label.to_string(),
            })
            .collect();
        field
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn pattern(&self) -> &str {
        self.date_pattern.as_deref().unwrap_or(DEFAULT_DATE_PATTERN)
    }
}

/// Conditional edge out of a step. `set` is applied when the edge is taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Written as a plain map in YAML (`equals: { variable: .., value: .. }`).
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub when: Condition,
    pub to: Vec<String>,
    #[serde(default)]
    pub set: Variables,
}

impl Transition {
    pub fn when(condition: Condition) -> Self {
        Self {
            when: condition,
            to: Vec::new(),
            set: Variables::new(),
        }
    }

    pub fn always() -> Self {
        Self::when(Condition::Always)
    }

    pub fn to(mut self, step_id: &str) -> Self {
        self.to.push(step_id.to_string());
        self
    }

    pub fn set(mut self, variable: &str, value: impl Into<Value>) -> Self {
        self.set.insert(variable.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: TaskKind,
    /// Terminal steps are never instantiated as tasks; arriving at one ends that branch.
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub set_variables: Variables,
    /// Name of an external effect run when the step executes.
    #[serde(default)]
    pub effect: Option<String>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub default: Option<Vec<String>>,
}

impl StepDefinition {
    fn new(id: &str, name: &str, kind: TaskKind) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            kind,
            terminal: false,
            fields: Vec::new(),
            set_variables: Variables::new(),
            effect: None,
            transitions: Vec::new(),
            default: None,
        }
    }

    pub fn human(id: &str, name: &str) -> Self {
        Self::new(id, name, TaskKind::Human)
    }

    pub fn automatic(id: &str, name: &str) -> Self {
        Self::new(id, name, TaskKind::Automatic)
    }

    pub fn terminal(id: &str, name: &str) -> Self {
        let mut step = Self::new(id, name, TaskKind::Automatic);
        step.terminal = true;
        step
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn set(mut self, variable: &str, value: impl Into<Value>) -> Self {
        self.set_variables.insert(variable.to_string(), value.into());
        self
    }

    pub fn effect(mut self, name: &str) -> Self {
        self.effect = Some(name.to_string());
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn otherwise(mut self, targets: &[&str]) -> Self {
        self.default = Some(targets.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn field_definition(&self, field_id: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.id == field_id)
    }

    fn targets(&self) -> impl Iterator<Item = &String> {
        self.transitions
            .iter()
            .flat_map(|t| t.to.iter())
            .chain(self.default.iter().flatten())
    }
}

struct StepGraph<'a> {
    graph: DiGraph<&'a str, ()>,
    nodes: HashMap<&'a str, NodeIndex>,
}

/// Outcome of evaluating a step's outgoing transitions.
#[derive(Debug, Clone, PartialEq)]
pub struct NextSteps<'a> {
    pub targets: &'a [String],
    pub set: Option<&'a Variables>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub kind: String,
    pub initial_step: String,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn builder(kind: &str, initial_step: &str) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder {
            definition: WorkflowDefinition {
                kind: kind.to_string(),
                initial_step: initial_step.to_string(),
                steps: Vec::new(),
            },
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn require_step(&self, step_id: &str) -> Result<&StepDefinition> {
        self.step(step_id)
            .ok_or_else(|| WorkflowError::not_found("step", step_id))
    }

    /// Position of a step in declaration order.
    pub fn step_position(&self, step_id: &str) -> usize {
        self.steps
            .iter()
            .position(|s| s.id == step_id)
            .unwrap_or(usize::MAX)
    }

    /// First matching transition wins, then the default, else an error.
    pub fn next_steps<'a>(&'a self, step: &'a StepDefinition, variables: &Variables) -> Result<NextSteps<'a>> {
        if let Some(transition) = step.transitions.iter().find(|t| t.when.evaluate(variables)) {
            return Ok(NextSteps {
                targets: &transition.to,
                set: Some(&transition.set),
            });
        }
        match &step.default {
            Some(targets) => Ok(NextSteps { targets, set: None }),
            None => Err(WorkflowError::NoApplicableTransition {
                step_id: step.id.clone(),
            }),
        }
    }

    /// Step graph with one node per step id.
    fn graph(&self) -> std::result::Result<StepGraph<'_>, String> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
        for step in &self.steps {
            if nodes.insert(step.id.as_str(), graph.add_node(step.id.as_str())).is_some() {
                return Err(format!("duplicate step id '{}'", step.id));
            }
        }
        for step in &self.steps {
            let Some(&from) = nodes.get(step.id.as_str()) else {
                continue;
            };
            for target in step.targets() {
                match nodes.get(target.as_str()) {
                    Some(&to) => {
                        graph.add_edge(from, to, ());
                    }
                    None => return Err(format!("step '{}' targets unknown step '{}'", step.id, target)),
                }
            }
        }
        Ok(StepGraph { graph, nodes })
    }

    /// Whether a path of one or more transitions leads from `from` to `to`.
    pub fn can_reach(&self, from: &str, to: &str) -> bool {
        let Ok(steps) = self.graph() else {
            return false;
        };
        let (Some(&from), Some(&to)) = (steps.nodes.get(from), steps.nodes.get(to)) else {
            return false;
        };
        steps
            .graph
            .neighbors(from)
            .any(|next| has_path_connecting(&steps.graph, next, to, None))
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(WorkflowError::InvalidDefinition(format!("{}: {}", self.kind, msg)));

        if self.steps.is_empty() {
            return invalid("no steps declared".into());
        }
        for step in &self.steps {
            if let Err(msg) = Self::validate_step(step) {
                return invalid(msg);
            }
        }

        let StepGraph { graph, nodes } = match self.graph() {
            Ok(steps) => steps,
            Err(msg) => return invalid(msg),
        };
        let Some(&initial) = nodes.get(self.initial_step.as_str()) else {
            return invalid(format!("initial step '{}' is not declared", self.initial_step));
        };
        if self.step(&self.initial_step).is_some_and(|s| s.terminal) {
            return invalid("initial step cannot be terminal".into());
        }

        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&graph, initial);
        while let Some(node) = dfs.next(&graph) {
            reachable.insert(node);
        }
        if let Some(step) = self
            .steps
            .iter()
            .find(|s| !nodes.get(s.id.as_str()).is_some_and(|n| reachable.contains(n)))
        {
            return invalid(format!("step '{}' is unreachable from '{}'", step.id, self.initial_step));
        }

        // every step must be able to finish: walk the reversed graph from all terminals
        let reversed = Reversed(&graph);
        let mut finishing = HashSet::new();
        for &terminal in self
            .steps
            .iter()
            .filter(|s| s.terminal)
            .filter_map(|s| nodes.get(s.id.as_str()))
        {
            let mut dfs = Dfs::new(reversed, terminal);
            while let Some(node) = dfs.next(reversed) {
                finishing.insert(node);
            }
        }
        if let Some(step) = self
            .steps
            .iter()
            .find(|s| !nodes.get(s.id.as_str()).is_some_and(|n| finishing.contains(n)))
        {
            return invalid(format!("no terminal step is reachable from '{}'", step.id));
        }

        Ok(())
    }

    fn validate_step(step: &StepDefinition) -> std::result::Result<(), String> {
        let has_exit = step.transitions.iter().any(|t| !t.to.is_empty()) || step.default.is_some();
        if step.terminal {
            if has_exit || !step.transitions.is_empty() {
                return Err(format!("terminal step '{}' declares transitions", step.id));
            }
            if step.effect.is_some() || !step.fields.is_empty() {
                return Err(format!("terminal step '{}' cannot declare fields or effects", step.id));
            }
            return Ok(());
        }
        if !has_exit {
            return Err(format!("step '{}' has no outgoing transition", step.id));
        }
        if let Some(t) = step.transitions.iter().find(|t| t.to.is_empty()) {
            return Err(format!("step '{}' has a transition with no targets ({:?})", step.id, t.when));
        }
        if step.kind == TaskKind::Automatic && !step.fields.is_empty() {
            return Err(format!("automatic step '{}' cannot declare form fields", step.id));
        }

        let mut seen = HashSet::new();
        for field in &step.fields {
            if !seen.insert(field.id.as_str()) {
                return Err(format!("step '{}' declares field '{}' twice", step.id, field.id));
            }
            if field.field_type == FieldType::Enum && field.allowed_values.is_empty() {
                return Err(format!("enum field '{}' declares no allowed values", field.id));
            }
            if let Some(default) = &field.default_value {
                if crate::forms::coerce_value(field, default).is_err() {
                    return Err(format!("default of field '{}' does not match its type", field.id));
                }
            }
        }
        Ok(())
    }

    /// The classic user provisioning flow: approval, activation, then
    /// update/suspend/reactivate/delete driven by the `action` variable.
    pub fn default_user_workflow() -> Self {
        Self {
            kind: "user".to_string(),
            initial_step: "createApproval".to_string(),
            steps: vec![
                StepDefinition::human("createApproval", "Approve user creation")
                    .describe("Review the requested account before it is provisioned")
                    .field(FieldDefinition::string("username").named("Username").read_only())
                    .field(FieldDefinition::boolean("approve").named("Approve?").required())
                    .field(FieldDefinition::string("rejectReason").named("Reason for rejecting"))
                    .transition(Transition::when(Condition::equals("approve", true)).to("activate"))
                    .transition(
                        Transition::when(Condition::equals("approve", false))
                            .to("rejected")
                            .set("status", "rejected"),
                    ),
                StepDefinition::automatic("activate", "Activate user")
                    .set("status", "active")
                    .effect("provision")
                    .transition(Transition::always().to("active")),
                StepDefinition::automatic("active", "Active user")
                    .effect("provision")
                    .transition(Transition::when(Condition::equals("action", "update")).to("active"))
                    .transition(
                        Transition::when(Condition::equals("action", "suspend"))
                            .to("suspended")
                            .set("status", "suspended"),
                    )
                    .transition(
                        Transition::when(Condition::equals("action", "delete"))
                            .to("deleted")
                            .set("status", "deleted"),
                    ),
                StepDefinition::automatic("suspended", "Suspended user")
                    .effect("provision")
                    .transition(
                        Transition::when(Condition::equals("action", "reactivate"))
                            .to("active")
                            .set("status", "active"),
                    )
                    .transition(
                        Transition::when(Condition::equals("action", "delete"))
                            .to("deleted")
                            .set("status", "deleted"),
                    ),
                StepDefinition::terminal("rejected", "Rejected"),
                StepDefinition::terminal("deleted", "Deleted"),
            ],
        }
    }
}

pub struct WorkflowDefinitionBuilder {
    definition: WorkflowDefinition,
}

impl WorkflowDefinitionBuilder {
    pub fn step(mut self, step: StepDefinition) -> Self {
        self.definition.steps.push(step);
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition> {
        self.definition.validate()?;
        Ok(self.definition)
    }
}

/// YAML document holding one or more definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionFile {
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

/// Validated definitions keyed by workflow kind.
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, Arc<WorkflowDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .definitions
            .insert("user".to_string(), Arc::new(WorkflowDefinition::default_user_workflow()));
        registry
    }

    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<()> {
        definition.validate()?;
        self.definitions
            .insert(definition.kind.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn from_file(file: DefinitionFile) -> Result<Self> {
        let mut registry = Self::new();
        for definition in file.workflows {
            if registry.definitions.contains_key(&definition.kind) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "workflow kind '{}' declared twice",
                    definition.kind
                )));
            }
            registry.register(definition)?;
        }
        Ok(registry)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: DefinitionFile = serde_yaml::from_str(yaml)
            .map_err(|e| WorkflowError::InvalidDefinition(e.to_string()))?;
        Self::from_file(file)
    }

    pub fn get(&self, kind: &str) -> Result<Arc<WorkflowDefinition>> {
        self.definitions
            .get(kind)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("workflow definition", kind))
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approval_flow() -> WorkflowDefinitionBuilder {
        WorkflowDefinition::builder("request", "approveRequest")
            .step(
                StepDefinition::human("approveRequest", "Approve request")
                    .field(FieldDefinition::boolean("approved").required())
                    .transition(Transition::when(Condition::equals("approved", true)).to("done"))
                    .otherwise(&["done"]),
            )
            .step(StepDefinition::terminal("done", "Done"))
    }

    #[test]
    fn test_default_user_workflow_is_valid() {
        let definition = WorkflowDefinition::default_user_workflow();
        definition.validate().unwrap();
        assert!(definition.can_reach("createApproval", "deleted"));
        assert!(definition.can_reach("active", "active"));
        assert!(!definition.can_reach("activate", "activate"));
        assert!(!definition.can_reach("active", "createApproval"));
    }

    #[test]
    fn test_first_matching_transition_wins() {
        let definition = WorkflowDefinition::default_user_workflow();
        let step = definition.step("createApproval").unwrap();

        let mut vars = Variables::new();
        vars.insert("approve".into(), json!(false));
        let next = definition.next_steps(step, &vars).unwrap();
        assert_eq!(next.targets, ["rejected".to_string()]);
        assert_eq!(next.set.unwrap().get("status"), Some(&json!("rejected")));

        let err = definition.next_steps(step, &Variables::new()).unwrap_err();
        assert_eq!(err.code(), "NO_APPLICABLE_TRANSITION");
    }

    #[test]
    fn test_default_targets_apply_when_nothing_matches() {
        let definition = approval_flow().build().unwrap();
        let step = definition.step("approveRequest").unwrap();
        let next = definition.next_steps(step, &Variables::new()).unwrap();
        assert_eq!(next.targets, ["done".to_string()]);
        assert!(next.set.is_none());
    }

    #[test]
    fn test_rejects_unknown_target() {
        let err = WorkflowDefinition::builder("broken", "a")
            .step(StepDefinition::automatic("a", "A").transition(Transition::always().to("nowhere")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown step 'nowhere'"));
    }

    #[test]
    fn test_rejects_unreachable_and_unfinishable_steps() {
        let unreachable = approval_flow()
            .step(StepDefinition::automatic("orphan", "Orphan").transition(Transition::always().to("done")))
            .build()
            .unwrap_err();
        assert!(unreachable.to_string().contains("unreachable"));

        let looping = WorkflowDefinition::builder("loop", "a")
            .step(StepDefinition::automatic("a", "A").transition(Transition::always().to("b")))
            .step(StepDefinition::automatic("b", "B").transition(Transition::always().to("a")))
            .build()
            .unwrap_err();
        assert!(looping.to_string().contains("no terminal step"));
    }

    #[test]
    fn test_rejects_enum_without_values_and_bad_defaults() {
        let err = WorkflowDefinition::builder("forms", "a")
            .step(
                StepDefinition::human("a", "A")
                    .field(FieldDefinition::new("choice", FieldType::Enum))
                    .otherwise(&["end"]),
            )
            .step(StepDefinition::terminal("end", "End"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no allowed values"));

        let err = WorkflowDefinition::builder("forms", "a")
            .step(
                StepDefinition::human("a", "A")
                    .field(FieldDefinition::long("count").with_default("many"))
                    .otherwise(&["end"]),
            )
            .step(StepDefinition::terminal("end", "End"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("default of field 'count'"));
    }

    #[test]
    fn test_registry_from_yaml() {
        let yaml = r#"
workflows:
  - kind: request
    initial_step: approveRequest
    steps:
      - id: approveRequest
        name: Approve request
        kind: HUMAN
        fields:
          - id: approved
            name: Approved?
            type: boolean
            required: true
        transitions:
          - when:
              equals:
                variable: approved
                value: true
            to: [provisioned]
            set:
              status: active
        default: [rejected]
      - id: provisioned
        name: Provisioned
        terminal: true
      - id: rejected
        name: Rejected
        terminal: true
"#;
        let registry = DefinitionRegistry::from_yaml(yaml).unwrap();
        let definition = registry.get("request").unwrap();
        let step = definition.step("approveRequest").unwrap();
        assert_eq!(step.kind, TaskKind::Human);
        assert_eq!(step.transitions[0].when, Condition::equals("approved", true));
        assert!(step.fields[0].readable && step.fields[0].writable);

        // written back in the same map form
        let written = serde_yaml::to_string(step).unwrap();
        assert!(written.contains("equals:"), "{written}");
        assert!(!written.contains("!equals"), "{written}");
        assert_eq!(registry.kinds(), vec!["request"]);
        assert_eq!(registry.get("missing").unwrap_err().code(), "NOT_FOUND");
    }
}
