use crate::config::{load_definitions, EngineConfig};
use crate::definition::DefinitionRegistry;
use crate::effects::{EffectRegistry, InMemoryProvisioner};
use crate::error::{Result, WorkflowError};
use crate::forms::{FormRenderer, WorkflowForm};
use crate::locks::{retry_on_conflict, InstanceLocks};
use crate::models::{PagedResult, ProcessInstance, Task, TaskSummary, UserState, Variables, WorkflowFormQuery};
use crate::registry::TaskRegistry;
use crate::state_machine::ProcessStatus;
use crate::store::{load_required, InMemoryProcessStore, ProcessStore};
use crate::transition::TransitionEngine;
use chrono::Utc;
use config_engine::ConfigValidator;
use std::sync::Arc;
use tracing::{info, instrument};

/// Entry point for the gateway: every user workflow operation goes through here.
pub struct WorkflowEngine {
    store: Arc<dyn ProcessStore>,
    definitions: Arc<DefinitionRegistry>,
    locks: Arc<InstanceLocks>,
    config: Arc<EngineConfig>,
    transitions: Arc<TransitionEngine>,
    forms: Arc<FormRenderer>,
    registry: TaskRegistry,
}

#[derive(Default)]
pub struct WorkflowEngineBuilder {
    store: Option<Arc<dyn ProcessStore>>,
    definitions: Option<DefinitionRegistry>,
    effects: Option<EffectRegistry>,
    config: EngineConfig,
}

impl WorkflowEngineBuilder {
    pub fn store(mut self, store: Arc<dyn ProcessStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn definitions(mut self, definitions: DefinitionRegistry) -> Self {
        self.definitions = Some(definitions);
        self
    }

    pub fn effects(mut self, effects: EffectRegistry) -> Self {
        self.effects = Some(effects);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Falls back to an in-memory store, the built-in definitions and an
    /// in-memory provisioner for whatever was not supplied.
    pub fn build(self) -> Result<WorkflowEngine> {
        self.config.validate()?;

        let definitions = match self.definitions {
            Some(definitions) => definitions,
            None => match &self.config.definitions_path {
                Some(path) => load_definitions(path)?,
                None => DefinitionRegistry::with_defaults(),
            },
        };
        let effects = self
            .effects
            .unwrap_or_else(|| EffectRegistry::with_provisioner(Arc::new(InMemoryProvisioner::new())));

        for kind in definitions.kinds() {
            let definition = definitions.get(kind)?;
            for step in &definition.steps {
                if let Some(effect) = &step.effect {
                    if !effects.contains(effect) {
                        return Err(WorkflowError::InvalidDefinition(format!(
                            "{kind}: step '{}' uses unregistered effect '{effect}'",
                            step.id
                        )));
                    }
                }
            }
        }

        let store: Arc<dyn ProcessStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryProcessStore::new()),
        };
        let definitions = Arc::new(definitions);
        let config = Arc::new(self.config);
        let locks = Arc::new(InstanceLocks::new());

        let transitions = Arc::new(TransitionEngine::new(
            store.clone(),
            definitions.clone(),
            Arc::new(effects),
            locks.clone(),
            config.clone(),
        ));
        let forms = Arc::new(FormRenderer::new(definitions.clone(), transitions.clone()));
        let registry = TaskRegistry::new(
            store.clone(),
            definitions.clone(),
            forms.clone(),
            locks.clone(),
            config.clone(),
        );

        info!(kinds = ?definitions.kinds(), "Workflow engine ready");
        Ok(WorkflowEngine {
            store,
            definitions,
            locks,
            config,
            transitions,
            forms,
            registry,
        })
    }
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    pub fn forms(&self) -> &FormRenderer {
        &self.forms
    }

    pub fn transitions(&self) -> &TransitionEngine {
        &self.transitions
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.registry
    }

    #[instrument(skip(self))]
    pub async fn list_forms(&self, query: &WorkflowFormQuery) -> Result<PagedResult<WorkflowForm>> {
        self.registry.list_forms(query).await
    }

    #[instrument(skip(self))]
    pub async fn get_form_for_user(&self, user_key: &str) -> Result<WorkflowForm> {
        self.registry.get_form_for_user(user_key).await
    }

    #[instrument(skip(self))]
    pub async fn claim_form(&self, task_id: &str, caller: &str) -> Result<WorkflowForm> {
        self.registry.claim(task_id, caller).await
    }

    #[instrument(skip(self))]
    pub async fn release_claim(&self, task_id: &str, caller: &str, administrative: bool) -> Result<WorkflowForm> {
        self.registry.release_claim(task_id, caller, administrative).await
    }

    #[instrument(skip(self, form), fields(task_id = %form.task_id))]
    pub async fn submit_form(&self, form: &WorkflowForm, caller: &str) -> Result<UserState> {
        self.forms.submit_form(form, caller).await
    }

    #[instrument(skip(self, values))]
    pub async fn submit(&self, task_id: &str, values: &Variables, caller: &str) -> Result<UserState> {
        self.forms.submit(task_id, values, caller).await
    }

    #[instrument(skip(self))]
    pub async fn get_available_tasks(&self, user_key: &str) -> Result<Vec<TaskSummary>> {
        self.registry.list_available_tasks(user_key).await
    }

    #[instrument(skip(self, payload))]
    pub async fn execute_task(&self, task_id: &str, payload: &Variables, caller: &str) -> Result<UserState> {
        self.transitions.execute(task_id, payload, caller).await
    }

    /// Puts a user into a workflow at its initial step.
    #[instrument(skip(self, variables))]
    pub async fn start(&self, user_key: &str, kind: &str, variables: Variables) -> Result<UserState> {
        let definition = self.definitions.get(kind)?;
        let initial = definition.require_step(&definition.initial_step)?;
        let _guard = self.locks.acquire(user_key).await;

        let now = Utc::now();
        let sequence = self.store.next_sequence().await?;
        let mut instance = ProcessInstance::new(user_key, kind, variables, now);
        instance
            .tasks
            .push(Task::new(&initial.id, initial.kind, None, sequence, now));

        let stored = self.store.insert(instance).await?;
        info!(user_key, kind, step = %initial.id, "Process started");
        Ok(UserState::from_instance(&stored, &self.config.hidden_variables))
    }

    #[instrument(skip(self))]
    pub async fn suspend(&self, user_key: &str) -> Result<UserState> {
        self.change_status(user_key, ProcessStatus::Suspended).await
    }

    #[instrument(skip(self))]
    pub async fn resume(&self, user_key: &str) -> Result<UserState> {
        self.change_status(user_key, ProcessStatus::Active).await
    }

    /// Abnormal end: current tasks and their claims are dropped.
    #[instrument(skip(self))]
    pub async fn terminate(&self, user_key: &str) -> Result<UserState> {
        self.change_status(user_key, ProcessStatus::Terminated).await
    }

    #[instrument(skip(self))]
    pub async fn get_user_state(&self, user_key: &str) -> Result<UserState> {
        let instance = load_required(self.store.as_ref(), user_key).await?;
        Ok(UserState::from_instance(&instance, &self.config.hidden_variables))
    }

    async fn change_status(&self, user_key: &str, next: ProcessStatus) -> Result<UserState> {
        // unknown users never get a lock entry
        load_required(self.store.as_ref(), user_key).await?;
        retry_on_conflict(self.config.max_conflict_retries, || async move {
            let _guard = self.locks.acquire(user_key).await;
            let mut instance = load_required(self.store.as_ref(), user_key).await?;
            let expected_version = instance.version;
            let previous = instance.status;

            instance.status = previous.transition_to(next)?;
            if next == ProcessStatus::Terminated {
                instance.tasks.clear();
                instance.pending_joins.clear();
            }
            let committed = self.store.compare_and_swap(instance, expected_version).await?;
            info!(user_key, from = %previous, to = %next, "Process status changed");
            Ok(UserState::from_instance(&committed, &self.config.hidden_variables))
        })
        .await
    }
}
