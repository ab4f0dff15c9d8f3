//! Task execution: merge variables, resolve the next steps, run the step's
//! effect and commit the new task set in one versioned write.

use crate::config::EngineConfig;
use crate::definition::DefinitionRegistry;
use crate::effects::{EffectContext, EffectRegistry};
use crate::error::{Result, WorkflowError};
use crate::forms::validate_values;
use crate::locks::{retry_on_conflict, InstanceLocks};
use crate::models::{HistoryEntry, ProcessInstance, Task, UserState, Variables};
use crate::state_machine::ProcessStatus;
use crate::store::{load_required, owner_of, ProcessStore};
use chrono::Utc;
use logger_redacted::PiiRedactor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How the incoming values reach the task.
#[derive(Debug, Clone, Copy)]
pub enum Submission<'a> {
    /// Raw payload, merged as-is.
    Execute(&'a Variables),
    /// Form values, validated against the step's fields before anything else.
    Form(&'a Variables),
}

fn merge(target: &mut Variables, source: &Variables) {
    for (name, value) in source {
        target.insert(name.clone(), value.clone());
    }
}

pub struct TransitionEngine {
    store: Arc<dyn ProcessStore>,
    definitions: Arc<DefinitionRegistry>,
    effects: Arc<EffectRegistry>,
    locks: Arc<InstanceLocks>,
    config: Arc<EngineConfig>,
    redactor: PiiRedactor,
}

impl TransitionEngine {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        definitions: Arc<DefinitionRegistry>,
        effects: Arc<EffectRegistry>,
        locks: Arc<InstanceLocks>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let redactor = PiiRedactor::with_sensitive_keys(&config.sensitive_variables);
        Self {
            store,
            definitions,
            effects,
            locks,
            config,
            redactor,
        }
    }

    /// Executes an automatic task, or a human task held by `caller`.
    pub async fn execute(&self, task_id: &str, payload: &Variables, caller: &str) -> Result<UserState> {
        self.apply(task_id, caller, Submission::Execute(payload)).await
    }

    pub(crate) async fn apply(
        &self,
        task_id: &str,
        caller: &str,
        submission: Submission<'_>,
    ) -> Result<UserState> {
        retry_on_conflict(self.config.max_conflict_retries, || {
            self.attempt(task_id, caller, submission)
        })
        .await
    }

    async fn attempt(&self, task_id: &str, caller: &str, submission: Submission<'_>) -> Result<UserState> {
        let user_key = owner_of(self.store.as_ref(), task_id).await?;
        let _guard = self.locks.acquire(&user_key).await;

        let instance = load_required(self.store.as_ref(), &user_key).await?;
        let task = instance
            .task(task_id)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("task", task_id))?;
        instance.ensure_accepts_work()?;

        let definition = self.definitions.get(&instance.workflow_kind)?;
        let step = definition.require_step(&task.step_id)?;

        let payload = match submission {
            Submission::Execute(payload) => payload.clone(),
            Submission::Form(values) => {
                if !task.is_human() {
                    return Err(WorkflowError::NotHumanTask {
                        task_id: task.id.clone(),
                    });
                }
                validate_values(step, values, &instance.variables)?
            }
        };

        if task.is_human() && !task.claim.is_held_by(caller) {
            warn!(task_id, caller, claimant = ?task.claimant(), "Caller does not hold the claim");
            return Err(WorkflowError::NotClaimedByCaller {
                task_id: task.id.clone(),
                caller: caller.to_string(),
                claimant: task.claimant().map(str::to_string),
            });
        }

        self.advance(instance, &task, payload, caller).await
    }

    async fn advance(
        &self,
        mut instance: ProcessInstance,
        task: &Task,
        payload: Variables,
        caller: &str,
    ) -> Result<UserState> {
        let definition = self.definitions.get(&instance.workflow_kind)?;
        let step = definition.require_step(&task.step_id)?;
        let expected_version = instance.version;
        let now = Utc::now();

        let mut variables = instance.variables.clone();
        merge(&mut variables, &payload);
        merge(&mut variables, &step.set_variables);

        let next = definition.next_steps(step, &variables)?;
        let targets = next.targets.to_vec();
        if let Some(set) = next.set {
            merge(&mut variables, set);
        }

        instance.tasks.retain(|t| t.id != task.id);
        let mut arriving = std::mem::take(&mut instance.pending_joins);
        for target_id in &targets {
            let target = definition.require_step(target_id)?;
            if target.terminal {
                merge(&mut variables, &target.set_variables);
            } else if !arriving.contains(target_id) {
                arriving.push(target_id.clone());
            }
        }

        // a join waits while another current branch, or a step strictly
        // upstream of it that is being entered now, can still reach it
        let waiting: Vec<bool> = arriving
            .iter()
            .map(|target_id| {
                instance
                    .tasks
                    .iter()
                    .any(|t| &t.step_id != target_id && definition.can_reach(&t.step_id, target_id))
                    || arriving.iter().any(|other| {
                        other != target_id
                            && definition.can_reach(other, target_id)
                            && !definition.can_reach(target_id, other)
                    })
            })
            .collect();

        for (target_id, waits) in arriving.into_iter().zip(waiting) {
            if instance.has_step(&target_id) {
                debug!(step = %target_id, "Step already current, not duplicated");
                continue;
            }
            if waits {
                debug!(step = %target_id, "Join waiting for other branches");
                instance.pending_joins.push(target_id);
                continue;
            }
            let target = definition.require_step(&target_id)?;
            let sequence = self.store.next_sequence().await?;
            instance
                .tasks
                .push(Task::new(&target_id, target.kind, Some(&step.id), sequence, now));
        }

        if let Some(effect_name) = &step.effect {
            let effect = self.effects.get(effect_name)?;
            let context = EffectContext::new(&instance.user_key, &task.id, &step.id, effect_name);
            variables = effect
                .apply(&context, variables)
                .await
                .map_err(|e| {
                    warn!(effect = %effect_name, key = %context.idempotency_key, error = %e, "Effect failed");
                    WorkflowError::Effect {
                        effect: effect_name.clone(),
                        message: e.to_string(),
                    }
                })?;
        }

        debug!(
            user_key = %instance.user_key,
            variables = %self.redactor.redact_variables(&variables),
            "Variables merged"
        );

        instance.history.push(HistoryEntry {
            task_id: task.id.clone(),
            step_id: step.id.clone(),
            executed_by: caller.to_string(),
            executed_at: now,
            next_steps: targets.clone(),
        });
        instance.variables = variables;
        if instance.tasks.is_empty() {
            instance.status = instance.status.transition_to(ProcessStatus::Completed)?;
        }

        let committed = self.store.compare_and_swap(instance, expected_version).await?;
        info!(
            user_key = %committed.user_key,
            task_id = %task.id,
            step = %step.id,
            next = ?targets,
            status = %committed.status,
            "Task executed"
        );
        Ok(UserState::from_instance(&committed, &self.config.hidden_variables))
    }
}
