//! Task registry: which tasks are open, which forms are claimable and who holds them.

use crate::config::EngineConfig;
use crate::definition::DefinitionRegistry;
use crate::error::{Result, WorkflowError};
use crate::forms::{FormRenderer, WorkflowForm};
use crate::locks::{retry_on_conflict, InstanceLocks};
use crate::models::{ClaimState, PagedResult, TaskKind, TaskSummary, WorkflowFormQuery};
use crate::state_machine::ProcessStatus;
use crate::store::{load_required, owner_of, ProcessStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

pub struct TaskRegistry {
    store: Arc<dyn ProcessStore>,
    definitions: Arc<DefinitionRegistry>,
    renderer: Arc<FormRenderer>,
    locks: Arc<InstanceLocks>,
    config: Arc<EngineConfig>,
}

/// Active instances come before suspended ones.
fn claim_rank(status: ProcessStatus) -> Option<u8> {
    match status {
        ProcessStatus::Active => Some(0),
        ProcessStatus::Suspended => Some(1),
        ProcessStatus::Completed | ProcessStatus::Terminated => None,
    }
}

impl TaskRegistry {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        definitions: Arc<DefinitionRegistry>,
        renderer: Arc<FormRenderer>,
        locks: Arc<InstanceLocks>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            definitions,
            renderer,
            locks,
            config,
        }
    }

    /// Unclaimed human tasks, ordered by claim eligibility then creation.
    ///
    /// Reads a snapshot and takes no instance lock.
    pub async fn list_forms(&self, query: &WorkflowFormQuery) -> Result<PagedResult<WorkflowForm>> {
        let size = self.config.page_size(query.size);
        if query.kind == Some(TaskKind::Automatic) {
            return Ok(PagedResult::paginate(Vec::new(), query.page, size));
        }

        let instances = match &query.user_key {
            Some(user_key) => self.store.load(user_key).await?.into_iter().collect(),
            None => self.store.list().await?,
        };

        let mut candidates = Vec::new();
        for instance in &instances {
            let Some(rank) = claim_rank(instance.status) else {
                continue;
            };
            for task in instance.tasks.iter().filter(|t| t.is_human()) {
                if task.claim == ClaimState::Unclaimed {
                    candidates.push(((rank, task.created_at, task.sequence, task.id.as_str()), instance, task));
                }
            }
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let page = PagedResult::paginate(candidates, query.page, size);
        let forms = page
            .result
            .iter()
            .map(|(_, instance, task)| self.renderer.render(instance, task))
            .collect::<Result<Vec<_>>>()?;
        debug!(total = page.total_count, page = page.page, "Forms listed");
        Ok(PagedResult {
            page: page.page,
            size: page.size,
            total_count: page.total_count,
            result: forms,
        })
    }

    /// Form of the user's earliest pending human task.
    pub async fn get_form_for_user(&self, user_key: &str) -> Result<WorkflowForm> {
        let instance = load_required(self.store.as_ref(), user_key).await?;
        let task = instance
            .human_tasks()
            .first()
            .copied()
            .ok_or_else(|| WorkflowError::NoActiveTask {
                user_key: user_key.to_string(),
            })?;
        self.renderer.render(&instance, task)
    }

    /// First successful claim wins; everybody else gets `AlreadyClaimed`.
    pub async fn claim(&self, task_id: &str, caller: &str) -> Result<WorkflowForm> {
        retry_on_conflict(self.config.max_conflict_retries, || async move {
            let user_key = owner_of(self.store.as_ref(), task_id).await?;
            let _guard = self.locks.acquire(&user_key).await;

            let mut instance = load_required(self.store.as_ref(), &user_key).await?;
            let expected_version = instance.version;
            let task = instance
                .task(task_id)
                .ok_or_else(|| WorkflowError::not_found("task", task_id))?;
            instance.ensure_accepts_work()?;
            if !task.is_human() {
                return Err(WorkflowError::NotHumanTask {
                    task_id: task_id.to_string(),
                });
            }
            if let Some(claimant) = task.claimant() {
                return Err(WorkflowError::AlreadyClaimed {
                    task_id: task_id.to_string(),
                    claimant: claimant.to_string(),
                });
            }

            if let Some(task) = instance.task_mut(task_id) {
                task.claim = ClaimState::Claimed {
                    claimant: caller.to_string(),
                    claimed_at: Utc::now(),
                };
            }
            let committed = self.store.compare_and_swap(instance, expected_version).await?;
            info!(user_key = %user_key, task_id, claimant = caller, "Task claimed");

            let task = committed
                .task(task_id)
                .ok_or_else(|| WorkflowError::not_found("task", task_id))?;
            self.renderer.render(&committed, task)
        })
        .await
    }

    /// Frees a claim. Without `administrative` only the claimant may release it.
    /// Suspended instances keep their claims until resumed.
    pub async fn release_claim(&self, task_id: &str, caller: &str, administrative: bool) -> Result<WorkflowForm> {
        retry_on_conflict(self.config.max_conflict_retries, || async move {
            let user_key = owner_of(self.store.as_ref(), task_id).await?;
            let _guard = self.locks.acquire(&user_key).await;

            let mut instance = load_required(self.store.as_ref(), &user_key).await?;
            instance.ensure_accepts_work()?;
            let expected_version = instance.version;
            let task = instance
                .task(task_id)
                .ok_or_else(|| WorkflowError::not_found("task", task_id))?;
            if !task.is_human() {
                return Err(WorkflowError::NotHumanTask {
                    task_id: task_id.to_string(),
                });
            }

            match task.claimant() {
                None if administrative => return self.renderer.render(&instance, task),
                Some(holder) if holder == caller || administrative => {}
                claimant => {
                    return Err(WorkflowError::NotClaimedByCaller {
                        task_id: task_id.to_string(),
                        caller: caller.to_string(),
                        claimant: claimant.map(str::to_string),
                    })
                }
            }

            let previous = task.claimant().map(str::to_string);
            if let Some(task) = instance.task_mut(task_id) {
                task.claim = ClaimState::Unclaimed;
            }
            let committed = self.store.compare_and_swap(instance, expected_version).await?;
            info!(user_key = %user_key, task_id, released_by = caller, previous = ?previous, administrative, "Claim released");

            let task = committed
                .task(task_id)
                .ok_or_else(|| WorkflowError::not_found("task", task_id))?;
            self.renderer.render(&committed, task)
        })
        .await
    }

    /// Current tasks of the user, in workflow definition order.
    pub async fn list_available_tasks(&self, user_key: &str) -> Result<Vec<TaskSummary>> {
        let instance = load_required(self.store.as_ref(), user_key).await?;
        let definition = self.definitions.get(&instance.workflow_kind)?;

        let mut tasks: Vec<_> = instance.tasks.iter().collect();
        tasks.sort_by_key(|t| (definition.step_position(&t.step_id), t.created_at, t.sequence));

        tasks
            .into_iter()
            .map(|task| {
                let step = definition.require_step(&task.step_id)?;
                Ok(TaskSummary {
                    task_id: task.id.clone(),
                    step_id: task.step_id.clone(),
                    name: step.name.clone(),
                    kind: task.kind,
                    claimant: task.claimant().map(str::to_string),
                    created_at: task.created_at,
                })
            })
            .collect()
    }
}
