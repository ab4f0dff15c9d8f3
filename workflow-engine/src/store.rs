use crate::error::{Result, WorkflowError};
use crate::models::ProcessInstance;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Transactional storage for process instances.
///
/// Claim state lives inside the tasks of an instance, so a single
/// `compare_and_swap` commits task set, claims and variables together.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessStore: Send + Sync {
    /// Stores a new instance at version 1. Fails if the user already has one.
    async fn insert(&self, instance: ProcessInstance) -> Result<ProcessInstance>;

    async fn load(&self, user_key: &str) -> Result<Option<ProcessInstance>>;

    /// User key of the instance currently holding `task_id`.
    async fn find_by_task(&self, task_id: &str) -> Result<Option<String>>;

    /// Replaces the stored instance if its version still equals `expected_version`.
    async fn compare_and_swap(
        &self,
        instance: ProcessInstance,
        expected_version: u64,
    ) -> Result<ProcessInstance>;

    /// Point-in-time copy of every instance, for read-only listings.
    async fn list(&self) -> Result<Vec<ProcessInstance>>;

    /// Monotonic counter used to order tasks created in the same instant.
    async fn next_sequence(&self) -> Result<u64>;
}

pub(crate) async fn load_required(store: &dyn ProcessStore, user_key: &str) -> Result<ProcessInstance> {
    store
        .load(user_key)
        .await?
        .ok_or_else(|| WorkflowError::not_found("process", user_key))
}

pub(crate) async fn owner_of(store: &dyn ProcessStore, task_id: &str) -> Result<String> {
    store
        .find_by_task(task_id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("task", task_id))
}

/// In-memory store for development, tests and the CLI simulator.
#[derive(Clone, Default)]
pub struct InMemoryProcessStore {
    instances: Arc<DashMap<String, ProcessInstance>>,
    task_index: Arc<DashMap<String, String>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn reindex(&self, user_key: &str, previous: &ProcessInstance, current: &ProcessInstance) {
        let live: HashSet<&str> = current.tasks.iter().map(|t| t.id.as_str()).collect();
        for task in &previous.tasks {
            if !live.contains(task.id.as_str()) {
                self.task_index.remove(&task.id);
            }
        }
        for task in &current.tasks {
            self.task_index.insert(task.id.clone(), user_key.to_string());
        }
    }
}

#[async_trait]
impl ProcessStore for InMemoryProcessStore {
    async fn insert(&self, mut instance: ProcessInstance) -> Result<ProcessInstance> {
        match self.instances.entry(instance.user_key.clone()) {
            Entry::Occupied(_) => Err(WorkflowError::InstanceExists {
                user_key: instance.user_key,
            }),
            Entry::Vacant(slot) => {
                instance.version = 1;
                for task in &instance.tasks {
                    self.task_index.insert(task.id.clone(), instance.user_key.clone());
                }
                slot.insert(instance.clone());
                Ok(instance)
            }
        }
    }

    async fn load(&self, user_key: &str) -> Result<Option<ProcessInstance>> {
        Ok(self.instances.get(user_key).map(|entry| entry.value().clone()))
    }

    async fn find_by_task(&self, task_id: &str) -> Result<Option<String>> {
        Ok(self.task_index.get(task_id).map(|entry| entry.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        mut instance: ProcessInstance,
        expected_version: u64,
    ) -> Result<ProcessInstance> {
        let user_key = instance.user_key.clone();
        let mut stored = self
            .instances
            .get_mut(&user_key)
            .ok_or_else(|| WorkflowError::not_found("process", &user_key))?;

        if stored.version != expected_version {
            return Err(WorkflowError::ConcurrencyConflict {
                user_key,
                expected: expected_version,
                found: stored.version,
            });
        }

        instance.version = expected_version.saturating_add(1);
        instance.updated_at = Utc::now();
        self.reindex(&user_key, &stored, &instance);
        *stored = instance.clone();
        debug!(user_key = %user_key, version = instance.version, "Process instance committed");
        Ok(instance)
    }

    async fn list(&self) -> Result<Vec<ProcessInstance>> {
        Ok(self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn next_sequence(&self) -> Result<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst).saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskKind, Variables};

    fn instance_with_task(user_key: &str, step: &str) -> ProcessInstance {
        let now = Utc::now();
        let mut instance = ProcessInstance::new(user_key, "user", Variables::new(), now);
        instance.tasks.push(Task::new(step, TaskKind::Human, None, 1, now));
        instance
    }

    #[tokio::test]
    async fn test_insert_is_exclusive() {
        let store = InMemoryProcessStore::new();
        let stored = store.insert(instance_with_task("alice", "approve")).await.unwrap();
        assert_eq!(stored.version, 1);

        let err = store.insert(instance_with_task("alice", "approve")).await.unwrap_err();
        assert_eq!(err.code(), "INSTANCE_EXISTS");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap_checks_version() {
        let store = InMemoryProcessStore::new();
        let stored = store.insert(instance_with_task("alice", "approve")).await.unwrap();

        let updated = store.compare_and_swap(stored.clone(), 1).await.unwrap();
        assert_eq!(updated.version, 2);

        let err = store.compare_and_swap(stored, 1).await.unwrap_err();
        match err {
            WorkflowError::ConcurrencyConflict { expected, found, .. } => {
                assert_eq!((expected, found), (1, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_task_index_follows_commits() {
        let store = InMemoryProcessStore::new();
        let stored = store.insert(instance_with_task("alice", "approve")).await.unwrap();
        let old_task = stored.tasks[0].id.clone();
        assert_eq!(store.find_by_task(&old_task).await.unwrap().as_deref(), Some("alice"));

        let mut next = stored.clone();
        next.tasks = vec![Task::new("activate", TaskKind::Automatic, Some("approve"), 2, Utc::now())];
        let new_task = next.tasks[0].id.clone();
        store.compare_and_swap(next, stored.version).await.unwrap();

        assert!(store.find_by_task(&old_task).await.unwrap().is_none());
        assert_eq!(store.find_by_task(&new_task).await.unwrap().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let store = InMemoryProcessStore::new();
        let a = store.next_sequence().await.unwrap();
        let b = store.next_sequence().await.unwrap();
        assert!(b > a);
    }
}
