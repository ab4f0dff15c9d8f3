//! External side effects attached to workflow steps.
//!
//! The engine resolves control flow first, then hands the merged variables
//! to the step's effect. An effect receives an idempotency key that stays
//! the same across retries of one task execution, so a downstream system can
//! drop duplicates.

use crate::error::{Result, WorkflowError};
use crate::models::Variables;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Name under which [`InMemoryProvisioner`] is registered by default.
pub const PROVISION_EFFECT: &str = "provision";

/// Variable set by the provisioner once the downstream request went through.
pub const PROVISIONED_VARIABLE: &str = "provisioned";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectContext {
    /// `"{user_key}/{task_id}"`, identical for every attempt of one execution.
    pub idempotency_key: String,
    pub user_key: String,
    pub task_id: String,
    pub step_id: String,
    pub effect: String,
}

impl EffectContext {
    pub fn new(user_key: &str, task_id: &str, step_id: &str, effect: &str) -> Self {
        Self {
            idempotency_key: format!("{user_key}/{task_id}"),
            user_key: user_key.to_string(),
            task_id: task_id.to_string(),
            step_id: step_id.to_string(),
            effect: effect.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    #[error("Downstream system unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// A named side effect, e.g. pushing the user's attributes to the identity store.
#[async_trait]
pub trait TaskEffect: Send + Sync {
    /// Returns the variables to persist. Output is merged, it never re-routes the workflow.
    async fn apply(
        &self,
        context: &EffectContext,
        variables: Variables,
    ) -> std::result::Result<Variables, EffectError>;
}

/// Effect that changes nothing. Handy for definitions that only need a hook name.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEffect;

#[async_trait]
impl TaskEffect for NoopEffect {
    async fn apply(
        &self,
        context: &EffectContext,
        variables: Variables,
    ) -> std::result::Result<Variables, EffectError> {
        debug!(effect = %context.effect, task_id = %context.task_id, "No-op effect");
        Ok(variables)
    }
}

/// A request the provisioner accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisioningRequest {
    pub idempotency_key: String,
    pub user_key: String,
    pub step_id: String,
    pub status: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// Records provisioning requests in memory, once per idempotency key.
#[derive(Debug, Default)]
pub struct InMemoryProvisioner {
    requests: Mutex<Vec<ProvisioningRequest>>,
}

impl InMemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ProvisioningRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests_for(&self, user_key: &str) -> Vec<ProvisioningRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.user_key == user_key)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskEffect for InMemoryProvisioner {
    async fn apply(
        &self,
        context: &EffectContext,
        mut variables: Variables,
    ) -> std::result::Result<Variables, EffectError> {
        {
            let mut requests = self.requests.lock();
            if requests
                .iter()
                .any(|r| r.idempotency_key == context.idempotency_key)
            {
                debug!(key = %context.idempotency_key, "Provisioning request already recorded");
            } else {
                requests.push(ProvisioningRequest {
                    idempotency_key: context.idempotency_key.clone(),
                    user_key: context.user_key.clone(),
                    step_id: context.step_id.clone(),
                    status: variables
                        .get(crate::models::STATUS_VARIABLE)
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    requested_at: Utc::now(),
                });
                info!(user_key = %context.user_key, step = %context.step_id, "Provisioning request recorded");
            }
        }
        variables.insert(PROVISIONED_VARIABLE.to_string(), Value::Bool(true));
        Ok(variables)
    }
}

/// Effects keyed by the name steps refer to.
#[derive(Clone, Default)]
pub struct EffectRegistry {
    effects: HashMap<String, Arc<dyn TaskEffect>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `provision` bound to the given provisioner.
    pub fn with_provisioner(provisioner: Arc<InMemoryProvisioner>) -> Self {
        let mut registry = Self::new();
        registry.register(PROVISION_EFFECT, provisioner);
        registry
    }

    pub fn register(&mut self, name: &str, effect: Arc<dyn TaskEffect>) -> &mut Self {
        self.effects.insert(name.to_string(), effect);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.effects.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn TaskEffect>> {
        self.effects
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("effect", name))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.effects.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
