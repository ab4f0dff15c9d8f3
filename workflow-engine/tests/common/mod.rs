#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use workflow_engine::{
    Condition, DefinitionRegistry, EffectContext, EffectError, EffectRegistry, FieldDefinition,
    InMemoryProvisioner, StepDefinition, TaskEffect, Transition, Variables, WorkflowDefinition,
    WorkflowEngine,
};

pub const REQUEST: &str = "request";

/// approveRequest (human) -> provisionAccount (automatic) -> done
pub fn request_definition() -> WorkflowDefinition {
    WorkflowDefinition::builder(REQUEST, "approveRequest")
        .step(
            StepDefinition::human("approveRequest", "Approve request")
                .field(FieldDefinition::string("requester").named("Requester").read_only())
                .field(FieldDefinition::boolean("approved").named("Approved?").required())
                .field(FieldDefinition::string("comment").named("Comment"))
                .transition(Transition::when(Condition::equals("approved", true)).to("provisionAccount"))
                .transition(
                    Transition::when(Condition::equals("approved", false))
                        .to("done")
                        .set("status", "declined"),
                ),
        )
        .step(
            StepDefinition::automatic("provisionAccount", "Provision account")
                .set("status", "approved")
                .effect("provision")
                .transition(Transition::always().to("done")),
        )
        .step(StepDefinition::terminal("done", "Done"))
        .build()
        .expect("request definition is valid")
}

pub fn definitions() -> DefinitionRegistry {
    let mut registry = DefinitionRegistry::with_defaults();
    registry.register(request_definition()).unwrap();
    registry
}

pub fn engine_with_effects(effects: EffectRegistry) -> WorkflowEngine {
    WorkflowEngine::builder()
        .definitions(definitions())
        .effects(effects)
        .build()
        .unwrap()
}

pub fn engine() -> (WorkflowEngine, Arc<InMemoryProvisioner>) {
    let provisioner = Arc::new(InMemoryProvisioner::new());
    let engine = engine_with_effects(EffectRegistry::with_provisioner(provisioner.clone()));
    (engine, provisioner)
}

pub fn vars(value: Value) -> Variables {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Starts a request workflow for `user_key` and returns its approval task id.
pub async fn start_request(engine: &WorkflowEngine, user_key: &str) -> String {
    engine
        .start(user_key, REQUEST, vars(serde_json::json!({ "requester": user_key })))
        .await
        .unwrap();
    engine.get_form_for_user(user_key).await.unwrap().task_id
}

/// Fails the first `failures` calls, then behaves like a no-op.
#[derive(Default)]
pub struct FlakyEffect {
    failures: AtomicU32,
    pub keys: Mutex<Vec<String>>,
}

impl FlakyEffect {
    pub fn failing(times: u32) -> Self {
        Self {
            failures: AtomicU32::new(times),
            keys: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TaskEffect for FlakyEffect {
    async fn apply(
        &self,
        context: &EffectContext,
        variables: Variables,
    ) -> Result<Variables, EffectError> {
        self.keys.lock().push(context.idempotency_key.clone());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EffectError::Unavailable("identity store offline".into()));
        }
        Ok(variables)
    }
}
