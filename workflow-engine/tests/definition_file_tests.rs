use serde_json::json;
use std::path::PathBuf;
use workflow_engine::{load_definitions, EngineConfig, Variables, WorkflowDefinition, WorkflowEngine};

fn repo_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..").join(name)
}

#[test]
fn test_shipped_definitions_are_valid() {
    let registry = load_definitions(&repo_file("config/workflows.yaml")).unwrap();
    assert_eq!(registry.kinds(), vec!["passwordReset", "user"]);

    // the YAML rendition matches the built-in user workflow
    let user = registry.get("user").unwrap();
    assert_eq!(*user, WorkflowDefinition::default_user_workflow());
}

#[test]
fn test_shipped_engine_config() {
    let config = EngineConfig::load(Some(&repo_file("config/userworkflow.yaml"))).unwrap();
    assert_eq!(config.max_conflict_retries, 3);
    assert_eq!(config.sensitive_variables, vec!["password", "securityAnswer"]);
    assert_eq!(config.hidden_variables, vec!["password", "securityAnswer"]);
    assert!(config.definitions_path.is_some());
}

#[tokio::test]
async fn test_password_reset_refusal() {
    let config = EngineConfig {
        definitions_path: Some(repo_file("config/workflows.yaml")),
        ..EngineConfig::default()
    };
    let engine = WorkflowEngine::builder().config(config).build().unwrap();
    let mut attributes = Variables::new();
    attributes.insert("securityAnswer".into(), json!("green"));
    let started = engine.start("erin", "passwordReset", attributes).await.unwrap();
    assert!(!started.attributes.contains_key("securityAnswer"));

    // the stored answer is never rendered back
    let mut form = engine.get_form_for_user("erin").await.unwrap();
    assert_eq!(form.field("securityAnswer").unwrap().value, None);
    assert!(!form.field("securityAnswer").unwrap().readable);
    engine.claim_form(&form.task_id, "helpdesk").await.unwrap();
    form.set_value("securityAnswer", "blue");
    form.set_value("verified", false);

    let state = engine.submit_form(&form, "helpdesk").await.unwrap();
    assert_eq!(state.status.as_deref(), Some("reset_refused"));
    assert!(!state.attributes.contains_key("securityAnswer"));
    assert!(state.current_tasks.is_empty());
}
