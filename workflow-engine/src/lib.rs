//! User workflow engine for identity provisioning
//!
//! Drives a user's lifecycle (creation, approval, modification) through a
//! workflow definition made of human and automatic steps:
//! - Process store: one versioned process instance per user
//! - Task registry: claimable forms, exclusive claims, available tasks
//! - Form renderer: derives forms from step definitions and validates submissions
//! - Transition engine: merges variables, resolves conditional transitions,
//!   runs the step's external effect and commits atomically
//!
//! # Concurrency
//!
//! Writers on one instance are serialized by a per-user lock and every
//! commit is a version compare-and-swap, so two concurrent claims on the same
//! task resolve to exactly one winner. Listings read a snapshot and never
//! block writers.
//!
//! # Example
//!
//! ```rust,ignore
//! use workflow_engine::{Variables, WorkflowEngine};
//!
//! let engine = WorkflowEngine::builder().build()?;
//! let mut attributes = Variables::new();
//! attributes.insert("username".into(), "alice".into());
//! engine.start("alice", "user", attributes).await?;
//!
//! let mut form = engine.get_form_for_user("alice").await?;
//! engine.claim_form(&form.task_id, "bob").await?;
//! form.set_value("approve", true);
//! let state = engine.submit_form(&form, "bob").await?;
//! ```

pub mod conditions;
pub mod config;
pub mod definition;
pub mod effects;
pub mod engine;
pub mod error;
pub mod forms;
pub mod locks;
pub mod models;
pub mod registry;
pub mod state_machine;
pub mod store;
pub mod transition;

pub use conditions::*;
pub use config::*;
pub use definition::*;
pub use effects::*;
pub use engine::*;
pub use error::*;
pub use forms::*;
pub use locks::*;
pub use models::*;
pub use registry::*;
pub use state_machine::*;
pub use store::*;
pub use transition::*;
