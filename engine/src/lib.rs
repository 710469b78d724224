//! Relay Engine Library
//!
//! Multi-agent DAG orchestration: agents declared in a project manifest are
//! wired into a task graph by a run spec, exchange typed handoffs through a
//! shared context bus and call skills through a caching, locking broker
//! under task and stage budgets.

/// Project manifest and agent tuning
pub mod config;

/// LLM provider abstraction layer
pub mod llm;

/// Built-in skills and tool argument schemas
pub mod tools;

/// Shared context bus and context compiler
pub mod context;

/// Task and stage tool budgets
pub mod budget;

/// Skill call caching, coalescing and resource locking
pub mod broker;

/// Run planning and execution
pub mod conductor;

/// Telemetry and Observability
pub mod telemetry;

pub use conductor::{Engine, ExecutionPlan, ExecutionReport};
