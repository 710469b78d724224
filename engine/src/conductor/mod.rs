//! Conductor
//!
//! Plans a run spec into a leveled task graph with typed handoff channels,
//! then executes it concurrently over one shared context bus.

pub mod channels;
pub mod engine;
pub mod executor;
pub mod graph;
pub mod handoff;
pub mod publisher;
pub mod report;
pub mod spec;
pub mod task;

pub use engine::Engine;
pub use executor::{Registry, TaskError};
pub use handoff::TypedHandoffLink;
pub use report::{AgentRunResult, ExecutionPlan, ExecutionReport, PlanStage, TaskIOPlan, TaskPlan, TypedPortPlan};
pub use spec::AgentSpecGraph;
pub use task::Task;
