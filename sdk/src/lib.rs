//! Relay SDK
//!
//! Shared vocabulary for the relay engine and for anyone implementing skills
//! or providers against it: the type-kind taxonomy, the skill capability and
//! the fatal error taxonomy.

/// Error types and handling
pub mod errors;

/// Type kind taxonomy
pub mod kinds;

/// Skill capability and call records
pub mod skill;

// Re-export commonly used types
pub use errors::{EngineError, RelayErrorExt};
pub use kinds::{kinds_compatible, Category, Kind, KindDef, TypedValue};
pub use skill::{Skill, SkillCallResult, SkillError, SkillExecution, SkillResult};
