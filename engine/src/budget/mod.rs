//! Tool budget module
//!
//! This module caps how many skill calls a task may make and how much time
//! those calls may take. Two scopes are checked around every call:
//!
//! - **Task scope**: `tool_max_calls` / `tool_max_exec_ms` from the agent's
//!   own metadata, owned by the running task
//! - **Stage scope**: `stage_tool_max_calls` / `stage_tool_max_exec_ms`,
//!   shared by every task leveled into the same stage (smallest positive
//!   value among the stage's agents wins)
//!
//! # Protocol
//!
//! A call first takes a [`Reservation`] on each scope. A reservation that is
//! dropped without [`Reservation::commit`] hands its call slot back, so a
//! stage rejection releases the task slot taken just before it. After the
//! call, the elapsed time is charged to both scopes and the execution-time
//! ceiling is checked. That check is reactive: the call has already run.
//!
//! A missing ceiling never rejects.

use crate::config::metadata::AgentTuning;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Budget rejection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetError {
    #[error("tool_max_calls exceeded ({max}) before {skill}")]
    TaskCalls { max: usize, skill: String },

    #[error("tool_max_exec_ms exceeded ({max}ms) after {skill}")]
    TaskExec { max: usize, skill: String },

    #[error("stage_tool_max_calls exceeded ({max}) on stage={stage} before {skill}")]
    StageCalls { max: usize, stage: usize, skill: String },

    #[error("stage_tool_max_exec_ms exceeded ({max}ms) on stage={stage} after {skill}")]
    StageExec { max: usize, stage: usize, skill: String },
}

/// Which scope a budget belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetScope {
    Task,
    Stage(usize),
}

/// Usage and ceilings at a point in time; 0 ceilings mean unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub calls_used: usize,
    pub exec_ms_used: usize,
    pub max_calls: usize,
    pub max_exec_ms: usize,
}

#[derive(Debug, Default)]
struct Counters {
    calls: usize,
    exec: Duration,
}

/// One scope's call and execution-time ceilings
#[derive(Debug)]
pub struct ToolBudget {
    scope: BudgetScope,
    max_calls: Option<usize>,
    max_exec_ms: Option<usize>,
    counters: Mutex<Counters>,
}

impl ToolBudget {
    pub fn new(scope: BudgetScope, max_calls: Option<usize>, max_exec_ms: Option<usize>) -> Self {
        Self {
            scope,
            max_calls: max_calls.filter(|v| *v > 0),
            max_exec_ms: max_exec_ms.filter(|v| *v > 0),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Task budget from the agent's tuning
    pub fn for_task(tuning: &AgentTuning) -> Self {
        Self::new(BudgetScope::Task, tuning.tool_max_calls, tuning.tool_max_exec_ms)
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one call slot, or reject when the ceiling is already reached
    pub fn reserve(&self, skill: &str) -> Result<Reservation<'_>, BudgetError> {
        let mut c = self.counters();
        if let Some(max) = self.max_calls {
            if c.calls >= max {
                let skill = skill.trim().to_string();
                return Err(match self.scope {
                    BudgetScope::Task => BudgetError::TaskCalls { max, skill },
                    BudgetScope::Stage(stage) => BudgetError::StageCalls { max, stage, skill },
                });
            }
        }
        c.calls += 1;
        Ok(Reservation {
            budget: self,
            committed: false,
        })
    }

    fn release_call(&self) {
        let mut c = self.counters();
        c.calls = c.calls.saturating_sub(1);
    }

    /// Charge the elapsed time of a finished call
    pub fn record_exec(&self, elapsed: Duration) {
        self.counters().exec += elapsed;
    }

    /// Reject once accumulated execution time is over the ceiling
    pub fn check_exec(&self, skill: &str) -> Result<(), BudgetError> {
        let Some(max) = self.max_exec_ms else {
            return Ok(());
        };
        let used = self.counters().exec;
        if used <= Duration::from_millis(max as u64) {
            return Ok(());
        }
        let skill = skill.trim().to_string();
        Err(match self.scope {
            BudgetScope::Task => BudgetError::TaskExec { max, skill },
            BudgetScope::Stage(stage) => BudgetError::StageExec { max, stage, skill },
        })
    }

    pub fn usage(&self) -> BudgetUsage {
        let c = self.counters();
        BudgetUsage {
            calls_used: c.calls,
            exec_ms_used: c.exec.as_millis() as usize,
            max_calls: self.max_calls.unwrap_or(0),
            max_exec_ms: self.max_exec_ms.unwrap_or(0),
        }
    }
}

/// A call slot taken by [`ToolBudget::reserve`]
///
/// Dropping it uncommitted gives the slot back.
#[must_use = "an uncommitted reservation is released on drop"]
#[derive(Debug)]
pub struct Reservation<'a> {
    budget: &'a ToolBudget,
    committed: bool,
}

impl Reservation<'_> {
    /// Keep the slot
    pub fn commit(mut self) {
        self.committed = true;
    }

    /// Give the slot back now
    pub fn release(self) {}
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.budget.release_call();
        }
    }
}

/// Shared budgets keyed by leveled stage index
#[derive(Debug, Default, Clone)]
pub struct StageBudgets {
    by_stage: BTreeMap<usize, Arc<ToolBudget>>,
}

impl StageBudgets {
    /// Build from `(stage, tuning)` pairs; each stage gets the smallest
    /// positive ceiling any of its agents asks for, and stages without any
    /// ceiling get no budget
    pub fn build<'a>(tasks: impl IntoIterator<Item = (usize, &'a AgentTuning)>) -> Self {
        let mut acc: BTreeMap<usize, (Option<usize>, Option<usize>)> = BTreeMap::new();
        let min_positive = |cur: Option<usize>, next: Option<usize>| match (cur, next) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        for (stage, tuning) in tasks {
            let entry = acc.entry(stage).or_default();
            entry.0 = min_positive(entry.0, tuning.stage_tool_max_calls);
            entry.1 = min_positive(entry.1, tuning.stage_tool_max_exec_ms);
        }
        let by_stage = acc
            .into_iter()
            .filter(|(_, (calls, exec))| calls.is_some() || exec.is_some())
            .map(|(stage, (calls, exec))| {
                (stage, Arc::new(ToolBudget::new(BudgetScope::Stage(stage), calls, exec)))
            })
            .collect();
        Self { by_stage }
    }

    pub fn get(&self, stage: usize) -> Option<Arc<ToolBudget>> {
        self.by_stage.get(&stage).map(Arc::clone)
    }

    pub fn is_empty(&self) -> bool {
        self.by_stage.is_empty()
    }
}

/// The task budget plus the optional stage budget of one running task
#[derive(Debug)]
pub struct BudgetGate {
    task: ToolBudget,
    stage: Option<Arc<ToolBudget>>,
}

impl BudgetGate {
    pub fn new(task: ToolBudget, stage: Option<Arc<ToolBudget>>) -> Self {
        Self { task, stage }
    }

    /// Reserve on the task scope, then the stage scope
    ///
    /// A stage rejection drops the task reservation, leaving both counters
    /// as they were.
    pub fn before_call(&self, skill: &str) -> Result<(), BudgetError> {
        let task = self.task.reserve(skill)?;
        let stage = match &self.stage {
            Some(stage) => Some(stage.reserve(skill).inspect_err(|e| {
                warn!(skill = %skill, error = %e, "stage budget rejected call");
            })?),
            None => None,
        };
        task.commit();
        if let Some(stage) = stage {
            stage.commit();
        }
        Ok(())
    }

    /// Charge `elapsed` to both scopes
    pub fn after_call(&self, elapsed: Duration) {
        self.task.record_exec(elapsed);
        if let Some(stage) = &self.stage {
            stage.record_exec(elapsed);
        }
    }

    /// Check execution time, task scope first
    pub fn after_check(&self, skill: &str) -> Result<(), BudgetError> {
        self.task.check_exec(skill)?;
        match &self.stage {
            Some(stage) => stage.check_exec(skill),
            None => Ok(()),
        }
    }

    pub fn task_usage(&self) -> BudgetUsage {
        self.task.usage()
    }

    pub fn stage_usage(&self) -> Option<BudgetUsage> {
        self.stage.as_ref().map(|s| s.usage())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn tuning(pairs: &[(&str, &str)]) -> AgentTuning {
        let meta: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentTuning::from_metadata(&meta)
    }

    #[test]
    fn test_task_call_ceiling() {
        let budget = ToolBudget::new(BudgetScope::Task, Some(2), None);
        budget.reserve("a").unwrap().commit();
        budget.reserve("b").unwrap().commit();
        let err = budget.reserve(" c ").unwrap_err();
        assert_eq!(err.to_string(), "tool_max_calls exceeded (2) before c");
        assert_eq!(budget.usage().calls_used, 2);
    }

    #[test]
    fn test_uncommitted_reservation_is_released() {
        let budget = ToolBudget::new(BudgetScope::Task, Some(1), None);
        let r = budget.reserve("a").unwrap();
        assert_eq!(budget.usage().calls_used, 1);
        r.release();
        assert_eq!(budget.usage().calls_used, 0);
        {
            let _r = budget.reserve("a").unwrap();
        }
        assert_eq!(budget.usage().calls_used, 0);
    }

    #[test]
    fn test_stage_rejection_rolls_back_task() {
        let stage = Arc::new(ToolBudget::new(BudgetScope::Stage(1), Some(1), None));
        let a = BudgetGate::new(ToolBudget::new(BudgetScope::Task, None, None), Some(Arc::clone(&stage)));
        let b = BudgetGate::new(ToolBudget::new(BudgetScope::Task, Some(5), None), Some(Arc::clone(&stage)));

        a.before_call("x").unwrap();
        let err = b.before_call("y").unwrap_err();
        assert_eq!(err.to_string(), "stage_tool_max_calls exceeded (1) on stage=1 before y");
        assert_eq!(b.task_usage().calls_used, 0);
        assert_eq!(stage.usage().calls_used, 1);
    }

    #[test]
    fn test_exec_ceiling_is_reactive() {
        let gate = BudgetGate::new(
            ToolBudget::new(BudgetScope::Task, None, Some(10)),
            Some(Arc::new(ToolBudget::new(BudgetScope::Stage(0), None, Some(100)))),
        );
        gate.before_call("slow").unwrap();
        gate.after_call(Duration::from_millis(10));
        assert!(gate.after_check("slow").is_ok());
        gate.after_call(Duration::from_millis(5));
        assert_eq!(
            gate.after_check("slow").unwrap_err().to_string(),
            "tool_max_exec_ms exceeded (10ms) after slow"
        );
        assert_eq!(gate.stage_usage().unwrap().exec_ms_used, 15);
    }

    #[test]
    fn test_unlimited_never_rejects() {
        let gate = BudgetGate::new(ToolBudget::new(BudgetScope::Task, Some(0), None), None);
        for _ in 0..100 {
            gate.before_call("x").unwrap();
        }
        gate.after_call(Duration::from_secs(60));
        assert!(gate.after_check("x").is_ok());
        assert_eq!(gate.task_usage().max_calls, 0);
        assert!(gate.stage_usage().is_none());
    }

    #[test]
    fn test_stage_budgets_take_smallest_positive() {
        let a = tuning(&[("stage_tool_max_calls", "5")]);
        let b = tuning(&[("stage_tool_max_calls", "3"), ("stage_tool_max_exec_ms", "0")]);
        let c = tuning(&[("stage_tool_max_exec_ms", "200")]);
        let none = tuning(&[]);
        let budgets = StageBudgets::build([(0, &a), (0, &b), (1, &c), (2, &none)]);

        let s0 = budgets.get(0).unwrap().usage();
        assert_eq!((s0.max_calls, s0.max_exec_ms), (3, 0));
        let s1 = budgets.get(1).unwrap().usage();
        assert_eq!((s1.max_calls, s1.max_exec_ms), (0, 200));
        assert!(budgets.get(2).is_none());
    }
}
