//! Engine facade
//!
//! Holds a validated project and the providers and skills available to it,
//! and turns run specs into plans and reports.

use super::executor::{run_graph, Registry};
use super::graph::plan_graph;
use super::report::{ExecutionPlan, ExecutionReport};
use super::spec::AgentSpecGraph;
use super::task::Task;
use crate::config::{Project, SkillConfig};
use crate::llm::mock::MockProvider;
use crate::llm::LLMProvider;
use crate::tools::builtin_skill;
use sdk::errors::EngineError;
use sdk::skill::Skill;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

pub struct Engine {
    project: Project,
    registry: Registry,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("agents", &self.list_agents())
            .field("registry", &self.registry)
            .finish()
    }
}

impl Engine {
    /// Validate `project` and register its built-in providers and skills
    ///
    /// Providers of type `mock` and skills of type `echo` are instantiated
    /// here; anything else must be registered by the caller before running.
    pub fn new(project: Project) -> Result<Self, EngineError> {
        project.validate()?;
        let mut registry = Registry::default();
        for p in &project.root.providers {
            if p.provider_type.trim().eq_ignore_ascii_case("mock") {
                registry
                    .providers
                    .insert(p.name.clone(), Arc::new(MockProvider::new(&p.name, &p.model)));
            }
        }
        for s in &project.skills {
            if let Some(skill) = builtin_skill(s) {
                registry.skills.insert(s.name.clone(), skill);
            }
            registry.skill_configs.insert(s.name.clone(), s.clone());
        }
        Ok(Self { project, registry })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Register or replace the provider backing the configured provider `name`
    pub fn register_provider(&mut self, name: impl Into<String>, provider: Arc<dyn LLMProvider>) {
        self.registry.providers.insert(name.into(), provider);
    }

    /// Register or replace a skill implementation under its own name
    ///
    /// A skill without a `[[skills]]` entry gets a config of type `custom`
    /// built from its description, so agents may reference it.
    pub fn register_skill(&mut self, skill: Arc<dyn Skill>) {
        let name = skill.name().to_string();
        self.registry
            .skill_configs
            .entry(name.clone())
            .or_insert_with(|| SkillConfig {
                name: name.clone(),
                skill_type: "custom".into(),
                description: skill.description().to_string(),
                ..Default::default()
            });
        self.registry.skills.insert(name, skill);
    }

    /// Agent names, sorted
    pub fn list_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.project.agents.iter().map(|a| a.name.clone()).collect();
        names.sort();
        names
    }

    /// Skill names with a config or an implementation, sorted
    pub fn list_skills(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .skill_configs
            .keys()
            .chain(self.registry.skills.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn build(&self, graph: &AgentSpecGraph, input: &str) -> Result<(ExecutionPlan, Vec<Task>), EngineError> {
        let (plan, tasks) = plan_graph(&self.project, graph, input, |p| self.registry.tool_capable(p))?;
        for task in &tasks {
            for skill in &task.skills {
                if !self.registry.skill_configs.contains_key(skill) {
                    return Err(EngineError::UnknownSkill(skill.clone()));
                }
            }
        }
        Ok((plan, tasks))
    }

    /// Plan `names` as one parallel stage
    pub fn plan(&self, names: &[String], input: &str) -> Result<ExecutionPlan, EngineError> {
        self.build(&AgentSpecGraph::single_stage(names)?, input).map(|(plan, _)| plan)
    }

    /// Plan a staged run spec such as `planner>coder+tester>reviewer`
    pub fn plan_spec(&self, spec: &str, input: &str) -> Result<ExecutionPlan, EngineError> {
        let graph = AgentSpecGraph::parse(spec)?;
        self.build(&graph, input).map(|(plan, _)| plan)
    }

    /// Run `names` as one parallel stage
    pub async fn run(&self, names: &[String], input: &str) -> Result<ExecutionReport, EngineError> {
        self.execute(AgentSpecGraph::single_stage(names)?, input).await
    }

    /// Run a staged run spec
    pub async fn run_spec(&self, spec: &str, input: &str) -> Result<ExecutionReport, EngineError> {
        self.execute(AgentSpecGraph::parse(spec)?, input).await
    }

    async fn execute(&self, graph: AgentSpecGraph, input: &str) -> Result<ExecutionReport, EngineError> {
        let span = info_span!("run", spec = %graph.raw);
        async {
            let (plan, tasks) = self.build(&graph, input)?;
            info!(tasks = tasks.len(), stages = plan.stages.len(), parallel = plan.parallel, "starting run");
            let report = run_graph(Arc::new(self.registry.clone()), &plan, tasks).await?;
            info!(failed = report.failed().count(), "run finished");
            Ok(report)
        }
        .instrument(span)
        .await
    }
}
