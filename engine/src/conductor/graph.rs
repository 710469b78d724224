//! Task graph builder
//!
//! Turns a parsed run spec into tasks with predecessor sets, typed handoff
//! links and leveled stages.
//!
//! Edges come from two sources. Every agent of a spec stage waits for the
//! whole previous spec stage, unless it declares explicit routing
//! (`depends_on` or `depends_on_ports`), in which case it only keeps the
//! barrier edges along which a typed handoff exists. Explicit dependencies may
//! then reach back to any earlier stage. Stages are finally recomputed as the
//! longest predecessor chain, never earlier than the nominal spec stage, and
//! compressed to dense indices.

use super::handoff::{dedupe_links, dedupe_plan_handoffs, infer_handoff_links, normalize_kinds, port_dependency_agents};
use super::report::{ExecutionPlan, PlanStage, TaskIOPlan, TaskPlan, TypedPortPlan};
use super::spec::AgentSpecGraph;
use super::task::Task;
use crate::config::{AgentConfig, IOPortConfig, Project, ProviderConfig};
use crate::context::MergePolicy;
use chrono::Utc;
use sdk::errors::EngineError;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

fn port_plans(ports: &[IOPortConfig], kinds_of: fn(&IOPortConfig) -> &[String]) -> Vec<TypedPortPlan> {
    ports
        .iter()
        .filter(|p| !p.name.trim().is_empty())
        .map(|p| TypedPortPlan {
            name: p.name.trim().to_string(),
            kinds: normalize_kinds(kinds_of(p)),
            merge_policy: MergePolicy::parse(&p.merge_policy),
            channel_priority: p.channel_priority,
            required: p.required,
            max_tokens: p.max_tokens,
        })
        .collect()
}

fn task_io_plan(agent: &AgentConfig) -> TaskIOPlan {
    TaskIOPlan {
        inputs: port_plans(&agent.io.inputs, |p| &p.accepts),
        outputs: port_plans(&agent.io.outputs, |p| &p.produces),
    }
}

fn unknown_agent(project: &Project, name: &str) -> EngineError {
    let mut available: Vec<String> = project.agents.iter().map(|a| a.name.clone()).collect();
    available.sort();
    EngineError::UnknownAgent {
        name: name.to_string(),
        available,
    }
}

struct GraphBuilder {
    tasks: Vec<Task>,
    preds: Vec<BTreeSet<usize>>,
    dep_names: Vec<BTreeSet<String>>,
    edges: HashSet<(usize, usize)>,
    handoffs: Vec<super::report::TypedHandoffPlan>,
}

impl GraphBuilder {
    fn new(tasks: Vec<Task>) -> Self {
        let n = tasks.len();
        Self {
            tasks,
            preds: vec![BTreeSet::new(); n],
            dep_names: vec![BTreeSet::new(); n],
            edges: HashSet::new(),
            handoffs: Vec::new(),
        }
    }

    /// Connect `src` to `dst`. Without `force`, the edge only exists when a
    /// typed handoff can flow along it.
    fn add_edge(&mut self, src: usize, dst: usize, force: bool) {
        if src >= self.tasks.len() || dst >= self.tasks.len() || src == dst {
            return;
        }
        let links = infer_handoff_links(&self.tasks[src].agent, &self.tasks[dst].agent);
        if links.is_empty() && !force {
            return;
        }
        if self.edges.insert((src, dst)) {
            self.preds[dst].insert(src);
            let name = self.tasks[src].agent.name.clone();
            self.dep_names[dst].insert(name);
        }
        for link in links {
            self.tasks[src].outgoing.push(link.clone());
            self.tasks[dst].incoming.push(link.clone());
            self.handoffs.push(link);
        }
    }
}

/// Build the execution plan and its tasks for `graph`
///
/// `tool_capable` tells whether a provider runs the iterative tool loop; it
/// shapes each task's context budget and moment.
pub fn plan_graph<F>(
    project: &Project,
    graph: &AgentSpecGraph,
    input: &str,
    tool_capable: F,
) -> Result<(ExecutionPlan, Vec<Task>), EngineError>
where
    F: Fn(&ProviderConfig) -> bool,
{
    let agents: HashMap<&str, &AgentConfig> = project.agents.iter().map(|a| (a.name.as_str(), a)).collect();

    let mut tasks = Vec::new();
    let mut plans = Vec::new();
    let mut index_by_agent: HashMap<String, usize> = HashMap::new();
    let mut spec_stage: Vec<usize> = Vec::new();
    let mut stage_members: Vec<Vec<usize>> = vec![Vec::new(); graph.stages.len()];

    for (stage, names) in graph.stages.iter().enumerate() {
        for name in names {
            let agent = *agents
                .get(name.as_str())
                .ok_or_else(|| unknown_agent(project, name))?;
            let provider_name = if agent.provider.is_empty() {
                project.root.default_provider.as_str()
            } else {
                agent.provider.as_str()
            };
            let provider = project
                .provider(provider_name)
                .ok_or_else(|| EngineError::UnknownProvider {
                    agent: agent.name.clone(),
                    provider: provider_name.to_string(),
                })?
                .clone();

            let task = Task {
                agent: agent.clone(),
                agent_file: project.agent_files.get(&agent.name).cloned().unwrap_or_default(),
                tool_capable: tool_capable(&provider),
                skills: agent.skills.clone(),
                provider,
                stage,
                depends_on: Vec::new(),
                incoming: Vec::new(),
                outgoing: Vec::new(),
            };
            plans.push(TaskPlan {
                agent: agent.name.clone(),
                agent_file: task.agent_file.clone(),
                provider: task.provider.name.clone(),
                provider_type: task.provider.provider_type.clone(),
                model: task.model(),
                skills: task.skills.clone(),
                timeout_ms: agent.timeout_ms,
                startup_calls: agent.startup_calls.len(),
                context_budget: task.context_budget().limit_tokens(),
                context_moment: task.context_moment(),
                stage,
                depends_on: Vec::new(),
                io: task_io_plan(agent),
            });

            let idx = tasks.len();
            index_by_agent.insert(agent.name.clone(), idx);
            stage_members[stage].push(idx);
            spec_stage.push(stage);
            tasks.push(task);
        }
    }

    let mut b = GraphBuilder::new(tasks);

    // Stage barriers
    for pair in stage_members.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        for &dst in cur {
            let agent = &b.tasks[dst].agent;
            let explicit = !agent.depends_on.is_empty() || !agent.depends_on_ports.is_empty();
            for &src in prev {
                b.add_edge(src, dst, !explicit);
            }
        }
    }

    // Explicit dependencies, possibly reaching back past the previous stage
    for dst in 0..b.tasks.len() {
        let agent_name = b.tasks[dst].agent.name.clone();
        let named: Vec<String> = b.tasks[dst]
            .agent
            .depends_on
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        let via_ports = port_dependency_agents(&b.tasks[dst].agent.depends_on_ports);

        let refs = named
            .into_iter()
            .map(|d| (d, "depends_on"))
            .chain(via_ports.into_iter().map(|d| (d, "depends_on_ports references")));
        for (dep, via) in refs {
            let src = *index_by_agent
                .get(&dep)
                .ok_or_else(|| EngineError::DependencyOutOfRun {
                    agent: agent_name.clone(),
                    dependency: dep.clone(),
                    via,
                    spec: graph.raw.clone(),
                })?;
            if spec_stage[src] > spec_stage[dst] {
                return Err(EngineError::ForwardDependency {
                    agent: agent_name,
                    dependency: dep,
                    via,
                });
            }
            b.add_edge(src, dst, true);
        }
    }

    let parallel_across_stages = stage_members.windows(2).any(|pair| {
        pair[1]
            .iter()
            .any(|&dst| pair[0].iter().any(|src| !b.preds[dst].contains(src)))
    });

    let order = topo_order(&b.preds).map_err(|unresolved| EngineError::DependencyCycle {
        spec: graph.raw.clone(),
        agents: unresolved
            .into_iter()
            .map(|i| b.tasks[i].agent.name.clone())
            .collect(),
    })?;

    // Leveling: a task runs no earlier than one stage after each predecessor
    let mut level = spec_stage.clone();
    for &idx in &order {
        let pushed = b.preds[idx].iter().map(|&p| level[p] + 1).max().unwrap_or(0);
        level[idx] = level[idx].max(pushed);
    }
    let distinct: BTreeSet<usize> = level.iter().copied().collect();
    let dense: HashMap<usize, usize> = distinct.iter().enumerate().map(|(i, s)| (*s, i)).collect();

    let mut stages: Vec<PlanStage> = (0..distinct.len())
        .map(|index| PlanStage {
            index,
            agents: Vec::new(),
        })
        .collect();
    let mut parallel = parallel_across_stages;

    let GraphBuilder {
        mut tasks,
        dep_names,
        handoffs,
        ..
    } = b;
    for (idx, (task, plan)) in tasks.iter_mut().zip(plans.iter_mut()).enumerate() {
        let stage = dense.get(&level[idx]).copied().unwrap_or(0);
        task.stage = stage;
        plan.stage = stage;
        stages[stage].agents.push(task.agent.name.clone());

        let deps: Vec<String> = dep_names[idx].iter().cloned().collect();
        plan.depends_on = deps.clone();
        task.depends_on = deps;
        task.incoming = dedupe_links(std::mem::take(&mut task.incoming));
        task.outgoing = dedupe_links(std::mem::take(&mut task.outgoing));
    }
    if stages.iter().any(|s| s.agents.len() > 1) {
        parallel = true;
    }

    let plan = ExecutionPlan {
        created_at: Utc::now(),
        parallel,
        input: input.to_string(),
        spec: graph.raw.clone(),
        tasks: plans,
        stages,
        handoffs: dedupe_plan_handoffs(handoffs),
    };
    debug!(
        spec = %plan.spec,
        tasks = plan.tasks.len(),
        stages = plan.stages.len(),
        handoffs = plan.handoffs.len(),
        parallel = plan.parallel,
        "planned run"
    );
    Ok((plan, tasks))
}

/// Kahn's algorithm, always taking the lowest ready index. On a cycle,
/// returns the indices left unresolved.
fn topo_order(preds: &[BTreeSet<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = preds.len();
    let mut indegree: Vec<usize> = preds.iter().map(BTreeSet::len).collect();
    let mut used = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let Some(picked) = (0..n).find(|&i| !used[i] && indegree[i] == 0) else {
            return Err((0..n).filter(|&i| !used[i]).collect());
        };
        used[picked] = true;
        order.push(picked);
        for (dst, p) in preds.iter().enumerate() {
            if p.contains(&picked) {
                indegree[dst] -= 1;
            }
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootConfig;
    use sdk::kinds::Kind;
    use std::collections::BTreeMap;

    fn project(agents: Vec<AgentConfig>) -> Project {
        Project {
            root: RootConfig {
                version: 1,
                default_provider: "local".into(),
                providers: vec![ProviderConfig {
                    name: "local".into(),
                    provider_type: "mock".into(),
                    model: "mock-small".into(),
                    ..Default::default()
                }],
            },
            agents,
            skills: Vec::new(),
            agent_files: BTreeMap::new(),
        }
    }

    fn plan(p: &Project, spec: &str) -> Result<(ExecutionPlan, Vec<Task>), EngineError> {
        let graph = AgentSpecGraph::parse(spec)?;
        plan_graph(p, &graph, "goal", |_| false)
    }

    fn stage_names(plan: &ExecutionPlan) -> Vec<Vec<String>> {
        plan.stages.iter().map(|s| s.agents.clone()).collect()
    }

    #[test]
    fn test_sequential_spec_keeps_barriers() {
        let p = project(vec![AgentConfig::new("a"), AgentConfig::new("b"), AgentConfig::new("c")]);
        let (plan, tasks) = plan(&p, "a>b>c").unwrap();
        assert!(!plan.parallel);
        assert_eq!(stage_names(&plan), vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert_eq!(tasks[2].depends_on, vec!["b"]);
        assert_eq!(plan.handoffs.len(), 2);
        assert_eq!(plan.handoffs[0].channel, "a.output->b.input#message/agent");
        assert_eq!(tasks[1].incoming.len(), 1);
        assert_eq!(tasks[1].outgoing.len(), 1);
    }

    #[test]
    fn test_same_stage_is_parallel() {
        let p = project(vec![AgentConfig::new("a"), AgentConfig::new("b"), AgentConfig::new("c")]);
        let (plan, tasks) = plan(&p, "a+b>c").unwrap();
        assert!(plan.parallel);
        assert_eq!(stage_names(&plan), vec![vec!["a", "b"], vec!["c"]]);
        assert_eq!(tasks[2].depends_on, vec!["a", "b"]);
    }

    #[test]
    fn test_port_routing_drops_barrier_edge() {
        let mut c = AgentConfig::new("c");
        c.depends_on_ports.insert("input".into(), vec!["a".into()]);
        let p = project(vec![AgentConfig::new("a"), AgentConfig::new("b"), c]);
        let (plan, tasks) = plan(&p, "a+b>c").unwrap();
        assert_eq!(tasks[2].depends_on, vec!["a"]);
        assert!(plan.parallel);
        assert!(plan.handoffs.iter().all(|h| h.from_agent == "a"));
    }

    #[test]
    fn test_explicit_dependency_reaches_back() {
        let mut c = AgentConfig::new("c");
        c.depends_on = vec![" a ".into(), "".into()];
        let p = project(vec![AgentConfig::new("a"), AgentConfig::new("b"), c]);
        let (plan, tasks) = plan(&p, "a>b>c").unwrap();
        // untyped agents always carry a message link, so the barrier edge from b stays
        assert_eq!(tasks[2].depends_on, vec!["a", "b"]);
        assert!(!plan.parallel);
        assert_eq!(tasks[2].stage, 2);
        assert!(plan.handoffs.iter().any(|h| h.from_agent == "a" && h.to_agent == "c"));
        assert_eq!(plan.task("c").unwrap().depends_on, vec!["a", "b"]);
    }

    #[test]
    fn test_leveling_pushes_past_nominal_stage() {
        let mut b = AgentConfig::new("b");
        b.depends_on = vec!["a".into()];
        let p = project(vec![AgentConfig::new("a"), b]);
        let (plan, tasks) = plan(&p, "a+b").unwrap();
        assert_eq!(tasks[1].stage, 1);
        assert_eq!(stage_names(&plan), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_dependency_errors() {
        let mut b = AgentConfig::new("b");
        b.depends_on = vec!["ghost".into()];
        let p = project(vec![AgentConfig::new("a"), b]);
        let err = plan(&p, "a>b").unwrap_err();
        assert!(matches!(err, EngineError::DependencyOutOfRun { via: "depends_on", .. }));

        let mut a = AgentConfig::new("a");
        a.depends_on_ports.insert("input".into(), vec!["b.output".into()]);
        let p = project(vec![a, AgentConfig::new("b")]);
        let err = plan(&p, "a>b").unwrap_err();
        assert!(matches!(
            err,
            EngineError::ForwardDependency {
                via: "depends_on_ports references",
                ..
            }
        ));

        let err = plan(&p, "a>nobody").unwrap_err();
        assert_eq!(err.to_string(), r#"unknown agent "nobody" (available: a, b)"#);
    }

    #[test]
    fn test_cycle_names_unresolved_agents() {
        let mut a = AgentConfig::new("a");
        a.depends_on = vec!["b".into()];
        let mut b = AgentConfig::new("b");
        b.depends_on = vec!["a".into()];
        let p = project(vec![a, b, AgentConfig::new("c")]);
        match plan(&p, "a+b+c") {
            Err(EngineError::DependencyCycle { agents, .. }) => assert_eq!(agents, vec!["a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_provider() {
        let mut a = AgentConfig::new("a");
        a.provider = "remote".into();
        let p = project(vec![a]);
        let err = plan(&p, "a").unwrap_err();
        assert_eq!(err.to_string(), r#"agent "a" references unknown provider "remote""#);
    }

    #[test]
    fn test_task_plan_fields_and_typed_io() {
        let mut coder = AgentConfig::new("coder");
        coder.skills = vec!["echo".into()];
        coder.timeout_ms = 1500;
        coder.io.outputs = vec![IOPortConfig::output("patch", &["diff", "bogus"])];
        let mut reviewer = AgentConfig::new("reviewer");
        reviewer.io.inputs = vec![
            IOPortConfig::input("source", &["text/diff"]),
            IOPortConfig::input(" ", &["text/plain"]),
            IOPortConfig::input("notes", &[]),
        ];
        let p = project(vec![coder, reviewer]);
        let graph = AgentSpecGraph::parse("coder>reviewer").unwrap();
        let (plan, tasks) = plan_graph(&p, &graph, "fix it", |_| true).unwrap();

        let coder_plan = plan.task("coder").unwrap();
        assert_eq!(coder_plan.model, "mock-small");
        assert_eq!(coder_plan.provider_type, "mock");
        assert_eq!(coder_plan.timeout_ms, 1500);
        assert_eq!(coder_plan.context_budget, 1020);
        assert_eq!(coder_plan.context_moment, crate::context::ContextMoment::ToolLoop);
        assert_eq!(coder_plan.io.outputs[0].kinds, vec![Kind::TextDiff]);

        let reviewer_plan = plan.task("reviewer").unwrap();
        assert_eq!(reviewer_plan.io.inputs.len(), 2);
        assert!(reviewer_plan.io.inputs[1].kinds.is_empty());
        assert_eq!(reviewer_plan.context_moment, crate::context::ContextMoment::Validate);

        assert_eq!(plan.input, "fix it");
        let source = tasks[1].incoming.iter().find(|l| l.to_port == "source").unwrap();
        assert_eq!(source.channel, "coder.patch->reviewer.source#text/diff");
        let notes = tasks[1].incoming.iter().find(|l| l.to_port == "notes").unwrap();
        assert_eq!(notes.kind, Kind::MessageAgent);
    }
}
