use chrono::Utc;
use proptest::prelude::*;
use relay_engine::budget::{BudgetGate, BudgetScope, ToolBudget};
use relay_engine::config::{AgentConfig, Project, ProviderConfig, RootConfig};
use relay_engine::context::merge::{merge_fact_segments, merge_handoff_fact};
use relay_engine::context::{compile_snapshot, CompileSpec, ContextBus, ContextFact, ContextMoment, MergePolicy};
use relay_engine::Engine;
use sdk::kinds::Kind;
use std::collections::HashMap;
use std::sync::Arc;

/// Agents `a0..aN` split into consecutive spec stages, each depending on a
/// subset of the agents listed before it
fn staged_project(stage_sizes: &[usize], deps: &[Vec<usize>]) -> (Project, String) {
    let mut names = Vec::new();
    let mut stages = Vec::new();
    for &size in stage_sizes {
        let stage: Vec<String> = (names.len()..names.len() + size).map(|i| format!("a{i}")).collect();
        names.extend(stage.iter().cloned());
        stages.push(stage.join("+"));
    }
    let agents = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut agent = AgentConfig::new(name.clone());
            agent.depends_on = deps
                .get(i)
                .into_iter()
                .flatten()
                .filter(|&&d| d < i)
                .map(|d| names[*d].clone())
                .collect();
            agent
        })
        .collect();
    let project = Project {
        root: RootConfig {
            version: 1,
            default_provider: "local".into(),
            providers: vec![ProviderConfig {
                name: "local".into(),
                provider_type: "mock".into(),
                ..Default::default()
            }],
        },
        agents,
        ..Default::default()
    };
    (project, stages.join(">"))
}

// Acyclic specs plan every agent exactly once, every dependency lands in an
// earlier stage, and stages partition the tasks
proptest! {
    #[test]
    fn test_acyclic_plans_level_correctly(
        stage_sizes in prop::collection::vec(1usize..=3, 1..=4),
        deps in prop::collection::vec(prop::collection::vec(0usize..12, 0..3), 12),
    ) {
        let (project, spec) = staged_project(&stage_sizes, &deps);
        let total: usize = stage_sizes.iter().sum();
        let engine = Engine::new(project).unwrap();
        let plan = engine.plan_spec(&spec, "x").unwrap();

        prop_assert_eq!(plan.tasks.len(), total);
        let stage_of: HashMap<&str, usize> = plan.tasks.iter().map(|t| (t.agent.as_str(), t.stage)).collect();
        for task in &plan.tasks {
            for dep in &task.depends_on {
                prop_assert!(stage_of[dep.as_str()] < task.stage, "{} -> {}", dep, task.agent);
            }
        }

        let mut seen: Vec<&str> = plan.stages.iter().flat_map(|s| s.agents.iter().map(String::as_str)).collect();
        seen.sort();
        let mut all: Vec<&str> = plan.tasks.iter().map(|t| t.agent.as_str()).collect();
        all.sort();
        prop_assert_eq!(seen, all);
        for (i, stage) in plan.stages.iter().enumerate() {
            prop_assert_eq!(stage.index, i);
            prop_assert!(!stage.agents.is_empty());
        }
    }
}

// Compiling the same snapshot twice gives identical output
proptest! {
    #[test]
    fn test_compile_idempotence(
        facts in prop::collection::vec(("[a-z]{1,8}", "[a-z ]{0,60}", 0.0..=1.0f64), 0..20),
        constraints in prop::collection::vec("[a-z ]{1,40}", 0..6),
        max_input_tokens in 64usize..2000,
    ) {
        let bus = ContextBus::new("goal");
        for (k, v, conf) in &facts {
            bus.put_fact(k, v, *conf, "prop");
        }
        for c in &constraints {
            bus.add_constraint(c);
        }
        let mut spec = CompileSpec {
            agent_name: "a".into(),
            moment: ContextMoment::Synthesis,
            ..Default::default()
        };
        spec.budget.max_input_tokens = max_input_tokens;

        let snap = bus.snapshot();
        let first = compile_snapshot(snap.clone(), &spec);
        let second = compile_snapshot(snap, &spec);
        prop_assert_eq!(&first.text, &second.text);
        prop_assert_eq!(first.estimated_tokens, second.estimated_tokens);
        prop_assert_eq!(first, bus.compile(&spec));
    }
}

// An artifact scoped to one agent never shows up in another agent's context
proptest! {
    #[test]
    fn test_scoped_artifacts_stay_private(marker in "zq[a-z]{6}", other in "[c-z]{1,6}") {
        let bus = ContextBus::new("goal");
        let content = format!("{marker} ").repeat(100);
        bus.put_scoped_artifact(Kind::TextPlain, ContextMoment::Synthesis, "a.output", &content, &marker, "b", "");

        let spec = CompileSpec {
            agent_name: other,
            moment: ContextMoment::Synthesis,
            ..Default::default()
        };
        prop_assert!(!bus.compile(&spec).text.contains(&marker));
    }
}

// Counters never pass their ceilings and a stage rejection leaves the task
// counter untouched
proptest! {
    #[test]
    fn test_budget_monotonicity(
        task_max in 1usize..6,
        stage_max in 1usize..8,
        calls in prop::collection::vec(any::<bool>(), 0..30),
    ) {
        let stage = Arc::new(ToolBudget::new(BudgetScope::Stage(0), Some(stage_max), None));
        let gates = [
            BudgetGate::new(ToolBudget::new(BudgetScope::Task, Some(task_max), None), Some(Arc::clone(&stage))),
            BudgetGate::new(ToolBudget::new(BudgetScope::Task, Some(task_max), None), Some(Arc::clone(&stage))),
        ];
        let mut ok = [0usize; 2];
        for which in calls {
            let i = usize::from(which);
            if gates[i].before_call("s").is_ok() {
                ok[i] += 1;
            }
            let used = gates[i].task_usage().calls_used;
            prop_assert_eq!(used, ok[i]);
            prop_assert!(used <= task_max);
        }
        let stage_used = stage.usage().calls_used;
        prop_assert_eq!(stage_used, ok[0] + ok[1]);
        prop_assert!(stage_used <= stage_max);
    }
}

// append2 keeps at most two segments under the cap; latest never joins
proptest! {
    #[test]
    fn test_merge_laws(
        segments in prop::collection::vec("[a-z]{1,20}", 1..8),
        cap in 20usize..=48,
    ) {
        let mut value = String::new();
        for s in &segments {
            value = merge_fact_segments(&value, s, 2, cap);
            prop_assert!(value.split(" || ").count() <= 2);
            prop_assert!(value.len() <= cap, "{} > {}", value.len(), cap);
        }

        let mut fact: Option<ContextFact> = None;
        for (i, s) in segments.iter().enumerate() {
            let source = format!("agent{i}");
            if let Some(merged) = merge_handoff_fact(fact.as_ref(), s, Kind::SummaryText, &source, MergePolicy::Latest, 0) {
                prop_assert!(!merged.value.contains(" || "));
                prop_assert_eq!(&merged.value, s);
                fact = Some(ContextFact {
                    key: "handoff.x.input".into(),
                    value: merged.value,
                    kind: Kind::SummaryText,
                    moment: ContextMoment::Synthesis,
                    confidence: 0.95,
                    source: merged.source,
                    target_agent: "x".into(),
                    channel: String::new(),
                    updated_at: Utc::now(),
                });
            }
        }
    }
}
