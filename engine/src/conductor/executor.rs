//! Task execution and DAG scheduling
//!
//! [`run_graph`] owns one run: it seeds the shared bus, spawns every task
//! whose dependencies are met, and funnels completions through a single
//! dispatch loop. That loop is the only place results are published and
//! dependency counters are decremented.
//!
//! [`run_task`] executes one task: startup skill calls, context compilation,
//! then either the iterative tool loop or a single generation. Task failures
//! are recorded on the task's [`AgentRunResult`] and never abort the run.

use super::channels::select_compile_channels;
use super::publisher::publish_task_outputs;
use super::report::{AgentRunResult, ExecutionPlan, ExecutionReport};
use super::task::Task;
use crate::broker::{BrokeredCall, ToolBroker};
use crate::budget::{BudgetError, BudgetGate, StageBudgets, ToolBudget};
use crate::config::metadata::AgentTuning;
use crate::config::{ProviderConfig, SkillConfig};
use crate::context::{CompileSpec, ContextBudget, ContextBus, ContextMoment};
use crate::llm::{ChatMessage, GenerateRequest, LLMError, LLMProvider, LLMResponse, ToolCall, ToolDefinition};
use crate::tools::parameters_for_type;
use chrono::Utc;
use futures::FutureExt;
use sdk::errors::EngineError;
use sdk::skill::{Skill, SkillCallResult, SkillError, SkillExecution, SkillResult};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

const RUN_CONSTRAINTS: [&str; 2] = [
    "Prefer concise answers and avoid repeating large raw tool outputs.",
    "Use tools only when they materially improve the answer.",
];

/// Task-local failure, rendered into [`AgentRunResult::error`]
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("startup call references unknown skill {0:?}")]
    UnknownStartupSkill(String),

    #[error("startup skill {skill:?} blocked by tool budget: {source}")]
    StartupBudget { skill: String, source: BudgetError },

    #[error("startup skill {skill:?} failed: {source}")]
    StartupFailed { skill: String, source: SkillError },

    #[error("provider {0:?} not registered")]
    ProviderNotRegistered(String),

    #[error("agent references unknown skill {0:?}")]
    UnknownSkill(String),

    #[error("tool budget exceeded for agent {agent:?}: {source}")]
    ToolBudget { agent: String, source: BudgetError },

    #[error("tool loop exceeded max rounds ({0})")]
    MaxRounds(usize),

    #[error("invalid tool arguments JSON: {0}")]
    InvalidToolArguments(serde_json::Error),

    #[error("tool arguments must be a JSON object")]
    ToolArgumentsNotObject,

    #[error("context deadline exceeded after {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    Provider(#[from] LLMError),
}

/// Providers, skills and skill configs a run can call
#[derive(Default, Clone)]
pub struct Registry {
    pub providers: HashMap<String, Arc<dyn LLMProvider>>,
    pub skills: HashMap<String, Arc<dyn Skill>>,
    pub skill_configs: HashMap<String, SkillConfig>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<&String> = self.providers.keys().collect();
        providers.sort();
        let mut skills: Vec<&String> = self.skills.keys().collect();
        skills.sort();
        f.debug_struct("Registry")
            .field("providers", &providers)
            .field("skills", &skills)
            .finish()
    }
}

impl Registry {
    /// Whether tasks on `provider` run the iterative tool loop
    pub fn tool_capable(&self, provider: &ProviderConfig) -> bool {
        provider.tools
            || self
                .providers
                .get(&provider.name)
                .is_some_and(|p| p.supports_tools())
    }
}

/// State shared by every task of one run
pub struct RunShared {
    pub registry: Arc<Registry>,
    pub bus: Arc<ContextBus>,
    pub broker: Arc<ToolBroker>,
    pub input: String,
}

impl RunShared {
    /// Fresh run state with the bus seeded from `input`
    pub fn new(registry: Arc<Registry>, input: &str, parallel: bool) -> Self {
        let bus = ContextBus::new(input);
        for c in RUN_CONSTRAINTS {
            bus.add_constraint(c);
        }
        bus.put_fact("runtime.engine", "relay", 1.0, "runtime");
        bus.put_fact("runtime.parallel", &parallel.to_string(), 1.0, "runtime");
        bus.put_fact("runtime.scheduler", "dag_channels", 1.0, "runtime");
        Self {
            registry,
            bus: Arc::new(bus),
            broker: Arc::new(ToolBroker::new()),
            input: input.to_string(),
        }
    }
}

/// Tool call arguments as a JSON object; blank means no arguments
pub fn parse_tool_args(raw: &str) -> Result<Map<String, Value>, TaskError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw).map_err(TaskError::InvalidToolArguments)? {
        Value::Object(obj) => Ok(obj),
        _ => Err(TaskError::ToolArgumentsNotObject),
    }
}

fn tool_result_message(call: &ToolCall, result: &SkillResult) -> ChatMessage {
    ChatMessage::tool_result(json!({ "ok": true, "result": result }).to_string(), call)
}

fn tool_error_message(call: &ToolCall, error: &str) -> ChatMessage {
    ChatMessage::tool_result(json!({ "ok": false, "error": error }).to_string(), call)
}

/// System prompt when present, then the compiled context as the user turn
pub fn initial_messages(system_prompt: &str, compiled: &str) -> Vec<ChatMessage> {
    let mut msgs = Vec::with_capacity(2);
    if !system_prompt.trim().is_empty() {
        msgs.push(ChatMessage::system(system_prompt));
    }
    let user = if compiled.trim().is_empty() { " " } else { compiled };
    msgs.push(ChatMessage::user(user));
    msgs
}

fn apply_response(res: &mut AgentRunResult, resp: LLMResponse) {
    if let Some(pt) = resp.provider_type() {
        res.provider_type = pt.to_string();
    }
    if !resp.provider.is_empty() {
        res.provider = resp.provider;
    }
    if !resp.model.is_empty() {
        res.model = resp.model;
    }
    res.output = resp.text;
}

fn count_cache(res: &mut AgentRunResult, rec: &SkillCallResult) {
    if rec.cacheable {
        if rec.cached {
            res.tool_cache_hits += 1;
        } else {
            res.tool_cache_misses += 1;
        }
    }
}

struct TaskRun<'a> {
    shared: &'a RunShared,
    task: &'a Task,
    tuning: AgentTuning,
    gate: BudgetGate,
    budget: ContextBudget,
    moment: ContextMoment,
    channels: Vec<String>,
}

impl TaskRun<'_> {
    fn record(&self, rec: &SkillCallResult, moment: ContextMoment) {
        self.shared.bus.record_skill_call(self.task.name(), rec, moment);
    }

    fn base_request(&self) -> GenerateRequest {
        GenerateRequest {
            agent_name: self.task.name().to_string(),
            model: self.task.model(),
            system_prompt: self.task.agent.system_prompt.clone(),
            available_skills: self.task.skills.clone(),
            ..Default::default()
        }
    }

    async fn execute_skill(&self, name: &str, args: Map<String, Value>) -> BrokeredCall {
        let registry = &self.shared.registry;
        let Some(skill) = registry.skills.get(name) else {
            return BrokeredCall {
                result: Err(SkillError::NotRegistered(name.to_string())),
                cacheable: false,
                cache_hit: false,
            };
        };
        let exec = SkillExecution {
            agent_name: self.task.name().to_string(),
            input: self.shared.input.clone(),
            args,
        };
        self.shared
            .broker
            .execute(Arc::clone(skill), registry.skill_configs.get(name), &self.tuning, exec)
            .await
    }

    async fn execute(&self, res: &mut AgentRunResult) -> Result<(), TaskError> {
        self.run_startup_calls(res).await?;

        let compiled = self.shared.bus.compile(&CompileSpec {
            agent_name: self.task.name().to_string(),
            channels: self.channels.clone(),
            skills: self.task.skills.clone(),
            budget: self.budget,
            moment: self.moment,
            weights: None,
        });
        res.context_tokens = compiled.estimated_tokens;
        res.context_version = compiled.version;
        res.context_dropped = compiled.dropped_items;

        let provider_name = &self.task.provider.name;
        let provider = self
            .shared
            .registry
            .providers
            .get(provider_name)
            .ok_or_else(|| TaskError::ProviderNotRegistered(provider_name.clone()))?;

        let resp = if self.task.tool_capable && !self.task.skills.is_empty() {
            self.run_tool_loop(provider.as_ref(), &compiled.text, res).await?
        } else {
            let request = GenerateRequest {
                input: compiled.text,
                startup_results: res.startup_calls.clone(),
                ..self.base_request()
            };
            provider.generate(request).await?
        };
        apply_response(res, resp);
        Ok(())
    }

    async fn run_startup_calls(&self, res: &mut AgentRunResult) -> Result<(), TaskError> {
        for call in &self.task.agent.startup_calls {
            let skill = call.skill.as_str();
            if !self.shared.registry.skills.contains_key(skill) {
                res.startup_calls
                    .push(SkillCallResult::failure(skill, SkillError::NotRegistered(skill.to_string()).to_string()));
                return Err(TaskError::UnknownStartupSkill(skill.to_string()));
            }
            if let Err(source) = self.gate.before_call(skill) {
                warn!(skill, error = %source, "startup call rejected by budget");
                let rec = SkillCallResult::failure(skill, source.to_string());
                self.record(&rec, ContextMoment::Discovery);
                res.startup_calls.push(rec);
                return Err(TaskError::StartupBudget {
                    skill: skill.to_string(),
                    source,
                });
            }

            let started = Instant::now();
            let brokered = self.execute_skill(skill, call.args.clone()).await;
            let mut rec = SkillCallResult::new(skill);
            rec.duration = started.elapsed();
            rec.cacheable = brokered.cacheable;
            rec.cached = brokered.cache_hit;
            self.gate.after_call(rec.duration);

            let out = match brokered.result {
                Ok(out) => out,
                Err(source) => {
                    rec.error = Some(source.to_string());
                    self.record(&rec, ContextMoment::Discovery);
                    res.startup_calls.push(rec);
                    return Err(TaskError::StartupFailed {
                        skill: skill.to_string(),
                        source,
                    });
                }
            };
            if let Err(source) = self.gate.after_check(skill) {
                warn!(skill, error = %source, "startup call over execution budget");
                rec.error = Some(source.to_string());
                self.record(&rec, ContextMoment::Discovery);
                res.startup_calls.push(rec);
                return Err(TaskError::StartupBudget {
                    skill: skill.to_string(),
                    source,
                });
            }
            rec.result = Some(out);
            count_cache(res, &rec);
            self.record(&rec, ContextMoment::Discovery);
            res.startup_calls.push(rec);
        }
        Ok(())
    }

    fn tool_definitions(&self) -> Result<Vec<ToolDefinition>, TaskError> {
        let registry = &self.shared.registry;
        self.task
            .skills
            .iter()
            .map(|name| {
                let cfg = registry
                    .skill_configs
                    .get(name)
                    .ok_or_else(|| TaskError::UnknownSkill(name.clone()))?;
                let parameters = parameters_for_type(&cfg.skill_type)
                    .or_else(|| registry.skills.get(name).map(|s| s.parameters()))
                    .unwrap_or_else(|| json!({ "type": "object", "additionalProperties": true }));
                let description = match cfg.description.trim() {
                    "" => "Runtime skill".to_string(),
                    d => d.to_string(),
                };
                Ok(ToolDefinition {
                    name: cfg.name.clone(),
                    description,
                    parameters,
                    strict: false,
                })
            })
            .collect()
    }

    async fn run_tool_loop(
        &self,
        provider: &dyn LLMProvider,
        compiled: &str,
        res: &mut AgentRunResult,
    ) -> Result<LLMResponse, TaskError> {
        let tools = self.tool_definitions()?;
        let mut messages = initial_messages(&self.task.agent.system_prompt, compiled);
        let max_rounds = self.tuning.max_tool_rounds();
        let repeat_limit = self.tuning.max_repeated_tool_calls();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for round in 0..max_rounds {
            let request = GenerateRequest {
                input: self.shared.input.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                tool_choice: Some("auto".into()),
                ..self.base_request()
            };
            let resp = provider.generate(request).await?;
            if resp.tool_calls.is_empty() {
                return Ok(resp);
            }
            debug!(round, calls = resp.tool_calls.len(), "tool round");

            let mut assistant = ChatMessage::assistant(resp.text.clone());
            assistant.tool_calls = resp.tool_calls.clone();
            assistant.reasoning_content = resp.reasoning_content.clone();
            messages.push(assistant);

            for call in &resp.tool_calls {
                let attempts = seen.entry(call.repeat_key()).or_insert(0);
                *attempts += 1;
                if *attempts > repeat_limit {
                    let error = format!("repeated tool call blocked after {repeat_limit} attempt(s)");
                    warn!(skill = %call.name, "{error}");
                    let mut rec = SkillCallResult::failure(&call.name, error.clone());
                    rec.call_id = call.id.clone();
                    rec.args = parse_tool_args(&call.arguments).ok().filter(|a| !a.is_empty());
                    self.record(&rec, ContextMoment::ToolLoop);
                    res.tool_calls.push(rec);
                    messages.push(tool_error_message(call, &error));
                    continue;
                }

                if let Err(source) = self.gate.before_call(&call.name) {
                    warn!(skill = %call.name, error = %source, "tool call rejected by budget");
                    let mut rec = SkillCallResult::failure(&call.name, source.to_string());
                    rec.call_id = call.id.clone();
                    rec.args = parse_tool_args(&call.arguments).ok().filter(|a| !a.is_empty());
                    self.record(&rec, ContextMoment::ToolLoop);
                    res.tool_calls.push(rec);
                    return Err(TaskError::ToolBudget {
                        agent: self.task.name().to_string(),
                        source,
                    });
                }

                let (mut rec, message) = self.execute_tool_call(call).await;
                self.gate.after_call(rec.duration);
                if let Err(source) = self.gate.after_check(&call.name) {
                    warn!(skill = %call.name, error = %source, "tool call over execution budget");
                    rec.error = Some(source.to_string());
                    self.record(&rec, ContextMoment::ToolLoop);
                    res.tool_calls.push(rec);
                    return Err(TaskError::ToolBudget {
                        agent: self.task.name().to_string(),
                        source,
                    });
                }
                count_cache(res, &rec);
                self.record(&rec, ContextMoment::ToolLoop);
                res.tool_calls.push(rec);
                messages.push(message);
            }
        }
        Err(TaskError::MaxRounds(max_rounds))
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> (SkillCallResult, ChatMessage) {
        let mut rec = SkillCallResult::new(&call.name);
        rec.call_id = call.id.clone();

        let args = match parse_tool_args(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                let error = e.to_string();
                rec.error = Some(error.clone());
                return (rec, tool_error_message(call, &error));
            }
        };
        rec.args = Some(args.clone());

        if !self.shared.registry.skills.contains_key(&call.name) {
            let error = SkillError::NotRegistered(call.name.clone()).to_string();
            rec.error = Some(error.clone());
            return (rec, tool_error_message(call, &error));
        }

        let started = Instant::now();
        let brokered = self.execute_skill(&call.name, args).await;
        rec.duration = started.elapsed();
        rec.cacheable = brokered.cacheable;
        rec.cached = brokered.cache_hit;
        match brokered.result {
            Ok(out) => {
                let message = tool_result_message(call, &out);
                rec.result = Some(out);
                (rec, message)
            }
            Err(e) => {
                let error = e.to_string();
                rec.error = Some(error.clone());
                (rec, tool_error_message(call, &error))
            }
        }
    }
}

/// Execute one task against the shared run state
pub async fn run_task(shared: Arc<RunShared>, task: Arc<Task>, stage_budget: Option<Arc<ToolBudget>>) -> AgentRunResult {
    let started = Instant::now();
    let tuning = task.tuning();
    let budget = task.context_budget();
    let moment = task.context_moment();
    let (channels, stats) = select_compile_channels(&task, moment);

    let mut res = AgentRunResult {
        agent: task.name().to_string(),
        provider: task.provider.name.clone(),
        provider_type: task.provider.provider_type.clone(),
        model: task.model(),
        skills: task.skills.clone(),
        stage: task.stage,
        depends_on: task.depends_on.clone(),
        context_budget: budget.limit_tokens(),
        context_moment: moment,
        context_channels_total: stats.total,
        context_channels_used: stats.selected,
        context_channels_dropped: stats.dropped,
        ..Default::default()
    };

    let run = TaskRun {
        shared: &shared,
        task: &task,
        gate: BudgetGate::new(ToolBudget::for_task(&tuning), stage_budget),
        tuning,
        budget,
        moment,
        channels,
    };

    let outcome = match task.agent.timeout_ms {
        0 => run.execute(&mut res).await,
        ms => tokio::time::timeout(Duration::from_millis(ms), run.execute(&mut res))
            .await
            .unwrap_or(Err(TaskError::Timeout(ms))),
    };

    let usage = run.gate.task_usage();
    res.tool_budget_calls_used = usage.calls_used;
    res.tool_budget_calls_limit = usage.max_calls;
    res.tool_budget_exec_ms_used = usage.exec_ms_used;
    res.tool_budget_exec_ms_limit = usage.max_exec_ms;
    if let Some(stage) = run.gate.stage_usage() {
        res.stage_tool_budget_calls_used = stage.calls_used;
        res.stage_tool_budget_calls_limit = stage.max_calls;
        res.stage_tool_budget_exec_ms_used = stage.exec_ms_used;
        res.stage_tool_budget_exec_ms_limit = stage.max_exec_ms;
    }

    if let Err(e) = outcome {
        warn!(error = %e, "task failed");
        res.error = Some(e.to_string());
    }
    res.duration = started.elapsed();
    res
}

/// Run every task of `plan`, honoring dependencies
///
/// Fails only when no task can start. Every task that starts reports a
/// result, failed ones included; a failed task still releases its
/// successors.
pub async fn run_graph(
    registry: Arc<Registry>,
    plan: &ExecutionPlan,
    tasks: Vec<Task>,
) -> Result<ExecutionReport, EngineError> {
    let started_at = Utc::now();
    let shared = Arc::new(RunShared::new(registry, &plan.input, plan.parallel));
    let tunings: Vec<AgentTuning> = tasks.iter().map(Task::tuning).collect();
    let stage_budgets = StageBudgets::build(tasks.iter().map(|t| t.stage).zip(tunings.iter()));

    let n = tasks.len();
    let mut report = ExecutionReport {
        started_at,
        ended_at: started_at,
        parallel: plan.parallel,
        input: plan.input.clone(),
        results: Vec::with_capacity(n),
    };
    if n == 0 {
        report.ended_at = Utc::now();
        return Ok(report);
    }

    let index: HashMap<&str, usize> = tasks.iter().enumerate().map(|(i, t)| (t.name(), i)).collect();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];
    for (dst, task) in tasks.iter().enumerate() {
        let mut preds: Vec<usize> = task
            .depends_on
            .iter()
            .filter_map(|d| index.get(d.as_str()).copied())
            .filter(|&src| src != dst)
            .collect();
        preds.sort_unstable();
        preds.dedup();
        indegree[dst] = preds.len();
        for src in preds {
            successors[src].push(dst);
        }
    }
    drop(index);

    let tasks: Vec<Arc<Task>> = tasks.into_iter().map(Arc::new).collect();
    let (tx, mut rx) = mpsc::channel::<(usize, AgentRunResult)>(n);
    let mut launched = vec![false; n];
    let mut handles = Vec::with_capacity(n);

    let mut launch = |idx: usize, launched: &mut Vec<bool>| -> bool {
        if launched[idx] {
            return false;
        }
        launched[idx] = true;
        let task = Arc::clone(&tasks[idx]);
        let shared = Arc::clone(&shared);
        let stage_budget = stage_budgets.get(task.stage);
        let tx = tx.clone();
        let span = info_span!("task", agent = %task.name(), stage = task.stage);
        info!(agent = %task.name(), stage = task.stage, "dispatching task");
        handles.push(tokio::spawn(
            async move {
                let fallback = AgentRunResult {
                    agent: task.name().to_string(),
                    stage: task.stage,
                    depends_on: task.depends_on.clone(),
                    error: Some("task panicked".into()),
                    ..Default::default()
                };
                let result = AssertUnwindSafe(run_task(shared, task, stage_budget))
                    .catch_unwind()
                    .await
                    .unwrap_or(fallback);
                // the receiver lives until every task reported
                let _ = tx.send((idx, result)).await;
            }
            .instrument(span),
        ));
        true
    };

    let ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    if ready.is_empty() {
        return Err(EngineError::DependencyDeadlock { spec: plan.spec.clone() });
    }
    let mut in_flight = 0usize;
    for idx in ready {
        if launch(idx, &mut launched) {
            in_flight += 1;
        }
    }

    let mut results: Vec<Option<AgentRunResult>> = vec![None; n];
    let mut completed = 0;
    // Tasks on a cycle never launch; stop once nothing is left running
    while completed < n && in_flight > 0 {
        let Some((idx, mut result)) = rx.recv().await else {
            break;
        };
        in_flight -= 1;
        let published = publish_task_outputs(&shared.bus, &tasks[idx], if result.is_error() { "" } else { &result.output });
        result.sent_handoffs = published.sent;
        result.dropped_handoffs = published.dropped;
        result.handoff_tokens = published.tokens;
        result.skipped_output_publish = published.skipped_unconsumed;
        info!(
            agent = %result.agent,
            failed = result.is_error(),
            sent = published.sent,
            elapsed_ms = result.duration.as_millis() as u64,
            "task completed"
        );
        results[idx] = Some(result);
        completed += 1;

        for &succ in &successors[idx] {
            indegree[succ] = indegree[succ].saturating_sub(1);
            if indegree[succ] == 0 && launch(succ, &mut launched) {
                in_flight += 1;
            }
        }
    }
    drop(launch);
    drop(tx);
    for joined in futures::future::join_all(handles).await {
        if let Err(e) = joined {
            warn!(error = %e, "task handle failed to join");
        }
    }

    report.results = results
        .into_iter()
        .zip(tasks.iter())
        .map(|(r, t)| {
            r.unwrap_or_else(|| AgentRunResult {
                agent: t.name().to_string(),
                stage: t.stage,
                depends_on: t.depends_on.clone(),
                error: Some("task never ran".into()),
                ..Default::default()
            })
        })
        .collect();
    report.ended_at = Utc::now();
    Ok(report)
}
