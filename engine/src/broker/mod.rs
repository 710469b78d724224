//! Tool broker
//!
//! One broker lives for one run and sits between every task and its skills.
//! It provides two independent mechanisms:
//!
//! - **Cache and coalescing**: deterministic calls are keyed by a canonical
//!   signature. A cached key returns a copy of the stored result; a key that
//!   is currently executing makes later callers wait for that execution and
//!   share its outcome. Only successful results are cached.
//! - **Resource locks**: calls touching the same file path or HTTP host run
//!   one at a time under a lazily created per-key async mutex.
//!
//! Which calls are cacheable or locked is decided from the skill's configured
//! type and the calling agent's tuning flags.

use crate::config::metadata::AgentTuning;
use crate::config::SkillConfig;
use sdk::skill::{Skill, SkillError, SkillExecution, SkillResult};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;
use url::Url;

const CACHE_KEY_VERSION: &str = "v1";

type Outcome = Result<SkillResult, SkillError>;

#[derive(Default)]
struct BrokerState {
    cache: HashMap<String, SkillResult>,
    inflight: HashMap<String, watch::Receiver<Option<Outcome>>>,
    locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

/// Run-scoped cache, coalescer and resource lock table
#[derive(Default)]
pub struct ToolBroker {
    state: Mutex<BrokerState>,
}

impl std::fmt::Debug for ToolBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ToolBroker")
            .field("cached", &state.cache.len())
            .field("inflight", &state.inflight.len())
            .field("locks", &state.locks.len())
            .finish()
    }
}

/// Outcome of a brokered skill call
#[derive(Debug, Clone)]
pub struct BrokeredCall {
    pub result: Outcome,
    pub cacheable: bool,
    /// Served from cache or from another caller's execution
    pub cache_hit: bool,
}

/// Removes the in-flight entry even if the executing future is dropped
struct InflightGuard<'a> {
    broker: &'a ToolBroker,
    key: &'a str,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.broker.state().inflight.remove(self.key);
    }
}

impl ToolBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` at most once concurrently per `key`
    ///
    /// Returns the outcome and whether it came from the cache or from a
    /// coalesced execution.
    pub async fn call<F, Fut>(&self, key: &str, f: F) -> (Outcome, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        if key.is_empty() {
            return (f().await, false);
        }

        let tx = {
            let mut state = self.state();
            if let Some(hit) = state.cache.get(key) {
                debug!(key = %key, "broker cache hit");
                return (Ok(hit.clone()), true);
            }
            match state.inflight.get(key) {
                Some(rx) => Err(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.inflight.insert(key.to_string(), rx);
                    Ok(tx)
                }
            }
        };

        let tx = match tx {
            Ok(tx) => tx,
            Err(mut rx) => {
                debug!(key = %key, "coalescing onto in-flight call");
                let outcome = match rx.wait_for(Option::is_some).await {
                    Ok(done) => done.clone().unwrap_or_else(|| Err(abandoned())),
                    Err(_) => Err(abandoned()),
                };
                return (outcome, true);
            }
        };

        let guard = InflightGuard { broker: self, key };
        let outcome = f().await;
        {
            let mut state = self.state();
            if let Ok(result) = &outcome {
                state.cache.insert(key.to_string(), result.clone());
            }
        }
        drop(guard);
        // waiters keep their receivers; a send with none left is fine
        let _ = tx.send(Some(outcome.clone()));
        (outcome, false)
    }

    fn resource_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut state = self.state();
        Arc::clone(state.locks.entry(key.to_string()).or_default())
    }

    /// Run `f` while holding the resource lock for `key`; an empty key runs unlocked
    pub async fn with_resource_lock<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if key.is_empty() {
            return f().await;
        }
        let lock = self.resource_lock(key);
        let _held = lock.lock().await;
        debug!(key = %key, "resource lock acquired");
        f().await
    }

    /// Execute `skill` with the caching and locking its configuration asks for
    pub async fn execute(
        &self,
        skill: Arc<dyn Skill>,
        cfg: Option<&SkillConfig>,
        tuning: &AgentTuning,
        exec: SkillExecution,
    ) -> BrokeredCall {
        let resource = cfg.and_then(|c| lock_key(c, tuning, &exec.args)).unwrap_or_default();
        let signature = cfg.and_then(|c| cache_key(c, tuning, &exec.input, &exec.args));

        let run = move || async move {
            self.with_resource_lock(&resource, || skill.execute(exec)).await
        };
        match signature {
            Some(key) => {
                let (result, cache_hit) = self.call(&key, run).await;
                BrokeredCall {
                    result,
                    cacheable: true,
                    cache_hit,
                }
            }
            None => BrokeredCall {
                result: run().await,
                cacheable: false,
                cache_hit: false,
            },
        }
    }
}

fn abandoned() -> SkillError {
    SkillError::failed("in-flight call was abandoned")
}

fn arg_string<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn encode_cache_key(skill_type: &str, name: &str, args: &Map<String, Value>, input: &str) -> Option<String> {
    let args = serde_json::to_string(args).ok()?;
    let mut key = format!("{CACHE_KEY_VERSION}|type={skill_type}|name={name}|args={args}");
    let input = input.trim();
    if !input.is_empty() {
        key.push_str("|input=");
        key.push_str(input);
    }
    Some(key)
}

/// Canonical signature of a cacheable call; `None` when the call must always run
pub fn cache_key(cfg: &SkillConfig, tuning: &AgentTuning, input: &str, args: &Map<String, Value>) -> Option<String> {
    let skill_type = cfg.skill_type.trim().to_lowercase();
    match skill_type.as_str() {
        "file_read" | "file_read_range" | "command_doc" => {
            encode_cache_key(&skill_type, &cfg.name, args, "")
        }
        "echo" if tuning.cache_echo_tools => encode_cache_key(&skill_type, &cfg.name, args, input),
        "http" if tuning.cache_http_get_tools => {
            let method = arg_string(args, "method")
                .or_else(|| Some(cfg.method.trim()).filter(|m| !m.is_empty()))
                .unwrap_or("GET")
                .to_uppercase();
            if method != "GET" {
                return None;
            }
            encode_cache_key(&skill_type, &cfg.name, args, "")
        }
        _ => None,
    }
}

/// Resource the call touches, if it must be serialized
pub fn lock_key(cfg: &SkillConfig, tuning: &AgentTuning, args: &Map<String, Value>) -> Option<String> {
    match cfg.skill_type.trim().to_lowercase().as_str() {
        "file_read" | "file_read_range" | "file_write_safe" if tuning.lock_file_tools => {
            arg_string(args, "path").map(|p| format!("file:{}", clean_path(p)))
        }
        "http" if tuning.lock_http_host_tools => {
            let raw = arg_string(args, "url").or_else(|| Some(cfg.url.trim()).filter(|u| !u.is_empty()))?;
            let url = Url::parse(raw).ok()?;
            let host = url.host_str()?.trim().to_lowercase();
            if host.is_empty() {
                return None;
            }
            Some(match url.port() {
                Some(port) => format!("http-host:{host}:{port}"),
                None => format!("http-host:{host}"),
            })
        }
        _ => None,
    }
}

/// Lexically normalize a slash path: drop `.` and empty segments, fold `..`
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
            Component::ParentDir => match parts.last() {
                Some(last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push("..".to_string()),
            },
            _ => {}
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
