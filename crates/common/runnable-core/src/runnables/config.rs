//! Configuration for Runnables.
//!
//! A [`RunnableConfig`] travels down the call tree. Every combinator derives
//! its children's configs with [`patch_config`], so a child never mutates the
//! config its parent or siblings see.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bon::builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::callbacks::{CallbackManager, Callbacks};
use crate::error::{Error, Result};

/// Default recursion budget of a top-level call.
pub const DEFAULT_RECURSION_LIMIT: i32 = 25;

/// Configuration for a Runnable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnableConfig {
    /// Tags for this call and any sub-calls.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Metadata for this call and any sub-calls.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Callbacks for this call and any sub-calls.
    #[serde(skip)]
    pub callbacks: Option<Callbacks>,

    /// Name for the tracer run for this call.
    #[serde(default)]
    pub run_name: Option<String>,

    /// Maximum number of parallel calls to make in `batch`.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Remaining recursion budget.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: i32,

    /// Runtime values for configurable attributes of the Runnable.
    #[serde(default)]
    pub configurable: HashMap<String, Value>,

    /// Id for the tracer run for this call.
    #[serde(default)]
    pub run_id: Option<Uuid>,

    /// Cooperative cancellation signal shared with every descendant run.
    #[serde(skip)]
    pub signal: Option<CancellationToken>,

    /// Wall-clock budget for the call. Converted into `deadline` when a run
    /// starts.
    #[serde(skip)]
    pub timeout: Option<Duration>,

    #[serde(skip)]
    pub(crate) deadline: Option<Instant>,

    /// Recursion limit of the outermost combinator, for error reporting.
    #[serde(skip)]
    pub(crate) recursion_ceiling: Option<i32>,
}

fn default_recursion_limit() -> i32 {
    DEFAULT_RECURSION_LIMIT
}

impl Default for RunnableConfig {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            metadata: HashMap::new(),
            callbacks: None,
            run_name: None,
            max_concurrency: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            configurable: HashMap::new(),
            run_id: None,
            signal: None,
            timeout: None,
            deadline: None,
            recursion_ceiling: None,
        }
    }
}

impl RunnableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_callbacks(mut self, callbacks: impl Into<Callbacks>) -> Self {
        self.callbacks = Some(callbacks.into());
        self
    }

    pub fn with_run_name(mut self, run_name: impl Into<String>) -> Self {
        self.run_name = Some(run_name.into());
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn with_recursion_limit(mut self, recursion_limit: i32) -> Self {
        self.recursion_limit = recursion_limit;
        self
    }

    pub fn with_configurable(mut self, configurable: HashMap<String, Value>) -> Self {
        self.configurable = configurable;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The deadline in effect for this call, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the signal fired or the deadline elapsed.
    pub fn is_cancelled(&self) -> bool {
        self.signal.as_ref().is_some_and(CancellationToken::is_cancelled)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Resolves once the signal fires or the deadline elapses; pending
    /// forever when neither is set.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let signal = self.signal.clone();
        let deadline = self.deadline;
        async move {
            let on_signal = async {
                match signal {
                    Some(token) => token.cancelled_owned().await,
                    None => std::future::pending().await,
                }
            };
            let on_deadline = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = on_signal => {}
                _ = on_deadline => {}
            }
        }
    }

    /// Fail with [`Error::Cancelled`] if the call was cancelled.
    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Fold a pending `timeout` into the deadline. The earlier of the two
    /// deadlines wins.
    pub(crate) fn resolve_timeout(&mut self) {
        if let Some(timeout) = self.timeout.take() {
            let deadline = Instant::now() + timeout;
            self.deadline = Some(match self.deadline {
                Some(existing) => existing.min(deadline),
                None => deadline,
            });
        }
    }

    /// Consume one unit of recursion budget at a combinator boundary.
    pub(crate) fn descend(&self) -> Result<RunnableConfig> {
        if self.recursion_limit <= 0 {
            let limit = self.recursion_ceiling.unwrap_or(self.recursion_limit);
            tracing::debug!(
                target: "runnable_core::runnables",
                limit,
                "recursion limit reached"
            );
            return Err(Error::RecursionLimitExceeded { limit });
        }
        let mut child = self.clone();
        child.recursion_limit -= 1;
        child.recursion_ceiling.get_or_insert(self.recursion_limit);
        Ok(child)
    }

    /// A signal that fires when this config's signal fires, and that can
    /// also be cancelled on its own without affecting the parent.
    pub(crate) fn child_signal(&self) -> CancellationToken {
        match &self.signal {
            Some(signal) => signal.child_token(),
            None => CancellationToken::new(),
        }
    }
}

/// Either a single RunnableConfig or a list of them.
#[derive(Debug, Clone)]
pub enum ConfigOrList {
    Single(Box<RunnableConfig>),
    List(Vec<RunnableConfig>),
}

impl From<RunnableConfig> for ConfigOrList {
    fn from(config: RunnableConfig) -> Self {
        ConfigOrList::Single(Box::new(config))
    }
}

impl From<Vec<RunnableConfig>> for ConfigOrList {
    fn from(configs: Vec<RunnableConfig>) -> Self {
        ConfigOrList::List(configs)
    }
}

/// Ensure we have a RunnableConfig, creating one if necessary.
pub fn ensure_config(config: Option<RunnableConfig>) -> RunnableConfig {
    config.unwrap_or_default()
}

/// Build the callback manager for a run started with `config`.
pub fn get_callback_manager_for_config(config: &RunnableConfig) -> CallbackManager {
    CallbackManager::configure(
        config.callbacks.clone(),
        Some(config.tags.clone()),
        Some(config.metadata.clone()),
    )
}

/// Get one config per input from either a single config or a list.
///
/// A single config with a `run_id` keeps it only on the first element.
pub fn get_config_list(config: Option<ConfigOrList>, length: usize) -> Result<Vec<RunnableConfig>> {
    match config {
        Some(ConfigOrList::Single(config)) => {
            if length > 1 && config.run_id.is_some() {
                tracing::warn!(
                    target: "runnable_core::runnables",
                    "Provided run_id will be used only for the first element of the batch."
                );
                let mut subsequent = (*config).clone();
                subsequent.run_id = None;
                let mut configs = Vec::with_capacity(length);
                configs.push(*config);
                configs.extend(std::iter::repeat_n(subsequent, length - 1));
                Ok(configs)
            } else {
                Ok(vec![*config; length])
            }
        }
        Some(ConfigOrList::List(list)) => {
            if list.len() != length {
                return Err(Error::InvalidConfig(format!(
                    "config must be a list of the same length as inputs, but got {} configs for {} inputs",
                    list.len(),
                    length
                )));
            }
            Ok(list)
        }
        None => Ok(vec![RunnableConfig::default(); length]),
    }
}

/// Derive a config from `config` with the given fields replaced.
///
/// Replacing callbacks clears `run_name` and `run_id`, which belong to the
/// run that owned the previous callbacks. Tags are appended, metadata and
/// configurable are merged with the patch winning.
#[builder]
pub fn patch_config(
    config: Option<RunnableConfig>,
    callbacks: Option<CallbackManager>,
    tags: Option<Vec<String>>,
    metadata: Option<HashMap<String, Value>>,
    run_name: Option<String>,
    max_concurrency: Option<usize>,
    recursion_limit: Option<i32>,
    configurable: Option<HashMap<String, Value>>,
    signal: Option<CancellationToken>,
) -> RunnableConfig {
    let mut config = ensure_config(config);

    if let Some(callbacks) = callbacks {
        config.callbacks = Some(Callbacks::Manager(callbacks));
        config.run_name = None;
        config.run_id = None;
    }
    if let Some(tags) = tags {
        config.tags.extend(tags);
    }
    if let Some(metadata) = metadata {
        config.metadata.extend(metadata);
    }
    if let Some(name) = run_name {
        config.run_name = Some(name);
    }
    if let Some(max) = max_concurrency {
        config.max_concurrency = Some(max);
    }
    if let Some(limit) = recursion_limit {
        config.recursion_limit = limit;
    }
    if let Some(configurable) = configurable {
        config.configurable.extend(configurable);
    }
    if let Some(signal) = signal {
        config.signal = Some(signal);
    }

    config
}

/// Merge multiple configs into one. Later configs take precedence.
pub fn merge_configs(configs: Vec<Option<RunnableConfig>>) -> RunnableConfig {
    let mut result = RunnableConfig::default();

    for config in configs.into_iter().flatten() {
        for tag in config.tags {
            if !result.tags.contains(&tag) {
                result.tags.push(tag);
            }
        }

        result.metadata.extend(config.metadata);
        result.configurable.extend(config.configurable);

        result.callbacks = match (result.callbacks.take(), config.callbacks) {
            (Some(existing), Some(incoming)) => Some(existing.merge(&incoming)),
            (existing, incoming) => incoming.or(existing),
        };

        if config.run_name.is_some() {
            result.run_name = config.run_name;
        }
        if config.max_concurrency.is_some() {
            result.max_concurrency = config.max_concurrency;
        }
        if config.recursion_limit != DEFAULT_RECURSION_LIMIT {
            result.recursion_limit = config.recursion_limit;
        }
        if config.run_id.is_some() {
            result.run_id = config.run_id;
        }
        if config.signal.is_some() {
            result.signal = config.signal;
        }
        if config.timeout.is_some() {
            result.timeout = config.timeout;
        }
        if config.deadline.is_some() {
            result.deadline = config.deadline;
        }
        if config.recursion_ceiling.is_some() {
            result.recursion_ceiling = config.recursion_ceiling;
        }
    }

    result
}
