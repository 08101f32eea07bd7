//! Callback manager and run manager.
//!
//! [`CallbackManager`] holds the handlers, tags and metadata in effect for
//! the next run to start. Starting a run yields a
//! [`CallbackManagerForChainRun`] bound to that run's id, which reports the
//! run's stream/end/error events and derives child managers for nested runs.
//! Managers are never shared mutably: a child manager is a fresh value built
//! from the parent's inheritable state.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bon::bon;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;
use crate::tracers::schemas::RunType;
use crate::utils::uuid::uuid7;

use super::base::{BaseCallbackHandler, Callbacks};

/// Dispatch an event to every handler that does not ignore it.
///
/// Panics raised by a handler are caught and logged; they are re-raised only
/// when that handler's `raise_error` is set.
pub fn handle_event<F>(
    handlers: &[Arc<dyn BaseCallbackHandler>],
    ignore_condition: Option<fn(&dyn BaseCallbackHandler) -> bool>,
    mut event_fn: F,
) where
    F: FnMut(&Arc<dyn BaseCallbackHandler>),
{
    for handler in handlers {
        if let Some(ignore_fn) = ignore_condition
            && ignore_fn(handler.as_ref())
        {
            continue;
        }
        let result = catch_unwind(AssertUnwindSafe(|| {
            event_fn(handler);
        }));
        if let Err(panic_payload) = result {
            let error_msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown error".to_string()
            };
            tracing::warn!(
                target: "runnable_core::callbacks",
                "Error in {}.callback: {}",
                handler.name(),
                error_msg,
            );
            if handler.raise_error() {
                std::panic::resume_unwind(panic_payload);
            }
        }
    }
}

fn ignore_chain(handler: &dyn BaseCallbackHandler) -> bool {
    handler.ignore_chain()
}

fn contains_handler(
    handlers: &[Arc<dyn BaseCallbackHandler>],
    handler: &Arc<dyn BaseCallbackHandler>,
) -> bool {
    handlers.iter().any(|h| Arc::ptr_eq(h, handler))
}

/// Callback manager for the next run to start.
#[derive(Debug, Clone, Default)]
pub struct CallbackManager {
    /// The handlers.
    pub handlers: Vec<Arc<dyn BaseCallbackHandler>>,
    /// The handlers passed on to child runs.
    pub inheritable_handlers: Vec<Arc<dyn BaseCallbackHandler>>,
    /// The run that runs started by this manager are nested under.
    pub parent_run_id: Option<Uuid>,
    /// The tags.
    pub tags: Vec<String>,
    /// The tags passed on to child runs.
    pub inheritable_tags: Vec<String>,
    /// The metadata.
    pub metadata: HashMap<String, Value>,
    /// The metadata passed on to child runs.
    pub inheritable_metadata: HashMap<String, Value>,
}

impl CallbackManager {
    /// Create a new callback manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set handlers as the only handlers on the callback manager.
    pub fn set_handlers(&mut self, handlers: Vec<Arc<dyn BaseCallbackHandler>>, inherit: bool) {
        self.handlers = Vec::new();
        self.inheritable_handlers = Vec::new();
        for handler in handlers {
            self.add_handler(handler, inherit);
        }
    }

    /// Add handler.
    pub fn add_handler(&mut self, handler: Arc<dyn BaseCallbackHandler>, inherit: bool) {
        if !contains_handler(&self.handlers, &handler) {
            self.handlers.push(handler.clone());
        }
        if inherit && !contains_handler(&self.inheritable_handlers, &handler) {
            self.inheritable_handlers.push(handler);
        }
    }

    /// Remove a handler from the callback manager.
    pub fn remove_handler(&mut self, handler: &Arc<dyn BaseCallbackHandler>) {
        self.handlers.retain(|h| !Arc::ptr_eq(h, handler));
        self.inheritable_handlers.retain(|h| !Arc::ptr_eq(h, handler));
    }

    /// Add tags. A tag already present moves to the end.
    pub fn add_tags(&mut self, tags: Vec<String>, inherit: bool) {
        self.tags.retain(|t| !tags.contains(t));
        self.tags.extend(tags.iter().cloned());
        if inherit {
            self.inheritable_tags.retain(|t| !tags.contains(t));
            self.inheritable_tags.extend(tags);
        }
    }

    /// Add metadata.
    pub fn add_metadata(&mut self, metadata: HashMap<String, Value>, inherit: bool) {
        self.metadata.extend(metadata.clone());
        if inherit {
            self.inheritable_metadata.extend(metadata);
        }
    }

    /// Merge the callback manager with another callback manager.
    pub fn merge(&self, other: &CallbackManager) -> Self {
        let mut manager = Self {
            parent_run_id: self.parent_run_id.or(other.parent_run_id),
            ..Default::default()
        };

        for tag in self.tags.iter().chain(&other.tags) {
            if !manager.tags.contains(tag) {
                manager.tags.push(tag.clone());
            }
        }
        for tag in self.inheritable_tags.iter().chain(&other.inheritable_tags) {
            if !manager.inheritable_tags.contains(tag) {
                manager.inheritable_tags.push(tag.clone());
            }
        }

        manager.metadata = self.metadata.clone();
        manager.metadata.extend(other.metadata.clone());
        manager.inheritable_metadata = self.inheritable_metadata.clone();
        manager
            .inheritable_metadata
            .extend(other.inheritable_metadata.clone());

        for handler in self.handlers.iter().chain(&other.handlers) {
            manager.add_handler(handler.clone(), false);
        }
        for handler in self
            .inheritable_handlers
            .iter()
            .chain(&other.inheritable_handlers)
        {
            manager.add_handler(handler.clone(), true);
        }

        manager
    }

    /// Build the manager for a new run from a config's callbacks, tags and
    /// metadata. Everything passed here is inheritable.
    pub fn configure(
        inheritable_callbacks: Option<Callbacks>,
        inheritable_tags: Option<Vec<String>>,
        inheritable_metadata: Option<HashMap<String, Value>>,
    ) -> Self {
        let mut callback_manager = match inheritable_callbacks {
            Some(Callbacks::Handlers(handlers)) => CallbackManager {
                handlers: handlers.clone(),
                inheritable_handlers: handlers,
                ..Default::default()
            },
            Some(Callbacks::Manager(manager)) => manager,
            None => CallbackManager::new(),
        };

        if let Some(tags) = inheritable_tags {
            callback_manager.add_tags(tags, true);
        }
        if let Some(metadata) = inheritable_metadata {
            callback_manager.add_metadata(metadata, true);
        }

        callback_manager
    }
}

#[bon]
impl CallbackManager {
    /// Run when a runnable starts running.
    #[builder]
    pub fn on_chain_start(
        &self,
        serialized: &Value,
        inputs: &Value,
        run_id: Option<Uuid>,
        name: Option<&str>,
        #[builder(default)] run_type: RunType,
    ) -> CallbackManagerForChainRun {
        let run_id = run_id.unwrap_or_else(uuid7);

        handle_event(&self.handlers, Some(ignore_chain), |handler| {
            handler.on_chain_start(
                serialized,
                inputs,
                run_id,
                self.parent_run_id,
                Some(&self.tags),
                Some(&self.metadata),
                run_type,
                name,
            );
        });

        CallbackManagerForChainRun {
            run_id,
            handlers: self.handlers.clone(),
            inheritable_handlers: self.inheritable_handlers.clone(),
            parent_run_id: self.parent_run_id,
            tags: self.tags.clone(),
            inheritable_tags: self.inheritable_tags.clone(),
            metadata: self.metadata.clone(),
            inheritable_metadata: self.inheritable_metadata.clone(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Callback manager bound to one started run.
#[derive(Debug, Clone)]
pub struct CallbackManagerForChainRun {
    run_id: Uuid,
    handlers: Vec<Arc<dyn BaseCallbackHandler>>,
    inheritable_handlers: Vec<Arc<dyn BaseCallbackHandler>>,
    parent_run_id: Option<Uuid>,
    tags: Vec<String>,
    inheritable_tags: Vec<String>,
    metadata: HashMap<String, Value>,
    inheritable_metadata: HashMap<String, Value>,
    /// Shared by every clone; set once the end or error event was sent.
    finished: Arc<AtomicBool>,
}

impl CallbackManagerForChainRun {
    /// Get the run ID.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Get the parent run ID.
    pub fn parent_run_id(&self) -> Option<Uuid> {
        self.parent_run_id
    }

    /// Get the handlers.
    pub fn handlers(&self) -> &[Arc<dyn BaseCallbackHandler>] {
        &self.handlers
    }

    /// Get the tags.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Build the manager for a child run nested under this one.
    ///
    /// The child inherits the inheritable handlers, tags and metadata; `tag`
    /// is attached to the child only and is not passed further down.
    pub fn get_child(&self, tag: Option<&str>) -> CallbackManager {
        let mut manager = CallbackManager::new();
        manager.parent_run_id = Some(self.run_id);
        manager.set_handlers(self.inheritable_handlers.clone(), true);
        manager.add_tags(self.inheritable_tags.clone(), true);
        manager.add_metadata(self.inheritable_metadata.clone(), true);
        if let Some(tag) = tag {
            manager.add_tags(vec![tag.to_string()], false);
        }
        manager
    }

    /// Run when the runnable yields a chunk.
    pub fn on_chain_stream(&self, chunk: &Value) {
        if self.handlers.is_empty() {
            return;
        }
        handle_event(&self.handlers, Some(ignore_chain), |handler| {
            handler.on_chain_stream(chunk, self.run_id, self.parent_run_id);
        });
    }

    /// Whether the end or error event was already reported.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Mark the run finished, returning `false` if it already was.
    fn finish(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    /// Tie the run's lifetime to the returned guard.
    ///
    /// Dropping the guard before the run reports an end or error event
    /// closes the run with [`Error::Cancelled`].
    pub fn guard(&self) -> RunGuard {
        RunGuard {
            run_manager: self.clone(),
        }
    }

    /// Run when the runnable finishes.
    ///
    /// Only the first end or error event of a run reaches the handlers.
    pub fn on_chain_end(&self, outputs: &Value) {
        if !self.finish() || self.handlers.is_empty() {
            return;
        }
        handle_event(&self.handlers, Some(ignore_chain), |handler| {
            handler.on_chain_end(outputs, self.run_id, self.parent_run_id);
        });
    }

    /// Run when the runnable errors.
    pub fn on_chain_error(&self, error: &dyn std::error::Error) {
        if !self.finish() || self.handlers.is_empty() {
            return;
        }
        handle_event(&self.handlers, Some(ignore_chain), |handler| {
            handler.on_chain_error(error, self.run_id, self.parent_run_id);
        });
    }

    /// Return a manager that doesn't perform any operations.
    pub fn get_noop_manager() -> Self {
        Self {
            run_id: uuid7(),
            handlers: Vec::new(),
            inheritable_handlers: Vec::new(),
            parent_run_id: None,
            tags: Vec::new(),
            inheritable_tags: Vec::new(),
            metadata: HashMap::new(),
            inheritable_metadata: HashMap::new(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Closes a run that is dropped before it finished.
///
/// A future or stream driving a run can be dropped mid-flight, for instance
/// when a `select!` picks a cancellation branch. The guard reports the
/// abandoned run as cancelled so no span is left open.
#[derive(Debug)]
pub struct RunGuard {
    run_manager: CallbackManagerForChainRun,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.run_manager.is_finished() {
            return;
        }
        tracing::debug!(
            target: "runnable_core::callbacks",
            run_id = %self.run_manager.run_id,
            "run dropped before finishing, reporting cancellation"
        );
        self.run_manager.on_chain_error(&Error::Cancelled);
    }
}
