use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::tracers::schemas::RunType;

use super::manager::CallbackManager;

pub trait ChainManagerMixin {
    fn on_chain_stream(&self, chunk: &Value, run_id: Uuid, parent_run_id: Option<Uuid>) {
        let _ = (chunk, run_id, parent_run_id);
    }

    fn on_chain_end(&self, outputs: &Value, run_id: Uuid, parent_run_id: Option<Uuid>) {
        let _ = (outputs, run_id, parent_run_id);
    }

    fn on_chain_error(
        &self,
        error: &dyn std::error::Error,
        run_id: Uuid,
        parent_run_id: Option<Uuid>,
    ) {
        let _ = (error, run_id, parent_run_id);
    }
}

pub trait CallbackManagerMixin {
    #[allow(clippy::too_many_arguments)]
    fn on_chain_start(
        &self,
        serialized: &Value,
        inputs: &Value,
        run_id: Uuid,
        parent_run_id: Option<Uuid>,
        tags: Option<&[String]>,
        metadata: Option<&HashMap<String, Value>>,
        run_type: RunType,
        name: Option<&str>,
    ) {
        let _ = (
            serialized,
            inputs,
            run_id,
            parent_run_id,
            tags,
            metadata,
            run_type,
            name,
        );
    }
}

pub trait BaseCallbackHandler: ChainManagerMixin + CallbackManagerMixin + Send + Sync + Debug {
    fn raise_error(&self) -> bool {
        false
    }

    fn ignore_chain(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "BaseCallbackHandler"
    }
}

pub type ArcCallbackHandler = Arc<dyn BaseCallbackHandler>;

#[derive(Debug, Clone)]
pub enum Callbacks {
    Handlers(Vec<Arc<dyn BaseCallbackHandler>>),
    Manager(CallbackManager),
}

impl Callbacks {
    pub fn from_handlers(handlers: Vec<Arc<dyn BaseCallbackHandler>>) -> Self {
        Callbacks::Handlers(handlers)
    }

    pub fn from_manager(manager: CallbackManager) -> Self {
        Callbacks::Manager(manager)
    }

    pub fn handlers(&self) -> &[Arc<dyn BaseCallbackHandler>] {
        match self {
            Callbacks::Handlers(handlers) => handlers,
            Callbacks::Manager(manager) => &manager.handlers,
        }
    }

    /// Combine two callback sets; handlers from `other` follow those of `self`.
    pub fn merge(&self, other: &Callbacks) -> Callbacks {
        match (self, other) {
            (Callbacks::Handlers(left), Callbacks::Handlers(right)) => {
                let mut merged = left.clone();
                merged.extend(right.iter().cloned());
                Callbacks::Handlers(merged)
            }
            (Callbacks::Manager(manager), Callbacks::Handlers(handlers))
            | (Callbacks::Handlers(handlers), Callbacks::Manager(manager)) => {
                let mut merged = manager.clone();
                for handler in handlers {
                    merged.add_handler(handler.clone(), true);
                }
                Callbacks::Manager(merged)
            }
            (Callbacks::Manager(left), Callbacks::Manager(right)) => {
                Callbacks::Manager(left.merge(right))
            }
        }
    }
}

impl From<Vec<Arc<dyn BaseCallbackHandler>>> for Callbacks {
    fn from(handlers: Vec<Arc<dyn BaseCallbackHandler>>) -> Self {
        Callbacks::Handlers(handlers)
    }
}

impl From<CallbackManager> for Callbacks {
    fn from(manager: CallbackManager) -> Self {
        Callbacks::Manager(manager)
    }
}
