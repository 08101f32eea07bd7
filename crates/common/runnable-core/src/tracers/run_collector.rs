//! Callback handler that records every run it sees.
//!
//! Runs are stored flat while in flight and assembled into trees on read,
//! so children that end after their parent are still attached. Children are
//! ordered by completion.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::callbacks::base::{BaseCallbackHandler, CallbackManagerMixin, ChainManagerMixin};
use crate::tracers::schemas::{Run, RunType};

#[derive(Debug, Default)]
struct CollectorState {
    runs: HashMap<Uuid, Run>,
    order: Vec<Uuid>,
    completed: Vec<Uuid>,
}

#[derive(Debug, Default)]
pub struct RunCollectorCallbackHandler {
    state: Mutex<CollectorState>,
}

impl RunCollectorCallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().order.is_empty()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.runs.clear();
        state.order.clear();
        state.completed.clear();
    }

    /// Every recorded run in start order, without children attached.
    pub fn runs(&self) -> Vec<Run> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.runs.get(id).cloned())
            .collect()
    }

    pub fn get_run(&self, id: Uuid) -> Option<Run> {
        self.state.lock().runs.get(&id).cloned()
    }

    pub fn runs_by_name(&self, name: &str) -> Vec<Run> {
        self.runs().into_iter().filter(|r| r.name == name).collect()
    }

    pub fn runs_by_type(&self, run_type: RunType) -> Vec<Run> {
        self.runs()
            .into_iter()
            .filter(|r| r.run_type == run_type)
            .collect()
    }

    pub fn errored_runs(&self) -> Vec<Run> {
        self.runs()
            .into_iter()
            .filter(|r| r.error.is_some())
            .collect()
    }

    /// The finished root runs assembled into trees, in completion order.
    pub fn traced_runs(&self) -> Vec<Run> {
        let state = self.state.lock();
        let completed: Vec<Run> = state
            .completed
            .iter()
            .filter_map(|id| state.runs.get(id).cloned())
            .collect();
        completed
            .iter()
            .filter(|r| {
                r.parent_run_id
                    .is_none_or(|parent| !state.runs.contains_key(&parent))
            })
            .map(|root| attach_children(root.clone(), &completed))
            .collect()
    }

    pub fn latest_run(&self) -> Option<Run> {
        self.traced_runs().pop()
    }

    fn finish(&self, run_id: Uuid, outputs: Option<Value>, error: Option<String>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.runs.get_mut(&run_id) {
            Some(run) => {
                run.end_time = Some(Utc::now());
                run.outputs = outputs;
                run.error = error;
                if !state.completed.contains(&run_id) {
                    state.completed.push(run_id);
                }
            }
            None => {
                tracing::warn!(
                    target: "runnable_core::tracers",
                    %run_id,
                    "end event for unknown run"
                );
            }
        }
    }
}

fn attach_children(mut run: Run, all: &[Run]) -> Run {
    run.child_runs = all
        .iter()
        .filter(|candidate| candidate.parent_run_id == Some(run.id))
        .map(|child| attach_children(child.clone(), all))
        .collect();
    run
}

impl ChainManagerMixin for RunCollectorCallbackHandler {
    fn on_chain_end(&self, outputs: &Value, run_id: Uuid, _parent_run_id: Option<Uuid>) {
        self.finish(run_id, Some(outputs.clone()), None);
    }

    fn on_chain_error(
        &self,
        error: &dyn std::error::Error,
        run_id: Uuid,
        _parent_run_id: Option<Uuid>,
    ) {
        self.finish(run_id, None, Some(error.to_string()));
    }
}

impl CallbackManagerMixin for RunCollectorCallbackHandler {
    fn on_chain_start(
        &self,
        _serialized: &Value,
        inputs: &Value,
        run_id: Uuid,
        parent_run_id: Option<Uuid>,
        tags: Option<&[String]>,
        metadata: Option<&HashMap<String, Value>>,
        run_type: RunType,
        name: Option<&str>,
    ) {
        let mut run = Run::new(
            run_id,
            name.unwrap_or("Unnamed"),
            run_type,
            inputs.clone(),
        );
        run.parent_run_id = parent_run_id;
        run.tags = tags.map(<[String]>::to_vec).unwrap_or_default();
        run.metadata = metadata.cloned().unwrap_or_default();

        let mut state = self.state.lock();
        if state.runs.insert(run_id, run).is_none() {
            state.order.push(run_id);
        }
    }
}

impl BaseCallbackHandler for RunCollectorCallbackHandler {
    fn name(&self) -> &str {
        "run-collector_callback_handler"
    }
}
