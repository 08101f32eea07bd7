//! Run logs streamed as JSON patches.
//!
//! [`LogStreamCallbackHandler`] turns callback events into [`RunLogPatch`]
//! batches. The first batch is always a single `replace` at `""` that sets
//! up the root state; every nested run then gets an entry under
//! `/logs/<key>`. [`stream_log`] runs a runnable with the handler attached
//! and interleaves the handler's patches with the root's streamed chunks.
//! Folding the patches with [`RunLog::apply_patch`] materializes the state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::callbacks::base::{
    BaseCallbackHandler, CallbackManagerMixin, Callbacks, ChainManagerMixin,
};
use crate::error::{Error, Result};
use crate::runnables::base::Runnable;
use crate::runnables::config::{RunnableConfig, ensure_config};
use crate::tracers::memory_stream::{MemoryStream, ReceiveStream, SendStream};
use crate::tracers::schemas::RunType;

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Escape a key for use as one JSON pointer segment.
pub fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// A single entry in the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// ID of the sub-run.
    pub id: String,
    /// Name of the object being run.
    pub name: String,
    /// Type of the object being run, eg. prompt, chain, llm, etc.
    #[serde(rename = "type")]
    pub run_type: String,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, Value>,
    /// ISO-8601 timestamp of when the run started.
    pub start_time: String,
    /// Output chunks streamed by this run, if any.
    pub streamed_output: Vec<Value>,
    /// Final output of this run. Null until it finishes, and null if it failed.
    pub final_output: Option<Value>,
    /// ISO-8601 timestamp of when the run ended.
    pub end_time: Option<String>,
}

impl LogEntry {
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        run_type: RunType,
        tags: Vec<String>,
        metadata: HashMap<String, Value>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.into(),
            run_type: run_type.to_string(),
            tags,
            metadata,
            start_time: format_time(start_time),
            streamed_output: Vec::new(),
            final_output: None,
            end_time: None,
        }
    }
}

/// State of the root run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// ID of the run.
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub run_type: String,
    /// Output chunks streamed by the root run.
    pub streamed_output: Vec<Value>,
    /// Final output of the run, the aggregate of `streamed_output`.
    pub final_output: Option<Value>,
    /// Nested runs keyed by name, in start order.
    pub logs: IndexMap<String, LogEntry>,
}

impl RunState {
    pub fn new(id: Uuid, name: impl Into<String>, run_type: RunType) -> Self {
        Self {
            id: id.to_string(),
            name: name.into(),
            run_type: run_type.to_string(),
            streamed_output: Vec::new(),
            final_output: None,
            logs: IndexMap::new(),
        }
    }
}

/// A JSON patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPatchOp {
    pub op: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl JsonPatchOp {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "add".to_string(),
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "replace".to_string(),
            path: path.into(),
            value: Some(value),
        }
    }
}

/// One ordered batch of patch operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogPatch {
    pub ops: Vec<JsonPatchOp>,
}

impl RunLogPatch {
    pub fn new(ops: Vec<JsonPatchOp>) -> Self {
        Self { ops }
    }

    pub fn from_op(op: JsonPatchOp) -> Self {
        Self { ops: vec![op] }
    }
}

impl fmt::Display for RunLogPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunLogPatch({:?})", self.ops)
    }
}

/// The patches applied so far and the state they produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub ops: Vec<JsonPatchOp>,
    pub state: Value,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one batch of operations, in order.
    pub fn apply_patch(&mut self, patch: &RunLogPatch) -> Result<()> {
        let operations: json_patch::Patch = serde_json::from_value(serde_json::to_value(&patch.ops)?)?;
        json_patch::patch(&mut self.state, &operations)?;
        self.ops.extend(patch.ops.iter().cloned());
        Ok(())
    }

    /// Fold a sequence of patches into a log.
    pub fn from_patches<'p>(patches: impl IntoIterator<Item = &'p RunLogPatch>) -> Result<Self> {
        let mut log = Self::new();
        for patch in patches {
            log.apply_patch(patch)?;
        }
        Ok(log)
    }

    /// Typed view of the current state.
    pub fn run_state(&self) -> Result<RunState> {
        Ok(serde_json::from_value(self.state.clone())?)
    }
}

impl fmt::Display for RunLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunLog({})", self.state)
    }
}

/// Filters for the runs that get an entry under `/logs`.
///
/// A run is included when no include filter is set or any include filter
/// matches, and no exclude filter matches. The root run is never included.
#[derive(Debug, Clone, Default)]
pub struct LogStreamConfig {
    pub include_names: Option<Vec<String>>,
    pub include_types: Option<Vec<RunType>>,
    pub include_tags: Option<Vec<String>>,
    pub exclude_names: Option<Vec<String>>,
    pub exclude_types: Option<Vec<RunType>>,
    pub exclude_tags: Option<Vec<String>>,
}

impl LogStreamConfig {
    pub(crate) fn includes(&self, name: &str, run_type: RunType, tags: &[String]) -> bool {
        let mut include = self.include_names.is_none()
            && self.include_types.is_none()
            && self.include_tags.is_none();

        if let Some(names) = &self.include_names {
            include = include || names.iter().any(|n| n == name);
        }
        if let Some(types) = &self.include_types {
            include = include || types.contains(&run_type);
        }
        if let Some(include_tags) = &self.include_tags {
            include = include || tags.iter().any(|t| include_tags.contains(t));
        }

        if let Some(names) = &self.exclude_names {
            include = include && !names.iter().any(|n| n == name);
        }
        if let Some(types) = &self.exclude_types {
            include = include && !types.contains(&run_type);
        }
        if let Some(exclude_tags) = &self.exclude_tags {
            include = include && !tags.iter().any(|t| exclude_tags.contains(t));
        }

        include
    }
}

#[derive(Debug, Default)]
struct LogState {
    root_id: Option<Uuid>,
    key_map_by_run_id: HashMap<Uuid, String>,
    counter_map_by_name: HashMap<String, usize>,
}

/// Callback handler that emits run-log patches.
///
/// Nested runs with the same name are keyed `name`, `name:2`, `name:3`, ...
pub struct LogStreamCallbackHandler {
    config: LogStreamConfig,
    state: Mutex<LogState>,
    send_stream: SendStream<RunLogPatch>,
    receive_stream: Mutex<Option<ReceiveStream<RunLogPatch>>>,
}

impl fmt::Debug for LogStreamCallbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStreamCallbackHandler")
            .field("config", &self.config)
            .field("root_id", &self.state.lock().root_id)
            .finish()
    }
}

impl LogStreamCallbackHandler {
    pub fn new(config: LogStreamConfig) -> Self {
        let (send_stream, receive_stream) = MemoryStream::channel();
        Self {
            config,
            state: Mutex::new(LogState::default()),
            send_stream,
            receive_stream: Mutex::new(Some(receive_stream)),
        }
    }

    /// Take the receiving end of the patch stream. Only the first call
    /// returns it.
    pub fn take_receive_stream(&self) -> Option<ReceiveStream<RunLogPatch>> {
        self.receive_stream.lock().take()
    }

    /// A sender into the same ordered patch stream.
    pub fn send_stream(&self) -> SendStream<RunLogPatch> {
        self.send_stream.clone()
    }

    pub fn root_id(&self) -> Option<Uuid> {
        self.state.lock().root_id
    }

    /// Send patches to the stream. Returns `false` if the receiver is gone.
    pub fn send(&self, ops: Vec<JsonPatchOp>) -> bool {
        if ops.is_empty() {
            return true;
        }
        let sent = self.send_stream.send(RunLogPatch::new(ops));
        if !sent {
            tracing::warn!(
                target: "runnable_core::tracers",
                "log stream receiver dropped; patch discarded"
            );
        }
        sent
    }

    fn key_for(&self, run_id: Uuid) -> Option<String> {
        self.state.lock().key_map_by_run_id.get(&run_id).cloned()
    }

    fn finish(&self, run_id: Uuid, final_output: Value) {
        let root_id = self.root_id();
        if root_id == Some(run_id) {
            self.send(vec![JsonPatchOp::replace("/final_output", final_output)]);
            return;
        }
        match self.key_for(run_id) {
            Some(key) => {
                let path = format!("/logs/{}", escape_pointer_segment(&key));
                self.send(vec![
                    JsonPatchOp::add(format!("{path}/final_output"), final_output),
                    JsonPatchOp::add(format!("{path}/end_time"), json!(format_time(Utc::now()))),
                ]);
            }
            None if root_id.is_none() => {
                tracing::warn!(
                    target: "runnable_core::tracers",
                    %run_id,
                    "run update before any run started"
                );
            }
            None => {}
        }
    }
}

impl CallbackManagerMixin for LogStreamCallbackHandler {
    fn on_chain_start(
        &self,
        _serialized: &Value,
        _inputs: &Value,
        run_id: Uuid,
        _parent_run_id: Option<Uuid>,
        tags: Option<&[String]>,
        metadata: Option<&HashMap<String, Value>>,
        run_type: RunType,
        name: Option<&str>,
    ) {
        let name = name.unwrap_or("Unnamed");
        let tags = tags.unwrap_or_default();

        let mut state = self.state.lock();
        if state.root_id.is_none() {
            state.root_id = Some(run_id);
            drop(state);
            match serde_json::to_value(RunState::new(run_id, name, run_type)) {
                Ok(root) => {
                    self.send(vec![JsonPatchOp::replace("", root)]);
                }
                Err(error) => {
                    tracing::warn!(target: "runnable_core::tracers", %error, "cannot encode run state");
                }
            }
            return;
        }

        if !self.config.includes(name, run_type, tags) {
            return;
        }

        let count = state
            .counter_map_by_name
            .entry(name.to_string())
            .or_insert(0);
        *count += 1;
        let key = if *count == 1 {
            name.to_string()
        } else {
            format!("{name}:{count}")
        };
        state.key_map_by_run_id.insert(run_id, key.clone());
        drop(state);

        let entry = LogEntry::new(
            run_id,
            name,
            run_type,
            tags.to_vec(),
            metadata.cloned().unwrap_or_default(),
            Utc::now(),
        );
        match serde_json::to_value(entry) {
            Ok(entry) => {
                self.send(vec![JsonPatchOp::add(
                    format!("/logs/{}", escape_pointer_segment(&key)),
                    entry,
                )]);
            }
            Err(error) => {
                tracing::warn!(target: "runnable_core::tracers", %error, "cannot encode log entry");
            }
        }
    }
}

impl ChainManagerMixin for LogStreamCallbackHandler {
    fn on_chain_stream(&self, chunk: &Value, run_id: Uuid, _parent_run_id: Option<Uuid>) {
        if let Some(key) = self.key_for(run_id) {
            self.send(vec![JsonPatchOp::add(
                format!("/logs/{}/streamed_output/-", escape_pointer_segment(&key)),
                chunk.clone(),
            )]);
        }
    }

    fn on_chain_end(&self, outputs: &Value, run_id: Uuid, _parent_run_id: Option<Uuid>) {
        self.finish(run_id, outputs.clone());
    }

    fn on_chain_error(
        &self,
        _error: &dyn std::error::Error,
        run_id: Uuid,
        _parent_run_id: Option<Uuid>,
    ) {
        self.finish(run_id, Value::Null);
    }
}

impl BaseCallbackHandler for LogStreamCallbackHandler {
    fn name(&self) -> &str {
        "LogStreamCallbackHandler"
    }
}

pub(crate) fn with_handler(config: Option<RunnableConfig>, handler: Arc<dyn BaseCallbackHandler>) -> RunnableConfig {
    let mut config = ensure_config(config);
    config.callbacks = Some(match config.callbacks.take() {
        None => Callbacks::Handlers(vec![handler]),
        Some(Callbacks::Handlers(mut handlers)) => {
            handlers.push(handler);
            Callbacks::Handlers(handlers)
        }
        Some(Callbacks::Manager(mut manager)) => {
            manager.add_handler(handler, true);
            Callbacks::Manager(manager)
        }
    });
    config
}

enum Step {
    Patch(Option<RunLogPatch>),
    Chunk(Option<Result<Value>>),
}

/// Stream a run as run-log patches.
///
/// Patches are yielded as soon as the handler produces them, while the run
/// is still in flight, in the order the events happened. Each chunk of the
/// root run is recorded with `add /streamed_output/-`. If the run fails, the
/// patches produced so far are yielded before the error.
pub fn stream_log<'a, R>(
    runnable: &'a R,
    input: R::Input,
    config: Option<RunnableConfig>,
    log_config: LogStreamConfig,
) -> BoxStream<'a, Result<RunLogPatch>>
where
    R: Runnable + ?Sized,
{
    let handler = Arc::new(LogStreamCallbackHandler::new(log_config));
    let send_stream = handler.send_stream();
    let receive_stream = handler.take_receive_stream();
    let config = with_handler(config, handler);

    Box::pin(async_stream::stream! {
        let Some(mut receive_stream) = receive_stream else {
            yield Err(Error::other("log stream receiver already taken"));
            return;
        };

        let mut failure: Option<Error> = None;
        {
            let mut chunks = runnable.stream(input, Some(config));
            loop {
                let step = tokio::select! {
                    biased;
                    patch = receive_stream.next(), if !receive_stream.is_closed() => Step::Patch(patch),
                    chunk = chunks.next() => Step::Chunk(
                        chunk.map(|chunk| chunk.and_then(|chunk| Ok(serde_json::to_value(&chunk)?))),
                    ),
                };

                match step {
                    Step::Patch(Some(patch)) => yield Ok(patch),
                    Step::Patch(None) => {}
                    Step::Chunk(Some(Ok(chunk))) => {
                        if !send_stream.send(RunLogPatch::from_op(JsonPatchOp::add(
                            "/streamed_output/-",
                            chunk,
                        ))) {
                            tracing::warn!(
                                target: "runnable_core::tracers",
                                "log stream receiver dropped; chunk discarded"
                            );
                        }
                    }
                    Step::Chunk(Some(Err(error))) => {
                        failure = Some(error);
                        break;
                    }
                    Step::Chunk(None) => break,
                }
            }
        }

        while let Some(patch) = receive_stream.try_next() {
            yield Ok(patch);
        }
        if let Some(error) = failure {
            yield Err(error);
        }
    })
}
