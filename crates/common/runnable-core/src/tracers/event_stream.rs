//! Run events streamed as a flat sequence of typed events.
//!
//! [`EventStreamCallbackHandler`] turns the nested callback events of a run
//! tree into [`StreamEvent`]s named `on_<run_type>_<phase>`, for example
//! `on_chain_start` or `on_chat_model_stream`. Each event carries the ids of
//! its ancestors, root first. [`stream_events`] runs a runnable with the
//! handler attached and yields the events while the run is in flight.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bon::bon;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::callbacks::base::{BaseCallbackHandler, CallbackManagerMixin, ChainManagerMixin};
use crate::error::{Error, Result};
use crate::runnables::base::Runnable;
use crate::runnables::config::RunnableConfig;
use crate::tracers::log_stream::{LogStreamConfig, with_handler};
use crate::tracers::memory_stream::{MemoryStream, ReceiveStream, SendStream};
use crate::tracers::schemas::RunType;

/// Payload of a [`StreamEvent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One event of a run tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// `on_<run_type>_start`, `on_<run_type>_stream` or `on_<run_type>_end`.
    pub event: String,
    pub run_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// Ancestor run ids, root first and immediate parent last.
    #[serde(default)]
    pub parent_ids: Vec<Uuid>,
    pub data: EventData,
}

#[bon]
impl StreamEvent {
    #[builder]
    pub fn new(
        #[builder(into)] event: String,
        run_id: Uuid,
        #[builder(into)] name: String,
        #[builder(default)] data: EventData,
        #[builder(default)] tags: Vec<String>,
        #[builder(default)] metadata: HashMap<String, Value>,
        #[builder(default)] parent_ids: Vec<Uuid>,
    ) -> Self {
        Self {
            event,
            run_id,
            name,
            tags,
            metadata,
            parent_ids,
            data,
        }
    }
}

#[derive(Debug, Clone)]
struct RunInfo {
    name: String,
    tags: Vec<String>,
    metadata: HashMap<String, Value>,
    run_type: RunType,
    inputs: Value,
}

#[derive(Debug, Default)]
struct EventState {
    root_id: Option<Uuid>,
    /// Removed when the run ends.
    run_map: HashMap<Uuid, RunInfo>,
    /// Kept for the whole stream, since a parent may end before its children.
    parent_map: HashMap<Uuid, Option<Uuid>>,
}

impl EventState {
    fn parent_ids(&self, mut run_id: Uuid) -> Vec<Uuid> {
        let mut parent_ids = Vec::new();
        while let Some(Some(parent_id)) = self.parent_map.get(&run_id) {
            if parent_ids.contains(parent_id) {
                tracing::warn!(
                    target: "runnable_core::tracers",
                    %parent_id,
                    "cycle in run parents"
                );
                break;
            }
            parent_ids.push(*parent_id);
            run_id = *parent_id;
        }
        parent_ids.reverse();
        parent_ids
    }
}

/// Callback handler that emits [`StreamEvent`]s.
///
/// Runs rejected by the filter emit no events. A failed run ends with an
/// `_end` event whose data carries the error instead of an output.
pub struct EventStreamCallbackHandler {
    filter: LogStreamConfig,
    state: Mutex<EventState>,
    send_stream: SendStream<StreamEvent>,
    receive_stream: Mutex<Option<ReceiveStream<StreamEvent>>>,
}

impl fmt::Debug for EventStreamCallbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamCallbackHandler")
            .field("filter", &self.filter)
            .field("root_id", &self.state.lock().root_id)
            .finish()
    }
}

impl EventStreamCallbackHandler {
    pub fn new(filter: LogStreamConfig) -> Self {
        let (send_stream, receive_stream) = MemoryStream::channel();
        Self {
            filter,
            state: Mutex::new(EventState::default()),
            send_stream,
            receive_stream: Mutex::new(Some(receive_stream)),
        }
    }

    /// Take the receiving end of the event stream. Only the first call
    /// returns it.
    pub fn take_receive_stream(&self) -> Option<ReceiveStream<StreamEvent>> {
        self.receive_stream.lock().take()
    }

    fn send(&self, info: &RunInfo, event: StreamEvent) {
        if !self.filter.includes(&info.name, info.run_type, &info.tags) {
            return;
        }
        if !self.send_stream.send(event) {
            tracing::warn!(
                target: "runnable_core::tracers",
                "event stream receiver dropped; event discarded"
            );
        }
    }

    fn event(
        info: &RunInfo,
        phase: &str,
        run_id: Uuid,
        parent_ids: Vec<Uuid>,
        data: EventData,
    ) -> StreamEvent {
        StreamEvent::builder()
            .event(format!("on_{}_{phase}", info.run_type))
            .run_id(run_id)
            .name(info.name.clone())
            .tags(info.tags.clone())
            .metadata(info.metadata.clone())
            .parent_ids(parent_ids)
            .data(data)
            .build()
    }

    fn finish(&self, run_id: Uuid, output: Option<Value>, error: Option<String>) {
        let (info, parent_ids, is_root) = {
            let mut state = self.state.lock();
            let Some(info) = state.run_map.remove(&run_id) else {
                tracing::debug!(target: "runnable_core::tracers", %run_id, "end of unknown run");
                return;
            };
            (info, state.parent_ids(run_id), state.root_id == Some(run_id))
        };
        let data = EventData {
            input: (!is_root).then(|| info.inputs.clone()),
            output,
            chunk: None,
            error,
        };
        self.send(&info, Self::event(&info, "end", run_id, parent_ids, data));
    }
}

impl CallbackManagerMixin for EventStreamCallbackHandler {
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
        let info = RunInfo {
            name: name.unwrap_or("Unnamed").to_string(),
            tags: tags.unwrap_or_default().to_vec(),
            metadata: metadata.cloned().unwrap_or_default(),
            run_type,
            inputs: inputs.clone(),
        };
        let parent_ids = {
            let mut state = self.state.lock();
            state.root_id.get_or_insert(run_id);
            state.parent_map.insert(run_id, parent_run_id);
            state.run_map.insert(run_id, info.clone());
            state.parent_ids(run_id)
        };
        let data = EventData {
            input: Some(info.inputs.clone()),
            ..EventData::default()
        };
        self.send(&info, Self::event(&info, "start", run_id, parent_ids, data));
    }
}

impl ChainManagerMixin for EventStreamCallbackHandler {
    fn on_chain_stream(&self, chunk: &Value, run_id: Uuid, _parent_run_id: Option<Uuid>) {
        let (info, parent_ids) = {
            let state = self.state.lock();
            let Some(info) = state.run_map.get(&run_id).cloned() else {
                return;
            };
            (info, state.parent_ids(run_id))
        };
        let data = EventData {
            chunk: Some(chunk.clone()),
            ..EventData::default()
        };
        self.send(&info, Self::event(&info, "stream", run_id, parent_ids, data));
    }

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

impl BaseCallbackHandler for EventStreamCallbackHandler {
    fn name(&self) -> &str {
        "EventStreamCallbackHandler"
    }
}

enum Step {
    Event(Option<StreamEvent>),
    Chunk(Option<Result<()>>),
}

/// Stream the events of a run.
///
/// Events are yielded as the handler produces them, while the run is in
/// flight. `filter` selects the runs whose events are emitted; unlike
/// [`stream_log`](crate::tracers::stream_log) it applies to the root run too.
/// If the run fails, the events produced so far are yielded before the error.
pub fn stream_events<'a, R>(
    runnable: &'a R,
    input: R::Input,
    config: Option<RunnableConfig>,
    filter: LogStreamConfig,
) -> BoxStream<'a, Result<StreamEvent>>
where
    R: Runnable + ?Sized,
{
    let handler = Arc::new(EventStreamCallbackHandler::new(filter));
    let receive_stream = handler.take_receive_stream();
    let config = with_handler(config, handler);

    Box::pin(async_stream::stream! {
        let Some(mut receive_stream) = receive_stream else {
            yield Err(Error::other("event stream receiver already taken"));
            return;
        };

        let mut failure: Option<Error> = None;
        {
            let mut chunks = runnable.stream(input, Some(config));
            loop {
                let step = tokio::select! {
                    biased;
                    event = receive_stream.next(), if !receive_stream.is_closed() => Step::Event(event),
                    chunk = chunks.next() => Step::Chunk(chunk.map(|chunk| chunk.map(drop))),
                };

                match step {
                    Step::Event(Some(event)) => yield Ok(event),
                    Step::Event(None) | Step::Chunk(Some(Ok(()))) => {}
                    Step::Chunk(Some(Err(error))) => {
                        failure = Some(error);
                        break;
                    }
                    Step::Chunk(None) => break,
                }
            }
        }

        while let Some(event) = receive_stream.try_next() {
            yield Ok(event);
        }
        if let Some(error) = failure {
            yield Err(error);
        }
    })
}
