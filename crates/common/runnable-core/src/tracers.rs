//! Callback handlers that observe runs.
//!
//! [`RunCollectorCallbackHandler`] records the run tree.
//! [`LogStreamCallbackHandler`] turns run events into JSON patches, and
//! [`stream_log`] streams them for one run. [`stream_events`] streams the
//! same run tree as flat [`StreamEvent`]s.

pub mod event_stream;
pub mod log_stream;
pub mod memory_stream;
pub mod run_collector;
pub mod schemas;

pub use event_stream::{EventData, EventStreamCallbackHandler, StreamEvent, stream_events};
pub use log_stream::{
    JsonPatchOp, LogEntry, LogStreamCallbackHandler, LogStreamConfig, RunLog, RunLogPatch,
    RunState, escape_pointer_segment, stream_log,
};
pub use memory_stream::{MemoryStream, ReceiveStream, SendStream};
pub use run_collector::RunCollectorCallbackHandler;
pub use schemas::{Run, RunType};
