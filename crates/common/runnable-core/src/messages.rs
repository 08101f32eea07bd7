//! Message chunk types produced by streaming chat models.
//!
//! Only the streaming AI message chunk lives here: it is the mergeable unit
//! that chat-model leaves emit and that the chunk concat protocol folds.

pub mod ai;

pub use ai::{AIMessageChunk, ToolCallChunk, UsageMetadata, add_usage, merge_tool_call_chunks};
