use std::ops::Add;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Type tag carried by serialized AI message chunks.
pub const AI_MESSAGE_CHUNK_TYPE: &str = "AIMessageChunk";

/// Usage metadata for a message, such as token counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UsageMetadata {
    /// Count of input (or prompt) tokens.
    pub input_tokens: i64,
    /// Count of output (or completion) tokens.
    pub output_tokens: i64,
    /// Total token count.
    pub total_tokens: i64,
}

impl UsageMetadata {
    /// Create a new usage record; the total is derived from both counts.
    pub fn new(input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

impl Add for UsageMetadata {
    type Output = UsageMetadata;

    fn add(self, other: UsageMetadata) -> UsageMetadata {
        UsageMetadata {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

/// Sum two optional usage records. Absent records count as zero.
pub fn add_usage(
    left: Option<UsageMetadata>,
    right: Option<UsageMetadata>,
) -> Option<UsageMetadata> {
    match (left, right) {
        (Some(left), Some(right)) => Some(left + right),
        (left, None) => left,
        (None, right) => right,
    }
}

/// A partial tool call streamed by a chat model.
///
/// Chunks sharing an `index` belong to the same call; their `name` and
/// `args` substrings concatenate in stream order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolCallChunk {
    /// The name of the tool to be called (may be partial during streaming).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The arguments to the tool call (may be partial JSON during streaming).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    /// An identifier associated with the tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The index of the tool call in the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
}

impl ToolCallChunk {
    /// Create a new tool call chunk.
    pub fn new(
        name: Option<String>,
        args: Option<String>,
        id: Option<String>,
        index: Option<i64>,
    ) -> Self {
        Self {
            name,
            args,
            id,
            index,
        }
    }
}

fn concat_optional(left: Option<String>, right: Option<String>) -> Option<String> {
    match (left, right) {
        (Some(mut left), Some(right)) => {
            left.push_str(&right);
            Some(left)
        }
        (left, None) => left,
        (None, right) => right,
    }
}

/// Merge two tool-call-delta lists by index.
///
/// A right-hand delta whose index already appears on the left extends that
/// entry; any other delta is appended.
pub fn merge_tool_call_chunks(
    mut left: Vec<ToolCallChunk>,
    right: Vec<ToolCallChunk>,
) -> Vec<ToolCallChunk> {
    for delta in right {
        let existing = delta
            .index
            .and_then(|index| left.iter_mut().find(|chunk| chunk.index == Some(index)));
        match existing {
            Some(chunk) => {
                chunk.name = concat_optional(chunk.name.take(), delta.name);
                chunk.args = concat_optional(chunk.args.take(), delta.args);
                if chunk.id.is_none() {
                    chunk.id = delta.id;
                }
            }
            None => left.push(delta),
        }
    }
    left
}

/// A streamed increment of an AI message.
///
/// Fields this crate does not model are kept in `extra` and merged with
/// last-write-wins semantics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AIMessageChunk {
    /// Text content of this increment.
    #[serde(default)]
    pub content: String,
    /// Message identifier; the first non-empty id wins on merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Partial tool calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_chunks: Vec<ToolCallChunk>,
    /// Token usage reported with this increment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
    /// Additional provider fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AIMessageChunk {
    /// Create a chunk carrying only text content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Set the message id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a tool call delta.
    pub fn with_tool_call_chunk(mut self, chunk: ToolCallChunk) -> Self {
        self.tool_call_chunks.push(chunk);
        self
    }

    /// Set the usage metadata.
    pub fn with_usage_metadata(mut self, usage: UsageMetadata) -> Self {
        self.usage_metadata = Some(usage);
        self
    }

    /// Set an additional field.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Serialize into the tagged JSON shape used as a stream chunk.
    pub fn to_value(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert(
                "type".to_string(),
                Value::String(AI_MESSAGE_CHUNK_TYPE.to_string()),
            );
        }
        Ok(value)
    }

    /// Parse the tagged JSON shape produced by [`AIMessageChunk::to_value`].
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::invalid_input("AIMessageChunk must be a JSON object"));
        };
        let mut map = map.clone();
        match map.remove("type") {
            Some(Value::String(kind)) if kind == AI_MESSAGE_CHUNK_TYPE => {}
            other => {
                return Err(Error::invalid_input(format!(
                    "expected type {AI_MESSAGE_CHUNK_TYPE}, got {other:?}"
                )));
            }
        }
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

impl Add for AIMessageChunk {
    type Output = AIMessageChunk;

    fn add(self, other: AIMessageChunk) -> AIMessageChunk {
        let mut extra = self.extra;
        extra.extend(other.extra);
        AIMessageChunk {
            content: self.content + &other.content,
            id: self.id.or(other.id),
            tool_call_chunks: merge_tool_call_chunks(self.tool_call_chunks, other.tool_call_chunks),
            usage_metadata: add_usage(self.usage_metadata, other.usage_metadata),
            extra,
        }
    }
}
