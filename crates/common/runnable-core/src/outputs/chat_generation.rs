use std::ops::Add;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::messages::AIMessageChunk;

use super::generation::merge_generation_info;

pub const CHAT_GENERATION_CHUNK_TYPE: &str = "ChatGenerationChunk";

/// A streamed increment of a chat generation.
///
/// `text` mirrors the message content and is kept in sync on merge.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatGenerationChunk {
    pub message: AIMessageChunk,
    pub text: String,
    pub generation_info: Option<Map<String, Value>>,
}

#[derive(Serialize, Deserialize)]
struct ChatGenerationChunkRepr {
    message: Value,
    #[serde(default)]
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generation_info: Option<Map<String, Value>>,
    #[serde(rename = "type")]
    generation_type: String,
}

impl ChatGenerationChunk {
    pub fn new(message: AIMessageChunk) -> Self {
        Self {
            text: message.content.clone(),
            message,
            generation_info: None,
        }
    }

    pub fn with_generation_info(mut self, generation_info: Map<String, Value>) -> Self {
        self.generation_info = Some(generation_info);
        self
    }

    pub fn to_value(&self) -> Result<Value> {
        let repr = ChatGenerationChunkRepr {
            message: self.message.to_value()?,
            text: self.text.clone(),
            generation_info: self.generation_info.clone(),
            generation_type: CHAT_GENERATION_CHUNK_TYPE.to_string(),
        };
        Ok(serde_json::to_value(repr)?)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let repr: ChatGenerationChunkRepr = serde_json::from_value(value.clone())?;
        if repr.generation_type != CHAT_GENERATION_CHUNK_TYPE {
            return Err(Error::invalid_input(format!(
                "expected type {CHAT_GENERATION_CHUNK_TYPE}, got {}",
                repr.generation_type
            )));
        }
        Ok(Self {
            message: AIMessageChunk::from_value(&repr.message)?,
            text: repr.text,
            generation_info: repr.generation_info,
        })
    }
}

impl Add for ChatGenerationChunk {
    type Output = ChatGenerationChunk;

    fn add(self, other: ChatGenerationChunk) -> ChatGenerationChunk {
        let message = self.message + other.message;
        ChatGenerationChunk {
            text: message.content.clone(),
            message,
            generation_info: merge_generation_info(self.generation_info, other.generation_info),
        }
    }
}
