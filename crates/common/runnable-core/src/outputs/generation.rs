use std::ops::Add;

use bon::bon;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const GENERATION_CHUNK_TYPE: &str = "GenerationChunk";

/// A streamed increment of a text generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationChunk {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_info: Option<Map<String, Value>>,

    #[serde(rename = "type", default = "default_generation_chunk_type")]
    pub generation_type: String,
}

fn default_generation_chunk_type() -> String {
    GENERATION_CHUNK_TYPE.to_string()
}

#[bon]
impl GenerationChunk {
    #[builder]
    pub fn new(
        #[builder(into)] text: String,
        generation_info: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            text,
            generation_info,
            generation_type: default_generation_chunk_type(),
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let chunk: Self = serde_json::from_value(value.clone())?;
        if chunk.generation_type != GENERATION_CHUNK_TYPE {
            return Err(Error::invalid_input(format!(
                "expected type {GENERATION_CHUNK_TYPE}, got {}",
                chunk.generation_type
            )));
        }
        Ok(chunk)
    }
}

/// Shallow-merge two generation info maps; keys on the right win.
pub(crate) fn merge_generation_info(
    left: Option<Map<String, Value>>,
    right: Option<Map<String, Value>>,
) -> Option<Map<String, Value>> {
    match (left, right) {
        (Some(mut left), Some(right)) => {
            left.extend(right);
            Some(left)
        }
        (left, None) => left,
        (None, right) => right,
    }
}

impl Add for GenerationChunk {
    type Output = GenerationChunk;

    fn add(self, other: GenerationChunk) -> GenerationChunk {
        GenerationChunk {
            text: self.text + &other.text,
            generation_info: merge_generation_info(self.generation_info, other.generation_info),
            generation_type: self.generation_type,
        }
    }
}
