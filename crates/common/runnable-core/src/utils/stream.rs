//! Chunk concatenation.
//!
//! [`concat`] folds two stream chunks into one aggregate. It dispatches on the
//! runtime shape of both sides:
//!
//! - `null` is the identity element on either side.
//! - two strings concatenate.
//! - two arrays of equal length concatenate elementwise.
//! - two objects tagged with the same chunk `"type"` (`AIMessageChunk`,
//!   `GenerationChunk`, `ChatGenerationChunk`) merge with the typed rules of
//!   that chunk.
//! - two untagged objects merge per key: shared keys concatenate recursively,
//!   the rest is a union.
//!
//! Every other pairing fails with [`Error::NotConcatenable`].

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::messages::AIMessageChunk;
use crate::messages::ai::AI_MESSAGE_CHUNK_TYPE;
use crate::outputs::{
    CHAT_GENERATION_CHUNK_TYPE, ChatGenerationChunk, GENERATION_CHUNK_TYPE, GenerationChunk,
};

const CHUNK_TYPES: [&str; 3] = [
    AI_MESSAGE_CHUNK_TYPE,
    GENERATION_CHUNK_TYPE,
    CHAT_GENERATION_CHUNK_TYPE,
];

fn chunk_type(map: &Map<String, Value>) -> Option<&str> {
    map.get("type")
        .and_then(Value::as_str)
        .filter(|kind| CHUNK_TYPES.contains(kind))
}

/// Describe the shape of a chunk for error messages.
pub fn shape_name(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(items) => format!("array[{}]", items.len()),
        Value::Object(map) => chunk_type(map).unwrap_or("object").to_string(),
    }
}

/// Concatenate two chunks into one aggregate.
pub fn concat(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Null, other) | (other, Value::Null) => Ok(other.clone()),
        (Value::String(left), Value::String(right)) => {
            let mut merged = String::with_capacity(left.len() + right.len());
            merged.push_str(left);
            merged.push_str(right);
            Ok(Value::String(merged))
        }
        (Value::Array(left_items), Value::Array(right_items)) => {
            if left_items.len() != right_items.len() {
                return Err(Error::not_concatenable(shape_name(left), shape_name(right)));
            }
            left_items
                .iter()
                .zip(right_items)
                .map(|(l, r)| concat(l, r))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        (Value::Object(left_map), Value::Object(right_map)) => {
            match (chunk_type(left_map), chunk_type(right_map)) {
                (None, None) => concat_mappings(left_map, right_map).map(Value::Object),
                (Some(left_kind), Some(right_kind)) if left_kind == right_kind => {
                    concat_typed(left_kind, left, right)
                }
                _ => Err(Error::not_concatenable(shape_name(left), shape_name(right))),
            }
        }
        _ => Err(Error::not_concatenable(shape_name(left), shape_name(right))),
    }
}

fn concat_mappings(
    left: &Map<String, Value>,
    right: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let mut merged = left.clone();
    for (key, right_value) in right {
        let value = match merged.get(key) {
            Some(left_value) => concat(left_value, right_value)?,
            None => right_value.clone(),
        };
        merged.insert(key.clone(), value);
    }
    Ok(merged)
}

/// Merge two chunks of the same `type`. A chunk that does not decode as
/// that type makes the pair not concatenable.
fn concat_typed(kind: &str, left: &Value, right: &Value) -> Result<Value> {
    let malformed = |error: Error| {
        tracing::debug!(target: "runnable_core::runnables", %error, kind, "malformed typed chunk");
        Error::not_concatenable(shape_name(left), shape_name(right))
    };
    match kind {
        AI_MESSAGE_CHUNK_TYPE => (AIMessageChunk::from_value(left).map_err(malformed)?
            + AIMessageChunk::from_value(right).map_err(malformed)?)
        .to_value(),
        GENERATION_CHUNK_TYPE => (GenerationChunk::from_value(left).map_err(malformed)?
            + GenerationChunk::from_value(right).map_err(malformed)?)
        .to_value(),
        CHAT_GENERATION_CHUNK_TYPE => (ChatGenerationChunk::from_value(left).map_err(malformed)?
            + ChatGenerationChunk::from_value(right).map_err(malformed)?)
        .to_value(),
        other => Err(Error::not_concatenable(other, other)),
    }
}

/// Fold a sequence of chunks left to right.
///
/// Returns `None` for an empty sequence.
pub fn concat_all<'a>(chunks: impl IntoIterator<Item = &'a Value>) -> Result<Option<Value>> {
    let mut aggregate: Option<Value> = None;
    for chunk in chunks {
        aggregate = Some(match aggregate {
            None => chunk.clone(),
            Some(previous) => concat(&previous, chunk)?,
        });
    }
    Ok(aggregate)
}
