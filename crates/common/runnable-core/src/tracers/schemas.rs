use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// The kind of work a run performs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    #[default]
    Chain,
    Llm,
    ChatModel,
    Prompt,
    Parser,
    Tool,
    Retriever,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Chain => "chain",
            RunType::Llm => "llm",
            RunType::ChatModel => "chat_model",
            RunType::Prompt => "prompt",
            RunType::Parser => "parser",
            RunType::Tool => "tool",
            RunType::Retriever => "retriever",
        }
    }
}

impl std::fmt::Display for RunType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RunType {
    fn from(s: &str) -> Self {
        match s {
            "llm" => RunType::Llm,
            "chat_model" => RunType::ChatModel,
            "prompt" => RunType::Prompt,
            "parser" => RunType::Parser,
            "tool" => RunType::Tool,
            "retriever" => RunType::Retriever,
            _ => RunType::Chain,
        }
    }
}

/// One recorded run.
///
/// A finished run carries exactly one of `outputs` and `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,

    pub name: String,

    pub run_type: RunType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<Uuid>,

    pub start_time: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    pub inputs: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    #[serde(default)]
    pub child_runs: Vec<Run>,
}

impl Run {
    pub fn new(id: Uuid, name: impl Into<String>, run_type: RunType, inputs: Value) -> Self {
        Self {
            id,
            name: name.into(),
            run_type,
            parent_run_id: None,
            start_time: Utc::now(),
            end_time: None,
            inputs,
            outputs: None,
            error: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
            child_runs: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Find a run by id in this run's subtree.
    pub fn find(&self, id: Uuid) -> Option<&Run> {
        if self.id == id {
            return Some(self);
        }
        self.child_runs.iter().find_map(|child| child.find(id))
    }
}
