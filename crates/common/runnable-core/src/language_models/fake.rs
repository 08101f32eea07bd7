//! Deterministic chat models for exercising chains without a provider.
//!
//! Both models take a prompt as a JSON value and produce `AIMessageChunk`
//! values. Streaming yields several chunks whose concatenation equals the
//! `invoke` result.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::messages::AIMessageChunk;
use crate::runnables::{Runnable, RunnableConfig, call_with_config, transform_stream_with_config};
use crate::tracers::schemas::RunType;

#[derive(Debug, Clone, thiserror::Error)]
#[error("FakeListChatModelError")]
pub struct FakeListChatModelError;

/// Replies with the configured responses in order, cycling back to the
/// first once they run out. Streams a response one character at a time.
#[derive(Debug)]
pub struct FakeListChatModel {
    responses: Vec<String>,
    sleep: Option<Duration>,
    index: AtomicUsize,
    error_on_chunk_number: Option<usize>,
}

impl Clone for FakeListChatModel {
    fn clone(&self) -> Self {
        Self {
            responses: self.responses.clone(),
            sleep: self.sleep,
            index: AtomicUsize::new(self.index.load(Ordering::SeqCst)),
            error_on_chunk_number: self.error_on_chunk_number,
        }
    }
}

impl FakeListChatModel {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            sleep: None,
            index: AtomicUsize::new(0),
            error_on_chunk_number: None,
        }
    }

    /// Sleep before replying, and before each streamed chunk.
    pub fn with_sleep(mut self, duration: Duration) -> Self {
        self.sleep = Some(duration);
        self
    }

    /// Fail the stream when it reaches chunk `chunk_number` (0-based).
    pub fn with_error_on_chunk(mut self, chunk_number: usize) -> Self {
        self.error_on_chunk_number = Some(chunk_number);
        self
    }

    pub fn current_index(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.index.store(0, Ordering::SeqCst);
    }

    fn get_next_response(&self) -> String {
        if self.responses.is_empty() {
            return String::new();
        }
        let len = self.responses.len();
        let i = self
            .index
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % len))
            .unwrap_or_default();
        self.responses[i % len].clone()
    }
}

#[async_trait]
impl Runnable for FakeListChatModel {
    type Input = Value;
    type Output = Value;

    fn name(&self) -> Option<String> {
        Some("FakeListChatModel".to_string())
    }

    fn run_type(&self) -> RunType {
        RunType::ChatModel
    }

    async fn invoke(&self, input: Value, config: Option<RunnableConfig>) -> Result<Value> {
        call_with_config(self, input, config, |_input, _config, _run_manager| async move {
            if let Some(duration) = self.sleep {
                tokio::time::sleep(duration).await;
            }
            AIMessageChunk::new(self.get_next_response()).to_value()
        })
        .await
    }

    fn stream<'a>(
        &'a self,
        input: Value,
        config: Option<RunnableConfig>,
    ) -> BoxStream<'a, Result<Value>> {
        transform_stream_with_config(self, input, config, move |_input, _config, _run_manager| {
            let response = self.get_next_response();
            let sleep = self.sleep;
            let error_on_chunk = self.error_on_chunk_number;
            async_stream::try_stream! {
                for (index, c) in response.chars().enumerate() {
                    if let Some(duration) = sleep {
                        tokio::time::sleep(duration).await;
                    }
                    if error_on_chunk == Some(index) {
                        Err::<(), _>(Error::external(FakeListChatModelError))?;
                    }
                    yield AIMessageChunk::new(c.to_string()).to_value()?;
                }
            }
            .boxed()
        })
    }
}

/// Echoes its prompt back as a human turn.
///
/// A string prompt (or an object with a `"text"` field) becomes
/// `"Human: <text>"`. A list of messages becomes one `"<Role>: <content>"`
/// line per message.
#[derive(Debug, Clone, Default)]
pub struct ParrotFakeChatModel;

impl ParrotFakeChatModel {
    pub fn new() -> Self {
        Self
    }
}

fn role_prefix(message: &Value) -> &'static str {
    let role = message
        .get("role")
        .or_else(|| message.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("human");
    match role {
        "ai" | "assistant" | "AIMessageChunk" => "AI",
        "system" => "System",
        "tool" => "Tool",
        _ => "Human",
    }
}

fn render_prompt(input: &Value) -> Result<String> {
    match input {
        Value::String(text) => Ok(format!("Human: {text}")),
        Value::Object(object) => match object.get("text").and_then(Value::as_str) {
            Some(text) => Ok(format!("Human: {text}")),
            None => Err(Error::invalid_input(
                "prompt object must carry a string \"text\" field",
            )),
        },
        Value::Array(messages) => Ok(messages
            .iter()
            .map(|message| {
                let content = message
                    .get("content")
                    .and_then(Value::as_str)
                    .or_else(|| message.as_str())
                    .unwrap_or_default();
                format!("{}: {}", role_prefix(message), content)
            })
            .collect::<Vec<_>>()
            .join("\n")),
        other => Err(Error::invalid_input(format!(
            "cannot render a prompt from {}",
            crate::utils::stream::shape_name(other)
        ))),
    }
}

#[async_trait]
impl Runnable for ParrotFakeChatModel {
    type Input = Value;
    type Output = Value;

    fn name(&self) -> Option<String> {
        Some("ParrotFakeChatModel".to_string())
    }

    fn run_type(&self) -> RunType {
        RunType::ChatModel
    }

    async fn invoke(&self, input: Value, config: Option<RunnableConfig>) -> Result<Value> {
        call_with_config(self, input, config, |input, _config, _run_manager| async move {
            AIMessageChunk::new(render_prompt(&input)?).to_value()
        })
        .await
    }

    fn stream<'a>(
        &'a self,
        input: Value,
        config: Option<RunnableConfig>,
    ) -> BoxStream<'a, Result<Value>> {
        transform_stream_with_config(self, input, config, |input, _config, _run_manager| {
            async_stream::try_stream! {
                let text = render_prompt(&input)?;
                for word in text.split_inclusive(' ') {
                    yield AIMessageChunk::new(word).to_value()?;
                }
            }
            .boxed()
        })
    }
}
