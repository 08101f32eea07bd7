use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::runnables::{Runnable, RunnableConfig, call_with_config, transform_stream_with_config};
use crate::tracers::schemas::RunType;
use crate::utils::stream::shape_name;

/// Extracts the text of a model output.
///
/// Message chunks yield their `content`, generation chunks their `text`, and
/// strings pass through.
#[derive(Debug, Clone, Default)]
pub struct StrOutputParser {
    _private: (),
}

impl StrOutputParser {
    pub fn new() -> Self {
        Self { _private: () }
    }

    pub fn parse(&self, output: &Value) -> Result<String> {
        match output {
            Value::String(text) => Ok(text.clone()),
            Value::Object(object) => object
                .get("content")
                .or_else(|| object.get("text"))
                .or_else(|| object.get("message").and_then(|m| m.get("content")))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::invalid_input(format!("no text to parse in {}", shape_name(output)))
                }),
            other => Err(Error::invalid_input(format!(
                "cannot parse text from {}",
                shape_name(other)
            ))),
        }
    }
}

#[async_trait]
impl Runnable for StrOutputParser {
    type Input = Value;
    type Output = Value;

    fn run_type(&self) -> RunType {
        RunType::Parser
    }

    async fn invoke(&self, input: Value, config: Option<RunnableConfig>) -> Result<Value> {
        call_with_config(self, input, config, |input, _config, _run_manager| async move {
            self.parse(&input).map(Value::String)
        })
        .await
    }

    fn stream<'a>(
        &'a self,
        input: Value,
        config: Option<RunnableConfig>,
    ) -> BoxStream<'a, Result<Value>> {
        transform_stream_with_config(self, input, config, move |input, _config, _run_manager| {
            futures::stream::once(async move { self.parse(&input).map(Value::String) }).boxed()
        })
    }
}
