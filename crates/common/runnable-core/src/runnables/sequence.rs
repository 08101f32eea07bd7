//! Sequential composition of runnables.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::{Error, Result};

use super::base::{
    DynRunnable, Runnable, RunnableLike, call_with_config, child_config, coerce_to_runnable,
    transform_stream_with_config,
};
use super::config::RunnableConfig;

fn step_tag(index: usize) -> String {
    format!("seq:step:{}", index + 1)
}

/// A chain of runnables where each step's output is the next step's input.
///
/// Streaming invokes every step but the last, then streams the last step.
/// Each nested sequence consumes one unit of the recursion budget.
#[derive(Clone)]
pub struct RunnableSequence {
    steps: Vec<DynRunnable<Value, Value>>,
    name: Option<String>,
}

impl Debug for RunnableSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableSequence")
            .field("steps", &self.steps.len())
            .field("name", &self.name)
            .finish()
    }
}

impl RunnableSequence {
    /// Create a sequence from at least two steps.
    pub fn new(steps: Vec<DynRunnable<Value, Value>>) -> Result<Self> {
        if steps.len() < 2 {
            return Err(Error::Construction(format!(
                "RunnableSequence must have at least 2 steps, got {}",
                steps.len()
            )));
        }
        Ok(Self { steps, name: None })
    }

    /// Create a sequence from runnables, functions or mappings.
    pub fn from_like(steps: impl IntoIterator<Item = RunnableLike>) -> Result<Self> {
        Self::new(steps.into_iter().map(coerce_to_runnable).collect())
    }

    pub(crate) fn from_pair(
        first: DynRunnable<Value, Value>,
        last: DynRunnable<Value, Value>,
    ) -> Self {
        Self {
            steps: vec![first, last],
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn steps(&self) -> &[DynRunnable<Value, Value>] {
        &self.steps
    }

    pub fn first(&self) -> &DynRunnable<Value, Value> {
        &self.steps[0]
    }

    pub fn last(&self) -> &DynRunnable<Value, Value> {
        &self.steps[self.steps.len() - 1]
    }

    /// Append a step, flattening into this sequence.
    pub fn pipe<R>(mut self, next: R) -> Self
    where
        R: Runnable<Input = Value, Output = Value> + 'static,
    {
        self.steps.push(Arc::new(next));
        self
    }

    /// Append every step of another sequence.
    pub fn extend(mut self, other: RunnableSequence) -> Self {
        self.steps.extend(other.steps);
        self
    }
}

#[async_trait]
impl Runnable for RunnableSequence {
    type Input = Value;
    type Output = Value;

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn invoke(&self, input: Value, config: Option<RunnableConfig>) -> Result<Value> {
        call_with_config(self, input, config, |input, config, run_manager| async move {
            let config = config.descend()?;
            let mut value = input;
            for (index, step) in self.steps.iter().enumerate() {
                config.ensure_not_cancelled()?;
                let step_config = child_config(&config, &run_manager, Some(&step_tag(index)));
                value = step.invoke(value, Some(step_config)).await?;
            }
            Ok(value)
        })
        .await
    }

    fn stream<'a>(
        &'a self,
        input: Value,
        config: Option<RunnableConfig>,
    ) -> BoxStream<'a, Result<Value>> {
        transform_stream_with_config(self, input, config, move |input, config, run_manager| {
            async_stream::try_stream! {
                let config = config.descend()?;
                let last = self.steps.len() - 1;
                let mut value = input;
                for (index, step) in self.steps[..last].iter().enumerate() {
                    config.ensure_not_cancelled()?;
                    let step_config = child_config(&config, &run_manager, Some(&step_tag(index)));
                    value = step.invoke(value, Some(step_config)).await?;
                }

                let last_config = child_config(&config, &run_manager, Some(&step_tag(last)));
                let mut chunks = self.steps[last].stream(value, Some(last_config));
                while let Some(chunk) = chunks.next().await {
                    yield chunk?;
                }
            }
            .boxed()
        })
    }
}
