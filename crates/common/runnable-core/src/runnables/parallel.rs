//! Concurrent fan-out of one input to several named runnables.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::Result;

use super::base::{
    DynRunnable, Runnable, RunnableLike, call_with_config, child_config, coerce_to_runnable,
    transform_stream_with_config,
};
use super::config::{RunnableConfig, patch_config};
use super::utils::FirstError;

fn key_tag(key: &str) -> String {
    format!("map:key:{key}")
}

/// Runs every step on the same input concurrently and collects the outputs
/// into an object keyed like the steps.
///
/// The first failing step cancels its siblings. Streaming yields one
/// single-key object per chunk as soon as any step produces it.
#[derive(Clone, Default)]
pub struct RunnableParallel {
    steps: IndexMap<String, DynRunnable<Value, Value>>,
    name: Option<String>,
}

/// Alias for [`RunnableParallel`].
pub type RunnableMap = RunnableParallel;

impl Debug for RunnableParallel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableParallel")
            .field("keys", &self.steps.keys().collect::<Vec<_>>())
            .field("name", &self.name)
            .finish()
    }
}

impl RunnableParallel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: IndexMap<String, RunnableLike>) -> Self {
        Self {
            steps: map
                .into_iter()
                .map(|(key, like)| (key, coerce_to_runnable(like)))
                .collect(),
            name: None,
        }
    }

    /// Add a step under `key`, replacing any step already there.
    pub fn add<R>(mut self, key: impl Into<String>, runnable: R) -> Self
    where
        R: Runnable<Input = Value, Output = Value> + 'static,
    {
        self.steps.insert(key.into(), std::sync::Arc::new(runnable));
        self
    }

    pub fn add_like(mut self, key: impl Into<String>, like: RunnableLike) -> Self {
        self.steps.insert(key.into(), coerce_to_runnable(like));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn steps(&self) -> &IndexMap<String, DynRunnable<Value, Value>> {
        &self.steps
    }
}

#[async_trait]
impl Runnable for RunnableParallel {
    type Input = Value;
    type Output = Value;

    fn name(&self) -> Option<String> {
        self.name.clone().or_else(|| {
            let keys: Vec<_> = self.steps.keys().map(String::as_str).collect();
            Some(format!("RunnableParallel<{}>", keys.join(",")))
        })
    }

    async fn invoke(&self, input: Value, config: Option<RunnableConfig>) -> Result<Value> {
        call_with_config(self, input, config, |input, config, run_manager| async move {
            let config = config.descend()?;
            let signal = config.child_signal();
            let first_error = FirstError::new(vec![signal.clone()]);

            let futures = self.steps.iter().map(|(key, step)| {
                let step_config = patch_config()
                    .config(child_config(&config, &run_manager, Some(&key_tag(key))))
                    .signal(signal.clone())
                    .call();
                let input = input.clone();
                let first_error = &first_error;
                async move {
                    match step.invoke(input, Some(step_config)).await {
                        Ok(output) => Some((key.clone(), output)),
                        Err(error) => {
                            first_error.record(error);
                            None
                        }
                    }
                }
            });
            let outputs = futures::future::join_all(futures).await;

            if let Some(error) = first_error.into_inner() {
                return Err(error);
            }
            Ok(Value::Object(outputs.into_iter().flatten().collect::<Map<_, _>>()))
        })
        .await
    }

    fn stream<'a>(
        &'a self,
        input: Value,
        config: Option<RunnableConfig>,
    ) -> BoxStream<'a, Result<Value>> {
        transform_stream_with_config(self, input, config, move |input, config, run_manager| {
            Box::pin(async_stream::stream! {
                let config = match config.descend() {
                    Ok(config) => config,
                    Err(error) => {
                        yield Err(error);
                        return;
                    }
                };
                let signal = config.child_signal();

                let streams: Vec<_> = self
                    .steps
                    .iter()
                    .map(|(key, step)| {
                        let step_config = patch_config()
                            .config(child_config(&config, &run_manager, Some(&key_tag(key))))
                            .signal(signal.clone())
                            .call();
                        step.stream(input.clone(), Some(step_config))
                            .map(move |chunk| {
                                chunk.map(|chunk| {
                                    let mut object = Map::new();
                                    object.insert(key.clone(), chunk);
                                    Value::Object(object)
                                })
                            })
                            .boxed()
                    })
                    .collect();

                let mut merged = futures::stream::select_all(streams);
                while let Some(chunk) = merged.next().await {
                    match chunk {
                        Ok(chunk) => yield Ok(chunk),
                        Err(error) => {
                            signal.cancel();
                            // Let the siblings observe the signal and close their runs.
                            while merged.next().await.is_some() {}
                            yield Err(error);
                            return;
                        }
                    }
                }
            })
        })
    }
}
