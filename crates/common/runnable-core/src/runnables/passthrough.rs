//! Identity-like runnables for shaping object inputs.
//!
//! - `RunnablePassthrough`: returns its input, optionally observing it first.
//! - `RunnableAssign`: merges the outputs of a `RunnableParallel` into an object input.
//! - `RunnablePick`: selects one or several keys from an object input.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::utils::stream::shape_name;

use super::base::{
    Runnable, RunnableLike, call_with_config, child_config, transform_stream_with_config,
};
use super::config::RunnableConfig;
use super::parallel::RunnableParallel;

type PassthroughFunc<I> =
    Arc<dyn Fn(I, RunnableConfig) -> BoxFuture<'static, ()> + Send + Sync>;

/// A Runnable that returns its input unchanged.
///
/// An optional function observes the input (and the config) before it is
/// passed through; its result is ignored.
pub struct RunnablePassthrough<I> {
    name: Option<String>,
    func: Option<PassthroughFunc<I>>,
}

impl<I> Debug for RunnablePassthrough<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnablePassthrough")
            .field("name", &self.name)
            .field("has_func", &self.func.is_some())
            .finish()
    }
}

impl<I> Clone for RunnablePassthrough<I> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: self.func.clone(),
        }
    }
}

impl<I> Default for RunnablePassthrough<I> {
    fn default() -> Self {
        Self {
            name: None,
            func: None,
        }
    }
}

impl<I> RunnablePassthrough<I>
where
    I: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `func` with the input before passing it through.
    pub fn with_func<F>(func: F) -> Self
    where
        F: Fn(&I, &RunnableConfig) + Send + Sync + 'static,
    {
        Self {
            name: None,
            func: Some(Arc::new(
                move |input: I, config: RunnableConfig| -> BoxFuture<'static, ()> {
                    func(&input, &config);
                    Box::pin(futures::future::ready(()))
                },
            )),
        }
    }

    /// Await `afunc` with the input before passing it through.
    pub fn with_afunc<F, Fut>(afunc: F) -> Self
    where
        F: Fn(I, RunnableConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: None,
            func: Some(Arc::new(
                move |input: I, config: RunnableConfig| -> BoxFuture<'static, ()> {
                    Box::pin(afunc(input, config))
                },
            )),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl RunnablePassthrough<Value> {
    /// Merge the outputs of `mapper` into the object input.
    pub fn assign(mapper: RunnableParallel) -> RunnableAssign {
        RunnableAssign::new(mapper)
    }
}

#[async_trait]
impl<I> Runnable for RunnablePassthrough<I>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
{
    type Input = I;
    type Output = I;

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn invoke(&self, input: I, config: Option<RunnableConfig>) -> Result<I> {
        call_with_config(self, input, config, |input, config, run_manager| async move {
            if let Some(func) = &self.func {
                func(input.clone(), child_config(&config, &run_manager, None)).await;
            }
            Ok(input)
        })
        .await
    }
}

fn expect_object<'v>(input: &'v Value, runnable: &str) -> Result<&'v Map<String, Value>> {
    input.as_object().ok_or_else(|| {
        Error::invalid_input(format!(
            "{runnable} expects an object input, got {}",
            shape_name(input)
        ))
    })
}

/// Runs a mapper on an object input and merges its outputs into a copy of
/// that input. Mapper keys overwrite input keys.
///
/// Streaming first yields the input without the keys the mapper produces,
/// then the mapper's chunks, so folding the chunks gives the `invoke` result.
#[derive(Debug, Clone)]
pub struct RunnableAssign {
    mapper: RunnableParallel,
    name: Option<String>,
}

impl RunnableAssign {
    pub fn new(mapper: RunnableParallel) -> Self {
        Self { mapper, name: None }
    }

    /// Create from key/runnable-like pairs.
    pub fn from_like(entries: impl IntoIterator<Item = (impl Into<String>, RunnableLike)>) -> Self {
        let mapper = entries
            .into_iter()
            .fold(RunnableParallel::new(), |mapper, (key, like)| {
                mapper.add_like(key, like)
            });
        Self::new(mapper)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn mapper(&self) -> &RunnableParallel {
        &self.mapper
    }
}

#[async_trait]
impl Runnable for RunnableAssign {
    type Input = Value;
    type Output = Value;

    fn name(&self) -> Option<String> {
        self.name.clone().or_else(|| {
            let keys: Vec<_> = self.mapper.steps().keys().map(String::as_str).collect();
            Some(format!("RunnableAssign<{}>", keys.join(",")))
        })
    }

    async fn invoke(&self, input: Value, config: Option<RunnableConfig>) -> Result<Value> {
        call_with_config(self, input, config, |input, config, run_manager| async move {
            let mut merged = expect_object(&input, "RunnableAssign")?.clone();
            let mapper_config = child_config(&config, &run_manager, None);
            let outputs = self.mapper.invoke(input, Some(mapper_config)).await?;
            if let Value::Object(outputs) = outputs {
                merged.extend(outputs);
            }
            Ok(Value::Object(merged))
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
                let passthrough: Map<String, Value> = expect_object(&input, "RunnableAssign")?
                    .iter()
                    .filter(|(key, _)| !self.mapper.steps().contains_key(*key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                if !passthrough.is_empty() {
                    yield Value::Object(passthrough);
                }

                let mapper_config = child_config(&config, &run_manager, None);
                let mut chunks = self.mapper.stream(input, Some(mapper_config));
                while let Some(chunk) = chunks.next().await {
                    yield chunk?;
                }
            }
            .boxed()
        })
    }
}

/// Keys selected by a [`RunnablePick`].
#[derive(Debug, Clone)]
pub enum PickKeys {
    Single(String),
    Multiple(Vec<String>),
}

/// Selects keys from an object input.
///
/// A single key yields its value (`null` when absent); several keys yield an
/// object of the keys that are present.
#[derive(Debug, Clone)]
pub struct RunnablePick {
    keys: PickKeys,
    name: Option<String>,
}

impl RunnablePick {
    pub fn new_single(key: impl Into<String>) -> Self {
        Self {
            keys: PickKeys::Single(key.into()),
            name: None,
        }
    }

    pub fn new_multi(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keys: PickKeys::Multiple(keys.into_iter().map(Into::into).collect()),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn pick(&self, input: &Value) -> Result<Value> {
        let object = expect_object(input, "RunnablePick")?;
        Ok(match &self.keys {
            PickKeys::Single(key) => object.get(key).cloned().unwrap_or(Value::Null),
            PickKeys::Multiple(keys) => Value::Object(
                keys.iter()
                    .filter_map(|key| object.get(key).map(|value| (key.clone(), value.clone())))
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl Runnable for RunnablePick {
    type Input = Value;
    type Output = Value;

    fn name(&self) -> Option<String> {
        self.name.clone().or_else(|| {
            let keys = match &self.keys {
                PickKeys::Single(key) => key.clone(),
                PickKeys::Multiple(keys) => keys.join(","),
            };
            Some(format!("RunnablePick<{keys}>"))
        })
    }

    async fn invoke(&self, input: Value, config: Option<RunnableConfig>) -> Result<Value> {
        call_with_config(self, input, config, |input, _config, _run_manager| async move {
            self.pick(&input)
        })
        .await
    }
}
