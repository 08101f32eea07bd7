use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;

use bon::bon;

use crate::error::{Error, Result};

use super::base::{
    DynRunnable, Runnable, call_with_config, child_config, transform_stream_with_config,
};
use super::config::RunnableConfig;

pub type FallbackErrorPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

pub type ExceptionInserter<I> = Arc<dyn Fn(&I, &str, &Error) -> I + Send + Sync>;

/// Tries the primary runnable, then each fallback in order, until one
/// succeeds. When all fail the primary's error is returned.
///
/// Cancellation is never handled by a fallback. A streamed run falls back
/// only while no chunk has been produced yet.
pub struct RunnableWithFallbacks<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    pub runnable: DynRunnable<I, O>,
    pub fallbacks: Vec<DynRunnable<I, O>>,
    pub error_predicate: Option<FallbackErrorPredicate>,
    pub exception_key: Option<String>,
    exception_inserter: Option<ExceptionInserter<I>>,
    name: Option<String>,
}

impl<I, O> Debug for RunnableWithFallbacks<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableWithFallbacks")
            .field("runnable", &self.runnable)
            .field("fallbacks_count", &self.fallbacks.len())
            .field(
                "error_predicate",
                &self.error_predicate.as_ref().map(|_| "..."),
            )
            .field("exception_key", &self.exception_key)
            .field("name", &self.name)
            .finish()
    }
}

#[bon]
impl<I, O> RunnableWithFallbacks<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    pub fn new<R>(runnable: R, fallbacks: Vec<DynRunnable<I, O>>) -> Self
    where
        R: Runnable<Input = I, Output = O> + 'static,
    {
        Self::from_dyn()
            .runnable(Arc::new(runnable) as DynRunnable<I, O>)
            .fallbacks(fallbacks)
            .call()
    }

    #[builder]
    pub fn from_dyn(
        runnable: DynRunnable<I, O>,
        fallbacks: Vec<DynRunnable<I, O>>,
        error_predicate: Option<FallbackErrorPredicate>,
        exception_key: Option<String>,
        exception_inserter: Option<ExceptionInserter<I>>,
        name: Option<String>,
    ) -> Self {
        Self {
            runnable,
            fallbacks,
            error_predicate,
            exception_key,
            exception_inserter,
            name,
        }
    }

    pub fn runnables(&self) -> impl Iterator<Item = &DynRunnable<I, O>> {
        std::iter::once(&self.runnable).chain(self.fallbacks.iter())
    }

    fn should_fallback(&self, error: &Error) -> bool {
        if error.is_cancelled() {
            return false;
        }
        match &self.error_predicate {
            Some(predicate) => predicate(error),
            None => true,
        }
    }

    /// The input for the next attempt, with the last error inserted when an
    /// exception key is configured.
    fn next_input(&self, input: &I, last_error: Option<&Error>) -> I {
        match (&self.exception_key, &self.exception_inserter, last_error) {
            (Some(key), Some(inserter), Some(error)) => inserter(input, key, error),
            _ => input.clone(),
        }
    }
}

impl<O> RunnableWithFallbacks<Value, O>
where
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    /// Pass the previous error message to fallbacks under `key` of an object
    /// input.
    pub fn with_exception_key(mut self, key: impl Into<String>) -> Self {
        self.exception_key = Some(key.into());
        self.exception_inserter = Some(Arc::new(|input: &Value, key: &str, error: &Error| {
            let mut input = input.clone();
            if let Value::Object(object) = &mut input {
                object.insert(key.to_string(), Value::String(error.to_string()));
            }
            input
        }));
        self
    }
}

#[async_trait]
impl<I, O> Runnable for RunnableWithFallbacks<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn invoke(&self, input: Self::Input, config: Option<RunnableConfig>) -> Result<O> {
        call_with_config(self, input, config, |input, config, run_manager| async move {
            let mut first_error: Option<Error> = None;
            let mut last_message: Option<Error> = None;

            for runnable in self.runnables() {
                config.ensure_not_cancelled()?;
                let attempt_input = self.next_input(&input, last_message.as_ref());
                let attempt_config = child_config(&config, &run_manager, None);
                match runnable.invoke(attempt_input, Some(attempt_config)).await {
                    Ok(output) => return Ok(output),
                    Err(error) if !self.should_fallback(&error) => return Err(error),
                    Err(error) => {
                        last_message = Some(Error::other(error.to_string()));
                        first_error.get_or_insert(error);
                    }
                }
            }

            Err(first_error.unwrap_or_else(|| Error::other("No runnables to try")))
        })
        .await
    }

    fn stream<'a>(
        &'a self,
        input: Self::Input,
        config: Option<RunnableConfig>,
    ) -> BoxStream<'a, Result<O>> {
        transform_stream_with_config(self, input, config, move |input, config, run_manager| {
            Box::pin(async_stream::stream! {
                let mut first_error: Option<Error> = None;
                let mut last_message: Option<Error> = None;

                for runnable in self.runnables() {
                    if let Err(error) = config.ensure_not_cancelled() {
                        yield Err(error);
                        return;
                    }
                    let attempt_input = self.next_input(&input, last_message.as_ref());
                    let attempt_config = child_config(&config, &run_manager, None);
                    let mut chunks = runnable.stream(attempt_input, Some(attempt_config));

                    match chunks.next().await {
                        Some(Err(error)) if self.should_fallback(&error) => {
                            last_message = Some(Error::other(error.to_string()));
                            first_error.get_or_insert(error);
                            continue;
                        }
                        Some(first) => {
                            yield first;
                            while let Some(chunk) = chunks.next().await {
                                yield chunk;
                            }
                            return;
                        }
                        None => return,
                    }
                }

                yield Err(first_error.unwrap_or_else(|| Error::other("No runnables to try")));
            })
        })
    }
}
