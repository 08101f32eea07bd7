//! The `Runnable` trait and the leaf and wrapper runnables.
//!
//! Every run goes through [`call_with_config`] (single result) or
//! [`transform_stream_with_config`] (chunk stream). Both open a callback span,
//! race the work against the config's cancellation signal and deadline, and
//! close the span with exactly one end or error event.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value, json};

use crate::callbacks::CallbackManagerForChainRun;
use crate::error::{Error, Result};
use crate::tracers::schemas::RunType;
use crate::utils::stream::concat;

use super::config::{
    ConfigOrList, RunnableConfig, ensure_config, get_callback_manager_for_config,
    get_config_list, merge_configs, patch_config,
};
use super::fallbacks::RunnableWithFallbacks;
use super::parallel::RunnableParallel;
use super::retry::{RunnableRetry, RunnableRetryConfig};
use super::sequence::RunnableSequence;
use super::utils::{FirstError, gather_with_concurrency};

/// A unit of work that can be invoked, batched, streamed and composed.
///
/// Implementors provide [`Runnable::invoke`]; `batch` and `stream` have
/// defaults built on it. Runnables that produce output incrementally
/// override `stream`, and folding that stream with
/// [`concat`](crate::utils::stream::concat) must give the `invoke` result.
#[async_trait]
pub trait Runnable: Send + Sync + Debug {
    /// The input type for this Runnable.
    type Input: Send + Sync + Clone + Debug + Serialize + 'static;
    /// The output type for this Runnable.
    type Output: Send + Sync + Clone + Debug + Serialize + 'static;

    /// Get the name of this Runnable.
    fn get_name(&self, suffix: Option<&str>, name: Option<&str>) -> String {
        let name_ = name
            .map(|s| s.to_string())
            .or_else(|| self.name())
            .unwrap_or_else(|| self.type_name().to_string());

        match suffix {
            Some(s) if name_.chars().next().is_some_and(char::is_uppercase) => {
                format!("{}{}", name_, to_title_case(s))
            }
            Some(s) => format!("{}_{}", name_, s.to_lowercase()),
            None => name_,
        }
    }

    /// Get the optional name of this Runnable.
    fn name(&self) -> Option<String> {
        None
    }

    /// Get the type name of this Runnable, without module path or generics.
    fn type_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// The kind of run reported to callback handlers.
    fn run_type(&self) -> RunType {
        RunType::Chain
    }

    /// Identity of this Runnable as reported in `on_chain_start`.
    fn to_serialized(&self) -> Value {
        json!({
            "type": "not_implemented",
            "id": [self.type_name()],
            "name": self.get_name(None, None),
        })
    }

    /// Transform a single input into an output.
    async fn invoke(&self, input: Self::Input, config: Option<RunnableConfig>)
    -> Result<Self::Output>;

    /// Invoke once per input, returning outputs in input order.
    ///
    /// At most `max_concurrency` (from the first config) invocations run at a
    /// time. The first error by time cancels the outstanding invocations and
    /// is returned.
    async fn batch(
        &self,
        inputs: Vec<Self::Input>,
        config: Option<ConfigOrList>,
    ) -> Result<Vec<Self::Output>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let configs = get_config_list(config, inputs.len())?;
        let max_concurrency = configs[0].max_concurrency;
        let signals: Vec<_> = configs.iter().map(RunnableConfig::child_signal).collect();
        let first_error = FirstError::new(signals.clone());

        let futures: Vec<_> = inputs
            .into_iter()
            .zip(configs)
            .zip(signals)
            .map(|((input, config), signal)| {
                let config = patch_config().config(config).signal(signal).call();
                let first_error = &first_error;
                async move {
                    match self.invoke(input, Some(config)).await {
                        Ok(output) => Some(output),
                        Err(error) => {
                            first_error.record(error);
                            None
                        }
                    }
                }
            })
            .collect();

        let outputs = gather_with_concurrency(max_concurrency, futures).await;
        if let Some(error) = first_error.into_inner() {
            return Err(error);
        }
        Ok(outputs.into_iter().flatten().collect())
    }

    /// Invoke once per input, keeping each element's error in its slot.
    async fn batch_with_exceptions(
        &self,
        inputs: Vec<Self::Input>,
        config: Option<ConfigOrList>,
    ) -> Vec<Result<Self::Output>> {
        if inputs.is_empty() {
            return Vec::new();
        }

        let configs = match get_config_list(config, inputs.len()) {
            Ok(configs) => configs,
            Err(error) => {
                let message = match error {
                    Error::InvalidConfig(message) => message,
                    other => other.to_string(),
                };
                return inputs
                    .iter()
                    .map(|_| Err(Error::InvalidConfig(message.clone())))
                    .collect();
            }
        };
        let max_concurrency = configs[0].max_concurrency;

        let futures: Vec<_> = inputs
            .into_iter()
            .zip(configs)
            .map(|(input, config)| self.invoke(input, Some(config)))
            .collect();

        gather_with_concurrency(max_concurrency, futures).await
    }

    /// Stream output from a single input.
    ///
    /// The default invokes once and yields the whole result as one chunk.
    fn stream<'a>(
        &'a self,
        input: Self::Input,
        config: Option<RunnableConfig>,
    ) -> BoxStream<'a, Result<Self::Output>> {
        Box::pin(futures::stream::once(async move {
            self.invoke(input, config).await
        }))
    }

    /// Bind config to this Runnable, returning a new Runnable.
    fn with_config(self, config: RunnableConfig) -> RunnableBinding<Self>
    where
        Self: Sized,
    {
        RunnableBinding::new(self, config)
    }

    /// Chain this Runnable into `next`.
    fn pipe<R>(self, next: R) -> RunnableSequence
    where
        Self: Sized + Runnable<Input = Value, Output = Value> + 'static,
        R: Runnable<Input = Value, Output = Value> + 'static,
    {
        RunnableSequence::from_pair(Arc::new(self), Arc::new(next))
    }

    /// Create a new Runnable that retries on failure.
    fn with_retry(self, config: RunnableRetryConfig) -> RunnableRetry<Self>
    where
        Self: Sized,
    {
        RunnableRetry::new(self, config)
    }

    /// Create a new Runnable that tries `fallbacks` in order when this one
    /// fails.
    fn with_fallbacks(
        self,
        fallbacks: Vec<DynRunnable<Self::Input, Self::Output>>,
    ) -> RunnableWithFallbacks<Self::Input, Self::Output>
    where
        Self: Sized + 'static,
    {
        RunnableWithFallbacks::new(self, fallbacks)
    }

    /// Return a new Runnable that maps a list of inputs to a list of outputs.
    fn map(self) -> RunnableEach<Self>
    where
        Self: Sized,
    {
        RunnableEach::new(self)
    }
}

/// Convert a string to title case.
fn to_title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(c) => c.to_uppercase().chain(chars).collect(),
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Type alias for a boxed Runnable trait object.
pub type DynRunnable<I, O> = Arc<dyn Runnable<Input = I, Output = O> + Send + Sync>;

/// Box a Runnable into a [`DynRunnable`].
pub fn to_dyn<R>(runnable: R) -> DynRunnable<R::Input, R::Output>
where
    R: Runnable + 'static,
{
    Arc::new(runnable)
}

#[async_trait]
impl<R> Runnable for Arc<R>
where
    R: Runnable + ?Sized,
{
    type Input = R::Input;
    type Output = R::Output;

    fn get_name(&self, suffix: Option<&str>, name: Option<&str>) -> String {
        (**self).get_name(suffix, name)
    }

    fn name(&self) -> Option<String> {
        (**self).name()
    }

    fn type_name(&self) -> &'static str {
        (**self).type_name()
    }

    fn run_type(&self) -> RunType {
        (**self).run_type()
    }

    fn to_serialized(&self) -> Value {
        (**self).to_serialized()
    }

    async fn invoke(
        &self,
        input: Self::Input,
        config: Option<RunnableConfig>,
    ) -> Result<Self::Output> {
        (**self).invoke(input, config).await
    }

    async fn batch(
        &self,
        inputs: Vec<Self::Input>,
        config: Option<ConfigOrList>,
    ) -> Result<Vec<Self::Output>> {
        (**self).batch(inputs, config).await
    }

    async fn batch_with_exceptions(
        &self,
        inputs: Vec<Self::Input>,
        config: Option<ConfigOrList>,
    ) -> Vec<Result<Self::Output>> {
        (**self).batch_with_exceptions(inputs, config).await
    }

    fn stream<'a>(
        &'a self,
        input: Self::Input,
        config: Option<RunnableConfig>,
    ) -> BoxStream<'a, Result<Self::Output>> {
        (**self).stream(input, config)
    }
}

// =============================================================================
// Run lifecycle
// =============================================================================

fn start_run<R>(
    runnable: &R,
    config: &RunnableConfig,
    inputs: &Value,
) -> CallbackManagerForChainRun
where
    R: Runnable + ?Sized,
{
    let name = config
        .run_name
        .clone()
        .unwrap_or_else(|| runnable.get_name(None, None));
    get_callback_manager_for_config(config)
        .on_chain_start()
        .serialized(&runnable.to_serialized())
        .inputs(inputs)
        .maybe_run_id(config.run_id)
        .name(&name)
        .run_type(runnable.run_type())
        .call()
}

/// Prepare the config of a run that is about to start: resolve its timeout
/// and strip the fields that identify this run only.
fn enter_run(config: Option<RunnableConfig>) -> (RunnableConfig, RunnableConfig) {
    let mut config = ensure_config(config);
    config.resolve_timeout();
    let child = RunnableConfig {
        run_id: None,
        run_name: None,
        ..config.clone()
    };
    (config, child)
}

fn report_cancelled(run_manager: &CallbackManagerForChainRun) -> Error {
    tracing::debug!(
        target: "runnable_core::runnables",
        run_id = %run_manager.run_id(),
        "run cancelled"
    );
    let error = Error::Cancelled;
    run_manager.on_chain_error(&error);
    error
}

/// Run `func` inside a callback span for `runnable`.
///
/// `func` receives the input, the config for nested calls (timeout resolved,
/// run identity cleared) and the span's run manager. A fired signal or an
/// elapsed deadline ends the run with [`Error::Cancelled`]. Dropping the
/// returned future before it completes closes the span the same way.
pub async fn call_with_config<R, F, Fut>(
    runnable: &R,
    input: R::Input,
    config: Option<RunnableConfig>,
    func: F,
) -> Result<R::Output>
where
    R: Runnable + ?Sized,
    F: FnOnce(R::Input, RunnableConfig, CallbackManagerForChainRun) -> Fut,
    Fut: Future<Output = Result<R::Output>>,
{
    let (config, child_config) = enter_run(config);
    let inputs = serde_json::to_value(&input)?;
    let run_manager = start_run(runnable, &config, &inputs);
    let _guard = run_manager.guard();

    if config.is_cancelled() {
        return Err(report_cancelled(&run_manager));
    }

    let cancelled = config.cancelled();
    let result = tokio::select! {
        biased;
        _ = cancelled => Err(Error::Cancelled),
        result = func(input, child_config, run_manager.clone()) => result,
    };

    match result {
        Ok(output) => match serde_json::to_value(&output) {
            Ok(outputs) => {
                run_manager.on_chain_end(&outputs);
                Ok(output)
            }
            Err(error) => {
                let error = Error::from(error);
                run_manager.on_chain_error(&error);
                Err(error)
            }
        },
        Err(_) if config.is_cancelled() => Err(report_cancelled(&run_manager)),
        Err(error) => {
            run_manager.on_chain_error(&error);
            Err(error)
        }
    }
}

/// Stream the chunks of `producer` inside a callback span for `runnable`.
///
/// Every chunk is reported with `on_chain_stream`. The run's reported output
/// is the chunks folded with `concat`; if two chunks are not concatenable the
/// aggregate is dropped and the run ends with a `null` output while the
/// chunks themselves still reach the caller.
pub fn transform_stream_with_config<'a, R, F>(
    runnable: &'a R,
    input: R::Input,
    config: Option<RunnableConfig>,
    producer: F,
) -> BoxStream<'a, Result<R::Output>>
where
    R: Runnable + ?Sized,
    F: FnOnce(R::Input, RunnableConfig, CallbackManagerForChainRun) -> BoxStream<'a, Result<R::Output>>
        + Send
        + 'a,
{
    Box::pin(async_stream::stream! {
        let (config, child_config) = enter_run(config);
        let inputs = match serde_json::to_value(&input) {
            Ok(inputs) => inputs,
            Err(error) => {
                yield Err(Error::from(error));
                return;
            }
        };
        let run_manager = start_run(runnable, &config, &inputs);
        let _guard = run_manager.guard();

        if config.is_cancelled() {
            yield Err(report_cancelled(&run_manager));
            return;
        }

        let cancelled = config.cancelled();
        let mut cancelled = std::pin::pin!(cancelled);
        let mut chunks = producer(input, child_config, run_manager.clone());
        let mut aggregate: Option<Value> = None;
        let mut aggregate_dropped = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut cancelled => Some(Err(Error::Cancelled)),
                next = chunks.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let value = match serde_json::to_value(&chunk) {
                        Ok(value) => value,
                        Err(error) => {
                            let error = Error::from(error);
                            run_manager.on_chain_error(&error);
                            yield Err(error);
                            return;
                        }
                    };
                    run_manager.on_chain_stream(&value);
                    if !aggregate_dropped {
                        aggregate = match aggregate.take() {
                            None => Some(value),
                            Some(previous) => match concat(&previous, &value) {
                                Ok(merged) => Some(merged),
                                Err(error) => {
                                    tracing::debug!(
                                        target: "runnable_core::runnables",
                                        run_id = %run_manager.run_id(),
                                        %error,
                                        "dropping stream aggregate"
                                    );
                                    aggregate_dropped = true;
                                    None
                                }
                            },
                        };
                    }
                    yield Ok(chunk);
                }
                Some(Err(_)) if config.is_cancelled() => {
                    // Close nested runs before their parent.
                    drop(chunks);
                    yield Err(report_cancelled(&run_manager));
                    return;
                }
                Some(Err(error)) => {
                    drop(chunks);
                    run_manager.on_chain_error(&error);
                    yield Err(error);
                    return;
                }
                None => break,
            }
        }

        run_manager.on_chain_end(&aggregate.unwrap_or(Value::Null));
    })
}

/// Derive the config for a nested call from a run's config.
pub(crate) fn child_config(
    config: &RunnableConfig,
    run_manager: &CallbackManagerForChainRun,
    tag: Option<&str>,
) -> RunnableConfig {
    patch_config()
        .config(config.clone())
        .callbacks(run_manager.get_child(tag))
        .call()
}

// =============================================================================
// RunnableLambda
// =============================================================================

type LambdaFn<I, O> = Arc<dyn Fn(I, RunnableConfig) -> BoxFuture<'static, Result<O>> + Send + Sync>;

/// A Runnable that wraps a function.
///
/// The function may be sync or async and may take the config. Runnables
/// invoked with that config from inside the function are traced as children
/// of the lambda's run.
pub struct RunnableLambda<I, O> {
    func: LambdaFn<I, O>,
    name: Option<String>,
}

impl<I, O> Debug for RunnableLambda<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableLambda")
            .field("name", &self.name)
            .finish()
    }
}

impl<I, O> Clone for RunnableLambda<I, O> {
    fn clone(&self) -> Self {
        Self {
            func: self.func.clone(),
            name: self.name.clone(),
        }
    }
}

impl<I, O> RunnableLambda<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create from a sync function that only takes input.
    pub fn new(func: impl Fn(I) -> Result<O> + Send + Sync + 'static) -> Self {
        Self::from_fn(Arc::new(
            move |input: I, _config: RunnableConfig| -> BoxFuture<'static, Result<O>> {
                Box::pin(futures::future::ready(func(input)))
            },
        ))
    }

    /// Create from a sync function that takes input and config.
    pub fn new_with_config(
        func: impl Fn(I, &RunnableConfig) -> Result<O> + Send + Sync + 'static,
    ) -> Self {
        Self::from_fn(Arc::new(
            move |input: I, config: RunnableConfig| -> BoxFuture<'static, Result<O>> {
                Box::pin(futures::future::ready(func(input, &config)))
            },
        ))
    }

    /// Create from an async function that only takes input.
    pub fn new_async<F, Fut>(func: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        Self::from_fn(Arc::new(
            move |input: I, _config: RunnableConfig| -> BoxFuture<'static, Result<O>> {
                Box::pin(func(input))
            },
        ))
    }

    /// Create from an async function that takes input and config.
    pub fn new_async_with_config<F, Fut>(func: F) -> Self
    where
        F: Fn(I, RunnableConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        Self::from_fn(Arc::new(
            move |input: I, config: RunnableConfig| -> BoxFuture<'static, Result<O>> {
                Box::pin(func(input, config))
            },
        ))
    }

    fn from_fn(func: LambdaFn<I, O>) -> Self {
        Self { func, name: None }
    }

    /// Set a name for this runnable.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[async_trait]
impl<I, O> Runnable for RunnableLambda<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn invoke(&self, input: I, config: Option<RunnableConfig>) -> Result<O> {
        call_with_config(self, input, config, |input, config, run_manager| {
            (self.func)(input, child_config(&config, &run_manager, None))
        })
        .await
    }
}

// =============================================================================
// RunnableGenerator
// =============================================================================

type GeneratorFn =
    Arc<dyn Fn(Value, RunnableConfig) -> BoxStream<'static, Result<Value>> + Send + Sync>;

/// A Runnable whose native output is a stream of chunks.
///
/// `invoke` folds the stream with `concat`, starting from `null`.
pub struct RunnableGenerator {
    func: GeneratorFn,
    name: Option<String>,
}

impl Debug for RunnableGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableGenerator")
            .field("name", &self.name)
            .finish()
    }
}

impl RunnableGenerator {
    pub fn new<F, S>(func: F) -> Self
    where
        F: Fn(Value) -> S + Send + Sync + 'static,
        S: futures::Stream<Item = Result<Value>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |input: Value, _config: RunnableConfig| func(input).boxed()),
            name: None,
        }
    }

    pub fn new_with_config<F, S>(func: F) -> Self
    where
        F: Fn(Value, RunnableConfig) -> S + Send + Sync + 'static,
        S: futures::Stream<Item = Result<Value>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |input: Value, config: RunnableConfig| func(input, config).boxed()),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[async_trait]
impl Runnable for RunnableGenerator {
    type Input = Value;
    type Output = Value;

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn invoke(&self, input: Value, config: Option<RunnableConfig>) -> Result<Value> {
        let mut stream = self.stream(input, config);
        let mut output = Value::Null;
        while let Some(chunk) = stream.next().await {
            output = concat(&output, &chunk?)?;
        }
        Ok(output)
    }

    fn stream<'a>(
        &'a self,
        input: Value,
        config: Option<RunnableConfig>,
    ) -> BoxStream<'a, Result<Value>> {
        transform_stream_with_config(self, input, config, move |input, config, run_manager| {
            (self.func)(input, child_config(&config, &run_manager, None))
        })
    }
}

// =============================================================================
// RunnableBinding
// =============================================================================

/// A Runnable with config merged into every call.
#[derive(Debug, Clone)]
pub struct RunnableBinding<R> {
    bound: R,
    config: RunnableConfig,
}

impl<R> RunnableBinding<R>
where
    R: Runnable,
{
    pub fn new(bound: R, config: RunnableConfig) -> Self {
        Self { bound, config }
    }

    pub fn bound(&self) -> &R {
        &self.bound
    }

    pub fn config(&self) -> &RunnableConfig {
        &self.config
    }

    fn merged(&self, config: Option<RunnableConfig>) -> RunnableConfig {
        merge_configs(vec![Some(self.config.clone()), config])
    }
}

#[async_trait]
impl<R> Runnable for RunnableBinding<R>
where
    R: Runnable,
{
    type Input = R::Input;
    type Output = R::Output;

    fn name(&self) -> Option<String> {
        self.bound.name()
    }

    fn type_name(&self) -> &'static str {
        self.bound.type_name()
    }

    fn run_type(&self) -> RunType {
        self.bound.run_type()
    }

    async fn invoke(
        &self,
        input: Self::Input,
        config: Option<RunnableConfig>,
    ) -> Result<Self::Output> {
        self.bound.invoke(input, Some(self.merged(config))).await
    }

    fn stream<'a>(
        &'a self,
        input: Self::Input,
        config: Option<RunnableConfig>,
    ) -> BoxStream<'a, Result<Self::Output>> {
        self.bound.stream(input, Some(self.merged(config)))
    }
}

// =============================================================================
// RunnableEach
// =============================================================================

/// A Runnable that invokes the bound Runnable on every element of a list.
#[derive(Debug, Clone)]
pub struct RunnableEach<R> {
    bound: R,
}

impl<R> RunnableEach<R>
where
    R: Runnable,
{
    pub fn new(bound: R) -> Self {
        Self { bound }
    }
}

#[async_trait]
impl<R> Runnable for RunnableEach<R>
where
    R: Runnable,
{
    type Input = Vec<R::Input>;
    type Output = Vec<R::Output>;

    fn name(&self) -> Option<String> {
        Some(format!("RunnableEach<{}>", self.bound.get_name(None, None)))
    }

    async fn invoke(
        &self,
        inputs: Self::Input,
        config: Option<RunnableConfig>,
    ) -> Result<Self::Output> {
        call_with_config(self, inputs, config, |inputs, config, run_manager| async move {
            let configs: Vec<_> = inputs
                .iter()
                .map(|_| child_config(&config, &run_manager, None))
                .collect();
            self.bound
                .batch(inputs, Some(ConfigOrList::List(configs)))
                .await
        })
        .await
    }
}

// =============================================================================
// Coercion
// =============================================================================

/// Anything that can be normalized into a `Value -> Value` Runnable.
#[derive(Clone)]
pub enum RunnableLike {
    Runnable(DynRunnable<Value, Value>),
    Map(IndexMap<String, RunnableLike>),
}

impl Debug for RunnableLike {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnableLike::Runnable(runnable) => f.debug_tuple("Runnable").field(runnable).finish(),
            RunnableLike::Map(map) => f.debug_tuple("Map").field(&map.keys()).finish(),
        }
    }
}

impl RunnableLike {
    /// Wrap a plain function.
    pub fn func(func: impl Fn(Value) -> Result<Value> + Send + Sync + 'static) -> Self {
        RunnableLike::Runnable(Arc::new(RunnableLambda::new(func)))
    }

    pub fn runnable<R>(runnable: R) -> Self
    where
        R: Runnable<Input = Value, Output = Value> + 'static,
    {
        RunnableLike::Runnable(Arc::new(runnable))
    }

    pub fn map(entries: impl IntoIterator<Item = (impl Into<String>, RunnableLike)>) -> Self {
        RunnableLike::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<DynRunnable<Value, Value>> for RunnableLike {
    fn from(runnable: DynRunnable<Value, Value>) -> Self {
        RunnableLike::Runnable(runnable)
    }
}

impl From<IndexMap<String, RunnableLike>> for RunnableLike {
    fn from(map: IndexMap<String, RunnableLike>) -> Self {
        RunnableLike::Map(map)
    }
}

/// Normalize a [`RunnableLike`] into a Runnable. Mappings become a
/// [`RunnableParallel`].
pub fn coerce_to_runnable(like: RunnableLike) -> DynRunnable<Value, Value> {
    match like {
        RunnableLike::Runnable(runnable) => runnable,
        RunnableLike::Map(map) => Arc::new(RunnableParallel::from_map(map)),
    }
}
