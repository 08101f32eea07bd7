//! Conditional routing: the first matching condition picks the runnable to run.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::callbacks::CallbackManagerForChainRun;
use crate::error::{Error, Result};

use super::base::{
    DynRunnable, Runnable, RunnableLambda, call_with_config, child_config,
    transform_stream_with_config,
};
use super::config::RunnableConfig;

type ConditionPair<I, O> = (DynRunnable<I, bool>, DynRunnable<I, O>);

/// Runs the action of the first condition that holds, or the default.
///
/// Conditions are evaluated in order on the same input and each one is
/// traced as `condition:<i>`; the chosen action is traced as `branch:<i>` or
/// `branch:default`.
pub struct RunnableBranch<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    branches: Vec<ConditionPair<I, O>>,
    default: DynRunnable<I, O>,
    name: Option<String>,
}

impl<I, O> Debug for RunnableBranch<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableBranch")
            .field("branches_count", &self.branches.len())
            .field("name", &self.name)
            .finish()
    }
}

#[bon::bon]
impl<I, O> RunnableBranch<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    #[builder]
    pub fn new(
        branches: Vec<ConditionPair<I, O>>,
        default: DynRunnable<I, O>,
        #[builder(into)] name: Option<String>,
    ) -> Result<Self> {
        if branches.is_empty() {
            return Err(Error::Construction(
                "RunnableBranch requires at least one condition branch".to_string(),
            ));
        }

        Ok(Self {
            branches,
            default,
            name,
        })
    }
}

impl<I, O> RunnableBranch<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    /// Evaluate conditions in order and return the action to run with its
    /// child config.
    async fn select(
        &self,
        input: &I,
        config: &RunnableConfig,
        run_manager: &CallbackManagerForChainRun,
    ) -> Result<(&DynRunnable<I, O>, RunnableConfig)> {
        for (index, (condition, action)) in self.branches.iter().enumerate() {
            config.ensure_not_cancelled()?;
            let condition_config = child_config(
                config,
                run_manager,
                Some(&format!("condition:{}", index + 1)),
            );
            if condition.invoke(input.clone(), Some(condition_config)).await? {
                let action_config = child_config(
                    config,
                    run_manager,
                    Some(&format!("branch:{}", index + 1)),
                );
                return Ok((action, action_config));
            }
        }
        Ok((
            &self.default,
            child_config(config, run_manager, Some("branch:default")),
        ))
    }
}

pub struct RunnableBranchFluentBuilder<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    branches: Vec<ConditionPair<I, O>>,
}

impl<I, O> RunnableBranchFluentBuilder<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    pub fn new() -> Self {
        Self {
            branches: Vec::new(),
        }
    }

    pub fn branch<CF, RF>(mut self, condition: CF, runnable: RF) -> Self
    where
        CF: Fn(I) -> Result<bool> + Send + Sync + 'static,
        RF: Fn(I) -> Result<O> + Send + Sync + 'static,
    {
        let condition_runnable: DynRunnable<I, bool> = Arc::new(RunnableLambda::new(condition));
        let branch_runnable: DynRunnable<I, O> = Arc::new(RunnableLambda::new(runnable));
        self.branches.push((condition_runnable, branch_runnable));
        self
    }

    pub fn branch_arc(
        mut self,
        condition: DynRunnable<I, bool>,
        runnable: DynRunnable<I, O>,
    ) -> Self {
        self.branches.push((condition, runnable));
        self
    }

    pub fn default<DF>(self, default_fn: DF) -> Result<RunnableBranch<I, O>>
    where
        DF: Fn(I) -> Result<O> + Send + Sync + 'static,
    {
        let default_runnable: DynRunnable<I, O> = Arc::new(RunnableLambda::new(default_fn));
        self.default_arc(default_runnable)
    }

    pub fn default_arc(self, default: DynRunnable<I, O>) -> Result<RunnableBranch<I, O>> {
        RunnableBranch::builder()
            .branches(self.branches)
            .default(default)
            .build()
    }
}

impl<I, O> Default for RunnableBranchFluentBuilder<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<I, O> Runnable for RunnableBranch<I, O>
where
    I: Send + Sync + Clone + Debug + Serialize + 'static,
    O: Send + Sync + Clone + Debug + Serialize + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> Option<String> {
        self.name
            .clone()
            .or_else(|| Some("RunnableBranch".to_string()))
    }

    async fn invoke(&self, input: Self::Input, config: Option<RunnableConfig>) -> Result<O> {
        call_with_config(self, input, config, |input, config, run_manager| async move {
            let (action, action_config) = self.select(&input, &config, &run_manager).await?;
            action.invoke(input, Some(action_config)).await
        })
        .await
    }

    // The reported output of a streamed branch is the concatenation of its
    // chunks and is reported as null when they do not concatenate.
    fn stream<'a>(
        &'a self,
        input: Self::Input,
        config: Option<RunnableConfig>,
    ) -> BoxStream<'a, Result<O>> {
        transform_stream_with_config(self, input, config, move |input, config, run_manager| {
            async_stream::try_stream! {
                let (action, action_config) = self.select(&input, &config, &run_manager).await?;
                let mut chunks = action.stream(input, Some(action_config));
                while let Some(chunk) = chunks.next().await {
                    yield chunk?;
                }
            }
            .boxed()
        })
    }
}
