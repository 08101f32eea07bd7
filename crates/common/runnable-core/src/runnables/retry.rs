use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bon::bon;
use serde::{Deserialize, Serialize};

use crate::callbacks::CallbackManagerForChainRun;
use crate::error::{Error, Result};

use super::base::{Runnable, call_with_config, child_config};
use super::config::RunnableConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentialJitterParams {
    #[serde(default = "default_initial")]
    pub initial: f64,

    #[serde(default = "default_max")]
    pub max: f64,

    #[serde(default = "default_exp_base")]
    pub exp_base: f64,

    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_initial() -> f64 {
    1.0
}

fn default_max() -> f64 {
    60.0
}

fn default_exp_base() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    1.0
}

impl Default for ExponentialJitterParams {
    fn default() -> Self {
        Self {
            initial: default_initial(),
            max: default_max(),
            exp_base: default_exp_base(),
            jitter: default_jitter(),
        }
    }
}

#[bon]
impl ExponentialJitterParams {
    #[builder]
    pub fn new(
        #[builder(default = 1.0)] initial: f64,
        #[builder(default = 60.0)] max: f64,
        #[builder(default = 2.0)] exp_base: f64,
        #[builder(default = 1.0)] jitter: f64,
    ) -> Self {
        Self {
            initial,
            max,
            exp_base,
            jitter,
        }
    }

    /// Wait before retrying after failed attempt `attempt` (1-based):
    /// `initial * exp_base^(attempt - 1)`, capped at `max`, plus up to
    /// `jitter` seconds of random delay.
    pub fn calculate_wait(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let capped_wait = (self.initial * self.exp_base.powi(exponent)).min(self.max);
        let jitter_amount = if self.jitter > 0.0 {
            rand::random::<f64>() * self.jitter
        } else {
            0.0
        };
        Duration::try_from_secs_f64((capped_wait + jitter_amount).max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// Decides whether a failed attempt is retried.
///
/// Errors that are never retryable (see [`Error::is_retryable`]) are not
/// retried whatever the predicate says.
#[derive(Debug, Clone, Default)]
pub enum RetryErrorPredicate {
    #[default]
    All,
    Custom(fn(&Error) -> bool),
}

impl RetryErrorPredicate {
    pub fn should_retry(&self, error: &Error) -> bool {
        if !error.is_retryable() {
            return false;
        }
        match self {
            RetryErrorPredicate::All => true,
            RetryErrorPredicate::Custom(predicate) => predicate(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnableRetryConfig {
    pub retry_predicate: RetryErrorPredicate,

    pub wait_exponential_jitter: bool,

    pub exponential_jitter_params: Option<ExponentialJitterParams>,

    pub max_attempt_number: usize,
}

impl Default for RunnableRetryConfig {
    fn default() -> Self {
        Self {
            retry_predicate: RetryErrorPredicate::All,
            wait_exponential_jitter: true,
            exponential_jitter_params: None,
            max_attempt_number: 3,
        }
    }
}

#[bon]
impl RunnableRetryConfig {
    #[builder]
    pub fn new(
        #[builder(default)] retry_predicate: RetryErrorPredicate,
        #[builder(default = true)] wait_exponential_jitter: bool,
        exponential_jitter_params: Option<ExponentialJitterParams>,
        #[builder(default = 3)] max_attempt_number: usize,
    ) -> Self {
        Self {
            retry_predicate,
            wait_exponential_jitter,
            exponential_jitter_params,
            max_attempt_number,
        }
    }
}

/// Re-invokes the bound runnable until it succeeds, the error is not
/// retryable, or the attempts run out. Attempts after the first are traced
/// with the tag `retry:attempt:<n>`.
pub struct RunnableRetry<R>
where
    R: Runnable,
{
    bound: R,

    config: RunnableRetryConfig,
}

impl<R> Debug for RunnableRetry<R>
where
    R: Runnable,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableRetry")
            .field("bound", &self.bound)
            .field("max_attempt_number", &self.config.max_attempt_number)
            .field(
                "wait_exponential_jitter",
                &self.config.wait_exponential_jitter,
            )
            .finish()
    }
}

impl<R> RunnableRetry<R>
where
    R: Runnable,
{
    pub fn new(bound: R, config: RunnableRetryConfig) -> Self {
        Self { bound, config }
    }

    pub fn with_simple(bound: R, max_attempts: usize, wait_exponential_jitter: bool) -> Self {
        Self {
            bound,
            config: RunnableRetryConfig::builder()
                .max_attempt_number(max_attempts)
                .wait_exponential_jitter(wait_exponential_jitter)
                .build(),
        }
    }

    fn calculate_wait(&self, attempt: usize) -> Duration {
        if self.config.wait_exponential_jitter {
            self.config
                .exponential_jitter_params
                .clone()
                .unwrap_or_default()
                .calculate_wait(attempt)
        } else {
            Duration::ZERO
        }
    }

    fn config_for_attempt(
        config: &RunnableConfig,
        run_manager: &CallbackManagerForChainRun,
        attempt: usize,
    ) -> RunnableConfig {
        let tag = (attempt > 1).then(|| format!("retry:attempt:{attempt}"));
        child_config(config, run_manager, tag.as_deref())
    }
}

#[async_trait]
impl<R> Runnable for RunnableRetry<R>
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

    async fn invoke(
        &self,
        input: Self::Input,
        config: Option<RunnableConfig>,
    ) -> Result<Self::Output> {
        call_with_config(self, input, config, |input, config, run_manager| async move {
            let max_attempts = self.config.max_attempt_number.max(1);
            let mut attempt = 1;
            loop {
                let attempt_config = Self::config_for_attempt(&config, &run_manager, attempt);
                let error = match self.bound.invoke(input.clone(), Some(attempt_config)).await {
                    Ok(output) => return Ok(output),
                    Err(error) => error,
                };

                if attempt >= max_attempts || !self.config.retry_predicate.should_retry(&error) {
                    return Err(error);
                }

                let wait = self.calculate_wait(attempt);
                tracing::debug!(
                    target: "runnable_core::runnables",
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    %error,
                    "retrying after failed attempt"
                );
                if !wait.is_zero() {
                    tokio::select! {
                        _ = config.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                attempt += 1;
            }
        })
        .await
    }
}
