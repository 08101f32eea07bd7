//! Runnables: units of work that can be invoked, batched, streamed and
//! composed.
//!
//! Composition happens through [`Runnable::pipe`] (a [`RunnableSequence`]),
//! [`RunnableParallel`] (the Map combinator) and [`RunnableBranch`].
//! Configuration flows down the run tree as a [`RunnableConfig`] that each
//! combinator patches for its children.

pub mod base;
pub mod branch;
pub mod config;
pub mod fallbacks;
pub mod parallel;
pub mod passthrough;
pub mod retry;
pub mod sequence;
pub mod utils;

pub use base::{
    DynRunnable, Runnable, RunnableBinding, RunnableEach, RunnableGenerator, RunnableLambda,
    RunnableLike, call_with_config, coerce_to_runnable, to_dyn, transform_stream_with_config,
};
pub use branch::{RunnableBranch, RunnableBranchFluentBuilder};
pub use config::{
    ConfigOrList, DEFAULT_RECURSION_LIMIT, RunnableConfig, ensure_config,
    get_callback_manager_for_config, get_config_list, merge_configs, patch_config,
};
pub use fallbacks::{ExceptionInserter, FallbackErrorPredicate, RunnableWithFallbacks};
pub use parallel::{RunnableMap, RunnableParallel};
pub use passthrough::{PickKeys, RunnableAssign, RunnablePassthrough, RunnablePick};
pub use retry::{ExponentialJitterParams, RetryErrorPredicate, RunnableRetry, RunnableRetryConfig};
pub use sequence::RunnableSequence;
pub use utils::{FirstError, gather_with_concurrency};
