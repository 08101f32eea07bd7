//! Runnable Core - composable units of work over traced runs.
//!
//! This crate provides:
//! - The [`Runnable`] trait with `invoke`, `batch` and `stream`
//! - Sequence, Map and Branch combinators plus passthrough, retry and fallbacks
//! - A configuration record that flows down the run tree ([`RunnableConfig`])
//! - Callback managers that report every run's start, stream, end and error
//! - A run-log stream of JSON patches ([`tracers::stream_log`])
//! - Deterministic fake chat models and a string output parser for tests
//!
//! # Architecture
//!
//! - **Runnables layer** ([`runnables`]): the trait, the leaves and the combinators
//! - **Callbacks layer** ([`callbacks`]): handlers and the managers that dispatch to them
//! - **Tracers layer** ([`tracers`]): run collection and log streaming
//! - **Chunk layer** ([`messages`], [`outputs`], [`utils`]): mergeable stream chunks and `concat`

pub mod callbacks;
pub mod error;
pub mod language_models;
pub mod messages;
pub mod output_parsers;
pub mod outputs;
pub mod runnables;
pub mod tracers;
pub mod utils;

// Re-export error types
pub use error::{Error, Result};

// Re-export runnable types
pub use runnables::{
    DynRunnable, Runnable, RunnableAssign, RunnableBinding, RunnableBranch, RunnableConfig,
    RunnableEach, RunnableGenerator, RunnableLambda, RunnableLike, RunnableMap, RunnableParallel,
    RunnablePassthrough, RunnablePick, RunnableRetry, RunnableSequence, RunnableWithFallbacks,
};

// Re-export callback types
pub use callbacks::{BaseCallbackHandler, CallbackManager, CallbackManagerForChainRun, Callbacks};

// Re-export tracer types
pub use tracers::{
    LogStreamConfig, RunCollectorCallbackHandler, RunLog, RunLogPatch, RunType, StreamEvent,
    stream_events, stream_log,
};

// Re-export chunk types
pub use messages::AIMessageChunk;
pub use outputs::{ChatGenerationChunk, GenerationChunk};
pub use utils::{concat, concat_all};

// Re-export test models and parsers
pub use language_models::{FakeListChatModel, ParrotFakeChatModel};
pub use output_parsers::StrOutputParser;
