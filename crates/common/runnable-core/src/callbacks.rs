//! Callback handlers and the managers that dispatch run lifecycle events.
//!
//! Every runnable invocation produces exactly one `on_chain_start` followed
//! by zero or more `on_chain_stream` events and exactly one of
//! `on_chain_end` / `on_chain_error`. Child runs receive a manager derived
//! from their parent's run manager, so handlers observe a tree keyed by
//! `run_id` / `parent_run_id`.

pub mod base;
pub mod manager;

pub use base::{
    ArcCallbackHandler, BaseCallbackHandler, CallbackManagerMixin, Callbacks, ChainManagerMixin,
};

pub use manager::{CallbackManager, CallbackManagerForChainRun, RunGuard, handle_event};
