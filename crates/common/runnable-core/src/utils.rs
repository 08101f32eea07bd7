//! Utilities shared across the crate.

pub mod stream;
pub mod uuid;

pub use stream::{concat, concat_all, shape_name};
pub use uuid::uuid7;
