//! Generation chunks: the mergeable output increments of text and chat models.

mod chat_generation;
mod generation;

pub use chat_generation::{CHAT_GENERATION_CHUNK_TYPE, ChatGenerationChunk};
pub use generation::{GENERATION_CHUNK_TYPE, GenerationChunk};
