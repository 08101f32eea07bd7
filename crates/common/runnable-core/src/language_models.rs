mod fake;

pub use fake::{FakeListChatModel, FakeListChatModelError, ParrotFakeChatModel};
