// LLM abstraction layer

pub mod google;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod selector;
pub mod stream;

pub use provider::{ChunkStream, HttpOptions, LLMAdapter};
pub use selector::{
    AvailableProviders, ChatModel, ProviderKind, ProviderOverrides, ProviderSelector,
    ProviderSnapshot, ToolCapabilities,
};
