//! kbchat-core - Answer questions from a shared knowledge base
//!
//! This crate provides:
//! - Streaming clients for Google Gemini and OpenAI-compatible endpoints
//! - A provider registry built from a fixed priority table and available credentials
//! - A waterfall router that fails over sequentially until one provider answers
//! - Per-session conversation state with rollback on failure and cancellation

pub mod conversation;
pub mod credentials;
pub mod error;
pub mod prompt;
pub mod providers;
pub mod session;
pub mod sse;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types for convenience
pub use conversation::{Conversation, Turn};
pub use credentials::{CredentialSource, EnvVars, Layered, SecretsFile};
pub use error::{FaultKind, ProviderFault, RouterError, SkipReason};
pub use prompt::{NOT_IN_DOCUMENTS, grounding_instruction, welcome_message};
pub use providers::{
    Answer, AnswerObserver, ModelRouter, ProviderRegistry, ProviderSpec, RouterConfig,
    default_table,
};
pub use session::{RegistrySource, Session};
