//! Multi-provider LLM abstraction layer
//!
//! Supports Google Gemini natively and any OpenAI-compatible endpoint.
//! Providers implement the [`LlmProvider`] trait, are discovered from the
//! priority table by [`ProviderRegistry`], and are composed via [`ModelRouter`]
//! for sequential failover.

pub mod google;
pub mod openai_compat;
pub mod registry;
pub mod router;
pub mod types;

pub use registry::{ProviderDescriptor, ProviderRegistry, ProviderSpec, build_provider, default_table};
pub use router::{Answer, AnswerObserver, ModelRouter, RouterConfig};
pub use types::{ChatMessage, ChatRole, GenerationRequest, LlmProvider, ProtocolKind, TextStream};
