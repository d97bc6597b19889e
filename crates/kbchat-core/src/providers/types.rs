//! Provider-agnostic types for streaming generation

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::ProviderFault;

/// Message role in the conversation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Provider-agnostic chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Everything a provider needs to generate one answer.
///
/// Identical for every candidate; each provider shapes its own wire envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// System instruction with the grounding corpus already interpolated
    pub system: String,
    /// Prior turns in order, with the new user message last
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
}

/// Wire protocol spoken by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolKind {
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
    #[serde(rename = "native-gemini")]
    NativeGemini,
}

/// Incremental text fragments of one generation
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderFault>> + Send>>;

/// Trait that all LLM providers implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name, also used for attribution
    fn provider_name(&self) -> &str;

    /// Model identifier (e.g. "gemini-2.0-flash")
    fn model(&self) -> &str;

    /// Start a streaming generation.
    ///
    /// Faults before the first fragment are returned directly; faults after
    /// that arrive as an `Err` item in the stream.
    async fn stream_generate(&self, request: &GenerationRequest)
    -> Result<TextStream, ProviderFault>;
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAiCompatible => write!(f, "openai-compatible"),
            Self::NativeGemini => write!(f, "native-gemini"),
        }
    }
}

/// Turn a non-2xx response into a status fault
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderFault> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ProviderFault::status(status.as_u16(), &body))
}
