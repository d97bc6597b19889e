//! OpenAI-compatible streaming provider (Groq, Cerebras, OpenRouter, Mistral, ...)
//!
//! Speaks the chat-completions wire format against a configurable base URL.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderFault;
use crate::sse;

use super::types::{ChatRole, GenerationRequest, LlmProvider, TextStream, ensure_success};

/// Payload that terminates an OpenAI-style stream
const DONE_MARKER: &str = "[DONE]";

/// OpenAI-compatible provider
pub struct OpenAiCompatProvider {
    client: Client,
    name: String,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// - `name`: attribution label (e.g. "groq", "openrouter")
    /// - `base_url`: the versioned endpoint root (e.g. `https://api.groq.com/openai/v1`)
    pub fn new(name: String, api_key: String, model: String, base_url: String, client: Client) -> Self {
        Self {
            client,
            name,
            api_key,
            base_url,
            model,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// System instruction first, then the conversation in order
    fn to_openai_messages(request: &GenerationRequest) -> Vec<OpenAiMessage<'_>> {
        let mut result = Vec::with_capacity(request.messages.len() + 1);
        result.push(OpenAiMessage {
            role: "system",
            content: &request.system,
        });
        for msg in &request.messages {
            result.push(OpenAiMessage {
                role: match msg.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                content: &msg.content,
            });
        }
        result
    }

    fn build_body(&self, request: &GenerationRequest) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_openai_messages(request),
            "stream": true,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_output_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        body
    }
}

/// Decode one SSE payload into its text delta, if any
fn parse_chunk(data: &str) -> Result<Option<String>, ProviderFault> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| ProviderFault::Malformed(format!("{}: {}", e, data)))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ProviderFault::Upstream(message));
    }

    Ok(value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<TextStream, ProviderFault> {
        let body = self.build_body(request);

        debug!(
            "{} request: model={}, messages={}",
            self.name,
            self.model,
            request.messages.len() + 1
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let mut events = Box::pin(sse::data_stream(response));
        let fragments = async_stream::stream! {
            while let Some(event) = events.next().await {
                let data = match event {
                    Ok(data) => data,
                    Err(fault) => {
                        yield Err(fault);
                        return;
                    }
                };
                if data.trim() == DONE_MARKER {
                    return;
                }
                match parse_chunk(&data) {
                    Ok(Some(text)) => yield Ok(text),
                    Ok(None) => {}
                    Err(fault) => {
                        yield Err(fault);
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(fragments))
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}
