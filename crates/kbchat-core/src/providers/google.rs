//! Google Gemini provider (native streaming API)

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderFault;
use crate::sse;

use super::types::{ChatRole, GenerationRequest, LlmProvider, TextStream, ensure_success};

/// Default base URL of the Generative Language API
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini provider
pub struct GeminiProvider {
    client: Client,
    name: String,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiProvider {
    pub fn new(name: String, api_key: String, model: String, base_url: String, client: Client) -> Self {
        Self {
            client,
            name,
            api_key,
            base_url,
            model,
        }
    }

    fn streaming_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    /// Convert provider-agnostic messages to Gemini wire format
    fn to_gemini_contents(request: &GenerationRequest) -> Vec<GeminiContent> {
        request
            .messages
            .iter()
            .map(|m| GeminiContent {
                role: Some(
                    match m.role {
                        ChatRole::User => "user",
                        ChatRole::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts: vec![GeminiPart {
                    text: Some(m.content.clone()),
                }],
            })
            .collect()
    }

    fn build_request(request: &GenerationRequest) -> GeminiRequest {
        GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(request.system.clone()),
                }],
            },
            contents: Self::to_gemini_contents(request),
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        }
    }
}

/// Finish reasons that mean the answer was withheld or truncated by the backend
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Decode one streamed `GenerateContentResponse` into its text, if any
fn parse_chunk(data: &str) -> Result<Option<String>, ProviderFault> {
    let chunk: GeminiStreamChunk = serde_json::from_str(data)
        .map_err(|e| ProviderFault::Malformed(format!("{}: {}", e, data)))?;

    if let Some(error) = chunk.error {
        return Err(ProviderFault::Upstream(format!(
            "{} {}: {}",
            error.code.unwrap_or_default(),
            error.status.unwrap_or_default(),
            error.message.unwrap_or_default()
        )));
    }

    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderFault::Upstream(format!("prompt blocked: {}", reason)));
    }

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Ok(None);
    };

    if let Some(reason) = candidate
        .finish_reason
        .as_deref()
        .filter(|r| BLOCKING_FINISH_REASONS.contains(r))
    {
        return Err(ProviderFault::Upstream(format!("answer cut off: {}", reason)));
    }

    let text: String = candidate
        .content
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    Ok(if text.is_empty() { None } else { Some(text) })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
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
        let body = Self::build_request(request);

        debug!(
            "Gemini request: model={}, contents={}",
            self.model,
            body.contents.len()
        );

        let response = self
            .client
            .post(self.streaming_url())
            .header("x-goog-api-key", &self.api_key)
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

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
    error: Option<GeminiApiError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiApiError {
    code: Option<u16>,
    message: Option<String>,
    status: Option<String>,
}
