//! Waterfall router: sequential failover across providers in priority order

use futures_util::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::conversation::Turn;
use crate::error::{ProviderFault, RouterError, SkipReason};
use crate::prompt::grounding_instruction;

use super::registry::{ProviderRegistry, build_provider};
use super::types::{ChatMessage, GenerationRequest, LlmProvider};

/// Generation settings shared by every candidate
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    /// Longest wait for the response to start or for the next fragment
    pub idle_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: None,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// A complete answer and the backend that produced it
#[derive(Debug)]
pub struct Answer {
    pub provider: String,
    pub model: String,
    pub text: String,
    /// Candidates that failed before this one, in order
    pub skipped: Vec<SkipReason>,
}

/// Receives progress while the router works through its candidates
pub trait AnswerObserver {
    /// Text accumulated so far by the current candidate; only ever grows
    fn on_partial(&mut self, provider: &str, text_so_far: &str);

    /// A candidate is about to be tried
    fn on_attempt(&mut self, _provider: &str, _index: usize) {}

    /// A candidate failed; anything it streamed is discarded
    fn on_skip(&mut self, _reason: &SkipReason) {}
}

impl<F> AnswerObserver for F
where
    F: FnMut(&str, &str),
{
    fn on_partial(&mut self, provider: &str, text_so_far: &str) {
        self(provider, text_so_far)
    }
}

/// Routes each question through the providers until one answers
pub struct ModelRouter {
    /// Providers in failover order (index 0 = primary)
    providers: Vec<Box<dyn LlmProvider>>,
    config: RouterConfig,
}

impl ModelRouter {
    /// Create a router with multiple providers in failover order
    pub fn with_failover(
        providers: Vec<Box<dyn LlmProvider>>,
        config: RouterConfig,
    ) -> Result<Self, RouterError> {
        if providers.is_empty() {
            return Err(RouterError::Unconfigured);
        }
        Ok(Self { providers, config })
    }

    /// Build one client per discovered provider, keeping registry order
    pub fn from_registry(
        registry: &ProviderRegistry,
        client: &Client,
        config: RouterConfig,
    ) -> Result<Self, RouterError> {
        let providers = registry
            .providers()
            .iter()
            .map(|d| build_provider(d, client))
            .collect();
        Self::with_failover(providers, config)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Provider names in failover order
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.provider_name()).collect()
    }

    /// Number of configured providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// The protocol-neutral request every candidate receives
    pub fn build_request(
        &self,
        history: &[Turn],
        new_message: &str,
        grounding: &str,
    ) -> GenerationRequest {
        let mut messages: Vec<ChatMessage> = history.iter().map(Turn::to_message).collect();
        messages.push(ChatMessage::user(new_message));
        GenerationRequest {
            system: grounding_instruction(grounding),
            messages,
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
        }
    }

    /// Answer `new_message` from `grounding`, failing over on any provider fault.
    ///
    /// Providers after the one that answers are never called. An empty
    /// grounding corpus is refused before any provider is contacted.
    pub async fn answer<O>(
        &self,
        history: &[Turn],
        new_message: &str,
        grounding: &str,
        observer: &mut O,
    ) -> Result<Answer, RouterError>
    where
        O: AnswerObserver + ?Sized,
    {
        if grounding.trim().is_empty() {
            return Err(RouterError::NoKnowledge);
        }

        let request = self.build_request(history, new_message, grounding);
        let mut skipped = Vec::new();

        for (idx, provider) in self.providers.iter().enumerate() {
            debug!(
                "Trying provider {} ({}) {}/{}",
                provider.provider_name(),
                provider.model(),
                idx + 1,
                self.providers.len(),
            );
            observer.on_attempt(provider.provider_name(), idx);

            match self.attempt(provider.as_ref(), &request, observer).await {
                Ok(text) => {
                    if idx > 0 {
                        info!(
                            "Request succeeded on failover provider {} ({})",
                            provider.provider_name(),
                            provider.model()
                        );
                    }
                    return Ok(Answer {
                        provider: provider.provider_name().to_string(),
                        model: provider.model().to_string(),
                        text,
                        skipped,
                    });
                }
                Err(reason) => {
                    warn!(
                        "Provider {} ({}) skipped ({:?}): {}",
                        provider.provider_name(),
                        provider.model(),
                        reason.fault.kind(),
                        reason.fault,
                    );
                    observer.on_skip(&reason);
                    skipped.push(reason);

                    if idx + 1 < self.providers.len() {
                        info!(
                            "Failing over from {} to {}",
                            provider.provider_name(),
                            self.providers[idx + 1].provider_name()
                        );
                    }
                }
            }
        }

        Err(RouterError::Exhausted { attempts: skipped })
    }

    /// One candidate, start to finish; any fault becomes a skip
    async fn attempt<O>(
        &self,
        provider: &dyn LlmProvider,
        request: &GenerationRequest,
        observer: &mut O,
    ) -> Result<String, SkipReason>
    where
        O: AnswerObserver + ?Sized,
    {
        self.consume(provider, request, observer)
            .await
            .map_err(|fault| SkipReason {
                provider: provider.provider_name().to_string(),
                fault,
            })
    }

    async fn consume<O>(
        &self,
        provider: &dyn LlmProvider,
        request: &GenerationRequest,
        observer: &mut O,
    ) -> Result<String, ProviderFault>
    where
        O: AnswerObserver + ?Sized,
    {
        let idle = self.config.idle_timeout;
        let mut stream = tokio::time::timeout(idle, provider.stream_generate(request))
            .await
            .map_err(|_| ProviderFault::Timeout(idle))??;

        let mut text = String::new();
        loop {
            let next = tokio::time::timeout(idle, stream.next())
                .await
                .map_err(|_| ProviderFault::Timeout(idle))?;
            match next {
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    text.push_str(&fragment);
                    observer.on_partial(provider.provider_name(), &text);
                }
                Some(Err(fault)) => return Err(fault),
                None => break,
            }
        }

        if text.trim().is_empty() {
            return Err(ProviderFault::Empty);
        }
        Ok(text)
    }
}
