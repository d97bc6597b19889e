//! Scripted providers for router and session tests

use async_trait::async_trait;
use futures_util::stream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ProviderFault;
use crate::providers::types::{GenerationRequest, LlmProvider, TextStream};

/// What a scripted provider does when called
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    /// Stream these fragments, then finish
    Fragments(Vec<&'static str>),
    /// Fail with this HTTP status before streaming anything
    FailBefore(u16),
    /// Stream these fragments, then fail
    FailAfter(Vec<&'static str>),
    /// Accept the request and never produce a fragment
    Hang,
}

pub(crate) struct ScriptedProvider {
    name: String,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Option<GenerationRequest>>>,
}

impl ScriptedProvider {
    pub(crate) fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub(crate) fn last_request(&self) -> Arc<Mutex<Option<GenerationRequest>>> {
        self.last_request.clone()
    }
}

fn fragments(parts: &[&'static str]) -> Vec<Result<String, ProviderFault>> {
    parts.iter().map(|p| Ok(p.to_string())).collect()
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn stream_generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<TextStream, ProviderFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());

        match &self.behavior {
            Behavior::Fragments(parts) => Ok(Box::pin(stream::iter(fragments(parts)))),
            Behavior::FailBefore(status) => Err(ProviderFault::status(*status, "scripted failure")),
            Behavior::FailAfter(parts) => {
                let mut items = fragments(parts);
                items.push(Err(ProviderFault::Malformed("stream cut off".to_string())));
                Ok(Box::pin(stream::iter(items)))
            }
            Behavior::Hang => Ok(Box::pin(stream::pending())),
        }
    }
}
