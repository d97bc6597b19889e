//! Provider discovery from the fixed priority table

use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::credentials::CredentialSource;

use super::google::{GEMINI_API_BASE, GeminiProvider};
use super::openai_compat::OpenAiCompatProvider;
use super::types::{LlmProvider, ProtocolKind};

/// One row of the priority table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub name: String,
    /// Name of the secret holding this provider's API key
    pub credential_key: String,
    pub endpoint: String,
    pub default_model: String,
    pub protocol: ProtocolKind,
}

impl ProviderSpec {
    pub fn new(
        name: &str,
        credential_key: &str,
        endpoint: &str,
        default_model: &str,
        protocol: ProtocolKind,
    ) -> Self {
        Self {
            name: name.to_string(),
            credential_key: credential_key.to_string(),
            endpoint: endpoint.to_string(),
            default_model: default_model.to_string(),
            protocol,
        }
    }
}

/// Built-in providers, fastest and most generous free tier first
pub fn default_table() -> Vec<ProviderSpec> {
    vec![
        ProviderSpec::new(
            "groq",
            "GROQ_API_KEY",
            "https://api.groq.com/openai/v1",
            "llama-3.3-70b-versatile",
            ProtocolKind::OpenAiCompatible,
        ),
        ProviderSpec::new(
            "gemini",
            "GEMINI_API_KEY",
            GEMINI_API_BASE,
            "gemini-2.0-flash",
            ProtocolKind::NativeGemini,
        ),
        ProviderSpec::new(
            "cerebras",
            "CEREBRAS_API_KEY",
            "https://api.cerebras.ai/v1",
            "llama-3.3-70b",
            ProtocolKind::OpenAiCompatible,
        ),
        ProviderSpec::new(
            "openrouter",
            "OPENROUTER_API_KEY",
            "https://openrouter.ai/api/v1",
            "meta-llama/llama-3.3-70b-instruct:free",
            ProtocolKind::OpenAiCompatible,
        ),
        ProviderSpec::new(
            "mistral",
            "MISTRAL_API_KEY",
            "https://api.mistral.ai/v1",
            "mistral-small-latest",
            ProtocolKind::OpenAiCompatible,
        ),
    ]
}

/// A configured backend: everything needed to call it
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub name: String,
    pub endpoint: String,
    credential: String,
    pub model_id: String,
    pub protocol: ProtocolKind,
}

impl std::fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("model_id", &self.model_id)
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl ProviderDescriptor {
    pub fn new(spec: &ProviderSpec, credential: String) -> Self {
        Self {
            name: spec.name.clone(),
            endpoint: spec.endpoint.clone(),
            credential,
            model_id: spec.default_model.clone(),
            protocol: spec.protocol,
        }
    }
}

/// Providers that have credentials, in priority order, plus the ones that don't
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderDescriptor>,
    unconfigured: Vec<String>,
}

impl ProviderRegistry {
    /// Resolve credentials for every table row, keeping table order
    pub fn discover(table: &[ProviderSpec], credentials: &dyn CredentialSource) -> Self {
        let mut registry = Self::default();
        for spec in table {
            match credentials.resolve(&spec.credential_key) {
                Some(credential) => {
                    debug!("Provider {} configured (model: {})", spec.name, spec.default_model);
                    registry
                        .providers
                        .push(ProviderDescriptor::new(spec, credential.trim().to_string()));
                }
                None => {
                    debug!("Provider {} skipped: {} not set", spec.name, spec.credential_key);
                    registry.unconfigured.push(spec.name.clone());
                }
            }
        }
        info!(
            "Discovered {} provider(s): [{}]",
            registry.providers.len(),
            registry.names().join(", ")
        );
        registry
    }

    /// Configured providers in priority order
    pub fn providers(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    /// Table entries left out for lack of a credential, in table order
    pub fn unconfigured(&self) -> &[String] {
        &self.unconfigured
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Shared HTTP client for all providers
pub fn http_client(connect_timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().connect_timeout(connect_timeout).build()
}

/// Construct the client for a descriptor, dispatching on its protocol
pub fn build_provider(descriptor: &ProviderDescriptor, client: &Client) -> Box<dyn LlmProvider> {
    match descriptor.protocol {
        ProtocolKind::OpenAiCompatible => Box::new(OpenAiCompatProvider::new(
            descriptor.name.clone(),
            descriptor.credential.clone(),
            descriptor.model_id.clone(),
            descriptor.endpoint.clone(),
            client.clone(),
        )),
        ProtocolKind::NativeGemini => Box::new(GeminiProvider::new(
            descriptor.name.clone(),
            descriptor.credential.clone(),
            descriptor.model_id.clone(),
            descriptor.endpoint.clone(),
            client.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spec(name: &str, key: &str) -> ProviderSpec {
        ProviderSpec::new(
            name,
            key,
            "http://localhost/v1",
            "model",
            ProtocolKind::OpenAiCompatible,
        )
    }

    fn creds(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_credential_is_left_out() {
        let table = vec![spec("a", "A_KEY"), spec("b", "B_KEY"), spec("c", "C_KEY")];
        let registry = ProviderRegistry::discover(&table, &creds(&[("B_KEY", "b"), ("C_KEY", "c")]));
        assert_eq!(registry.names(), vec!["b", "c"]);
        assert_eq!(registry.unconfigured(), ["a".to_string()]);
    }

    #[test]
    fn test_order_follows_table() {
        let table = vec![spec("a", "A_KEY"), spec("b", "B_KEY"), spec("c", "C_KEY")];
        let registry = ProviderRegistry::discover(
            &table,
            &creds(&[("C_KEY", "c"), ("A_KEY", "a"), ("B_KEY", "b")]),
        );
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
        assert!(registry.unconfigured().is_empty());
    }

    #[test]
    fn test_blank_credential_is_unconfigured() {
        let table = vec![spec("a", "A_KEY")];
        let registry = ProviderRegistry::discover(&table, &creds(&[("A_KEY", "   ")]));
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.unconfigured().len(), 1);
    }

    #[test]
    fn test_descriptor_debug_hides_credential() {
        let table = vec![spec("a", "A_KEY")];
        let registry = ProviderRegistry::discover(&table, &creds(&[("A_KEY", "sk-very-secret")]));
        let debug = format!("{:?}", registry);
        assert!(!debug.contains("sk-very-secret"));
        assert!(!debug.contains("A_KEY"));
        assert!(debug.contains("\"a\""));
    }

    #[test]
    fn test_default_table_is_unique_and_ordered() {
        let table = default_table();
        let names: Vec<&str> = table.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["groq", "gemini", "cerebras", "openrouter", "mistral"]);
        let gemini = &table[1];
        assert_eq!(gemini.protocol, ProtocolKind::NativeGemini);
        assert_eq!(gemini.default_model, "gemini-2.0-flash");
    }

    #[test]
    fn test_build_provider_dispatches_on_protocol() {
        let client = Client::new();
        let table = default_table();
        let registry = ProviderRegistry::discover(
            &table,
            &creds(&[("GROQ_API_KEY", "gsk"), ("GEMINI_API_KEY", "AIza")]),
        );
        let built: Vec<Box<dyn LlmProvider>> = registry
            .providers()
            .iter()
            .map(|d| build_provider(d, &client))
            .collect();
        assert_eq!(built[0].provider_name(), "groq");
        assert_eq!(built[0].model(), "llama-3.3-70b-versatile");
        assert_eq!(built[1].provider_name(), "gemini");
        assert_eq!(built[1].model(), "gemini-2.0-flash");
    }
}
