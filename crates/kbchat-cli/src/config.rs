use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use kbchat_core::{ProviderSpec, RouterConfig, default_table};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbchatConfig {
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub secrets: SecretsConfig,
    /// Overrides keyed by provider name
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_knowledge_dir")]
    pub dir: String,
}

fn default_knowledge_dir() -> String {
    "~/.kbchat/knowledge".to_string()
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            dir: default_knowledge_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            idle_timeout_secs: default_idle_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_output_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default = "default_secrets_file")]
    pub file: String,
}

fn default_secrets_file() -> String {
    "~/.kbchat/secrets.toml".to_string()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            file: default_secrets_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOverride {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_true() -> bool {
    true
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kbchat")
}

impl KbchatConfig {
    /// Load the config file; the default location may be absent, an explicit one may not
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = match custom_path {
            Some(path) => path.clone(),
            None => {
                let path = config_dir().join("config.toml");
                if !path.exists() {
                    debug!("No config at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `kbchat init` first.",
                path.display()
            )
        })?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Parse config text, expanding allowlisted `${VAR}` references first
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;

        if config.router.idle_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "router.idle_timeout_secs must be at least 1 (got 0)"
            ));
        }
        if config.router.connect_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "router.connect_timeout_secs must be at least 1 (got 0)"
            ));
        }

        for name in config.providers.keys() {
            if !default_table().iter().any(|spec| &spec.name == name) {
                warn!("Ignoring overrides for unknown provider '{}'", name);
            }
        }

        Ok(config)
    }

    pub fn knowledge_dir(&self) -> PathBuf {
        expand_path(&self.knowledge.dir)
    }

    pub fn secrets_file(&self) -> PathBuf {
        expand_path(&self.secrets.file)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.router.connect_timeout_secs)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            temperature: self.router.temperature,
            max_output_tokens: self.router.max_output_tokens,
            idle_timeout: Duration::from_secs(self.router.idle_timeout_secs),
        }
    }

    /// The built-in priority table with overrides applied; order never changes
    pub fn provider_table(&self) -> Vec<ProviderSpec> {
        default_table()
            .into_iter()
            .filter_map(|mut spec| {
                let Some(custom) = self.providers.get(&spec.name) else {
                    return Some(spec);
                };
                if !custom.enabled {
                    debug!("Provider {} disabled in config", spec.name);
                    return None;
                }
                if let Some(model) = &custom.model {
                    spec.default_model = model.clone();
                }
                if let Some(endpoint) = &custom.endpoint {
                    spec.endpoint = endpoint.clone();
                }
                Some(spec)
            })
            .collect()
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &["KBCHAT_HOME", "XDG_DATA_HOME", "HOME", "USER"];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        let value_len = value.len();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value_len; // Skip past the expanded value
    }
    result
}
