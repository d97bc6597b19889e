//! Credential resolution: environment first, then the secrets file

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Anything that can look up a named secret.
///
/// Blank values count as absent.
pub trait CredentialSource: Send + Sync {
    fn resolve(&self, key: &str) -> Option<String>;
}

/// Process environment variables
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvVars;

impl CredentialSource for EnvVars {
    fn resolve(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

impl CredentialSource for HashMap<String, String> {
    fn resolve(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }
}

/// Flat TOML secrets store (`KEY = "value"` per line)
pub struct SecretsFile {
    path: Option<PathBuf>,
    values: HashMap<String, String>,
}

impl std::fmt::Debug for SecretsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("SecretsFile")
            .field("path", &self.path)
            .field("keys", &keys)
            .finish()
    }
}

impl SecretsFile {
    /// An empty store
    pub fn empty() -> Self {
        Self {
            path: None,
            values: HashMap::new(),
        }
    }

    /// Load the secrets file at `path`; a missing file is an empty store
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No secrets file at {}", path.display());
            return Ok(Self::empty());
        }

        // Refuse files that group or other can read
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path)
                .with_context(|| format!("Failed to stat {}", path.display()))?
                .permissions()
                .mode();
            if mode & 0o077 != 0 {
                return Err(anyhow::anyhow!(
                    "Secrets file {:?} has overly permissive permissions ({:o}). \
                     Fix with: chmod 600 {:?}",
                    path,
                    mode & 0o777,
                    path
                ));
            }
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read secrets at {}", path.display()))?;
        let mut store = Self::parse(&content)
            .with_context(|| format!("Failed to parse secrets at {}", path.display()))?;
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Parse secrets from TOML text; non-string values are ignored
    pub fn parse(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let mut values = HashMap::new();
        for (key, value) in table {
            match value {
                toml::Value::String(s) => {
                    values.insert(key, s);
                }
                _ => warn!("Ignoring non-string secret '{}'", key),
            }
        }
        Ok(Self { path: None, values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl CredentialSource for SecretsFile {
    fn resolve(&self, key: &str) -> Option<String> {
        self.values.resolve(key)
    }
}

/// Tries each source in order; the first non-blank value wins
#[derive(Default)]
pub struct Layered {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl Layered {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment variables, then the given secrets store
    pub fn env_then(secrets: SecretsFile) -> Self {
        Self::new().with(EnvVars).with(secrets)
    }

    pub fn with(mut self, source: impl CredentialSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl CredentialSource for Layered {
    fn resolve(&self, key: &str) -> Option<String> {
        self.sources.iter().find_map(|s| s.resolve(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_blank_values_are_absent() {
        let source = map(&[("A", "  "), ("B", "key")]);
        assert_eq!(source.resolve("A"), None);
        assert_eq!(source.resolve("B").as_deref(), Some("key"));
        assert_eq!(source.resolve("C"), None);
    }

    #[test]
    fn test_layered_prefers_first_source() {
        let layered = Layered::new()
            .with(map(&[("GROQ_API_KEY", "from-env"), ("EMPTY", "")]))
            .with(map(&[("GROQ_API_KEY", "from-file"), ("EMPTY", "fallback")]));
        assert_eq!(layered.resolve("GROQ_API_KEY").as_deref(), Some("from-env"));
        assert_eq!(layered.resolve("EMPTY").as_deref(), Some("fallback"));
        assert_eq!(layered.resolve("MISSING"), None);
    }

    #[test]
    fn test_parse_secrets() {
        let secrets = SecretsFile::parse(
            r#"
GEMINI_API_KEY = "AIza-test"
PORT = 8080
"#,
        )
        .unwrap();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets.resolve("GEMINI_API_KEY").as_deref(), Some("AIza-test"));
    }

    #[test]
    fn test_missing_secrets_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let secrets = SecretsFile::load(&dir.path().join("secrets.toml")).unwrap();
        assert!(secrets.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_permissive_secrets_file_refused() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.toml");
        std::fs::write(&path, "GROQ_API_KEY = \"gsk\"\n").unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(SecretsFile::load(&path).is_err());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        let secrets = SecretsFile::load(&path).unwrap();
        assert_eq!(secrets.resolve("GROQ_API_KEY").as_deref(), Some("gsk"));
    }

    #[test]
    fn test_debug_hides_values() {
        let secrets = SecretsFile::parse("OPENROUTER_API_KEY = \"sk-or-secret\"").unwrap();
        let debug = format!("{:?}", secrets);
        assert!(debug.contains("OPENROUTER_API_KEY"));
        assert!(!debug.contains("sk-or-secret"));
    }
}
