//! Knowledge base directory holding the documents staff have added

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::corpus::{aggregate, list_documents};

/// A document stored in the knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub name: String,
    pub size_bytes: u64,
}

/// Handle on the knowledge base directory
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    dir: PathBuf,
}

impl KnowledgeBase {
    /// Open (and create if needed) the knowledge base at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create knowledge base dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy a file into the knowledge base under its own filename
    pub fn add_file(&self, src: &Path) -> Result<DocumentInfo> {
        let name = src
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("Not a file path: {}", src.display()))?;
        let bytes =
            std::fs::read(src).with_context(|| format!("Failed to read {}", src.display()))?;
        self.add_bytes(name, &bytes)
    }

    /// Store `bytes` as document `name`, replacing any existing document of that name
    pub fn add_bytes(&self, name: &str, bytes: &[u8]) -> Result<DocumentInfo> {
        let path = self.document_path(name)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Added {} ({} bytes) to the knowledge base", name, bytes.len());
        Ok(DocumentInfo {
            name: name.to_string(),
            size_bytes: bytes.len() as u64,
        })
    }

    /// Documents currently stored, sorted by name
    pub fn list(&self) -> Result<Vec<DocumentInfo>> {
        list_documents(&self.dir)
            .into_iter()
            .map(|path| {
                let meta = std::fs::metadata(&path)
                    .with_context(|| format!("Failed to stat {}", path.display()))?;
                Ok(DocumentInfo {
                    name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    size_bytes: meta.len(),
                })
            })
            .collect()
    }

    /// Delete document `name`
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.document_path(name)?;
        if !path.is_file() {
            return Err(anyhow!("No document named '{}' in the knowledge base", name));
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        info!("Removed {} from the knowledge base", name);
        Ok(())
    }

    /// Recompute the grounding corpus from the current document set
    pub fn corpus(&self) -> String {
        aggregate(&self.dir)
    }

    fn document_path(&self, name: &str) -> Result<PathBuf> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0');
        if invalid {
            return Err(anyhow!("Invalid document name '{}'", name));
        }
        Ok(self.dir.join(name))
    }
}
