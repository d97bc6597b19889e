//! Knowledge base aggregation into a single grounding corpus

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::extract::extract;

/// Header line introducing one document inside the corpus
pub fn document_header(filename: &str) -> String {
    format!("\n\n--- DOCUMENT: {} ---\n", filename)
}

/// Regular files directly inside `dir`, sorted by filename.
///
/// An absent or unreadable directory yields an empty list.
pub fn list_documents(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Knowledge base {} not readable: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files
}

/// The aggregated text together with the number of documents it holds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    pub text: String,
    pub document_count: usize,
}

/// Concatenate the extracted text of every document in `dir`.
///
/// Each document contributes exactly one block: a delimiter carrying its
/// filename followed by its text. The count comes from the same directory
/// listing as the text. Empty when the directory is absent or holds no files.
pub fn build_corpus(dir: &Path) -> Corpus {
    let mut text = String::new();
    let documents = list_documents(dir);

    for path in &documents {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        text.push_str(&document_header(&filename));
        text.push_str(&extract(path));
    }

    debug!(
        "Aggregated {} document(s) from {} ({} chars)",
        documents.len(),
        dir.display(),
        text.len()
    );
    Corpus {
        text,
        document_count: documents.len(),
    }
}

/// Just the corpus text of `dir`
pub fn aggregate(dir: &Path) -> String {
    build_corpus(dir).text
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_absent_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        assert_eq!(aggregate(&dir.path().join("missing")), "");
    }

    #[test]
    fn test_empty_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        assert_eq!(aggregate(dir.path()), "");
    }

    #[test]
    fn test_one_block_per_file_sorted_by_name() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "second").unwrap();
        std::fs::write(dir.path().join("a.md"), "# first").unwrap();
        std::fs::write(dir.path().join("c.png"), [0u8, 1, 2]).unwrap();

        let corpus = aggregate(dir.path());
        assert_eq!(
            corpus,
            "\n\n--- DOCUMENT: a.md ---\n# first\
             \n\n--- DOCUMENT: b.txt ---\nsecond\
             \n\n--- DOCUMENT: c.png ---\n[Media File: c.png cannot be parsed locally yet]"
        );
        assert_eq!(corpus.matches("--- DOCUMENT:").count(), 3);
    }

    #[test]
    fn test_subdirectories_are_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("deep.txt"), "hidden").unwrap();
        std::fs::write(dir.path().join("top.txt"), "visible").unwrap();

        let corpus = aggregate(dir.path());
        assert!(corpus.contains("top.txt"));
        assert!(!corpus.contains("hidden"));
        assert_eq!(list_documents(dir.path()).len(), 1);
    }

    #[test]
    fn test_corrupt_document_still_gets_a_block() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.pdf"), b"garbage").unwrap();
        std::fs::write(dir.path().join("good.txt"), "fine").unwrap();

        let corpus = aggregate(dir.path());
        assert!(corpus.contains("--- DOCUMENT: bad.pdf ---"));
        assert!(corpus.ends_with("--- DOCUMENT: good.txt ---\nfine"));
    }

    #[test]
    fn test_count_matches_blocks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("one.txt"), "1").unwrap();
        std::fs::write(dir.path().join("two.txt"), "2").unwrap();
        std::fs::write(dir.path().join("three.bin"), [9u8]).unwrap();

        let corpus = build_corpus(dir.path());
        assert_eq!(corpus.document_count, 3);
        assert_eq!(corpus.text.matches("--- DOCUMENT:").count(), 3);
        assert_eq!(corpus.text, aggregate(dir.path()));
    }

    #[test]
    fn test_absent_directory_has_no_documents() {
        let dir = TempDir::new().unwrap();
        assert_eq!(build_corpus(&dir.path().join("missing")), Corpus::default());
    }
}
