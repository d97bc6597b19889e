//! Plain-text extraction for knowledge base documents
//!
//! Extraction never fails from the caller's point of view: every internal
//! error is logged and degrades to empty text, and unsupported formats yield a
//! placeholder naming the file. One bad document must not hide the rest of
//! the knowledge base.

use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Entry holding the body of a Word document.
const DOCX_BODY_ENTRY: &str = "word/document.xml";

/// Why a document could not be (fully) extracted.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Format family chosen from a file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Word,
    PlainText,
    Unsupported,
}

impl DocumentKind {
    /// Classify a path by its extension, case-insensitively
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Self::Pdf,
            "doc" | "docx" => Self::Word,
            "txt" | "md" | "csv" => Self::PlainText,
            _ => Self::Unsupported,
        }
    }
}

/// Extract the best-effort plain text of a stored document.
///
/// A nonexistent path yields an empty string.
pub fn extract(path: &Path) -> String {
    if !path.exists() {
        debug!("Skipping extraction of missing file {}", path.display());
        return String::new();
    }

    match DocumentKind::from_path(path) {
        DocumentKind::Pdf => read_bytes(path).map(|b| extract_pdf(&b)).unwrap_or_else(|e| {
            warn!("{}", e);
            String::new()
        }),
        DocumentKind::Word => read_bytes(path)
            .and_then(|b| extract_docx(&b))
            .unwrap_or_else(|e| {
                warn!("Error parsing Word document {}: {}", path.display(), e);
                String::new()
            }),
        DocumentKind::PlainText => read_bytes(path)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_else(|e| {
                warn!("{}", e);
                String::new()
            }),
        DocumentKind::Unsupported => unsupported_placeholder(path),
    }
}

/// Marker text standing in for formats that are not parsed locally
pub fn unsupported_placeholder(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("[Media File: {} cannot be parsed locally yet]", name)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ExtractError> {
    std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Page-by-page PDF text, each page ending in exactly one newline.
///
/// A page that fails contributes nothing but its newline.
fn extract_pdf(bytes: &[u8]) -> String {
    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("{}", ExtractError::Pdf(e));
            return String::new();
        }
    };

    let mut text = String::new();
    for page_number in doc.get_pages().keys() {
        let page_text = doc.extract_text(&[*page_number]).unwrap_or_else(|e| {
            warn!("PDF page {} unreadable: {}", page_number, e);
            String::new()
        });
        text.push_str(&page_text);
        // lopdf already terminates most pages
        if !page_text.ends_with('\n') {
            text.push('\n');
        }
    }
    text
}

/// Paragraph-by-paragraph text of an OOXML word document.
fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name(DOCX_BODY_ENTRY)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", DOCX_BODY_ENTRY, e)))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "{} exceeds size limit ({} bytes)",
            DOCX_BODY_ENTRY, MAX_XML_ENTRY_BYTES
        )));
    }

    docx_paragraphs(&xml)
}

fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    out.push_str(&paragraph);
                    out.push('\n');
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
