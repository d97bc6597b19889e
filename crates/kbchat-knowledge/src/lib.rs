//! Document knowledge base for kbchat
//!
//! This crate provides:
//! - Best-effort plain-text extraction for PDF, Word and plain-text documents
//! - Aggregation of a knowledge base directory into one grounding corpus
//! - A thin store for adding, listing and removing documents

pub mod corpus;
pub mod extract;
pub mod store;

pub use corpus::{Corpus, aggregate, build_corpus, list_documents};
pub use extract::{DocumentKind, ExtractError, extract};
pub use store::{DocumentInfo, KnowledgeBase};
