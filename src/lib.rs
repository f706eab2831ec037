//! Cleanup of scanned-book EPUB spines: repeated banner removal, OCR line
//! wrap and hyphenation repair, mid-sentence paragraph merges, short-line
//! blacklisting and bidirectional footnote linking.
//!
//! A book is an owned [`Corpus`] handed through the stages in a fixed order
//! by [`Cleaner::clean`]; each stage returns a [`ReportCounters`] delta.

pub mod banner;
pub mod blacklist;
pub mod config;
pub mod corpus;
pub mod error;
pub mod footnotes;
pub mod lexicon;
pub mod links;
pub mod markup;
pub mod merge;
pub mod pipeline;
pub mod reflow;
pub mod report;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use config::{BannerRule, CleanConfig};
pub use corpus::{BookMetadata, Corpus, Document, ProcessedMarker};
pub use error::{BookError, ConfigError, MarkupError};
pub use pipeline::{BookOutcome, BookStore, Cleaner};
pub use report::{BatchReport, BookReport, BookStatus, ReportCounters};
pub use store::DirectoryStore;
