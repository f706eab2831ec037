//! In-memory model of one book's spine.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MarkupError;
use crate::markup::{Element, Markup, collapse_whitespace, leaf_block_paths};

/// One spine item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Spine href, relative to the package document.
    pub id: String,
    pub markup: Markup,
}

/// A leaf block with its offsets in the document's rendered text.
#[derive(Debug, Clone)]
pub struct BlockSpan {
    pub path: Vec<usize>,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Document {
    pub fn parse(id: impl Into<String>, src: &str) -> Result<Self, MarkupError> {
        Ok(Self {
            id: id.into(),
            markup: Markup::parse(src)?,
        })
    }

    pub fn to_xhtml(&self) -> String {
        self.markup.to_xhtml()
    }

    pub fn body(&self) -> &Element {
        self.markup.body()
    }

    pub fn body_mut(&mut self) -> &mut Element {
        self.markup.body_mut()
    }

    /// Leaf blocks in reading order with character offsets into the
    /// whitespace-collapsed rendered text (blocks joined by one space).
    /// Blocks with no visible text are skipped.
    pub fn block_spans(&self) -> Vec<BlockSpan> {
        let body = self.body();
        let mut spans = Vec::new();
        let mut offset = 0;
        for path in leaf_block_paths(body) {
            let Some(el) = body.at_path(&path) else {
                continue;
            };
            let text = collapse_whitespace(&el.text());
            if text.is_empty() {
                continue;
            }
            if offset > 0 {
                offset += 1;
            }
            let start = offset;
            offset += text.chars().count();
            spans.push(BlockSpan {
                path,
                text,
                start,
                end: offset,
            });
        }
        spans
    }

    pub fn rendered_text(&self) -> String {
        self.block_spans()
            .into_iter()
            .map(|span| span.text)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The first `chars` characters of rendered text, or all of it.
    pub fn top_window(&self, chars: usize) -> String {
        self.rendered_text().chars().take(chars).collect()
    }

    /// The last `chars` characters of rendered text, or all of it.
    pub fn bottom_window(&self, chars: usize) -> String {
        let text = self.rendered_text();
        let total = text.chars().count();
        text.chars().skip(total.saturating_sub(chars)).collect()
    }

    /// Blocks that start inside the top window.
    pub fn top_blocks(&self, chars: usize) -> Vec<BlockSpan> {
        self.block_spans()
            .into_iter()
            .filter(|span| span.start < chars)
            .collect()
    }

    /// Blocks that end inside the bottom window.
    pub fn bottom_blocks(&self, chars: usize) -> Vec<BlockSpan> {
        let spans = self.block_spans();
        let total = spans.last().map(|span| span.end).unwrap_or(0);
        let cutoff = total.saturating_sub(chars);
        spans
            .into_iter()
            .filter(|span| chars > 0 && span.end > cutoff)
            .collect()
    }
}

/// Record that a book went through the pipeline with a given configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedMarker {
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
}

impl ProcessedMarker {
    pub fn now(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            timestamp: Utc::now(),
        }
    }

    /// `<fingerprint>;<rfc3339 timestamp>`, the form stored in package metadata.
    pub fn to_meta_content(&self) -> String {
        format!(
            "{};{}",
            self.fingerprint,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    pub fn from_meta_content(content: &str) -> Option<Self> {
        let (fingerprint, timestamp) = content.trim().split_once(';')?;
        if fingerprint.is_empty() {
            return None;
        }
        let timestamp = DateTime::parse_from_rfc3339(timestamp).ok()?;
        Some(Self {
            fingerprint: fingerprint.to_string(),
            timestamp: timestamp.with_timezone(&Utc),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookMetadata {
    pub processed: Option<ProcessedMarker>,
}

/// The ordered spine of one book plus its book-level metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus {
    pub book_id: String,
    pub documents: Vec<Document>,
    pub metadata: BookMetadata,
}

impl Corpus {
    pub fn new(book_id: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            book_id: book_id.into(),
            documents,
            metadata: BookMetadata::default(),
        }
    }

    /// Builds a corpus from `(href, xhtml)` pairs in spine order.
    pub fn from_sources<'a>(
        book_id: impl Into<String>,
        sources: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, (String, MarkupError)> {
        let documents = sources
            .into_iter()
            .map(|(href, src)| Document::parse(href, src).map_err(|e| (href.to_string(), e)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(book_id, documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn position(&self, document_id: &str) -> Option<usize> {
        self.documents.iter().position(|doc| doc.id == document_id)
    }
}
