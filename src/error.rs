use std::path::PathBuf;

use thiserror::Error;

/// A spine document that is not well-formed markup.
#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("malformed markup at byte {position}: {source}")]
    Syntax {
        position: usize,
        source: quick_xml::Error,
    },

    #[error("unclosed element <{0}> at end of document")]
    Unclosed(String),

    #[error("document has no root element")]
    NoRoot,
}

/// Configuration problems. These are fatal for the whole batch.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {config_path}: {source}")]
    Read {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file at {config_path}: {source}")]
    Parse {
        config_path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid blacklist pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("banner_min_repeat must be a fraction in [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("closing_punctuation must not be empty")]
    NoClosingPunctuation,

    #[error("failed to read word list {path}: {source}")]
    WordList {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failures scoped to a single book.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no rootfile found in {0}")]
    NoRootfile(PathBuf),

    #[error("malformed package document {path}: {source}")]
    Package {
        path: PathBuf,
        source: quick_xml::Error,
    },

    #[error("spine document {document} is malformed: {source}")]
    Markup {
        document: String,
        source: MarkupError,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
