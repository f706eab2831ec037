//! Stage composition for one book and the parallel batch driver.

use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::banner::strip_banners;
use crate::blacklist::{Blacklist, MarkupBlacklist};
use crate::config::{CleanConfig, fingerprint};
use crate::corpus::{Corpus, ProcessedMarker};
use crate::error::{BookError, ConfigError};
use crate::footnotes::link_footnotes;
use crate::lexicon::{Lexicon, Whitelist, load_word_list};
use crate::links::heal_links;
use crate::merge::merge_document;
use crate::reflow::Reflow;
use crate::report::{BatchReport, BookReport, BookStatus, ReportCounters};

/// Where books come from and go back to.
pub trait BookStore: Sync {
    fn book_ids(&self) -> Result<Vec<String>, BookError>;
    fn load(&self, book_id: &str) -> Result<Corpus, BookError>;
    fn store(&self, corpus: &Corpus) -> Result<(), BookError>;
}

#[derive(Debug, Clone)]
pub struct BookOutcome {
    pub corpus: Corpus,
    pub status: BookStatus,
    pub counters: ReportCounters,
}

/// A validated configuration with its word lists, patterns and
/// dictionaries loaded. Built once per batch.
pub struct Cleaner {
    config: CleanConfig,
    closing: Vec<char>,
    whitelist: Whitelist,
    lexicon: Option<Lexicon>,
    blacklist: Blacklist,
    fingerprint: String,
}

impl Cleaner {
    pub fn new(config: CleanConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut whitelist_words = config.whitelist.clone();
        if let Some(path) = &config.whitelist_path {
            whitelist_words.extend(load_word_list(path)?);
        }
        let mut patterns = config.blacklist.clone();
        if let Some(path) = &config.blacklist_path {
            patterns.extend(load_word_list(path)?);
        }
        let blacklist = Blacklist::compile(&patterns, config.blacklist_max_line_len, config.builtin_watermarks)?
            .with_markup(MarkupBlacklist {
                tags: config.blacklist_tags.clone(),
                attributes: config.blacklist_attributes.clone(),
                attributes_on_tags: config.blacklist_attributes_on_tags.clone(),
            });
        let lexicon = config
            .dictionary_dir
            .as_deref()
            .map(Lexicon::load)
            .filter(|lexicon| !lexicon.is_empty());

        let fingerprint = fingerprint(&config, &whitelist_words, &patterns);
        info!(
            fingerprint = %fingerprint,
            whitelist = whitelist_words.len(),
            blacklist = patterns.len(),
            lexicon = lexicon.is_some(),
            "cleaner ready"
        );
        Ok(Self {
            closing: config.closing_chars(),
            whitelist: Whitelist::new(&whitelist_words),
            lexicon,
            blacklist,
            fingerprint,
            config,
        })
    }

    pub fn config(&self) -> &CleanConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether the book carries a marker from this exact configuration.
    pub fn already_processed(&self, corpus: &Corpus) -> bool {
        corpus
            .metadata
            .processed
            .as_ref()
            .is_some_and(|marker| marker.fingerprint == self.fingerprint)
    }

    /// Runs every stage in order, returning the summed counters.
    pub fn clean(&self, corpus: &mut Corpus) -> ReportCounters {
        let mut counters = strip_banners(corpus, &self.config);

        let reflow = Reflow {
            whitelist: &self.whitelist,
            lexicon: self.lexicon.as_ref(),
            closing: &self.closing,
        };
        for doc in &mut corpus.documents {
            counters += reflow.reflow_document(doc);
            counters += merge_document(doc, &self.closing);
            counters += self.blacklist.filter_document(doc);
        }

        counters += link_footnotes(corpus);
        counters += heal_links(corpus);
        counters
    }

    /// Cleans one book unless it already carries this configuration's
    /// marker. A dry run cleans in memory but does not stamp the marker.
    pub fn process(&self, mut corpus: Corpus) -> BookOutcome {
        if !self.config.force && self.already_processed(&corpus) {
            debug!(book = %corpus.book_id, "already processed with this configuration");
            return BookOutcome {
                corpus,
                status: BookStatus::SkippedByMarker,
                counters: ReportCounters::default(),
            };
        }

        let counters = self.clean(&mut corpus);
        let status = if self.config.dry_run {
            BookStatus::DryRun
        } else {
            corpus.metadata.processed = Some(ProcessedMarker::now(&self.fingerprint));
            BookStatus::Processed
        };
        BookOutcome {
            corpus,
            status,
            counters,
        }
    }

    /// Load, clean and write back a single book. Never fails: problems
    /// become the book's status.
    pub fn run_book<S: BookStore + ?Sized>(&self, store: &S, book_id: &str) -> BookReport {
        let corpus = match store.load(book_id) {
            Ok(corpus) => corpus,
            Err(e) => {
                error!(book = book_id, error = %e, "failed to load book");
                return BookReport {
                    book_id: book_id.to_string(),
                    status: BookStatus::Failed(e.to_string()),
                    counters: ReportCounters::default(),
                };
            }
        };

        let BookOutcome {
            corpus,
            mut status,
            counters,
        } = self.process(corpus);
        if status == BookStatus::Processed {
            if let Err(e) = store.store(&corpus) {
                error!(book = book_id, error = %e, "failed to write book");
                status = BookStatus::WriteFailed(e.to_string());
            }
        }

        info!(
            book = book_id,
            status = %status,
            banners = counters.banners_removed,
            linebreaks = counters.linebreak_fixes,
            merged = counters.illegitimate_paragraphs_merged,
            footnotes = counters.forward_links_repaired,
            "book done"
        );
        BookReport {
            book_id: book_id.to_string(),
            status,
            counters,
        }
    }

    /// Every book of the store, in parallel. Only listing the store can
    /// fail the batch.
    pub fn run_batch<S: BookStore + ?Sized>(&self, store: &S) -> Result<BatchReport, BookError> {
        let ids = store.book_ids()?;
        info!(books = ids.len(), "starting batch");
        let books: Vec<BookReport> = ids.par_iter().map(|id| self.run_book(store, id)).collect();
        let report = BatchReport { books };
        info!(
            processed = report.processed(),
            skipped = report.skipped(),
            failed = report.failed(),
            "batch finished"
        );
        Ok(report)
    }
}
