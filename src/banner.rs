//! Cross-document detection of repeating header/footer banners.
//!
//! Every leaf block that starts in a document's top window (or ends in its
//! bottom window) is a snippet. Snippets are normalized and tallied in a
//! table keyed by edge and normalized text; a snippet seen in at least
//! `banner_min_repeat` of the spine is stripped wherever it was seen.

use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::config::{BannerRule, CleanConfig};
use crate::corpus::{BlockSpan, Corpus, Document};
use crate::markup::{Element, Node, collapse_whitespace};
use crate::report::ReportCounters;

lazy_static! {
    // A page number token: a digit run, optionally wrapped in punctuation
    // like "- 12 -", "[12]" or "12."
    static ref PAGE_NUMBER: Regex = Regex::new(r"^[\p{P}\p{S}]*\d+[\p{P}\p{S}]*$").unwrap();
    // Dashes, brackets and ornaments left around a page number: "- 12 -"
    static ref EDGE_ORNAMENT: Regex = Regex::new(r"^[\p{P}\p{S}]+$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WindowEdge {
    Top,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannerCandidate {
    pub snippet: String,
    pub edge: WindowEdge,
    pub repeat_count: usize,
    /// Indices of the spine documents the snippet was seen in.
    pub documents: BTreeSet<usize>,
}

impl BannerCandidate {
    pub fn ratio(&self, total_documents: usize) -> f64 {
        if total_documents == 0 {
            return 0.0;
        }
        self.repeat_count as f64 / total_documents as f64
    }

    /// A snippet seen in a single document never repeats, whatever the
    /// ratio says.
    pub fn is_eligible(&self, total_documents: usize, min_repeat: f64) -> bool {
        self.repeat_count >= 2 && self.ratio(total_documents) >= min_repeat
    }
}

fn is_edge_token(token: &str) -> bool {
    PAGE_NUMBER.is_match(token) || EDGE_ORNAMENT.is_match(token)
}

/// Normalizes a window snippet for grouping: NFKC, soft hyphens dropped,
/// page numbers and their ornaments trimmed from both ends, whitespace
/// collapsed, case-folded. Digits inside the snippet are kept.
/// Returns `None` when nothing is left.
pub fn normalize_snippet(text: &str) -> Option<String> {
    let folded: String = text.nfkc().filter(|c| *c != '\u{ad}').collect();
    let all: Vec<&str> = folded.split_whitespace().collect();
    let mut tokens = all.as_slice();
    while let Some((first, rest)) = tokens.split_first() {
        if !is_edge_token(first) {
            break;
        }
        tokens = rest;
    }
    while let Some((last, rest)) = tokens.split_last() {
        if !is_edge_token(last) {
            break;
        }
        tokens = rest;
    }
    let snippet = collapse_whitespace(&tokens.join(" ")).to_lowercase();
    if snippet.is_empty() { None } else { Some(snippet) }
}

/// Window blocks that may be banners. Headings belong to the chapter they
/// open, however often their wording repeats.
fn window_candidates(doc: &Document, spans: Vec<BlockSpan>) -> Vec<BlockSpan> {
    spans
        .into_iter()
        .filter(|span| !doc.body().at_path(&span.path).is_some_and(Element::is_heading))
        .collect()
}

/// The repetition table for one corpus.
#[derive(Debug, Clone, Default)]
pub struct BannerTable {
    pub total_documents: usize,
    pub candidates: BTreeMap<(WindowEdge, String), BannerCandidate>,
}

impl BannerTable {
    pub fn build(corpus: &Corpus, top_chars: usize, bottom_chars: usize) -> Self {
        let mut table = Self {
            total_documents: corpus.len(),
            candidates: BTreeMap::new(),
        };
        for (idx, doc) in corpus.documents.iter().enumerate() {
            for span in window_candidates(doc, doc.top_blocks(top_chars)) {
                table.observe(WindowEdge::Top, &span.text, idx);
            }
            for span in window_candidates(doc, doc.bottom_blocks(bottom_chars)) {
                table.observe(WindowEdge::Bottom, &span.text, idx);
            }
        }
        table
    }

    fn observe(&mut self, edge: WindowEdge, text: &str, document: usize) {
        let Some(snippet) = normalize_snippet(text) else {
            return;
        };
        let candidate = self
            .candidates
            .entry((edge, snippet.clone()))
            .or_insert_with(|| BannerCandidate {
                snippet,
                edge,
                repeat_count: 0,
                documents: BTreeSet::new(),
            });
        if candidate.documents.insert(document) {
            candidate.repeat_count += 1;
        }
    }

    /// Candidates at or above the threshold.
    pub fn banners(&self, min_repeat: f64) -> Vec<&BannerCandidate> {
        self.candidates
            .values()
            .filter(|c| c.is_eligible(self.total_documents, min_repeat))
            .collect()
    }

    /// Snippets that do repeat but not often enough to be removed.
    pub fn kept(&self, min_repeat: f64) -> Vec<&BannerCandidate> {
        self.candidates
            .values()
            .filter(|c| c.repeat_count >= 2 && !c.is_eligible(self.total_documents, min_repeat))
            .collect()
    }
}

/// Runs detection and removal over the corpus.
pub fn strip_banners(corpus: &mut Corpus, config: &CleanConfig) -> ReportCounters {
    let mut counters = ReportCounters::default();
    if !config.banner_enabled {
        return counters;
    }

    let table = BannerTable::build(corpus, config.banner_top_chars, config.banner_bottom_chars);
    let banners = table.banners(config.banner_min_repeat);
    counters.banners_kept = table.kept(config.banner_min_repeat).len() as u64;

    let mut plan: BTreeMap<usize, Vec<(WindowEdge, &str)>> = BTreeMap::new();
    for banner in &banners {
        debug!(
            snippet = %banner.snippet,
            edge = ?banner.edge,
            repeats = banner.repeat_count,
            total = table.total_documents,
            "banner detected"
        );
        for &doc in &banner.documents {
            plan.entry(doc).or_default().push((banner.edge, banner.snippet.as_str()));
        }
    }

    for (doc_idx, targets) in plan {
        if let Some(doc) = corpus.documents.get_mut(doc_idx) {
            counters.banners_removed += remove_window_blocks(doc, &targets, config) as u64;
        }
    }

    for doc in &mut corpus.documents {
        counters.banners_removed += apply_rules(doc, &config.banners) as u64;
    }
    counters
}

/// Removes the window blocks whose normalized text matches a target.
fn remove_window_blocks(doc: &mut Document, targets: &[(WindowEdge, &str)], config: &CleanConfig) -> usize {
    let mut doomed: Vec<Vec<usize>> = Vec::new();
    let windows = [
        (WindowEdge::Top, window_candidates(doc, doc.top_blocks(config.banner_top_chars))),
        (WindowEdge::Bottom, window_candidates(doc, doc.bottom_blocks(config.banner_bottom_chars))),
    ];
    for (edge, spans) in windows {
        for span in spans {
            let matches = normalize_snippet(&span.text)
                .is_some_and(|s| targets.iter().any(|(e, t)| *e == edge && *t == s));
            if matches && !doomed.contains(&span.path) {
                doomed.push(span.path);
            }
        }
    }
    remove_paths(doc, doomed)
}

/// Deletes elements by path, deepest and last first so the remaining
/// paths stay valid.
fn remove_paths(doc: &mut Document, mut paths: Vec<Vec<usize>>) -> usize {
    paths.sort();
    let mut removed = 0;
    for path in paths.iter().rev() {
        let Some((&last, parent_path)) = path.split_last() else {
            continue;
        };
        let Some(parent) = doc.body_mut().at_path_mut(parent_path) else {
            continue;
        };
        if last < parent.children.len() {
            parent.children.remove(last);
            if last > 0 && parent.children[last - 1].is_blank_text() {
                parent.children.remove(last - 1);
            }
            removed += 1;
        }
    }
    removed
}

/// Explicit configured banners: every `rule.tag` element containing the text.
fn apply_rules(doc: &mut Document, rules: &[BannerRule]) -> usize {
    rules
        .iter()
        .filter(|rule| !rule.text_contains.is_empty())
        .map(|rule| remove_matching(doc.body_mut(), rule))
        .sum()
}

fn remove_matching(el: &mut Element, rule: &BannerRule) -> usize {
    let mut removed = 0;
    let mut idx = 0;
    while idx < el.children.len() {
        let drop = match &mut el.children[idx] {
            Node::Element(child) if child.is(&rule.tag) && child.text().contains(&rule.text_contains) => true,
            Node::Element(child) => {
                removed += remove_matching(child, rule);
                false
            }
            _ => false,
        };
        if drop {
            el.children.remove(idx);
            removed += 1;
        } else {
            idx += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(bodies: &[&str]) -> Corpus {
        let sources: Vec<(String, String)> = bodies
            .iter()
            .enumerate()
            .map(|(i, body)| (format!("ch{i}.xhtml"), format!("<html><body>{body}</body></html>")))
            .collect();
        Corpus::from_sources("book", sources.iter().map(|(h, s)| (h.as_str(), s.as_str()))).unwrap()
    }

    fn config(min_repeat: f64) -> CleanConfig {
        CleanConfig {
            banner_min_repeat: min_repeat,
            banner_top_chars: 40,
            banner_bottom_chars: 40,
            ..CleanConfig::default()
        }
    }

    /// `k` of `n` documents carry the running header.
    fn header_corpus(k: usize, n: usize) -> Corpus {
        let bodies: Vec<String> = (0..n)
            .map(|i| {
                let header = if i < k {
                    format!("<p>ACME Scans — page {}</p>", i + 10)
                } else {
                    String::new()
                };
                let name = ["Alpha", "Beta", "Gamma", "Delta", "Epsilon"][i % 5];
                format!(
                    "{header}<p>Chapter {name} opens with a long paragraph of body text that fills the window.</p>"
                )
            })
            .collect();
        let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
        corpus(&refs)
    }

    fn remaining_headers(corpus: &Corpus) -> usize {
        corpus
            .documents
            .iter()
            .filter(|d| d.rendered_text().contains("ACME"))
            .count()
    }

    #[test]
    fn test_normalize_strips_page_numbers() {
        assert_eq!(normalize_snippet("ACME  Scans — Page 12"), normalize_snippet("acme scans — page [7]"));
        assert_eq!(normalize_snippet(" - 12 - "), None);
        assert_eq!(normalize_snippet("Ch\u{ad}apter"), Some("chapter".to_string()));
        assert_eq!(normalize_snippet("[12] ACME Scans"), Some("acme scans".to_string()));
    }

    #[test]
    fn test_normalize_keeps_inner_digits() {
        assert_eq!(normalize_snippet("Volume 3 of the set"), Some("volume 3 of the set".to_string()));
        assert_ne!(normalize_snippet("Part 1 begins"), normalize_snippet("Part 2 begins"));
    }

    #[test]
    fn test_numbered_headings_are_not_banners() {
        let bodies: Vec<String> = (1..=4)
            .map(|n| format!("<h1>Chapter {n}</h1><p>Body text number {n} goes on for a while here.</p>"))
            .collect();
        let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
        let mut c = corpus(&refs);
        let counters = strip_banners(&mut c, &CleanConfig::default());
        assert_eq!(counters.banners_removed, 0);
        for (i, doc) in c.documents.iter().enumerate() {
            assert!(doc.rendered_text().starts_with(&format!("Chapter {}", i + 1)));
        }
    }

    #[test]
    fn test_removed_at_threshold() {
        let mut c = header_corpus(3, 4);
        let counters = strip_banners(&mut c, &config(0.75));
        assert_eq!(counters.banners_removed, 3);
        assert_eq!(remaining_headers(&c), 0);
    }

    #[test]
    fn test_kept_just_above_ratio() {
        let mut c = header_corpus(3, 4);
        let counters = strip_banners(&mut c, &config(0.76));
        assert_eq!(counters.banners_removed, 0);
        assert_eq!(counters.banners_kept, 1);
        assert_eq!(remaining_headers(&c), 3);
    }

    #[test]
    fn test_single_document_has_no_banners() {
        let mut c = corpus(&["<p>Only one chapter here.</p>"]);
        let counters = strip_banners(&mut c, &config(0.5));
        assert!(counters.is_zero());
        assert_eq!(c.documents[0].rendered_text(), "Only one chapter here.");
    }

    #[test]
    fn test_disabled_reports_nothing() {
        let mut c = header_corpus(4, 4);
        let counters = strip_banners(
            &mut c,
            &CleanConfig {
                banner_enabled: false,
                ..config(0.5)
            },
        );
        assert!(counters.is_zero());
        assert_eq!(remaining_headers(&c), 4);
    }

    #[test]
    fn test_bottom_window_footer() {
        let mut c = corpus(&[
            "<p>Alpha text that is the real content of the first chapter.</p><p>Scanned for ACME</p>",
            "<p>Beta text that is the real content of the second chapter.</p><p>Scanned for ACME</p>",
        ]);
        let counters = strip_banners(&mut c, &config(1.0));
        assert_eq!(counters.banners_removed, 2);
        assert!(c.documents[0].rendered_text().starts_with("Alpha"));
        assert!(!c.documents[1].rendered_text().contains("Scanned"));
    }

    #[test]
    fn test_short_document_uses_whole_text() {
        let mut c = corpus(&["<p>Header</p>", "<p>Header</p><p>Body</p>"]);
        let counters = strip_banners(&mut c, &CleanConfig { banner_top_chars: 500, ..config(1.0) });
        assert_eq!(counters.banners_removed, 2);
    }

    #[test]
    fn test_explicit_rule() {
        let mut c = corpus(&["<div class=\"pg\">Project Gutenberg license</div><p>Text</p>"]);
        let config = CleanConfig {
            banner_enabled: true,
            banners: vec![BannerRule {
                text_contains: "Project Gutenberg".into(),
                tag: "div".into(),
            }],
            banner_min_repeat: 1.0,
            banner_top_chars: 0,
            banner_bottom_chars: 0,
            ..CleanConfig::default()
        };
        let counters = strip_banners(&mut c, &config);
        assert_eq!(counters.banners_removed, 1);
        assert_eq!(c.documents[0].rendered_text(), "Text");
    }
}
