use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::corpus::Document;
use crate::error::ConfigError;
use crate::markup::{Element, Node, collapse_whitespace, nodes_text};
use crate::report::ReportCounters;

lazy_static! {
    // Digitization watermarks, including the OCR-mangled "Google" logo
    static ref WATERMARKS: Vec<Regex> = vec![
        Regex::new(r"^(?i)Digitized\s+by\s+[VLC]j?OOQ(?:IC|LC|lC)$").unwrap(),
        Regex::new(r"^(?i)Digitized\s+by\s+Google$").unwrap(),
        Regex::new(r"^(?i)Digitized\s+by\s+the\s+Internet\s+Archive.*$").unwrap(),
    ];
}

/// Markup dropped whatever its text: elements by tag, attributes anywhere,
/// attributes on particular tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupBlacklist {
    pub tags: Vec<String>,
    pub attributes: Vec<String>,
    pub attributes_on_tags: BTreeMap<String, Vec<String>>,
}

impl MarkupBlacklist {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.attributes.is_empty() && self.attributes_on_tags.is_empty()
    }

    fn drops_attribute(&self, el: &Element, key: &str) -> bool {
        self.attributes.iter().any(|a| a == key)
            || self
                .attributes_on_tags
                .iter()
                .any(|(tag, attrs)| el.is(tag) && attrs.iter().any(|a| a == key))
    }

    /// Applies the lists below `el` (and to `el`'s own attributes). Returns
    /// the number of elements and attributes removed.
    pub fn apply(&self, el: &mut Element) -> usize {
        let before = el.attrs.len();
        let keep: Vec<bool> = el.attrs.iter().map(|(key, _)| !self.drops_attribute(el, key)).collect();
        let mut keep = keep.into_iter();
        el.attrs.retain(|_| keep.next().unwrap_or(true));
        let mut removed = before - el.attrs.len();

        let mut idx = 0;
        while idx < el.children.len() {
            let doomed = match &mut el.children[idx] {
                Node::Element(child) if self.tags.iter().any(|tag| child.is(tag)) => true,
                Node::Element(child) => {
                    removed += self.apply(child);
                    false
                }
                _ => false,
            };
            if doomed {
                el.children.remove(idx);
                removed += 1;
                if idx > 0 && el.children[idx - 1].is_blank_text() {
                    el.children.remove(idx - 1);
                    idx -= 1;
                }
            } else {
                idx += 1;
            }
        }
        removed
    }
}

/// Short-line removal by full-line regular expression match, plus the
/// markup blacklist.
#[derive(Debug, Clone)]
pub struct Blacklist {
    patterns: Vec<Regex>,
    max_line_len: usize,
    markup: MarkupBlacklist,
}

impl Blacklist {
    /// Compiles every pattern anchored to the whole line. A bad pattern is a
    /// configuration error for the whole batch.
    pub fn compile<S: AsRef<str>>(
        patterns: &[S],
        max_line_len: usize,
        builtin_watermarks: bool,
    ) -> Result<Self, ConfigError> {
        let mut compiled = patterns
            .iter()
            .map(|p| {
                let pattern = p.as_ref();
                Regex::new(&format!("^(?:{pattern})$")).map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if builtin_watermarks {
            compiled.extend(WATERMARKS.iter().cloned());
        }
        Ok(Self {
            patterns: compiled,
            max_line_len,
            markup: MarkupBlacklist::default(),
        })
    }

    pub fn with_markup(mut self, markup: MarkupBlacklist) -> Self {
        self.markup = markup;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.markup.is_empty()
    }

    /// A line qualifies when it is at most `max_line_len` characters and at
    /// least one pattern matches all of it.
    pub fn matches_line(&self, line: &str) -> bool {
        let line = collapse_whitespace(line);
        !line.is_empty()
            && line.chars().count() <= self.max_line_len
            && self.patterns.iter().any(|p| p.is_match(&line))
    }

    /// Drops the `<br/>`-separated lines of `block` that match on their
    /// own, with the break that set each one apart.
    fn filter_broken_lines(&self, block: &mut Element) -> usize {
        if !block.children.iter().any(|n| n.is_element("br")) {
            return 0;
        }
        let mut lines: Vec<(Option<Node>, Vec<Node>)> = vec![(None, Vec::new())];
        for node in std::mem::take(&mut block.children) {
            if node.is_element("br") {
                lines.push((Some(node), Vec::new()));
            } else if let Some((_, line)) = lines.last_mut() {
                line.push(node);
            }
        }

        let mut removed = 0;
        let mut emitted = false;
        for (br, line) in lines {
            if self.matches_line(&nodes_text(&line)) {
                removed += 1;
                continue;
            }
            if let Some(br) = br.filter(|_| emitted) {
                block.children.push(br);
            }
            block.children.extend(line);
            emitted = true;
        }
        removed
    }

    pub fn filter_document(&self, doc: &mut Document) -> ReportCounters {
        let mut removed = self.markup.apply(&mut doc.markup.root);
        if !self.patterns.is_empty() {
            let body = doc.body_mut();
            removed += body.retain_leaf_blocks(&mut |block| !self.matches_line(&block.text()));
            body.for_each_leaf_block_mut(&mut |block| removed += self.filter_broken_lines(block));
        }
        ReportCounters {
            blacklist_removals: removed as u64,
            ..ReportCounters::default()
        }
    }
}
