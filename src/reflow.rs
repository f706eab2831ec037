//! Soft hyphen removal, hyphenation/line-wrap repair and empty paragraph
//! collapse, one document at a time.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::corpus::Document;
use crate::lexicon::{Lexicon, Whitelist};
use crate::markup::{Element, Node};
use crate::merge::ends_sentence;
use crate::report::ReportCounters;

const SOFT_HYPHEN: char = '\u{ad}';

lazy_static! {
    // "exam-\nple", "mother-in-\nlaw": the left side keeps inner hyphens so
    // the whole compound can be checked against the whitelist.
    static ref HYPHEN_BREAK: Regex =
        Regex::new(r"(\p{L}[\p{L}\-]*)-[ \t]*\r?\n[ \t]*(\p{Ll}[\p{L}\-]*)").unwrap();
    static ref WORD_BREAK: Regex =
        Regex::new(r"(\p{L}+)[ \t]*\r?\n[ \t]*(\p{Ll}\p{L}*)").unwrap();
    static ref TRAILING_FRAGMENT: Regex = Regex::new(r"(\p{L}[\p{L}\-]*)-\s*$").unwrap();
    static ref LEADING_FRAGMENT: Regex = Regex::new(r"^\s*(\p{Ll}[\p{L}\-]*)").unwrap();
}

/// Removes soft hyphens in place, returning how many were dropped.
pub fn strip_soft_hyphens(text: &mut String) -> u64 {
    let count = text.chars().filter(|c| *c == SOFT_HYPHEN).count();
    if count > 0 {
        text.retain(|c| c != SOFT_HYPHEN);
    }
    count as u64
}

pub struct Reflow<'a> {
    pub whitelist: &'a Whitelist,
    pub lexicon: Option<&'a Lexicon>,
    pub closing: &'a [char],
}

impl Reflow<'_> {
    /// Rejoins words broken across a newline inside one text run.
    /// Returns the new text and the number of joins.
    pub fn rejoin_text(&self, text: &str) -> (String, u64) {
        let mut fixes = 0;
        let hyphenated = HYPHEN_BREAK.replace_all(text, |caps: &Captures| {
            let compound = format!("{}-{}", &caps[1], &caps[2]);
            if self.whitelist.contains(&compound) {
                caps[0].to_string()
            } else {
                fixes += 1;
                format!("{}{}", &caps[1], &caps[2])
            }
        });

        let Some(lexicon) = self.lexicon else {
            return (hyphenated.into_owned(), fixes);
        };
        let joined = WORD_BREAK.replace_all(&hyphenated, |caps: &Captures| {
            let (left, right) = (&caps[1], &caps[2]);
            let word = format!("{left}{right}");
            if lexicon.check(&word) && !(lexicon.check(left) && lexicon.check(right)) {
                fixes += 1;
                word
            } else {
                caps[0].to_string()
            }
        });
        (joined.into_owned(), fixes)
    }

    pub fn reflow_document(&self, doc: &mut Document) -> ReportCounters {
        let mut counters = ReportCounters::default();
        let body = doc.body_mut();

        body.for_each_text_mut(&mut |text| {
            counters.soft_hyphens_removed += strip_soft_hyphens(text);
        });

        body.for_each_leaf_block_mut(&mut |block| {
            if block.is("pre") {
                return;
            }
            block.for_each_text_mut(&mut |text| {
                let (fixed, fixes) = self.rejoin_text(text);
                if fixes > 0 {
                    *text = fixed;
                    counters.linebreak_fixes += fixes;
                }
            });
            counters.linebreak_fixes += self.repair_breaks(block);
        });

        counters.empty_paragraphs_collapsed += collapse_empty_paragraphs(body);
        counters
    }

    /// Handles `text-<br/>text` hyphenation and mid-sentence `<br/>` wraps.
    fn repair_breaks(&self, el: &mut Element) -> u64 {
        let mut fixes = 0;
        let mut idx = 0;
        while idx < el.children.len() {
            if let Some(merged) = self.join_around_break(el, idx) {
                // children[idx - 1] .. children[idx + 1] collapse into one text run
                el.children.splice(idx - 1..=idx + 1, [Node::Text(merged)]);
                fixes += 1;
                continue;
            }
            if let Node::Element(child) = &mut el.children[idx] {
                fixes += self.repair_breaks(child);
            }
            idx += 1;
        }
        fixes
    }

    fn join_around_break(&self, el: &Element, idx: usize) -> Option<String> {
        if idx == 0 || idx + 1 >= el.children.len() {
            return None;
        }
        let Node::Element(br) = &el.children[idx] else {
            return None;
        };
        if !br.is("br") {
            return None;
        }
        let (Node::Text(before), Node::Text(after)) = (&el.children[idx - 1], &el.children[idx + 1]) else {
            return None;
        };

        let next = LEADING_FRAGMENT.captures(after)?;
        if let Some(prev) = TRAILING_FRAGMENT.captures(before) {
            let compound = format!("{}-{}", &prev[1], &next[1]);
            if self.whitelist.contains(&compound) {
                return None;
            }
            let head = &before[..prev.get(1)?.end()];
            return Some(format!("{head}{}", after.trim_start()));
        }

        if before.trim().is_empty() || ends_sentence(before, self.closing) {
            return None;
        }
        Some(format!("{} {}", before.trim_end(), after.trim_start()))
    }
}

/// Drops `<p>` elements with no visible text and no media. Paragraphs
/// with an `id` stay, since something may link to them.
pub fn collapse_empty_paragraphs(el: &mut Element) -> u64 {
    let mut removed = 0;
    let mut idx = 0;
    while idx < el.children.len() {
        let drop = match &mut el.children[idx] {
            Node::Element(child) if is_empty_paragraph(child) => true,
            Node::Element(child) => {
                removed += collapse_empty_paragraphs(child);
                false
            }
            _ => false,
        };
        if drop {
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

fn is_empty_paragraph(el: &Element) -> bool {
    el.is("p") && el.id().is_none() && el.text().trim().is_empty() && !el.contains_media()
}
