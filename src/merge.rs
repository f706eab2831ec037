//! Merging of paragraphs that were split mid-sentence.
//!
//! The boundary test is a pure predicate over the two text fragments; the
//! tree walk only decides which `<p>` pairs are candidates. An absorbed
//! fragment that finishes the sentence and then starts another is split
//! there, so only the continuation joins the paragraph before it. Known
//! limitation: genuinely separate short paragraphs without closing
//! punctuation followed by a lowercase start get merged too.

use crate::corpus::Document;
use crate::markup::{Element, Node, nodes_text};
use crate::report::ReportCounters;

/// May follow the terminal mark: "end.”", "(end.)"
const CLOSERS: &[char] = &['"', '\'', '\u{201d}', '\u{2019}', '\u{bb}', ')', ']'];
/// May precede the first letter: "“Quote", "(aside"
const OPENERS: &[char] = &['"', '\'', '\u{201c}', '\u{2018}', '\u{ab}', '(', '['];

/// Whether `text` ends with one of `closing`, optionally followed by
/// closing quotes or brackets.
pub fn ends_sentence(text: &str, closing: &[char]) -> bool {
    text.trim_end()
        .trim_end_matches(CLOSERS)
        .chars()
        .next_back()
        .is_some_and(|c| closing.contains(&c))
}

/// Whether `text` opens like a new paragraph: a capital letter, a bullet,
/// a list number or some other non-letter marker.
pub fn starts_structurally(text: &str) -> bool {
    let trimmed = text.trim_start().trim_start_matches(OPENERS);
    let Some(first) = trimmed.chars().next() else {
        return true;
    };
    if first.is_lowercase() {
        return false;
    }
    if first.is_ascii_digit() {
        let rest = trimmed.trim_start_matches(|c: char| c.is_ascii_digit());
        return rest.starts_with(". ") || rest.starts_with(") ");
    }
    // Capitals, bullets, uncased scripts and other symbols
    true
}

/// The break between `prev` and `next` is an OCR artifact.
pub fn is_illegitimate_break(prev: &str, next: &str, closing: &[char]) -> bool {
    if prev.trim().is_empty() || next.trim().is_empty() {
        return false;
    }
    !ends_sentence(prev, closing) && !starts_structurally(next)
}

fn is_note_block(el: &Element) -> bool {
    crate::footnotes::is_explicit_note(el)
}

/// A note reference: `<sup>1</sup>`, or a link that is or wraps one.
fn is_note_marker(el: &Element) -> bool {
    el.is("sup")
        || (el.is("a")
            && (el.has_token("epub:type", "noteref")
                || el.has_token("role", "doc-noteref")
                || el.children.iter().any(|c| c.is_element("sup"))))
}

/// Text of `el` without trailing note markers, so "ended.<sup>1</sup>"
/// reads as "ended.".
fn text_before_markers(el: &Element) -> String {
    let mut end = el.children.len();
    while end > 0 {
        match &el.children[end - 1] {
            Node::Text(t) if t.trim().is_empty() => end -= 1,
            Node::Element(marker) if is_note_marker(marker) => end -= 1,
            _ => break,
        }
    }
    nodes_text(&el.children[..end])
}

fn mergeable(first: &Element, second: &Element, closing: &[char]) -> bool {
    first.is("p")
        && second.is("p")
        && first.attr("class") == second.attr("class")
        && second.id().is_none()
        && !is_note_block(first)
        && !is_note_block(second)
        && is_illegitimate_break(&text_before_markers(first), &second.text(), closing)
}

/// Index of the next element sibling after `idx`, skipping whitespace.
fn next_element(children: &[Node], idx: usize) -> Option<usize> {
    for (offset, node) in children[idx + 1..].iter().enumerate() {
        match node {
            Node::Element(_) => return Some(idx + 1 + offset),
            n if n.is_blank_text() => continue,
            _ => return None,
        }
    }
    None
}

/// Appends `second`'s content to `first`, separated by one space.
fn absorb(first: &mut Element, second: Element) {
    if let Some(Node::Text(tail)) = first.children.last_mut() {
        let trimmed = tail.trim_end().len();
        tail.truncate(trimmed);
    }
    first.children.push(Node::Text(" ".to_string()));
    let mut rest = second.children;
    if let Some(Node::Text(head)) = rest.first_mut() {
        *head = head.trim_start().to_string();
    }
    first.children.extend(rest);
}

/// "Mr.", "St.", "J.": a short capitalized word before the mark.
fn is_abbreviation(head: &str) -> bool {
    head.split_whitespace().next_back().is_some_and(|word| {
        let word = word.trim_start_matches(OPENERS);
        word.chars().count() <= 3 && word.chars().next().is_some_and(char::is_uppercase)
    })
}

/// Byte offset just past the first sentence end in `text` that is followed
/// by whitespace and something that opens a paragraph of its own.
fn sentence_end(text: &str, closing: &[char]) -> Option<usize> {
    text.char_indices()
        .filter(|(_, c)| closing.contains(c))
        .find_map(|(at, c)| {
            let after = at + c.len_utf8();
            let cut = text.len() - text[after..].trim_start_matches(CLOSERS).len();
            let rest = &text[cut..];
            let opened = rest.starts_with(char::is_whitespace)
                && !rest.trim_start().is_empty()
                && starts_structurally(rest)
                && !is_abbreviation(&text[..at]);
            opened.then_some(cut)
        })
}

/// Splits a continuation fragment at its first sentence end: the fragment
/// up to the end stays in `para`, what follows moves into a new sibling
/// paragraph with the same attributes. Only text directly inside `para`
/// is considered.
fn split_continuation(para: &mut Element, closing: &[char]) -> Option<Element> {
    let (idx, cut) = para.children.iter().enumerate().find_map(|(idx, node)| match node {
        Node::Text(text) => sentence_end(text, closing).map(|cut| (idx, cut)),
        _ => None,
    })?;

    let Node::Text(text) = &mut para.children[idx] else {
        return None;
    };
    let rest = text[cut..].trim_start().to_string();
    text.truncate(cut);

    let mut tail = Element::new(para.name.clone());
    tail.attrs = para.attrs.clone();
    tail.children.push(Node::Text(rest));
    tail.children.extend(para.children.drain(idx + 1..));
    Some(tail)
}

/// Greedy left-to-right merge over every sibling list under `el`.
pub fn merge_paragraphs(el: &mut Element, closing: &[char]) -> u64 {
    let mut merged = 0;
    let mut idx = 0;
    while idx < el.children.len() {
        if let Some(next) = next_element(&el.children, idx) {
            let candidate = match (&el.children[idx], &el.children[next]) {
                (Node::Element(a), Node::Element(b)) => mergeable(a, b, closing),
                _ => false,
            };
            if candidate {
                let mut between: Vec<Node> = el.children.drain(idx + 1..=next).collect();
                let Some(Node::Element(mut second)) = between.pop() else {
                    idx += 1;
                    continue;
                };
                let tail = split_continuation(&mut second, closing);
                if let Some(Node::Element(first)) = el.children.get_mut(idx) {
                    absorb(first, second);
                    merged += 1;
                }
                if let Some(tail) = tail {
                    between.push(Node::Element(tail));
                    el.children.splice(idx + 1..idx + 1, between);
                }
                // Stay on idx: the merged paragraph may chain with its new neighbour.
                continue;
            }
        }
        if let Node::Element(child) = &mut el.children[idx] {
            merged += merge_paragraphs(child, closing);
        }
        idx += 1;
    }
    merged
}

pub fn merge_document(doc: &mut Document, closing: &[char]) -> ReportCounters {
    ReportCounters {
        illegitimate_paragraphs_merged: merge_paragraphs(doc.body_mut(), closing),
        ..ReportCounters::default()
    }
}
