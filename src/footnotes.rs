//! Footnote discovery and bidirectional linking across the spine.
//!
//! Notes are found first (explicit markup, link targets, then label-led
//! blocks at the end of a document or under a "Notes" heading), so that the
//! marker scan can skip note bodies. Markers are then resolved in spine
//! order: an existing link wins, otherwise the nearest following unclaimed
//! note with the same label. A note has at most one canonical referrer;
//! further markers with an identical label become secondary references.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::corpus::Corpus;
use crate::links::{href_between, locate, split_internal};
use crate::markup::{Element, Node, collapse_whitespace, leaf_block_paths};
use crate::report::ReportCounters;

pub const EPUB_NS: &str = "http://www.idpf.org/2007/ops";
pub const BACKLINK_CLASS: &str = "backlink";
pub const SECONDARY_BACKLINK_CLASS: &str = "backlink secondary";
const BACKLINK_TEXT: &str = "\u{21a9}";

const NOTE_TYPES: &[&str] = &["footnote", "endnote", "rearnote", "note"];
const REF_PREFIXES: &[&str] = &["fn", "note", "footnote"];
const BACKREF_PREFIXES: &[&str] = &["fnref", "noteref", "ref"];

lazy_static! {
    // Whole text of a superscript marker: "1", "[12]", "(3)", "*", "††"
    static ref MARKER_LABEL: Regex =
        Regex::new(r"^[\[(]?([0-9]{1,3}|[*†‡§¶‖#]{1,4})[\])]?$").unwrap();
    // Label at the start of a note block, plus the character after it
    static ref LEADING_LABEL: Regex = Regex::new(
        r"(?s)^\s*(?:\[(?P<bracket>[0-9]{1,3}|[*†‡§¶‖#]{1,4})\]|\((?P<paren>[0-9]{1,3}|[*†‡§¶‖#]{1,4})\)|(?P<bare>[0-9]{1,3}|[*†‡§¶‖#]{1,4})(?P<punct>[.):])?)(?P<next>.)"
    )
    .unwrap();
    static ref NOTES_HEADING: Regex = Regex::new(r"(?i)^(?:foot|end)?notes?$").unwrap();
}

/// An element marked up as note content.
pub fn is_explicit_note(el: &Element) -> bool {
    if el.is("a") || el.is("sup") {
        return false;
    }
    NOTE_TYPES.iter().any(|t| el.has_token("epub:type", t))
        || el.has_token("role", "doc-footnote")
        || el.has_token("role", "doc-endnote")
        || el.attr("class").is_some_and(|class| {
            class.split_whitespace().any(|token| {
                let token = token.to_ascii_lowercase();
                token.contains("footnote") || token.contains("endnote")
            })
        })
}

pub fn is_backlink(el: &Element) -> bool {
    el.is("a") && (el.has_class(BACKLINK_CLASS) || el.has_token("role", "doc-backlink"))
}

/// Label a note block opens with: `1.`, `[2]`, `(3)`, `*`, `4 Text`.
pub fn leading_label(text: &str) -> Option<String> {
    let caps = LEADING_LABEL.captures(text)?;
    let next = caps.name("next")?.as_str().chars().next()?;
    if next.is_ascii_digit() {
        return None;
    }
    if let Some(label) = caps.name("bracket").or_else(|| caps.name("paren")) {
        return Some(label.as_str().to_string());
    }
    let bare = caps.name("bare")?;
    if caps.name("punct").is_none() && !next.is_whitespace() {
        return None;
    }
    Some(bare.as_str().to_string())
}

fn strip_brackets(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || matches!(c, '[' | ']' | '(' | ')'))
        .to_string()
}

fn symbol_name(c: char) -> Option<&'static str> {
    let name = match c {
        '*' => "star",
        '†' => "dagger",
        '‡' => "ddagger",
        '§' => "sect",
        '¶' => "para",
        '‖' => "parallel",
        '#' => "hash",
        _ => return None,
    };
    Some(name)
}

/// Id suffix derived from a marker label: `1` -> `1`, `*` -> `-star`,
/// `**` -> `-star2`, `a` -> `-a`.
pub fn id_suffix(label: &str) -> String {
    if !label.is_empty() && label.chars().all(|c| c.is_ascii_digit()) {
        return label.to_string();
    }
    let names: Vec<&str> = label.chars().filter_map(symbol_name).collect();
    if !names.is_empty() && names.len() == label.chars().count() {
        if names.iter().all(|n| *n == names[0]) {
            return match names.len() {
                1 => format!("-{}", names[0]),
                n => format!("-{}{n}", names[0]),
            };
        }
        return format!("-{}", names.join("-"));
    }
    let slug: String = label
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    if slug.is_empty() { "-note".to_string() } else { format!("-{slug}") }
}

/// Per-book claimed-id table. Seeded with every id already present so new
/// ids never collide with existing ones.
#[derive(Debug, Default)]
pub struct IdAllocator {
    claimed: HashSet<String>,
}

impl IdAllocator {
    pub fn seeded(corpus: &Corpus) -> Self {
        let mut ids = Vec::new();
        for doc in &corpus.documents {
            doc.markup.root.collect_ids(&mut ids);
        }
        Self {
            claimed: ids.into_iter().collect(),
        }
    }

    /// `base`, or `base-2`, `base-3` ... for the first unclaimed form.
    pub fn claim(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 1;
        while self.claimed.contains(&candidate) {
            n += 1;
            candidate = format!("{base}-{n}");
        }
        self.claimed.insert(candidate.clone());
        candidate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoteKind {
    Explicit,
    Targeted,
    Implicit,
}

#[derive(Debug, Clone)]
struct NoteBlock {
    doc: usize,
    path: Vec<usize>,
    kind: NoteKind,
    label: Option<String>,
    /// Id the note is already reachable by, on the block or inside it.
    existing_id: Option<String>,
    referrer: Option<usize>,
    secondary: Vec<usize>,
}

#[derive(Debug, Clone)]
struct NoteRef {
    doc: usize,
    path: Vec<usize>,
    label: String,
    /// `href` when the marker is already a link.
    href: Option<String>,
    existing_id: Option<String>,
    target: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
enum Resolution {
    Canonical(usize),
    Secondary(usize),
    Unresolved,
}

/// Marker label when `a` is a note reference link.
fn link_marker_label(a: &Element, in_sup: bool) -> Option<String> {
    if is_backlink(a) {
        return None;
    }
    let (_, fragment) = split_internal(a.attr("href")?)?;
    let raw = collapse_whitespace(&a.text());
    if a.has_token("epub:type", "noteref") || a.has_token("role", "doc-noteref") {
        return Some(strip_brackets(&raw));
    }
    let fragment = fragment.to_ascii_lowercase();
    if BACKREF_PREFIXES.iter().any(|p| fragment.starts_with(p)) {
        return None;
    }
    let conventional = REF_PREFIXES.iter().any(|p| fragment.starts_with(p));
    ((conventional || in_sup) && MARKER_LABEL.is_match(&raw)).then(|| strip_brackets(&raw))
}

struct RawMarker {
    path: Vec<usize>,
    label: String,
    href: Option<String>,
    id: Option<String>,
}

/// Markers under `body` in document order, never descending into `skip`.
/// `sup_links` also accepts plain fragment links wrapped in `<sup>`.
fn scan_markers(body: &Element, skip: &[Vec<usize>], sup_links: bool) -> Vec<RawMarker> {
    fn walk(
        el: &Element,
        path: &mut Vec<usize>,
        in_sup: bool,
        skip: &[Vec<usize>],
        sup_links: bool,
        out: &mut Vec<RawMarker>,
    ) {
        for (idx, child) in el.children.iter().enumerate() {
            let Node::Element(child) = child else {
                continue;
            };
            path.push(idx);
            if skip.contains(&*path) {
                // note body
            } else if child.is("a") {
                if let Some(label) = link_marker_label(child, in_sup && sup_links) {
                    out.push(RawMarker {
                        path: path.clone(),
                        label,
                        href: child.attr("href").map(str::to_string),
                        id: child.id().map(str::to_string),
                    });
                }
            } else if child.is("sup") && !child.any_descendant(&|d| d.is("a")) {
                let raw = collapse_whitespace(&child.text());
                if MARKER_LABEL.is_match(&raw) {
                    out.push(RawMarker {
                        path: path.clone(),
                        label: strip_brackets(&raw),
                        href: None,
                        id: None,
                    });
                }
            } else {
                walk(child, path, in_sup || child.is("sup"), skip, sup_links, out);
            }
            path.pop();
        }
    }
    let mut out = Vec::new();
    walk(body, &mut Vec::new(), false, skip, sup_links, &mut out);
    out
}

fn id_paths(body: &Element) -> HashMap<String, Vec<usize>> {
    fn walk(el: &Element, path: &mut Vec<usize>, out: &mut HashMap<String, Vec<usize>>) {
        for (idx, child) in el.children.iter().enumerate() {
            let Node::Element(child) = child else {
                continue;
            };
            path.push(idx);
            if let Some(id) = child.id() {
                out.entry(id.to_string()).or_insert_with(|| path.clone());
            }
            walk(child, path, out);
            path.pop();
        }
    }
    let mut out = HashMap::new();
    walk(body, &mut Vec::new(), &mut out);
    out
}

fn explicit_note_paths(el: &Element, path: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
    for (idx, child) in el.children.iter().enumerate() {
        let Node::Element(child) = child else {
            continue;
        };
        path.push(idx);
        if is_explicit_note(child) {
            out.push(path.clone());
        } else {
            explicit_note_paths(child, path, out);
        }
        path.pop();
    }
}

fn is_heading(el: &Element) -> bool {
    ["h1", "h2", "h3", "h4", "h5", "h6"].iter().any(|h| el.is(h))
}

/// Label-led leaf blocks under a notes heading or in the trailing run.
fn implicit_note_paths(body: &Element) -> Vec<Vec<usize>> {
    let blocks: Vec<(Vec<usize>, &Element)> = leaf_block_paths(body)
        .into_iter()
        .filter(|path| !path.is_empty())
        .filter_map(|path| body.at_path(&path).map(|el| (path, el)))
        .collect();

    let mut out = Vec::new();
    let mut in_notes = false;
    for (path, el) in &blocks {
        if is_heading(el) {
            in_notes = NOTES_HEADING.is_match(&collapse_whitespace(&el.text()));
        } else if in_notes && leading_label(&el.text()).is_some() {
            out.push(path.clone());
        }
    }
    for (path, el) in blocks.iter().rev() {
        let text = el.text();
        if text.trim().is_empty() {
            continue;
        }
        if is_heading(el) || leading_label(&text).is_none() {
            break;
        }
        if !out.contains(path) {
            out.push(path.clone());
        }
    }
    out
}

/// The deepest block element on `path`, or the target itself.
fn enclosing_block(body: &Element, path: &[usize]) -> Vec<usize> {
    (1..=path.len())
        .rev()
        .map(|len| &path[..len])
        .find(|prefix| body.at_path(prefix).is_some_and(Element::is_block))
        .unwrap_or(path)
        .to_vec()
}

fn discover_notes(corpus: &Corpus, id_maps: &[HashMap<String, Vec<usize>>]) -> Vec<NoteBlock> {
    let mut found: BTreeMap<(usize, Vec<usize>), (NoteKind, Option<String>)> = BTreeMap::new();

    for (doc_idx, doc) in corpus.documents.iter().enumerate() {
        let mut explicit = Vec::new();
        explicit_note_paths(doc.body(), &mut Vec::new(), &mut explicit);
        for path in explicit {
            found.insert((doc_idx, path), (NoteKind::Explicit, None));
        }
    }

    for (doc_idx, doc) in corpus.documents.iter().enumerate() {
        for marker in scan_markers(doc.body(), &[], false) {
            let Some((target, fragment)) = marker.href.as_deref().and_then(|h| locate(corpus, doc_idx, h)) else {
                continue;
            };
            let Some(path) = id_maps[target].get(fragment) else {
                continue;
            };
            let block = enclosing_block(corpus.documents[target].body(), path);
            let anchor = (block != *path).then(|| fragment.to_string());
            found.entry((target, block)).or_insert((NoteKind::Targeted, anchor));
        }
    }

    for (doc_idx, doc) in corpus.documents.iter().enumerate() {
        for path in implicit_note_paths(doc.body()) {
            found.entry((doc_idx, path)).or_insert((NoteKind::Implicit, None));
        }
    }

    // Sorted order puts an ancestor right before its descendants.
    let mut notes: Vec<NoteBlock> = Vec::new();
    for ((doc, path), (kind, anchor)) in found {
        if notes.last().is_some_and(|prev| prev.doc == doc && path.starts_with(&prev.path)) {
            continue;
        }
        let Some(el) = corpus.documents[doc].body().at_path(&path) else {
            continue;
        };
        notes.push(NoteBlock {
            doc,
            kind,
            label: leading_label(&el.text()),
            existing_id: anchor.or_else(|| el.id().map(str::to_string)),
            path,
            referrer: None,
            secondary: Vec::new(),
        });
    }
    notes
}

fn discover_references(corpus: &Corpus, notes: &[NoteBlock]) -> Vec<NoteRef> {
    let mut refs = Vec::new();
    for (doc_idx, doc) in corpus.documents.iter().enumerate() {
        let skip: Vec<Vec<usize>> = notes
            .iter()
            .filter(|n| n.doc == doc_idx)
            .map(|n| n.path.clone())
            .collect();
        refs.extend(scan_markers(doc.body(), &skip, true).into_iter().map(|m| NoteRef {
            doc: doc_idx,
            path: m.path,
            label: m.label,
            href: m.href,
            existing_id: m.id,
            target: None,
        }));
    }
    refs
}

fn note_containing(notes: &[NoteBlock], doc: usize, path: &[usize]) -> Option<usize> {
    notes.iter().position(|n| n.doc == doc && path.starts_with(&n.path))
}

fn choose(
    corpus: &Corpus,
    id_maps: &[HashMap<String, Vec<usize>>],
    refs: &[NoteRef],
    notes: &[NoteBlock],
    r: usize,
) -> Resolution {
    let marker = &refs[r];
    let by_href = marker
        .href
        .as_deref()
        .and_then(|href| locate(corpus, marker.doc, href))
        .and_then(|(doc, fragment)| {
            id_maps[doc]
                .get(fragment)
                .and_then(|path| note_containing(notes, doc, path))
        });
    if let Some(n) = by_href {
        match notes[n].referrer {
            None => return Resolution::Canonical(n),
            Some(c) if refs[c].label == marker.label => return Resolution::Secondary(n),
            Some(_) => {}
        }
    }

    if marker.label.is_empty() {
        return Resolution::Unresolved;
    }
    let here = (marker.doc, &marker.path);
    let following = notes.iter().position(|n| {
        n.referrer.is_none() && n.label.as_deref() == Some(marker.label.as_str()) && (n.doc, &n.path) > here
    });
    if let Some(n) = following {
        return Resolution::Canonical(n);
    }
    notes
        .iter()
        .rposition(|n| {
            n.referrer
                .is_some_and(|c| refs[c].doc == marker.doc && refs[c].label == marker.label)
        })
        .map(Resolution::Secondary)
        .unwrap_or(Resolution::Unresolved)
}

/// Turns `el` into a forward link, returning whether anything changed.
fn rewrite_marker(el: &mut Element, id: &str, href: &str) -> bool {
    if el.is("a") {
        let mut changed = el.set_attr("id", id);
        changed |= el.set_attr("href", href);
        if !el.has_token("epub:type", "noteref") {
            changed |= el.set_attr("epub:type", "noteref");
        }
        changed |= el.set_attr("role", "doc-noteref");
        return changed;
    }
    let mut link = Element::new("a")
        .with_attr("id", id)
        .with_attr("href", href)
        .with_attr("epub:type", "noteref")
        .with_attr("role", "doc-noteref");
    link.children = std::mem::take(&mut el.children);
    el.children.push(Node::Element(link));
    true
}

fn mark_note(el: &mut Element) {
    if !NOTE_TYPES.iter().any(|t| el.has_token("epub:type", t)) {
        el.set_attr("epub:type", "footnote");
    }
    if !(el.has_token("role", "doc-footnote") || el.has_token("role", "doc-endnote")) {
        el.set_attr("role", "doc-footnote");
    }
}

/// Path to the last nested block of a note: where the backlink goes.
fn backlink_host(note: &Element) -> Vec<usize> {
    let mut path = Vec::new();
    let mut current = note;
    loop {
        let last_block = current
            .children
            .iter()
            .enumerate()
            .rev()
            .find_map(|(idx, child)| child.as_element().filter(|el| el.is_block()).map(|el| (idx, el)));
        let Some((idx, child)) = last_block else {
            return path;
        };
        path.push(idx);
        current = child;
    }
}

/// Appends a backlink unless the note already has one to `href`.
fn append_backlink(note: &mut Element, href: &str, class: &str) -> bool {
    if note.any_descendant(&|el| is_backlink(el) && el.attr("href") == Some(href)) {
        return false;
    }
    let host_path = backlink_host(note);
    let Some(host) = note.at_path_mut(&host_path) else {
        return false;
    };
    host.children.push(Node::Text(" ".to_string()));
    host.children.push(Node::Element(
        Element::new("a")
            .with_attr("href", href)
            .with_attr("class", class)
            .with_attr("role", "doc-backlink")
            .with_text(BACKLINK_TEXT),
    ));
    true
}

/// Finds, resolves and rewrites every note reference in the corpus.
pub fn link_footnotes(corpus: &mut Corpus) -> ReportCounters {
    let mut counters = ReportCounters::default();
    let id_maps: Vec<HashMap<String, Vec<usize>>> =
        corpus.documents.iter().map(|doc| id_paths(doc.body())).collect();
    let mut notes = discover_notes(corpus, &id_maps);
    let mut refs = discover_references(corpus, &notes);

    for r in 0..refs.len() {
        match choose(corpus, &id_maps, &refs, &notes, r) {
            Resolution::Canonical(n) => {
                notes[n].referrer = Some(r);
                refs[r].target = Some(n);
            }
            Resolution::Secondary(n) => {
                notes[n].secondary.push(r);
                refs[r].target = Some(n);
                counters.secondary_references += 1;
            }
            Resolution::Unresolved => {
                counters.unresolved_markers += 1;
                warn!(
                    book = %corpus.book_id,
                    document = %corpus.documents[refs[r].doc].id,
                    label = %refs[r].label,
                    "unresolved note marker"
                );
            }
        }
    }
    for note in notes.iter().filter(|n| n.referrer.is_none() && n.kind != NoteKind::Implicit) {
        counters.orphan_notes += 1;
        warn!(
            book = %corpus.book_id,
            document = %corpus.documents[note.doc].id,
            label = note.label.as_deref().unwrap_or(""),
            "note block without a reference"
        );
    }

    let mut ids = IdAllocator::seeded(corpus);
    let note_ids: Vec<Option<(String, bool)>> = notes
        .iter()
        .map(|note| {
            let referrer = note.referrer?;
            Some(match &note.existing_id {
                Some(id) => (id.clone(), false),
                None => (ids.claim(&format!("fn{}", id_suffix(&refs[referrer].label))), true),
            })
        })
        .collect();
    let ref_ids: Vec<Option<String>> = refs
        .iter()
        .map(|r| {
            r.target?;
            Some(
                r.existing_id
                    .clone()
                    .unwrap_or_else(|| ids.claim(&format!("fnref{}", id_suffix(&r.label)))),
            )
        })
        .collect();

    let mut touched = BTreeSet::new();
    for (r, marker) in refs.iter().enumerate() {
        let (Some(n), Some(marker_id)) = (marker.target, ref_ids[r].as_deref()) else {
            continue;
        };
        let Some((note_id, _)) = &note_ids[n] else {
            continue;
        };
        let href = href_between(corpus, marker.doc, notes[n].doc, note_id);
        let Some(el) = corpus.documents[marker.doc].body_mut().at_path_mut(&marker.path) else {
            continue;
        };
        if rewrite_marker(el, marker_id, &href) {
            counters.forward_links_repaired += 1;
        }
        touched.insert(marker.doc);
    }

    for (n, note) in notes.iter().enumerate() {
        let (Some(referrer), Some((note_id, created))) = (note.referrer, &note_ids[n]) else {
            continue;
        };
        let backlink = |r: usize| href_between(corpus, note.doc, refs[r].doc, ref_ids[r].as_deref().unwrap_or_default());
        let canonical = backlink(referrer);
        let secondary: Vec<String> = note.secondary.iter().map(|&r| backlink(r)).collect();

        let Some(el) = corpus.documents[note.doc].body_mut().at_path_mut(&note.path) else {
            continue;
        };
        if *created {
            el.set_attr("id", note_id.as_str());
            counters.note_ids_created += 1;
        }
        mark_note(el);
        if append_backlink(el, &canonical, BACKLINK_CLASS) {
            counters.backlinks_added += 1;
        }
        for href in &secondary {
            append_backlink(el, href, SECONDARY_BACKLINK_CLASS);
        }
        touched.insert(note.doc);
    }

    for doc in touched {
        let root = &mut corpus.documents[doc].markup.root;
        if root.attr("xmlns:epub").is_none() {
            root.set_attr("xmlns:epub", EPUB_NS);
        }
    }

    debug!(
        book = %corpus.book_id,
        notes = notes.len(),
        references = refs.len(),
        forward = counters.forward_links_repaired,
        backlinks = counters.backlinks_added,
        "footnotes linked"
    );
    counters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(docs: &[(&str, &str)]) -> Corpus {
        let sources: Vec<(String, String)> = docs
            .iter()
            .map(|(href, body)| (href.to_string(), format!("<html><body>{body}</body></html>")))
            .collect();
        Corpus::from_sources("book", sources.iter().map(|(h, s)| (h.as_str(), s.as_str()))).unwrap()
    }

    fn anchors<'a>(el: &'a Element, out: &mut Vec<&'a Element>) {
        for child in &el.children {
            if let Node::Element(child) = child {
                if child.is("a") {
                    out.push(child);
                }
                anchors(child, out);
            }
        }
    }

    /// Every noteref points at an element whose single canonical backlink
    /// points back at that noteref (or at the canonical one, for secondaries).
    fn assert_bidirectional(c: &Corpus) {
        let mut all: Vec<(usize, &Element)> = Vec::new();
        for (idx, doc) in c.documents.iter().enumerate() {
            let mut found = Vec::new();
            anchors(doc.body(), &mut found);
            all.extend(found.into_iter().map(|a| (idx, a)));
        }
        for (doc, marker) in all.iter().filter(|(_, a)| a.has_token("epub:type", "noteref")) {
            let (target_doc, fragment) = locate(c, *doc, marker.attr("href").unwrap()).unwrap();
            let note = id_paths(c.documents[target_doc].body())
                .get(fragment)
                .and_then(|p| c.documents[target_doc].body().at_path(p))
                .expect("noteref target exists");
            let mut links = Vec::new();
            anchors(note, &mut links);
            let canonical: Vec<&&Element> = links
                .iter()
                .filter(|a| a.attr("class") == Some(BACKLINK_CLASS))
                .collect();
            assert_eq!(canonical.len(), 1, "one canonical backlink");
            let back = canonical[0].attr("href").unwrap();
            let (back_doc, back_id) = locate(c, target_doc, back).unwrap();
            let mine = (*doc, marker.id().unwrap());
            let secondary_here = links.iter().any(|a| {
                a.attr("class") == Some(SECONDARY_BACKLINK_CLASS)
                    && locate(c, target_doc, a.attr("href").unwrap()) == Some(mine)
            });
            assert!((back_doc, back_id) == mine || secondary_here);
        }
    }

    #[test]
    fn test_leading_label() {
        assert_eq!(leading_label("1. The note"), Some("1".into()));
        assert_eq!(leading_label("[12] The note"), Some("12".into()));
        assert_eq!(leading_label("(3)Note"), Some("3".into()));
        assert_eq!(leading_label("* A starred note"), Some("*".into()));
        assert_eq!(leading_label("4 Text"), Some("4".into()));
        assert_eq!(leading_label("1914 it began"), None);
        assert_eq!(leading_label("3.5 percent"), None);
        assert_eq!(leading_label("1st chapter"), None);
        assert_eq!(leading_label("Plain text"), None);
    }

    #[test]
    fn test_id_suffix() {
        assert_eq!(id_suffix("12"), "12");
        assert_eq!(id_suffix("*"), "-star");
        assert_eq!(id_suffix("**"), "-star2");
        assert_eq!(id_suffix("†‡"), "-dagger-ddagger");
        assert_eq!(id_suffix("a"), "-a");
    }

    #[test]
    fn test_allocator_avoids_existing_ids() {
        let c = corpus(&[("a.xhtml", "<p id=\"fn1\">taken</p>")]);
        let mut ids = IdAllocator::seeded(&c);
        assert_eq!(ids.claim("fn1"), "fn1-2");
        assert_eq!(ids.claim("fn1"), "fn1-3");
        assert_eq!(ids.claim("fn2"), "fn2");
    }

    #[test]
    fn test_trailing_note_linked() {
        let mut c = corpus(&[("a.xhtml", "<p>Text<sup>1</sup> more.</p><p>1. The note.</p>")]);
        let counters = link_footnotes(&mut c);
        assert_eq!(counters.forward_links_repaired, 1);
        assert_eq!(counters.backlinks_added, 1);
        assert_eq!(counters.note_ids_created, 1);
        assert_eq!(
            c.documents[0].to_xhtml(),
            "<html xmlns:epub=\"http://www.idpf.org/2007/ops\"><body>\
             <p>Text<sup><a id=\"fnref1\" href=\"#fn1\" epub:type=\"noteref\" role=\"doc-noteref\">1</a></sup> more.</p>\
             <p id=\"fn1\" epub:type=\"footnote\" role=\"doc-footnote\">1. The note. \
             <a href=\"#fnref1\" class=\"backlink\" role=\"doc-backlink\">\u{21a9}</a></p>\
             </body></html>"
        );
        assert_bidirectional(&c);
    }

    #[test]
    fn test_notes_document_across_spine() {
        let mut c = corpus(&[
            ("Text/ch1.xhtml", "<p>One<sup>1</sup> and two<sup>*</sup>.</p><p>Closing words.</p>"),
            (
                "Text/notes.xhtml",
                "<h2>Notes</h2><p>1. First note.</p><p>* Starred note.</p><h2>Index</h2><p>Entries.</p>",
            ),
        ]);
        let counters = link_footnotes(&mut c);
        assert_eq!(counters.forward_links_repaired, 2);
        assert_eq!(counters.backlinks_added, 2);
        assert_eq!(counters.unresolved_markers, 0);
        let chapter = c.documents[0].to_xhtml();
        assert!(chapter.contains("href=\"notes.xhtml#fn1\""));
        assert!(chapter.contains("href=\"notes.xhtml#fn-star\""));
        let notes = c.documents[1].to_xhtml();
        assert!(notes.contains("<a href=\"ch1.xhtml#fnref1\" class=\"backlink\""));
        assert!(notes.contains("<a href=\"ch1.xhtml#fnref-star\" class=\"backlink\""));
        assert_bidirectional(&c);
    }

    #[test]
    fn test_repeated_numbering_gets_unique_ids() {
        let mut c = corpus(&[
            ("ch1.xhtml", "<p>Alpha<sup>1</sup>.</p><p>1. Note for alpha.</p>"),
            ("ch2.xhtml", "<p>Beta<sup>1</sup>.</p><p>1. Note for beta.</p>"),
        ]);
        let counters = link_footnotes(&mut c);
        assert_eq!(counters.note_ids_created, 2);
        let first = c.documents[0].to_xhtml();
        let second = c.documents[1].to_xhtml();
        assert!(first.contains("href=\"#fn1\"") && first.contains("id=\"fn1\""));
        assert!(second.contains("href=\"#fn1-2\"") && second.contains("id=\"fn1-2\""));
        assert!(second.contains("id=\"fnref1-2\""));
        assert_bidirectional(&c);
    }

    #[test]
    fn test_repeated_marker_is_secondary() {
        let mut c = corpus(&[(
            "a.xhtml",
            "<p>First<sup>1</sup> and again<sup>1</sup>.</p><p>1. Shared note.</p>",
        )]);
        let counters = link_footnotes(&mut c);
        assert_eq!(counters.secondary_references, 1);
        assert_eq!(counters.backlinks_added, 1);
        let xhtml = c.documents[0].to_xhtml();
        assert!(xhtml.contains("<a href=\"#fnref1\" class=\"backlink\""));
        assert!(xhtml.contains("<a href=\"#fnref1-2\" class=\"backlink secondary\""));
        assert_bidirectional(&c);
    }

    #[test]
    fn test_unresolved_and_orphan_are_counted() {
        let mut c = corpus(&[(
            "a.xhtml",
            "<p>Text<sup>7</sup>.</p><aside epub:type=\"footnote\" id=\"n9\"><p>Lonely.</p></aside>",
        )]);
        let counters = link_footnotes(&mut c);
        assert_eq!(counters.unresolved_markers, 1);
        assert_eq!(counters.orphan_notes, 1);
        assert_eq!(counters.forward_links_repaired, 0);
        assert!(c.documents[0].to_xhtml().contains("<sup>7</sup>"));
    }

    #[test]
    fn test_existing_links_reused() {
        let mut c = corpus(&[(
            "a.xhtml",
            "<p>Text<a href=\"#note-a\" epub:type=\"noteref\">a</a>.</p>\
             <aside id=\"note-a\" epub:type=\"footnote\"><p>Lettered note.</p></aside>",
        )]);
        let counters = link_footnotes(&mut c);
        assert_eq!(counters.note_ids_created, 0);
        assert_eq!(counters.backlinks_added, 1);
        let xhtml = c.documents[0].to_xhtml();
        assert!(xhtml.contains("<a href=\"#note-a\" epub:type=\"noteref\" id=\"fnref-a\" role=\"doc-noteref\">a</a>"));
        assert!(xhtml.contains("<p>Lettered note. <a href=\"#fnref-a\" class=\"backlink\""));
        assert_bidirectional(&c);
    }

    #[test]
    fn test_second_pass_is_a_fixpoint() {
        let mut c = corpus(&[
            ("ch1.xhtml", "<p>A<sup>1</sup> b<sup>1</sup> c<sup>2</sup>.</p><p>1 One.</p><p>2 Two.</p>"),
            ("ch2.xhtml", "<p>D<sup>*</sup>.</p><h3>Footnotes</h3><p>* Star.</p>"),
        ]);
        link_footnotes(&mut c);
        let first: Vec<String> = c.documents.iter().map(|d| d.to_xhtml()).collect();
        let again = link_footnotes(&mut c);
        let second: Vec<String> = c.documents.iter().map(|d| d.to_xhtml()).collect();
        assert_eq!(first, second);
        assert_eq!(again.forward_links_repaired, 0);
        assert_eq!(again.backlinks_added, 0);
        assert_eq!(again.note_ids_created, 0);
        assert_eq!(again.unresolved_markers, 0);
        assert_bidirectional(&c);
    }
}
