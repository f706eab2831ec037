//! Href helpers shared by the footnote linker, and the final link hygiene
//! pass: nested anchors and fragment links to ids that do not exist.

use std::collections::HashSet;

use tracing::debug;

use crate::corpus::Corpus;
use crate::markup::{Element, Node};
use crate::report::ReportCounters;

pub const UNWRAPPED_CLASS: &str = "unwrapped-nested-link";

/// Absolute URLs, `mailto:` and protocol-relative links.
pub fn is_external(href: &str) -> bool {
    href.starts_with("//")
        || href
            .split(['/', '#', '?'])
            .next()
            .is_some_and(|head| head.contains(':'))
}

/// Splits an internal link into `(file, fragment)`. The file part is empty
/// for same-document links. Links without a fragment yield `None`.
pub fn split_internal(href: &str) -> Option<(&str, &str)> {
    if is_external(href) {
        return None;
    }
    let (file, fragment) = href.split_once('#')?;
    if fragment.is_empty() {
        return None;
    }
    Some((file, fragment))
}

/// Resolves `target` relative to the directory of `base_doc`.
pub fn resolve_href(base_doc: &str, target: &str) -> String {
    let mut parts: Vec<&str> = base_doc.split('/').collect();
    parts.pop();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Path from `from_doc` to `to_doc`; empty when both are the same document.
pub fn relative_href(from_doc: &str, to_doc: &str) -> String {
    if from_doc == to_doc {
        return String::new();
    }
    let from: Vec<&str> = from_doc.split('/').collect();
    let to: Vec<&str> = to_doc.split('/').collect();
    let from_dirs = &from[..from.len() - 1];
    let to_dirs = &to[..to.len() - 1];
    let common = from_dirs
        .iter()
        .zip(to_dirs)
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts = vec![".."; from_dirs.len() - common];
    parts.extend(&to[common..]);
    parts.join("/")
}

/// `relative_href` plus a fragment.
pub fn href_between(corpus: &Corpus, from: usize, to: usize, fragment: &str) -> String {
    let path = relative_href(&corpus.documents[from].id, &corpus.documents[to].id);
    format!("{path}#{fragment}")
}

/// Spine index and fragment an internal link points at, when the target
/// document is part of the spine.
pub fn locate<'h>(corpus: &Corpus, from: usize, href: &'h str) -> Option<(usize, &'h str)> {
    let (file, fragment) = split_internal(href)?;
    if file.is_empty() {
        return Some((from, fragment));
    }
    let base = &corpus.documents.get(from)?.id;
    let doc = corpus.position(&resolve_href(base, file))?;
    Some((doc, fragment))
}

/// Turns every `<a>` inside another `<a>` into a plain span.
pub fn unwrap_nested_anchors(el: &mut Element) -> u64 {
    fn walk(el: &mut Element, inside_anchor: bool) -> u64 {
        let mut count = 0;
        for child in &mut el.children {
            let Node::Element(child) = child else {
                continue;
            };
            let is_anchor = child.is("a");
            if is_anchor && inside_anchor {
                let prefix_len = child.name.len() - child.local_name().len();
                child.name = format!("{}span", &child.name[..prefix_len]);
                child.remove_attr("href");
                child.remove_attr("epub:type");
                child.set_attr("class", UNWRAPPED_CLASS);
                count += 1;
            }
            count += walk(child, inside_anchor || is_anchor);
        }
        count
    }
    walk(el, false)
}

/// Removes links whose fragment names no element of the target spine
/// document. Links into documents outside the spine are left alone.
pub fn remove_broken_links(corpus: &mut Corpus) -> u64 {
    let ids: Vec<HashSet<String>> = corpus
        .documents
        .iter()
        .map(|doc| {
            let mut ids = Vec::new();
            doc.markup.root.collect_ids(&mut ids);
            ids.into_iter().collect()
        })
        .collect();

    let mut removed = 0;
    for idx in 0..corpus.documents.len() {
        let broken = |href: &str| {
            locate(corpus, idx, href).is_some_and(|(doc, fragment)| !ids[doc].contains(fragment))
        };
        let mut doomed = Vec::new();
        find_broken(corpus.documents[idx].body(), &mut Vec::new(), &broken, &mut doomed);
        if doomed.is_empty() {
            continue;
        }
        debug!(document = %corpus.documents[idx].id, count = doomed.len(), "broken fragment links");
        let body = corpus.documents[idx].body_mut();
        // Reverse document order keeps the earlier paths valid while splicing.
        for path in doomed.iter().rev() {
            if drop_link(body, path) {
                removed += 1;
            }
        }
    }
    removed
}

fn find_broken(el: &Element, path: &mut Vec<usize>, broken: &dyn Fn(&str) -> bool, out: &mut Vec<Vec<usize>>) {
    for (idx, child) in el.children.iter().enumerate() {
        let Node::Element(child) = child else {
            continue;
        };
        path.push(idx);
        if child.is("a") && child.attr("href").is_some_and(broken) {
            out.push(path.clone());
        }
        find_broken(child, path, broken, out);
        path.pop();
    }
}

/// Replaces the link with its content. A link that is itself a target
/// keeps its element and only loses the `href`.
fn drop_link(body: &mut Element, path: &[usize]) -> bool {
    let Some((&last, parent_path)) = path.split_last() else {
        return false;
    };
    let Some(parent) = body.at_path_mut(parent_path) else {
        return false;
    };
    let Some(Node::Element(link)) = parent.children.get_mut(last) else {
        return false;
    };
    if link.id().is_some() {
        return link.remove_attr("href").is_some();
    }
    let content = std::mem::take(&mut link.children);
    parent.children.splice(last..=last, content);
    true
}

/// Link hygiene over the whole corpus.
pub fn heal_links(corpus: &mut Corpus) -> ReportCounters {
    let nested_links_unwrapped = corpus
        .documents
        .iter_mut()
        .map(|doc| unwrap_nested_anchors(doc.body_mut()))
        .sum();
    ReportCounters {
        nested_links_unwrapped,
        broken_links_removed: remove_broken_links(corpus),
        ..ReportCounters::default()
    }
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

    #[test]
    fn test_href_paths() {
        assert_eq!(resolve_href("Text/ch1.xhtml", "notes.xhtml"), "Text/notes.xhtml");
        assert_eq!(resolve_href("Text/ch1.xhtml", "../Misc/a.xhtml"), "Misc/a.xhtml");
        assert_eq!(relative_href("Text/ch1.xhtml", "Text/notes.xhtml"), "notes.xhtml");
        assert_eq!(relative_href("Text/ch1.xhtml", "Misc/a.xhtml"), "../Misc/a.xhtml");
        assert_eq!(relative_href("ch1.xhtml", "ch1.xhtml"), "");
        assert!(is_external("https://example.com/#x"));
        assert!(is_external("mailto:someone@example.com"));
        assert!(!is_external("notes.xhtml#fn1"));
        assert_eq!(split_internal("#fn1"), Some(("", "fn1")));
        assert_eq!(split_internal("ch2.xhtml"), None);
    }

    #[test]
    fn test_nested_anchor_unwrapped() {
        let mut c = corpus(&[(
            "a.xhtml",
            "<p><a href=\"#x\" id=\"x\">outer <a href=\"#x\" epub:type=\"noteref\">inner</a></a></p>",
        )]);
        let counters = heal_links(&mut c);
        assert_eq!(counters.nested_links_unwrapped, 1);
        assert_eq!(
            c.documents[0].to_xhtml(),
            "<html><body><p><a href=\"#x\" id=\"x\">outer <span class=\"unwrapped-nested-link\">inner</span></a></p></body></html>"
        );
    }

    #[test]
    fn test_broken_fragment_links() {
        let mut c = corpus(&[
            ("Text/a.xhtml", "<p>See <a href=\"b.xhtml#here\">here</a> and <a href=\"b.xhtml#gone\">gone</a>.</p>"),
            ("Text/b.xhtml", "<p id=\"here\">Target <a href=\"#nope\" id=\"anchor\">kept</a></p>"),
        ]);
        let counters = heal_links(&mut c);
        assert_eq!(counters.broken_links_removed, 2);
        assert_eq!(
            c.documents[0].to_xhtml(),
            "<html><body><p>See <a href=\"b.xhtml#here\">here</a> and gone.</p></body></html>"
        );
        assert!(c.documents[1].to_xhtml().contains("<a id=\"anchor\">kept</a>"));
    }

    #[test]
    fn test_links_outside_spine_untouched() {
        let mut c = corpus(&[("a.xhtml", "<p><a href=\"images/plate.xhtml#p1\">plate</a></p>")]);
        let counters = heal_links(&mut c);
        assert!(counters.is_zero());
    }
}
