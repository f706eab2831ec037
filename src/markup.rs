//! Minimal XHTML tree for spine documents.
//!
//! The tree keeps every byte that matters for re-serialization (attribute
//! order, whitespace text, comments, the prolog) so an untouched document
//! comes back out the way it went in, modulo entity normalization.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::Event;

use crate::error::MarkupError;

/// Elements that start a new block in rendered text.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "dt", "dd", "blockquote", "pre",
    "section", "article", "aside", "header", "footer", "nav", "figure", "figcaption", "table",
    "thead", "tbody", "tr", "td", "th", "ul", "ol", "dl", "address", "center", "main", "body",
];

/// Inline content that makes an otherwise text-free element meaningful.
const MEDIA_TAGS: &[&str] = &["img", "svg", "image", "object", "video", "audio", "iframe", "math"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    /// Comments, CDATA sections, processing instructions and the prolog,
    /// stored exactly as they must be written back.
    Raw(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn is_element(&self, name: &str) -> bool {
        matches!(self, Node::Element(el) if el.is(name))
    }

    pub fn is_blank_text(&self) -> bool {
        matches!(self, Node::Text(t) if t.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
    pub self_closing: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            self_closing: false,
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Tag name without any namespace prefix, lowercased comparisons are
    /// done by the callers through [`Element::is`].
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn is(&self, name: &str) -> bool {
        self.local_name().eq_ignore_ascii_case(name)
    }

    pub fn is_block(&self) -> bool {
        BLOCK_TAGS.iter().any(|tag| self.is(tag))
    }

    pub fn is_heading(&self) -> bool {
        ["h1", "h2", "h3", "h4", "h5", "h6"].iter().any(|tag| self.is(tag))
    }

    /// A block element with no block descendants: a paragraph, heading,
    /// table cell or a `div` used as a paragraph.
    pub fn is_leaf_block(&self) -> bool {
        self.is_block() && !self.has_block_descendant()
    }

    fn has_block_descendant(&self) -> bool {
        self.children.iter().any(|child| match child {
            Node::Element(el) => el.is_block() || el.has_block_descendant(),
            _ => false,
        })
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets an attribute, returning true when the stored value changed.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) if *existing == value => false,
            Some((_, existing)) => {
                *existing = value;
                true
            }
            None => {
                self.attrs.push((key.to_string(), value));
                true
            }
        }
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let idx = self.attrs.iter().position(|(k, _)| k == key)?;
        Some(self.attrs.remove(idx).1)
    }

    /// Whether a whitespace-separated attribute holds `token` exactly.
    pub fn has_token(&self, key: &str, token: &str) -> bool {
        self.attr(key)
            .map(|v| v.split_whitespace().any(|t| t.eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.has_token("class", class)
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    /// Rendered text: text nodes concatenated, `<br/>` as a newline.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn push_text(&self, out: &mut String) {
        push_nodes_text(&self.children, out);
    }

    pub fn contains_media(&self) -> bool {
        self.children.iter().any(|child| match child {
            Node::Element(el) => MEDIA_TAGS.iter().any(|tag| el.is(tag)) || el.contains_media(),
            _ => false,
        })
    }

    pub fn at_path(&self, path: &[usize]) -> Option<&Element> {
        let mut current = self;
        for &idx in path {
            current = current.children.get(idx)?.as_element()?;
        }
        Some(current)
    }

    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut current = self;
        for &idx in path {
            current = current.children.get_mut(idx)?.as_element_mut()?;
        }
        Some(current)
    }

    /// Depth-first search over descendants (not including `self`).
    pub fn any_descendant(&self, pred: &dyn Fn(&Element) -> bool) -> bool {
        self.children.iter().any(|child| match child {
            Node::Element(el) => pred(el) || el.any_descendant(pred),
            _ => false,
        })
    }

    /// Collects every `id` attribute in the subtree, `self` included.
    pub fn collect_ids(&self, out: &mut Vec<String>) {
        if let Some(id) = self.id() {
            out.push(id.to_string());
        }
        for child in &self.children {
            if let Node::Element(el) = child {
                el.collect_ids(out);
            }
        }
    }

    /// Mutable visit of every text node in the subtree.
    pub fn for_each_text_mut(&mut self, f: &mut dyn FnMut(&mut String)) {
        for child in &mut self.children {
            match child {
                Node::Text(t) => f(t),
                Node::Element(el) => el.for_each_text_mut(f),
                Node::Raw(_) => {}
            }
        }
    }

    /// Mutable visit of every leaf block in document order.
    pub fn for_each_leaf_block_mut(&mut self, f: &mut dyn FnMut(&mut Element)) {
        if self.is_leaf_block() {
            f(self);
            return;
        }
        for child in &mut self.children {
            if let Node::Element(el) = child {
                el.for_each_leaf_block_mut(f);
            }
        }
    }

    /// Removes every leaf block for which `keep` returns false, together
    /// with the whitespace run that preceded it. Returns the removal count.
    pub fn retain_leaf_blocks(&mut self, keep: &mut dyn FnMut(&Element) -> bool) -> usize {
        let mut removed = 0;
        let mut idx = 0;
        while idx < self.children.len() {
            let drop = match &mut self.children[idx] {
                Node::Element(el) if el.is_leaf_block() => !keep(el),
                Node::Element(el) => {
                    removed += el.retain_leaf_blocks(keep);
                    false
                }
                _ => false,
            };
            if drop {
                self.children.remove(idx);
                removed += 1;
                if idx > 0 && self.children[idx - 1].is_blank_text() {
                    self.children.remove(idx - 1);
                    idx -= 1;
                }
            } else {
                idx += 1;
            }
        }
        removed
    }
}

/// Paths (child indices from the root) of every leaf block, document order.
pub fn leaf_block_paths(root: &Element) -> Vec<Vec<usize>> {
    fn walk(el: &Element, path: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if el.is_leaf_block() {
            out.push(path.clone());
            return;
        }
        for (idx, child) in el.children.iter().enumerate() {
            if let Node::Element(child) = child {
                path.push(idx);
                walk(child, path, out);
                path.pop();
            }
        }
    }
    let mut out = Vec::new();
    walk(root, &mut Vec::new(), &mut out);
    out
}

/// Rendered text of a run of sibling nodes, as [`Element::text`] renders it.
pub fn nodes_text(nodes: &[Node]) -> String {
    let mut out = String::new();
    push_nodes_text(nodes, &mut out);
    out
}

fn push_nodes_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(el) if el.is("br") => out.push('\n'),
            Node::Element(el) => el.push_text(out),
            Node::Raw(_) => {}
        }
    }
}

/// Collapses whitespace runs (including no-break spaces) to single spaces
/// and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split(|c: char| c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A parsed spine document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markup {
    pub prolog: Vec<Node>,
    pub root: Element,
    pub epilog: Vec<Node>,
}

impl Markup {
    pub fn parse(src: &str) -> Result<Self, MarkupError> {
        parse(src)
    }

    /// The `<body>` element, or the root when there is none.
    pub fn body(&self) -> &Element {
        find_body_path(&self.root)
            .and_then(|path| self.root.at_path(&path))
            .unwrap_or(&self.root)
    }

    pub fn body_mut(&mut self) -> &mut Element {
        let path = find_body_path(&self.root).unwrap_or_default();
        let mut current = &mut self.root;
        for idx in path {
            if !matches!(current.children.get(idx), Some(Node::Element(_))) {
                break;
            }
            current = match current.children[idx] {
                Node::Element(ref mut child) => child,
                _ => unreachable!("find_body_path only records element indices"),
            };
        }
        current
    }

    pub fn to_xhtml(&self) -> String {
        let mut out = String::new();
        for node in &self.prolog {
            write_node(&mut out, node);
        }
        write_element(&mut out, &self.root);
        for node in &self.epilog {
            write_node(&mut out, node);
        }
        out
    }
}

fn find_body_path(root: &Element) -> Option<Vec<usize>> {
    if root.is("body") {
        return Some(Vec::new());
    }
    for (idx, child) in root.children.iter().enumerate() {
        if let Node::Element(el) = child {
            if let Some(mut rest) = find_body_path(el) {
                rest.insert(0, idx);
                return Some(rest);
            }
        }
    }
    None
}

/// Named entities XHTML content commonly carries beyond the five XML ones.
fn html_entity(name: &str) -> Option<&'static str> {
    let value = match name {
        "nbsp" => "\u{a0}",
        "shy" => "\u{ad}",
        "ensp" => "\u{2002}",
        "emsp" => "\u{2003}",
        "thinsp" => "\u{2009}",
        "zwnj" => "\u{200c}",
        "zwj" => "\u{200d}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "hellip" => "\u{2026}",
        "bull" => "\u{2022}",
        "middot" => "\u{b7}",
        "dagger" => "\u{2020}",
        "Dagger" => "\u{2021}",
        "sect" => "\u{a7}",
        "para" => "\u{b6}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "deg" => "\u{b0}",
        "times" => "\u{d7}",
        _ => return None,
    };
    Some(value)
}

fn parse(src: &str) -> Result<Markup, MarkupError> {
    let mut reader = Reader::from_str(src);
    reader.check_end_names(true);

    let mut prolog = Vec::new();
    let mut epilog = Vec::new();
    let mut root: Option<Element> = None;
    let mut stack: Vec<Element> = Vec::new();

    loop {
        let position = reader.buffer_position();
        let syntax = |source: quick_xml::Error| MarkupError::Syntax { position, source };
        let event = reader.read_event().map_err(syntax)?;

        let node = match event {
            Event::Start(e) => {
                stack.push(start_element(&e).map_err(syntax)?);
                continue;
            }
            Event::Empty(e) => {
                let mut el = start_element(&e).map_err(syntax)?;
                el.self_closing = true;
                Node::Element(el)
            }
            Event::End(_) => match stack.pop() {
                Some(el) => Node::Element(el),
                None => continue,
            },
            Event::Text(e) => Node::Text(e.unescape_with(html_entity).map_err(syntax)?.into_owned()),
            Event::CData(e) => Node::Raw(format!("<![CDATA[{}]]>", lossy(&e))),
            Event::Comment(e) => Node::Raw(format!("<!--{}-->", lossy(&e))),
            Event::Decl(e) => Node::Raw(format!("<?{}?>", lossy(&e))),
            Event::PI(e) => Node::Raw(format!("<?{}?>", lossy(&e))),
            Event::DocType(e) => Node::Raw(format!("<!DOCTYPE {}>", lossy(&e).trim_start())),
            Event::Eof => break,
        };

        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => match node {
                Node::Element(el) if root.is_none() => root = Some(el),
                other if root.is_none() => prolog.push(other),
                other => epilog.push(other),
            },
        }
    }

    if let Some(open) = stack.pop() {
        return Err(MarkupError::Unclosed(open.name));
    }
    let root = root.ok_or(MarkupError::NoRoot)?;
    Ok(Markup {
        prolog,
        root,
        epilog,
    })
}

fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

fn start_element(e: &quick_xml::events::BytesStart<'_>) -> Result<Element, quick_xml::Error> {
    let mut el = Element::new(lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr?;
        let key = lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value_with(html_entity)?.into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Element(el) => write_element(out, el),
        Node::Text(t) => out.push_str(&partial_escape(t)),
        Node::Raw(raw) => out.push_str(raw),
    }
}

fn write_element(out: &mut String, el: &Element) {
    out.push('<');
    out.push_str(&el.name);
    for (key, value) in &el.attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(value));
        out.push('"');
    }
    if el.children.is_empty() && el.self_closing {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &el.children {
        write_node(out, child);
    }
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}
