//! Unpacked EPUB directories as a [`BookStore`].
//!
//! Each subdirectory of the root holding `META-INF/container.xml` is one
//! book. Spine XHTML documents are read in spine order and written back in
//! place, all of a book's files or none of them; the processed marker lives
//! in the package document metadata.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use regex::Regex;
use tracing::{debug, warn};

use crate::corpus::{BookMetadata, Corpus, Document, ProcessedMarker};
use crate::error::BookError;
use crate::pipeline::BookStore;

pub const MARKER_META_NAME: &str = "epub-clean:processed";
const CONTAINER_PATH: &str = "META-INF/container.xml";
const XHTML_TYPES: &[&str] = &["application/xhtml+xml", "text/html"];

lazy_static! {
    static ref MARKER_META: Regex =
        Regex::new(r#"<(?:[A-Za-z]+:)?meta\s[^>]*name="epub-clean:processed"[^>]*/>"#).unwrap();
    static ref METADATA_CLOSE: Regex = Regex::new(r"</(?:[A-Za-z]+:)?metadata>").unwrap();
}

/// What the package document says about the spine.
#[derive(Debug, Clone, Default)]
pub struct Package {
    /// Manifest id -> (href, media type)
    pub manifest: HashMap<String, (String, String)>,
    pub spine: Vec<String>,
    pub marker: Option<String>,
}

impl Package {
    /// Hrefs of the XHTML spine items, in reading order.
    pub fn spine_documents(&self) -> Vec<&str> {
        self.spine
            .iter()
            .filter_map(|idref| self.manifest.get(idref))
            .filter(|(_, media_type)| XHTML_TYPES.contains(&media_type.as_str()))
            .map(|(href, _)| href.as_str())
            .collect()
    }
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    for attr in e.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// `full-path` of the first rootfile in `container.xml`.
pub fn parse_container(content: &str) -> Result<Option<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"rootfile" => {
                if let Some(path) = attribute(&e, b"full-path")? {
                    return Ok(Some(path));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

pub fn parse_package(content: &str) -> Result<Package, quick_xml::Error> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);
    let mut package = Package::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match local_name(e.name().as_ref()) {
                b"item" => {
                    let id = attribute(&e, b"id")?;
                    let href = attribute(&e, b"href")?;
                    let media_type = attribute(&e, b"media-type")?.unwrap_or_default();
                    if let (Some(id), Some(href)) = (id, href) {
                        package.manifest.insert(id, (href, media_type));
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attribute(&e, b"idref")? {
                        package.spine.push(idref);
                    }
                }
                b"meta" => {
                    if attribute(&e, b"name")?.as_deref() == Some(MARKER_META_NAME) {
                        package.marker = attribute(&e, b"content")?;
                    }
                }
                _ => {}
            },
            Event::Eof => return Ok(package),
            _ => {}
        }
    }
}

/// Replaces (or inserts) the marker `<meta>` in package document text.
/// Returns `None` when the document has no metadata section.
pub fn set_marker_meta(package: &str, marker: &ProcessedMarker) -> Option<String> {
    let meta = format!(
        "<meta name=\"{MARKER_META_NAME}\" content=\"{}\"/>",
        escape(&marker.to_meta_content())
    );
    if MARKER_META.is_match(package) {
        return Some(MARKER_META.replace(package, meta.as_str()).into_owned());
    }
    let close = METADATA_CLOSE.find(package)?;
    let mut out = String::with_capacity(package.len() + meta.len() + 4);
    out.push_str(&package[..close.start()]);
    out.push_str("  ");
    out.push_str(&meta);
    out.push('\n');
    out.push_str(&package[close.start()..]);
    Some(out)
}

#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn book_dir(&self, book_id: &str) -> PathBuf {
        self.root.join(book_id)
    }

    /// Path of the package document inside a book directory.
    fn package_path(&self, book_dir: &Path) -> Result<PathBuf, BookError> {
        let container = book_dir.join(CONTAINER_PATH);
        let content = read(&container)?;
        let full_path = parse_container(&content)
            .map_err(|source| BookError::Package {
                path: container.clone(),
                source,
            })?
            .ok_or_else(|| BookError::NoRootfile(container.clone()))?;
        Ok(book_dir.join(full_path))
    }

    fn read_package(&self, book_id: &str) -> Result<(PathBuf, Package), BookError> {
        let package_path = self.package_path(&self.book_dir(book_id))?;
        let content = read(&package_path)?;
        let package = parse_package(&content).map_err(|source| BookError::Package {
            path: package_path.clone(),
            source,
        })?;
        Ok((package_path, package))
    }
}

fn read(path: &Path) -> Result<String, BookError> {
    fs::read_to_string(path).map_err(|source| BookError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_error(path: &Path, source: io::Error) -> BookError {
    BookError::Write {
        path: path.to_path_buf(),
        source,
    }
}

/// `ch1.xhtml` -> `.ch1.xhtml.epub-clean-<suffix>.<pid>` in the same directory, so
/// the final rename never crosses a filesystem.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!(".{name}.epub-clean-{suffix}.{}", std::process::id()))
}

/// The files of one book, written all together or not at all.
#[derive(Debug, Default)]
struct Transaction {
    /// (staged temp file, final path)
    staged: Vec<(PathBuf, PathBuf)>,
}

impl Transaction {
    /// Writes `content` next to `path`. Nothing visible changes yet.
    fn stage(&mut self, path: &Path, content: &str) -> Result<(), BookError> {
        if path.exists() && !path.is_file() {
            return Err(write_error(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        let tmp = sibling(path, "new");
        fs::write(&tmp, content).map_err(|source| write_error(path, source))?;
        self.staged.push((tmp, path.to_path_buf()));
        Ok(())
    }

    /// Moves every staged file into place. Originals are set aside first and
    /// put back if any rename fails.
    fn commit(mut self) -> Result<(), BookError> {
        let staged = std::mem::take(&mut self.staged);
        let mut done: Vec<(PathBuf, Option<PathBuf>)> = Vec::new();
        let mut pending = staged.iter();

        let failure = loop {
            let Some((tmp, path)) = pending.next() else {
                break None;
            };
            let backup = sibling(path, "old");
            let backup = match fs::rename(path, &backup) {
                Ok(()) => Some(backup),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => break Some(write_error(path, e)),
            };
            if let Err(e) = fs::rename(tmp, path) {
                if let Some(backup) = &backup {
                    let _ = fs::rename(backup, path);
                }
                break Some(write_error(path, e));
            }
            done.push((path.clone(), backup));
        };

        match failure {
            None => {
                for backup in done.into_iter().filter_map(|(_, backup)| backup) {
                    let _ = fs::remove_file(backup);
                }
                Ok(())
            }
            Some(err) => {
                for (path, backup) in done.into_iter().rev() {
                    match backup {
                        Some(backup) => {
                            let _ = fs::rename(backup, &path);
                        }
                        None => {
                            let _ = fs::remove_file(&path);
                        }
                    }
                }
                for (tmp, _) in &staged {
                    let _ = fs::remove_file(tmp);
                }
                Err(err)
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        for (tmp, _) in &self.staged {
            let _ = fs::remove_file(tmp);
        }
    }
}

fn content_dir(package_path: &Path) -> &Path {
    package_path.parent().unwrap_or_else(|| Path::new(""))
}

impl BookStore for DirectoryStore {
    fn book_ids(&self) -> Result<Vec<String>, BookError> {
        let entries = fs::read_dir(&self.root).map_err(|source| BookError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut ids: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().join(CONTAINER_PATH).is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn load(&self, book_id: &str) -> Result<Corpus, BookError> {
        let (package_path, package) = self.read_package(book_id)?;
        let base = content_dir(&package_path);

        let mut documents = Vec::new();
        for href in package.spine_documents() {
            let src = read(&base.join(href))?;
            let doc = Document::parse(href, &src).map_err(|source| BookError::Markup {
                document: href.to_string(),
                source,
            })?;
            documents.push(doc);
        }
        debug!(book = book_id, documents = documents.len(), "book loaded");

        let mut corpus = Corpus::new(book_id, documents);
        corpus.metadata = BookMetadata {
            processed: package.marker.as_deref().and_then(ProcessedMarker::from_meta_content),
        };
        Ok(corpus)
    }

    fn store(&self, corpus: &Corpus) -> Result<(), BookError> {
        let package_path = self.package_path(&self.book_dir(&corpus.book_id))?;
        let base = content_dir(&package_path);

        let mut tx = Transaction::default();
        for doc in &corpus.documents {
            tx.stage(&base.join(&doc.id), &doc.to_xhtml())?;
        }
        if let Some(marker) = &corpus.metadata.processed {
            let package = read(&package_path)?;
            match set_marker_meta(&package, marker) {
                Some(updated) => tx.stage(&package_path, &updated)?,
                None => warn!(book = %corpus.book_id, "package document has no metadata; marker not written"),
            }
        }
        tx.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const PACKAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Test</dc:title>
  </metadata>
  <manifest>
    <item id="c2" href="Text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="c1" href="Text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
    <itemref idref="c2"/>
  </spine>
</package>"#;

    fn write_book(root: &Path, id: &str) {
        let dir = root.join(id);
        fs::create_dir_all(dir.join("META-INF")).unwrap();
        fs::create_dir_all(dir.join("OEBPS/Text")).unwrap();
        fs::write(dir.join(CONTAINER_PATH), CONTAINER).unwrap();
        fs::write(dir.join("OEBPS/content.opf"), PACKAGE).unwrap();
        for (name, body) in [("ch1", "One"), ("ch2", "Two")] {
            fs::write(
                dir.join(format!("OEBPS/Text/{name}.xhtml")),
                format!("<html xmlns=\"http://www.w3.org/1999/xhtml\"><body><p>{body}</p></body></html>"),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_lists_only_book_directories() {
        let tmp = TempDir::new().unwrap();
        write_book(tmp.path(), "b-book");
        write_book(tmp.path(), "a-book");
        fs::create_dir_all(tmp.path().join("not-a-book")).unwrap();
        let store = DirectoryStore::new(tmp.path());
        assert_eq!(store.book_ids().unwrap(), vec!["a-book", "b-book"]);
    }

    #[test]
    fn test_load_follows_spine_order() {
        let tmp = TempDir::new().unwrap();
        write_book(tmp.path(), "book");
        let corpus = DirectoryStore::new(tmp.path()).load("book").unwrap();
        let ids: Vec<&str> = corpus.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["Text/ch1.xhtml", "Text/ch2.xhtml"]);
        assert_eq!(corpus.documents[1].rendered_text(), "Two");
        assert!(corpus.metadata.processed.is_none());
    }

    #[test]
    fn test_store_writes_documents_and_marker() {
        let tmp = TempDir::new().unwrap();
        write_book(tmp.path(), "book");
        let store = DirectoryStore::new(tmp.path());
        let mut corpus = store.load("book").unwrap();
        corpus.documents[0].body_mut().children.clear();
        corpus.metadata.processed = ProcessedMarker::from_meta_content("abc;2024-03-01T10:00:00Z");
        store.store(&corpus).unwrap();

        let reloaded = store.load("book").unwrap();
        assert_eq!(reloaded.documents[0].rendered_text(), "");
        assert_eq!(reloaded.metadata.processed.as_ref().unwrap().fingerprint, "abc");

        // A second stamp replaces the first instead of adding another.
        let mut corpus = reloaded;
        corpus.metadata.processed = ProcessedMarker::from_meta_content("def;2024-03-02T10:00:00Z");
        store.store(&corpus).unwrap();
        let package = fs::read_to_string(tmp.path().join("book/OEBPS/content.opf")).unwrap();
        assert_eq!(package.matches(MARKER_META_NAME).count(), 1);
        assert!(package.contains("def;2024-03-02T10:00:00Z"));
    }

    #[test]
    fn test_failed_write_leaves_book_untouched() {
        let tmp = TempDir::new().unwrap();
        write_book(tmp.path(), "book");
        let store = DirectoryStore::new(tmp.path());
        let mut corpus = store.load("book").unwrap();
        corpus.documents[0].body_mut().children.clear();
        corpus.metadata.processed = ProcessedMarker::from_meta_content("abc;2024-03-01T10:00:00Z");

        let text_dir = tmp.path().join("book/OEBPS/Text");
        let ch1_before = fs::read_to_string(text_dir.join("ch1.xhtml")).unwrap();
        fs::remove_file(text_dir.join("ch2.xhtml")).unwrap();
        fs::create_dir(text_dir.join("ch2.xhtml")).unwrap();

        let err = store.store(&corpus).unwrap_err();
        assert!(matches!(err, BookError::Write { .. }));
        assert_eq!(fs::read_to_string(text_dir.join("ch1.xhtml")).unwrap(), ch1_before);
        let package = fs::read_to_string(tmp.path().join("book/OEBPS/content.opf")).unwrap();
        assert!(!package.contains(MARKER_META_NAME));

        let mut leftovers: Vec<String> = fs::read_dir(&text_dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        leftovers.sort();
        assert_eq!(leftovers, vec!["ch1.xhtml", "ch2.xhtml"]);
    }

    #[test]
    fn test_commit_replaces_every_staged_file() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.xhtml");
        let b = tmp.path().join("b.xhtml");
        fs::write(&a, "old a").unwrap();

        let mut tx = Transaction::default();
        tx.stage(&a, "new a").unwrap();
        tx.stage(&b, "new b").unwrap();
        assert_eq!(fs::read_to_string(&a).unwrap(), "old a");
        assert!(!b.exists());
        tx.commit().unwrap();

        assert_eq!(fs::read_to_string(&a).unwrap(), "new a");
        assert_eq!(fs::read_to_string(&b).unwrap(), "new b");
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_malformed_document_is_a_book_error() {
        let tmp = TempDir::new().unwrap();
        write_book(tmp.path(), "book");
        fs::write(tmp.path().join("book/OEBPS/Text/ch2.xhtml"), "<html><body><p>open</body></html>").unwrap();
        let err = DirectoryStore::new(tmp.path()).load("book").unwrap_err();
        assert!(matches!(err, BookError::Markup { ref document, .. } if document == "Text/ch2.xhtml"));
    }

    #[test]
    fn test_missing_container_rootfile() {
        let tmp = TempDir::new().unwrap();
        write_book(tmp.path(), "book");
        fs::write(tmp.path().join("book").join(CONTAINER_PATH), "<container/>").unwrap();
        let err = DirectoryStore::new(tmp.path()).load("book").unwrap_err();
        assert!(matches!(err, BookError::NoRootfile(_)));
    }
}
