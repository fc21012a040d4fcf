//! Document loading and container access shared by the source extractors.
//!
//! A [`Document`] is read into memory once per file; the filename, properties
//! and content extractors all work from the same bytes. EPUB containers are
//! opened with `zip` and parsed with `quick-xml`; PDF page text comes from
//! `pdf-extract`.

use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;

use crate::error::ExtractError;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 16 * 1024 * 1024;

/// Supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Epub,
}

impl DocumentKind {
    /// Detect the kind from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "epub" => Some(DocumentKind::Epub),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Epub => "epub",
        }
    }
}

/// A document file held in memory.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn load(path: &Path) -> Result<Self, ExtractError> {
        let kind = DocumentKind::from_path(path).ok_or_else(|| {
            ExtractError::Unsupported(
                path.extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "<none>".to_string()),
            )
        })?;
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExtractError::NotFound(path.to_path_buf()),
            _ => ExtractError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            bytes,
        })
    }

    /// Filename without directory or extension.
    pub fn stem(&self) -> String {
        file_stem(&self.path)
    }
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============ PDF ============

/// Text of the first `max_pages` pages. `pdf-extract` panics on some
/// malformed inputs, so the call is isolated with `catch_unwind`.
pub(crate) fn pdf_page_texts(bytes: &[u8], max_pages: usize) -> Result<Vec<String>, ExtractError> {
    let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes));
    match result {
        Ok(Ok(mut pages)) => {
            pages.truncate(max_pages);
            Ok(pages)
        }
        Ok(Err(e)) => Err(ExtractError::Corrupt {
            format: "PDF",
            reason: e.to_string(),
        }),
        Err(_) => Err(ExtractError::Corrupt {
            format: "PDF",
            reason: "text extraction aborted".to_string(),
        }),
    }
}

// ============ EPUB ============

pub(crate) type EpubArchive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Package document (OPF) fields used by the extractors.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct EpubPackage {
    pub title: Option<String>,
    pub creators: Vec<String>,
    pub date: Option<String>,
    /// Archive paths of spine documents in reading order.
    pub spine: Vec<String>,
}

pub(crate) fn open_epub(bytes: &[u8]) -> Result<EpubArchive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| corrupt_epub(e.to_string()))
}

fn corrupt_epub(reason: String) -> ExtractError {
    ExtractError::Corrupt {
        format: "EPUB",
        reason,
    }
}

pub(crate) fn read_zip_entry_bounded(
    archive: &mut EpubArchive<'_>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| corrupt_epub(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| corrupt_epub(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(corrupt_epub(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Locate and parse the OPF package document.
pub(crate) fn read_package(archive: &mut EpubArchive<'_>) -> Result<EpubPackage, ExtractError> {
    let has_container = archive.by_name("META-INF/container.xml").is_ok();
    let opf_path = if has_container {
        let xml = read_zip_entry_bounded(archive, "META-INF/container.xml")?;
        rootfile_path(&xml)?
    } else {
        None
    };
    // Some producers omit container.xml; fall back to the first .opf entry.
    let opf_path = match opf_path {
        Some(p) => p,
        None => archive
            .file_names()
            .find(|n| n.to_ascii_lowercase().ends_with(".opf"))
            .map(|s| s.to_string())
            .ok_or_else(|| corrupt_epub("no package document found".to_string()))?,
    };
    let opf = read_zip_entry_bounded(archive, &opf_path)?;
    let base = match opf_path.rfind('/') {
        Some(i) => &opf_path[..i],
        None => "",
    };
    parse_package(&opf, base)
}

fn rootfile_path(xml: &[u8]) -> Result<Option<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"full-path" {
                        let value = attr
                            .unescape_value()
                            .map_err(|e| corrupt_epub(e.to_string()))?;
                        return Ok(Some(value.into_owned()));
                    }
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(corrupt_epub(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

fn parse_package(xml: &[u8], base: &str) -> Result<EpubPackage, ExtractError> {
    let mut pkg = EpubPackage::default();
    let mut manifest: Vec<(String, String)> = Vec::new();
    let mut spine_ids: Vec<String> = Vec::new();

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_metadata = false;
    let mut current: Option<Vec<u8>> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"metadata" {
                    in_metadata = true;
                } else if in_metadata
                    && matches!(name.as_slice(), b"title" | b"creator" | b"date")
                {
                    current = Some(name);
                    text.clear();
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => {
                    let id = attr_value(&e, b"id")?;
                    let href = attr_value(&e, b"href")?;
                    if let (Some(id), Some(href)) = (id, href) {
                        manifest.push((id, href));
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attr_value(&e, b"idref")? {
                        spine_ids.push(idref);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) if current.is_some() => {
                let s = t.unescape().map_err(|e| corrupt_epub(e.to_string()))?;
                text.push_str(&s);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"metadata" {
                    in_metadata = false;
                } else if current.as_deref() == Some(name.as_ref()) {
                    let value = text.trim().to_string();
                    if !value.is_empty() {
                        match name.as_ref() {
                            b"title" if pkg.title.is_none() => pkg.title = Some(value),
                            b"creator" => pkg.creators.push(value),
                            b"date" if pkg.date.is_none() => pkg.date = Some(value),
                            _ => {}
                        }
                    }
                    current = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(corrupt_epub(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    pkg.spine = spine_ids
        .iter()
        .filter_map(|id| manifest.iter().find(|(mid, _)| mid == id))
        .map(|(_, href)| resolve_href(base, href))
        .collect();
    Ok(pkg)
}

fn attr_value(
    e: &quick_xml::events::BytesStart<'_>,
    key: &[u8],
) -> Result<Option<String>, ExtractError> {
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == key {
            let v = attr
                .unescape_value()
                .map_err(|e| corrupt_epub(e.to_string()))?;
            return Ok(Some(v.into_owned()));
        }
    }
    Ok(None)
}

/// Join an OPF-relative href onto the OPF directory, folding `..` segments.
fn resolve_href(base: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let mut parts: Vec<&str> = if base.is_empty() {
        Vec::new()
    } else {
        base.split('/').collect()
    };
    for seg in href.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Plain text of an XHTML document, one line per block element.
pub(crate) fn xhtml_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if skip_depth > 0 || matches!(e.local_name().as_ref(), b"head" | b"script" | b"style")
                {
                    skip_depth += 1;
                }
            }
            Ok(Event::Text(t)) if skip_depth == 0 => {
                // Undefined HTML entities (&nbsp; etc.) fail to unescape; keep the raw text.
                let s = match t.unescape() {
                    Ok(s) => s.into_owned(),
                    Err(_) => String::from_utf8_lossy(&t).into_owned(),
                };
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push(' ');
                }
                out.push_str(s.trim());
            }
            Ok(Event::Empty(e)) if skip_depth == 0 && e.local_name().as_ref() == b"br" => {
                out.push('\n');
            }
            Ok(Event::End(e)) => {
                if skip_depth > 0 {
                    skip_depth -= 1;
                } else if is_block(e.local_name().as_ref()) && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(corrupt_epub(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn is_block(name: &[u8]) -> bool {
    matches!(
        name,
        b"p" | b"div" | b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6" | b"li" | b"section" | b"tr"
    )
}
