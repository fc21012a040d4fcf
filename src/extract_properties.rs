//! Embedded document properties: the PDF `/Info` dictionary and EPUB OPF
//! Dublin Core fields.

use lopdf::Object;

use crate::clean::{find_year, is_placeholder};
use crate::error::ExtractError;
use crate::extract::{open_epub, read_package, Document, DocumentKind};
use crate::models::{RawCandidate, Source};

/// Quality hint for container metadata. Producers often leave defaults
/// behind, so it sits below a fully structured filename.
const PROPERTIES_QUALITY: f64 = 0.8;

pub fn extract(doc: &Document) -> Result<RawCandidate, ExtractError> {
    let (author, title, date) = match doc.kind {
        DocumentKind::Pdf => pdf_info(&doc.bytes)?,
        DocumentKind::Epub => epub_metadata(&doc.bytes)?,
    };

    let mut candidate = RawCandidate::empty(Source::Properties);
    candidate.author = author.filter(|a| !is_placeholder(a));
    candidate.title = title.filter(|t| !is_placeholder(t));
    candidate.year = date.as_deref().and_then(date_year);
    if !candidate.is_empty() {
        candidate.quality = PROPERTIES_QUALITY;
    }
    tracing::debug!(
        path = %doc.path.display(),
        author = ?candidate.author,
        title = ?candidate.title,
        year = ?candidate.year,
        "embedded properties"
    );
    Ok(candidate)
}

/// Year of a PDF date (`D:YYYYMMDD…`) or a free-form EPUB date.
fn date_year(value: &str) -> Option<i32> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix("D:").unwrap_or(trimmed);
    match digits.get(..4) {
        Some(head) if head.bytes().all(|b| b.is_ascii_digit()) => head.parse().ok(),
        _ => find_year(trimmed),
    }
}

type Fields = (Option<String>, Option<String>, Option<String>);

fn pdf_info(bytes: &[u8]) -> Result<Fields, ExtractError> {
    let document = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Corrupt {
        format: "PDF",
        reason: e.to_string(),
    })?;

    let info = match document.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => document.get_object(*id).and_then(Object::as_dict).ok(),
        Ok(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };
    let Some(info) = info else {
        return Ok((None, None, None));
    };

    let field = |key: &[u8]| -> Option<String> {
        let obj = match info.get(key).ok()? {
            Object::Reference(id) => document.get_object(*id).ok()?,
            other => other,
        };
        match obj {
            Object::String(raw, _) => {
                let text = decode_pdf_string(raw);
                let text = text.replace('\0', " ");
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                (!text.is_empty()).then_some(text)
            }
            _ => None,
        }
    };

    Ok((field(b"Author"), field(b"Title"), field(b"CreationDate")))
}

/// PDF text strings are UTF-16BE when they carry a BOM, otherwise
/// PDFDocEncoding (treated as Latin-1).
fn decode_pdf_string(raw: &[u8]) -> String {
    if raw.len() >= 2 && raw[0] == 0xFE && raw[1] == 0xFF {
        let units: Vec<u16> = raw[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if raw.len() >= 3 && raw[..3] == [0xEF, 0xBB, 0xBF] {
        return String::from_utf8_lossy(&raw[3..]).into_owned();
    }
    raw.iter().map(|&b| b as char).collect()
}

fn epub_metadata(bytes: &[u8]) -> Result<Fields, ExtractError> {
    let mut archive = open_epub(bytes)?;
    let pkg = read_package(&mut archive)?;
    let author = if pkg.creators.is_empty() {
        None
    } else {
        Some(pkg.creators.join("; "))
    };
    Ok((author, pkg.title, pkg.date))
}
