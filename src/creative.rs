//! Plain-text extraction from uploaded creatives.
//!
//! Extraction never fails: unsupported formats, missing readers and
//! unreadable documents all come back as a bracketed placeholder string that
//! is sent to the personas in place of the creative.

use std::{fs, io, path::Path};

use anyhow::Result;
use tracing::{debug, warn};

pub const WORD_READER_MISSING: &str =
    "[DOC/DOCX uploaded, but no Word document reader is available.]";
pub const WORD_UNREADABLE: &str = "[DOC/DOCX uploaded, but its text could not be read.]";
pub const PDF_READER_MISSING: &str = "[PDF uploaded, but no PDF reader is available.]";
pub const PDF_UNREADABLE: &str = "[PDF uploaded, but its text could not be read.]";
pub const UNSUPPORTED_FORMAT: &str =
    "[Unsupported file format. Please upload txt, html, md, doc, docx, or pdf.]";

/// A file handed in by the operator.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    /// MIME type declared by the uploader, if any.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, bytes))
    }
}

/// Turns a binary document into its text units (paragraphs or pages) in
/// document order.
pub trait DocumentReader: Send + Sync {
    fn read(&self, bytes: &[u8]) -> Result<Vec<String>>;
}

/// Whether a reader for a document family is present.
pub enum Capability {
    Available(Box<dyn DocumentReader>),
    Unavailable,
}

impl Capability {
    fn read(&self, bytes: &[u8], missing: &str, unreadable: &str) -> String {
        match self {
            Capability::Unavailable => {
                warn!("No reader available, returning placeholder");
                missing.to_string()
            }
            Capability::Available(reader) => match reader.read(bytes) {
                Ok(units) => units.join("\n"),
                Err(e) => {
                    warn!("Failed to read document: {e:#}");
                    unreadable.to_string()
                }
            },
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Format {
    Text,
    Word,
    Pdf,
    Unsupported,
}

fn detect_format(file: &UploadedFile) -> Format {
    let name = Path::new(&file.name)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let is_text = |mime: &str| mime.starts_with("text");

    let guessed = mime_guess::from_path(&name).first();
    if guessed.as_ref().is_some_and(|m| is_text(m.essence_str()))
        || file.content_type.as_deref().is_some_and(is_text)
    {
        Format::Text
    } else if name.ends_with(".doc") || name.ends_with(".docx") {
        Format::Word
    } else if name.ends_with(".pdf") {
        Format::Pdf
    } else {
        Format::Unsupported
    }
}

pub struct CreativeExtractor {
    word: Capability,
    pdf: Capability,
}

impl Default for CreativeExtractor {
    /// Uses every reader compiled into this build.
    fn default() -> Self {
        #[cfg(feature = "docx")]
        let word = Capability::Available(Box::new(docx::DocxReader));
        #[cfg(not(feature = "docx"))]
        let word = Capability::Unavailable;

        #[cfg(feature = "pdf")]
        let pdf = Capability::Available(Box::new(pdf::PdfReader));
        #[cfg(not(feature = "pdf"))]
        let pdf = Capability::Unavailable;

        Self::new(word, pdf)
    }
}

impl CreativeExtractor {
    pub fn new(word: Capability, pdf: Capability) -> Self {
        Self { word, pdf }
    }

    pub fn extract(&self, file: &UploadedFile) -> String {
        let format = detect_format(file);
        debug!("Extracting {} as {format:?}", file.name);
        match format {
            Format::Text => file.bytes.utf8_chunks().map(|c| c.valid()).collect(),
            Format::Word => self
                .word
                .read(&file.bytes, WORD_READER_MISSING, WORD_UNREADABLE),
            Format::Pdf => self.pdf.read(&file.bytes, PDF_READER_MISSING, PDF_UNREADABLE),
            Format::Unsupported => {
                warn!("Unsupported creative format: {}", file.name);
                UNSUPPORTED_FORMAT.to_string()
            }
        }
    }
}

#[cfg(feature = "docx")]
mod docx {
    use std::io::{Cursor, Read};

    use anyhow::{Context, Result};
    use quick_xml::{events::Event, Reader};
    use zip::ZipArchive;

    use super::DocumentReader;

    const DOCUMENT_PART: &str = "word/document.xml";

    /// Reads the paragraphs of an Office Open XML word-processing package.
    pub(super) struct DocxReader;

    impl DocumentReader for DocxReader {
        fn read(&self, bytes: &[u8]) -> Result<Vec<String>> {
            let mut archive = ZipArchive::new(Cursor::new(bytes)).context("not a docx package")?;
            let mut xml = String::new();
            archive
                .by_name(DOCUMENT_PART)
                .context("missing word/document.xml")?
                .read_to_string(&mut xml)?;
            paragraphs(&xml)
        }
    }

    fn paragraphs(xml: &str) -> Result<Vec<String>> {
        let mut reader = Reader::from_str(xml);
        let mut buf = Vec::new();
        let mut paragraphs = Vec::new();
        let mut current = String::new();
        let mut in_text = false;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
                Event::End(e) => match e.name().as_ref() {
                    b"w:t" => in_text = false,
                    b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                    _ => {}
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"w:tab" => current.push('\t'),
                    b"w:br" | b"w:cr" => current.push('\n'),
                    b"w:p" => paragraphs.push(String::new()),
                    _ => {}
                },
                Event::Text(e) if in_text => current.push_str(&String::from_utf8_lossy(&e)),
                Event::GeneralRef(e) if in_text => {
                    if let Some(c) = resolve_entity(&String::from_utf8_lossy(&e)) {
                        current.push(c);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(paragraphs)
    }

    fn resolve_entity(name: &str) -> Option<char> {
        match name {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => {
                let code = name.strip_prefix('#')?;
                let value = match code.strip_prefix('x') {
                    Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                    None => code.parse().ok()?,
                };
                char::from_u32(value)
            }
        }
    }

}

#[cfg(feature = "pdf")]
mod pdf {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use anyhow::{anyhow, Result};

    use super::DocumentReader;

    /// Per-page text via `pdf-extract`; pages without text come back empty.
    pub(super) struct PdfReader;

    impl DocumentReader for PdfReader {
        fn read(&self, bytes: &[u8]) -> Result<Vec<String>> {
            // pdf-extract panics on some malformed object graphs.
            let result = catch_unwind(AssertUnwindSafe(|| {
                pdf_extract::extract_text_from_mem_by_pages(bytes)
            }))
            .map_err(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                anyhow!("pdf extraction panicked: {reason}")
            })?;
            Ok(result?)
        }
    }
}
