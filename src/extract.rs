//! Content extraction: text, structured metadata and thumbnails.
//!
//! The scheduler supplies bytes plus a detected MIME type; [`extract`]
//! dispatches to a format routine. Routines never panic on hostile input:
//! every failure becomes an [`ExtractError`] whose message is recorded on
//! the document while sibling tasks continue.

use std::io::{Cursor, Read};

use image::GenericImageView;
use serde_json::{json, Map, Value};

use crate::cancel::Checkpoint;
use crate::detect;
use crate::models::Thumbnail;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Decompressed bytes read from a single OOXML part (zip-bomb protection).
const MAX_XML_PART_BYTES: u64 = 50 * 1024 * 1024;
/// Allocation ceiling for decoding one image.
const MAX_IMAGE_ALLOC: u64 = 256 * 1024 * 1024;

/// Per quality level (index): longest thumbnail edge in pixels and JPEG quality.
const THUMBNAIL_LEVELS: [(u32, u8); 5] = [(0, 0), (64, 50), (128, 65), (256, 80), (512, 90)];

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("image decoding failed: {0}")]
    Image(String),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("timeout")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
}

/// Limits applied to one extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    /// Cap on extracted text, in bytes.
    pub max_content_bytes: u64,
    /// 0 disables thumbnails.
    pub thumbnail_quality: u8,
}

/// Output of a successful extraction.
#[derive(Debug, Default)]
pub struct Extracted {
    pub text: Option<String>,
    pub metadata: Map<String, Value>,
    pub thumbnail: Option<Thumbnail>,
}

/// Extract text, metadata and an optional thumbnail from `bytes`.
///
/// Types without an extraction routine produce an empty [`Extracted`]:
/// their documents still carry size, hash and type.
pub fn extract(
    bytes: &[u8],
    mime: &str,
    limits: &ExtractLimits,
    checkpoint: &Checkpoint,
) -> Result<Extracted, ExtractError> {
    checkpoint.check()?;
    let mut out = Extracted::default();

    if detect::is_text_mime(mime) {
        out.text = Some(decode_text(bytes));
    } else if detect::is_image_mime(mime) {
        let image = decode_image(bytes)?;
        let (width, height) = image.dimensions();
        out.metadata.insert("width".into(), json!(width));
        out.metadata.insert("height".into(), json!(height));
        checkpoint.check()?;
        if limits.thumbnail_quality > 0 {
            out.thumbnail = Some(thumbnail_from_image(&image, limits.thumbnail_quality)?);
        }
    } else if is_document_mime(mime) {
        out.text = Some(extract_text(bytes, mime, checkpoint)?);
    }
    checkpoint.check()?;

    if let Some(text) = out.text.as_mut() {
        truncate_at_char_boundary(text, limits.max_content_bytes as usize);
        out.metadata.insert("chars".into(), json!(text.chars().count()));
        out.metadata
            .insert("lines".into(), json!(text.lines().count()));
    }
    Ok(out)
}

fn is_document_mime(mime: &str) -> bool {
    matches!(mime, MIME_PDF | MIME_DOCX | MIME_PPTX | MIME_XLSX)
}

/// Extracts plain text from PDF and OOXML documents.
pub fn extract_text(
    bytes: &[u8],
    content_type: &str,
    checkpoint: &Checkpoint,
) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes, checkpoint),
        MIME_XLSX => extract_xlsx(bytes, checkpoint),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn truncate_at_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

// ── OOXML ──────────────────────────────────────────────────────────────

type Package<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_package(bytes: &[u8]) -> Result<Package<'_>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_part(package: &mut Package<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let part = package
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    part.take(MAX_XML_PART_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_PART_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "{} exceeds size limit ({} bytes)",
            name, MAX_XML_PART_BYTES
        )));
    }
    Ok(out)
}

/// Parts named `<prefix><n>.xml`, ordered by `n`.
fn numbered_parts(package: &Package<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = package
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Text content of every `<*:t>` element, in document order.
fn text_runs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut runs = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_t = false,
            Ok(Event::Text(te)) if in_t => {
                runs.push(te.unescape().unwrap_or_default().into_owned());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(runs)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut package = open_package(bytes)?;
    let xml = read_part(&mut package, "word/document.xml")?;
    Ok(text_runs(&xml)?.concat())
}

fn extract_pptx(bytes: &[u8], checkpoint: &Checkpoint) -> Result<String, ExtractError> {
    let mut package = open_package(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_parts(&package, "ppt/slides/slide") {
        checkpoint.check()?;
        let xml = read_part(&mut package, &name)?;
        let text = text_runs(&xml)?.concat();
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join(" "))
}

fn extract_xlsx(bytes: &[u8], checkpoint: &Checkpoint) -> Result<String, ExtractError> {
    let mut package = open_package(bytes)?;
    let shared = match package.index_for_name("xl/sharedStrings.xml") {
        Some(_) => shared_strings(&read_part(&mut package, "xl/sharedStrings.xml")?)?,
        None => Vec::new(),
    };
    let mut sheets = Vec::new();
    for name in numbered_parts(&package, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        checkpoint.check()?;
        let xml = read_part(&mut package, &name)?;
        let cells = sheet_cells(&xml, &shared)?;
        if !cells.is_empty() {
            sheets.push(cells);
        }
    }
    Ok(sheets.join(" "))
}

/// One string per `<si>`, concatenating rich-text runs.
fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Shared-string and inline cell values of one worksheet, space-joined.
fn sheet_cells(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut cell_type: Option<Vec<u8>> = None;
    let mut in_value = false;
    while cells.len() < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_type = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"t")
                        .map(|a| a.value.into_owned());
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                match cell_type.as_deref() {
                    Some(b"s") => {
                        if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                            cells.push(s.clone());
                        }
                    }
                    Some(b"inlineStr") | Some(b"str") if !value.is_empty() => {
                        cells.push(value.to_string());
                    }
                    _ => {}
                }
                in_value = false;
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"c" => cell_type = None,
                b"v" | b"t" => in_value = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

// ── Images ─────────────────────────────────────────────────────────────

fn decode_image(bytes: &[u8]) -> Result<image::DynamicImage, ExtractError> {
    let mut reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ExtractError::Image(e.to_string()))?;
    let mut limits = image::Limits::default();
    limits.max_alloc = Some(MAX_IMAGE_ALLOC);
    reader.limits(limits);
    reader
        .decode()
        .map_err(|e| ExtractError::Image(e.to_string()))
}

/// Render a JPEG thumbnail of an encoded image at `quality` (1..=4).
///
/// Identical input and quality level always produce identical bytes.
pub fn render_thumbnail(bytes: &[u8], quality: u8) -> Result<Thumbnail, ExtractError> {
    thumbnail_from_image(&decode_image(bytes)?, quality)
}

fn thumbnail_from_image(
    image: &image::DynamicImage,
    quality: u8,
) -> Result<Thumbnail, ExtractError> {
    let level = usize::from(quality).clamp(1, THUMBNAIL_LEVELS.len() - 1);
    let (max_edge, jpeg_quality) = THUMBNAIL_LEVELS[level];

    let (width, height) = image.dimensions();
    let rgb = if width > max_edge || height > max_edge {
        image.thumbnail(max_edge, max_edge).to_rgb8()
    } else {
        image.to_rgb8()
    };

    let mut data = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut data, jpeg_quality)
        .encode_image(&rgb)
        .map_err(|e| ExtractError::Image(e.to_string()))?;

    Ok(Thumbnail {
        quality: level as u8,
        width: rgb.width(),
        height: rgb.height(),
        data,
    })
}
