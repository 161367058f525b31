//! Per-format text extraction strategies.

use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};
use thiserror::Error;

const SLIDE_PREFIX: &str = "ppt/slides/slide";
const SLIDE_SUFFIX: &str = ".xml";

/// Parser failures for a single document format.
#[derive(Debug, Error)]
pub enum FormatError {
    /// PDF bytes could not be parsed.
    #[error("invalid PDF: {0}")]
    Pdf(String),
    /// Word document could not be parsed.
    #[error("invalid DOCX: {0}")]
    Docx(String),
    /// Office container is not a readable zip archive.
    #[error("invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    /// Slide XML was malformed.
    #[error("invalid slide XML: {0}")]
    Xml(#[from] quick_xml::Error),
    /// Text content was not valid UTF-8.
    #[error("content is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    /// Tabular content could not be read.
    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
    /// Table has no header row.
    #[error("no columns to parse")]
    EmptyTable,
    /// Archive member could not be read.
    #[error("failed to read archive member: {0}")]
    Io(#[from] std::io::Error),
}

/// Concatenate the text of every page.
pub(super) fn pdf_text(bytes: &[u8]) -> Result<String, FormatError> {
    // pdf-extract panics on some malformed font tables; treat that like any parse failure.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(error)) => Err(FormatError::Pdf(error.to_string())),
        Err(_) => Err(FormatError::Pdf("parser aborted on malformed content".into())),
    }
}

/// Join the text of each body paragraph with newlines.
pub(super) fn docx_text(bytes: &[u8]) -> Result<String, FormatError> {
    let document =
        docx_rs::read_docx(bytes).map_err(|error| FormatError::Docx(error.to_string()))?;

    let paragraphs: Vec<String> = document
        .document
        .children
        .into_iter()
        .filter_map(|child| match child {
            docx_rs::DocumentChild::Paragraph(paragraph) => Some(paragraph_text(&paragraph)),
            _ => None,
        })
        .collect();

    Ok(paragraphs.join("\n"))
}

fn paragraph_text(paragraph: &docx_rs::Paragraph) -> String {
    let mut text = String::new();
    for child in &paragraph.children {
        if let docx_rs::ParagraphChild::Run(run) = child {
            for run_child in &run.children {
                if let docx_rs::RunChild::Text(fragment) = run_child {
                    text.push_str(&fragment.text);
                }
            }
        }
    }
    text
}

/// Concatenate the text of every text-bearing shape, slide by slide.
pub(super) fn pptx_text(bytes: &[u8]) -> Result<String, FormatError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            name.strip_prefix(SLIDE_PREFIX)
                .and_then(|rest| rest.strip_suffix(SLIDE_SUFFIX))
                .and_then(|number| number.parse::<u32>().ok())
                .map(|number| (number, name.to_string()))
        })
        .collect();
    slides.sort_by_key(|(number, _)| *number);

    let mut text = String::new();
    for (_, name) in slides {
        let mut xml = String::new();
        archive.by_name(&name)?.read_to_string(&mut xml)?;
        for shape in slide_shape_texts(&xml)? {
            text.push_str(&shape);
            text.push('\n');
        }
    }

    Ok(text)
}

/// Text of each top-level shape that owns a text body, in document order.
///
/// Paragraphs inside one shape are separated by newlines. Shapes nested in groups are skipped
/// since only top-level shapes expose their text directly.
fn slide_shape_texts(xml: &str) -> Result<Vec<String>, FormatError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut shapes = Vec::new();
    let mut group_depth = 0usize;
    let mut in_shape = false;
    let mut has_text_body = false;
    let mut in_run_text = false;
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"grpSp" => group_depth += 1,
                b"sp" if group_depth == 0 => {
                    in_shape = true;
                    has_text_body = false;
                    paragraphs.clear();
                }
                b"txBody" if in_shape => has_text_body = true,
                b"p" if in_shape && has_text_body => current.clear(),
                b"t" if in_shape => in_run_text = true,
                _ => {}
            },
            Event::Empty(element) => match element.local_name().as_ref() {
                b"p" if in_shape && has_text_body => paragraphs.push(String::new()),
                b"br" if in_shape => current.push('\n'),
                _ => {}
            },
            Event::Text(content) if in_run_text => {
                current.push_str(&content.unescape()?);
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"grpSp" => group_depth = group_depth.saturating_sub(1),
                b"t" => in_run_text = false,
                b"p" if in_shape && has_text_body => paragraphs.push(std::mem::take(&mut current)),
                b"sp" if in_shape && group_depth == 0 => {
                    if has_text_body {
                        shapes.push(paragraphs.join("\n"));
                    }
                    in_shape = false;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(shapes)
}

/// Render a CSV table as aligned text with a leading row index column.
pub(super) fn csv_text(bytes: &[u8]) -> Result<String, FormatError> {
    let content = std::str::from_utf8(bytes)?;
    let mut reader = csv::Reader::from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return Err(FormatError::EmptyTable);
    }

    let mut rows: Vec<Vec<String>> = vec![std::iter::once(String::new()).chain(headers).collect()];
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        rows.push(
            std::iter::once(index.to_string())
                .chain(record.iter().map(str::to_string))
                .collect(),
        );
    }

    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|column| {
            rows.iter()
                .filter_map(|row| row.get(column))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let lines: Vec<String> = rows
        .iter()
        .map(|row| {
            row.iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{cell:>width$}"))
                .collect::<Vec<_>>()
                .join("  ")
        })
        .collect();

    Ok(lines.join("\n"))
}

/// Decode UTF-8 text as-is.
pub(super) fn plain_text(bytes: &[u8]) -> Result<String, FormatError> {
    Ok(std::str::from_utf8(bytes)?.to_string())
}
