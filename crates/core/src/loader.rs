use crate::chunking::normalize_text;
use crate::error::LoadError;
use crate::models::Document;
use crate::traits::DocumentLoader;
use lopdf::Document as PdfDocument;
use regex::Regex;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Csv,
    Text,
}

impl DocumentFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "csv" => Some(DocumentFormat::Csv),
            "txt" | "text" | "md" => Some(DocumentFormat::Text),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        Self::from_extension(extension).ok_or_else(|| {
            LoadError::UnsupportedFormat(format!("'.{extension}' ({})", path.display()))
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Csv => "csv",
            DocumentFormat::Text => "text",
        }
    }

    pub fn load(self, path: &Path) -> Result<Vec<Document>, LoadError> {
        let source = path.to_string_lossy().to_string();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| LoadError::MissingFileName(source.clone()))?
            .to_string();

        let units = match self {
            DocumentFormat::Pdf => load_pdf_pages(path, &source)?,
            DocumentFormat::Docx => vec![Document::new(source.clone(), read_docx_text(path)?)],
            DocumentFormat::Csv => load_csv_rows(path, &source)?,
            DocumentFormat::Text => vec![Document::new(source.clone(), fs::read_to_string(path)?)],
        };

        Ok(units
            .into_iter()
            .map(|mut document| {
                document.raw_text = normalize_text(&document.raw_text);
                document
                    .with_metadata("source", source.as_str())
                    .with_metadata("file_name", file_name.as_str())
                    .with_metadata("format", self.name())
            })
            .collect())
    }
}

/// Dispatches on the file extension to one of the fixed [`DocumentFormat`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatLoader;

impl DocumentLoader for FormatLoader {
    fn load(&self, path: &Path) -> Result<Vec<Document>, LoadError> {
        DocumentFormat::from_path(path)?.load(path)
    }
}

fn load_pdf_pages(path: &Path, source: &str) -> Result<Vec<Document>, LoadError> {
    let document =
        PdfDocument::load(path).map_err(|error| LoadError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| LoadError::PdfParse(error.to_string()))?;

        if !text.trim().is_empty() {
            pages.push(
                Document::new(format!("{source}#page={page_no}"), text)
                    .with_metadata("page", page_no.to_string()),
            );
        }
    }

    if pages.is_empty() {
        return Err(LoadError::PdfParse(format!(
            "pdf had no readable page text: {}",
            path.display()
        )));
    }

    Ok(pages)
}

fn read_docx_text(path: &Path) -> Result<String, LoadError> {
    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut xml = String::new();
    archive.by_name("word/document.xml")?.read_to_string(&mut xml)?;
    docx_xml_to_text(&xml)
}

fn docx_xml_to_text(xml: &str) -> Result<String, LoadError> {
    let paragraph_re = Regex::new(r"(?s)<w:p[ >].*?</w:p>")?;
    let run_re = Regex::new(r"(?s)<w:t(?: [^>]*)?>(.*?)</w:t>|<w:tab/>")?;

    let paragraphs = paragraph_re
        .find_iter(xml)
        .map(|paragraph| {
            run_re
                .captures_iter(paragraph.as_str())
                .map(|run| {
                    run.get(1)
                        .map(|text| decode_xml_entities(text.as_str()))
                        .unwrap_or_else(|| "\t".to_string())
                })
                .collect::<String>()
        })
        .filter(|paragraph| !paragraph.trim().is_empty())
        .collect::<Vec<_>>();

    Ok(paragraphs.join("\n\n"))
}

fn decode_xml_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn load_csv_rows(path: &Path, source: &str) -> Result<Vec<Document>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let text = record
            .iter()
            .enumerate()
            .map(|(column, value)| {
                let name = headers.get(column).unwrap_or_default();
                format!("{}: {}", name.trim(), value.trim())
            })
            .collect::<Vec<_>>()
            .join("\n");

        rows.push(
            Document::new(format!("{source}#row={row}"), text).with_metadata("row", row.to_string()),
        );
    }

    Ok(rows)
}

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if DocumentFormat::from_path(entry.path()).is_ok() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Expands directories into the supported files beneath them; plain file
/// paths are kept as given so unsupported ones surface as load failures.
pub fn expand_inputs(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .flat_map(|path| {
            if path.is_dir() {
                discover_documents(path)
            } else {
                vec![path.clone()]
            }
        })
        .collect()
}
