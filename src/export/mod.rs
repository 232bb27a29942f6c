//! Case study export: Markdown, an HTML intermediate, and PDF.

mod pdf;

pub use pdf::*;

use pulldown_cmark::{html, Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ExportConfig;
use crate::error::ExportResult;
use crate::pipeline::CaseStudyDocument;

/// Notice placed above the body of drafts built on incomplete evidence.
pub const INCOMPLETE_EVIDENCE_NOTICE: &str =
    "> **Note:** this case study is based on incomplete evidence. Some research lookups returned no data.";

/// Export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Pdf,
}

impl ExportFormat {
    /// Get the format name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "markdown",
            ExportFormat::Pdf => "pdf",
        }
    }

    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Pdf => "pdf",
        }
    }

    /// MIME type of the exported file.
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
            ExportFormat::Pdf => "application/pdf",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "pdf" => Ok(ExportFormat::Pdf),
            _ => Err(format!("Unknown export format: {}", s)),
        }
    }
}

/// Fixed page chrome around the rendered body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfChrome {
    pub header_text: Option<String>,
    pub footer_text: Option<String>,
    pub logo_url: Option<String>,
}

impl From<&ExportConfig> for PdfChrome {
    fn from(config: &ExportConfig) -> Self {
        Self {
            header_text: config.pdf_header_text.clone(),
            footer_text: config.pdf_footer_text.clone(),
            logo_url: config.pdf_logo_url.clone(),
        }
    }
}

// ============================================================================
// Markdown and HTML
// ============================================================================

/// Markdown text of a document: title, header lines, then the body.
pub fn markdown_text(doc: &CaseStudyDocument) -> String {
    let mut out = format!("# {}\n\n**Client**: {}\n\n", doc.title, doc.client);
    if !doc.industry.trim().is_empty() {
        out.push_str(&format!("**Industry**: {}\n\n", doc.industry));
    }
    out.push_str(&format!("**Style**: {}\n\n", doc.style));
    if doc.incomplete_evidence {
        out.push_str(INCOMPLETE_EVIDENCE_NOTICE);
        out.push_str("\n\n");
    }
    out.push_str(doc.body_markdown.trim());
    out.push('\n');
    out
}

/// UTF-8 Markdown bytes of a document.
pub fn to_markdown(doc: &CaseStudyDocument) -> Vec<u8> {
    markdown_text(doc).into_bytes()
}

fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options
}

/// Render a Markdown fragment to HTML.
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, markdown_options());
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Standalone HTML page for a document, wrapped in the given chrome.
pub fn to_html(doc: &CaseStudyDocument, chrome: &PdfChrome) -> String {
    let mut page = String::new();
    page.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    page.push_str(&format!("<title>{}</title>\n", escape_html(&doc.title)));
    page.push_str(
        "<style>\nbody { font-family: Helvetica, Arial, sans-serif; line-height: 1.5; margin: 2em; }\n\
         header, footer { color: #555; font-size: 0.85em; }\n\
         header img { max-height: 48px; }\n\
         blockquote { border-left: 3px solid #ccc; margin-left: 0; padding-left: 1em; }\n</style>\n",
    );
    page.push_str("</head>\n<body>\n");

    if chrome.header_text.is_some() || chrome.logo_url.is_some() {
        page.push_str("<header>\n");
        if let Some(logo) = &chrome.logo_url {
            page.push_str(&format!("<img src=\"{}\" alt=\"logo\">\n", escape_html(logo)));
        }
        if let Some(text) = &chrome.header_text {
            page.push_str(&format!("<div>{}</div>\n", escape_html(text)));
        }
        page.push_str("</header>\n");
    }

    page.push_str("<main>\n");
    page.push_str(&markdown_to_html(&markdown_text(doc)));
    page.push_str("</main>\n");

    if let Some(text) = &chrome.footer_text {
        page.push_str(&format!("<footer>{}</footer>\n", escape_html(text)));
    }

    page.push_str("</body>\n</html>\n");
    page
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Text of every heading in a Markdown document, in order.
pub fn section_headings(markdown: &str) -> Vec<String> {
    let mut headings = Vec::new();
    let mut current: Option<String> = None;

    for event in Parser::new_ext(markdown, markdown_options()) {
        match event {
            Event::Start(Tag::Heading { .. }) => current = Some(String::new()),
            Event::End(TagEnd::Heading(_)) => {
                if let Some(heading) = current.take() {
                    headings.push(heading.trim().to_string());
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(heading) = current.as_mut() {
                    heading.push_str(&text);
                }
            }
            _ => {}
        }
    }

    headings
}

// ============================================================================
// Files
// ============================================================================

/// Project title reduced to a safe file stem: whitespace runs become `_`.
pub fn sanitize_title(title: &str) -> String {
    let stem: String = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    let stem = stem.trim_matches('.');

    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem.to_string()
    }
}

/// `<Sanitized_Title>_case_study.<ext>`
pub fn export_file_name(title: &str, extension: &str) -> String {
    format!("{}_case_study.{}", sanitize_title(title), extension)
}

/// A file written by the exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: String,
    pub bytes: usize,
}

/// Writes documents to the export directory.
#[derive(Clone)]
pub struct Exporter {
    output_dir: PathBuf,
    chrome: PdfChrome,
    renderer: Arc<dyn PdfRenderer>,
}

impl Exporter {
    /// Create a new exporter
    pub fn new(output_dir: impl Into<PathBuf>, chrome: PdfChrome, renderer: Arc<dyn PdfRenderer>) -> Self {
        Self {
            output_dir: output_dir.into(),
            chrome,
            renderer,
        }
    }

    /// Directory files are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Render `doc` in `format` without writing it.
    pub async fn render(&self, doc: &CaseStudyDocument, format: ExportFormat) -> ExportResult<Vec<u8>> {
        match format {
            ExportFormat::Markdown => Ok(to_markdown(doc)),
            ExportFormat::Pdf => {
                let html = to_html(doc, &self.chrome);
                self.renderer.render(&html).await.map_err(|e| {
                    warn!(document_id = %doc.id, error = %e, "PDF export failed");
                    e
                })
            }
        }
    }

    /// Render `doc` and write it to the export directory.
    ///
    /// A rendering failure writes nothing.
    pub async fn export(&self, doc: &CaseStudyDocument, format: ExportFormat) -> ExportResult<ExportArtifact> {
        let bytes = self.render(doc, format).await?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let file_name = export_file_name(&doc.title, format.extension());
        let path = self.output_dir.join(&file_name);
        tokio::fs::write(&path, &bytes).await?;

        info!(
            document_id = %doc.id,
            format = %format,
            path = %path.display(),
            bytes = bytes.len(),
            "Case study exported"
        );

        Ok(ExportArtifact {
            format,
            path,
            file_name,
            content_type: format.content_type().to_string(),
            bytes: bytes.len(),
        })
    }
}
