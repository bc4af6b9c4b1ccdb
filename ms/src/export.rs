//! Printable export
//!
//! Builds a print-ready page for a plan: institutional header, proposal
//! title, every section rendered and expanded, institutional footer. While
//! a file is produced the teacher and school fields carry the names the
//! teacher typed; the document goes back to its placeholders afterwards, on
//! every path out.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ExportConfig;
use crate::markdown::{RenderOptions, escape_html, render_with};
use crate::sections::PlanDocument;

/// Label of the teacher field in the plan
pub const TEACHER_FIELD: &str = "Docente(s) Responsable(s)";

/// Label of the school field in the plan
pub const SCHOOL_FIELD: &str = "Institución Educativa";

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Indica el nombre del docente y de la institución educativa.")]
    MissingDetails,

    #[error("Export I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image fetch failed: {0}")]
    Fetch(String),

    #[error("Hubo un error al generar el PDF: {0}")]
    Sink(String),
}

/// Page-setup options for the printable file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// Inches: top, left, bottom, right
    pub margin: [f64; 4],
    pub filename: String,
    pub image: ImageOptions,
    pub scale: u32,
    pub page: PageOptions,
    pub pagebreak: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOptions {
    #[serde(rename = "type")]
    pub kind: String,
    pub quality: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOptions {
    pub unit: String,
    pub format: String,
    pub orientation: String,
}

impl ExportOptions {
    pub fn new(config: &ExportConfig, proposal_name: &str) -> Self {
        Self {
            margin: config.margin,
            filename: export_filename(proposal_name),
            image: ImageOptions {
                kind: "jpeg".to_string(),
                quality: config.image_quality,
            },
            scale: config.scale,
            page: PageOptions {
                unit: "in".to_string(),
                format: "letter".to_string(),
                orientation: "portrait".to_string(),
            },
            pagebreak: config.page_break.clone(),
        }
    }

    /// `@page` and break rules matching these options
    fn page_css(&self) -> String {
        let [top, left, bottom, right] = self.margin;
        let mut css = format!(
            "@page {{ size: {} {}; margin: {}{unit} {}{unit} {}{unit} {}{unit}; }}\n",
            self.page.format,
            self.page.orientation,
            top,
            right,
            bottom,
            left,
            unit = self.page.unit
        );
        if self.pagebreak.iter().any(|m| m == "avoid-all") {
            css.push_str(".accordion-item, li, p { break-inside: avoid; }\n");
        }
        if self.pagebreak.iter().any(|m| m == "css") {
            css.push_str(".page-break { break-before: page; }\n");
        }
        css
    }
}

/// File name for an exported plan
///
/// Characters outside `[a-z0-9\s-]` (either case) are dropped, whitespace
/// runs become `-`, and the result is lowercased.
pub fn export_filename(proposal_name: &str) -> String {
    let mut slug = String::with_capacity(proposal_name.len());
    let mut in_space = false;
    let kept = proposal_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '-');
    for c in kept {
        if c.is_whitespace() {
            if !in_space {
                slug.push('-');
            }
            in_space = true;
        } else {
            slug.push(c.to_ascii_lowercase());
            in_space = false;
        }
    }
    format!("{}-plan-proyecto.pdf", slug)
}

/// What the teacher typed for the two placeholder fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDetails {
    pub teacher: String,
    pub school: String,
}

impl ExportDetails {
    /// Both names are required
    pub fn new(teacher: &str, school: &str) -> Result<Self, ExportError> {
        let (teacher, school) = (teacher.trim(), school.trim());
        if teacher.is_empty() || school.is_empty() {
            return Err(ExportError::MissingDetails);
        }
        Ok(Self {
            teacher: teacher.to_string(),
            school: school.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintHeader {
    pub title: String,
    pub subtitle: String,
    pub left_logo: String,
    /// Data URL of an uploaded logo
    pub right_logo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintSection {
    pub title: String,
    pub html: String,
}

/// The printable page before it is written out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintDocument {
    pub header: PrintHeader,
    pub proposal_name: String,
    pub sections: Vec<PrintSection>,
    pub footer_image: String,
}

impl PrintDocument {
    pub fn new(
        config: &ExportConfig,
        proposal_name: &str,
        document: &PlanDocument,
        render_options: &RenderOptions,
    ) -> Self {
        debug!(%proposal_name, sections = %document.len(), "PrintDocument::new: called");
        Self {
            header: PrintHeader {
                title: config.title.clone(),
                subtitle: config.subtitle.clone(),
                left_logo: config.left_logo_url.clone(),
                right_logo: None,
            },
            proposal_name: proposal_name.to_string(),
            sections: document
                .sections()
                .iter()
                .map(|s| PrintSection {
                    title: s.title.clone(),
                    html: render_with(&s.body, render_options),
                })
                .collect(),
            footer_image: config.footer_image_url.clone(),
        }
    }

    /// Embed a local image as the right header logo
    pub fn set_right_logo_file(&mut self, path: &Path) -> Result<(), ExportError> {
        let bytes = std::fs::read(path)?;
        let mime = mime_for_path(path);
        self.header.right_logo = Some(data_url(mime, &bytes));
        Ok(())
    }

    /// Full HTML page
    pub fn to_html(&self, options: &ExportOptions) -> String {
        let right_logo = match &self.header.right_logo {
            Some(src) => format!("<img src=\"{}\" alt=\"Logo derecho\">", escape_html(src)),
            None => String::new(),
        };
        let sections: String = self
            .sections
            .iter()
            .map(|s| {
                format!(
                    "<div class=\"accordion-item\"><h3 class=\"accordion-title\">{}</h3><div class=\"content-wrapper\">{}</div></div>\n",
                    escape_html(&s.title),
                    s.html
                )
            })
            .collect();

        format!(
            "<!DOCTYPE html>\n<html lang=\"es\">\n<head>\n<meta charset=\"utf-8\">\n<title>{name}</title>\n<style>\n{page_css}{BASE_CSS}</style>\n</head>\n<body>\n<div id=\"printable-area\">\n<div class=\"plan-header\">\n<div class=\"logo\" style=\"background-image: url('{left_logo}')\"></div>\n<div class=\"header-text-content\"><h1>{title}</h1><p>{subtitle}</p></div>\n<div class=\"logo\">{right_logo}</div>\n</div>\n<div class=\"plan-title-header\"><hr><h2>{name}</h2></div>\n<div id=\"plan-accordion-container\" class=\"printing\">\n{sections}</div>\n<div class=\"plan-footer\"><img src=\"{footer}\" alt=\"Pie de página institucional\"></div>\n</div>\n</body>\n</html>\n",
            name = escape_html(&self.proposal_name),
            page_css = options.page_css(),
            left_logo = escape_html(&self.header.left_logo),
            title = escape_html(&self.header.title),
            subtitle = escape_html(&self.header.subtitle),
            right_logo = right_logo,
            sections = sections,
            footer = escape_html(&self.footer_image),
        )
    }
}

const BASE_CSS: &str = "body { font-family: 'Segoe UI', Arial, sans-serif; color: #1c1e21; }
.plan-header { display: flex; align-items: center; gap: 1em; }
.logo { width: 90px; height: 90px; background-size: contain; background-position: center; background-repeat: no-repeat; }
.logo img { max-width: 100%; max-height: 100%; }
.header-text-content { flex: 1; text-align: center; }
.header-text-content p { font-size: 0.7em; }
.accordion-title { border-bottom: 1px solid #ccd0d5; }
.plan-footer img { width: 100%; }
";

fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(bytes))
}

fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

/// Range of the element content holding the first `<strong>` at or after
/// `from` that names `label`
///
/// The enclosing `<li>` when there is one; otherwise from the `<strong>` to
/// the next line break.
fn field_range(html: &str, label: &str, mut from: usize) -> Option<Range<usize>> {
    while let Some(offset) = html[from..].find("<strong>") {
        let start = from + offset;
        let close = html[start..].find("</strong>").map(|c| start + c)?;
        if html[start..close].contains(label) {
            return Some(enclosing_item(html, start).unwrap_or_else(|| {
                let end = html[close..].find("<br>").map_or(html.len(), |b| close + b);
                start..end
            }));
        }
        from = close;
    }
    None
}

fn enclosing_item(html: &str, pos: usize) -> Option<Range<usize>> {
    let open = html[..pos].rfind("<li")?;
    let content_start = open + html[open..].find('>')? + 1;
    if html[content_start..pos].contains("</li>") {
        return None;
    }
    let end = html[pos..].find("</li>").map(|e| pos + e)?;
    // A nested list inside the item ends the field
    let end = html[pos..end].find("<ul>").map_or(end, |n| pos + n);
    Some(content_start..end)
}

/// Field values in place for the duration of one export
///
/// Dropping the guard puts the original content back.
pub struct FieldSubstitution<'a> {
    document: &'a mut PrintDocument,
    saved_sections: Vec<(usize, String)>,
    saved_footer: Option<String>,
}

impl<'a> FieldSubstitution<'a> {
    pub fn apply(document: &'a mut PrintDocument, details: &ExportDetails) -> Self {
        let mut guard = Self {
            document,
            saved_sections: Vec::new(),
            saved_footer: None,
        };
        guard.substitute(TEACHER_FIELD, &details.teacher);
        guard.substitute(SCHOOL_FIELD, &details.school);
        guard
    }

    /// Fill every occurrence of the field, in every section
    fn substitute(&mut self, label: &str, value: &str) {
        let replacement = format!("<strong>{}:</strong> {}", label, escape_html(value));
        let mut count = 0;
        for idx in 0..self.document.sections.len() {
            let mut html = self.document.sections[idx].html.clone();
            let mut from = 0;
            while let Some(range) = field_range(&html, label, from) {
                from = range.start + replacement.len();
                html.replace_range(range, &replacement);
                count += 1;
            }
            if html == self.document.sections[idx].html {
                continue;
            }
            let original = std::mem::replace(&mut self.document.sections[idx].html, html);
            if !self.saved_sections.iter().any(|(i, _)| *i == idx) {
                self.saved_sections.push((idx, original));
            }
        }
        debug!(%label, %count, "FieldSubstitution::substitute: fields filled");
    }

    /// Point the footer at a different source until the guard drops
    pub fn set_footer_image(&mut self, src: String) {
        let original = std::mem::replace(&mut self.document.footer_image, src);
        self.saved_footer.get_or_insert(original);
    }

    pub fn document(&self) -> &PrintDocument {
        self.document
    }
}

impl Drop for FieldSubstitution<'_> {
    fn drop(&mut self) {
        for (idx, html) in self.saved_sections.drain(..) {
            if let Some(section) = self.document.sections.get_mut(idx) {
                section.html = html;
            }
        }
        if let Some(footer) = self.saved_footer.take() {
            self.document.footer_image = footer;
        }
        debug!("FieldSubstitution::drop: document restored");
    }
}

/// Fetches remote images so they can be inlined
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Image bytes and their MIME type
    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, String), ExportError>;
}

/// `ImageFetcher` going through a raw-content proxy
pub struct ProxyImageFetcher {
    http: Client,
    proxy_url: String,
}

impl ProxyImageFetcher {
    pub fn new(proxy_url: impl Into<String>) -> Result<Self, ExportError> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ExportError::Fetch(e.to_string()))?;
        Ok(Self {
            http,
            proxy_url: proxy_url.into(),
        })
    }
}

#[async_trait]
impl ImageFetcher for ProxyImageFetcher {
    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, String), ExportError> {
        let request_url = reqwest::Url::parse_with_params(&self.proxy_url, &[("url", url)])
            .map_err(|e| ExportError::Fetch(e.to_string()))?;
        debug!(%request_url, "ProxyImageFetcher::fetch: called");
        let response = self
            .http
            .get(request_url)
            .send()
            .await
            .map_err(|e| ExportError::Fetch(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::Fetch(format!("Proxy fetch failed with status: {}", status)));
        }
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response.bytes().await.map_err(|e| ExportError::Fetch(e.to_string()))?;
        Ok((bytes.to_vec(), mime))
    }
}

/// Where the finished page goes
#[async_trait]
pub trait ExportSink: Send + Sync {
    async fn write(&self, html: &str, options: &ExportOptions) -> Result<PathBuf, ExportError>;
}

/// Writes the page as an `.html` file beside the PDF name, ready to print
#[derive(Debug, Clone)]
pub struct HtmlFileSink {
    dir: PathBuf,
}

impl HtmlFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ExportSink for HtmlFileSink {
    async fn write(&self, html: &str, options: &ExportOptions) -> Result<PathBuf, ExportError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = Path::new(&options.filename).with_extension("html");
        let path = self.dir.join(name);
        tokio::fs::write(&path, html).await?;
        Ok(path)
    }
}

/// Printable document for a plan with the configured right logo embedded
pub fn prepare_document(
    config: &ExportConfig,
    proposal_name: &str,
    document: &PlanDocument,
    render_options: &RenderOptions,
) -> Result<PrintDocument, ExportError> {
    let mut print = PrintDocument::new(config, proposal_name, document, render_options);
    if let Some(logo) = &config.right_logo {
        print.set_right_logo_file(logo)?;
    }
    Ok(print)
}

/// Produce one printable file
///
/// The footer image is inlined first when a fetcher is given; a failed fetch
/// keeps the original reference.
pub async fn export_plan(
    document: &mut PrintDocument,
    details: &ExportDetails,
    options: &ExportOptions,
    fetcher: Option<&dyn ImageFetcher>,
    sink: &dyn ExportSink,
) -> Result<PathBuf, ExportError> {
    debug!(filename = %options.filename, "export_plan: called");
    let mut guard = FieldSubstitution::apply(document, details);

    if let Some(fetcher) = fetcher {
        let footer = guard.document().footer_image.clone();
        match fetcher.fetch(&footer).await {
            Ok((bytes, mime)) => guard.set_footer_image(data_url(&mime, &bytes)),
            Err(e) => warn!(error = %e, "Could not inline footer image; keeping the original reference"),
        }
    }

    let html = guard.document().to_html(options);
    let path = sink.write(&html, options).await?;
    info!(path = %path.display(), "Exported plan");
    Ok(path)
}
