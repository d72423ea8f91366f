//! Export requests and the HTML exporter seam
//!
//! Rendering a session view to HTML is done by an external exporter; static
//! capture only needs it behind [`HtmlExporter`].

use crate::session::SessionView;
use crate::{RasterOptions, Result};
use serde::{Deserialize, Serialize};

/// Display settings forwarded to the exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// "light", "dark", or "system"
    pub theme: String,
    /// "compact", "medium", "full", or "columns"
    pub default_width: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            default_width: "medium".to_string(),
        }
    }
}

/// Options for an HTML export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportAsHtmlRequest {
    pub download: bool,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub include_code: bool,
    /// Base URL that relative asset paths resolve against
    #[serde(default)]
    pub asset_url: Option<String>,
}

impl ExportAsHtmlRequest {
    /// The request used for static capture: inline document, code included,
    /// assets served from `asset_url`.
    pub fn for_capture(asset_url: &str) -> Self {
        Self {
            download: false,
            files: Vec::new(),
            include_code: true,
            asset_url: Some(asset_url.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfPreset {
    #[default]
    Document,
    Slides,
}

/// A PDF export request, as posted by the frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportAsPdfRequest {
    pub webpdf: bool,
    #[serde(default)]
    pub preset: PdfPreset,
    #[serde(default)]
    pub include_inputs: bool,
    #[serde(default = "default_true")]
    pub rasterize_outputs: bool,
    #[serde(default = "default_raster_scale")]
    pub raster_scale: f64,
    #[serde(default = "default_raster_server")]
    pub raster_server: String,
}

fn default_true() -> bool {
    true
}

fn default_raster_scale() -> f64 {
    4.0
}

fn default_raster_server() -> String {
    "static".to_string()
}

impl From<&ExportAsPdfRequest> for RasterOptions {
    fn from(request: &ExportAsPdfRequest) -> Self {
        RasterOptions {
            enabled: request.rasterize_outputs,
            scale: request.raster_scale,
            server_mode: request.raster_server.clone(),
        }
    }
}

/// Renders a session view to a standalone HTML document.
pub trait HtmlExporter {
    fn export_as_html(
        &self,
        filename: Option<&str>,
        session_view: &SessionView,
        display: &DisplayConfig,
        request: &ExportAsHtmlRequest,
    ) -> Result<String>;
}

/// Serves an already-rendered document, pointing its relative assets at the
/// request's asset URL through a `<base>` element.
#[derive(Debug, Clone)]
pub struct PrerenderedHtmlExporter {
    html: String,
}

impl PrerenderedHtmlExporter {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }
}

impl HtmlExporter for PrerenderedHtmlExporter {
    fn export_as_html(
        &self,
        _filename: Option<&str>,
        _session_view: &SessionView,
        _display: &DisplayConfig,
        request: &ExportAsHtmlRequest,
    ) -> Result<String> {
        match request.asset_url.as_deref() {
            Some(asset_url) => Ok(insert_base_href(&self.html, asset_url)),
            None => Ok(self.html.clone()),
        }
    }
}

fn insert_base_href(html: &str, asset_url: &str) -> String {
    let base = format!(
        "<base href=\"{}/\">",
        asset_url.trim_end_matches('/').replace('"', "&quot;")
    );
    let lower = html.to_ascii_lowercase();
    let insert_at = lower
        .find("<head")
        .and_then(|start| lower[start..].find('>').map(|end| start + end + 1));

    match insert_at {
        Some(at) => format!("{}{}{}", &html[..at], base, &html[at..]),
        None => format!("{}{}", base, html),
    }
}
