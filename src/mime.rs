//! MIME types and markup markers recognized by the capture pipeline

pub const TEXT_HTML: &str = "text/html";
pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_MARKDOWN: &str = "text/markdown";
pub const IMAGE_PNG: &str = "image/png";

/// Multi-part output: a MIME-keyed map, possibly JSON-encoded as a string.
pub const MIMEBUNDLE_TYPE: &str = "application/vnd.marimo+mimebundle";

/// Chart-grammar (Vega / Vega-Lite) specification types.
pub const VEGA_MIME_TYPES: [&str; 4] = [
    "application/vnd.vegalite.v5+json",
    "application/vnd.vega.v5+json",
    "application/vnd.vegalite.v6+json",
    "application/vnd.vega.v6+json",
];

pub const TEXT_MIME_TYPES: [&str; 3] = [TEXT_HTML, TEXT_PLAIN, TEXT_MARKDOWN];

/// Embedded component markup, plain and HTML-entity-escaped.
pub const COMPONENT_MARKERS: [&str; 2] = ["<marimo-", "&lt;marimo-"];

/// Widget components whose state lives in the kernel.
pub const WIDGET_MARKERS: [&str; 2] = ["<marimo-anywidget", "&lt;marimo-anywidget"];

/// Chart specs embedded in textual output are recognized by their MIME type string.
pub const EMBEDDED_VEGA_MARKERS: [&str; 4] = VEGA_MIME_TYPES;

pub fn is_vega(mimetype: &str) -> bool {
    VEGA_MIME_TYPES.contains(&mimetype)
}

pub fn is_text(mimetype: &str) -> bool {
    TEXT_MIME_TYPES.contains(&mimetype)
}

/// Representations dropped from a notebook output once a PNG fallback replaces them.
pub fn is_replaced_by_png(mimetype: &str) -> bool {
    is_text(mimetype) || is_vega(mimetype)
}
