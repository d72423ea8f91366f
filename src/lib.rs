//! nbraster
//!
//! PNG fallback capture for notebook PDF export. Interactive widgets, chart
//! grammars, and raw component markup cannot be embedded in a PDF as-is; this
//! crate finds those outputs, renders them in a real browser, and returns a
//! `cell id -> data:image/png;base64,...` map that an exporter injects into the
//! notebook before PDF generation.
//!
//! # Pipeline
//!
//! - **Classification** ([`targets`]): scan executed outputs, decide which cells
//!   need capturing and what dynamic behavior to expect from them
//! - **Normalization** ([`normalize`]): promote escaped component markup to HTML on
//!   a copy of the session view
//! - **Servers**: an in-process static asset server ([`asset_server`]) or an
//!   out-of-process live notebook server ([`live_server`])
//! - **Capture** ([`capture`]): drive a headless browser through a readiness
//!   protocol and screenshot each output node
//! - **Coordination** ([`pipeline`]): mode selection, dispatch, result merging
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cdp")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use nbraster::export::PrerenderedHtmlExporter;
//! use nbraster::{PngFallbackCollector, RasterOptions, SessionView};
//! use std::sync::Arc;
//!
//! let view: SessionView = serde_json::from_str(&std::fs::read_to_string("session.json")?)?;
//! let collector = PngFallbackCollector::new(
//!     Arc::new(PrerenderedHtmlExporter::new(std::fs::read_to_string("page.html")?)),
//!     Arc::new(nbraster::cdp::CdpBrowser::default()),
//!     "frontend/dist",
//! );
//! let fallbacks = collector.collect(&view, None, None, &[], &RasterOptions::default())?;
//! println!("captured {} output(s)", fallbacks.len());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "cdp"))]
//! # fn main() {}
//! ```

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod asset_server;
pub mod capture;
pub mod export;
pub mod inject;
pub mod live_server;
pub mod mime;
pub mod normalize;
pub mod pipeline;
pub mod session;
pub mod targets;

// Chrome DevTools Protocol backend for the capture driver
#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly facade (worker thread + oneshot replies)
pub mod async_api;

pub use async_api::AsyncCollector;
pub use capture::{BrowserBackend, CapturePage, LoadState};
pub use pipeline::PngFallbackCollector;
pub use session::{CellId, SessionView};
pub use targets::{CaptureExpectation, RasterTarget};

/// Cell id -> `data:image/png;base64,...`.
///
/// Cells whose capture failed or timed out are simply absent.
pub type CaptureResult = HashMap<CellId, String>;

/// Where captured pages come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerMode {
    /// Re-exported HTML served from an in-process asset server. Targets that
    /// need a running notebook still go through a live server.
    #[default]
    Static,
    /// Every target is captured from a running notebook server.
    Live,
}

impl ServerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerMode::Static => "static",
            ServerMode::Live => "live",
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(ServerMode::Static),
            "live" => Ok(ServerMode::Live),
            other => Err(Error::ConfigError(format!("unknown raster server mode '{}'", other))),
        }
    }
}

/// Rasterization options, typically taken from a PDF export request.
///
/// # Examples
///
/// ```
/// let opts = nbraster::RasterOptions { scale: 0.5, ..Default::default() };
/// assert_eq!(opts.device_scale_factor(), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterOptions {
    pub enabled: bool,
    /// Screenshot supersampling factor (device pixel ratio)
    pub scale: f64,
    /// "static" or "live"; anything else is treated as "static"
    pub server_mode: String,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            scale: 4.0,
            server_mode: ServerMode::Static.as_str().to_string(),
        }
    }
}

impl RasterOptions {
    /// Scale clamped to at least 1.0.
    pub fn device_scale_factor(&self) -> f64 {
        self.scale.max(1.0)
    }

    /// Parsed server mode; unknown values fall back to static with a warning.
    pub fn resolved_server_mode(&self) -> ServerMode {
        self.server_mode.parse().unwrap_or_else(|_| {
            warn!(
                "Unknown raster server mode '{}'; defaulting to static.",
                self.server_mode
            );
            ServerMode::Static
        })
    }
}

/// Browser viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1440,
            height: 1000,
        }
    }
}

/// Bounds for the capture driver's waits.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub viewport: Viewport,
    /// Page readiness, target visibility, and screenshot bound
    pub readiness_timeout: Duration,
    /// Best-effort network-idle bound
    pub network_idle_timeout: Duration,
    /// Per load-state bound while settling dynamic targets
    pub navigation_settle_timeout: Duration,
    /// Quiet period after dynamic targets settle
    pub dynamic_output_extra_wait: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            readiness_timeout: Duration::from_secs(90),
            network_idle_timeout: Duration::from_secs(10),
            navigation_settle_timeout: Duration::from_secs(30),
            dynamic_output_extra_wait: Duration::from_secs(10),
        }
    }
}
