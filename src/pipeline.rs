//! Top-level PNG fallback collection
//!
//! Classifies outputs, picks where each target is captured from, runs the
//! capture phases, and merges their results. Each phase owns its server for
//! exactly the duration of the phase; servers are released on every exit path
//! because they shut down on drop.

use crate::asset_server::{HtmlAssetServer, DEFAULT_RASTER_ROUTE};
use crate::capture::{capture_pngs_from_page, BrowserBackend};
use crate::export::{DisplayConfig, ExportAsHtmlRequest, HtmlExporter};
use crate::live_server::{LiveNotebookServer, LiveServerConfig};
use crate::normalize::promote_component_markup_for_capture;
use crate::session::SessionView;
use crate::targets::{collect_raster_targets, sort_targets_by_notebook_order, RasterTarget};
use crate::{CaptureConfig, CaptureResult, RasterOptions, Result, ServerMode};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;

/// Targets split by the server they are captured from, each in notebook order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturePlan {
    pub static_targets: Vec<RasterTarget>,
    pub live_targets: Vec<RasterTarget>,
}

/// Assign targets to capture phases.
///
/// Live mode sends everything to the live server. Static mode captures from the
/// re-exported document except targets whose component markup needs a running
/// notebook to initialize.
pub fn plan_capture(targets: Vec<RasterTarget>, mode: ServerMode) -> CapturePlan {
    match mode {
        ServerMode::Live => CapturePlan {
            static_targets: Vec::new(),
            live_targets: targets,
        },
        ServerMode::Static => {
            let (live_targets, static_targets) = targets.into_iter().partition(|t| t.requires_live);
            CapturePlan {
                static_targets,
                live_targets,
            }
        }
    }
}

/// Collects per-cell PNG fallbacks ahead of PDF export.
pub struct PngFallbackCollector {
    exporter: Arc<dyn HtmlExporter + Send + Sync>,
    backend: Arc<dyn BrowserBackend + Send + Sync>,
    static_dir: PathBuf,
    display: DisplayConfig,
    capture: CaptureConfig,
    live: LiveServerConfig,
}

impl PngFallbackCollector {
    /// `static_dir` holds the frontend assets the exported document references.
    pub fn new(
        exporter: Arc<dyn HtmlExporter + Send + Sync>,
        backend: Arc<dyn BrowserBackend + Send + Sync>,
        static_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            exporter,
            backend,
            static_dir: static_dir.into(),
            display: DisplayConfig::default(),
            capture: CaptureConfig::default(),
            live: LiveServerConfig::default(),
        }
    }

    pub fn with_display_config(mut self, display: DisplayConfig) -> Self {
        self.display = display;
        self
    }

    pub fn with_capture_config(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_live_server_config(mut self, live: LiveServerConfig) -> Self {
        self.live = live;
        self
    }

    /// Capture PNG fallbacks for every eligible output in `session_view`.
    ///
    /// Returns an empty map when disabled or when nothing needs capturing.
    /// `session_view` is never modified.
    pub fn collect(
        &self,
        session_view: &SessionView,
        filename: Option<&str>,
        filepath: Option<&str>,
        argv: &[String],
        options: &RasterOptions,
    ) -> Result<CaptureResult> {
        if !options.enabled {
            debug!("Raster capture disabled by options.");
            return Ok(CaptureResult::new());
        }

        let targets = collect_raster_targets(session_view);
        if targets.is_empty() {
            debug!("Raster capture skipped: no eligible outputs found.");
            return Ok(CaptureResult::new());
        }
        let targets = sort_targets_by_notebook_order(session_view, targets);
        let total = targets.len();

        let server_mode = options.resolved_server_mode();
        debug!(
            "Raster capture planning: total={} server_mode={}",
            total, server_mode
        );
        info!(
            "Rasterizing {} component(s) for PDF [mode={}, scale={}].",
            total, server_mode, options.scale
        );

        let plan = plan_capture(targets, server_mode);
        let mut captures = CaptureResult::new();

        if !plan.static_targets.is_empty() {
            captures.extend(self.collect_static(session_view, filename, options, &plan.static_targets)?);
        }
        if !plan.live_targets.is_empty() {
            captures.extend(self.collect_live(filepath, argv, options, &plan.live_targets)?);
        }

        debug!(
            "Raster capture complete: {}/{} outputs captured.",
            captures.len(),
            total
        );
        Ok(captures)
    }

    /// Capture from the exported document served by a temporary asset server.
    fn collect_static(
        &self,
        session_view: &SessionView,
        filename: Option<&str>,
        options: &RasterOptions,
        targets: &[RasterTarget],
    ) -> Result<CaptureResult> {
        debug!(
            "Raster capture static phase: {} target(s), scale={}",
            targets.len(),
            options.scale
        );

        let server = HtmlAssetServer::start(&self.static_dir, DEFAULT_RASTER_ROUTE)?;
        let capture_view = promote_component_markup_for_capture(session_view, targets);
        let html = self.exporter.export_as_html(
            filename,
            &capture_view,
            &self.display,
            &ExportAsHtmlRequest::for_capture(&server.base_url()),
        )?;
        server.set_html(html);

        let captures = capture_pngs_from_page(
            self.backend.as_ref(),
            &self.capture,
            &server.page_url(),
            targets,
            options.scale,
        )?;
        debug!(
            "Raster capture static phase complete: {}/{} captured",
            captures.len(),
            targets.len()
        );
        Ok(captures)
    }

    /// Capture from a running notebook; needs the notebook's file on disk.
    fn collect_live(
        &self,
        filepath: Option<&str>,
        argv: &[String],
        options: &RasterOptions,
        targets: &[RasterTarget],
    ) -> Result<CaptureResult> {
        let Some(filepath) = filepath.filter(|p| !p.is_empty()) else {
            debug!("Raster capture live phase skipped: no filepath provided.");
            return Ok(CaptureResult::new());
        };

        debug!(
            "Raster capture live phase: {} target(s), scale={}",
            targets.len(),
            options.scale
        );
        let server = LiveNotebookServer::start(filepath, argv, self.live.clone())?;
        let captures = capture_pngs_from_page(
            self.backend.as_ref(),
            &self.capture,
            &server.page_url(),
            targets,
            options.scale,
        )?;
        debug!(
            "Raster capture live phase complete: {}/{} captured",
            captures.len(),
            targets.len()
        );
        Ok(captures)
    }
}
