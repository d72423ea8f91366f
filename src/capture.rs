//! Browser-driven screenshot capture of notebook outputs
//!
//! The driver is agnostic to where the page came from (static re-export or live
//! notebook server). It opens one page, waits for the notebook root to render,
//! then walks the targets strictly in order: wait for the output node, let it
//! settle, screenshot exactly that node. A target that times out is dropped from
//! the result; it never aborts the batch. Only page-level readiness is fatal.

use crate::targets::RasterTarget;
use crate::{CaptureConfig, CaptureResult, Error, Result, Viewport};
use base64::Engine as Base64Engine;
use log::{debug, info, warn};
use std::time::Duration;

/// Resolves once the notebook root element has rendered children.
pub const WAIT_FOR_PAGE_READY: &str = r#"() => {
  const root = document.getElementById("root");
  if (!root) return false;
  return root.childElementCount > 0;
}"#;

/// Advances a slide deck by one slide when the page renders as slides.
pub const GO_TO_NEXT_SLIDE: &str = r#"() => {
  const swiper = document.querySelector('.swiper')?.swiper;
  if (swiper) {
    swiper.slideNext();
  }
}"#;

/// Resolves after two animation frames, i.e. once pending layout has painted.
pub const WAIT_FOR_NEXT_PAINT: &str = r#"() => new Promise((resolve) => {
  requestAnimationFrame(() => requestAnimationFrame(resolve));
})"#;

/// Document load milestones a page can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    DomContentLoaded,
    Load,
    NetworkIdle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::Load => "load",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

/// A single browser page, as much of it as capture needs.
///
/// Waits return `Ok(false)` when their bound elapses; callers decide whether
/// that is fatal. `Err` is reserved for failures of the browser itself.
pub trait CapturePage {
    /// Navigate and wait for `DOMContentLoaded`.
    fn goto(&mut self, url: &str, timeout: Duration) -> Result<()>;

    fn wait_for_load_state(&mut self, state: LoadState, timeout: Duration) -> Result<bool>;

    /// Poll a JavaScript predicate (a function expression) until it returns truthy.
    fn wait_for_function(&mut self, predicate: &str, timeout: Duration) -> Result<bool>;

    /// Call a JavaScript function expression, awaiting it if it returns a promise.
    fn evaluate(&mut self, script: &str) -> Result<()>;

    fn wait_for_visible(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    fn scroll_into_view(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    /// PNG of the first node matching `selector`, with animations disabled.
    /// `Ok(None)` when the node could not be captured in time.
    fn screenshot_element(&mut self, selector: &str, timeout: Duration) -> Result<Option<Vec<u8>>>;

    fn pause(&mut self, duration: Duration);

    /// Close the page together with its context and browser.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Launches browsers and opens pages at a fixed viewport and device scale factor.
pub trait BrowserBackend {
    fn open_page(&self, viewport: Viewport, device_scale_factor: f64) -> Result<Box<dyn CapturePage>>;
}

/// Selector for the concrete node beneath a cell's output container.
///
/// The container itself may be `display: contents` and have no box to capture.
pub fn output_selector(cell_id: &str) -> String {
    format!("#output-{} > .output", css_escape(cell_id))
}

/// Escape a string for use inside a CSS identifier (after a fixed prefix).
fn css_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() {
            out.push(c);
        } else if c.is_ascii_control() {
            out.push_str(&format!("\\{:x} ", c as u32));
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

pub fn to_data_url(image: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(image);
    format!("data:image/png;base64,{}", encoded)
}

/// Screenshot every target on `page_url`, in order.
///
/// The page is always closed before returning, whatever the outcome.
pub fn capture_pngs_from_page(
    backend: &dyn BrowserBackend,
    config: &CaptureConfig,
    page_url: &str,
    targets: &[RasterTarget],
    scale: f64,
) -> Result<CaptureResult> {
    let device_scale_factor = scale.max(1.0);
    debug!(
        "Raster page capture start: url={} targets={} scale={}",
        page_url,
        targets.len(),
        scale
    );

    let mut page = backend.open_page(config.viewport, device_scale_factor)?;
    let outcome = drive_page(page.as_mut(), config, page_url, targets);
    if let Err(e) = page.close() {
        warn!("Failed to close capture browser: {}", e);
    }
    let captures = outcome?;

    debug!(
        "Raster page capture complete: {}/{} captured",
        captures.len(),
        targets.len()
    );
    info!(
        "Rasterization complete: captured {}/{} component(s).",
        captures.len(),
        targets.len()
    );
    Ok(captures)
}

fn drive_page(
    page: &mut dyn CapturePage,
    config: &CaptureConfig,
    page_url: &str,
    targets: &[RasterTarget],
) -> Result<CaptureResult> {
    page.goto(page_url, config.readiness_timeout)?;
    debug!("Page loaded, waiting for readiness...");

    wait_for_network_idle(page, config.network_idle_timeout)?;
    if !page.wait_for_function(WAIT_FOR_PAGE_READY, config.readiness_timeout)? {
        return Err(Error::LoadError(format!(
            "{} did not render the notebook within {}ms",
            page_url,
            config.readiness_timeout.as_millis()
        )));
    }
    debug!("Page ready, waiting for final network idle...");
    wait_for_network_idle(page, config.network_idle_timeout)?;

    let mut captures = CaptureResult::new();
    for (index, target) in targets.iter().enumerate() {
        info!(
            "Rasterizing [{}/{}] cell={} ({})",
            index + 1,
            targets.len(),
            target.cell_id,
            target.describe_expects()
        );

        match capture_target(page, config, target) {
            Ok(Some(image)) => {
                captures.insert(target.cell_id.clone(), to_data_url(&image));
                debug!("Raster target captured: cell_id={}", target.cell_id);
            }
            Ok(None) => debug!("Raster target skipped: cell_id={}", target.cell_id),
            Err(e) => warn!("Raster target {} failed: {}", target.cell_id, e),
        }
    }
    Ok(captures)
}

fn capture_target(page: &mut dyn CapturePage, config: &CaptureConfig, target: &RasterTarget) -> Result<Option<Vec<u8>>> {
    let selector = output_selector(&target.cell_id);

    if !wait_for_target_ready(page, config, target, &selector)? {
        debug!(
            "Raster target {} timed out while waiting for visibility/readiness.",
            target.cell_id
        );
        return Ok(None);
    }

    page.evaluate(GO_TO_NEXT_SLIDE)?;
    page.evaluate(WAIT_FOR_NEXT_PAINT)?;
    let image = page.screenshot_element(&selector, config.readiness_timeout)?;
    if image.is_none() {
        debug!("Raster screenshot timed out: cell_id={}", target.cell_id);
    }
    Ok(image)
}

/// Wait for a target's node to become visible and then stabilize.
///
/// Targets with expectations (widgets, charts) additionally get the full
/// load-state sequence and a quiet period, since they render asynchronously.
pub fn wait_for_target_ready(
    page: &mut dyn CapturePage,
    config: &CaptureConfig,
    target: &RasterTarget,
    selector: &str,
) -> Result<bool> {
    if !page.wait_for_visible(selector, config.readiness_timeout)? {
        return Ok(false);
    }
    if !page.scroll_into_view(selector, config.readiness_timeout)? {
        return Ok(false);
    }
    page.evaluate(WAIT_FOR_NEXT_PAINT)?;
    wait_for_network_idle(page, config.network_idle_timeout)?;

    if !target.is_generic() {
        wait_for_navigation_settled(page, config)?;
    }

    wait_for_network_idle(page, config.network_idle_timeout)?;
    page.evaluate(WAIT_FOR_NEXT_PAINT)?;
    Ok(true)
}

/// Best effort: a network that never goes idle is not an error.
fn wait_for_network_idle(page: &mut dyn CapturePage, timeout: Duration) -> Result<()> {
    if !page.wait_for_load_state(LoadState::NetworkIdle, timeout)? {
        debug!("Network did not go idle within {}ms", timeout.as_millis());
    }
    Ok(())
}

fn wait_for_navigation_settled(page: &mut dyn CapturePage, config: &CaptureConfig) -> Result<()> {
    for state in [LoadState::DomContentLoaded, LoadState::Load, LoadState::NetworkIdle] {
        if !page.wait_for_load_state(state, config.navigation_settle_timeout)? {
            debug!("Load state {} not reached; continuing", state.as_str());
        }
    }
    page.pause(config.dynamic_output_extra_wait);
    Ok(())
}
