//! Chrome DevTools Protocol backend for the capture driver
//!
//! Launches one headless Chrome per page (the page is the whole browser
//! context) through the `headless_chrome` crate. Load states that CDP does not
//! expose directly are polled from the page: `document.readyState` for
//! DOMContentLoaded/load, and a quiet resource-timing window for network idle.

use crate::capture::{BrowserBackend, CapturePage, LoadState};
use crate::{Error, Result, Viewport};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::{Browser, LaunchOptions};
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Network counts as idle after this long without a new resource entry.
const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);

const DISABLE_ANIMATIONS: &str = r#"() => {
  if (document.getElementById("__nbraster_no_animations")) return;
  const style = document.createElement("style");
  style.id = "__nbraster_no_animations";
  style.textContent = "*, *::before, *::after { animation: none !important; transition: none !important; caret-color: transparent !important; }";
  document.head.appendChild(style);
  document.getAnimations().forEach((a) => { try { a.finish(); } catch (e) { a.cancel(); } });
}"#;

/// Launches headless Chrome for each capture page.
#[derive(Debug, Clone)]
pub struct CdpBrowser {
    /// Chrome/Chromium executable; auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// The browser connection is dropped after this long without CDP events
    pub idle_timeout: Duration,
    pub sandbox: bool,
}

impl Default for CdpBrowser {
    fn default() -> Self {
        Self {
            chrome_path: None,
            idle_timeout: Duration::from_secs(300),
            sandbox: true,
        }
    }
}

impl BrowserBackend for CdpBrowser {
    fn open_page(&self, viewport: Viewport, device_scale_factor: f64) -> Result<Box<dyn CapturePage>> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(self.sandbox)
            .path(self.chrome_path.clone())
            .window_size(Some((viewport.width, viewport.height)))
            .idle_browser_timeout(self.idle_timeout)
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;
        tab.call_method(device_metrics_override(viewport, device_scale_factor)?)
            .map_err(|e| Error::InitializationError(format!("Failed to set device metrics: {}", e)))?;

        Ok(Box::new(CdpPage { browser, tab }))
    }
}

/// Pins the layout viewport and `devicePixelRatio`, so canvases render at the
/// supersampled resolution instead of being upscaled in the screenshot.
fn device_metrics_override(viewport: Viewport, device_scale_factor: f64) -> Result<Emulation::SetDeviceMetricsOverride> {
    // Built from JSON so optional fields added by newer protocol revisions stay unset.
    let params = serde_json::json!({
        "width": viewport.width,
        "height": viewport.height,
        "deviceScaleFactor": device_scale_factor,
        "mobile": false,
    });
    serde_json::from_value(params)
        .map_err(|e| Error::InitializationError(format!("Invalid device metrics: {}", e)))
}

/// A tab in a dedicated headless Chrome.
pub struct CdpPage {
    browser: Browser,
    tab: Arc<Tab>,
}

impl CdpPage {
    /// Call a function expression and return its JSON result.
    fn call(&self, function: &str) -> Result<Option<serde_json::Value>> {
        let result = self
            .tab
            .evaluate(&format!("({})()", function), true)
            .map_err(|e| Error::ScriptError(format!("Evaluation failed: {}", e)))?;
        Ok(result.value)
    }

    fn call_bool(&self, function: &str) -> Result<bool> {
        Ok(matches!(self.call(function)?, Some(serde_json::Value::Bool(true))))
    }

    fn ready_state_reached(&self, state: LoadState) -> Result<bool> {
        match state {
            LoadState::DomContentLoaded => self.call_bool("() => document.readyState !== 'loading'"),
            LoadState::Load | LoadState::NetworkIdle => {
                self.call_bool("() => document.readyState === 'complete'")
            }
        }
    }

    fn resource_count(&self) -> Result<u64> {
        Ok(self
            .call("() => performance.getEntriesByType('resource').length")?
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }

    fn wait_for_network_idle(&self, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        let mut last_count = None;
        let mut quiet_since = Instant::now();

        while start.elapsed() < timeout {
            if self.ready_state_reached(LoadState::Load)? {
                let count = self.resource_count()?;
                if last_count != Some(count) {
                    last_count = Some(count);
                    quiet_since = Instant::now();
                } else if quiet_since.elapsed() >= NETWORK_QUIET_WINDOW {
                    return Ok(true);
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(false)
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
fn poll_until<F>(timeout: Duration, mut check: F) -> Result<bool>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();
    loop {
        if check()? {
            return Ok(true);
        }
        if start.elapsed() >= timeout {
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn element_script(selector: &str, body: &str) -> String {
    let selector = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "() => {{ const el = document.querySelector({}); if (!el) return false; {} }}",
        selector, body
    )
}

impl CapturePage for CdpPage {
    fn goto(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.tab.set_default_timeout(timeout);
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;
        if !poll_until(timeout, || self.ready_state_reached(LoadState::DomContentLoaded))? {
            return Err(Error::Timeout(timeout.as_millis() as u64));
        }
        Ok(())
    }

    fn wait_for_load_state(&mut self, state: LoadState, timeout: Duration) -> Result<bool> {
        match state {
            LoadState::NetworkIdle => self.wait_for_network_idle(timeout),
            _ => poll_until(timeout, || self.ready_state_reached(state)),
        }
    }

    fn wait_for_function(&mut self, predicate: &str, timeout: Duration) -> Result<bool> {
        let script = format!("() => Boolean(({})())", predicate);
        poll_until(timeout, || self.call_bool(&script))
    }

    fn evaluate(&mut self, script: &str) -> Result<()> {
        self.call(script).map(|_| ())
    }

    fn wait_for_visible(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        let script = element_script(
            selector,
            "const r = el.getBoundingClientRect(); \
             const s = getComputedStyle(el); \
             return r.width > 0 && r.height > 0 && s.visibility !== 'hidden';",
        );
        poll_until(timeout, || self.call_bool(&script))
    }

    fn scroll_into_view(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        let script = element_script(
            selector,
            "el.scrollIntoView({ block: 'center', inline: 'nearest' }); return true;",
        );
        poll_until(timeout, || self.call_bool(&script))
    }

    fn screenshot_element(&mut self, selector: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.call(DISABLE_ANIMATIONS)?;

        let element = match self.tab.wait_for_element_with_custom_timeout(selector, timeout) {
            Ok(element) => element,
            Err(e) => {
                debug!("Element {} not available for screenshot: {}", selector, e);
                return Ok(None);
            }
        };
        let mut clip = element
            .get_box_model()
            .map_err(|e| Error::RenderError(format!("Failed to measure {}: {}", selector, e)))?
            .border_viewport();
        // The emulated device scale factor already supersamples the capture.
        clip.scale = 1.0;

        let png = self
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
            .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))?;
        Ok(Some(png))
    }

    fn pause(&mut self, duration: Duration) {
        thread::sleep(duration);
    }

    fn close(self: Box<Self>) -> Result<()> {
        // Dropping the browser terminates the Chrome child process.
        let CdpPage { browser, tab, .. } = *self;
        let closed = tab.close(false);
        drop(tab);
        drop(browser);
        closed?;
        Ok(())
    }
}
