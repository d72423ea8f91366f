//! Scripted browser backend shared by the integration tests

#![allow(dead_code)]

use nbraster::capture::output_selector;
use nbraster::{BrowserBackend, CapturePage, Error, LoadState, Result, Viewport};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the fake page does, keyed by cell id.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Cells whose output node never becomes visible
    pub invisible: HashSet<String>,
    /// Cells whose screenshot times out
    pub screenshot_timeout: HashSet<String>,
    /// Cells whose screenshot fails outright
    pub screenshot_error: HashSet<String>,
    /// The notebook root never renders
    pub never_ready: bool,
}

impl Script {
    pub fn invisible(mut self, cell_id: &str) -> Self {
        self.invisible.insert(output_selector(cell_id));
        self
    }

    pub fn screenshot_timeout(mut self, cell_id: &str) -> Self {
        self.screenshot_timeout.insert(output_selector(cell_id));
        self
    }

    pub fn screenshot_error(mut self, cell_id: &str) -> Self {
        self.screenshot_error.insert(output_selector(cell_id));
        self
    }
}

/// Everything the fake pages observed, in call order.
#[derive(Debug, Default)]
pub struct Journal {
    pub events: Vec<String>,
    pub opened: Vec<(Viewport, f64)>,
    pub visited: Vec<String>,
    pub closed: usize,
}

impl Journal {
    pub fn count(&self, prefix: &str) -> usize {
        self.events.iter().filter(|e| e.starts_with(prefix)).count()
    }
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    pub script: Script,
    pub journal: Arc<Mutex<Journal>>,
}

impl FakeBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            journal: Arc::default(),
        }
    }

    /// Payload the fake screenshot returns for a selector.
    pub fn png_for(selector: &str) -> Vec<u8> {
        format!("png:{}", selector).into_bytes()
    }
}

impl BrowserBackend for FakeBackend {
    fn open_page(&self, viewport: Viewport, device_scale_factor: f64) -> Result<Box<dyn CapturePage>> {
        self.journal.lock().unwrap().opened.push((viewport, device_scale_factor));
        Ok(Box::new(FakePage {
            script: self.script.clone(),
            journal: Arc::clone(&self.journal),
        }))
    }
}

struct FakePage {
    script: Script,
    journal: Arc<Mutex<Journal>>,
}

impl FakePage {
    fn log(&self, event: String) {
        self.journal.lock().unwrap().events.push(event);
    }
}

impl CapturePage for FakePage {
    fn goto(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        self.journal.lock().unwrap().visited.push(url.to_string());
        self.log(format!("goto {}", url));
        Ok(())
    }

    fn wait_for_load_state(&mut self, state: LoadState, _timeout: Duration) -> Result<bool> {
        self.log(format!("load_state {}", state.as_str()));
        // Networks in tests never go fully idle; the driver must tolerate that.
        Ok(state != LoadState::NetworkIdle)
    }

    fn wait_for_function(&mut self, _predicate: &str, _timeout: Duration) -> Result<bool> {
        self.log("wait_for_function".to_string());
        Ok(!self.script.never_ready)
    }

    fn evaluate(&mut self, script: &str) -> Result<()> {
        let kind = if script.contains("slideNext") {
            "next_slide"
        } else if script.contains("requestAnimationFrame") {
            "next_paint"
        } else {
            "script"
        };
        self.log(format!("evaluate {}", kind));
        Ok(())
    }

    fn wait_for_visible(&mut self, selector: &str, _timeout: Duration) -> Result<bool> {
        self.log(format!("visible {}", selector));
        Ok(!self.script.invisible.contains(selector))
    }

    fn scroll_into_view(&mut self, selector: &str, _timeout: Duration) -> Result<bool> {
        self.log(format!("scroll {}", selector));
        Ok(true)
    }

    fn screenshot_element(&mut self, selector: &str, _timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.log(format!("screenshot {}", selector));
        if self.script.screenshot_error.contains(selector) {
            return Err(Error::RenderError(format!("cannot capture {}", selector)));
        }
        if self.script.screenshot_timeout.contains(selector) {
            return Ok(None);
        }
        Ok(Some(FakeBackend::png_for(selector)))
    }

    fn pause(&mut self, duration: Duration) {
        self.log(format!("pause {}ms", duration.as_millis()));
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.journal.lock().unwrap().closed += 1;
        Ok(())
    }
}
