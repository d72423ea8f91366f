//! Ephemeral loopback HTTP server for static capture
//!
//! Serves a static asset directory plus one dynamic route whose HTML is published
//! *after* the server starts, because the exported document embeds the server's
//! own base URL for asset resolution. Dropping the server always stops the serving
//! thread.

use crate::{Error, Result};
use log::{debug, warn};
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Route the exported document is published under during static capture.
pub const DEFAULT_RASTER_ROUTE: &str = "/__marimo_pdf_raster__.html";

struct Shared {
    directory: PathBuf,
    route: String,
    html: Mutex<String>,
}

/// Single-route asset server bound to an auto-assigned loopback port.
pub struct HtmlAssetServer {
    shared: Arc<Shared>,
    server: Arc<Server>,
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    done_rx: Mutex<Receiver<()>>,
}

impl HtmlAssetServer {
    /// Bind to `127.0.0.1:0` and start serving `directory` in the background.
    pub fn start(directory: impl Into<PathBuf>, route: &str) -> Result<Self> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(Error::InitializationError(format!(
                "Static assets not found at {}",
                directory.display()
            )));
        }

        let server = Server::http("127.0.0.1:0")
            .map_err(|e| Error::InitializationError(format!("Failed to bind asset server: {}", e)))?;
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| Error::InitializationError("Asset server is not bound to an IP address".into()))?;

        let route = if route.starts_with('/') {
            route.to_string()
        } else {
            format!("/{}", route)
        };

        let shared = Arc::new(Shared {
            directory,
            route,
            html: Mutex::new(String::new()),
        });
        let server = Arc::new(server);
        let shutdown = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();

        let worker = {
            let shared = shared.clone();
            let server = server.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("html-asset-server".into())
                .spawn(move || {
                    serve(&server, &shared, &shutdown);
                    let _ = done_tx.send(());
                })
                .map_err(|e| Error::InitializationError(format!("Failed to spawn asset server thread: {}", e)))?
        };

        debug!("HTML asset server listening on http://{}", addr);

        Ok(Self {
            shared,
            server,
            addr,
            shutdown,
            worker: Some(worker),
            done_rx: Mutex::new(done_rx),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn page_url(&self) -> String {
        format!("{}{}", self.base_url(), self.shared.route)
    }

    /// Publish the document served at the dynamic route.
    pub fn set_html(&self, html: impl Into<String>) {
        let html = html.into();
        let mut guard = self.shared.html.lock().unwrap_or_else(|p| p.into_inner());
        *guard = html;
    }
}

impl Drop for HtmlAssetServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.server.unblock();

        let Some(worker) = self.worker.take() else {
            return;
        };
        match self.done_rx.get_mut().unwrap_or_else(|p| p.into_inner()).recv_timeout(JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("HTML asset server thread did not stop within {:?}", JOIN_TIMEOUT);
            }
        }
    }
}

fn serve(server: &Server, shared: &Shared, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => handle(request, shared),
            Ok(None) => continue,
            Err(e) => {
                if !shutdown.load(Ordering::SeqCst) {
                    debug!("HTML asset server stopped receiving: {}", e);
                }
                break;
            }
        }
    }
}

fn handle(request: Request, shared: &Shared) {
    let url = request.url().to_string();
    let route = url.split('?').next().unwrap_or("");

    let result = if route == shared.route {
        let html = shared
            .html
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let response = with_header(Response::from_data(html.into_bytes()), "Content-Type", "text/html; charset=utf-8");
        request.respond(with_header(response, "Cache-Control", "no-store"))
    } else {
        match resolve_static_path(&shared.directory, route).and_then(|p| std::fs::read(&p).ok().map(|b| (p, b))) {
            Some((path, bytes)) => {
                let mime = mime_guess::from_path(&path).first_or_octet_stream();
                request.respond(with_header(Response::from_data(bytes), "Content-Type", mime.as_ref()))
            }
            None => request.respond(Response::from_string("Not Found").with_status_code(404)),
        }
    };

    if let Err(e) = result {
        debug!("Failed to respond to {}: {}", url, e);
    }
}

fn with_header<R: Read>(response: Response<R>, name: &str, value: &str) -> Response<R> {
    match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
        Ok(h) => response.with_header(h),
        Err(()) => response,
    }
}

/// Map a request path onto a file under `directory`, refusing anything that
/// would escape it. Directory paths resolve to their `index.html`.
fn resolve_static_path(directory: &Path, route: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(route).ok()?;
    let relative = Path::new(decoded.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }

    let mut path = directory.join(relative);
    if path.is_dir() {
        path.push("index.html");
    }
    path.is_file().then_some(path)
}
