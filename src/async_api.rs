use crate::pipeline::PngFallbackCollector;
use crate::{CaptureResult, Error, RasterOptions, Result, SessionView};
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::oneshot;

/// Owned arguments for one [`PngFallbackCollector::collect`] call.
#[derive(Debug, Clone, Default)]
pub struct CollectRequest {
    pub session_view: SessionView,
    pub filename: Option<String>,
    pub filepath: Option<String>,
    pub argv: Vec<String>,
    pub options: RasterOptions,
}

enum Command {
    Collect(Box<CollectRequest>, oneshot::Sender<Result<CaptureResult>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly collector backed by a dedicated worker thread.
///
/// Capture blocks for as long as the browser waits on the page, so collection
/// runs on the worker thread and callers await the result without tying up an
/// async executor. Requests are served one at a time in submission order.
#[derive(Clone)]
pub struct AsyncCollector {
    cmd_tx: Sender<Command>,
}

impl AsyncCollector {
    /// Spawn the worker thread that owns `collector`.
    ///
    /// Commands queue in the channel until the worker picks them up, so the
    /// handle is usable as soon as the thread is spawned.
    pub async fn new(collector: PngFallbackCollector) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();

        thread::Builder::new()
            .name("nbraster-collector".to_string())
            .spawn(move || {
                while let Ok(cmd) = cmd_rx.recv() {
                    match cmd {
                        Command::Collect(request, resp) => {
                            let res = collector.collect(
                                &request.session_view,
                                request.filename.as_deref(),
                                request.filepath.as_deref(),
                                &request.argv,
                                &request.options,
                            );
                            let _ = resp.send(res);
                        }
                        Command::Close(resp) => {
                            let _ = resp.send(Ok(()));
                            break;
                        }
                    }
                }
            })?;

        Ok(Self { cmd_tx })
    }

    /// Collect PNG fallbacks on the worker thread.
    pub async fn collect(&self, request: CollectRequest) -> Result<CaptureResult> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Collect(Box::new(request), tx))
            .map_err(|_| Error::Other("Collector worker has shut down".to_string()))?;
        rx.await
            .map_err(|e| Error::Other(format!("Collect canceled: {}", e)))?
    }

    /// Shut down the worker once queued requests have been served.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Close(tx))
            .map_err(|_| Error::Other("Collector worker has shut down".to_string()))?;
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }
}
