//! Temporary headless notebook server for live output capture
//!
//! Some outputs (kernel-backed widgets, components that complete a handshake with
//! the runtime on mount) only render correctly against a running notebook. This
//! module launches the notebook application as a subprocess on a free loopback
//! port, gates on its `/health` endpoint, and tears it down on drop.

use crate::{Error, Result};
use log::{debug, warn};
use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// How the notebook application is launched and supervised.
#[derive(Debug, Clone)]
pub struct LiveServerConfig {
    /// Executable that runs the notebook application
    pub program: String,
    /// Arguments placed before the notebook path (e.g. the `run` subcommand)
    pub program_args: Vec<String>,
    /// Loopback interface to bind
    pub host: String,
    /// First port probed when searching for a free one
    pub start_port: u16,
    /// Use exactly this port instead of searching
    pub port: Option<u16>,
    /// Give up if `/health` is not OK within this long
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    /// Grace period after SIGTERM (and again after SIGKILL)
    pub shutdown_timeout: Duration,
    /// Characters of server output attached to startup errors
    pub log_tail_chars: usize,
}

impl Default for LiveServerConfig {
    fn default() -> Self {
        Self {
            program: "marimo".to_string(),
            program_args: vec!["run".to_string()],
            host: "127.0.0.1".to_string(),
            start_port: 2719,
            port: None,
            startup_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(5),
            log_tail_chars: 4_000,
        }
    }
}

/// A running notebook server. Dropping it terminates the process and removes
/// its log file.
pub struct LiveNotebookServer {
    config: LiveServerConfig,
    port: u16,
    process: Option<Child>,
    log_file: Option<NamedTempFile>,
    http: reqwest::blocking::Client,
}

impl LiveNotebookServer {
    /// Spawn the server for `filepath` and block until it reports healthy.
    ///
    /// Fails if the process exits first or the startup timeout elapses; the error
    /// carries the tail of the server's output.
    pub fn start(filepath: &str, argv: &[String], config: LiveServerConfig) -> Result<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port(config.start_port, &config.host)?,
        };
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .map_err(|e| Error::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        let mut server = Self {
            config,
            port,
            process: None,
            log_file: None,
            http,
        };

        let log_file = NamedTempFile::new()?;
        let stdout = log_file.as_file().try_clone()?;
        let stderr = log_file.as_file().try_clone()?;
        server.log_file = Some(log_file);

        let args = server.build_args(filepath, argv);
        debug!("Starting live notebook server: {} {}", server.config.program, args.join(" "));

        let child = Command::new(&server.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| Error::LiveServer {
                message: format!("Failed to launch live notebook server `{}`: {}", server.config.program, e),
                logs: String::new(),
            })?;
        server.process = Some(child);

        server.wait_until_ready()?;
        debug!("Live notebook server ready at {}", server.page_url());
        Ok(server)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn page_url(&self) -> String {
        format!("http://{}:{}", self.config.host, self.port)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.page_url())
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_file.as_ref().map(|f| f.path())
    }

    fn build_args(&self, filepath: &str, argv: &[String]) -> Vec<String> {
        let mut args = self.config.program_args.clone();
        args.push(filepath.to_string());
        args.extend(
            [
                "--headless",
                "--no-token",
                "--no-skew-protection",
                "--no-check",
                "--host",
            ]
            .map(String::from),
        );
        args.push(self.config.host.clone());
        args.push("--port".to_string());
        args.push(self.port.to_string());
        if !argv.is_empty() {
            args.push("--".to_string());
            args.extend(argv.iter().cloned());
        }
        args
    }

    fn wait_until_ready(&mut self) -> Result<()> {
        let start = Instant::now();
        let health_url = self.health_url();

        while start.elapsed() < self.config.startup_timeout {
            let exited = match self.process.as_mut() {
                Some(child) => child.try_wait()?.is_some(),
                None => {
                    return Err(Error::LiveServer {
                        message: "Live notebook server process is missing".into(),
                        logs: String::new(),
                    })
                }
            };
            if exited {
                return Err(Error::LiveServer {
                    message: "Live notebook server exited before becoming ready.".into(),
                    logs: self.read_logs(),
                });
            }

            match self.http.get(&health_url).send() {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => debug!("Health check returned {}", response.status()),
                Err(_) => {}
            }

            thread::sleep(self.config.poll_interval);
        }

        Err(Error::LiveServer {
            message: "Timed out waiting for live notebook server to become ready.".into(),
            logs: self.read_logs(),
        })
    }

    /// Recent server output, for startup error reporting.
    fn read_logs(&self) -> String {
        let Some(log_file) = self.log_file.as_ref() else {
            return String::new();
        };
        let bytes = std::fs::read(log_file.path()).unwrap_or_default();
        tail_chars(&String::from_utf8_lossy(&bytes), self.config.log_tail_chars)
    }
}

impl Drop for LiveNotebookServer {
    fn drop(&mut self) {
        if let Some(mut child) = self.process.take() {
            terminate_process(&mut child, self.config.shutdown_timeout);
        }
        if let Some(log_file) = self.log_file.take() {
            let path = log_file.path().to_path_buf();
            if let Err(e) = log_file.close() {
                warn!(
                    "Failed to clean up live capture server log file {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }
}

/// SIGTERM, wait, then SIGKILL and wait again.
fn terminate_process(child: &mut Child, timeout: Duration) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }

    send_terminate(child);
    if wait_with_timeout(child, timeout) {
        return;
    }

    debug!("Live notebook server ignored SIGTERM; killing pid {}", child.id());
    if let Err(e) = child.kill() {
        warn!("Failed to kill live notebook server: {}", e);
        return;
    }
    if !wait_with_timeout(child, timeout) {
        warn!("Live notebook server pid {} did not exit after kill", child.id());
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    // SAFETY: plain signal delivery to a pid we spawned and have not reaped.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        debug!("SIGTERM to pid {} failed: {}", child.id(), std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.kill();
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if start.elapsed() < timeout => thread::sleep(Duration::from_millis(50)),
            Ok(None) => return false,
            Err(e) => {
                debug!("Failed to poll live notebook server: {}", e);
                return false;
            }
        }
    }
}

/// First bindable port in `[start, start + 100)`, else an OS-assigned one.
pub fn find_free_port(start: u16, host: &str) -> Result<u16> {
    for port in start..start.saturating_add(100) {
        if TcpListener::bind((host, port)).is_ok() {
            return Ok(port);
        }
    }
    let listener = TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

fn tail_chars(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    text.chars().skip(count - limit).collect()
}
