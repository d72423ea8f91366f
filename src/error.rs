//! Error types for the capture pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing PNG fallbacks
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to start a browser, page, or server
    #[error("Initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load a page or the page never became ready
    #[error("Failed to load page: {0}")]
    LoadError(String),

    /// Failed to capture a screenshot
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Failed to evaluate JavaScript in the page
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// HTTP client failure
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The live notebook server exited early or never became healthy.
    /// `logs` holds the tail of the server's combined output.
    #[error("{message}{}", format_log_tail(.logs))]
    LiveServer { message: String, logs: String },

    /// The external HTML exporter failed
    #[error("Export failed: {0}")]
    ExportError(String),

    /// Malformed notebook or session JSON
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

fn format_log_tail(logs: &str) -> String {
    if logs.is_empty() {
        String::new()
    } else {
        format!("\n\n{}", logs)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidDocument(err.to_string())
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_server_error_appends_log_tail() {
        let err = Error::LiveServer {
            message: "Live notebook server exited before becoming ready.".into(),
            logs: "Traceback: boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "Live notebook server exited before becoming ready.\n\nTraceback: boom"
        );
    }

    #[test]
    fn live_server_error_without_logs() {
        let err = Error::LiveServer {
            message: "Timed out".into(),
            logs: String::new(),
        };
        assert_eq!(err.to_string(), "Timed out");
    }

    #[test]
    fn malformed_json_is_an_invalid_document() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, Error::InvalidDocument(_)));
    }
}
