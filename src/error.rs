use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    #[error("{0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("{0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Navigation timeout of {}s exceeded while waiting for network idle", .0.as_secs_f64())]
    NavigationTimeout(Duration),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Export failed: {0}")]
    Export(String),
}

/// Taxonomy class of a [`CaptureError`], used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Config,
    Filesystem,
    Launch,
    Navigation,
    Browser,
    Export,
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::Validation(_) => ErrorKind::Validation,
            CaptureError::Config(_) => ErrorKind::Config,
            CaptureError::Filesystem(_) => ErrorKind::Filesystem,
            CaptureError::Launch(_) => ErrorKind::Launch,
            CaptureError::Navigation(_) | CaptureError::NavigationTimeout(_) => {
                ErrorKind::Navigation
            }
            CaptureError::Browser(_) => ErrorKind::Browser,
            CaptureError::Export(_) => ErrorKind::Export,
        }
    }

    /// Every failure ends the invocation with the same status.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Filesystem(err.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::Config(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for CaptureError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        CaptureError::Browser(err.to_string())
    }
}
