//! Output path resolution
//!
//! An explicit `--output` is made absolute. Otherwise the file name is derived from the target
//! host and the capture time and placed in the configured capture directory.

use crate::{absolutize, file_timestamp, host_or_default, sanitize_host, CaptureError};
use crate::{CaptureFormat, CaptureRequest};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// `<sanitized host>-<timestamp>.<ext>` inside `capture_dir`.
pub fn default_output_path(
    url: &Url,
    format: CaptureFormat,
    capture_dir: &Path,
    now: DateTime<Utc>,
) -> PathBuf {
    let host = sanitize_host(&host_or_default(url));
    let file_name = format!("{}-{}.{}", host, file_timestamp(now), format.extension());
    capture_dir.join(file_name)
}

/// Absolute destination for `request`, resolving relative paths against `cwd`.
pub fn resolve_output_path(
    request: &CaptureRequest,
    capture_dir: &Path,
    cwd: &Path,
    now: DateTime<Utc>,
) -> PathBuf {
    let chosen = match &request.output {
        Some(path) => path.clone(),
        None => default_output_path(&request.url, request.format, capture_dir, now),
    };
    absolutize(&chosen, cwd)
}

/// Creates the parent directory of `output` and any missing ancestors.
pub async fn ensure_output_dir(output: &Path) -> Result<(), CaptureError> {
    let Some(parent) = output.parent() else {
        return Ok(());
    };

    tokio::fs::create_dir_all(parent).await.map_err(|e| {
        CaptureError::Filesystem(format!(
            "cannot create output directory {}: {e}",
            parent.display()
        ))
    })?;
    debug!("Output directory ready: {}", parent.display());
    Ok(())
}
