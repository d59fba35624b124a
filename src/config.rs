//! Configuration management with serde serialization/deserialization
//!
//! Two layers live here. [`CaptureRequest`] is the validated, per-invocation record built from
//! command-line flags. [`Config`] holds engine settings that are not exposed as flags: the
//! default capture directory, browser channel order and the timing constants of the capture
//! pipeline. Config is layered as defaults, then an optional JSON file, then environment
//! variables.

use crate::{BrowserChannel, CaptureError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Environment variable overriding [`Config::capture_dir`].
pub const ENV_CAPTURE_DIR: &str = "CAPTURE_PAGE_DIR";

/// Environment variable overriding [`Config::channels`] (comma separated channel ids).
pub const ENV_CHANNELS: &str = "CAPTURE_PAGE_CHANNELS";

/// Shortest accepted [`Config::command_timeout`], chromiumoxide's own default.
pub const MIN_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine configuration for the capture tool
///
/// # Examples
///
/// ```rust
/// use capture_page::Config;
/// use std::time::Duration;
///
/// let config = Config {
///     network_idle: Duration::from_millis(250),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory receiving captures when `--output` is not given (default: `captures`)
    ///
    /// Relative paths are resolved against the working directory.
    pub capture_dir: PathBuf,

    /// Browser channels tried in order at launch (default: msedge, chrome)
    pub channels: Vec<BrowserChannel>,

    /// Quiescence window for the network-idle wait (default: 500ms)
    pub network_idle: Duration,

    /// Pause before each auto-scroll step (default: 120ms)
    pub scroll_interval: Duration,

    /// Pause after reaching the bottom before scrolling back up (default: 400ms)
    pub scroll_settle: Duration,

    /// Margin on all four sides of PDF pages, in inches (default: 0.4)
    pub pdf_margin_inches: f64,

    /// Upper bound on graceful browser shutdown (default: 5s)
    pub close_timeout: Duration,

    /// Budget for a single CDP command such as a screenshot or PDF print (default: 120s)
    ///
    /// Never shorter than the navigation timeout of the capture plus a small margin.
    pub command_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_dir: PathBuf::from("captures"),
            channels: vec![BrowserChannel::Msedge, BrowserChannel::Chrome],
            network_idle: Duration::from_millis(500),
            scroll_interval: Duration::from_millis(120),
            scroll_settle: Duration::from_millis(400),
            pdf_margin_inches: 0.4,
            close_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Builds the effective configuration: defaults, then `path` if given, then environment.
    pub async fn load(path: Option<&Path>) -> Result<Self, CaptureError> {
        let mut config = match path {
            Some(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    CaptureError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                serde_json::from_str(&content)?
            }
            None => Config::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        debug!(
            "Configuration loaded: capture_dir={}, channels={:?}",
            config.capture_dir.display(),
            config.channels
        );
        Ok(config)
    }

    /// Applies environment-style overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), CaptureError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CAPTURE_DIR).filter(|d| !d.trim().is_empty()) {
            self.capture_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup(ENV_CHANNELS).filter(|c| !c.trim().is_empty()) {
            self.channels = raw
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(BrowserChannel::from_str)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CaptureError::Config(format!("{ENV_CHANNELS}: {e}")))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.channels.is_empty() {
            return Err(CaptureError::Config(
                "at least one browser channel must be configured".to_string(),
            ));
        }

        if !self.pdf_margin_inches.is_finite() || self.pdf_margin_inches < 0.0 {
            return Err(CaptureError::Config(
                "pdf_margin_inches must be a non-negative number".to_string(),
            ));
        }

        if self.command_timeout < MIN_COMMAND_TIMEOUT {
            return Err(CaptureError::Config(format!(
                "command_timeout must be at least {}s",
                MIN_COMMAND_TIMEOUT.as_secs()
            )));
        }

        if self.scroll_interval.is_zero() {
            return Err(CaptureError::Config(
                "scroll_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Per-command CDP budget for a capture whose navigation may take `navigation_timeout`.
    pub fn command_budget(&self, navigation_timeout: Duration) -> Duration {
        // Slack so the capture's own navigation timeout always fires first
        navigation_timeout
            .saturating_add(Duration::from_secs(5))
            .max(self.command_timeout)
    }

    pub fn pdf_options(&self) -> PdfOptions {
        PdfOptions {
            margin_inches: self.pdf_margin_inches,
            ..Default::default()
        }
    }
}

/// Browser viewport used for the capture context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1440)
    pub width: u32,

    /// Viewport height in pixels (default: 2200)
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1440,
            height: 2200,
        }
    }
}

/// Output formats supported by the capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    /// Full-page PNG snapshot
    Png,
    /// Paginated PDF export
    Pdf,
}

impl CaptureFormat {
    pub const ALLOWED: &'static [&'static str] = &["png", "pdf"];

    pub fn extension(&self) -> &'static str {
        match self {
            CaptureFormat::Png => "png",
            CaptureFormat::Pdf => "pdf",
        }
    }
}

impl FromStr for CaptureFormat {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "png" => Ok(CaptureFormat::Png),
            "pdf" => Ok(CaptureFormat::Pdf),
            _ => Err(CaptureError::Validation(format!(
                "--format must be one of: {}",
                Self::ALLOWED.join(", ")
            ))),
        }
    }
}

/// A validated capture invocation. Built once from the command line and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub url: url::Url,
    pub format: CaptureFormat,
    pub output: Option<PathBuf>,
    pub delay: Duration,
    pub timeout: Duration,
    pub viewport: Viewport,
    pub auto_scroll: bool,
}

impl CaptureRequest {
    /// Request with the command-line defaults for `url`.
    pub fn new(url: url::Url) -> Self {
        Self {
            url,
            format: CaptureFormat::Png,
            output: None,
            delay: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
            viewport: Viewport::default(),
            auto_scroll: true,
        }
    }
}

/// Paginated export settings
#[derive(Debug, Clone, PartialEq)]
pub struct PdfOptions {
    pub print_background: bool,
    /// Honour `@page { size }` declared by the document
    pub prefer_css_page_size: bool,
    pub margin_inches: f64,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            print_background: true,
            prefer_css_page_size: true,
            margin_inches: 0.4,
        }
    }
}

/// Chrome command-line arguments for a headless capture browser
///
/// The window is sized to the capture viewport so layout matches before the device metrics
/// override is applied to the page.
///
/// # Examples
///
/// ```rust
/// use capture_page::{get_chrome_args, Viewport};
///
/// let args = get_chrome_args(&Viewport::default());
/// assert!(args.contains(&"--window-size=1440,2200".to_string()));
/// ```
pub fn get_chrome_args(viewport: &Viewport) -> Vec<String> {
    vec![
        "--disable-gpu".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--hide-scrollbars".to_string(),
        "--mute-audio".to_string(),
        format!("--window-size={},{}", viewport.width, viewport.height),
    ]
}

/// Headless browser configuration for one launch attempt
///
/// `request_timeout` bounds every CDP command, navigation included, so it must be at least the
/// capture's navigation timeout.
pub fn create_browser_config(
    executable: &Path,
    profile_dir: &Path,
    viewport: &Viewport,
    request_timeout: Duration,
) -> Result<chromiumoxide::browser::BrowserConfig, CaptureError> {
    use chromiumoxide::browser::BrowserConfig;

    BrowserConfig::builder()
        .chrome_executable(executable)
        .user_data_dir(profile_dir)
        .request_timeout(request_timeout)
        .window_size(viewport.width, viewport.height)
        .args(get_chrome_args(viewport))
        .build()
        .map_err(CaptureError::Launch)
}
