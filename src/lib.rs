//! # capture-page
//!
//! Captures a rendered web page as a full-page PNG or a paginated PDF using a headless
//! Chromium-family browser (Microsoft Edge, Google Chrome or Chromium) driven over the Chrome
//! DevTools Protocol.
//!
//! ## Pipeline
//!
//! One invocation performs one capture:
//!
//! 1. Parse and validate flags into a [`CaptureRequest`]
//! 2. Resolve the output path and create its directory
//! 3. Launch the first available browser channel
//! 4. Open an isolated context, navigate and wait for network idle
//! 5. Optionally auto-scroll to the bottom and back to trigger lazy content
//! 6. Wait the settle delay, then export PNG or PDF to disk
//! 7. Release the browser, on success and on failure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use capture_page::{CaptureRequest, ChromiumLauncher, CliRunner, Config};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let request = CaptureRequest::new(Url::parse("https://example.com")?);
//!
//!     let launcher = ChromiumLauncher::new(config.clone(), &request);
//!     let runner = CliRunner::with_config(config, std::env::current_dir()?);
//!     let path = runner.capture(&request, &launcher, chrono::Utc::now()).await?;
//!     println!("Saved {}", path.display());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! capture-page --url https://example.com
//! capture-page --url https://example.com --format pdf --output report.pdf --no-auto-scroll
//! ```

/// Engine configuration and the validated capture request
pub mod config;

/// Error taxonomy
pub mod error;

/// Browser channel discovery and launch with fallback
pub mod browser;

/// Page operations over a live browser session
pub mod session;

/// Network-idle detection
pub mod network_idle;

/// Capture pipeline orchestration
pub mod capture;

/// Output path resolution
pub mod output;

/// Command-line interface implementation
pub mod cli;

/// Utility functions and helpers
pub mod utils;


pub use browser::*;
pub use capture::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use output::*;
pub use session::*;
pub use utils::*;
