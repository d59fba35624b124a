//! Browser channel discovery and headless launch
//!
//! A capture runs in exactly one Chromium-family browser. The launcher walks the configured
//! channel list once, in order, and hands back the first session that starts. Failures are
//! collected per channel so the final error tells the operator what was tried.

use crate::{
    create_browser_config, CaptureError, CaptureRequest, CaptureSession, ChromiumSession, Config,
    Viewport,
};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

/// Chromium-family browser that can host a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserChannel {
    /// Microsoft Edge
    Msedge,
    /// Google Chrome
    Chrome,
    /// Open-source Chromium build
    Chromium,
}

impl BrowserChannel {
    pub fn id(&self) -> &'static str {
        match self {
            BrowserChannel::Msedge => "msedge",
            BrowserChannel::Chrome => "chrome",
            BrowserChannel::Chromium => "chromium",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BrowserChannel::Msedge => "Microsoft Edge",
            BrowserChannel::Chrome => "Google Chrome",
            BrowserChannel::Chromium => "Chromium",
        }
    }

    /// Program names looked up on `PATH`, most specific first.
    pub fn program_names(&self) -> &'static [&'static str] {
        match self {
            BrowserChannel::Msedge => &[
                "msedge",
                "microsoft-edge",
                "microsoft-edge-stable",
                "microsoft-edge-beta",
                "microsoft-edge-dev",
            ],
            BrowserChannel::Chrome => &[
                "google-chrome",
                "google-chrome-stable",
                "chrome",
                "google-chrome-beta",
                "google-chrome-unstable",
            ],
            BrowserChannel::Chromium => &["chromium", "chromium-browser"],
        }
    }

    /// Well-known install locations for the current platform.
    pub fn install_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();

        #[cfg(target_os = "linux")]
        match self {
            BrowserChannel::Msedge => paths.push("/opt/microsoft/msedge/msedge".into()),
            BrowserChannel::Chrome => paths.push("/opt/google/chrome/chrome".into()),
            BrowserChannel::Chromium => {
                paths.push("/usr/lib/chromium/chromium".into());
                paths.push("/snap/bin/chromium".into());
            }
        }

        #[cfg(target_os = "macos")]
        match self {
            BrowserChannel::Msedge => paths
                .push("/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge".into()),
            BrowserChannel::Chrome => paths
                .push("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome".into()),
            BrowserChannel::Chromium => {
                paths.push("/Applications/Chromium.app/Contents/MacOS/Chromium".into())
            }
        }

        #[cfg(windows)]
        {
            let roots = ["ProgramFiles", "ProgramFiles(x86)", "LOCALAPPDATA"]
                .iter()
                .filter_map(|var| std::env::var_os(var).map(PathBuf::from))
                .collect::<Vec<_>>();
            let relative = match self {
                BrowserChannel::Msedge => r"Microsoft\Edge\Application\msedge.exe",
                BrowserChannel::Chrome => r"Google\Chrome\Application\chrome.exe",
                BrowserChannel::Chromium => r"Chromium\Application\chrome.exe",
            };
            paths.extend(roots.into_iter().map(|root| root.join(relative)));
        }

        paths
    }

    /// Resolves the channel to an executable on this machine.
    pub fn locate(&self) -> Result<PathBuf, String> {
        for name in self.program_names() {
            if let Ok(path) = which::which(name) {
                return Ok(path);
            }
        }

        self.install_paths()
            .into_iter()
            .find(|path| path.is_file())
            .ok_or_else(|| {
                format!(
                    "executable not found (looked for {} on PATH)",
                    self.program_names().join(", ")
                )
            })
    }
}

impl fmt::Display for BrowserChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for BrowserChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "msedge" => Ok(BrowserChannel::Msedge),
            "chrome" => Ok(BrowserChannel::Chrome),
            "chromium" => Ok(BrowserChannel::Chromium),
            other => Err(format!(
                "unknown browser channel '{other}' (expected msedge, chrome or chromium)"
            )),
        }
    }
}

/// Starts a headless session on one channel.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(
        &self,
        channel: BrowserChannel,
    ) -> Result<Box<dyn CaptureSession>, CaptureError>;
}

/// Tries each channel once, in order, returning the first session that launches.
pub async fn launch_first_available(
    launcher: &dyn Launcher,
    channels: &[BrowserChannel],
) -> Result<Box<dyn CaptureSession>, CaptureError> {
    let mut failures = Vec::with_capacity(channels.len());

    for &channel in channels {
        match launcher.launch(channel).await {
            Ok(session) => {
                info!("Launched {} ({})", channel.label(), channel);
                return Ok(session);
            }
            Err(e) => {
                info!("Could not launch {}: {}", channel.label(), e);
                failures.push(format!("{}: {}", channel.label(), e));
            }
        }
    }

    Err(CaptureError::Launch(format!(
        "Unable to launch a Chromium browser. Ensure Edge or Chrome is installed.\n{}",
        failures.join("\n")
    )))
}

/// Launches real browsers through chromiumoxide, sized and timed for one request.
pub struct ChromiumLauncher {
    config: Config,
    viewport: Viewport,
    request_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn new(config: Config, request: &CaptureRequest) -> Self {
        Self {
            request_timeout: config.command_budget(request.timeout),
            config,
            viewport: request.viewport,
        }
    }

    async fn start(&self, channel: BrowserChannel) -> Result<BrowserInstance, CaptureError> {
        let executable = channel.locate().map_err(CaptureError::Launch)?;
        debug!("Resolved {} to {}", channel.label(), executable.display());

        let profile_dir = std::env::temp_dir().join(format!(
            "capture-page-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        tokio::fs::create_dir_all(&profile_dir).await.map_err(|e| {
            CaptureError::Launch(format!("failed to create profile dir: {e}"))
        })?;

        let browser_config = create_browser_config(
            &executable,
            &profile_dir,
            &self.viewport,
            self.request_timeout,
        )?;

        let (browser, mut handler) = match Browser::launch(browser_config).await {
            Ok(launched) => launched,
            Err(e) => {
                remove_profile_dir(&profile_dir).await;
                return Err(CaptureError::Launch(e.to_string()));
            }
        };

        // The handler implements Stream and must be polled for any CDP command to complete
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Handler error: {}", e);
                    return Err(e);
                }
            }
            debug!("Handler stream ended");
            Ok(())
        });

        Ok(BrowserInstance::new(
            channel,
            browser,
            handler_task,
            profile_dir,
            self.config.close_timeout,
        ))
    }
}

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(
        &self,
        channel: BrowserChannel,
    ) -> Result<Box<dyn CaptureSession>, CaptureError> {
        let instance = self.start(channel).await?;
        Ok(Box::new(ChromiumSession::new(
            instance,
            self.config.network_idle,
        )))
    }
}

/// A running browser process and the task pumping its CDP connection
pub struct BrowserInstance {
    pub channel: BrowserChannel,
    pub browser: Mutex<Browser>,
    /// Background task handling Chrome DevTools Protocol communication
    pub handler: tokio::task::JoinHandle<Result<(), chromiumoxide::error::CdpError>>,
    profile_dir: PathBuf,
    close_timeout: Duration,
}

impl BrowserInstance {
    pub fn new(
        channel: BrowserChannel,
        browser: Browser,
        handler: tokio::task::JoinHandle<Result<(), chromiumoxide::error::CdpError>>,
        profile_dir: PathBuf,
        close_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            browser: Mutex::new(browser),
            handler,
            profile_dir,
            close_timeout,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }

    /// Closes the browser, stops the handler and removes the profile directory.
    pub async fn shutdown(self) {
        {
            let mut browser = self.browser.lock().await;
            match tokio::time::timeout(self.close_timeout, browser.close()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Browser close failed: {}", e),
                Err(_) => warn!("Browser did not close within {:?}", self.close_timeout),
            }
        }
        // Dropping the Browser kills the child process if it is still running
        drop(self.browser);
        self.handler.abort();
        remove_profile_dir(&self.profile_dir).await;
        debug!("{} session released", self.channel.label());
    }
}

async fn remove_profile_dir(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        debug!("Could not remove profile dir {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockCaptureSession;
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test]
    fn test_channel_ids_round_trip_through_from_str() {
        for channel in [
            BrowserChannel::Msedge,
            BrowserChannel::Chrome,
            BrowserChannel::Chromium,
        ] {
            assert_eq!(channel.id().parse::<BrowserChannel>().unwrap(), channel);
        }
        assert!("MSEDGE".parse::<BrowserChannel>().is_ok());
        assert!("firefox".parse::<BrowserChannel>().is_err());
    }

    #[test]
    fn test_channel_serde_uses_ids() {
        let json = serde_json::to_string(&vec![BrowserChannel::Msedge, BrowserChannel::Chrome])
            .unwrap();
        assert_eq!(json, r#"["msedge","chrome"]"#);
    }

    #[test]
    fn test_launcher_command_budget_outlives_short_navigation() {
        let mut request = CaptureRequest::new(url::Url::parse("https://example.com").unwrap());
        request.timeout = Duration::from_secs(1);

        let launcher = ChromiumLauncher::new(Config::default(), &request);
        assert_eq!(launcher.request_timeout, Duration::from_secs(120));

        request.timeout = Duration::from_secs(300);
        let launcher = ChromiumLauncher::new(Config::default(), &request);
        assert_eq!(launcher.request_timeout, Duration::from_secs(305));
    }

    #[tokio::test]
    async fn test_first_channel_wins() {
        let mut launcher = MockLauncher::new();
        launcher
            .expect_launch()
            .with(eq(BrowserChannel::Msedge))
            .times(1)
            .returning(|_| Ok(Box::new(MockCaptureSession::new())));

        let result =
            launch_first_available(&launcher, &[BrowserChannel::Msedge, BrowserChannel::Chrome])
                .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_falls_back_to_second_channel() {
        let mut seq = Sequence::new();
        let mut launcher = MockLauncher::new();
        launcher
            .expect_launch()
            .with(eq(BrowserChannel::Msedge))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(CaptureError::Launch("executable not found".into())));
        launcher
            .expect_launch()
            .with(eq(BrowserChannel::Chrome))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Box::new(MockCaptureSession::new())));

        let result =
            launch_first_available(&launcher, &[BrowserChannel::Msedge, BrowserChannel::Chrome])
                .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_all_channels_failing_lists_every_reason() {
        let mut launcher = MockLauncher::new();
        launcher
            .expect_launch()
            .times(2)
            .returning(|channel| {
                Err(CaptureError::Launch(format!("{} exploded", channel.id())))
            });

        let err = match launch_first_available(
            &launcher,
            &[BrowserChannel::Msedge, BrowserChannel::Chrome],
        )
        .await
        {
            Ok(_) => panic!("launch should fail"),
            Err(e) => e,
        };

        let message = err.to_string();
        let lines: Vec<&str> = message.lines().collect();
        assert_eq!(
            lines[0],
            "Unable to launch a Chromium browser. Ensure Edge or Chrome is installed."
        );
        assert_eq!(lines[1], "Microsoft Edge: msedge exploded");
        assert_eq!(lines[2], "Google Chrome: chrome exploded");
        assert!(matches!(err, CaptureError::Launch(_)));
    }
}
