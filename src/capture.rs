//! Capture pipeline orchestration
//!
//! [`CaptureDriver`] acquires one browser session, drives it through navigation, optional
//! auto-scroll, the settle delay and export, and releases it on every path before the outcome
//! is reported.

use crate::{
    format_bytes, format_duration, launch_first_available, CaptureError, CaptureFormat,
    CaptureRequest, CaptureSession, Config, Launcher,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info};

/// Stage of a single capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Launching,
    Navigating,
    Scrolling,
    Delaying,
    Exporting,
    Closed,
    Failed,
}

impl CaptureState {
    pub fn can_transition_to(&self, next: CaptureState) -> bool {
        use CaptureState::*;

        match (self, next) {
            (Closed, _) => false,
            (Failed, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (Idle, Launching) => true,
            (Launching, Navigating) => true,
            (Navigating, Scrolling) | (Navigating, Delaying) => true,
            (Scrolling, Delaying) => true,
            (Delaying, Exporting) => true,
            (Exporting, Closed) => true,
            _ => false,
        }
    }
}

/// Scroll arithmetic for the lazy-content pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollPlan {
    /// Pixels moved per step
    pub step: u32,
}

impl ScrollPlan {
    pub const MIN_STEP: u32 = 400;

    /// Step of 80% of the viewport height, never less than [`Self::MIN_STEP`].
    pub fn new(viewport_height: u32) -> Self {
        let step = (f64::from(viewport_height) * 0.8).floor() as u32;
        Self {
            step: step.max(Self::MIN_STEP),
        }
    }

    /// Steps needed for the cumulative distance to reach `page_height`. Always at least one.
    pub fn step_count(&self, page_height: f64) -> u32 {
        if page_height.is_nan() || page_height <= 0.0 {
            return 1;
        }
        (page_height / f64::from(self.step))
            .ceil()
            .clamp(1.0, f64::from(u32::MAX)) as u32
    }
}

/// Runs one capture request end to end.
pub struct CaptureDriver {
    config: Config,
}

impl CaptureDriver {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Launches a session through `launcher`, captures `request` into `output` and always
    /// closes the session before returning.
    pub async fn run(
        &self,
        launcher: &dyn Launcher,
        request: &CaptureRequest,
        output: &Path,
    ) -> Result<(), CaptureError> {
        let started = Instant::now();
        let mut state = CaptureState::Idle;
        advance(&mut state, CaptureState::Launching);

        let mut session = match launch_first_available(launcher, &self.config.channels).await {
            Ok(session) => session,
            Err(e) => {
                advance(&mut state, CaptureState::Failed);
                advance(&mut state, CaptureState::Closed);
                return Err(e);
            }
        };

        let result = self
            .drive(session.as_mut(), request, output, &mut state)
            .await;
        session.close().await;

        match &result {
            Ok(bytes) => {
                advance(&mut state, CaptureState::Closed);
                info!(
                    "Captured {} ({}) in {}",
                    request.url,
                    format_bytes(*bytes),
                    format_duration(started.elapsed())
                );
            }
            Err(e) => {
                debug!("Capture failed ({:?}): {}", e.kind(), e);
                advance(&mut state, CaptureState::Failed);
                advance(&mut state, CaptureState::Closed);
            }
        }

        result.map(|_| ())
    }

    async fn drive(
        &self,
        session: &mut dyn CaptureSession,
        request: &CaptureRequest,
        output: &Path,
        state: &mut CaptureState,
    ) -> Result<usize, CaptureError> {
        advance(state, CaptureState::Navigating);
        session.open_context(request.viewport).await?;
        session.navigate(&request.url, request.timeout).await?;
        debug!("Network idle on {}", request.url);

        if request.auto_scroll {
            advance(state, CaptureState::Scrolling);
            self.auto_scroll(&*session, request.viewport.height).await?;
        }

        advance(state, CaptureState::Delaying);
        if !request.delay.is_zero() {
            sleep(request.delay).await;
        }

        advance(state, CaptureState::Exporting);
        let bytes = match request.format {
            CaptureFormat::Png => session.screenshot_full_page().await?,
            CaptureFormat::Pdf => {
                session.emulate_screen_media().await?;
                session.print_pdf(&self.config.pdf_options()).await?
            }
        };

        write_output(output, &bytes).await?;
        Ok(bytes.len())
    }

    async fn auto_scroll(
        &self,
        session: &dyn CaptureSession,
        viewport_height: u32,
    ) -> Result<(), CaptureError> {
        let page_height = session.scroll_height().await?;
        let plan = ScrollPlan::new(viewport_height);
        let steps = plan.step_count(page_height);
        debug!(
            "Scrolling {}px page in {} steps of {}px",
            page_height, steps, plan.step
        );

        for _ in 0..steps {
            sleep(self.config.scroll_interval).await;
            session.scroll_by(plan.step).await?;
        }

        sleep(self.config.scroll_settle).await;
        session.scroll_to_top().await
    }
}

fn advance(state: &mut CaptureState, next: CaptureState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal capture transition {state:?} -> {next:?}"
    );
    debug!("Capture state {:?} -> {:?}", state, next);
    *state = next;
}

/// Sibling of `output` that receives the bytes before they are moved into place.
fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    output.with_file_name(format!(".{name}.{}.partial", uuid::Uuid::new_v4()))
}

/// Writes `bytes` to a temporary sibling and renames it onto `output`.
///
/// On failure only the temporary file is removed; an existing `output` is left untouched.
async fn write_output(output: &Path, bytes: &[u8]) -> Result<(), CaptureError> {
    let partial = partial_path(output);

    let written = match tokio::fs::write(&partial, bytes).await {
        Ok(()) => tokio::fs::rename(&partial, output).await,
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(CaptureError::Export(format!(
            "cannot write {}: {e}",
            output.display()
        )));
    }
    Ok(())
}
