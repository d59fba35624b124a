//! Live browser session used by the capture pipeline
//!
//! [`CaptureSession`] is the set of page operations the pipeline needs. [`ChromiumSession`]
//! implements it over the Chrome DevTools Protocol via chromiumoxide.

use crate::network_idle::{wait_for_idle, IdleOutcome, InFlightRequests, NetworkActivity};
use crate::{BrowserInstance, CaptureError, PdfOptions, Viewport};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetEmulatedMediaParams, SetScriptExecutionDisabledParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, PrintToPdfParams};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[cfg(test)]
use mockall::automock;

const SCROLL_HEIGHT_JS: &str = "Math.max(document.body ? document.body.scrollHeight : 0, \
     document.documentElement ? document.documentElement.scrollHeight : 0)";

/// Page operations the capture pipeline drives, in the order it drives them.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CaptureSession: Send + Sync {
    /// Opens an isolated browser context and a page sized to `viewport`, scripts enabled.
    async fn open_context(&mut self, viewport: Viewport) -> Result<(), CaptureError>;

    /// Loads `url` and waits for network idle, failing once `timeout` elapses.
    async fn navigate(&mut self, url: &Url, timeout: Duration) -> Result<(), CaptureError>;

    /// Full scrollable height of the document in CSS pixels.
    async fn scroll_height(&self) -> Result<f64, CaptureError>;

    async fn scroll_by(&self, pixels: u32) -> Result<(), CaptureError>;

    async fn scroll_to_top(&self) -> Result<(), CaptureError>;

    /// PNG of the whole page, beyond the viewport.
    async fn screenshot_full_page(&self) -> Result<Vec<u8>, CaptureError>;

    async fn emulate_screen_media(&self) -> Result<(), CaptureError>;

    async fn print_pdf(&self, options: &PdfOptions) -> Result<Vec<u8>, CaptureError>;

    /// Releases the browser and everything it owns. Safe to call more than once.
    async fn close(&mut self);
}

pub struct ChromiumSession {
    instance: Option<BrowserInstance>,
    context: Option<BrowserContextId>,
    page: Option<Page>,
    network_idle: Duration,
}

impl ChromiumSession {
    pub fn new(instance: BrowserInstance, network_idle: Duration) -> Self {
        Self {
            instance: Some(instance),
            context: None,
            page: None,
            network_idle,
        }
    }

    fn page(&self) -> Result<&Page, CaptureError> {
        self.page
            .as_ref()
            .ok_or_else(|| CaptureError::Browser("no page is open".to_string()))
    }

    fn instance(&self) -> Result<&BrowserInstance, CaptureError> {
        self.instance
            .as_ref()
            .ok_or_else(|| CaptureError::Browser("browser session already closed".to_string()))
    }

    async fn evaluate(&self, expression: &str) -> Result<(), CaptureError> {
        self.page()?.evaluate(expression).await?;
        Ok(())
    }
}

/// Merges the CDP request lifecycle events of `page` into one stream.
async fn network_activity(
    page: &Page,
) -> Result<BoxStream<'static, NetworkActivity<String>>, CaptureError> {
    page.execute(NetworkEnableParams::default()).await?;

    // A redirect re-sends the same request id; only the first send opens the request
    let started = page
        .event_listener::<EventRequestWillBeSent>()
        .await?
        .filter_map(|event| async move {
            event
                .redirect_response
                .is_none()
                .then(|| NetworkActivity::Started(event.request_id.inner().clone()))
        });
    let finished = page
        .event_listener::<EventLoadingFinished>()
        .await?
        .map(|event| NetworkActivity::Finished(event.request_id.inner().clone()));
    let failed = page
        .event_listener::<EventLoadingFailed>()
        .await?
        .map(|event| NetworkActivity::Finished(event.request_id.inner().clone()));

    Ok(stream::select_all([started.boxed(), finished.boxed(), failed.boxed()]).boxed())
}

#[async_trait]
impl CaptureSession for ChromiumSession {
    async fn open_context(&mut self, viewport: Viewport) -> Result<(), CaptureError> {
        let (context_id, page) = {
            let browser = self.instance()?.browser.lock().await;

            let context_id = browser
                .execute(CreateBrowserContextParams::default())
                .await?
                .result
                .browser_context_id;

            let target = CreateTargetParams::builder()
                .url("about:blank")
                .browser_context_id(context_id.clone())
                .build()
                .map_err(CaptureError::Browser)?;

            (context_id, browser.new_page(target).await?)
        };

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width)
            .height(viewport.height)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(CaptureError::Browser)?;
        page.execute(metrics).await?;
        page.execute(SetScriptExecutionDisabledParams::new(false))
            .await?;

        debug!(
            "Opened {}x{} page in context {:?}",
            viewport.width, viewport.height, context_id
        );
        self.context = Some(context_id);
        self.page = Some(page);
        Ok(())
    }

    async fn navigate(&mut self, url: &Url, timeout: Duration) -> Result<(), CaptureError> {
        let page = self.page()?;
        let quiet = self.network_idle;

        let navigation = async {
            let mut events = network_activity(page).await?;

            page.goto(url.as_str()).await.map_err(|e| match e {
                CdpError::Timeout => CaptureError::NavigationTimeout(timeout),
                other => CaptureError::Navigation(other.to_string()),
            })?;

            let mut in_flight = InFlightRequests::new();
            if wait_for_idle(&mut events, &mut in_flight, quiet).await
                == IdleOutcome::StreamEnded
            {
                return Err(CaptureError::Navigation(
                    "page closed while waiting for network idle".to_string(),
                ));
            }
            Ok(())
        };

        match tokio::time::timeout(timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::NavigationTimeout(timeout)),
        }
    }

    async fn scroll_height(&self) -> Result<f64, CaptureError> {
        self.page()?
            .evaluate(SCROLL_HEIGHT_JS)
            .await?
            .into_value::<f64>()
            .map_err(|e| CaptureError::Browser(format!("unreadable scroll height: {e}")))
    }

    async fn scroll_by(&self, pixels: u32) -> Result<(), CaptureError> {
        self.evaluate(&format!("window.scrollBy(0, {pixels})")).await
    }

    async fn scroll_to_top(&self) -> Result<(), CaptureError> {
        self.evaluate("window.scrollTo(0, 0)").await
    }

    async fn screenshot_full_page(&self) -> Result<Vec<u8>, CaptureError> {
        let screenshot_params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();

        self.page()?
            .screenshot(screenshot_params)
            .await
            .map_err(|e| CaptureError::Export(e.to_string()))
    }

    async fn emulate_screen_media(&self) -> Result<(), CaptureError> {
        self.page()?
            .execute(SetEmulatedMediaParams::builder().media("screen").build())
            .await?;
        Ok(())
    }

    async fn print_pdf(&self, options: &PdfOptions) -> Result<Vec<u8>, CaptureError> {
        let params = PrintToPdfParams::builder()
            .print_background(options.print_background)
            .prefer_css_page_size(options.prefer_css_page_size)
            .margin_top(options.margin_inches)
            .margin_bottom(options.margin_inches)
            .margin_left(options.margin_inches)
            .margin_right(options.margin_inches)
            .build();

        self.page()?
            .pdf(params)
            .await
            .map_err(|e| CaptureError::Export(e.to_string()))
    }

    async fn close(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };

        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        if let Some(context_id) = self.context.take() {
            let browser = instance.browser.lock().await;
            let _ = browser
                .execute(DisposeBrowserContextParams::new(context_id))
                .await;
        }

        instance.shutdown().await;
    }
}
