//! Chromium backend driven over the DevTools protocol

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
    RequestId,
};
use futures::{StreamExt, future, stream};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::traits::{
    BrowserEngine, BrowserSession, ObservedResponse, PageSession, ResponseStream, ScrapeConfig,
    Viewport,
};

/// Launches a local Chromium/Chrome through chromiumoxide
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumEngine;

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn launch(&self, config: &ScrapeConfig) -> Result<Box<dyn BrowserSession>> {
        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport.width, config.viewport.height);

        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }

        let browser_config = builder
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        // The handler must be polled for any CDP command to complete
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {}", e);
                }
            }
        });

        info!("Browser launched");
        Ok(Box::new(ChromiumBrowser {
            browser,
            handler_task,
        }))
    }
}

struct ChromiumBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumBrowser {
    async fn new_page(&mut self) -> Result<Box<dyn PageSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("Failed to create new page")?;

        Ok(Box::new(ChromiumPage {
            page,
            tasks: PageTasks::default(),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.browser
            .close()
            .await
            .context("Failed to close browser")?;
        self.browser
            .wait()
            .await
            .context("Failed to wait for browser exit")?;
        self.handler_task.abort();

        info!("Browser closed");
        Ok(())
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

struct ChromiumPage {
    page: Page,
    tasks: PageTasks,
}

/// Background tasks serving one page, aborted with it
#[derive(Default)]
struct PageTasks(Mutex<Vec<JoinHandle<()>>>);

impl PageTasks {
    fn push(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.0.lock() {
            tasks.push(task);
        } else {
            task.abort();
        }
    }
}

impl Drop for PageTasks {
    fn drop(&mut self) {
        let tasks = match self.0.get_mut() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

enum NetworkEvent {
    Received(Arc<EventResponseReceived>),
    Finished(Arc<EventLoadingFinished>),
    Failed(Arc<EventLoadingFailed>),
}

/// Requests that got a response but whose body is not loaded yet
#[derive(Debug, Default)]
struct InFlight(HashMap<String, String>);

impl InFlight {
    fn received(&mut self, request_id: &str, url: &str) {
        self.0.insert(request_id.to_string(), url.to_string());
    }

    /// URL of the request, now ready to read
    fn finished(&mut self, request_id: &str) -> Option<String> {
        self.0.remove(request_id)
    }

    fn failed(&mut self, request_id: &str) {
        self.0.remove(request_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.len()
    }
}

#[async_trait]
impl PageSession for ChromiumPage {
    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.page
            .execute(SetDeviceMetricsOverrideParams::new(
                i64::from(viewport.width),
                i64::from(viewport.height),
                1.0,
                false,
            ))
            .await
            .context("Failed to set viewport")?;

        Ok(())
    }

    async fn intercept_requests(&self) -> Result<()> {
        // Subscribe first so no paused request slips through unanswered
        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .context("Failed to listen for paused requests")?;

        self.page
            .execute(EnableParams::default())
            .await
            .context("Failed to enable request interception")?;

        let page = self.page.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let request_id = event.request_id.clone();
                if let Err(e) = page.execute(ContinueRequestParams::new(request_id)).await {
                    debug!("Failed to continue request {}: {}", event.request.url, e);
                }
            }
        }));

        Ok(())
    }

    async fn responses(&self) -> Result<ResponseStream> {
        let received = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("Failed to listen for responses")?;
        let finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .context("Failed to listen for finished requests")?;
        let failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .context("Failed to listen for failed requests")?;

        // A body is only readable once loading finished, so a response is
        // emitted on its `loadingFinished` event, not on `responseReceived`.
        let page = self.page.clone();
        let events = stream::select_all([
            received.map(NetworkEvent::Received).boxed(),
            finished.map(NetworkEvent::Finished).boxed(),
            failed.map(NetworkEvent::Failed).boxed(),
        ]);
        let responses = events
            .scan(InFlight::default(), move |in_flight, event| {
                let ready = match event {
                    NetworkEvent::Received(event) => {
                        in_flight.received(event.request_id.inner(), &event.response.url);
                        None
                    }
                    NetworkEvent::Failed(event) => {
                        in_flight.failed(event.request_id.inner());
                        None
                    }
                    NetworkEvent::Finished(event) => in_flight
                        .finished(event.request_id.inner())
                        .map(|url| {
                            ObservedResponse::new(
                                url,
                                read_body(page.clone(), event.request_id.clone()),
                            )
                        }),
                };
                future::ready(Some(ready))
            })
            .filter_map(future::ready);

        Ok(responses.boxed())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        info!("Navigating to {}", url);
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {url}"))?;

        Ok(())
    }
}

async fn read_body(page: Page, request_id: RequestId) -> Result<String> {
    let reply = page
        .execute(GetResponseBodyParams::new(request_id))
        .await
        .context("Failed to fetch response body")?;

    if reply.result.base64_encoded {
        bail!("response body is binary (base64 encoded)");
    }

    Ok(reply.result.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn test_in_flight_emits_finished_requests_once() {
        let mut in_flight = InFlight::default();
        in_flight.received("1", "https://card.wb.ru/cards/v1/detail?nm=1");

        assert_eq!(
            in_flight.finished("1").as_deref(),
            Some("https://card.wb.ru/cards/v1/detail?nm=1")
        );
        assert_eq!(in_flight.finished("1"), None);
        assert_eq!(in_flight.len(), 0);
    }

    #[test]
    fn test_in_flight_forgets_failed_requests() {
        let mut in_flight = InFlight::default();
        in_flight.received("1", "https://static.wb.ru/a.js");
        in_flight.received("2", "https://static.wb.ru/b.js");

        in_flight.failed("1");
        in_flight.failed("unknown");

        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight.finished("1"), None);
        assert!(in_flight.finished("2").is_some());
    }

    #[tokio::test]
    async fn test_page_tasks_are_aborted_on_drop() {
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let tasks = PageTasks::default();
        tasks.push(tokio::spawn(async move {
            let _alive = alive_tx;
            futures::future::pending::<()>().await;
        }));

        drop(tasks);

        // The sender is dropped only when the aborted task is torn down
        assert!(alive_rx.await.is_err());
    }
}
