//! Deterministic browser used by tests.
//!
//! Records every call it receives and replays a fixed set of responses
//! once the page navigates.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedSender};

use crate::traits::{
    BrowserEngine, BrowserSession, ObservedResponse, PageSession, ResponseStream, ScrapeConfig,
    Viewport,
};

#[derive(Clone, Default)]
pub struct ScriptedEngine {
    fail_launch: bool,
    fail_goto: bool,
    responses: Vec<(String, String)>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_launch() -> Self {
        Self {
            fail_launch: true,
            ..Self::default()
        }
    }

    pub fn failing_navigation() -> Self {
        Self {
            fail_goto: true,
            ..Self::default()
        }
    }

    /// Adds a response the page emits after navigation
    pub fn respond(mut self, url: &str, body: &str) -> Self {
        self.responses.push((url.to_string(), body.to_string()));
        self
    }

    /// Calls received so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl BrowserEngine for ScriptedEngine {
    async fn launch(&self, _config: &ScrapeConfig) -> Result<Box<dyn BrowserSession>> {
        self.record("launch");
        if self.fail_launch {
            return Err(anyhow!("Failed to launch browser: executable not found"));
        }

        Ok(Box::new(ScriptedBrowser {
            engine: self.clone(),
        }))
    }
}

struct ScriptedBrowser {
    engine: ScriptedEngine,
}

#[async_trait]
impl BrowserSession for ScriptedBrowser {
    async fn new_page(&mut self) -> Result<Box<dyn PageSession>> {
        self.engine.record("new_page");
        Ok(Box::new(ScriptedPage {
            engine: self.engine.clone(),
            subscriber: Mutex::new(None),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.engine.record("close");
        Ok(())
    }
}

struct ScriptedPage {
    engine: ScriptedEngine,
    subscriber: Mutex<Option<UnboundedSender<ObservedResponse>>>,
}

#[async_trait]
impl PageSession for ScriptedPage {
    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.engine
            .record(format!("viewport {}x{}", viewport.width, viewport.height));
        Ok(())
    }

    async fn intercept_requests(&self) -> Result<()> {
        self.engine.record("intercept");
        Ok(())
    }

    async fn responses(&self) -> Result<ResponseStream> {
        self.engine.record("responses");
        let (tx, rx) = mpsc::unbounded();
        *self.subscriber.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.engine.record(format!("goto {url}"));
        if self.engine.fail_goto {
            return Err(anyhow!("Failed to navigate to {url}: net::ERR_NAME_NOT_RESOLVED"));
        }

        // The sender stays in place, so the stream stays open like a live page
        if let Some(tx) = self.subscriber.lock().unwrap().as_ref() {
            for (url, body) in &self.engine.responses {
                let body = body.clone();
                let _ = tx.unbounded_send(ObservedResponse::new(url.clone(), async move {
                    Ok(body)
                }));
            }
        }

        Ok(())
    }
}
