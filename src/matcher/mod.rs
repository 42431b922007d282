//! Picks the stock detail response out of a page's network traffic

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::inventory::build_product_info;
use crate::models::{DetailResponse, ScrapeOutcome};
use crate::traits::ResponseStream;

/// Matches responses whose URL contains a fixed fragment
#[derive(Debug, Clone)]
pub struct ResponseMatcher {
    pattern: String,
}

impl ResponseMatcher {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        url.contains(&self.pattern)
    }

    /// Starts listening on `responses` in the background.
    ///
    /// The first matching response settles the returned [`PendingMatch`].
    /// Everything after it is ignored.
    pub fn arm(&self, mut responses: ResponseStream) -> PendingMatch {
        let (tx, rx) = oneshot::channel();
        let matcher = self.clone();

        let task = tokio::spawn(async move {
            while let Some(response) = responses.next().await {
                if !matcher.matches(response.url()) {
                    continue;
                }

                info!("Intercepted stock detail response: {}", response.url());
                let outcome = match response.text().await {
                    Ok(body) => parse_detail(&body),
                    Err(e) => Err(e.context("failed to read stock detail response body")),
                };

                // Receiver gone means nobody is waiting anymore
                let _ = tx.send(outcome);
                return;
            }

            debug!("Response stream ended without a stock detail response");
        });

        PendingMatch { rx, task }
    }
}

/// Turns a detail response body into the run outcome
pub fn parse_detail(body: &str) -> Result<ScrapeOutcome> {
    let json: serde_json::Value =
        serde_json::from_str(body).context("stock detail response is not valid JSON")?;
    // Sizes and stocks are lenient, the product list and ids are not
    let detail: DetailResponse = serde_json::from_value(json)
        .context("stock detail response has an unexpected shape")?;

    let outcome = match detail.data.and_then(|data| data.products) {
        Some(products) => ScrapeOutcome::Ok {
            products: products.iter().map(build_product_info).collect(),
        },
        None => ScrapeOutcome::Missing,
    };

    Ok(outcome)
}

/// Outcome of an armed [`ResponseMatcher`], settled at most once
pub struct PendingMatch {
    rx: oneshot::Receiver<Result<ScrapeOutcome>>,
    task: JoinHandle<()>,
}

impl PendingMatch {
    /// Waits for the matching response.
    ///
    /// With `timeout` set to `None` this waits as long as the page keeps
    /// producing traffic.
    pub async fn resolve(mut self, timeout: Option<Duration>) -> Result<ScrapeOutcome> {
        let settled = match timeout {
            Some(limit) => tokio::time::timeout(limit, &mut self.rx)
                .await
                .map_err(|_| anyhow!("no stock detail response within {limit:?}"))?,
            None => (&mut self.rx).await,
        };

        settled.map_err(|_| anyhow!("page closed before a stock detail response arrived"))?
    }
}

impl Drop for PendingMatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}
