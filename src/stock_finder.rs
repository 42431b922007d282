use anyhow::Result;
use tracing::{error, info, warn};

use crate::matcher::{PendingMatch, ResponseMatcher};
use crate::models::{ProductInfo, ScrapeOutcome};
use crate::traits::{BrowserEngine, BrowserSession, PageSession, ScrapeConfig};

/// Drives one browser session to collect the stock of the configured article
pub struct StockFinder<E> {
    engine: E,
    config: ScrapeConfig,
    matcher: ResponseMatcher,
}

impl<E: BrowserEngine> StockFinder<E> {
    pub fn new(engine: E, config: ScrapeConfig) -> Self {
        let matcher = ResponseMatcher::new(config.response_pattern.clone());

        Self {
            engine,
            config,
            matcher,
        }
    }

    /// Runs one scrape.
    ///
    /// Failing to launch the browser or to load the page is logged and
    /// yields the empty envelope. Failing to make sense of the intercepted
    /// response is returned as an error.
    pub async fn check_stock(&self) -> Result<ScrapeOutcome> {
        let fallback = ScrapeOutcome::Empty(ProductInfo::empty(self.config.article_id));

        let mut browser = match self.engine.launch(&self.config).await {
            Ok(browser) => browser,
            Err(e) => {
                error!("Error launching browser: {:#}", e);
                return Ok(fallback);
            }
        };

        let outcome = match self.open_page(browser.as_mut()).await {
            // The page handle must outlive the wait
            Ok((_page, pending)) => pending.resolve(self.config.response_timeout).await,
            Err(e) => {
                error!("Error loading product page: {:#}", e);
                Ok(fallback)
            }
        };

        if let Err(e) = browser.close().await {
            warn!("Error closing browser: {:#}", e);
        }

        if let Ok(ScrapeOutcome::Ok { products }) = &outcome {
            info!("Collected stock for {} products", products.len());
        }

        outcome
    }

    async fn open_page(
        &self,
        browser: &mut dyn BrowserSession,
    ) -> Result<(Box<dyn PageSession>, PendingMatch)> {
        let page = browser.new_page().await?;
        page.set_viewport(self.config.viewport).await?;
        page.intercept_requests().await?;

        // Armed before navigating, the detail request fires during page load
        let pending = self.matcher.arm(page.responses().await?);

        page.goto(&self.config.target_url()).await?;

        Ok((page, pending))
    }
}
