//! Traits and configuration for browser-driven stock scraping

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::info;

/// Article scraped when no override is configured
pub const DEFAULT_ARTICLE_ID: u64 = 146_972_802;
/// Catalog host serving the product pages
pub const DEFAULT_CATALOG_HOST: &str = "www.wildberries.ru";
/// URL fragment of the background request carrying stock data
pub const DEFAULT_RESPONSE_PATTERN: &str = "/cards/v1/detail";

/// Browser viewport in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
        }
    }
}

/// Configuration for one scrape run
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Numeric article id of the product page
    pub article_id: u64,
    /// Host of the catalog, without scheme
    pub catalog_host: String,
    /// Substring identifying the stock detail response URL
    pub response_pattern: String,
    /// Viewport applied to the page before navigation
    pub viewport: Viewport,
    /// How long to wait for the detail response. `None` waits forever.
    pub response_timeout: Option<Duration>,
    /// Browser binary, auto-detected when unset
    pub chrome_executable: Option<String>,
    /// Launch the browser with `--no-sandbox`
    pub no_sandbox: bool,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            article_id: DEFAULT_ARTICLE_ID,
            catalog_host: DEFAULT_CATALOG_HOST.to_string(),
            response_pattern: DEFAULT_RESPONSE_PATTERN.to_string(),
            viewport: Viewport::default(),
            response_timeout: None,
            chrome_executable: None,
            no_sandbox: false,
        }
    }
}

impl ScrapeConfig {
    /// Builds the configuration from the process environment.
    ///
    /// Every variable is optional and falls back to the built-in default.
    /// A variable that is set but malformed is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ScrapeConfig::from_env`] with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(id) = lookup("STOCK_ARTICLE_ID") {
            config.article_id = id
                .trim()
                .parse()
                .with_context(|| format!("STOCK_ARTICLE_ID is not a valid article id: {id:?}"))?;
        }

        if let Some(host) = lookup("STOCK_CATALOG_HOST") {
            let host = host.trim();
            if host.is_empty() {
                anyhow::bail!("STOCK_CATALOG_HOST is set but empty");
            }
            config.catalog_host = host.to_string();
        }

        if let Some(pattern) = lookup("STOCK_RESPONSE_PATTERN") {
            if pattern.is_empty() {
                anyhow::bail!("STOCK_RESPONSE_PATTERN is set but empty");
            }
            config.response_pattern = pattern;
        }

        if let Some(secs) = lookup("STOCK_RESPONSE_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().with_context(|| {
                format!("STOCK_RESPONSE_TIMEOUT_SECS is not a number of seconds: {secs:?}")
            })?;
            config.response_timeout = Some(Duration::from_secs(secs));
        } else {
            info!("STOCK_RESPONSE_TIMEOUT_SECS not set - waiting for the stock response without a deadline");
        }

        config.chrome_executable = lookup("CHROME_EXECUTABLE").filter(|path| !path.is_empty());

        if let Some(flag) = lookup("CHROME_NO_SANDBOX") {
            config.no_sandbox = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => anyhow::bail!("CHROME_NO_SANDBOX must be true or false, got {other:?}"),
            };
        }

        Ok(config)
    }

    /// Product page URL for the configured article
    pub fn target_url(&self) -> String {
        format!(
            "https://{}/catalog/{}/detail.aspx",
            self.catalog_host, self.article_id
        )
    }
}

/// A network response seen by the page.
///
/// The body is fetched lazily, so responses nobody asks about are never read.
pub struct ObservedResponse {
    url: String,
    body: BoxFuture<'static, Result<String>>,
}

impl ObservedResponse {
    pub fn new<F>(url: impl Into<String>, body: F) -> Self
    where
        F: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            url: url.into(),
            body: Box::pin(body),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Reads the response body as text
    pub async fn text(self) -> Result<String> {
        self.body.await
    }
}

impl std::fmt::Debug for ObservedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedResponse")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Responses crossing a page, in the order they finished loading
pub type ResponseStream = BoxStream<'static, ObservedResponse>;

/// Something that can start a browser
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Launch a new browser instance
    ///
    /// # Arguments
    /// * `config` - Launch options (binary, sandbox)
    async fn launch(&self, config: &ScrapeConfig) -> Result<Box<dyn BrowserSession>>;
}

/// A running browser owned by the caller
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a blank page
    async fn new_page(&mut self) -> Result<Box<dyn PageSession>>;

    /// Shut the browser down
    async fn close(&mut self) -> Result<()>;
}

/// A single page (tab) of a running browser
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn set_viewport(&self, viewport: Viewport) -> Result<()>;

    /// Enable request interception and let every request through unmodified
    async fn intercept_requests(&self) -> Result<()>;

    /// Subscribe to the page's responses.
    ///
    /// Only responses arriving after the subscription are observed, so this
    /// must be called before navigating.
    async fn responses(&self) -> Result<ResponseStream>;

    /// Navigate to `url`
    async fn goto(&self, url: &str) -> Result<()>;
}
