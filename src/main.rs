use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod browsers;
mod inventory;
mod matcher;
mod models;
mod stock_finder;
mod traits;

use browsers::ChromiumEngine;
use stock_finder::StockFinder;
use traits::ScrapeConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    // stdout carries the result, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ScrapeConfig::from_env()?;
    info!("Checking stock for article {}", config.article_id);

    let finder = StockFinder::new(ChromiumEngine, config);
    let outcome = finder.check_stock().await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
