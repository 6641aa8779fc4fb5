mod classify;
mod config;
mod dispatch;
mod error;
mod facts;
mod feed;
mod filings;
mod format;
mod pipeline;
mod store;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use config::Config;
use dispatch::discord::DiscordWebhookSink;
use dispatch::Dispatcher;
use facts::yahoo::YahooQuoteSource;
use facts::FactExtractor;
use feed::EdinetClient;
use pipeline::Pipeline;
use store::durable::CnidariumStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load env
    let _ = dotenv::dotenv();
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    // Init sent-id store
    let store = Arc::new(CnidariumStore::open(&config.store_dir).await?);

    let feed = Arc::new(EdinetClient::new(
        &config.edinet_base_url,
        config.edinet_api_key.clone(),
        config.feed_timeout,
    )?);
    info!(base_url = %config.edinet_base_url, full_listing = config.edinet_api_key.is_some(), "EDINET client initialized");

    let quotes = Arc::new(YahooQuoteSource::new(
        &config.quote_base_url,
        &config.quote_cookie_url,
        config.facts_timeout,
    )?);
    let extractor = FactExtractor::new(quotes, config.facts_timeout);

    let sink = Arc::new(DiscordWebhookSink::new(
        &config.earnings_webhook,
        &config.news_webhook,
        config.retry.attempt_timeout,
    )?);
    let dispatcher = Dispatcher::new(sink, config.retry.clone());

    if !config.ticker_filter.is_empty() {
        info!(tickers = ?config.ticker_filter, "Ticker filter active");
    }

    let pipeline = Pipeline::new(feed, extractor, dispatcher, store.clone(), config.pipeline_options());
    let date = config.run_date.unwrap_or_else(|| filings::business_date(Utc::now()));

    let result = pipeline.run_once(date).await;

    // Release the database lock before exiting
    drop(pipeline);
    match Arc::try_unwrap(store) {
        Ok(store) => store.close().await,
        Err(_) => error!("Sent-id store still in use at shutdown"),
    }

    match result {
        Ok(report) => {
            info!(
                date = %date,
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "Done"
            );
            Ok(())
        }
        Err(e) => {
            error!("Run failed: {}", e);
            Err(e.into())
        }
    }
}
