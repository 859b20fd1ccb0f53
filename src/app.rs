use std::sync::atomic::Ordering;

use chrono::Local;
use log::{error, info, warn};
use mongodb::bson::Document;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{IsinClient, SecurityListing, TwseClient};
use crate::history::{resolve_window, HistoryTable};
use crate::pipeline::{CrawlFailure, Pipeline};
use crate::storage::{insert_if_absent, CollectionMode, MongoStore};

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_builtin(&cli.config)?;

    match cli.command {
        Command::Crawl {
            stock_no,
            collection,
            mode,
            store_partial,
        } => {
            let collection =
                collection.unwrap_or_else(|| format!("stock_{stock_no}"));
            crawl(&config, &stock_no, &collection, mode.into(), store_partial).await
        }
        Command::Listings { collection } => listings(&config, &collection).await,
    }
}

/// Full pipeline for one security: resolve the window from its listing date,
/// walk it month-by-month, then hand the merged table to storage.
async fn crawl(
    config: &Config,
    stock_no: &str,
    collection: &str,
    mode: CollectionMode,
    store_partial: bool,
) -> Result<()> {
    let isin = IsinClient::new(&config.crawl)?;
    let listed_date = isin.fetch_listed_date(stock_no).await?;
    info!("{stock_no} listed on {listed_date}");

    let today = Local::now().date_naive();
    let window = resolve_window(listed_date, today)?;
    info!(
        "fetching {} months, {} through {}",
        window.month_count(),
        window.start,
        window.end
    );

    let source = TwseClient::new(&config.crawl)?;
    let pipeline = Pipeline::new(source, config.crawl.request_delay);

    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping before the next fetch");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let table = match pipeline.run(stock_no, window).await {
        Ok(table) => table,
        Err(failure) => {
            let CrawlFailure {
                month,
                partial,
                source,
            } = *failure;
            error!("history crawl aborted at {month}: {source}");
            if store_partial && !partial.is_empty() {
                let stored = persist(config, collection, mode, stock_no, &partial).await?;
                info!("stored {stored} partial-history documents; restart from {month}");
            }
            return Err(source);
        }
    };

    if table.is_empty() {
        info!("{stock_no} had no trading days in the whole window; nothing to store");
        return Ok(());
    }

    let inserted = persist(config, collection, mode, stock_no, &table).await?;
    info!(
        "{stock_no}: {} trading days fetched, {inserted} new documents in `{collection}`",
        table.row_count()
    );
    Ok(())
}

async fn persist(
    config: &Config,
    collection_name: &str,
    mode: CollectionMode,
    stock_no: &str,
    table: &HistoryTable,
) -> Result<usize> {
    let documents = match mode {
        CollectionMode::General => table.general_documents(stock_no),
        CollectionMode::Timeseries => table.timeseries_documents(stock_no)?,
    };

    let store = MongoStore::connect(&config.mongo).await?;
    let collection = store.get_or_create(collection_name, mode).await?;
    let inserted = insert_if_absent(&collection, &documents).await?;
    if inserted < documents.len() {
        info!(
            "{} of {} documents were already stored",
            documents.len() - inserted,
            documents.len()
        );
    }
    Ok(inserted)
    // store drops here, releasing the connection on every exit path
}

async fn listings(config: &Config, collection_name: &str) -> Result<()> {
    let isin = IsinClient::new(&config.crawl)?;
    let listings = isin.fetch_listings().await?;
    info!("{} qualifying securities and ETFs", listings.len());

    let documents: Vec<Document> = listings.iter().map(SecurityListing::document).collect();

    let store = MongoStore::connect(&config.mongo).await?;
    let collection = store
        .get_or_create(collection_name, CollectionMode::General)
        .await?;
    let inserted = insert_if_absent(&collection, &documents).await?;
    info!("{inserted} new listing documents in `{collection_name}`");
    Ok(())
}
