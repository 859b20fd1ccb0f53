use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::time::sleep;

use crate::error::AppError;
use crate::fetch::MonthlySource;
use crate::history::{DateWindow, HistoryTable, YearMonth};

/// A crawl that stopped before its window was exhausted. `partial` holds
/// every month merged before the failure, so callers can decide whether the
/// incomplete history is usable and restart from `month`.
#[derive(Debug, thiserror::Error)]
#[error("history crawl aborted at {month}: {source}")]
pub struct CrawlFailure {
    pub month: YearMonth,
    pub partial: HistoryTable,
    #[source]
    pub source: AppError,
}

pub type CrawlResult = std::result::Result<HistoryTable, Box<CrawlFailure>>;

/// Walks a date window month-by-month against a monthly source, merging each
/// page into one table. Deliberately sequential: the delay after every fetch
/// is a rate-limit courtesy to the remote source, so nothing here fans out.
pub struct Pipeline<S> {
    source: S,
    delay: Duration,
    cancel: Arc<AtomicBool>,
}

impl<S: MonthlySource> Pipeline<S> {
    pub fn new(source: S, delay: Duration) -> Self {
        Self {
            source,
            delay,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag other tasks can set to stop the crawl; it is checked at the top
    /// of each iteration, before the next network call goes out.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Fetch and merge every month in `window` in order. Any fetch error
    /// aborts the walk and surfaces the partial table; months are never
    /// retried or skipped here.
    pub async fn run(&self, stock_no: &str, window: DateWindow) -> CrawlResult {
        let mut table = HistoryTable::new();

        for month in window.months() {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(Box::new(CrawlFailure {
                    month,
                    partial: table,
                    source: AppError::Cancelled,
                }));
            }

            match self.source.fetch_month(stock_no, month).await {
                Ok(page) => {
                    info!("{stock_no} {month}: {} trading days", page.rows.len());
                    table = table.merged(page);
                }
                Err(source) => {
                    return Err(Box::new(CrawlFailure {
                        month,
                        partial: table,
                        source,
                    }));
                }
            }

            sleep(self.delay).await;
        }

        Ok(table)
    }
}
