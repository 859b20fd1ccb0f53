use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{header::USER_AGENT, Client};
use serde_json::Value;
use tokio::time::sleep;

use crate::config::CrawlConfig;
use crate::error::{AppError, Context, Result};
use crate::history::YearMonth;

/// One month of daily trading records exactly as the exchange returns them:
/// a field-name header plus a row-major value matrix in chronological order.
/// An empty page is a month with no trading, not an error.
#[derive(Debug, Clone, Default)]
pub struct MonthlyPage {
    pub fields: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl MonthlyPage {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The pipeline's only seam to the remote daily-quote source.
#[async_trait]
pub trait MonthlySource {
    async fn fetch_month(&self, stock_no: &str, month: YearMonth) -> Result<MonthlyPage>;
}

/// HTTP client for the exchange's per-month daily-quote endpoint.
pub struct TwseClient {
    client: Client,
    endpoint: String,
    user_agent: String,
    retries: u32,
}

impl TwseClient {
    pub fn new(cfg: &CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to construct daily-quote HTTP client")?;
        Ok(Self {
            client,
            endpoint: cfg.daily_quotes_url.clone(),
            user_agent: cfg.user_agent.clone(),
            retries: cfg.unreachable_retries,
        })
    }

    /// Transport failures retry up to the configured count with backoff;
    /// anything that reached the server and produced a body does not.
    async fn get_with_retry(&self, stock_no: &str, date_key: &str) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let request = self
                .client
                .get(&self.endpoint)
                .query(&[
                    ("response", "json"),
                    ("date", date_key),
                    ("stockNo", stock_no),
                ])
                .header(USER_AGENT, &self.user_agent);

            match request.send().await.and_then(|resp| resp.error_for_status()) {
                Ok(response) => {
                    info!("loading {}", response.url());
                    return Ok(response);
                }
                Err(err) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "daily-quote request for {stock_no} failed (attempt {attempt}/{}): {err}",
                        self.retries
                    );
                    sleep(Duration::from_millis(2_u64.pow(attempt) * 1000)).await;
                }
                Err(err) => return Err(AppError::Unreachable(err)),
            }
        }
    }
}

#[async_trait]
impl MonthlySource for TwseClient {
    async fn fetch_month(&self, stock_no: &str, month: YearMonth) -> Result<MonthlyPage> {
        let date_key = month.date_key();
        check_date_key(&date_key)?;

        let response = self.get_with_retry(stock_no, &date_key).await?;
        let body = response.text().await.map_err(AppError::Unreachable)?;
        parse_monthly_page(&body)
    }
}

/// Request keys are generated, never user input; a bad one is a bug caught
/// before the call goes out.
fn check_date_key(date_key: &str) -> Result<()> {
    if date_key.len() != 8 || !date_key.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidRequest(format!(
            "date key must be an 8-digit yyyymmdd string, got `{date_key}`"
        )));
    }
    if !date_key.ends_with("01") {
        return Err(AppError::InvalidRequest(format!(
            "date key must pin the day to 01, got `{date_key}`"
        )));
    }
    Ok(())
}

fn parse_monthly_page(body: &str) -> Result<MonthlyPage> {
    let root: Value = serde_json::from_str(body)
        .map_err(|err| AppError::Malformed(format!("daily-quote payload is not JSON: {err}")))?;

    let stat = root
        .get("stat")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Malformed("daily-quote payload has no stat field".to_string()))?;

    // The exchange reports months with no trading days through stat; that is
    // a valid empty page, distinct from a malformed one.
    if stat != "OK" {
        debug!("no trading data for this month: {stat}");
        return Ok(MonthlyPage::default());
    }

    let fields = root
        .get("fields")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Malformed("daily-quote payload has no fields list".to_string()))?
        .iter()
        .map(|value| {
            value.as_str().map(str::to_string).ok_or_else(|| {
                AppError::Malformed("non-string field name in daily-quote payload".to_string())
            })
        })
        .collect::<Result<Vec<String>>>()?;

    let rows = root
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Malformed("daily-quote payload has no data matrix".to_string()))?
        .iter()
        .map(|row| {
            row.as_array().cloned().ok_or_else(|| {
                AppError::Malformed("non-array row in daily-quote payload".to_string())
            })
        })
        .collect::<Result<Vec<Vec<Value>>>>()?;

    Ok(MonthlyPage { fields, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};

    const SAMPLE_MONTH: &str = r#"{
        "stat": "OK",
        "date": "20210601",
        "title": "110年06月 2330 台積電 各日成交資訊",
        "fields": ["日期", "成交股數", "成交金額", "開盤價", "最高價", "最低價", "收盤價", "漲跌價差", "成交筆數"],
        "data": [
            ["110/06/01", "31,549,428", "18,733,959,334", "598.00", "598.00", "592.00", "595.00", "-3.00", "26,737"],
            ["110/06/02", "27,856,582", "16,503,539,967", "591.00", "595.00", "589.00", "594.00", "-1.00", "25,046"]
        ]
    }"#;

    #[test]
    fn rejects_non_digit_and_wrong_length_date_keys() {
        assert!(matches!(
            check_date_key("2021061"),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            check_date_key("2021o601"),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            check_date_key("20210615"),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(check_date_key("20210601").is_ok());
    }

    #[test]
    fn parses_a_month_of_daily_records() {
        let page = parse_monthly_page(SAMPLE_MONTH).unwrap();
        assert_eq!(page.fields.len(), 9);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0][0], serde_json::json!("110/06/01"));
        assert_eq!(page.rows[1][6], serde_json::json!("594.00"));
    }

    #[test]
    fn a_non_ok_stat_is_an_empty_month_not_an_error() {
        let body = r#"{"stat": "很抱歉，沒有符合條件的資料!"}"#;
        let page = parse_monthly_page(body).unwrap();
        assert!(page.is_empty());
        assert!(page.fields.is_empty());
    }

    #[test]
    fn missing_tabular_shape_is_malformed() {
        assert!(matches!(
            parse_monthly_page(r#"{"stat": "OK"}"#),
            Err(AppError::Malformed(_))
        ));
        assert!(matches!(
            parse_monthly_page(r#"{"stat": "OK", "fields": ["日期"], "data": "oops"}"#),
            Err(AppError::Malformed(_))
        ));
        assert!(matches!(
            parse_monthly_page("<html>blocked</html>"),
            Err(AppError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn fetches_one_month_with_the_documented_query() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/exchangeReport/STOCK_DAY")
                .query_param("response", "json")
                .query_param("date", "20210601")
                .query_param("stockNo", "2330");
            then.status(200)
                .header("content-type", "application/json")
                .body(SAMPLE_MONTH);
        });

        let cfg = CrawlConfig {
            daily_quotes_url: server.url("/exchangeReport/STOCK_DAY"),
            ..crate::config::Config::builtin().crawl
        };
        let client = TwseClient::new(&cfg).unwrap();

        let page = client
            .fetch_month("2330", YearMonth::new(2021, 6))
            .await
            .unwrap();

        mock.assert();
        assert_eq!(page.rows.len(), 2);
    }

    #[tokio::test]
    async fn a_server_error_surfaces_as_unreachable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/exchangeReport/STOCK_DAY");
            then.status(503);
        });

        let cfg = CrawlConfig {
            daily_quotes_url: server.url("/exchangeReport/STOCK_DAY"),
            ..crate::config::Config::builtin().crawl
        };
        let client = TwseClient::new(&cfg).unwrap();

        let result = client.fetch_month("2330", YearMonth::new(2021, 6)).await;
        assert!(matches!(result, Err(AppError::Unreachable(_))));
    }
}
