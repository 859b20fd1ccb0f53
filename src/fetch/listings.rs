use std::time::Duration;

use chrono::NaiveDate;
use mongodb::bson::{doc, Document};
use reqwest::{header::USER_AGENT, Client};
use scraper::{Html, Selector};

use crate::config::CrawlConfig;
use crate::error::{AppError, Context, Result};

/// Market tiers excluded from the crawl: OTC, futures/options, the emerging
/// and incubator boards, and public-offering-only listings.
const EXCLUDED_TIERS: [&str; 5] = ["上櫃", "期貨及選擇權", "興櫃一般板", "公開發行", "創櫃版"];

/// Only common stocks and ETFs qualify.
const INCLUDED_TYPES: [&str; 2] = ["ETF", "股票"];

/// Cells per listing row on the ISIN page; rows with any other shape are
/// headers or section separators.
const ROW_CELLS: usize = 10;

/// One qualifying row of the exchange's listing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityListing {
    pub code: String,
    pub name: String,
    pub kind: String,
    pub industry: String,
    pub listed_date: String,
}

impl SecurityListing {
    /// Flat general-mode document, keyed the way the listing page labels its
    /// columns.
    pub fn document(&self) -> Document {
        doc! {
            "有價證券代號": &self.code,
            "有價證券名稱": &self.name,
            "有價證券別": &self.kind,
            "產業別": &self.industry,
            "發行日": &self.listed_date,
        }
    }
}

/// HTTP client for the ISIN listing page: the full security/ETF table and
/// the per-security listing-date lookup.
pub struct IsinClient {
    client: Client,
    endpoint: String,
    user_agent: String,
}

impl IsinClient {
    pub fn new(cfg: &CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to construct listing HTTP client")?;
        Ok(Self {
            client,
            endpoint: cfg.isin_url.clone(),
            user_agent: cfg.user_agent.clone(),
        })
    }

    /// Download the listing table and keep only main-board common stocks and
    /// ETFs.
    pub async fn fetch_listings(&self) -> Result<Vec<SecurityListing>> {
        let body = self.get(&[]).await?;
        parse_listings(&body)
    }

    /// Listing date for one security, `NotFound` when the page has no date
    /// cell for it.
    pub async fn fetch_listed_date(&self, stock_no: &str) -> Result<NaiveDate> {
        let body = self.get(&[("owncode", stock_no), ("stockname", "")]).await?;
        parse_listed_date(&body)?.ok_or_else(|| AppError::NotFound(stock_no.to_string()))
    }

    async fn get(&self, query: &[(&str, &str)]) -> Result<String> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(query)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(AppError::Unreachable)?;
        response.text().await.map_err(AppError::Unreachable)
    }
}

fn parse_listings(body: &str) -> Result<Vec<SecurityListing>> {
    let rows = Selector::parse("tr").map_err(|_| AppError::message("invalid row selector"))?;
    let cells = Selector::parse("td").map_err(|_| AppError::message("invalid cell selector"))?;

    let document = Html::parse_document(body);
    let mut listings = Vec::new();

    for row in document.select(&rows) {
        let texts: Vec<String> = row
            .select(&cells)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();
        if texts.len() != ROW_CELLS {
            continue;
        }

        let tier = &texts[4];
        if !qualifies(&texts[2], tier, &texts[5]) {
            continue;
        }

        listings.push(SecurityListing {
            code: texts[2].clone(),
            name: texts[3].clone(),
            kind: texts[5].clone(),
            industry: texts[6].clone(),
            listed_date: texts[7].clone(),
        });
    }

    Ok(listings)
}

fn qualifies(code: &str, tier: &str, kind: &str) -> bool {
    if code.is_empty() {
        return false;
    }
    let alpha_edge = code.chars().next().is_some_and(char::is_alphabetic)
        || code.chars().last().is_some_and(char::is_alphabetic);
    !alpha_edge && !EXCLUDED_TIERS.contains(&tier) && INCLUDED_TYPES.contains(&kind)
}

/// Scan every cell for a western `Y/M/D` all-digit date; the last one on the
/// page is the listing date.
fn parse_listed_date(body: &str) -> Result<Option<NaiveDate>> {
    let cells = Selector::parse("td").map_err(|_| AppError::message("invalid cell selector"))?;

    let document = Html::parse_document(body);
    let mut listed = None;

    for cell in document.select(&cells) {
        let text = cell.text().collect::<String>().trim().to_string();
        let parts: Vec<&str> = text.split('/').collect();
        if parts.len() != 3
            || parts
                .iter()
                .any(|part| part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()))
        {
            continue;
        }

        let (Ok(year), Ok(month), Ok(day)) =
            (parts[0].parse(), parts[1].parse(), parts[2].parse())
        else {
            continue;
        };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            listed = Some(date);
        }
    }

    Ok(listed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};

    fn listing_row(cells: [&str; 10]) -> String {
        let tds: String = cells.iter().map(|c| format!("<td>{c}</td>")).collect();
        format!("<tr>{tds}</tr>")
    }

    fn listing_page(rows: &[String]) -> String {
        format!(
            "<html><body><table><tr><td colspan=\"10\">有價證券</td></tr>{}</table></body></html>",
            rows.concat()
        )
    }

    #[test]
    fn keeps_main_board_stocks_and_etfs_only() {
        let page = listing_page(&[
            listing_row(["1", "x", "2330", "台積電", "上市", "股票", "半導體業", "1994/09/05", "", ""]),
            listing_row(["2", "x", "0050", "元大台灣50", "上市", "ETF", "", "2003/06/30", "", ""]),
            listing_row(["3", "x", "6488", "環球晶", "上櫃", "股票", "半導體業", "2015/09/25", "", ""]),
            listing_row(["4", "x", "00632R", "元大台灣50反1", "上市", "ETF", "", "2014/10/31", "", ""]),
            listing_row(["5", "x", "T330", "測試", "上市", "股票", "", "2020/01/01", "", ""]),
            listing_row(["6", "x", "2330A", "特別股", "上市", "特別股", "", "2020/01/01", "", ""]),
        ]);

        let listings = parse_listings(&page).unwrap();
        let codes: Vec<&str> = listings.iter().map(|l| l.code.as_str()).collect();
        assert_eq!(codes, vec!["2330", "0050"]);
        assert_eq!(listings[0].industry, "半導體業");
        assert_eq!(listings[0].listed_date, "1994/09/05");
    }

    #[test]
    fn rows_with_the_wrong_cell_count_are_skipped() {
        let page = "<table><tr><td>股票</td></tr><tr><td>a</td><td>b</td></tr></table>";
        assert!(parse_listings(page).unwrap().is_empty());
    }

    #[test]
    fn listing_document_uses_the_page_column_labels() {
        let listing = SecurityListing {
            code: "2330".to_string(),
            name: "台積電".to_string(),
            kind: "股票".to_string(),
            industry: "半導體業".to_string(),
            listed_date: "1994/09/05".to_string(),
        };
        let document = listing.document();
        assert_eq!(document.get_str("有價證券代號").unwrap(), "2330");
        assert_eq!(document.get_str("發行日").unwrap(), "1994/09/05");
    }

    #[test]
    fn the_last_date_cell_wins() {
        let page = "<table>\
            <tr><td>2330</td><td>台積電</td><td>1994/09/05</td></tr>\
            <tr><td>備註</td><td>2000/01/02</td></tr>\
            </table>";
        assert_eq!(
            parse_listed_date(page).unwrap(),
            NaiveDate::from_ymd_opt(2000, 1, 2)
        );
    }

    #[test]
    fn pages_without_a_date_cell_yield_none() {
        let page = "<table><tr><td>查無資料</td></tr></table>";
        assert_eq!(parse_listed_date(page).unwrap(), None);
    }

    #[tokio::test]
    async fn looks_up_a_listing_date_by_owncode() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/isin/single_main.jsp")
                .query_param("owncode", "2330");
            then.status(200).body(
                "<table><tr><td>2330</td><td>台積電</td><td>1994/09/05</td></tr></table>",
            );
        });

        let cfg = CrawlConfig {
            isin_url: server.url("/isin/single_main.jsp"),
            ..crate::config::Config::builtin().crawl
        };
        let client = IsinClient::new(&cfg).unwrap();

        let date = client.fetch_listed_date("2330").await.unwrap();
        mock.assert();
        assert_eq!(date, NaiveDate::from_ymd_opt(1994, 9, 5).unwrap());
    }

    #[tokio::test]
    async fn unknown_securities_are_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/isin/single_main.jsp");
            then.status(200)
                .body("<table><tr><td>查無資料</td></tr></table>");
        });

        let cfg = CrawlConfig {
            isin_url: server.url("/isin/single_main.jsp"),
            ..crate::config::Config::builtin().crawl
        };
        let client = IsinClient::new(&cfg).unwrap();

        let result = client.fetch_listed_date("9999").await;
        assert!(matches!(result, Err(AppError::NotFound(code)) if code == "9999"));
    }
}
