use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::error::{AppError, Context, Result};

const DAILY_QUOTES_URL: &str = "https://www.twse.com.tw/exchangeReport/STOCK_DAY";
const ISIN_URL: &str = "https://isin.twse.com.tw/isin/single_main.jsp";
const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 6.0; Nexus 5 Build/MRA58N) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/89.0.4389.114 Mobile Safari/537.36";

/// Courtesy pause between consecutive monthly fetches.
const REQUEST_DELAY_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo: MongoConfig,
    pub crawl: CrawlConfig,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub url: String,
    pub database: String,
    pub tls: bool,
    pub tls_allow_invalid_certificates: bool,
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub daily_quotes_url: String,
    pub isin_url: String,
    pub user_agent: String,
    pub request_delay: Duration,
    /// Extra attempts on transport failures only; 0 keeps every failure
    /// fatal.
    pub unreachable_retries: u32,
}

impl Config {
    pub fn builtin() -> Self {
        Self {
            mongo: MongoConfig {
                url: "mongodb://localhost:27017".to_string(),
                database: "twse".to_string(),
                tls: false,
                tls_allow_invalid_certificates: false,
            },
            crawl: CrawlConfig {
                daily_quotes_url: DAILY_QUOTES_URL.to_string(),
                isin_url: ISIN_URL.to_string(),
                user_agent: USER_AGENT.to_string(),
                request_delay: Duration::from_secs(REQUEST_DELAY_SECS),
                unreachable_retries: 0,
            },
        }
    }

    /// Read configuration once at startup; the built-in defaults apply when
    /// no file exists at `path`, and fill in whatever the file omits.
    pub fn load_or_builtin(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::builtin());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let raw: RawConfig = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        raw.into_config()
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    mongodb: RawMongoConfig,
    #[serde(default)]
    crawl: RawCrawlConfig,
}

#[derive(Debug, Deserialize, Default)]
struct RawMongoConfig {
    url: Option<String>,
    database: Option<String>,
    tls: Option<bool>,
    tls_allow_invalid_certificates: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct RawCrawlConfig {
    daily_quotes_url: Option<String>,
    isin_url: Option<String>,
    user_agent: Option<String>,
    request_delay_secs: Option<u64>,
    unreachable_retries: Option<u32>,
}

impl RawConfig {
    fn into_config(self) -> Result<Config> {
        let defaults = Config::builtin();

        let config = Config {
            mongo: MongoConfig {
                url: self.mongodb.url.unwrap_or(defaults.mongo.url),
                database: self.mongodb.database.unwrap_or(defaults.mongo.database),
                tls: self.mongodb.tls.unwrap_or(defaults.mongo.tls),
                tls_allow_invalid_certificates: self
                    .mongodb
                    .tls_allow_invalid_certificates
                    .unwrap_or(defaults.mongo.tls_allow_invalid_certificates),
            },
            crawl: CrawlConfig {
                daily_quotes_url: self
                    .crawl
                    .daily_quotes_url
                    .unwrap_or(defaults.crawl.daily_quotes_url),
                isin_url: self.crawl.isin_url.unwrap_or(defaults.crawl.isin_url),
                user_agent: self.crawl.user_agent.unwrap_or(defaults.crawl.user_agent),
                request_delay: self
                    .crawl
                    .request_delay_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.crawl.request_delay),
                unreachable_retries: self
                    .crawl
                    .unreachable_retries
                    .unwrap_or(defaults.crawl.unreachable_retries),
            },
        };

        for (label, value) in [
            ("mongodb.url", &config.mongo.url),
            ("mongodb.database", &config.mongo.database),
            ("crawl.daily_quotes_url", &config.crawl.daily_quotes_url),
            ("crawl.isin_url", &config.crawl.isin_url),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::message(format!("{label} must not be empty")));
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_builtin() {
        let config = Config::load_or_builtin("does-not-exist.json").unwrap();
        assert_eq!(config.crawl.request_delay, Duration::from_secs(5));
        assert_eq!(config.mongo.database, "twse");
    }

    #[test]
    fn partial_file_merges_over_builtin_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "mongodb": { "url": "mongodb://db.example:27017", "tls": true },
                "crawl": { "request_delay_secs": 1 }
            }"#,
        )
        .unwrap();
        let config = raw.into_config().unwrap();

        assert_eq!(config.mongo.url, "mongodb://db.example:27017");
        assert!(config.mongo.tls);
        assert!(!config.mongo.tls_allow_invalid_certificates);
        assert_eq!(config.crawl.request_delay, Duration::from_secs(1));
        assert_eq!(config.crawl.isin_url, ISIN_URL);
    }

    #[test]
    fn empty_endpoint_values_are_rejected() {
        let raw: RawConfig =
            serde_json::from_str(r#"{ "mongodb": { "url": "  " } }"#).unwrap();
        assert!(raw.into_config().is_err());
    }
}
