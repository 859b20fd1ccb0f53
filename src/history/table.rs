use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use log::warn;
use mongodb::bson::{doc, Bson, DateTime, Document};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::fetch::MonthlyPage;

/// Field name the exchange uses for the trading-day date column.
const DATE_FIELD: &str = "日期";

/// Column-oriented accumulation of monthly pages. Each field maps to one
/// value per trading day across the whole fetched range; row `i` of every
/// column refers to the same day. Field insertion order is preserved so the
/// emitted documents are reproducible.
#[derive(Debug, Clone, Default)]
pub struct HistoryTable {
    fields: Vec<String>,
    columns: HashMap<String, Vec<Value>>,
}

impl HistoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one monthly page, creating columns for fields not seen before.
    /// Pages must be supplied in chronological order; rows keep page order.
    /// A drifting field set is a soft condition: it is logged and the page's
    /// columns are appended as-is.
    pub fn merged(mut self, page: MonthlyPage) -> Self {
        if !self.fields.is_empty() && page.fields != self.fields && !page.fields.is_empty() {
            let added: Vec<&String> = page
                .fields
                .iter()
                .filter(|field| !self.columns.contains_key(*field))
                .collect();
            let missing: Vec<&String> = self
                .fields
                .iter()
                .filter(|field| !page.fields.contains(field))
                .collect();
            warn!("monthly page field set drifted: added {added:?}, missing {missing:?}");
        }

        for (idx, field) in page.fields.iter().enumerate() {
            if !self.columns.contains_key(field) {
                self.fields.push(field.clone());
            }
            let column = self.columns.entry(field.clone()).or_default();
            for row in &page.rows {
                column.push(row.get(idx).cloned().unwrap_or(Value::Null));
            }
        }

        self
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn column(&self, field: &str) -> Option<&[Value]> {
        self.columns.get(field).map(Vec::as_slice)
    }

    /// Longest column length. Columns only diverge after a field-set drift.
    pub fn row_count(&self) -> usize {
        self.columns.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// One flat document per row, tagged with the security code. Cells a
    /// shorter column does not cover become BSON nulls so every document is
    /// self-contained.
    pub fn general_documents(&self, stock_no: &str) -> Vec<Document> {
        let mut documents = Vec::with_capacity(self.row_count());
        for row in 0..self.row_count() {
            let mut document = doc! { "stock_no": stock_no };
            for field in &self.fields {
                document.insert(field.clone(), self.cell(field, row));
            }
            documents.push(document);
        }
        documents
    }

    /// One time-series document per row: a `metadata` sub-document carrying
    /// the security code, a `timestamp` converted from the exchange's
    /// ROC-calendar date cell, and the remaining fields as measurements. An
    /// unparseable date cell is an error rather than a silently dropped row.
    pub fn timeseries_documents(&self, stock_no: &str) -> Result<Vec<Document>> {
        let dates = self.columns.get(DATE_FIELD).ok_or_else(|| {
            AppError::Malformed(format!("history table has no `{DATE_FIELD}` column"))
        })?;

        let mut documents = Vec::with_capacity(self.row_count());
        for row in 0..self.row_count() {
            let raw = dates.get(row).and_then(Value::as_str).ok_or_else(|| {
                AppError::Malformed(format!("row {row} has no usable `{DATE_FIELD}` cell"))
            })?;
            let day = parse_roc_date(raw)?;
            let timestamp = DateTime::from_chrono(day.and_time(NaiveTime::MIN).and_utc());

            let mut document = doc! {
                "metadata": { "stock_no": stock_no },
                "timestamp": timestamp,
            };
            for field in &self.fields {
                if field == DATE_FIELD {
                    continue;
                }
                document.insert(field.clone(), self.cell(field, row));
            }
            documents.push(document);
        }
        Ok(documents)
    }

    fn cell(&self, field: &str, row: usize) -> Bson {
        self.columns
            .get(field)
            .and_then(|column| column.get(row))
            .map(json_to_bson)
            .unwrap_or(Bson::Null)
    }
}

/// ROC-calendar date as served by the exchange, e.g. `110/06/01` → 2021-06-01.
pub fn parse_roc_date(raw: &str) -> Result<NaiveDate> {
    let malformed = || AppError::Malformed(format!("unparseable trading-day date `{raw}`"));

    let parts: Vec<&str> = raw.trim().split('/').collect();
    if parts.len() != 3
        || parts
            .iter()
            .any(|part| part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(malformed());
    }

    let year: i32 = parts[0].parse().map_err(|_| malformed())?;
    let month: u32 = parts[1].parse().map_err(|_| malformed())?;
    let day: u32 = parts[2].parse().map_err(|_| malformed())?;

    NaiveDate::from_ymd_opt(year + 1911, month, day).ok_or_else(malformed)
}

/// Plain structural conversion; deliberately not extended JSON, so string
/// cells like `"1,234"` stay strings.
fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(flag) => Bson::Boolean(*flag),
        Value::Number(number) => number
            .as_i64()
            .map(Bson::Int64)
            .or_else(|| number.as_f64().map(Bson::Double))
            .unwrap_or(Bson::Null),
        Value::String(text) => Bson::String(text.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => {
            let mut document = Document::new();
            for (key, item) in map {
                document.insert(key.clone(), json_to_bson(item));
            }
            Bson::Document(document)
        }
    }
}
