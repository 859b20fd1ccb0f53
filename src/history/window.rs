use std::fmt;

use chrono::{Datelike, NaiveDate};

use crate::error::{AppError, Result};

/// Oldest month the daily-quote endpoint reliably serves. Securities listed
/// earlier than this are crawled from here instead of their listing date.
pub const EARLIEST_TRACEABLE: YearMonth = YearMonth {
    year: 2010,
    month: 1,
};

/// A calendar month with no day component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month), "month out of range: {month}");
        Self { year, month }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The following calendar month; December wraps to January of the next
    /// year.
    pub fn next(self) -> Self {
        if self.month < 12 {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        } else {
            Self {
                year: self.year + 1,
                month: 1,
            }
        }
    }

    /// 8-digit request key for this month, day pinned to 01.
    pub fn date_key(self) -> String {
        format!("{:04}{:02}01", self.year, self.month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Inclusive fetch window, start ≤ end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: YearMonth,
    pub end: YearMonth,
}

impl DateWindow {
    pub fn new(start: YearMonth, end: YearMonth) -> Result<Self> {
        if start > end {
            return Err(AppError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn months(&self) -> impl Iterator<Item = YearMonth> {
        let end = self.end;
        std::iter::successors(Some(self.start), move |current| {
            let next = current.next();
            (next <= end).then_some(next)
        })
    }

    pub fn month_count(&self) -> usize {
        let months = (self.end.year - self.start.year) * 12 + self.end.month as i32
            - self.start.month as i32;
        months as usize + 1
    }
}

/// Start at the listing month or the earliest traceable month, whichever is
/// later; end at today's month. A listing date in the future surfaces as
/// `InvalidRange` rather than a panic.
pub fn resolve_window(listed_date: NaiveDate, today: NaiveDate) -> Result<DateWindow> {
    let start = YearMonth::from_date(listed_date).max(EARLIEST_TRACEABLE);
    let end = YearMonth::from_date(today);
    DateWindow::new(start, end)
}
