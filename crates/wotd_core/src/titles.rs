use std::cmp::Ordering;
use std::fmt;

use anyhow::{Context, Result, bail};
use chrono::{Datelike, Month, NaiveDate};
use serde::{Serialize, Serializer};

pub const PAGE_PREFIX: &str = "Wiktionary:Word of the day";
pub const ARCHIVE_TEMPLATE: &str = "WOTD month archive";
pub const PROTECT_REASON: &str = "Protecting created Word of the Day page.";
pub const PROTECTION_LEVEL: &str = "sysop";

/// A calendar month addressed by year and full month name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonthId {
    pub year: i32,
    pub month: Month,
}

impl MonthId {
    pub fn new(year: i32, month: Month) -> Self {
        Self { year, month }
    }

    pub fn from_number(year: i32, month: u32) -> Result<Self> {
        let month = u8::try_from(month)
            .ok()
            .and_then(|value| Month::try_from(value).ok())
            .ok_or_else(|| anyhow::anyhow!("month number out of range: {month}"))?;
        Ok(Self { year, month })
    }

    pub fn containing(date: NaiveDate) -> Self {
        // month() is always 1..=12 for a valid NaiveDate
        let month = Month::try_from(date.month() as u8).unwrap_or(Month::January);
        Self {
            year: date.year(),
            month,
        }
    }

    /// Parse a `YYYY-MM` value.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let Some((year, month)) = trimmed.split_once('-') else {
            bail!("expected YYYY-MM, got `{trimmed}`");
        };
        let year = year
            .parse::<i32>()
            .with_context(|| format!("invalid year in `{trimmed}`"))?;
        let month = month
            .parse::<u32>()
            .with_context(|| format!("invalid month in `{trimmed}`"))?;
        Self::from_number(year, month)
    }

    pub fn month_name(&self) -> &'static str {
        self.month.name()
    }

    pub fn month_number(&self) -> u32 {
        self.month.number_from_month()
    }

    pub fn next(&self) -> Self {
        let year = if self.month == Month::December {
            self.year + 1
        } else {
            self.year
        };
        Self {
            year,
            month: self.month.succ(),
        }
    }

    pub fn archive_title(&self) -> String {
        format!("{PAGE_PREFIX}/Archive/{}/{}", self.year, self.month_name())
    }

    pub fn day_title(&self, day: u32) -> String {
        format!("{PAGE_PREFIX}/{}/{} {day}", self.year, self.month_name())
    }

    pub fn create_summary(&self) -> String {
        format!(
            "Creating Word of the Day page from the {} {} archive.",
            self.month_name(),
            self.year
        )
    }

    pub fn archive_summary(&self) -> String {
        format!(
            "Archiving WOTD source page for {} {}.",
            self.month_name(),
            self.year
        )
    }

    /// Replacement text for an archive page once all of its days are published.
    pub fn archive_text(&self) -> String {
        format!("{{{{{ARCHIVE_TEMPLATE}|{}|{{{{SUBPAGENAME}}}}}}}}", self.year)
    }
}

impl Ord for MonthId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.year, self.month_number()).cmp(&(other.year, other.month_number()))
    }
}

impl PartialOrd for MonthId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MonthId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.month_name(), self.year)
    }
}

impl Serialize for MonthId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:04}-{:02}", self.year, self.month_number()))
    }
}

/// Inclusive range of months, walked oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthRange {
    pub start: MonthId,
    pub end: MonthId,
}

impl MonthRange {
    pub fn new(start: MonthId, end: MonthId) -> Result<Self> {
        if start > end {
            bail!("month range starts after it ends: {start} > {end}");
        }
        Ok(Self { start, end })
    }

    pub fn months(&self) -> impl Iterator<Item = MonthId> + use<> {
        let end = self.end;
        std::iter::successors(Some(self.start), |current| Some(current.next()))
            .take_while(move |current| *current <= end)
    }
}
