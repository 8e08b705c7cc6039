use std::env;

use anyhow::{Context, Result};
use chrono::Month;

use crate::titles::{MonthId, MonthRange};

pub const DEFAULT_API_URL: &str = "https://en.wiktionary.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "wotd-archiver/0.1";

pub const DEFAULT_START: MonthId = MonthId {
    year: 2006,
    month: Month::January,
};
pub const DEFAULT_END: MonthId = MonthId {
    year: 2011,
    month: Month::December,
};

/// Everything a run needs, fixed before the first month is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub range: MonthRange,
    pub dry_run: bool,
    /// Upper bound on concurrent day workers; `None` runs one per day.
    pub max_workers: Option<usize>,
}

impl RunConfig {
    pub fn new(dry_run: bool) -> Self {
        Self {
            range: MonthRange {
                start: DEFAULT_START,
                end: DEFAULT_END,
            },
            dry_run,
            max_workers: None,
        }
    }

    /// Defaults with `WOTD_START_MONTH`, `WOTD_END_MONTH` and `WOTD_MAX_WORKERS` applied.
    pub fn from_env(dry_run: bool) -> Result<Self> {
        Self::from_lookup(dry_run, |key| env::var(key).ok())
    }

    fn from_lookup(dry_run: bool, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let start = match non_empty(lookup("WOTD_START_MONTH")) {
            Some(value) => MonthId::parse(&value).context("invalid WOTD_START_MONTH")?,
            None => DEFAULT_START,
        };
        let end = match non_empty(lookup("WOTD_END_MONTH")) {
            Some(value) => MonthId::parse(&value).context("invalid WOTD_END_MONTH")?,
            None => DEFAULT_END,
        };
        let max_workers = non_empty(lookup("WOTD_MAX_WORKERS"))
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0);

        Ok(Self {
            range: MonthRange::new(start, end)?,
            dry_run,
            max_workers,
        })
    }
}

/// Endpoint, politeness and credential settings for the MediaWiki client.
#[derive(Debug, Clone)]
pub struct WikiSettings {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl WikiSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| {
            non_empty(lookup(key)).unwrap_or_else(|| default.to_string())
        };
        let number = |key: &str, default: u64| {
            non_empty(lookup(key))
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(default)
        };
        Self {
            api_url: text("WIKI_API_URL", DEFAULT_API_URL),
            user_agent: text("WIKI_USER_AGENT", DEFAULT_USER_AGENT),
            timeout_ms: number("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: number("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: number("WIKI_RATE_LIMIT_WRITE", 1_000),
            username: non_empty(lookup("WIKI_BOT_USER")),
            password: non_empty(lookup("WIKI_BOT_PASS")),
        }
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
