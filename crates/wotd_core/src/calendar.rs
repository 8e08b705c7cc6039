use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::config::RunConfig;
use crate::mediawiki::WikiSite;
use crate::month::{MonthReport, process_month};
use crate::titles::MonthId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarReport {
    pub dry_run: bool,
    pub months: Vec<MonthReport>,
    /// First month found to lie after `today`; nothing from it onward ran.
    pub stopped_at: Option<MonthId>,
}

/// Walk the configured month range one month at a time.
pub fn run_calendar<S: WikiSite + ?Sized>(
    site: &S,
    config: &RunConfig,
    today: NaiveDate,
) -> CalendarReport {
    let current = MonthId::containing(today);
    let mut report = CalendarReport {
        dry_run: config.dry_run,
        months: Vec::new(),
        stopped_at: None,
    };

    for month in config.range.months() {
        if month > current {
            info!("{}", banner(&format!("Reached future date ({month}). Stopping.")));
            report.stopped_at = Some(month);
            break;
        }

        info!(
            "{}",
            banner(&format!(
                "PROCESSING {} {}",
                month.month_name().to_uppercase(),
                month.year
            ))
        );
        report.months.push(process_month(site, month, config));
    }

    report
}

fn banner(text: &str) -> String {
    let rule = "#".repeat(50);
    format!("\n{rule}\n### {text} ###\n{rule}")
}
