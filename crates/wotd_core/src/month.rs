use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::day::{CreationOutcome, DayReport, PageTask, ProtectionOutcome, process_day};
use crate::mediawiki::WikiSite;
use crate::split::split_month;
use crate::titles::MonthId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum MonthStatus {
    MissingSource,
    SourceFetchFailed(String),
    NoValidSections,
    Processed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum ArchiveOutcome {
    NotReached,
    Suppressed,
    WouldArchive,
    Archived,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthReport {
    pub month: MonthId,
    pub source_title: String,
    pub status: MonthStatus,
    /// Heading labels of rejected sections: no day-entry template, or a
    /// day number already claimed by an earlier section.
    pub invalid_days: Vec<String>,
    pub days: Vec<DayReport>,
    pub archive: ArchiveOutcome,
}

impl MonthReport {
    fn new(month: MonthId) -> Self {
        Self {
            month,
            source_title: month.archive_title(),
            status: MonthStatus::Processed,
            invalid_days: Vec::new(),
            days: Vec::new(),
            archive: ArchiveOutcome::NotReached,
        }
    }
}

/// Publish every day of one monthly archive page, then archive the page.
///
/// The archive rewrite only happens when no section of the month was
/// rejected; failures while creating or protecting individual days do not
/// hold it back.
pub fn process_month<S: WikiSite + ?Sized>(
    site: &S,
    month: MonthId,
    config: &RunConfig,
) -> MonthReport {
    let mut report = MonthReport::new(month);
    let source_title = report.source_title.clone();

    let source = match site.fetch_page(&source_title) {
        Ok(Some(page)) => page,
        Ok(None) => {
            error!(title = %source_title, "source page does not exist, skipping month");
            report.status = MonthStatus::MissingSource;
            return report;
        }
        Err(err) => {
            let reason = format!("{err:#}");
            error!(title = %source_title, error = %reason, "failed to read source page, skipping month");
            report.status = MonthStatus::SourceFetchFailed(reason);
            return report;
        }
    };

    let create_summary = month.create_summary();
    let mut tasks = Vec::new();
    let mut seen_days = BTreeSet::new();
    for section in split_month(&source.content) {
        match section.day {
            Some(day) if section.has_marker && !seen_days.insert(day) => {
                warn!(
                    day = %section.label,
                    "skipping section as its day already appeared earlier on the page"
                );
                report.invalid_days.push(section.label);
            }
            Some(day) if section.has_marker => tasks.push(PageTask {
                month,
                day,
                content: section.content,
                dry_run: config.dry_run,
                create_summary: create_summary.clone(),
            }),
            _ => {
                warn!(
                    day = %section.label,
                    "skipping section as it does not contain a WOTD template"
                );
                report.invalid_days.push(section.label);
            }
        }
    }

    if tasks.is_empty() {
        warn!(title = %source_title, "no valid WOTD sections found, skipping month");
        report.status = MonthStatus::NoValidSections;
        return report;
    }

    info!(
        month = %month,
        days = tasks.len(),
        "starting concurrent processing"
    );
    report.days = dispatch_days(site, &tasks, config.max_workers);
    info!(month = %month, "concurrent tasks complete");

    report.archive = archive_source(site, month, &report.invalid_days, config.dry_run);
    report
}

fn archive_source<S: WikiSite + ?Sized>(
    site: &S,
    month: MonthId,
    invalid_days: &[String],
    dry_run: bool,
) -> ArchiveOutcome {
    if !invalid_days.is_empty() {
        error!(
            month = %month,
            invalid = %invalid_days.join(", "),
            "source page will NOT be archived because one or more sections were invalid"
        );
        return ArchiveOutcome::Suppressed;
    }

    let title = month.archive_title();
    let content = month.archive_text();
    if dry_run {
        info!(
            title = %title,
            "DRY RUN: all sections valid, would replace source page content with: {content}"
        );
        return ArchiveOutcome::WouldArchive;
    }

    match site.edit_page(&title, &content, &month.archive_summary()) {
        Ok(()) => {
            info!(month = %month, "source page has been archived");
            ArchiveOutcome::Archived
        }
        Err(err) => {
            let reason = format!("{err:#}");
            error!(month = %month, error = %reason, "could not update source page");
            ArchiveOutcome::Failed(reason)
        }
    }
}

/// Run every task on its own worker thread and wait for all of them.
///
/// `max_workers` caps the thread count; workers then pull the remaining
/// tasks from a shared cursor. Reports come back in task order.
pub fn dispatch_days<S: WikiSite + ?Sized>(
    site: &S,
    tasks: &[PageTask],
    max_workers: Option<usize>,
) -> Vec<DayReport> {
    if tasks.is_empty() {
        return Vec::new();
    }
    let workers = max_workers.map_or(tasks.len(), |cap| cap.clamp(1, tasks.len()));
    let cursor = AtomicUsize::new(0);
    let slots = tasks
        .iter()
        .map(|_| Mutex::new(None))
        .collect::<Vec<Mutex<Option<DayReport>>>>();

    let run_worker = || {
        loop {
            let index = cursor.fetch_add(1, Ordering::Relaxed);
            let Some(task) = tasks.get(index) else {
                break;
            };
            let report = process_day(site, task);
            *slots[index]
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report);
        }
    };

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for worker in 1..=workers {
            match thread::Builder::new()
                .name(format!("day-worker-{worker}"))
                .spawn_scoped(scope, &run_worker)
            {
                Ok(handle) => handles.push(handle),
                Err(err) => warn!(worker, error = %err, "failed to spawn day worker"),
            }
        }
        if handles.is_empty() {
            run_worker();
        }
        for handle in handles {
            if handle.join().is_err() {
                error!("day worker panicked");
            }
        }
    });

    slots
        .into_iter()
        .zip(tasks)
        .map(|(slot, task)| {
            slot.into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .unwrap_or_else(|| DayReport {
                    day: task.day,
                    title: task.title(),
                    creation: CreationOutcome::CheckFailed("worker panicked".to_string()),
                    protection: ProtectionOutcome::NotAttempted,
                })
        })
        .collect()
}
