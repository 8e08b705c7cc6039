use serde::Serialize;
use tracing::{error, info};

use crate::mediawiki::{WikiSite, protection_level};
use crate::titles::{MonthId, PROTECT_REASON, PROTECTION_LEVEL};

/// One day page to publish, plus the month-wide context it runs with.
#[derive(Debug, Clone)]
pub struct PageTask {
    pub month: MonthId,
    pub day: u32,
    pub content: String,
    pub dry_run: bool,
    pub create_summary: String,
}

impl PageTask {
    pub fn title(&self) -> String {
        self.month.day_title(self.day)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum CreationOutcome {
    Created,
    AlreadyExisted,
    WouldCreate,
    CheckFailed(String),
    CreationFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum ProtectionOutcome {
    Protected,
    AlreadyProtected,
    SkippedDryRun,
    NotAttempted,
    ProtectionFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayReport {
    pub day: u32,
    pub title: String,
    pub creation: CreationOutcome,
    pub protection: ProtectionOutcome,
}

/// Create and protect one day page.
///
/// Both steps check the wiki first, so running a day again after a partial
/// success only does the missing work. Failures are logged and reported,
/// never returned.
pub fn process_day<S: WikiSite + ?Sized>(site: &S, task: &PageTask) -> DayReport {
    let title = task.title();
    info!(day = task.day, title = %title, "processing day");

    let creation = ensure_created(site, task, &title);
    let protection = match &creation {
        CreationOutcome::CheckFailed(_) | CreationOutcome::CreationFailed(_) => {
            ProtectionOutcome::NotAttempted
        }
        _ if task.dry_run => {
            info!(
                day = task.day,
                title = %title,
                "DRY RUN: page would be checked and protected if necessary"
            );
            ProtectionOutcome::SkippedDryRun
        }
        _ => ensure_protected(site, task.day, &title),
    };

    DayReport {
        day: task.day,
        title,
        creation,
        protection,
    }
}

fn ensure_created<S: WikiSite + ?Sized>(site: &S, task: &PageTask, title: &str) -> CreationOutcome {
    let exists = match site.page_exists(title) {
        Ok(exists) => exists,
        Err(err) => {
            let reason = format!("{err:#}");
            error!(day = task.day, title = %title, error = %reason, "failed to check whether page exists");
            return CreationOutcome::CheckFailed(reason);
        }
    };
    if exists {
        info!(day = task.day, title = %title, "page already exists, skipping creation");
        return CreationOutcome::AlreadyExisted;
    }

    let rule = "-".repeat(25);
    info!(
        day = task.day,
        title = %title,
        "content to be saved:\n{rule}\n{}\n{rule}",
        task.content
    );
    if task.dry_run {
        return CreationOutcome::WouldCreate;
    }

    match site.edit_page(title, &task.content, &task.create_summary) {
        Ok(()) => {
            info!(day = task.day, title = %title, "new page created");
            CreationOutcome::Created
        }
        Err(err) => {
            let reason = format!("{err:#}");
            error!(day = task.day, title = %title, error = %reason, "failed to create page");
            CreationOutcome::CreationFailed(reason)
        }
    }
}

fn ensure_protected<S: WikiSite + ?Sized>(site: &S, day: u32, title: &str) -> ProtectionOutcome {
    let current = match site.protection(title) {
        Ok(current) => current,
        Err(err) => {
            let reason = format!("{err:#}");
            error!(day, title = %title, error = %reason, "failed to read page protection");
            return ProtectionOutcome::ProtectionFailed(reason);
        }
    };
    if protection_level(&current, "edit") == Some(PROTECTION_LEVEL) {
        info!(day, title = %title, "page is already correctly protected");
        return ProtectionOutcome::AlreadyProtected;
    }

    let protections = [("edit", PROTECTION_LEVEL), ("move", PROTECTION_LEVEL)];
    match site.protect(title, &protections, PROTECT_REASON) {
        Ok(()) => {
            info!(day, title = %title, "page has been protected");
            ProtectionOutcome::Protected
        }
        Err(err) => {
            let reason = format!("{err:#}");
            error!(day, title = %title, error = %reason, "failed to protect page");
            ProtectionOutcome::ProtectionFailed(reason)
        }
    }
}
