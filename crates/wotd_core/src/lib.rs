//! Publishes "Word of the day" entries from monthly archive pages as
//! individual protected day pages, then retires the archive page.

pub mod calendar;
pub mod config;
pub mod day;
pub mod mediawiki;
pub mod month;
pub mod split;
pub mod titles;
