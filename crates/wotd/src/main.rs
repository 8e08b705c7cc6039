use std::io;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wotd_core::calendar::run_calendar;
use wotd_core::config::{RunConfig, WikiSettings};
use wotd_core::mediawiki::{MediaWikiClient, WikiSite};

#[derive(Debug, Parser)]
#[command(
    name = "wotd",
    version,
    about = "Split monthly Word of the Day archives into protected day pages"
)]
struct Cli {
    #[arg(long, help = "Save edits to the wiki (default is a dry run)")]
    live: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing();

    let config = RunConfig::from_env(!cli.live)?;
    if config.dry_run {
        info!("*** DRY RUN MODE: no edits will be made. Use --live to save. ***");
    } else {
        info!("*** LIVE MODE: edits will be saved to the wiki! ***");
    }

    let settings = WikiSettings::from_env();
    let site = MediaWikiClient::new(settings.clone())?;
    login(&site, &settings, config.dry_run)?;

    let today = chrono::Local::now().date_naive();
    run_calendar(&site, &config, today);
    info!(requests = site.request_count(), "script finished");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Every event is written under this lock, so concurrent day workers never interleave.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(Mutex::new(io::stderr()))
        .init();
}

fn login(site: &MediaWikiClient, settings: &WikiSettings, dry_run: bool) -> Result<()> {
    match settings.credentials() {
        Some((username, password)) => site
            .login(username, password)
            .with_context(|| format!("login failed for {username}")),
        None if dry_run => {
            warn!("WIKI_BOT_USER/WIKI_BOT_PASS not set, reading anonymously");
            Ok(())
        }
        None => bail!("WIKI_BOT_USER and WIKI_BOT_PASS are required for --live"),
    }
}
