use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use cmit_crawler::config::{CrawlOptions, ResolverConfig, DEFAULT_SETTINGS_FILE};
use cmit_crawler::crawler::Crawler;
use cmit_crawler::driver::DriverResolver;
use cmit_crawler::export::{export_csv, timestamped_output};
use cmit_crawler::flatten::flatten;
use cmit_crawler::ids::{build_identifier_map, load_master, load_targets};
use cmit_crawler::logging::RunLogging;
use cmit_crawler::pages::PageSpec;
use cmit_crawler::progress::{self, ProgressReceiver};
use cmit_crawler::session::ChromeLauncher;

#[derive(Debug, Parser)]
#[command(name = "cmit-crawler", version, about = "Scrape CMIT measure pages into a flat CSV")]
struct Cli {
    /// Page spec JSON (`{"page": {name: {url, css_selector}}}`)
    #[arg(long, env = "CMIT_PAGES", default_value = "cmit_pages.json")]
    pages: PathBuf,

    /// CSV with `cmit_id` and `variant_id` columns
    #[arg(long, env = "CMIT_MASTER")]
    master: PathBuf,

    /// IDs to scrape, one per line. Defaults to every master row.
    #[arg(long, env = "CMIT_TARGETS")]
    targets: Option<PathBuf>,

    #[arg(long, env = "CMIT_OUT_DIR", default_value = ".")]
    out_dir: PathBuf,

    #[arg(long, env = "CMIT_SETTINGS", default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    /// Chrome/Chromium executable to use before any discovery
    #[arg(long, env = "CMIT_DRIVER_PATH")]
    driver_path: Option<PathBuf>,

    /// Show the browser window
    #[arg(long, env = "CMIT_HEADED")]
    headed: bool,

    /// Seconds to wait for a section to finish loading
    #[arg(long, env = "CMIT_READY_TIMEOUT", default_value_t = 30)]
    ready_timeout: u64,

    /// Chrome for Testing version manifest
    #[arg(long, env = "CMIT_MANIFEST_URL")]
    manifest_url: Option<String>,

    #[arg(short, long, env = "CMIT_VERBOSE")]
    verbose: bool,

    #[arg(short, long, env = "CMIT_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

fn progress_bar(total: usize, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
        bar.set_style(style);
    }
    bar
}

async fn drive_bar(bar: ProgressBar, mut rx: ProgressReceiver) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                bar.set_position(event.index.saturating_sub(1) as u64);
                bar.set_message(event.record_id);
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
    bar.finish_and_clear();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let logging = RunLogging::init(cli.verbose, cli.quiet);

    let pages = PageSpec::load(&cli.pages).context("Failed to load page spec")?;
    let master = load_master(&cli.master).context("Failed to load master mapping")?;
    let ids = match &cli.targets {
        Some(path) => {
            let targets = load_targets(path).context("Failed to load target IDs")?;
            build_identifier_map(&master, &targets)
        }
        None => master,
    };
    info!("{} measures across {} pages", ids.len(), pages.len());

    let mut resolver_config = ResolverConfig {
        explicit_path: cli.driver_path.clone(),
        settings_path: cli.settings.clone(),
        ..ResolverConfig::default()
    };
    if let Some(url) = &cli.manifest_url {
        resolver_config.manifest_url = url.clone();
    }
    let acquired = DriverResolver::new(resolver_config, ChromeLauncher)
        .acquire(!cli.headed)
        .await?;
    info!(
        "Browser ready ({} via {})",
        acquired.executable.display(),
        acquired.strategy
    );

    let options = CrawlOptions {
        ready_timeout: Duration::from_secs(cli.ready_timeout),
        ..CrawlOptions::default()
    };
    let (tx, rx) = progress::channel();
    let bar = tokio::spawn(drive_bar(progress_bar(ids.len(), cli.quiet), rx));

    let mut crawler = Crawler::new(acquired.session, pages, options).with_progress(tx);
    let (records, summary) = crawler.crawl(&ids).await;
    // Closes the browser and the progress channel.
    drop(crawler);
    let _ = bar.await;

    let table = flatten(&records, None);
    let output = timestamped_output(&cli.out_dir);
    export_csv(&table, &output).context("Failed to export results")?;

    logging.finish(&summary);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The run's subscriber is gone by now.
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
