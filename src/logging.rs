//! Run-scoped `tracing` setup.

use std::time::Instant;

use tracing::info;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

use crate::crawler::CrawlSummary;

fn default_level(verbose: bool, quiet: bool) -> &'static str {
    match (verbose, quiet) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    }
}

/// Builds the filter; `RUST_LOG` overrides the flag-derived level.
pub fn env_filter(verbose: bool, quiet: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose, quiet)))
}

/// Holds the subscriber for one run. Dropping it uninstalls the subscriber.
pub struct RunLogging {
    _guard: DefaultGuard,
    started: Instant,
}

impl RunLogging {
    pub fn init(verbose: bool, quiet: bool) -> Self {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter(verbose, quiet))
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        Self {
            _guard: guard,
            started: Instant::now(),
        }
    }

    pub fn finish(self, summary: &CrawlSummary) {
        info!(
            "Run complete in {:.1?}: {} records scraped, {} failed",
            self.started.elapsed(),
            summary.records,
            summary.failed
        );
    }
}
