use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::driver::ResolveStrategy;

/// One failed step of the driver acquisition chain.
#[derive(Debug, Clone)]
pub struct StrategyFailure {
    pub strategy: ResolveStrategy,
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

/// Error type for driver acquisition, page crawling, extraction and export.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("{}", describe_unavailable(.attempts))]
    DriverUnavailable { attempts: Vec<StrategyFailure> },
    #[error("failed to launch {}: {reason}", .executable.display())]
    Launch { executable: PathBuf, reason: String },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("page {url} was still loading after {waited:?}")]
    ReadinessTimeout { url: String, waited: Duration },
    #[error("no element matches selector `{selector}`")]
    ElementNotFound { selector: String },
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("invalid CSS selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("failed to export results to {}: {source}", .path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("settings file {}: {reason}", .path.display())]
    Settings { path: PathBuf, reason: String },
    #[error("page spec {}: {reason}", .path.display())]
    PageSpec { path: PathBuf, reason: String },
    #[error("identifier map: {0}")]
    IdentifierMap(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, CrawlError>;

fn describe_unavailable(attempts: &[StrategyFailure]) -> String {
    let mut msg = String::from("Unable to locate, launch or download a Chrome executable.\n");
    for attempt in attempts {
        msg.push_str(&format!("  - {attempt}\n"));
    }
    msg.push_str(
        "To fix this:\n\
         \u{2022} install Chrome/Chromium manually and pass --driver-path or set CHROMEDRIVER_PATH, or\n\
         \u{2022} install Google Chrome or Chromium from your package manager so it can be discovered, or\n\
         \u{2022} allow network access (or upgrade to a newer release) so Chrome for Testing can be downloaded.",
    );
    msg
}
