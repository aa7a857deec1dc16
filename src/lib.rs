//! Scraper for the CMS Measures Inventory Tool (CMIT) portal.
//!
//! Acquires a Chrome session, walks every configured section page for each
//! requested measure, and exports the collected records as one flat CSV.

pub mod config;
pub mod crawler;
pub mod download;
pub mod driver;
pub mod errors;
pub mod export;
pub mod extract;
pub mod flatten;
pub mod ids;
pub mod logging;
pub mod pages;
pub mod progress;
pub mod record;
pub mod session;
pub mod settings;

pub use crawler::{CrawlSummary, Crawler};
pub use errors::{CrawlError, Result};
pub use flatten::{flatten, Table};
pub use record::{FieldValue, Record};
