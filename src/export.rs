use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::errors::{CrawlError, Result};
use crate::flatten::Table;

pub const OUTPUT_PREFIX: &str = "cmit_scrape_flat_";

/// `<dir>/cmit_scrape_flat_<YYYYmmdd_HHMMSS>.csv`, stamped with local time.
pub fn timestamped_output(dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("{OUTPUT_PREFIX}{stamp}.csv"))
}

pub fn export_csv(table: &Table, path: &Path) -> Result<()> {
    let wrap = |e: Box<dyn std::error::Error + Send + Sync>| CrawlError::Export {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| wrap(Box::new(e)))?;
    }

    let mut writer = csv::Writer::from_path(path).map_err(|e| wrap(Box::new(e)))?;
    writer
        .write_record(&table.columns)
        .map_err(|e| wrap(Box::new(e)))?;
    for row in &table.rows {
        writer.write_record(row).map_err(|e| wrap(Box::new(e)))?;
    }
    writer.flush().map_err(|e| wrap(Box::new(e)))?;

    info!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}
