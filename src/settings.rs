//! Persisted driver settings.
//!
//! A small JSON document whose only key this crate owns is
//! `chromedriver_path`. Any other keys found in the file are carried through
//! untouched when the path is rewritten.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{CrawlError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DriverSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chromedriver_path: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Forward-slash form of a path, used for everything written to settings.
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or empty file reads as default settings.
    pub fn load(&self) -> Result<DriverSettings> {
        if !self.path.exists() {
            return Ok(DriverSettings::default());
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| self.error(e))?;
        if raw.trim().is_empty() {
            return Ok(DriverSettings::default());
        }
        serde_json::from_str(&raw).map_err(|e| self.error(e))
    }

    /// Stored driver path, if any.
    pub fn driver_path(&self) -> Result<Option<PathBuf>> {
        Ok(self
            .load()?
            .chromedriver_path
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from))
    }

    /// Writes `path` as the stored driver path unless it is already stored.
    /// Returns whether the file was rewritten.
    pub fn remember_driver_path(&self, path: &Path) -> Result<bool> {
        let mut settings = self.load()?;
        let normalized = normalize_path(path);
        if settings.chromedriver_path.as_deref() == Some(normalized.as_str()) {
            debug!("Driver path {} already stored", normalized);
            return Ok(false);
        }

        settings.chromedriver_path = Some(normalized.clone());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.error(e))?;
            }
        }
        let body = serde_json::to_string_pretty(&settings).map_err(|e| self.error(e))?;
        fs::write(&self.path, body).map_err(|e| self.error(e))?;
        info!("Saved driver path {} to {}", normalized, self.path.display());
        Ok(true)
    }

    fn error(&self, e: impl std::fmt::Display) -> CrawlError {
        CrawlError::Settings {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}
