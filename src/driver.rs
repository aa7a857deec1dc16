//! Driver acquisition chain.
//!
//! Tries explicit path, persisted settings, environment variable, the
//! browser crate's own discovery and finally a Chrome for Testing download,
//! in that order. The first executable that launches wins. Paths found by
//! discovery or download are written back to settings so the next run starts
//! at the persisted step.

use std::fmt;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::ResolverConfig;
use crate::download::{download_chrome, DownloadTarget};
use crate::errors::{CrawlError, Result, StrategyFailure};
use crate::session::{LaunchProfile, SessionLauncher};
use crate::settings::SettingsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveStrategy {
    Explicit,
    Persisted,
    EnvVar,
    Managed,
    ManualDownload,
}

impl ResolveStrategy {
    pub const ALL: [ResolveStrategy; 5] = [
        ResolveStrategy::Explicit,
        ResolveStrategy::Persisted,
        ResolveStrategy::EnvVar,
        ResolveStrategy::Managed,
        ResolveStrategy::ManualDownload,
    ];

    /// Whether a path found by this strategy is written back to settings.
    pub fn persists(self) -> bool {
        matches!(self, Self::Managed | Self::ManualDownload)
    }
}

impl fmt::Display for ResolveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit path"),
            Self::Persisted => write!(f, "persisted settings"),
            Self::EnvVar => write!(f, "environment variable"),
            Self::Managed => write!(f, "browser discovery"),
            Self::ManualDownload => write!(f, "manual download"),
        }
    }
}

/// A launched session together with how it was found.
pub struct Acquired<S> {
    pub session: S,
    pub executable: PathBuf,
    pub strategy: ResolveStrategy,
    pub persisted: bool,
}

pub struct DriverResolver<L> {
    config: ResolverConfig,
    settings: SettingsStore,
    launcher: L,
}

impl<L: SessionLauncher> DriverResolver<L> {
    pub fn new(config: ResolverConfig, launcher: L) -> Self {
        let settings = SettingsStore::new(config.settings_path.clone());
        Self {
            config,
            settings,
            launcher,
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Resolves an executable and launches it with the fixed profile.
    pub async fn acquire(&self, headless: bool) -> Result<Acquired<L::Session>> {
        let profile = LaunchProfile::new(headless);
        let mut attempts = Vec::new();

        for &strategy in &self.config.strategies {
            let executable = match self.resolve(strategy).await {
                Ok(path) => path,
                Err(reason) => {
                    warn!("Driver strategy '{}' unavailable: {}", strategy, reason);
                    attempts.push(StrategyFailure { strategy, reason });
                    continue;
                }
            };

            let session = match self.launcher.launch(&executable, &profile) {
                Ok(session) => session,
                Err(e) => {
                    let reason = e.to_string();
                    warn!("Driver strategy '{}' failed: {}", strategy, reason);
                    attempts.push(StrategyFailure { strategy, reason });
                    continue;
                }
            };

            info!("Using {} from {}", executable.display(), strategy);
            let persisted = if strategy.persists() {
                match self.settings.remember_driver_path(&executable) {
                    Ok(written) => written,
                    Err(e) => {
                        warn!("Could not persist driver path: {}", e);
                        false
                    }
                }
            } else {
                false
            };

            return Ok(Acquired {
                session,
                executable,
                strategy,
                persisted,
            });
        }

        Err(CrawlError::DriverUnavailable { attempts })
    }

    /// A single strategy's attempt to produce an executable path.
    pub async fn resolve(&self, strategy: ResolveStrategy) -> std::result::Result<PathBuf, String> {
        match strategy {
            ResolveStrategy::Explicit => {
                let path = self
                    .config
                    .explicit_path
                    .clone()
                    .ok_or_else(|| "no path given".to_string())?;
                existing_file(path)
            }
            ResolveStrategy::Persisted => {
                let path = self
                    .settings
                    .driver_path()
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| {
                        format!("no chromedriver_path in {}", self.settings.path().display())
                    })?;
                existing_file(path)
            }
            ResolveStrategy::EnvVar => {
                let value = self
                    .config
                    .env
                    .get(&self.config.env_var)
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| format!("{} is not set", self.config.env_var))?;
                existing_file(PathBuf::from(value))
            }
            ResolveStrategy::Managed => (self.config.managed_locator)().and_then(existing_file),
            ResolveStrategy::ManualDownload => {
                let target =
                    DownloadTarget::for_host(&self.config.manifest_url, self.config.cache_root.clone())
                        .ok_or_else(|| {
                            format!(
                                "no Chrome for Testing build for {}/{}",
                                std::env::consts::OS,
                                std::env::consts::ARCH
                            )
                        })?;
                download_chrome(&target).await
            }
        }
    }
}

fn existing_file(path: PathBuf) -> std::result::Result<PathBuf, String> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("{} does not exist", path.display()))
    }
}
