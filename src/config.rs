use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::download::{default_cache_root, DEFAULT_MANIFEST_URL};
use crate::driver::ResolveStrategy;

pub const DRIVER_PATH_ENV: &str = "CHROMEDRIVER_PATH";
pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

/// Loading spinner shown while the portal fetches section data.
pub const LOADING_INDICATOR: &str = "span.fa-spinner";
pub const PRIMARY_PAGE: &str = "Properties";

/// Locates a browser executable without any network access.
pub type ManagedLocator = fn() -> Result<PathBuf, String>;

/// Reads environment variables for the resolver.
#[derive(Clone)]
pub struct EnvLookup(Arc<dyn Fn(&str) -> Option<String> + Send + Sync>);

impl EnvLookup {
    /// The process environment.
    pub fn process() -> Self {
        Self(Arc::new(|key| std::env::var(key).ok()))
    }

    /// A fixed set of variables, independent of the process environment.
    pub fn fixed<K: Into<String>, V: Into<String>>(vars: impl IntoIterator<Item = (K, V)>) -> Self {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self(Arc::new(move |key| vars.get(key).cloned()))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }
}

impl Default for EnvLookup {
    fn default() -> Self {
        Self::process()
    }
}

impl fmt::Debug for EnvLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnvLookup")
    }
}

/// Inputs for the driver acquisition chain.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub explicit_path: Option<PathBuf>,
    pub settings_path: PathBuf,
    pub env_var: String,
    pub env: EnvLookup,
    pub strategies: Vec<ResolveStrategy>,
    pub managed_locator: ManagedLocator,
    pub manifest_url: String,
    pub cache_root: PathBuf,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            explicit_path: None,
            settings_path: PathBuf::from(DEFAULT_SETTINGS_FILE),
            env_var: DRIVER_PATH_ENV.to_string(),
            env: EnvLookup::process(),
            strategies: ResolveStrategy::ALL.to_vec(),
            managed_locator: headless_chrome::browser::default_executable,
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            cache_root: default_cache_root(),
        }
    }
}

/// Per-page behaviour of the crawl orchestrator.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub loading_indicator: String,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    /// Reload after navigating; the portal's hash routes only render on a fresh load.
    pub reload_after_navigate: bool,
    pub primary_page: String,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            loading_indicator: LOADING_INDICATOR.to_string(),
            ready_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            reload_after_navigate: true,
            primary_page: PRIMARY_PAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_lookup_ignores_the_process_environment() {
        let env = EnvLookup::fixed([("CHROMEDRIVER_PATH", "/opt/chrome")]);
        assert_eq!(env.get("CHROMEDRIVER_PATH").as_deref(), Some("/opt/chrome"));
        assert_eq!(env.get("PATH"), None);
    }
}
