//! Browser session seam and its headless Chrome implementation.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info};

use crate::errors::{CrawlError, Result};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) \
    Chrome/114.0.5735.199 Safari/537.36 Edge/114.0.1823.79";

pub const WINDOW_SIZE: (u32, u32) = (1920, 1080);

// Runs before any page script so the automation flag is never observable.
const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
    });
    window.chrome = window.chrome || { runtime: {} };
"#;

// True once the indicator is gone or no longer rendered.
const READY_PROBE: &str = r#"
    (function(selector) {
        const el = document.querySelector(selector);
        if (!el) { return true; }
        const style = window.getComputedStyle(el);
        return style.display === 'none'
            || style.visibility === 'hidden'
            || el.getClientRects().length === 0;
    })"#;

/// A navigable page the crawl orchestrator drives.
///
/// Methods take `&mut self`: a session serves exactly one logical worker.
pub trait PageSession {
    fn navigate(&mut self, url: &str) -> Result<()>;
    fn reload(&mut self) -> Result<()>;
    /// Whether the element matched by `indicator` is absent or invisible.
    fn is_ready(&mut self, indicator: &str) -> Result<bool>;
    /// Rendered HTML of the current page.
    fn content(&mut self) -> Result<String>;
    /// URL of the current page after redirects.
    fn current_url(&mut self) -> String;
}

impl<S: PageSession + ?Sized> PageSession for Box<S> {
    fn navigate(&mut self, url: &str) -> Result<()> {
        (**self).navigate(url)
    }
    fn reload(&mut self) -> Result<()> {
        (**self).reload()
    }
    fn is_ready(&mut self, indicator: &str) -> Result<bool> {
        (**self).is_ready(indicator)
    }
    fn content(&mut self) -> Result<String> {
        (**self).content()
    }
    fn current_url(&mut self) -> String {
        (**self).current_url()
    }
}

/// Fixed browser configuration applied to every launched session.
#[derive(Debug, Clone)]
pub struct LaunchProfile {
    pub headless: bool,
    pub window_size: (u32, u32),
    pub user_agent: String,
    pub idle_timeout: Duration,
}

impl LaunchProfile {
    pub fn new(headless: bool) -> Self {
        Self {
            headless,
            window_size: WINDOW_SIZE,
            user_agent: USER_AGENT.to_string(),
            idle_timeout: Duration::from_secs(300),
        }
    }

    /// Command-line switches passed to Chrome.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.headless {
            // Chrome >= 118 understands the first, older builds the second.
            args.push("--headless=new".to_string());
            args.push("--headless".to_string());
        }
        args.push(format!(
            "--window-size={},{}",
            self.window_size.0, self.window_size.1
        ));
        for flag in [
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-background-networking",
            "--disable-default-apps",
            "--disable-logging",
            "--disable-sync",
            "--metrics-recording-only",
            "--disable-component-update",
            "--no-first-run",
            "--disable-popup-blocking",
            "--disable-extensions",
            "--disable-blink-features=AutomationControlled",
            "--disable-infobars",
        ] {
            args.push(flag.to_string());
        }
        args.push(format!("--user-agent={}", self.user_agent));
        args
    }
}

/// Starts a browser from a resolved executable.
pub trait SessionLauncher {
    type Session: PageSession;

    fn launch(&self, executable: &Path, profile: &LaunchProfile) -> Result<Self::Session>;
}

/// Launches Chrome through `headless_chrome`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeLauncher;

impl SessionLauncher for ChromeLauncher {
    type Session = ChromeSession;

    fn launch(&self, executable: &Path, profile: &LaunchProfile) -> Result<ChromeSession> {
        ChromeSession::launch(executable, profile)
    }
}

/// One Chrome process and the tab every page is loaded into.
///
/// Dropping the session terminates the browser process.
pub struct ChromeSession {
    tab: Arc<Tab>,
    browser: Browser,
    executable: PathBuf,
}

impl ChromeSession {
    pub fn launch(executable: &Path, profile: &LaunchProfile) -> Result<Self> {
        let owned_args = profile.args();
        let args: Vec<&OsStr> = owned_args.iter().map(OsStr::new).collect();

        let options = LaunchOptions {
            headless: profile.headless,
            sandbox: false,
            window_size: Some(profile.window_size),
            path: Some(executable.to_path_buf()),
            idle_browser_timeout: profile.idle_timeout,
            args,
            ..Default::default()
        };

        let launch_error = |e: anyhow::Error| CrawlError::Launch {
            executable: executable.to_path_buf(),
            reason: e.to_string(),
        };

        let browser = Browser::new(options).map_err(launch_error)?;
        let tab = browser.new_tab().map_err(launch_error)?;

        tab.enable_debugger().map_err(launch_error)?;
        tab.call_method(headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument {
            source: STEALTH_SCRIPT.to_string(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })
        .map_err(launch_error)?;

        info!("Launched browser from {}", executable.display());
        Ok(Self {
            tab,
            browser,
            executable: executable.to_path_buf(),
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    fn nav_error(&self, url: &str, e: anyhow::Error) -> CrawlError {
        CrawlError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

impl PageSession for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<()> {
        debug!("Navigating to {}", url);
        self.tab.navigate_to(url).map_err(|e| self.nav_error(url, e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| self.nav_error(url, e))?;
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        let url = self.tab.get_url();
        self.tab
            .reload(false, None)
            .map_err(|e| self.nav_error(&url, e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| self.nav_error(&url, e))?;
        Ok(())
    }

    fn is_ready(&mut self, indicator: &str) -> Result<bool> {
        let selector = serde_json::to_string(indicator)
            .map_err(|e| CrawlError::Extraction(e.to_string()))?;
        let script = format!("{READY_PROBE}({selector})");
        let url = self.tab.get_url();
        let result = self
            .tab
            .evaluate(&script, false)
            .map_err(|e| self.nav_error(&url, e))?;
        Ok(result
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    fn content(&mut self) -> Result<String> {
        let url = self.tab.get_url();
        self.tab.get_content().map_err(|e| self.nav_error(&url, e))
    }

    fn current_url(&mut self) -> String {
        self.tab.get_url()
    }
}

// The Chrome process is killed when `browser` drops right after this.
impl Drop for ChromeSession {
    fn drop(&mut self) {
        debug!("Closing browser {}", self.executable.display());
    }
}
