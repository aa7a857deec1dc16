//! Chrome for Testing download, the last resort of the driver chain.
//!
//! Fetches the "last known good versions" manifest, picks the Stable build
//! for this platform and unpacks it into a per-version cache directory.

use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

pub const DEFAULT_MANIFEST_URL: &str =
    "https://googlechromelabs.github.io/chrome-for-testing/last-known-good-versions-with-downloads.json";

#[derive(Debug, Deserialize)]
struct Manifest {
    channels: Channels,
}

#[derive(Debug, Deserialize)]
struct Channels {
    #[serde(rename = "Stable")]
    stable: Option<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    version: String,
    downloads: Downloads,
}

#[derive(Debug, Deserialize)]
struct Downloads {
    #[serde(default)]
    chrome: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    platform: String,
    url: String,
}

/// Where and for which platform a download is performed.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub manifest_url: String,
    pub cache_root: PathBuf,
    pub platform: String,
}

impl DownloadTarget {
    /// Target for the running OS, or `None` on an unsupported platform.
    pub fn for_host(manifest_url: &str, cache_root: PathBuf) -> Option<Self> {
        Some(Self {
            manifest_url: manifest_url.to_string(),
            cache_root,
            platform: host_platform()?.to_string(),
        })
    }
}

pub fn host_platform() -> Option<&'static str> {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("macos", "aarch64") => Some("mac-arm64"),
        ("macos", "x86_64") => Some("mac-x64"),
        ("linux", "x86_64") => Some("linux64"),
        ("windows", "x86_64") => Some("win64"),
        ("windows", "x86") => Some("win32"),
        _ => None,
    }
}

/// Default cache root, `<user cache>/cmit-crawler/chrome`.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cmit-crawler")
        .join("chrome")
}

/// Executable location inside an unpacked Chrome for Testing archive.
pub fn chrome_binary_path(version_dir: &Path, platform: &str) -> PathBuf {
    match platform {
        "mac-arm64" | "mac-x64" => version_dir
            .join(format!("chrome-{platform}"))
            .join("Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
        "win64" | "win32" => version_dir.join(format!("chrome-{platform}")).join("chrome.exe"),
        _ => version_dir.join(format!("chrome-{platform}")).join("chrome"),
    }
}

/// Downloads (or reuses) the Stable Chrome build and returns its executable.
pub async fn download_chrome(target: &DownloadTarget) -> Result<PathBuf, String> {
    debug!("Fetching version manifest {}", target.manifest_url);
    let manifest_text = reqwest::get(&target.manifest_url)
        .await
        .map_err(|e| format!("manifest request failed: {e}"))?
        .error_for_status()
        .map_err(|e| format!("manifest request failed: {e}"))?
        .text()
        .await
        .map_err(|e| format!("manifest read failed: {e}"))?;
    let manifest: Manifest =
        serde_json::from_str(&manifest_text).map_err(|e| format!("manifest parse failed: {e}"))?;

    let channel = manifest
        .channels
        .stable
        .ok_or_else(|| "manifest has no Stable channel".to_string())?;
    let asset = channel
        .downloads
        .chrome
        .iter()
        .find(|a| a.platform == target.platform)
        .ok_or_else(|| format!("no chrome asset for {}", target.platform))?;

    let version_dir = target.cache_root.join(&channel.version);
    let binary = chrome_binary_path(&version_dir, &target.platform);
    if binary.is_file() {
        info!("Reusing cached Chrome {} at {}", channel.version, binary.display());
        return Ok(binary);
    }

    info!("Downloading Chrome {} for {}", channel.version, target.platform);
    let archive = reqwest::get(&asset.url)
        .await
        .map_err(|e| format!("chrome download failed: {e}"))?
        .error_for_status()
        .map_err(|e| format!("chrome download failed: {e}"))?
        .bytes()
        .await
        .map_err(|e| format!("chrome download read failed: {e}"))?;

    reset_version_dir(&version_dir)?;
    extract_zip_to_dir(&archive, &version_dir)?;

    if !binary.is_file() {
        return Err(format!(
            "archive did not contain {}",
            binary.strip_prefix(&version_dir).unwrap_or(&binary).display()
        ));
    }
    Ok(binary)
}

/// Empties `version_dir` so a fresh unpack never mixes with a partial one.
fn reset_version_dir(version_dir: &Path) -> Result<(), String> {
    if version_dir.exists() {
        fs::remove_dir_all(version_dir).map_err(|e| {
            format!("could not clear stale cache {}: {e}", version_dir.display())
        })?;
    }
    fs::create_dir_all(version_dir).map_err(|e| format!("cache dir create failed: {e}"))
}

fn extract_zip_to_dir(zip_bytes: &[u8], destination: &Path) -> Result<(), String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(zip_bytes)).map_err(|e| format!("zip open failed: {e}"))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| format!("zip entry failed: {e}"))?;
        let Some(safe_path) = file.enclosed_name() else {
            continue;
        };
        let out_path = destination.join(safe_path);
        if file.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| format!("dir create failed: {e}"))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("dir create failed: {e}"))?;
        }
        let mut out = File::create(&out_path).map_err(|e| format!("file create failed: {e}"))?;
        std::io::copy(&mut file, &mut out).map_err(|e| format!("file write failed: {e}"))?;

        #[cfg(unix)]
        {
            if let Some(mode) = file.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))
                    .map_err(|e| format!("chmod failed for {}: {e}", out_path.display()))?;
            }
        }
    }
    Ok(())
}
