//! Settings resolution: CLI flag, then environment, then JSON config file,
//! then built-in defaults.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::platform::BuildKind;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_BASE_URL: &str =
    "http://commondatastorage.googleapis.com/chromium-browser-snapshots";
pub const DEFAULT_OFFICIAL_BASE_URL: &str = "http://master.chrome.corp.google.com/official_builds";
pub const DEFAULT_DEPS_URL: &str = "http://src.chromium.org/viewvc/chrome/trunk/src/DEPS";

pub const ENV_BASE_URL: &str = "BISECT_BASE_URL";
pub const ENV_OFFICIAL_BASE_URL: &str = "BISECT_OFFICIAL_BASE_URL";
pub const ENV_DEPS_URL: &str = "BISECT_DEPS_URL";
pub const ENV_DOWNLOAD_DIR: &str = "BISECT_DOWNLOAD_DIR";
pub const ENV_CONFIG: &str = "BISECT_CONFIG";

/// On-disk settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BisectConfig {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub official_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

/// Values given on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingOverrides<'a> {
    pub base_url: Option<&'a str>,
    pub official_base_url: Option<&'a str>,
    pub download_dir: Option<&'a Path>,
    pub config: Option<&'a Path>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_url: String,
    pub official_base_url: String,
    /// Dependency manifest queried with `?revision=N`.
    pub deps_url: String,
    /// `None` means a temporary directory for this session.
    pub download_dir: Option<PathBuf>,
}

impl Settings {
    pub fn base_url_for(&self, kind: BuildKind) -> &str {
        match kind {
            BuildKind::Snapshot => &self.base_url,
            BuildKind::Official => &self.official_base_url,
        }
    }
}

pub fn load_config(path: &Path) -> Result<BisectConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: BisectConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &BisectConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    for (field, value) in [
        ("base_url", &config.base_url),
        ("official_base_url", &config.official_base_url),
        ("deps_url", &config.deps_url),
    ] {
        if let Some(url) = value {
            validate_url(field, url)?;
        }
    }
    Ok(())
}

fn validate_url(field: &str, url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| anyhow!("{field} must be an http(s) URL, got {url:?}"))?;
    if rest.trim_matches('/').is_empty() {
        return Err(anyhow!("{field} has no host: {url:?}"));
    }
    Ok(())
}

/// Resolve every setting; `env` looks up environment variables.
pub fn resolve_settings(
    overrides: &SettingOverrides<'_>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());

    let config_path = overrides
        .config
        .map(Path::to_path_buf)
        .or_else(|| lookup(ENV_CONFIG).map(PathBuf::from));
    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => BisectConfig::default(),
    };
    if let Some(path) = &config_path {
        tracing::debug!(path = %path.display(), "loaded config");
    }

    let base_url = overrides
        .base_url
        .map(str::to_string)
        .or_else(|| lookup(ENV_BASE_URL))
        .or(config.base_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let official_base_url = overrides
        .official_base_url
        .map(str::to_string)
        .or_else(|| lookup(ENV_OFFICIAL_BASE_URL))
        .or(config.official_base_url)
        .unwrap_or_else(|| DEFAULT_OFFICIAL_BASE_URL.to_string());
    let deps_url = lookup(ENV_DEPS_URL)
        .or(config.deps_url)
        .unwrap_or_else(|| DEFAULT_DEPS_URL.to_string());
    validate_url("base URL", &base_url)?;
    validate_url("official base URL", &official_base_url)?;
    validate_url("deps URL", &deps_url)?;

    let download_dir = overrides
        .download_dir
        .map(Path::to_path_buf)
        .or_else(|| lookup(ENV_DOWNLOAD_DIR).map(PathBuf::from))
        .or(config.download_dir);

    Ok(Settings {
        base_url,
        official_base_url,
        deps_url,
        download_dir,
    })
}
