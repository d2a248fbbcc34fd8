//! Archive naming per platform and build kind.
//!
//! Every naming convention the catalogs and runner depend on lives in this
//! table, so adding a platform never touches the bisection logic.
use crate::error::BisectError;
use clap::ValueEnum;
use std::fmt;
use std::path::PathBuf;

/// Build archive to bisect, as accepted by `--archive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Platform {
    Linux,
    Linux64,
    #[value(name = "linux-arm")]
    LinuxArm,
    Mac,
    Win,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Linux64 => "linux64",
            Platform::LinuxArm => "linux-arm",
            Platform::Mac => "mac",
            Platform::Win => "win",
        }
    }

    pub fn is_linux(&self) -> bool {
        matches!(
            self,
            Platform::Linux | Platform::Linux64 | Platform::LinuxArm
        )
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Continuous snapshot builds or official release builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    Snapshot,
    Official,
}

impl BuildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildKind::Snapshot => "snapshot",
            BuildKind::Official => "official",
        }
    }
}

/// Where a platform's archives live and what runs once extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    /// Directory holding revisions on the server, without slashes.
    pub platform_dir: &'static str,
    /// Archive file name inside each revision directory.
    pub archive_name: &'static str,
    /// Top-level directory the archive extracts into.
    pub extract_dir: &'static str,
    /// Executable path relative to `extract_dir`.
    pub binary_name: &'static str,
}

impl ArchiveLayout {
    /// Launch path relative to the extraction root.
    pub fn launch_path(&self) -> PathBuf {
        PathBuf::from(self.extract_dir).join(self.binary_name)
    }
}

/// Resolve the archive layout for a platform and build kind.
pub fn archive_layout(platform: Platform, kind: BuildKind) -> Result<ArchiveLayout, BisectError> {
    let layout = match (kind, platform) {
        (BuildKind::Snapshot, Platform::Linux) => linux_snapshot("Linux"),
        (BuildKind::Snapshot, Platform::Linux64) => linux_snapshot("Linux_x64"),
        (BuildKind::Snapshot, Platform::LinuxArm) => linux_snapshot("Linux_ARM_Cross-Compile"),
        (BuildKind::Snapshot, Platform::Mac) => ArchiveLayout {
            platform_dir: "Mac",
            archive_name: "chrome-mac.zip",
            extract_dir: "chrome-mac",
            binary_name: "Chromium.app/Contents/MacOS/Chromium",
        },
        (BuildKind::Snapshot, Platform::Win) => win_layout("Win"),
        (BuildKind::Official, Platform::Linux) => ArchiveLayout {
            platform_dir: "lucid32bit",
            archive_name: "chrome-lucid32bit.zip",
            extract_dir: "chrome-lucid32bit",
            binary_name: "chrome",
        },
        (BuildKind::Official, Platform::Linux64) => ArchiveLayout {
            platform_dir: "lucid64bit",
            archive_name: "chrome-lucid64bit.zip",
            extract_dir: "chrome-lucid64bit",
            binary_name: "chrome",
        },
        (BuildKind::Official, Platform::Mac) => ArchiveLayout {
            platform_dir: "mac",
            archive_name: "chrome-mac.zip",
            extract_dir: "chrome-mac",
            binary_name: "Google Chrome.app/Contents/MacOS/Google Chrome",
        },
        (BuildKind::Official, Platform::Win) => win_layout("win"),
        (BuildKind::Official, Platform::LinuxArm) => {
            return Err(BisectError::UnsupportedPlatform {
                platform: platform.to_string(),
                kind: kind.as_str().to_string(),
            })
        }
    };
    Ok(layout)
}

fn linux_snapshot(platform_dir: &'static str) -> ArchiveLayout {
    ArchiveLayout {
        platform_dir,
        archive_name: "chrome-linux.zip",
        extract_dir: "chrome-linux",
        binary_name: "chrome",
    }
}

fn win_layout(platform_dir: &'static str) -> ArchiveLayout {
    ArchiveLayout {
        platform_dir,
        archive_name: "chrome-win32.zip",
        extract_dir: "chrome-win32",
        binary_name: "chrome.exe",
    }
}
