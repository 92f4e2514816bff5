//! ffmpeg / ffprobe discovery
//!
//! Searches PATH first, then the usual per-platform install locations.
//! Paths can be overridden manually for non-standard installs.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use super::process::run_with_timeout;

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Locations of the external tools, if found
#[derive(Debug, Clone, Default)]
pub struct ToolLocator {
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
}

impl ToolLocator {
    /// Search for both tools immediately
    pub fn new() -> Self {
        let mut locator = Self::default();
        locator.refresh();
        locator
    }

    /// Re-run the search (e.g. after the user installs ffmpeg)
    pub fn refresh(&mut self) {
        self.ffmpeg = find_executable("ffmpeg");
        self.ffprobe = find_executable("ffprobe");
        match (&self.ffmpeg, &self.ffprobe) {
            (Some(m), Some(p)) => {
                log::info!("found ffmpeg at {:?}, ffprobe at {:?}", m, p)
            }
            _ => log::warn!(
                "ffmpeg tools incomplete (ffmpeg: {}, ffprobe: {})",
                self.ffmpeg.is_some(),
                self.ffprobe.is_some()
            ),
        }
    }

    pub fn ffmpeg_path(&self) -> Option<&Path> {
        self.ffmpeg.as_deref()
    }

    pub fn ffprobe_path(&self) -> Option<&Path> {
        self.ffprobe.as_deref()
    }

    pub fn ffmpeg_available(&self) -> bool {
        self.ffmpeg.is_some()
    }

    pub fn ffprobe_available(&self) -> bool {
        self.ffprobe.is_some()
    }

    /// Override the ffmpeg path; ignored if the file does not exist
    pub fn set_ffmpeg_path(&mut self, path: PathBuf) {
        if path.is_file() {
            self.ffmpeg = Some(path);
        }
    }

    /// Override the ffprobe path; ignored if the file does not exist
    pub fn set_ffprobe_path(&mut self, path: PathBuf) {
        if path.is_file() {
            self.ffprobe = Some(path);
        }
    }

    /// First line of `ffmpeg -version`, empty if unavailable
    pub fn ffmpeg_version(&self) -> String {
        self.ffmpeg
            .as_deref()
            .map(tool_version)
            .unwrap_or_default()
    }

    /// First line of `ffprobe -version`, empty if unavailable
    pub fn ffprobe_version(&self) -> String {
        self.ffprobe
            .as_deref()
            .map(tool_version)
            .unwrap_or_default()
    }
}

fn tool_version(path: &Path) -> String {
    let mut cmd = Command::new(path);
    cmd.arg("-version");
    match run_with_timeout(&mut cmd, VERSION_TIMEOUT) {
        Ok(out) if out.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn executable_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

fn find_executable(base: &str) -> Option<PathBuf> {
    let name = executable_name(base);

    // PATH first
    if let Some(path_env) = env::var_os("PATH") {
        for dir in env::split_paths(&path_env) {
            let candidate = dir.join(&name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    // Common install locations per platform
    let fallback_dirs: &[&str] = if cfg!(target_os = "macos") {
        // Homebrew (Intel and ARM), MacPorts
        &["/usr/local/bin", "/opt/homebrew/bin", "/opt/local/bin"]
    } else if cfg!(windows) {
        &["C:\\Program Files\\ffmpeg\\bin", "C:\\ffmpeg\\bin"]
    } else {
        &["/usr/bin", "/usr/local/bin"]
    };

    for dir in fallback_dirs {
        let candidate = Path::new(dir).join(&name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    None
}
