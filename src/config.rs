use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const APP_DIR: &str = "nebula";
const STATE_FILE: &str = "state.json";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub library_folders: Vec<PathBuf>,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_min_duration_ms")]
    pub min_duration_ms: u64,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

fn default_refresh_interval_secs() -> u64 {
    5 * 60
}

fn default_min_duration_ms() -> u64 {
    10_000
}

fn default_recent_limit() -> usize {
    50
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            library_folders: Vec::new(),
            refresh_interval_secs: default_refresh_interval_secs(),
            min_duration_ms: default_min_duration_ms(),
            recent_limit: default_recent_limit(),
        }
    }
}

impl Settings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("NEBULA_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn state_path() -> Result<PathBuf> {
    Ok(config_root()?.join(STATE_FILE))
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_root()?.join(SETTINGS_FILE))
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let root = config_root()?;
    fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(root)
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(&settings_path()?)
}

pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    match serde_json::from_str(&raw) {
        Ok(settings) => Ok(settings),
        Err(err) => {
            warn!("ignoring unparsable settings file {}: {err}", path.display());
            Ok(Settings::default())
        }
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    ensure_config_dir()?;
    save_settings_to(&settings_path()?, settings)
}

pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<()> {
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    strip_windows_verbatim_prefix(&canonical)
}

pub fn strip_windows_verbatim_prefix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();

    if let Some(trimmed) = raw.strip_prefix(r"\\?\UNC\") {
        return PathBuf::from(format!(r"\\{trimmed}"));
    }

    if let Some(trimmed) = raw.strip_prefix(r"\\?\") {
        return PathBuf::from(trimmed);
    }

    path.to_path_buf()
}

pub fn normalized_path_key(path: &Path) -> String {
    let normalized = normalize_path(path);
    let value = normalized.to_string_lossy();
    if cfg!(windows) {
        value.to_ascii_lowercase()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn settings_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE);

        let settings = Settings {
            library_folders: vec![PathBuf::from("/music")],
            refresh_interval_secs: 60,
            ..Settings::default()
        };
        save_settings_to(&path, &settings).expect("save");
        let loaded = load_settings_from(&path).expect("load");
        assert_eq!(loaded, settings);
        assert_eq!(loaded.refresh_interval(), Duration::from_secs(60));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, r#"{ "library_folders": ["/a"] }"#).expect("write");

        let loaded = load_settings_from(&path).expect("load");
        assert_eq!(loaded.library_folders, vec![PathBuf::from("/a")]);
        assert_eq!(loaded.min_duration_ms, 10_000);
        assert_eq!(loaded.recent_limit, 50);
        assert_eq!(loaded.refresh_interval(), Duration::from_secs(300));
    }

    #[test]
    fn corrupt_settings_fall_back_to_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{ not json").expect("write");

        assert_eq!(load_settings_from(&path).expect("load"), Settings::default());
    }

    #[test]
    fn config_root_honours_override() {
        let dir = tempdir().expect("tempdir");
        unsafe {
            env::set_var("NEBULA_CONFIG_DIR", dir.path().to_string_lossy().as_ref());
        }

        assert_eq!(state_path().expect("state path"), dir.path().join(STATE_FILE));
        assert_eq!(
            settings_path().expect("settings path"),
            dir.path().join(SETTINGS_FILE)
        );
    }

    #[test]
    fn strips_windows_verbatim_prefix() {
        let cleaned = strip_windows_verbatim_prefix(Path::new(r"\\?\E:\LOCALMUSIC\a.mp3"));
        assert_eq!(cleaned, PathBuf::from(r"E:\LOCALMUSIC\a.mp3"));
    }
}
