//! Application paths and the read-only `AppConfig`.
//!
//! `trackplay.json` is located like every other config/data file:
//! 1. CLI `--config-dir` argument
//! 2. `TRACKPLAY_CONFIG_DIR` environment variable
//! 3. Local folder IF any config files exist (trackplay.json, trackplay.log)
//! 4. Platform-specific directory from dirs-next (default)
//!
//! The config is loaded once at startup and passed by reference; it is
//! never written back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "trackplay.json";
pub const LOG_FILE: &str = "trackplay.log";
const CONFIG_DIR_ENV: &str = "TRACKPLAY_CONFIG_DIR";
const APP_DIR: &str = "trackplay";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Create PathConfig from CLI arguments and environment variables
    ///
    /// Priority: CLI args → ENV var (TRACKPLAY_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));

        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Platform paths:
/// - Linux: ~/.config/trackplay/{name}
/// - macOS: ~/Library/Application Support/trackplay/{name}
/// - Windows: %APPDATA%\trackplay\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    get_config_dir(config).join(name)
}

/// Get path to a data file (logs, archives, etc.)
///
/// Platform paths:
/// - Linux: ~/.local/share/trackplay/{name}
/// - macOS: ~/Library/Application Support/trackplay/{name}
/// - Windows: %APPDATA%\trackplay\{name}
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    get_data_dir(config).join(name)
}

/// Ensure that the data directory exists (log files, default archives)
pub fn ensure_data_dir(config: &PathConfig) -> Result<()> {
    let data_dir = get_data_dir(config);
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }
    Ok(())
}

/// Check if any config files exist in the given directory
fn has_local_config_files(dir: &Path) -> bool {
    [CONFIG_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

/// Get the configuration directory
pub fn get_config_dir(config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::config_dir())
}

/// Get the data directory
pub fn get_data_dir(config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::data_dir())
}

fn resolve_dir(config: &PathConfig, platform: Option<PathBuf>) -> PathBuf {
    // Priority 1: Custom directory from CLI or ENV
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }

    // Priority 2: Local folder IF config files exist there
    if let Ok(current_dir) = std::env::current_dir() {
        if has_local_config_files(&current_dir) {
            return current_dir;
        }
    }

    // Priority 3: Platform-specific directory
    if let Some(dir) = platform {
        return dir.join(APP_DIR);
    }

    // Fallback: "." if everything else fails
    PathBuf::from(".")
}

/// Runtime settings. Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Playback rate; <= 0 means "as fast as possible"
    pub target_fps: f64,
    /// Wake-up margin subtracted from the pacing wait
    pub pacing_epsilon_ms: u64,
    /// Skip single undecodable frames instead of stopping
    pub skip_decode_errors: bool,
    /// Run `track()` on handed-off frames
    pub tracking_enabled: bool,
    /// Nominal fps reported by image sequences
    pub default_source_fps: f64,
    /// Extra directories scanned for `*.plugin.json` manifests
    pub plugin_dirs: Vec<PathBuf>,
    /// Algorithm activated at startup
    pub default_algorithm: Option<String>,
    /// Serialization target of the active algorithm
    pub archive_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            pacing_epsilon_ms: 5,
            skip_decode_errors: true,
            tracking_enabled: true,
            default_source_fps: 25.0,
            plugin_dirs: Vec::new(),
            default_algorithm: None,
            archive_path: None,
        }
    }
}

impl AppConfig {
    /// Parse config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `trackplay.json` from the resolved config dir; defaults if absent.
    pub fn load_or_default(paths: &PathConfig) -> Result<Self> {
        let path = config_file(CONFIG_FILE, paths);
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn pacing_epsilon(&self) -> Duration {
        Duration::from_millis(self.pacing_epsilon_ms)
    }

    /// Manifest search path: `<config dir>/plugins` first, then configured dirs
    pub fn plugin_search_path(&self, paths: &PathConfig) -> Vec<PathBuf> {
        let mut dirs = vec![get_config_dir(paths).join("plugins")];
        for dir in &self.plugin_dirs {
            if !dirs.contains(dir) {
                dirs.push(dir.clone());
            }
        }
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };

        assert_eq!(config_file("test.json", &config), PathBuf::from("/custom/test.json"));
        assert_eq!(data_file("trackplay.log", &config), PathBuf::from("/custom/trackplay.log"));
    }

    #[test]
    fn test_cli_dir_wins() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/from/cli")));
        assert_eq!(config.config_dir, Some(PathBuf::from("/from/cli")));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = std::env::temp_dir().join("trackplay_test_config");
        let _ = fs::create_dir_all(&dir);
        fs::write(dir.join(CONFIG_FILE), r#"{ "target_fps": 12.5, "skip_decode_errors": false }"#).unwrap();

        let paths = PathConfig { config_dir: Some(dir.clone()) };
        let config = AppConfig::load_or_default(&paths).unwrap();
        assert_eq!(config.target_fps, 12.5);
        assert!(!config.skip_decode_errors);
        assert_eq!(config.pacing_epsilon(), Duration::from_millis(5));
        assert!(config.tracking_enabled);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_config_is_default_and_bad_config_errors() {
        let dir = std::env::temp_dir().join("trackplay_test_config_bad");
        let _ = fs::remove_dir_all(&dir);
        let _ = fs::create_dir_all(&dir);
        let paths = PathConfig { config_dir: Some(dir.clone()) };
        assert_eq!(AppConfig::load_or_default(&paths).unwrap(), AppConfig::default());

        fs::write(dir.join(CONFIG_FILE), "{ not json").unwrap();
        let err = AppConfig::load_or_default(&paths).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_plugin_search_path() {
        let paths = PathConfig { config_dir: Some(PathBuf::from("/cfg")) };
        let config = AppConfig {
            plugin_dirs: vec![PathBuf::from("/extra"), PathBuf::from("/cfg/plugins")],
            ..AppConfig::default()
        };
        assert_eq!(
            config.plugin_search_path(&paths),
            vec![PathBuf::from("/cfg/plugins"), PathBuf::from("/extra")]
        );
    }
}
