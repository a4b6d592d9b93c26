use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;
use crate::rate_limit::RateWindow;

/// Longest accepted quota window: ten years.
pub const MAX_PERIOD_HOURS: f64 = 24.0 * 365.0 * 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Viewing quota: at most `max_videos` plays per trailing `period_hours`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_videos")]
    pub max_videos: u32,
    #[serde(default = "default_period_hours")]
    pub period_hours: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Input device to read, e.g. `/dev/input/event3`.
    /// Empty or absent means auto-detect.
    #[serde(default)]
    pub device_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Comma-separated DRM connectors, e.g. `0.HDMI-A-1,1.HDMI-A-2`.
    /// One player per connector; empty means a single default display.
    #[serde(default)]
    pub connectors: String,
    /// Show the recent status lines as on-screen text.
    #[serde(default)]
    pub debug_mode: bool,
    /// Image shown while nothing is playing. Generated when unset.
    #[serde(default)]
    pub baseline_image: Option<PathBuf>,
}

/// Where the daemon keeps downloaded videos, history and sounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
    #[serde(default = "default_sounds_dir")]
    pub sounds_dir: PathBuf,
    /// Base address for mpv control sockets.
    #[serde(default = "platform::default_mpv_socket")]
    pub mpv_socket: PathBuf,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_videos: default_max_videos(),
            period_hours: default_period_hours(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            history_file: default_history_file(),
            sounds_dir: default_sounds_dir(),
            mpv_socket: platform::default_mpv_socket(),
        }
    }
}

fn default_max_videos() -> u32 {
    3
}

fn default_period_hours() -> f64 {
    24.0
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cache_dir() -> PathBuf {
    platform::cache_dir().join("videos")
}

fn default_history_file() -> PathBuf {
    platform::data_dir().join("history.tsv")
}

fn default_sounds_dir() -> PathBuf {
    platform::data_dir().join("sounds")
}

impl Config {
    /// Load from the default location, writing defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        config
            .validate()
            .with_context(|| format!("Invalid settings in {}", config_path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        self.validate()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        // Readers poll this file; swap it in whole instead of truncating it.
        let tmp_path = config_path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, config_path)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.limits.max_videos == 0 {
            anyhow::bail!("max_videos must be at least 1");
        }
        if !self.limits.period_hours.is_finite() || self.limits.period_hours <= 0.0 {
            anyhow::bail!(
                "period_hours must be a positive number, got {}",
                self.limits.period_hours
            );
        }
        if self.limits.period_hours > MAX_PERIOD_HOURS {
            anyhow::bail!(
                "period_hours must be at most {}, got {}",
                MAX_PERIOD_HOURS,
                self.limits.period_hours
            );
        }
        Ok(())
    }

    pub fn rate_window(&self) -> RateWindow {
        RateWindow {
            max_videos: self.limits.max_videos,
            period_hours: self.limits.period_hours,
        }
    }

    /// Connector ids from `display.connectors`, trimmed, empties dropped.
    pub fn display_connectors(&self) -> Vec<String> {
        self.display
            .connectors
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Configured scanner device, treating an empty string as unset.
    pub fn scanner_device(&self) -> Option<&str> {
        self.scanner
            .device_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            scanner: ScannerConfig::default(),
            http: HttpConfig::default(),
            display: DisplayConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.limits.max_videos, 3);
        assert_eq!(config.limits.period_hours, 24.0);
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.bind_address, "0.0.0.0");
        assert!(config.scanner.device_path.is_none());
        assert!(!config.display.debug_mode);
        assert!(config.display_connectors().is_empty());
        assert!(config.paths.history_file.ends_with("kiosk/history.tsv"));
    }

    #[test]
    fn test_display_connectors_trims_and_skips_empty() {
        let mut config = Config::default();
        config.display.connectors = " 0.HDMI-A-1, ,1.HDMI-A-2,".to_string();
        assert_eq!(
            config.display_connectors(),
            vec!["0.HDMI-A-1".to_string(), "1.HDMI-A-2".to_string()]
        );
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = Config::default();
        config.limits.max_videos = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.period_hours = 0.0;
        assert!(config.validate().is_err());

        config.limits.period_hours = f64::NAN;
        assert!(config.validate().is_err());

        config.limits.period_hours = 1e12;
        assert!(config.validate().is_err());

        config.limits.period_hours = MAX_PERIOD_HOURS;
        assert!(config.validate().is_ok());

        config.limits.period_hours = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_scanner_device_means_autodetect() {
        let mut config = Config::default();
        config.scanner.device_path = Some("   ".to_string());
        assert_eq!(config.scanner_device(), None);
        config.scanner.device_path = Some("/dev/input/event0".to_string());
        assert_eq!(config.scanner_device(), Some("/dev/input/event0"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("[limits]\nmax_videos = 7\n").unwrap();
        assert_eq!(config.limits.max_videos, 7);
        assert_eq!(config.limits.period_hours, 24.0);
        assert_eq!(config.http.port, 8080);
    }
}
