use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/SysMon";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub socket_path: PathBuf,
    pub refresh_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Overrides the detected logical core count used to scale per-process CPU%.
    pub core_count: Option<usize>,
    pub kill_signal: i32,
    pub protect_critical: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            refresh_interval_ms: 3000,
            read_timeout_ms: 2000,
            write_timeout_ms: 1000,
            core_count: None,
            kill_signal: 15,
            protect_critical: true,
        }
    }
}

impl Config {
    /// Load from the user config dir, falling back to defaults.
    pub fn load() -> Self {
        let path = config_path();
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    log::warn!("Ignoring config {}: {}", path.display(), e);
                }
                Config::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_ms == 0 {
            return Err(Error::Config("refresh_interval_ms must be positive".into()));
        }
        if self.read_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be positive".into()));
        }
        if self.core_count == Some(0) {
            return Err(Error::Config("core_count must be at least 1".into()));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn effective_core_count(&self) -> usize {
        self.core_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("sysmon-client")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_conventions() {
        let config = Config::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/SysMon"));
        assert_eq!(config.refresh_interval(), Duration::from_secs(3));
        assert_eq!(config.kill_signal, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"refresh_interval_ms": 500, "core_count": 4}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.refresh_interval_ms, 500);
        assert_eq!(config.effective_core_count(), 4);
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            socket_path: PathBuf::from("/run/sysmon.sock"),
            protect_critical: false,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"refresh_interval_ms": 0}"#).unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
