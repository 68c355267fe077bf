use std::env;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

const ENV_DATA_DIR: &str = "SKETCHD_DATA_DIR";
const ENV_INFO_DIR: &str = "SKETCHD_INFO_DIR";
const ENV_CONFIG: &str = "SKETCHD_CONFIG";
const ENV_MAX_KEY_SIZE: &str = "SKETCHD_MAX_KEY_SIZE";

/// Canonical ids double as file names in both stores, so the default bound
/// stays below common filesystem name limits.
pub const DEFAULT_MAX_KEY_SIZE: usize = 200;

fn default_max_key_size() -> usize {
    DEFAULT_MAX_KEY_SIZE
}

fn default_data_dir() -> String {
    "./sketchd/data".to_string()
}

fn default_info_dir() -> String {
    "./sketchd/info".to_string()
}

/// Settings holds the process-wide configuration of the service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding one binary state blob per canonical id.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Directory holding one descriptor record per canonical id.
    #[serde(default = "default_info_dir")]
    pub info_dir: String,
    /// Upper bound on the byte length of a canonical id.
    #[serde(default = "default_max_key_size")]
    pub max_key_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            info_dir: default_info_dir(),
            max_key_size: default_max_key_size(),
        }
    }
}

impl Settings {
    /// from_env loads settings from the optional JSON config file named by
    /// SKETCHD_CONFIG, then applies the individual environment overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut settings = match env::var(ENV_CONFIG) {
            Ok(path) if !path.is_empty() => {
                let data = std::fs::read(&path)
                    .map_err(|e| anyhow!("could not read config file {}: {}", path, e))?;
                serde_json::from_slice(&data)
                    .map_err(|e| anyhow!("could not parse config file {}: {}", path, e))?
            }
            _ => Settings::default(),
        };

        if let Ok(dir) = env::var(ENV_DATA_DIR) {
            if !dir.is_empty() {
                settings.data_dir = dir;
            }
        }
        if let Ok(dir) = env::var(ENV_INFO_DIR) {
            if !dir.is_empty() {
                settings.info_dir = dir;
            }
        }
        if let Ok(size) = env::var(ENV_MAX_KEY_SIZE) {
            if !size.is_empty() {
                settings.max_key_size = size
                    .parse()
                    .map_err(|e| anyhow!("invalid {}: {}", ENV_MAX_KEY_SIZE, e))?;
            }
        }

        Ok(settings)
    }
}

lazy_static! {
    static ref SETTINGS: RwLock<Option<Settings>> = RwLock::new(None);
}

/// get returns the process-wide settings, loading them from the environment
/// on first use.
pub fn get() -> anyhow::Result<Settings> {
    {
        let guard = SETTINGS.read().unwrap();
        if let Some(settings) = guard.as_ref() {
            return Ok(settings.clone());
        }
    }

    let mut guard = SETTINGS.write().unwrap();
    if guard.is_none() {
        *guard = Some(Settings::from_env()?);
    }
    Ok(guard.as_ref().unwrap().clone())
}

/// set replaces the process-wide settings. Used by the runner after parsing
/// flags and by tests that point the stores at scratch directories.
pub fn set(settings: Settings) {
    *SETTINGS.write().unwrap() = Some(settings);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_key_size, DEFAULT_MAX_KEY_SIZE);
        assert!(!settings.data_dir.is_empty());
        assert!(!settings.info_dir.is_empty());
    }

    #[test]
    fn test_partial_config_file_fills_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"data_dir": "/tmp/x"}"#).unwrap();
        assert_eq!(settings.data_dir, "/tmp/x");
        assert_eq!(settings.info_dir, default_info_dir());
        assert_eq!(settings.max_key_size, DEFAULT_MAX_KEY_SIZE);
    }
}
