//! Persisted settings.
//!
//! One JSON file under the platform config home, one section per
//! subsystem, section/key pairs with primitive values. Loaded lazily,
//! written only on explicit save; saves go through a temp file and rename
//! so a crash never truncates the previous settings.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

fn default_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("isoforge")
}

pub struct ConfigManager {
    config_dir: PathBuf,
    config_file: PathBuf,
    values: Map<String, Value>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::with_config_dir(default_config_dir())
    }

    /// Settings rooted at an explicit directory (tests, portable installs).
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let config_file = config_dir.join("settings.json");
        let mut manager = Self {
            config_dir,
            config_file,
            values: Map::new(),
        };
        manager.load();
        manager
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn load(&mut self) {
        let Ok(text) = fs::read_to_string(&self.config_file) else {
            return;
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(values)) => self.values = values,
            Ok(_) => log::warn!(
                "settings file {} is not an object; ignoring it",
                self.config_file.display()
            ),
            Err(err) => log::warn!(
                "failed to parse {}: {err}",
                self.config_file.display()
            ),
        }
    }

    /// Re-read the file, dropping unsaved changes.
    pub fn reload(&mut self) {
        self.values.clear();
        self.load();
    }

    /// Typed read with a default for missing keys or type mismatches.
    pub fn get_value<T: DeserializeOwned>(&self, section: &str, key: &str, default: T) -> T {
        self.values
            .get(section)
            .and_then(|section| section.get(key))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(default)
    }

    pub fn set_value<T: Serialize>(&mut self, section: &str, key: &str, value: T) {
        let Ok(value) = serde_json::to_value(value) else {
            return;
        };
        let section = self
            .values
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = section {
            map.insert(key.to_string(), value);
        }
    }

    /// Write the settings file atomically.
    pub fn save(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.config_dir)?;
        let json = serde_json::to_string_pretty(&Value::Object(self.values.clone()))
            .expect("settings serialize");
        let temp = self.config_file.with_extension("json.tmp");
        fs::write(&temp, &json)?;
        fs::rename(&temp, &self.config_file)?;
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigManager::with_config_dir(dir.path());
        assert_eq!(config.get_value("render", "quality", 1.0f32), 1.0);
        assert!(config.get_value("ui", "dark_mode", true));
    }

    #[test]
    fn values_survive_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut config = ConfigManager::with_config_dir(dir.path());
            config.set_value("render", "quality", 0.5f32);
            config.set_value("slicer", "layer_thickness_mm", 0.05f32);
            config.set_value("ui", "recent_file", "part.3mf");
            config.save().unwrap();
        }

        let config = ConfigManager::with_config_dir(dir.path());
        assert_eq!(config.get_value("render", "quality", 1.0f32), 0.5);
        assert_eq!(
            config.get_value("slicer", "layer_thickness_mm", 0.1f32),
            0.05
        );
        assert_eq!(
            config.get_value::<String>("ui", "recent_file", String::new()),
            "part.3mf"
        );
    }

    #[test]
    fn type_mismatch_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConfigManager::with_config_dir(dir.path());
        config.set_value("render", "quality", "not a number");
        assert_eq!(config.get_value("render", "quality", 0.75f32), 0.75);
    }

    #[test]
    fn reload_discards_unsaved_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConfigManager::with_config_dir(dir.path());
        config.set_value("render", "quality", 0.3f32);
        config.save().unwrap();
        config.set_value("render", "quality", 0.9f32);
        config.reload();
        assert_eq!(config.get_value("render", "quality", 1.0f32), 0.3);
    }

    #[test]
    fn corrupt_settings_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join("settings.json"), "{ broken").unwrap();
        let config = ConfigManager::with_config_dir(dir.path());
        assert_eq!(config.get_value("render", "quality", 1.0f32), 1.0);
    }
}
