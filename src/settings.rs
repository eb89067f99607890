use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DashError, Result};
use crate::workbook::SheetNames;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default)]
    pub watch_folder: String,
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_contract_sheet")]
    pub contract_sheet: String,
    #[serde(default = "default_spend_sheet")]
    pub spend_sheet: String,
    #[serde(default)]
    pub static_dir: Option<String>,
    #[serde(default)]
    pub auth_enabled: bool,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
}

fn default_file_pattern() -> String {
    "*.xlsm".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_check_interval_secs() -> u64 {
    2
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_contract_sheet() -> String {
    SheetNames::default().contracts
}

fn default_spend_sheet() -> String {
    SheetNames::default().spend
}

fn default_session_ttl_hours() -> i64 {
    12
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            watch_folder: String::new(),
            file_pattern: default_file_pattern(),
            host: default_host(),
            port: default_port(),
            check_interval_secs: default_check_interval_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            contract_sheet: default_contract_sheet(),
            spend_sheet: default_spend_sheet(),
            static_dir: None,
            auth_enabled: false,
            session_ttl_hours: default_session_ttl_hours(),
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("dashboard.db")
    }

    pub fn sheet_names(&self) -> SheetNames {
        SheetNames {
            contracts: self.contract_sheet.clone(),
            spend: self.spend_sheet.clone(),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("spendwatch")
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join("spendwatch")
}

pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings_from(path: &Path) -> Settings {
    if path.exists() {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    save_settings_to(settings, &settings_path())
}

pub fn save_settings_to(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| DashError::Settings(e.to_string()))?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep").join("settings.json");
        let settings = Settings {
            data_dir: "/tmp/test".to_string(),
            watch_folder: "/srv/planilhas".to_string(),
            port: 8080,
            auth_enabled: true,
            ..Settings::default()
        };
        save_settings_to(&settings, &path).unwrap();
        let loaded = load_settings_from(&path);
        assert_eq!(loaded.watch_folder, "/srv/planilhas");
        assert_eq!(loaded.port, 8080);
        assert!(loaded.auth_enabled);
        assert_eq!(loaded.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_load_returns_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from(&dir.path().join("nope.json"));
        assert_eq!(s.file_pattern, "*.xlsm");
        assert_eq!(s.check_interval(), Duration::from_secs(2));
        assert_eq!(s.settle_delay(), Duration::from_secs(1));
        assert!(!s.auth_enabled);
        assert!(!s.data_dir.is_empty());
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/test", "watch_folder": "/data", "port": 9000}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.port, 9000);
        assert_eq!(s.host, "127.0.0.1");
        assert_eq!(s.sheet_names().contracts, "VALIDAÇÕES");
        assert_eq!(s.sheet_names().spend, "LIQUIDAÇÃO 2025");
        assert_eq!(s.session_ttl_hours, 12);
        assert_eq!(s.db_path(), PathBuf::from("/tmp/test/dashboard.db"));
    }

    #[test]
    fn test_invalid_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings_from(&path).port, 5000);
    }
}
