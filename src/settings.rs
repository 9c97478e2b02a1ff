// src/settings.rs
//
// Gateway settings, stored as a JSON file next to the binary (or wherever
// the path argument points). Every field has a default so a partial file
// (or none at all) still yields a working configuration; the first run
// writes the defaults back out.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::io::error::GatewayError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppSettings {
    /// Serial device connected to the KM271 module.
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    /// The controller speaks 2400 baud 8N1; override only for bench rigs.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-byte read timeout on the serial port.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Force a link resync when no byte arrives for this long (0 = off).
    #[serde(default = "default_link_watchdog_secs")]
    pub link_watchdog_secs: u64,

    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_username: Option<String>,
    #[serde(default)]
    pub mqtt_password: Option<String>,
    /// Auto-generated when unset.
    #[serde(default)]
    pub mqtt_client_id: Option<String>,
    /// Prefix for every published topic.
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    /// Retain flag applied to every published notification.
    #[serde(default)]
    pub mqtt_retain: bool,

    /// Interval for the periodic `/info` publication.
    #[serde(default = "default_info_interval_secs")]
    pub info_interval_secs: u64,
    /// When set, logs are mirrored into `km271-gateway.log` here.
    #[serde(default)]
    pub reports_dir: Option<String>,
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    2400
}
fn default_read_timeout_ms() -> u64 {
    250
}
fn default_link_watchdog_secs() -> u64 {
    120
}
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_base_topic() -> String {
    "buderus/km271".to_string()
}
fn default_info_interval_secs() -> u64 {
    60
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            link_watchdog_secs: default_link_watchdog_secs(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_username: None,
            mqtt_password: None,
            mqtt_client_id: None,
            base_topic: default_base_topic(),
            mqtt_retain: false,
            info_interval_secs: default_info_interval_secs(),
            reports_dir: None,
        }
    }
}

/// Load settings from `path`. A missing file is first-run: defaults are
/// written out and returned.
pub fn load_settings(path: &Path) -> Result<AppSettings, GatewayError> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Settings(format!("failed to read {:?}: {}", path, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| GatewayError::Settings(format!("failed to parse {:?}: {}", path, e)))
    } else {
        let settings = AppSettings::default();
        save_settings(path, &settings)?;
        Ok(settings)
    }
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), GatewayError> {
    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| GatewayError::Settings(format!("failed to serialize settings: {}", e)))?;
    std::fs::write(path, content)
        .map_err(|e| GatewayError::Settings(format!("failed to write {:?}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let settings: AppSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.serial_port, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 2400);
        assert_eq!(settings.mqtt_port, 1883);
        assert_eq!(settings.base_topic, "buderus/km271");
        assert_eq!(settings.link_watchdog_secs, 120);
        assert!(settings.mqtt_username.is_none());
        assert!(!settings.mqtt_retain);
    }

    #[test]
    fn test_partial_document_overrides() {
        let settings: AppSettings = serde_json::from_str(
            r#"{ "serial_port": "/dev/ttyAMA0", "mqtt_host": "broker.lan", "link_watchdog_secs": 0, "mqtt_retain": true }"#,
        )
        .unwrap();
        assert_eq!(settings.serial_port, "/dev/ttyAMA0");
        assert_eq!(settings.mqtt_host, "broker.lan");
        assert_eq!(settings.link_watchdog_secs, 0);
        assert_eq!(settings.baud_rate, 2400);
        assert!(settings.mqtt_retain);
    }

    #[test]
    fn test_roundtrip() {
        let mut settings = AppSettings::default();
        settings.mqtt_username = Some("gateway".into());
        let json = serde_json::to_string(&settings).unwrap();
        let back: AppSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mqtt_username.as_deref(), Some("gateway"));
        assert_eq!(back.base_topic, settings.base_topic);
    }
}
