use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FlowError, Result};

pub const DEFAULT_FLOW_TIMEOUT_US: u64 = 120_000_000; // 120 seconds
pub const DEFAULT_ACTIVITY_TIMEOUT_US: u64 = 5_000_000; // 5 seconds

/// Flow-table settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub bidirectional: bool,
    #[serde(rename = "flow_timeout_us", with = "micros")]
    pub flow_timeout: Duration,
    #[serde(rename = "activity_timeout_us", with = "micros")]
    pub activity_timeout: Duration,
    pub save_packet_info: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            bidirectional: true,
            flow_timeout: Duration::from_micros(DEFAULT_FLOW_TIMEOUT_US),
            activity_timeout: Duration::from_micros(DEFAULT_ACTIVITY_TIMEOUT_US),
            save_packet_info: false,
        }
    }
}

impl FlowConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: FlowConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }

    pub fn validate(&self) -> Result<()> {
        if self.flow_timeout.is_zero() {
            return Err(FlowError::InvalidConfig("flow timeout must be positive".into()));
        }
        if self.activity_timeout.is_zero() {
            return Err(FlowError::InvalidConfig("activity timeout must be positive".into()));
        }
        if self.activity_timeout > self.flow_timeout {
            return Err(FlowError::InvalidConfig(format!(
                "activity timeout {:?} exceeds flow timeout {:?}",
                self.activity_timeout, self.flow_timeout
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn flow_timeout_us(&self) -> u64 {
        self.flow_timeout.as_micros() as u64
    }

    #[inline]
    pub fn activity_timeout_us(&self) -> u64 {
        self.activity_timeout.as_micros() as u64
    }
}

/// Where finished flows are written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    pub csv_path: Option<PathBuf>,
    pub packet_json_dir: Option<PathBuf>,
}

impl OutputConfig {
    pub fn csv_path(&self) -> Result<&Path> {
        match self.csv_path.as_deref() {
            Some(p) if !p.as_os_str().is_empty() => Ok(p),
            _ => Err(FlowError::InvalidConfig("missing CSV output path".into())),
        }
    }

    /// Directory for `<flowId>.json` files; falls back to the CSV file's directory.
    pub fn packet_json_dir(&self) -> PathBuf {
        if let Some(dir) = &self.packet_json_dir {
            return dir.clone();
        }
        self.csv_path
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

mod micros {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cic_settings() {
        let c = FlowConfig::default();
        assert!(c.bidirectional);
        assert_eq!(c.flow_timeout_us(), 120_000_000);
        assert_eq!(c.activity_timeout_us(), 5_000_000);
        assert!(!c.save_packet_info);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn parses_partial_json() {
        let c = FlowConfig::from_json_str(r#"{ "flow_timeout_us": 60000000, "save_packet_info": true }"#).unwrap();
        assert_eq!(c.flow_timeout, Duration::from_secs(60));
        assert_eq!(c.activity_timeout, Duration::from_secs(5));
        assert!(c.save_packet_info);
        assert!(c.bidirectional);
    }

    #[test]
    fn rejects_inconsistent_timeouts() {
        let err = FlowConfig::from_json_str(r#"{ "flow_timeout_us": 1000, "activity_timeout_us": 5000 }"#).unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));
        assert!(FlowConfig::from_json_str(r#"{ "flow_timeout_us": 0 }"#).is_err());
        assert!(matches!(FlowConfig::from_json_str("{"), Err(FlowError::Json(_))));
    }

    #[test]
    fn output_paths() {
        let empty = OutputConfig::default();
        assert!(matches!(empty.csv_path(), Err(FlowError::InvalidConfig(_))));
        assert_eq!(empty.packet_json_dir(), PathBuf::from("."));

        let out = OutputConfig { csv_path: Some("out/flows.csv".into()), packet_json_dir: None };
        assert_eq!(out.csv_path().unwrap(), Path::new("out/flows.csv"));
        assert_eq!(out.packet_json_dir(), PathBuf::from("out"));
    }
}
