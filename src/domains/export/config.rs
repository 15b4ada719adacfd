use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{ServiceError, ServiceResult};

/// Upper bound on artifact retention
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Runtime settings for the export pipeline
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub storage_dir: PathBuf,
    pub max_concurrent_exports: usize,
    pub export_timeout: Duration,
    pub retention: chrono::Duration,
    pub history_limit_per_owner: usize,
    pub reaper_interval: Duration,
    pub download_base_path: String,
    /// Bundles above this row count leave out the spreadsheet
    pub bundle_spreadsheet_threshold: usize,
    pub preview_row_cap: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            storage_dir: std::env::temp_dir().join("hr_exports"),
            max_concurrent_exports: 5,
            export_timeout: Duration::from_secs(5 * 60),
            retention: chrono::Duration::days(7),
            history_limit_per_owner: 100,
            reaper_interval: Duration::from_secs(60 * 60),
            download_base_path: "/api/exports".to_string(),
            bundle_spreadsheet_threshold: 10_000,
            preview_row_cap: 100,
        }
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> ServiceResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ServiceError::Configuration(format!("Invalid {} value: {}", key, raw)))
}

impl ExportConfig {
    /// Defaults overridden by `EXPORT_*` variables; a `.env` file is honoured
    pub fn from_env() -> ServiceResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ServiceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("EXPORT_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("EXPORT_MAX_CONCURRENT") {
            config.max_concurrent_exports = parse("EXPORT_MAX_CONCURRENT", &raw)?;
        }
        if let Some(raw) = lookup("EXPORT_TIMEOUT_MS") {
            config.export_timeout = Duration::from_millis(parse("EXPORT_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = lookup("EXPORT_RETENTION_DAYS") {
            let days: i64 = parse("EXPORT_RETENTION_DAYS", &raw)?;
            config.retention = chrono::Duration::try_days(days).ok_or_else(|| {
                ServiceError::Configuration(format!("Invalid EXPORT_RETENTION_DAYS value: {}", raw))
            })?;
        }
        if let Some(raw) = lookup("EXPORT_HISTORY_LIMIT") {
            config.history_limit_per_owner = parse("EXPORT_HISTORY_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("EXPORT_REAPER_INTERVAL_SECS") {
            config.reaper_interval = Duration::from_secs(parse("EXPORT_REAPER_INTERVAL_SECS", &raw)?);
        }
        if let Some(path) = lookup("EXPORT_DOWNLOAD_BASE_PATH") {
            config.download_base_path = path;
        }
        if let Some(raw) = lookup("EXPORT_BUNDLE_SPREADSHEET_THRESHOLD") {
            config.bundle_spreadsheet_threshold = parse("EXPORT_BUNDLE_SPREADSHEET_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("EXPORT_PREVIEW_ROW_CAP") {
            config.preview_row_cap = parse("EXPORT_PREVIEW_ROW_CAP", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.max_concurrent_exports == 0 {
            return Err(ServiceError::Configuration("max_concurrent_exports must be at least 1".into()));
        }
        if self.export_timeout.is_zero() {
            return Err(ServiceError::Configuration("export_timeout must be positive".into()));
        }
        if self.retention <= chrono::Duration::zero() {
            return Err(ServiceError::Configuration("retention must be positive".into()));
        }
        if self.retention > chrono::Duration::days(MAX_RETENTION_DAYS) {
            return Err(ServiceError::Configuration(format!(
                "retention must not exceed {} days",
                MAX_RETENTION_DAYS
            )));
        }
        if self.history_limit_per_owner == 0 {
            return Err(ServiceError::Configuration("history_limit_per_owner must be at least 1".into()));
        }
        if self.reaper_interval.is_zero() {
            return Err(ServiceError::Configuration("reaper_interval must be positive".into()));
        }
        if self.preview_row_cap == 0 {
            return Err(ServiceError::Configuration("preview_row_cap must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ExportConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_concurrent_exports, 5);
        assert_eq!(config.export_timeout, Duration::from_secs(300));
        assert_eq!(config.retention, chrono::Duration::days(7));
        assert_eq!(config.history_limit_per_owner, 100);
        assert_eq!(config.bundle_spreadsheet_threshold, 10_000);
    }

    #[test]
    fn test_overrides() {
        let config = ExportConfig::from_lookup(lookup(&[
            ("EXPORT_STORAGE_DIR", "/var/exports"),
            ("EXPORT_MAX_CONCURRENT", "2"),
            ("EXPORT_TIMEOUT_MS", "1500"),
            ("EXPORT_RETENTION_DAYS", "1"),
            ("EXPORT_DOWNLOAD_BASE_PATH", "/v2/exports"),
        ]))
        .unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/var/exports"));
        assert_eq!(config.max_concurrent_exports, 2);
        assert_eq!(config.export_timeout, Duration::from_millis(1500));
        assert_eq!(config.retention, chrono::Duration::days(1));
        assert_eq!(config.download_base_path, "/v2/exports");
    }

    #[test]
    fn test_invalid_values_are_configuration_errors() {
        let err = ExportConfig::from_lookup(lookup(&[("EXPORT_MAX_CONCURRENT", "many")])).unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(msg) if msg.contains("EXPORT_MAX_CONCURRENT")));

        let err = ExportConfig::from_lookup(lookup(&[("EXPORT_MAX_CONCURRENT", "0")])).unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(_)));
    }

    #[test]
    fn test_retention_is_bounded() {
        let err = ExportConfig::from_lookup(lookup(&[("EXPORT_RETENTION_DAYS", "9223372036854775807")])).unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(msg) if msg.contains("EXPORT_RETENTION_DAYS")));

        let err = ExportConfig::from_lookup(lookup(&[("EXPORT_RETENTION_DAYS", "100000000")])).unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(msg) if msg.contains("retention")));

        let config = ExportConfig {
            retention: chrono::Duration::days(100_000_000),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ExportConfig::from_lookup(lookup(&[("EXPORT_RETENTION_DAYS", "36500")])).unwrap();
        assert_eq!(config.retention, chrono::Duration::days(MAX_RETENTION_DAYS));
    }
}
