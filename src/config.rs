//! Engine configuration: the two required identity fields plus every
//! tunable interval the relay's timers use, each defaulted to a sensible
//! value. Loading follows the same "raw-optional-fields, validate into a
//! typed config" shape as a typical forwarder-style config module.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshConfig {
    pub service_id: String,
    pub local_name: String,
    pub initial_ttl: i64,
    pub seen_set_capacity: usize,
    pub lost_window: Duration,
    pub discovery_maintenance_interval: Duration,
    pub status_check_interval: Duration,
    pub reconnect_probe_delay: Duration,
    pub discovery_start_delay: Duration,
    pub request_connection_retry_delay: Duration,
    pub advertising_retry_delay: Duration,
    pub discovery_retry_delay: Duration,
    pub discovery_stop_settle_delay: Duration,
}

impl MeshConfig {
    pub fn new(service_id: impl Into<String>, local_name: impl Into<String>) -> Self {
        MeshConfig {
            service_id: service_id.into(),
            local_name: local_name.into(),
            ..MeshConfig::defaults()
        }
    }

    fn defaults() -> Self {
        MeshConfig {
            service_id: String::new(),
            local_name: String::new(),
            initial_ttl: 8,
            seen_set_capacity: 4096,
            lost_window: Duration::from_secs(120),
            discovery_maintenance_interval: Duration::from_secs(30),
            status_check_interval: Duration::from_secs(10),
            reconnect_probe_delay: Duration::from_secs(5),
            discovery_start_delay: Duration::from_secs(2),
            request_connection_retry_delay: Duration::from_secs(3),
            advertising_retry_delay: Duration::from_secs(5),
            discovery_retry_delay: Duration::from_secs(5),
            discovery_stop_settle_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    service_id: Option<String>,
    local_name: Option<String>,
    initial_ttl: Option<i64>,
    seen_set_capacity: Option<usize>,
    lost_window_secs: Option<u64>,
    discovery_maintenance_interval_secs: Option<u64>,
    status_check_interval_secs: Option<u64>,
    reconnect_probe_delay_secs: Option<u64>,
    discovery_start_delay_secs: Option<u64>,
    request_connection_retry_delay_secs: Option<u64>,
    advertising_retry_delay_secs: Option<u64>,
    discovery_retry_delay_secs: Option<u64>,
    discovery_stop_settle_delay_secs: Option<u64>,
}

pub fn load_config(path: impl AsRef<Path>) -> Result<MeshConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_config_from_str(&contents, &path.display().to_string())
}

pub fn load_config_from_str(contents: &str, path: &str) -> Result<MeshConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })?;
    validate(raw)
}

fn validate(raw: RawConfig) -> Result<MeshConfig, ConfigError> {
    let defaults = MeshConfig::defaults();
    let service_id = raw.service_id.ok_or(ConfigError::MissingField("service_id"))?;
    if service_id.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "service_id",
            reason: "must not be empty".to_string(),
        });
    }
    let local_name = raw.local_name.ok_or(ConfigError::MissingField("local_name"))?;
    if local_name.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "local_name",
            reason: "must not be empty".to_string(),
        });
    }
    let initial_ttl = raw.initial_ttl.unwrap_or(defaults.initial_ttl);
    if initial_ttl < 1 {
        return Err(ConfigError::InvalidValue {
            field: "initial_ttl",
            reason: "must be >= 1".to_string(),
        });
    }
    let seen_set_capacity = raw.seen_set_capacity.unwrap_or(defaults.seen_set_capacity);
    if seen_set_capacity == 0 {
        return Err(ConfigError::InvalidValue {
            field: "seen_set_capacity",
            reason: "must be >= 1".to_string(),
        });
    }

    Ok(MeshConfig {
        service_id,
        local_name,
        initial_ttl,
        seen_set_capacity,
        lost_window: raw.lost_window_secs.map(Duration::from_secs).unwrap_or(defaults.lost_window),
        discovery_maintenance_interval: raw
            .discovery_maintenance_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.discovery_maintenance_interval),
        status_check_interval: raw
            .status_check_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.status_check_interval),
        reconnect_probe_delay: raw
            .reconnect_probe_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.reconnect_probe_delay),
        discovery_start_delay: raw
            .discovery_start_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.discovery_start_delay),
        request_connection_retry_delay: raw
            .request_connection_retry_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_connection_retry_delay),
        advertising_retry_delay: raw
            .advertising_retry_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.advertising_retry_delay),
        discovery_retry_delay: raw
            .discovery_retry_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.discovery_retry_delay),
        discovery_stop_settle_delay: raw
            .discovery_stop_settle_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.discovery_stop_settle_delay),
    })
}
