//! Orchestrator configuration resolution
//!
//! Each setting resolves with ENV → TOML → built-in default priority.
//! Environment variables use the `FOLIO_` prefix, e.g. `FOLIO_MAX_RETRY_COUNT`.

use folio_common::config::OrchestratorToml;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_CHANNEL_IDLE_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_CALLBACK_ADDRESS: &str = "http://127.0.0.1:5730/callbacks";
pub const DEFAULT_WORKER_QUEUE_URL: &str = "http://127.0.0.1:5731/jobs";

/// Resolved orchestrator settings
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Retry ceiling; a FAILED unit with `retry_count >= max_retry_count` is exhausted
    pub max_retry_count: u32,
    pub reconcile_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Progress channels with no publish for this long are closed
    pub channel_idle_timeout: Duration,
    /// Per-subscriber progress queue bound
    pub channel_capacity: usize,
    /// Address workers call back to, carried in every outbound message
    pub callback_address: String,
    pub worker_queue_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            channel_idle_timeout: Duration::from_secs(DEFAULT_CHANNEL_IDLE_TIMEOUT_SECS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            callback_address: DEFAULT_CALLBACK_ADDRESS.to_string(),
            worker_queue_url: DEFAULT_WORKER_QUEUE_URL.to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Resolve every setting from the environment, then TOML, then defaults
    pub fn resolve(toml: &OrchestratorToml) -> Self {
        let config = Self {
            max_retry_count: resolve_setting(
                "FOLIO_MAX_RETRY_COUNT",
                toml.max_retry_count,
                DEFAULT_MAX_RETRY_COUNT,
            ),
            reconcile_interval: Duration::from_secs(resolve_nonzero(
                "FOLIO_RECONCILE_INTERVAL_SECS",
                toml.reconcile_interval_secs,
                DEFAULT_RECONCILE_INTERVAL_SECS,
            )),
            heartbeat_interval: Duration::from_secs(resolve_nonzero(
                "FOLIO_HEARTBEAT_INTERVAL_SECS",
                toml.heartbeat_interval_secs,
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )),
            channel_idle_timeout: Duration::from_secs(resolve_nonzero(
                "FOLIO_CHANNEL_IDLE_TIMEOUT_SECS",
                toml.channel_idle_timeout_secs,
                DEFAULT_CHANNEL_IDLE_TIMEOUT_SECS,
            )),
            channel_capacity: resolve_nonzero(
                "FOLIO_CHANNEL_CAPACITY",
                toml.channel_capacity,
                DEFAULT_CHANNEL_CAPACITY,
            ),
            callback_address: resolve_setting(
                "FOLIO_CALLBACK_ADDRESS",
                toml.callback_address.clone(),
                DEFAULT_CALLBACK_ADDRESS.to_string(),
            ),
            worker_queue_url: resolve_setting(
                "FOLIO_WORKER_QUEUE_URL",
                toml.worker_queue_url.clone(),
                DEFAULT_WORKER_QUEUE_URL.to_string(),
            ),
        };

        debug!(?config, "Orchestrator configuration resolved");
        config
    }
}

fn resolve_setting<T>(env_var: &str, toml_value: Option<T>, default: T) -> T
where
    T: FromStr,
{
    if let Ok(raw) = std::env::var(env_var) {
        match raw.trim().parse::<T>() {
            Ok(value) if !raw.trim().is_empty() => return value,
            _ => warn!("Ignoring invalid value for {}: {:?}", env_var, raw),
        }
    }

    toml_value.unwrap_or(default)
}

/// [`resolve_setting`] for intervals and capacities, where zero is rejected
fn resolve_nonzero<T>(env_var: &str, toml_value: Option<T>, default: T) -> T
where
    T: FromStr + Default + PartialEq,
{
    let zero = T::default();
    if let Ok(raw) = std::env::var(env_var) {
        match raw.trim().parse::<T>() {
            Ok(value) if value != zero => return value,
            _ => warn!("Ignoring invalid value for {}: {:?}", env_var, raw),
        }
    }

    match toml_value {
        Some(value) if value == zero => {
            warn!("Ignoring zero value for {} from TOML", env_var);
            default
        }
        Some(value) => value,
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_overrides() {
        std::env::remove_var("FOLIO_MAX_RETRY_COUNT");
        std::env::remove_var("FOLIO_RECONCILE_INTERVAL_SECS");

        let config = OrchestratorConfig::resolve(&OrchestratorToml::default());
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.max_retry_count, 3);
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.channel_idle_timeout, Duration::from_secs(3600));
    }

    #[test]
    #[serial]
    fn test_toml_overrides_default() {
        std::env::remove_var("FOLIO_MAX_RETRY_COUNT");

        let toml = OrchestratorToml {
            max_retry_count: Some(5),
            callback_address: Some("http://folio:9000/cb".to_string()),
            ..Default::default()
        };
        let config = OrchestratorConfig::resolve(&toml);
        assert_eq!(config.max_retry_count, 5);
        assert_eq!(config.callback_address, "http://folio:9000/cb");
    }

    #[test]
    #[serial]
    fn test_env_overrides_toml() {
        std::env::set_var("FOLIO_MAX_RETRY_COUNT", "7");

        let toml = OrchestratorToml {
            max_retry_count: Some(5),
            ..Default::default()
        };
        let config = OrchestratorConfig::resolve(&toml);
        assert_eq!(config.max_retry_count, 7);

        std::env::remove_var("FOLIO_MAX_RETRY_COUNT");
    }

    #[test]
    #[serial]
    fn test_invalid_env_falls_through() {
        std::env::set_var("FOLIO_RECONCILE_INTERVAL_SECS", "soon");

        let toml = OrchestratorToml {
            reconcile_interval_secs: Some(15),
            ..Default::default()
        };
        let config = OrchestratorConfig::resolve(&toml);
        assert_eq!(config.reconcile_interval, Duration::from_secs(15));

        std::env::remove_var("FOLIO_RECONCILE_INTERVAL_SECS");
    }

    #[test]
    #[serial]
    fn test_zero_intervals_fall_through() {
        std::env::set_var("FOLIO_RECONCILE_INTERVAL_SECS", "0");
        std::env::set_var("FOLIO_HEARTBEAT_INTERVAL_SECS", "0");

        let toml = OrchestratorToml {
            reconcile_interval_secs: Some(20),
            heartbeat_interval_secs: Some(0),
            channel_capacity: Some(0),
            ..Default::default()
        };
        let config = OrchestratorConfig::resolve(&toml);
        assert_eq!(config.reconcile_interval, Duration::from_secs(20));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS));
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);

        std::env::remove_var("FOLIO_RECONCILE_INTERVAL_SECS");
        std::env::remove_var("FOLIO_HEARTBEAT_INTERVAL_SECS");
    }
}
