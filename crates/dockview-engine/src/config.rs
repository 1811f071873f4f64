use std::str::FromStr;

use dockview_common::{DockviewError, Result};
use serde::{Deserialize, Serialize};

/// Engine configuration. Defaults mirror a local desktop daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Daemon address; empty means the platform's local defaults.
    pub endpoint: String,
    /// Transport timeout handed to the client library.
    pub timeout_secs: u64,
    /// Grace period for `stop_container` when the caller gives none.
    pub stop_grace_secs: i64,
    /// Upper bound on concurrent event-driven refreshes per engine.
    pub max_inflight_refreshes: usize,
    /// Capacity of the change and connection broadcast channels.
    pub notification_buffer: usize,
    /// Full-refresh polling interval. `None` keeps the view purely event-driven.
    pub poll_interval_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: 120,
            stop_grace_secs: 30,
            max_inflight_refreshes: 16,
            notification_buffer: 1024,
            poll_interval_secs: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `DOCKVIEW_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(endpoint) = lookup("DOCKVIEW_ENDPOINT").or_else(|| lookup("DOCKER_HOST")) {
            config.endpoint = endpoint;
        }
        if let Some(v) = parse_var(&lookup, "DOCKVIEW_TIMEOUT_SECS")? {
            config.timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCKVIEW_STOP_GRACE_SECS")? {
            config.stop_grace_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCKVIEW_MAX_INFLIGHT")? {
            config.max_inflight_refreshes = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCKVIEW_NOTIFICATION_BUFFER")? {
            config.notification_buffer = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCKVIEW_POLL_INTERVAL_SECS")? {
            config.poll_interval_secs = Some(v).filter(|secs| *secs > 0);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_inflight_refreshes == 0 {
            return Err(DockviewError::Config(
                "max_inflight_refreshes must be at least 1".to_string(),
            ));
        }
        if self.notification_buffer == 0 {
            return Err(DockviewError::Config(
                "notification_buffer must be at least 1".to_string(),
            ));
        }
        if self.stop_grace_secs < 0 {
            return Err(DockviewError::Config(
                "stop_grace_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DockviewError::Config(format!("{key}: cannot parse {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.stop_grace_secs, 30);
        assert!(config.poll_interval_secs.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("DOCKER_HOST", "unix:///var/run/docker.sock"),
            ("DOCKVIEW_ENDPOINT", "tcp://10.0.0.5:2375"),
            ("DOCKVIEW_STOP_GRACE_SECS", "5"),
            ("DOCKVIEW_POLL_INTERVAL_SECS", "15"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint, "tcp://10.0.0.5:2375");
        assert_eq!(config.stop_grace_secs, 5);
        assert_eq!(config.poll_interval_secs, Some(15));
    }

    #[test]
    fn test_docker_host_fallback_and_zero_poll() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("DOCKER_HOST", "unix:///run/user/1000/docker.sock"),
            ("DOCKVIEW_POLL_INTERVAL_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint, "unix:///run/user/1000/docker.sock");
        assert!(config.poll_interval_secs.is_none());
    }

    #[test]
    fn test_partial_config_document() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"endpoint": "tcp://10.0.0.5:2375", "poll_interval_secs": 30}"#)
                .unwrap();
        assert_eq!(config.endpoint, "tcp://10.0.0.5:2375");
        assert_eq!(config.poll_interval_secs, Some(30));
        assert_eq!(config.max_inflight_refreshes, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let err = EngineConfig::from_lookup(lookup_from(&[("DOCKVIEW_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, DockviewError::Config(msg) if msg.contains("DOCKVIEW_TIMEOUT_SECS")));

        let err = EngineConfig::from_lookup(lookup_from(&[("DOCKVIEW_MAX_INFLIGHT", "0")]))
            .unwrap_err();
        assert!(matches!(err, DockviewError::Config(_)));
    }
}
