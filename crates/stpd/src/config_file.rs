//! Configuration file support for stpd
//!
//! Loads and validates the daemon configuration from TOML. Default location:
//! /etc/sonic/stpd.conf
//!
//! ```toml
//! [engine]
//! queue_depth = 1024
//! time_units = "ieee"
//!
//! [[bridge]]
//! vlan = 100
//! address = "00:11:22:33:44:55"
//! priority = 4096
//!
//! [[port]]
//! brg_ifindex = 100
//! ifindex = 1
//! admin_edge_port = true
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::actor::{ActorConfig, DEFAULT_QUEUE_DEPTH};
use crate::bpdu::TimeUnits;
use crate::config::{BridgeConfig, PortConfig};
use crate::engine::EngineOptions;
use crate::error::{StpError, StpResult};
use crate::hal::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/stpd.conf";

/// Engine runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Capacity of each bridge's command queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Timer field encoding on the wire
    #[serde(default)]
    pub time_units: TimeUnits,

    /// Attempts per hardware request, including the first
    #[serde(default = "default_hw_retry_attempts")]
    pub hw_retry_attempts: u32,

    /// Delay before the first hardware retry in milliseconds; doubles on
    /// every further retry
    #[serde(default = "default_hw_retry_base_ms")]
    pub hw_retry_base_ms: u64,
}

/// Complete stpd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StpdConfig {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default, rename = "bridge")]
    pub bridges: Vec<BridgeConfig>,

    #[serde(default, rename = "port")]
    pub ports: Vec<PortConfig>,
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

fn default_hw_retry_attempts() -> u32 {
    3
}

fn default_hw_retry_base_ms() -> u64 {
    50
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            time_units: TimeUnits::default(),
            hw_retry_attempts: default_hw_retry_attempts(),
            hw_retry_base_ms: default_hw_retry_base_ms(),
        }
    }
}

impl StpdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> StpResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map_err(|e| match e {
                StpError::InvalidConfig { message, .. } => {
                    StpError::invalid_config(path.display().to_string(), message)
                }
                other => other,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "stpd: config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(StpError::Io(e)),
        }
    }

    /// Parses TOML text.
    pub fn parse(content: &str) -> StpResult<Self> {
        toml::from_str(content)
            .map_err(|e| StpError::invalid_config("config", format!("failed to parse: {}", e)))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.engine.hw_retry_attempts,
            Duration::from_millis(self.engine.hw_retry_base_ms),
        )
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            actor: ActorConfig {
                queue_depth: self.engine.queue_depth,
                retry: self.retry_policy(),
            },
            time_units: self.engine.time_units,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> StpResult<()> {
        if self.engine.queue_depth == 0 {
            return Err(StpError::invalid_config("queue_depth", "must be > 0"));
        }

        if self.engine.hw_retry_attempts == 0 {
            return Err(StpError::invalid_config("hw_retry_attempts", "must be > 0"));
        }

        let mut vlans = BTreeSet::new();
        for bridge in &self.bridges {
            bridge.validate()?;
            if !vlans.insert(bridge.vlan) {
                return Err(StpError::invalid_config(
                    "bridge",
                    format!("VLAN {} configured twice", bridge.vlan),
                ));
            }
        }

        let mut ports = BTreeSet::new();
        for port in &self.ports {
            port.validate()?;
            if !vlans.contains(&port.brg_ifindex) {
                return Err(StpError::invalid_config(
                    "brg_ifindex",
                    format!("port {} refers to unknown bridge {}", port.ifindex, port.brg_ifindex),
                ));
            }
            if !ports.insert((port.brg_ifindex, port.ifindex)) {
                return Err(StpError::invalid_config(
                    "port",
                    format!("port {} configured twice on bridge {}", port.ifindex, port.brg_ifindex),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AdminPointToPoint, ForceVersion, MacAddress};
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
[engine]
queue_depth = 256
time_units = "whole_seconds"

[[bridge]]
vlan = 100
address = "00:11:22:33:44:55"
priority = 4096
force_version = 1

[[bridge]]
vlan = 200
address = "00:11:22:33:44:55"
pvst = true

[[port]]
brg_ifindex = 100
ifindex = 1
admin_edge_port = true

[[port]]
brg_ifindex = 200
ifindex = 1
admin_point_to_point = "force_false"
bpdu_guard = true
bpdu_guard_interval = 30
"#;

    #[test]
    fn test_default_config() {
        let config = StpdConfig::default();
        assert_eq!(config.engine.queue_depth, 1024);
        assert_eq!(config.engine.time_units, TimeUnits::Ieee);
        assert!(config.bridges.is_empty());
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_parse_sample() {
        let config = StpdConfig::parse(SAMPLE).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.queue_depth, 256);
        assert_eq!(config.engine.time_units, TimeUnits::WholeSeconds);
        assert_eq!(config.engine.hw_retry_attempts, 3);

        assert_eq!(config.bridges.len(), 2);
        let first = &config.bridges[0];
        assert_eq!(first.address, MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]));
        assert_eq!(first.priority, 4096);
        assert_eq!(first.force_version, ForceVersion::Stp);
        assert_eq!(first.max_age, 20);
        assert!(config.bridges[1].pvst);

        let guarded = &config.ports[1];
        assert_eq!(guarded.priority, 128);
        assert_eq!(guarded.admin_point_to_point, AdminPointToPoint::ForceFalse);
        assert!(guarded.bpdu_guard);
        assert_eq!(guarded.bpdu_guard_interval, 30);
        assert!(guarded.auto_edge);
    }

    #[test]
    fn test_engine_options() {
        let config = StpdConfig::parse(
            "[engine]\nhw_retry_attempts = 5\nhw_retry_base_ms = 10\n",
        )
        .unwrap();
        let options = config.engine_options();
        assert_eq!(options.actor.retry.attempts, 5);
        assert_eq!(options.actor.retry.base_delay, Duration::from_millis(10));
        assert_eq!(options.actor.queue_depth, 1024);
    }

    #[test]
    fn test_rejects_bad_force_version() {
        let text = "[[bridge]]\nvlan = 1\naddress = \"00:11:22:33:44:55\"\nforce_version = 3\n";
        assert!(StpdConfig::parse(text).is_err());
    }

    #[test]
    fn test_rejects_port_without_bridge() {
        let mut config = StpdConfig::parse(SAMPLE).unwrap();
        config.ports[0].brg_ifindex = 300;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown bridge 300"));
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut config = StpdConfig::parse(SAMPLE).unwrap();
        config.bridges[1].vlan = 100;
        assert!(config.validate().is_err());

        let mut config = StpdConfig::parse(SAMPLE).unwrap();
        config.ports[1].brg_ifindex = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_queue_depth() {
        let mut config = StpdConfig::default();
        config.engine.queue_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = StpdConfig::load_or_default("/nonexistent/stpd.conf").unwrap();
        assert_eq!(config, StpdConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("stpd-{}.conf", std::process::id()));
        fs::write(&path, SAMPLE).unwrap();
        let config = StpdConfig::load_or_default(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.bridges.len(), 2);
        assert_eq!(config.ports.len(), 2);
    }
}
