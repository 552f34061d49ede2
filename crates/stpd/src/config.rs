//! Bridge and port protocol parameters.
//!
//! Every setter path goes through `validate()` first; a configuration is
//! only committed to a running bridge once it has been accepted in full.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{StpError, StpResult};
use crate::types::{AdminPointToPoint, ForceVersion, MacAddress};
use crate::vector::{BridgeId, PortId, Times};

/// Migration delay used by the protocol migration and bridge detection
/// machines, in seconds.
pub const MIGRATE_TIME: u16 = 3;

/// Default port path cost (1 Gb/s link, 802.1D Table 17-3).
pub const DEFAULT_PATH_COST: u32 = 20_000;

/// Largest path cost accepted for a port.
pub const MAX_PATH_COST: u32 = 200_000_000;

pub const DEFAULT_BRIDGE_PRIORITY: u16 = 32768;
pub const DEFAULT_PORT_PRIORITY: u8 = 128;
pub const DEFAULT_MAX_AGE: u16 = 20;
pub const DEFAULT_HELLO_TIME: u16 = 2;
pub const DEFAULT_FORWARD_DELAY: u16 = 15;
pub const DEFAULT_TX_HOLD_COUNT: u32 = 6;

/// Per-bridge (per-VLAN) protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge MAC address
    pub address: MacAddress,

    /// Bridge priority, a multiple of 4096 in 0..=61440
    #[serde(default = "default_bridge_priority")]
    pub priority: u16,

    #[serde(default = "default_max_age")]
    pub max_age: u16,

    #[serde(default = "default_hello_time")]
    pub hello_time: u16,

    #[serde(default = "default_forward_delay")]
    pub forward_delay: u16,

    #[serde(default)]
    pub force_version: ForceVersion,

    #[serde(default = "default_tx_hold_count")]
    pub tx_hold_count: u32,

    /// VLAN served by this bridge; also the system id extension
    pub vlan: u16,

    /// Send PVST encapsulated BPDUs on VLANs other than 1
    #[serde(default)]
    pub pvst: bool,
}

fn default_bridge_priority() -> u16 {
    DEFAULT_BRIDGE_PRIORITY
}

fn default_max_age() -> u16 {
    DEFAULT_MAX_AGE
}

fn default_hello_time() -> u16 {
    DEFAULT_HELLO_TIME
}

fn default_forward_delay() -> u16 {
    DEFAULT_FORWARD_DELAY
}

fn default_tx_hold_count() -> u32 {
    DEFAULT_TX_HOLD_COUNT
}

impl BridgeConfig {
    /// Creates a configuration with protocol defaults.
    pub fn new(vlan: u16, address: MacAddress) -> Self {
        Self {
            address,
            priority: DEFAULT_BRIDGE_PRIORITY,
            max_age: DEFAULT_MAX_AGE,
            hello_time: DEFAULT_HELLO_TIME,
            forward_delay: DEFAULT_FORWARD_DELAY,
            force_version: ForceVersion::Rstp,
            tx_hold_count: DEFAULT_TX_HOLD_COUNT,
            vlan,
            pvst: false,
        }
    }

    pub fn bridge_id(&self) -> BridgeId {
        BridgeId::new(self.priority, self.vlan, self.address)
    }

    pub fn times(&self) -> Times {
        Times::new(self.max_age, self.hello_time, self.forward_delay)
    }

    /// Validate configuration
    pub fn validate(&self) -> StpResult<()> {
        if self.address == MacAddress::ZERO || self.address.is_multicast() {
            return Err(StpError::invalid_config(
                "address",
                format!("{} is not a unicast address", self.address),
            ));
        }

        if self.priority > 61440 || self.priority % 4096 != 0 {
            return Err(StpError::invalid_config(
                "priority",
                format!("{} must be a multiple of 4096 in 0..=61440", self.priority),
            ));
        }

        if !(6..=40).contains(&self.max_age) {
            return Err(StpError::invalid_config(
                "max_age",
                format!("{} must be 6-40 seconds", self.max_age),
            ));
        }

        if !(1..=2).contains(&self.hello_time) {
            return Err(StpError::invalid_config(
                "hello_time",
                format!("{} must be 1-2 seconds", self.hello_time),
            ));
        }

        if !(4..=30).contains(&self.forward_delay) {
            return Err(StpError::invalid_config(
                "forward_delay",
                format!("{} must be 4-30 seconds", self.forward_delay),
            ));
        }

        if !(1..=10).contains(&self.tx_hold_count) {
            return Err(StpError::invalid_config(
                "tx_hold_count",
                format!("{} must be 1-10", self.tx_hold_count),
            ));
        }

        if !(1..=4094).contains(&self.vlan) {
            return Err(StpError::invalid_config(
                "vlan",
                format!("{} must be 1-4094", self.vlan),
            ));
        }

        // 802.1D 17.14 relation; only advisory.
        if 2 * (self.forward_delay - 1) < self.max_age || self.max_age < 2 * (self.hello_time + 1) {
            warn!(
                vlan = self.vlan,
                max_age = self.max_age,
                hello_time = self.hello_time,
                forward_delay = self.forward_delay,
                "stpd: bridge times do not satisfy 2*(ForwardDelay-1) >= MaxAge >= 2*(HelloTime+1)"
            );
        }

        Ok(())
    }
}

/// Per-port protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Interface index; also the 12-bit port number
    pub ifindex: u32,

    /// Port priority, a multiple of 16 in 0..=240
    #[serde(default = "default_port_priority")]
    pub priority: u8,

    /// Administrative enable
    #[serde(default = "default_enable")]
    pub enable: bool,

    /// Operational path cost derived from link speed; 0 selects the default
    #[serde(default)]
    pub path_cost: u32,

    /// Force a protocol migration check when set
    #[serde(default)]
    pub protocol_migration: bool,

    #[serde(default)]
    pub admin_point_to_point: AdminPointToPoint,

    #[serde(default)]
    pub admin_edge_port: bool,

    /// Allow the port to become edge automatically
    #[serde(default = "default_auto_edge")]
    pub auto_edge: bool,

    /// Administrative path cost; 0 means "use path_cost"
    #[serde(default)]
    pub admin_path_cost: u32,

    /// VLAN of the owning bridge
    pub brg_ifindex: u16,

    #[serde(default)]
    pub bridge_assurance: bool,

    #[serde(default)]
    pub bpdu_guard: bool,

    /// Seconds before a port shut down by BPDU guard is re-enabled; 0 keeps
    /// it down until reconfigured
    #[serde(default)]
    pub bpdu_guard_interval: u16,
}

fn default_port_priority() -> u8 {
    DEFAULT_PORT_PRIORITY
}

fn default_enable() -> bool {
    true
}

fn default_auto_edge() -> bool {
    true
}

impl PortConfig {
    /// Creates a configuration with protocol defaults.
    pub fn new(vlan: u16, ifindex: u32) -> Self {
        Self {
            ifindex,
            priority: DEFAULT_PORT_PRIORITY,
            enable: true,
            path_cost: 0,
            protocol_migration: false,
            admin_point_to_point: AdminPointToPoint::Auto,
            admin_edge_port: false,
            auto_edge: true,
            admin_path_cost: 0,
            brg_ifindex: vlan,
            bridge_assurance: false,
            bpdu_guard: false,
            bpdu_guard_interval: 0,
        }
    }

    pub fn port_id(&self) -> PortId {
        PortId::new(self.priority, self.ifindex as u16)
    }

    /// Path cost used in root path calculations.
    pub fn effective_path_cost(&self) -> u32 {
        if self.admin_path_cost != 0 {
            self.admin_path_cost
        } else if self.path_cost != 0 {
            self.path_cost
        } else {
            DEFAULT_PATH_COST
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> StpResult<()> {
        if !(1..=4095).contains(&self.ifindex) {
            return Err(StpError::invalid_config(
                "ifindex",
                format!("{} must be 1-4095", self.ifindex),
            ));
        }

        if self.priority > 240 || self.priority % 16 != 0 {
            return Err(StpError::invalid_config(
                "priority",
                format!("{} must be a multiple of 16 in 0..=240", self.priority),
            ));
        }

        if self.path_cost > MAX_PATH_COST {
            return Err(StpError::invalid_config(
                "path_cost",
                format!("{} exceeds {}", self.path_cost, MAX_PATH_COST),
            ));
        }

        if self.admin_path_cost > MAX_PATH_COST {
            return Err(StpError::invalid_config(
                "admin_path_cost",
                format!("{} exceeds {}", self.admin_path_cost, MAX_PATH_COST),
            ));
        }

        if !(1..=4094).contains(&self.brg_ifindex) {
            return Err(StpError::invalid_config(
                "brg_ifindex",
                format!("{} must be 1-4094", self.brg_ifindex),
            ));
        }

        if self.admin_edge_port && self.bridge_assurance {
            return Err(StpError::invalid_config(
                "bridge_assurance",
                "cannot be enabled on an edge port",
            ));
        }

        if self.admin_edge_port && self.bpdu_guard {
            return Err(StpError::invalid_config(
                "bpdu_guard",
                "cannot be enabled on an edge port",
            ));
        }

        Ok(())
    }
}
