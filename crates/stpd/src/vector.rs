//! Bridge and port identifiers, priority vectors and protocol times.
//!
//! All comparisons are "lower is better". The derived orderings compare
//! fields in declaration order, which is exactly the left-to-right
//! comparison 802.1D asks for.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::MacAddress;

/// 8-byte bridge identifier: 4-bit priority, 12-bit system id extension
/// (the VLAN) and the bridge MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BridgeId(u64);

impl BridgeId {
    /// Builds an identifier. `priority` must already be a multiple of 4096.
    pub fn new(priority: u16, vlan: u16, mac: MacAddress) -> Self {
        let prefix = (priority & 0xF000) | (vlan & 0x0FFF);
        BridgeId((u64::from(prefix) << 48) | mac.to_u64())
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        BridgeId(u64::from_be_bytes(bytes))
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Priority including the system id extension (the 16-bit prefix).
    pub fn priority(self) -> u16 {
        (self.0 >> 48) as u16
    }

    pub fn address(self) -> MacAddress {
        MacAddress::from_u64(self.0 & 0xFFFF_FFFF_FFFF)
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}.{}", self.priority(), self.address())
    }
}

/// 2-byte port identifier: 4-bit priority and 12-bit port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PortId(u16);

impl PortId {
    /// Builds an identifier. `priority` must be a multiple of 16.
    pub fn new(priority: u8, number: u16) -> Self {
        PortId((u16::from(priority & 0xF0) << 8) | (number & 0x0FFF))
    }

    pub fn from_raw(raw: u16) -> Self {
        PortId(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn priority(self) -> u8 {
        (self.0 >> 8) as u8 & 0xF0
    }

    pub fn number(self) -> u16 {
        self.0 & 0x0FFF
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Spanning tree priority vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PriorityVector {
    pub root_bridge_id: BridgeId,
    pub root_path_cost: u32,
    pub designated_bridge_id: BridgeId,
    pub designated_port_id: PortId,
    pub bridge_port_id: PortId,
}

impl PriorityVector {
    /// The vector a bridge advertises when it believes itself to be root.
    pub fn for_bridge(id: BridgeId) -> Self {
        Self {
            root_bridge_id: id,
            root_path_cost: 0,
            designated_bridge_id: id,
            designated_port_id: PortId::default(),
            bridge_port_id: PortId::default(),
        }
    }

    /// True when `self` is strictly better than `other`.
    pub fn is_better_than(&self, other: &PriorityVector) -> bool {
        self < other
    }

    /// Compares everything except the receiving port identifier.
    fn designated_part(&self) -> (BridgeId, u32, BridgeId, PortId) {
        (
            self.root_bridge_id,
            self.root_path_cost,
            self.designated_bridge_id,
            self.designated_port_id,
        )
    }

    /// True when the first four components match.
    pub fn same_designated(&self, other: &PriorityVector) -> bool {
        self.designated_part() == other.designated_part()
    }

    /// True when `self` (a message vector) is the same as or better than
    /// `other` (a port vector), ignoring the receiving port.
    pub fn better_or_same(&self, other: &PriorityVector) -> bool {
        self.designated_part() <= other.designated_part()
    }

    /// Superior per 802.1D 17.6: better, or sent from the same designated
    /// bridge address and port number as the information held.
    pub fn is_superior_to(&self, port: &PriorityVector) -> bool {
        if self.same_designated(port) {
            return false;
        }
        self.designated_part() < port.designated_part()
            || (self.designated_bridge_id.address() == port.designated_bridge_id.address()
                && self.designated_port_id.number() == port.designated_port_id.number())
    }

    /// Root path priority vector for a port holding this received vector.
    pub fn root_path(&self, path_cost: u32, port_id: PortId) -> Self {
        Self {
            root_path_cost: self.root_path_cost.saturating_add(path_cost),
            bridge_port_id: port_id,
            ..*self
        }
    }
}

impl fmt::Display for PriorityVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{root {} cost {} bridge {} port {} rx {}}}",
            self.root_bridge_id,
            self.root_path_cost,
            self.designated_bridge_id,
            self.designated_port_id,
            self.bridge_port_id
        )
    }
}

/// Protocol times in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Times {
    pub message_age: u16,
    pub max_age: u16,
    pub hello_time: u16,
    pub forward_delay: u16,
}

impl Times {
    pub fn new(max_age: u16, hello_time: u16, forward_delay: u16) -> Self {
        Self {
            message_age: 0,
            max_age,
            hello_time,
            forward_delay,
        }
    }
}
