//! Common protocol types: addresses, port roles, port states and the
//! enumerations carried by port records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StpError;

/// A 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The zero/null MAC address.
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    /// Creates a MAC address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true if this is a multicast address.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Returns the address packed into the low 48 bits of a u64.
    pub fn to_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    /// Builds an address from the low 48 bits of a u64.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 6];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (value >> (8 * (5 - i))) as u8;
        }
        MacAddress(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = StpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(StpError::invalid_config("address", format!("'{}' is not a MAC address", s)));
        }
        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            *slot = u8::from_str_radix(part, 16).map_err(|_| {
                StpError::invalid_config("address", format!("'{}' is not a MAC address", s))
            })?;
        }
        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = StpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

/// Port role as assigned by role selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortRole {
    #[default]
    Disabled,
    Root,
    Designated,
    Alternate,
    Backup,
}

impl PortRole {
    /// Converts to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Root => "root",
            Self::Designated => "designated",
            Self::Alternate => "alternate",
            Self::Backup => "backup",
        }
    }

    /// Two-bit role encoding carried in RST BPDU flags.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Alternate | Self::Backup => 1,
            Self::Root => 2,
            Self::Designated => 3,
        }
    }

    /// Decodes the two-bit role field. The value 0 means "unknown".
    pub fn from_wire(bits: u8) -> Option<Self> {
        match bits & 0x03 {
            1 => Some(Self::Alternate),
            2 => Some(Self::Root),
            3 => Some(Self::Designated),
            _ => None,
        }
    }
}

/// Origin of the information held in a port's priority vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfoIs {
    #[default]
    Disabled,
    Received,
    Mine,
    Aged,
}

impl InfoIs {
    /// Converts to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Received => "received",
            Self::Mine => "mine",
            Self::Aged => "aged",
        }
    }
}

/// Classification of a received message relative to the port's stored info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcvdInfo {
    SuperiorDesignated,
    RepeatedDesignated,
    InferiorDesignated,
    NotDesignated,
    Other,
}

/// Forwarding state programmed into hardware for a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    #[default]
    Discarding,
    Learning,
    Forwarding,
}

impl PortState {
    /// Parses a port state from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "discarding" | "blocking" => Some(Self::Discarding),
            "learning" => Some(Self::Learning),
            "forwarding" => Some(Self::Forwarding),
            _ => None,
        }
    }

    /// Converts to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discarding => "discarding",
            Self::Learning => "learning",
            Self::Forwarding => "forwarding",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version forced on the bridge.
///
/// Configured as 1 for legacy STP and 2 for RSTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ForceVersion {
    Stp,
    #[default]
    Rstp,
}

impl ForceVersion {
    /// True when RSTP behaviour (rapid transitions, RST BPDUs) is allowed.
    pub fn rstp_version(self) -> bool {
        matches!(self, Self::Rstp)
    }

    /// True when the bridge is forced to legacy STP.
    pub fn stp_version(self) -> bool {
        matches!(self, Self::Stp)
    }
}

impl TryFrom<u8> for ForceVersion {
    type Error = StpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Stp),
            2 => Ok(Self::Rstp),
            other => Err(StpError::invalid_config(
                "force_version",
                format!("{} is not one of 1 (STP) or 2 (RSTP)", other),
            )),
        }
    }
}

impl From<ForceVersion> for u8 {
    fn from(v: ForceVersion) -> Self {
        match v {
            ForceVersion::Stp => 1,
            ForceVersion::Rstp => 2,
        }
    }
}

/// Administrative point-to-point setting of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminPointToPoint {
    ForceTrue,
    ForceFalse,
    #[default]
    Auto,
}

impl AdminPointToPoint {
    /// Resolves the operational point-to-point status. Ports running in
    /// auto mode are assumed to be full duplex.
    pub fn resolve(self) -> bool {
        !matches!(self, Self::ForceFalse)
    }
}

/// Identifies a bridge port: interface index plus owning bridge VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortKey {
    pub vlan: u16,
    pub ifindex: u32,
}

impl PortKey {
    pub fn new(vlan: u16, ifindex: u32) -> Self {
        Self { vlan, ifindex }
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vlan{}:{}", self.vlan, self.ifindex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddress = "00:11:22:AA:bb:cc".parse().unwrap();
        assert_eq!(mac.to_string(), "00:11:22:aa:bb:cc");
        let hyphen: MacAddress = "00-11-22-aa-bb-cc".parse().unwrap();
        assert_eq!(mac, hyphen);
        assert!("00:11:22".parse::<MacAddress>().is_err());
        assert!("zz:11:22:33:44:55".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_u64_conversion() {
        let mac = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(mac.to_u64(), 0x0011_2233_4455);
        assert_eq!(MacAddress::from_u64(0x0011_2233_4455), mac);
    }

    #[test]
    fn test_role_wire_encoding() {
        assert_eq!(PortRole::Designated.to_wire(), 3);
        assert_eq!(PortRole::Root.to_wire(), 2);
        assert_eq!(PortRole::Backup.to_wire(), 1);
        assert_eq!(PortRole::from_wire(2), Some(PortRole::Root));
        assert_eq!(PortRole::from_wire(0), None);
    }

    #[test]
    fn test_force_version() {
        assert_eq!(ForceVersion::try_from(1).unwrap(), ForceVersion::Stp);
        assert_eq!(ForceVersion::try_from(2).unwrap(), ForceVersion::Rstp);
        assert!(ForceVersion::try_from(0).is_err());
        assert!(ForceVersion::try_from(3).is_err());
        assert!(ForceVersion::Rstp.rstp_version());
        assert!(ForceVersion::Stp.stp_version());
    }

    #[test]
    fn test_port_state_parse() {
        assert_eq!(PortState::parse("blocking"), Some(PortState::Discarding));
        assert_eq!(PortState::parse("forwarding"), Some(PortState::Forwarding));
        assert_eq!(PortState::parse("listening"), None);
    }
}
