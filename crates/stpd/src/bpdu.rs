//! BPDU codec: Configuration, RST and TCN BPDUs, carried either in plain
//! 802.2 LLC frames to the IEEE group address or in PVST SNAP frames.
//!
//! Frame layout (untagged):
//!
//! ```text
//! dst(6) src(6) length(2) LLC 42 42 03            BPDU
//! dst(6) src(6) length(2) SNAP AA AA 03 00000C 010B BPDU  vlan TLV
//! ```
//!
//! A single 802.1Q tag between the source address and the length field is
//! accepted on receive.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{MacAddress, PortRole};
use crate::vector::{BridgeId, PortId, PriorityVector, Times};

/// IEEE 802.1D bridge group address.
pub const STP_GROUP_ADDRESS: MacAddress = MacAddress::new([0x01, 0x80, 0xc2, 0x00, 0x00, 0x00]);

/// Shared spanning tree protocol address used by PVST.
pub const PVST_GROUP_ADDRESS: MacAddress = MacAddress::new([0x01, 0x00, 0x0c, 0xcc, 0xcc, 0xcd]);

const LLC_HEADER: [u8; 3] = [0x42, 0x42, 0x03];
const SNAP_HEADER: [u8; 8] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x0c, 0x01, 0x0b];
const VLAN_TPID: u16 = 0x8100;
const MIN_FRAME_LEN: usize = 60;

pub const CONFIG_BPDU_LEN: usize = 35;
pub const RST_BPDU_LEN: usize = 36;
pub const TCN_BPDU_LEN: usize = 4;

/// Codec errors. Any of these classifies the frame as unknown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("frame truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("destination {0} is not a spanning tree group address")]
    NotSpanningTree(MacAddress),

    #[error("unexpected LLC/SNAP header")]
    BadHeader,

    #[error("protocol identifier {0:#06x} is not 0")]
    BadProtocolId(u16),

    #[error("unknown BPDU type {bpdu_type:#04x} (version {version})")]
    UnknownType { bpdu_type: u8, version: u8 },

    #[error("message age {message_age}s is not below max age {max_age}s")]
    MessageAgeExceeded { message_age: u16, max_age: u16 },
}

/// Encoding of the timer fields on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnits {
    /// 1/256 second units, as 802.1D specifies
    #[default]
    Ieee,
    /// Whole seconds, for peers using the legacy encoding
    WholeSeconds,
}

impl TimeUnits {
    fn encode(self, seconds: u16) -> u16 {
        match self {
            Self::Ieee => seconds.saturating_mul(256),
            Self::WholeSeconds => seconds,
        }
    }

    fn decode(self, raw: u16) -> u16 {
        match self {
            Self::Ieee => ((u32::from(raw) + 128) / 256) as u16,
            Self::WholeSeconds => raw,
        }
    }
}

/// BPDU type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BpduType {
    Config,
    Rst,
    Tcn,
}

impl BpduType {
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Config => 0x00,
            Self::Rst => 0x02,
            Self::Tcn => 0x80,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Rst => "rst",
            Self::Tcn => "tcn",
        }
    }
}

/// BPDU flags octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BpduFlags {
    pub topology_change: bool,
    pub proposal: bool,
    /// Raw two-bit port role
    pub role: u8,
    pub learning: bool,
    pub forwarding: bool,
    pub agreement: bool,
    pub topology_change_ack: bool,
}

impl BpduFlags {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            topology_change: byte & 0x01 != 0,
            proposal: byte & 0x02 != 0,
            role: (byte >> 2) & 0x03,
            learning: byte & 0x10 != 0,
            forwarding: byte & 0x20 != 0,
            agreement: byte & 0x40 != 0,
            topology_change_ack: byte & 0x80 != 0,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut byte = (self.role & 0x03) << 2;
        if self.topology_change {
            byte |= 0x01;
        }
        if self.proposal {
            byte |= 0x02;
        }
        if self.learning {
            byte |= 0x10;
        }
        if self.forwarding {
            byte |= 0x20;
        }
        if self.agreement {
            byte |= 0x40;
        }
        if self.topology_change_ack {
            byte |= 0x80;
        }
        byte
    }
}

/// A decoded BPDU. Times are whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bpdu {
    pub bpdu_type: BpduType,
    pub version: u8,
    pub flags: BpduFlags,
    pub root_id: BridgeId,
    pub root_path_cost: u32,
    pub bridge_id: BridgeId,
    pub port_id: PortId,
    pub message_age: u16,
    pub max_age: u16,
    pub hello_time: u16,
    pub forward_delay: u16,
}

impl Bpdu {
    /// A Topology Change Notification BPDU.
    pub fn tcn() -> Self {
        Self {
            bpdu_type: BpduType::Tcn,
            version: 0,
            flags: BpduFlags::default(),
            root_id: BridgeId::default(),
            root_path_cost: 0,
            bridge_id: BridgeId::default(),
            port_id: PortId::default(),
            message_age: 0,
            max_age: 0,
            hello_time: 0,
            forward_delay: 0,
        }
    }

    /// A Configuration or RST BPDU carrying `vector` and `times`.
    pub fn carrying(bpdu_type: BpduType, vector: &PriorityVector, times: &Times) -> Self {
        Self {
            bpdu_type,
            version: if bpdu_type == BpduType::Rst { 2 } else { 0 },
            flags: BpduFlags::default(),
            root_id: vector.root_bridge_id,
            root_path_cost: vector.root_path_cost,
            bridge_id: vector.designated_bridge_id,
            port_id: vector.designated_port_id,
            message_age: times.message_age,
            max_age: times.max_age,
            hello_time: times.hello_time,
            forward_delay: times.forward_delay,
        }
    }

    /// Message priority vector as seen by the receiving port.
    pub fn priority_vector(&self, rx_port: PortId) -> PriorityVector {
        PriorityVector {
            root_bridge_id: self.root_id,
            root_path_cost: self.root_path_cost,
            designated_bridge_id: self.bridge_id,
            designated_port_id: self.port_id,
            bridge_port_id: rx_port,
        }
    }

    pub fn times(&self) -> Times {
        Times {
            message_age: self.message_age,
            max_age: self.max_age,
            hello_time: self.hello_time,
            forward_delay: self.forward_delay,
        }
    }

    /// Role the sender claims. Configuration BPDUs always come from a
    /// designated port.
    pub fn role(&self) -> Option<PortRole> {
        match self.bpdu_type {
            BpduType::Config => Some(PortRole::Designated),
            BpduType::Rst => PortRole::from_wire(self.flags.role),
            BpduType::Tcn => None,
        }
    }

    /// Decodes the BPDU part of a frame (starting at the protocol id).
    pub fn decode(data: &[u8], units: TimeUnits) -> Result<Self, CodecError> {
        if data.len() < TCN_BPDU_LEN {
            return Err(CodecError::Truncated {
                expected: TCN_BPDU_LEN,
                actual: data.len(),
            });
        }

        let protocol_id = u16::from_be_bytes([data[0], data[1]]);
        if protocol_id != 0 {
            return Err(CodecError::BadProtocolId(protocol_id));
        }

        let version = data[2];
        let bpdu_type = match (data[3], version) {
            (0x80, _) => return Ok(Self { version, ..Self::tcn() }),
            (0x00, _) => BpduType::Config,
            (0x02, v) if v >= 2 => BpduType::Rst,
            (other, v) => {
                return Err(CodecError::UnknownType {
                    bpdu_type: other,
                    version: v,
                })
            }
        };

        let expected = match bpdu_type {
            BpduType::Rst => RST_BPDU_LEN,
            _ => CONFIG_BPDU_LEN,
        };
        if data.len() < expected {
            return Err(CodecError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        let field = |at: usize| u16::from_be_bytes([data[at], data[at + 1]]);
        let mut root = [0u8; 8];
        root.copy_from_slice(&data[5..13]);
        let mut bridge = [0u8; 8];
        bridge.copy_from_slice(&data[17..25]);

        let mut flags = BpduFlags::from_byte(data[4]);
        if bpdu_type == BpduType::Config {
            // Only TC and TCA are defined for configuration BPDUs.
            flags = BpduFlags {
                topology_change: flags.topology_change,
                topology_change_ack: flags.topology_change_ack,
                ..BpduFlags::default()
            };
        }

        let bpdu = Self {
            bpdu_type,
            version,
            flags,
            root_id: BridgeId::from_bytes(root),
            root_path_cost: u32::from_be_bytes([data[13], data[14], data[15], data[16]]),
            bridge_id: BridgeId::from_bytes(bridge),
            port_id: PortId::from_raw(field(25)),
            message_age: units.decode(field(27)),
            max_age: units.decode(field(29)),
            hello_time: units.decode(field(31)),
            forward_delay: units.decode(field(33)),
        };

        if bpdu_type == BpduType::Config && bpdu.message_age >= bpdu.max_age {
            return Err(CodecError::MessageAgeExceeded {
                message_age: bpdu.message_age,
                max_age: bpdu.max_age,
            });
        }

        Ok(bpdu)
    }

    /// Encodes the BPDU, starting at the protocol id.
    pub fn encode(&self, units: TimeUnits) -> Vec<u8> {
        if self.bpdu_type == BpduType::Tcn {
            return vec![0x00, 0x00, 0x00, BpduType::Tcn.to_wire()];
        }

        let mut out = Vec::with_capacity(RST_BPDU_LEN);
        out.extend_from_slice(&[0x00, 0x00, self.version, self.bpdu_type.to_wire()]);
        out.push(self.flags.to_byte());
        out.extend_from_slice(&self.root_id.to_bytes());
        out.extend_from_slice(&self.root_path_cost.to_be_bytes());
        out.extend_from_slice(&self.bridge_id.to_bytes());
        out.extend_from_slice(&self.port_id.raw().to_be_bytes());
        for seconds in [self.message_age, self.max_age, self.hello_time, self.forward_delay] {
            out.extend_from_slice(&units.encode(seconds).to_be_bytes());
        }
        if self.bpdu_type == BpduType::Rst {
            // Version 1 length
            out.push(0);
        }
        out
    }
}

/// How a BPDU was (or is to be) carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encapsulation {
    Ieee,
    Pvst { vlan: u16 },
}

/// A BPDU extracted from a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub source: MacAddress,
    pub encapsulation: Encapsulation,
    pub bpdu: Bpdu,
}

fn mac_at(frame: &[u8], at: usize) -> MacAddress {
    let mut bytes = [0u8; 6];
    bytes.copy_from_slice(&frame[at..at + 6]);
    MacAddress::new(bytes)
}

/// Classifies and decodes a raw Ethernet frame.
pub fn parse_frame(frame: &[u8], units: TimeUnits) -> Result<ReceivedFrame, CodecError> {
    let truncated = |expected: usize| CodecError::Truncated {
        expected,
        actual: frame.len(),
    };

    if frame.len() < 14 {
        return Err(truncated(14));
    }
    let destination = mac_at(frame, 0);
    let source = mac_at(frame, 6);

    let mut offset = 12;
    let mut tag_vlan = None;
    if u16::from_be_bytes([frame[12], frame[13]]) == VLAN_TPID {
        if frame.len() < 18 {
            return Err(truncated(18));
        }
        tag_vlan = Some(u16::from_be_bytes([frame[14], frame[15]]) & 0x0fff);
        offset = 16;
    }
    let length = usize::from(u16::from_be_bytes([frame[offset], frame[offset + 1]]));
    offset += 2;
    // Trust the 802.3 length only when it is a length and fits the frame.
    let end = if length <= 1500 && offset + length <= frame.len() {
        offset + length
    } else {
        frame.len()
    };
    let body = &frame[offset..end];

    if destination == STP_GROUP_ADDRESS {
        if body.len() < LLC_HEADER.len() || body[..3] != LLC_HEADER {
            return Err(CodecError::BadHeader);
        }
        let bpdu = Bpdu::decode(&body[3..], units)?;
        return Ok(ReceivedFrame {
            source,
            encapsulation: Encapsulation::Ieee,
            bpdu,
        });
    }

    if destination == PVST_GROUP_ADDRESS {
        if body.len() < SNAP_HEADER.len() || body[..8] != SNAP_HEADER {
            return Err(CodecError::BadHeader);
        }
        let payload = &body[8..];
        let bpdu = Bpdu::decode(payload, units)?;
        let bpdu_len = match bpdu.bpdu_type {
            BpduType::Tcn => TCN_BPDU_LEN,
            BpduType::Config => CONFIG_BPDU_LEN,
            BpduType::Rst => RST_BPDU_LEN,
        };
        // Originating VLAN TLV: type 0, length 2, vlan
        let tlv_vlan = payload
            .get(bpdu_len..bpdu_len + 6)
            .filter(|tlv| tlv[..4] == [0x00, 0x00, 0x00, 0x02])
            .map(|tlv| u16::from_be_bytes([tlv[4], tlv[5]]));
        let vlan = tlv_vlan.or(tag_vlan).unwrap_or(1);
        return Ok(ReceivedFrame {
            source,
            encapsulation: Encapsulation::Pvst { vlan },
            bpdu,
        });
    }

    Err(CodecError::NotSpanningTree(destination))
}

/// Builds a complete, padded Ethernet frame.
pub fn build_frame(
    source: MacAddress,
    encapsulation: Encapsulation,
    bpdu: &Bpdu,
    units: TimeUnits,
) -> Vec<u8> {
    let payload = bpdu.encode(units);
    let mut body = Vec::with_capacity(payload.len() + 14);
    let destination = match encapsulation {
        Encapsulation::Ieee => {
            body.extend_from_slice(&LLC_HEADER);
            body.extend_from_slice(&payload);
            STP_GROUP_ADDRESS
        }
        Encapsulation::Pvst { vlan } => {
            body.extend_from_slice(&SNAP_HEADER);
            body.extend_from_slice(&payload);
            body.extend_from_slice(&[0x00, 0x00, 0x00, 0x02]);
            body.extend_from_slice(&vlan.to_be_bytes());
            PVST_GROUP_ADDRESS
        }
    };

    let mut frame = Vec::with_capacity(MIN_FRAME_LEN.max(body.len() + 14));
    frame.extend_from_slice(destination.as_bytes());
    frame.extend_from_slice(source.as_bytes());
    frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
    frame.extend_from_slice(&body);
    if frame.len() < MIN_FRAME_LEN {
        frame.resize(MIN_FRAME_LEN, 0);
    }
    frame
}
