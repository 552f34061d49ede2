//! Spanning Tree Protocol Daemon
//!
//! IEEE 802.1D-2004 Rapid Spanning Tree (with legacy STP compatibility) for
//! SONiC. One bridge runs per VLAN. Each bridge is a sans-io state machine
//! core ([`Bridge`]) driven by a tokio actor ([`BridgeHandle`]); the
//! [`Engine`] owns the set of bridges and routes configuration, link changes
//! and status queries to them.
//!
//! Frames and the data plane are reached through the [`PacketIo`] and
//! [`HardwareControl`] traits.

pub mod actor;
pub mod bpdu;
pub mod bridge;
pub mod config;
pub mod config_file;
pub mod engine;
pub mod error;
pub mod event;
pub mod hal;
pub mod machines;
pub mod port;
pub mod status;
pub mod timer;
pub mod types;
pub mod vector;

pub use actor::{ActorConfig, BridgeHandle, RunningBridge};
pub use bpdu::{Bpdu, BpduFlags, BpduType, CodecError, Encapsulation, TimeUnits};
pub use bridge::Bridge;
pub use config::{BridgeConfig, PortConfig};
pub use config_file::StpdConfig;
pub use engine::{Engine, EngineOptions};
pub use error::{StpError, StpResult};
pub use event::Action;
pub use hal::{HardwareControl, PacketIo, RetryPolicy};
pub use status::{BridgeStatus, PortStatus};
pub use types::{AdminPointToPoint, ForceVersion, InfoIs, MacAddress, PortKey, PortRole, PortState};
pub use vector::{BridgeId, PortId, PriorityVector, Times};
