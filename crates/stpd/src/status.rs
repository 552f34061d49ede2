//! Read-only snapshots of bridge and port state for operators.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::machines::{
    BdmMachine, PimMachine, PpmMachine, PrtMachine, PrxMachine, PstMachine, PtxMachine, TcmMachine,
};
use crate::port::{Port, PortStats, PortVars};
use crate::types::{InfoIs, PortRole, PortState};

/// Bridge-wide status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStatus {
    pub vlan: u16,
    pub bridge_id: String,
    pub root_bridge_id: String,
    pub root_path_cost: u32,
    /// Interface index of the root port
    pub root_port: Option<u32>,
    /// Port identifier of the root port, 0 when this bridge is root
    pub root_port_id: u16,
    pub is_root: bool,
    pub max_age: u16,
    pub hello_time: u16,
    pub forward_delay: u16,
    pub topology_changes: u64,
    pub seconds_since_topology_change: u64,
    pub prs_state: String,
    pub ports: Vec<PortStatus>,
}

impl BridgeStatus {
    pub fn port(&self, ifindex: u32) -> Option<&PortStatus> {
        self.ports.iter().find(|p| p.ifindex == ifindex)
    }
}

/// Current state and previous state of every machine of a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineStates {
    pub pim: PimMachine,
    pub prt: PrtMachine,
    pub pst: PstMachine,
    pub prx: PrxMachine,
    pub ptx: PtxMachine,
    pub ppm: PpmMachine,
    pub bdm: BdmMachine,
    pub tcm: TcmMachine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortStatus {
    pub ifindex: u32,
    pub port_id: u16,
    pub enabled: bool,
    pub role: PortRole,
    pub state: PortState,
    pub info_is: InfoIs,
    pub path_cost: u32,
    pub designated_root: String,
    pub designated_cost: u32,
    pub designated_bridge: String,
    pub designated_port: u16,
    pub oper_edge: bool,
    pub oper_point_to_point: bool,
    pub bpdu_guard_tripped: bool,
    pub assurance_inconsistent: bool,
    pub vars: PortVars,
    pub timers: BTreeMap<&'static str, u16>,
    pub machines: MachineStates,
    pub stats: PortStats,
}

impl PortStatus {
    pub(crate) fn from_port(port: &Port) -> Self {
        // Information held for the segment: received from the designated
        // bridge, or our own when we are designated.
        let held = &port.port_priority;
        Self {
            ifindex: port.ifindex(),
            port_id: port.port_id.raw(),
            enabled: port.port_enabled,
            role: port.role,
            state: port.state(),
            info_is: port.info_is,
            path_cost: port.path_cost,
            designated_root: held.root_bridge_id.to_string(),
            designated_cost: held.root_path_cost,
            designated_bridge: held.designated_bridge_id.to_string(),
            designated_port: held.designated_port_id.raw(),
            oper_edge: port.vars.oper_edge,
            oper_point_to_point: port.oper_point_to_point,
            bpdu_guard_tripped: port.guard.tripped,
            assurance_inconsistent: port.guard.assurance_inconsistent,
            vars: port.vars.clone(),
            timers: port
                .timers
                .values()
                .into_iter()
                .map(|(kind, value)| (kind.as_str(), value))
                .collect(),
            machines: MachineStates {
                pim: port.pim.clone(),
                prt: port.prt.clone(),
                pst: port.pst.clone(),
                prx: port.prx.clone(),
                ptx: port.ptx.clone(),
                ppm: port.ppm.clone(),
                bdm: port.bdm.clone(),
                tcm: port.tcm.clone(),
            },
            stats: port.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bridge::Bridge;
    use crate::config::{BridgeConfig, PortConfig};
    use crate::types::{MacAddress, PortRole};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_serializes() {
        let mut bridge = Bridge::new(BridgeConfig::new(10, MacAddress::new([0, 1, 2, 3, 4, 5]))).unwrap();
        bridge.add_port(PortConfig::new(10, 3), true).unwrap();
        bridge.process();

        let status = bridge.status();
        assert_eq!(status.vlan, 10);
        assert!(status.is_root);
        assert_eq!(status.root_port, None);
        assert_eq!(status.root_port_id, 0);
        let port = status.port(3).unwrap();
        assert_eq!(port.role, PortRole::Designated);
        assert_eq!(port.timers.len(), 8);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["ports"][0]["role"], "designated");
        assert_eq!(json["ports"][0]["machines"]["prt"]["state"], "DesignatedPort");
        assert_eq!(json["bridge_id"], status.bridge_id.as_str());
    }
}
