//! Port Role Selection machine (802.1D 17.28), one per bridge.

use serde::Serialize;
use tracing::{debug, error};

use crate::bridge::Bridge;
use crate::event::{Event, Machine};
use crate::types::{InfoIs, PortRole};
use crate::vector::{PortId, PriorityVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PrsState {
    #[default]
    None,
    InitBridge,
    RoleSelection,
}

machine_record!(
    /// Port Role Selection machine record.
    PrsMachine,
    PrsState
);

/// Role selection passes allowed for one event.
const MAX_PASSES: usize = 16;

pub(crate) fn run(br: &mut Bridge, event: &Event) -> bool {
    match event {
        Event::Begin => {
            enter(br, PrsState::InitBridge, event);
            enter(br, PrsState::RoleSelection, event);
            true
        }
        Event::Reevaluate => {
            if br.prs.state != PrsState::RoleSelection {
                return false;
            }
            let mut moved = false;
            for _ in 0..MAX_PASSES {
                if !br.ports.values().any(|p| p.vars.reselect) {
                    break;
                }
                enter(br, PrsState::RoleSelection, event);
                moved = true;
            }
            moved
        }
        other => {
            error!(
                vlan = br.vlan(),
                "stpd: PRS has no transition for {} in state {:?}",
                other.name(),
                br.prs.state
            );
            false
        }
    }
}

fn enter(br: &mut Bridge, state: PrsState, event: &Event) {
    let from = br.prs.state;
    br.prs.record(state, event);
    debug!(vlan = br.vlan(), "stpd: PRS {:?} -> {:?} on {}", from, state, event.name());

    match state {
        PrsState::None => {}
        PrsState::InitBridge => {
            for port in br.ports.values_mut() {
                port.selected_role = PortRole::Disabled;
            }
        }
        PrsState::RoleSelection => {
            clear_reselect_tree(br);
            update_roles_tree(br);
            set_selected_tree(br);
            for machine in [Machine::Pim, Machine::Prt, Machine::Ptx, Machine::Tcm] {
                br.notify_all_ports(machine);
            }
        }
    }
}

/// clearReselectTree (17.21.2)
fn clear_reselect_tree(br: &mut Bridge) {
    for port in br.ports.values_mut() {
        port.vars.reselect = false;
    }
}

/// setSelectedTree (17.21.16). Left unset while any port still asks for
/// reselection so the next pass runs first.
fn set_selected_tree(br: &mut Bridge) {
    if br.ports.values().any(|p| p.vars.reselect) {
        return;
    }
    for port in br.ports.values_mut() {
        port.vars.selected = true;
    }
}

/// updtRolesTree (17.21.25)
fn update_roles_tree(br: &mut Bridge) {
    let bridge_address = br.bridge_id.address();

    // Root path priority vectors of ports holding received information
    // from another bridge; the best one (if better than our own) wins.
    let mut root_priority = br.bridge_priority;
    let mut root_port: Option<u32> = None;
    for (ifindex, port) in &br.ports {
        if port.info_is != InfoIs::Received
            || port.port_priority.designated_bridge_id.address() == bridge_address
        {
            continue;
        }
        let candidate = port.port_priority.root_path(port.path_cost, port.port_id);
        if candidate.is_better_than(&root_priority) {
            root_priority = candidate;
            root_port = Some(*ifindex);
        }
    }

    let root_times = match root_port.and_then(|i| br.ports.get(&i)) {
        Some(port) => {
            let mut times = port.port_times;
            times.message_age = times.message_age.saturating_add(1);
            times
        }
        None => br.bridge_times,
    };

    let previous_root = br.root_priority.root_bridge_id;
    br.root_priority = root_priority;
    br.root_port_id = match root_port {
        Some(_) => root_priority.bridge_port_id,
        None => PortId::default(),
    };
    br.root_times = root_times;
    if previous_root != root_priority.root_bridge_id {
        debug!(
            vlan = br.vlan(),
            root = %root_priority.root_bridge_id,
            cost = root_priority.root_path_cost,
            "stpd: root bridge changed"
        );
    }

    let bridge_id = br.bridge_id;
    let hello_time = br.bridge_times.hello_time;
    for (ifindex, port) in br.ports.iter_mut() {
        port.designated_priority = PriorityVector {
            root_bridge_id: root_priority.root_bridge_id,
            root_path_cost: root_priority.root_path_cost,
            designated_bridge_id: bridge_id,
            designated_port_id: port.port_id,
            bridge_port_id: port.port_id,
        };
        port.designated_times = root_times;
        port.designated_times.hello_time = hello_time;

        let role = match port.info_is {
            InfoIs::Disabled => PortRole::Disabled,
            InfoIs::Aged => {
                port.vars.updt_info = true;
                PortRole::Designated
            }
            InfoIs::Mine => {
                if port.port_priority != port.designated_priority
                    || port.port_times != port.designated_times
                {
                    port.vars.updt_info = true;
                }
                PortRole::Designated
            }
            InfoIs::Received => {
                if Some(*ifindex) == root_port {
                    port.vars.updt_info = false;
                    PortRole::Root
                } else if port.designated_priority.is_better_than(&port.port_priority) {
                    port.vars.updt_info = true;
                    PortRole::Designated
                } else if port.port_priority.designated_bridge_id.address() == bridge_address {
                    port.vars.updt_info = false;
                    PortRole::Backup
                } else {
                    port.vars.updt_info = false;
                    PortRole::Alternate
                }
            }
        };
        port.selected_role = role;
    }
}
