//! Per-port protocol state.

use std::collections::VecDeque;

use serde::Serialize;

use crate::bpdu::Bpdu;
use crate::config::{PortConfig, MIGRATE_TIME};
use crate::machines::{
    BdmMachine, PimMachine, PpmMachine, PrtMachine, PrxMachine, PstMachine, PtxMachine, TcmMachine,
};
use crate::timer::{Countdown, PortTimers, TimerKind};
use crate::types::{InfoIs, PortRole, PortState, RcvdInfo};
use crate::vector::{PortId, PriorityVector, Times};

/// BPDUs held while Port Information is still processing an earlier one.
pub(crate) const MAX_PENDING_BPDUS: usize = 16;

/// The boolean protocol variables of a port (802.1D 17.19).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortVars {
    pub agree: bool,
    pub agreed: bool,
    pub proposing: bool,
    pub proposed: bool,
    pub sync: bool,
    pub synced: bool,
    pub learn: bool,
    pub learning: bool,
    pub forward: bool,
    pub forwarding: bool,
    pub oper_edge: bool,
    pub selected: bool,
    pub updt_info: bool,
    pub reselect: bool,
    pub disputed: bool,
    pub re_root: bool,
    pub send_rstp: bool,
    pub rcvd_msg: bool,
    pub rcvd_rstp: bool,
    pub rcvd_stp: bool,
    pub rcvd_tc: bool,
    pub rcvd_tcn: bool,
    pub rcvd_tc_ack: bool,
    pub tc_prop: bool,
    pub tc_ack: bool,
    pub new_info: bool,
    pub fdb_flush: bool,
    pub mcheck: bool,
}

/// Counters reported in port status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortStats {
    pub rx_config: u64,
    pub rx_rst: u64,
    pub rx_tcn: u64,
    pub tx_config: u64,
    pub tx_rst: u64,
    pub tx_tcn: u64,
    /// BPDUs the packet layer failed to send
    pub tx_errors: u64,
    pub rx_unknown: u64,
    pub rx_discarded: u64,
    /// Frames dropped before reaching the bridge because its queue was full
    pub rx_dropped: u64,
    pub tc_detected: u64,
    pub fdb_flushes: u64,
    pub bpdu_guard_trips: u64,
    pub hw_failures: u64,
}

/// BPDU guard and bridge assurance bookkeeping.
#[derive(Debug, Clone, Default)]
pub(crate) struct GuardState {
    /// Port was shut down by BPDU guard
    pub(crate) tripped: bool,
    pub(crate) recovery: Countdown,
    pub(crate) assurance_while: Countdown,
    /// No BPDU seen within the bridge assurance window
    pub(crate) assurance_inconsistent: bool,
}

/// Hardware requests issued but not yet acknowledged.
#[derive(Debug, Clone, Default)]
pub(crate) struct HwRequests {
    pub(crate) state: Option<PortState>,
    /// Tag of the outstanding state request
    pub(crate) generation: u64,
    pub(crate) applied: PortState,
    pub(crate) flush_in_flight: bool,
    pub(crate) flush_again: bool,
}

/// A bridge port and the state of its machines.
#[derive(Debug, Clone)]
pub struct Port {
    pub(crate) config: PortConfig,
    pub(crate) port_id: PortId,
    pub(crate) path_cost: u32,
    pub(crate) link_up: bool,
    pub(crate) port_enabled: bool,
    pub(crate) oper_point_to_point: bool,

    pub(crate) role: PortRole,
    pub(crate) selected_role: PortRole,
    pub(crate) info_is: InfoIs,
    pub(crate) rcvd_info: RcvdInfo,
    pub(crate) vars: PortVars,
    pub(crate) timers: PortTimers,
    pub(crate) tx_count: u32,

    pub(crate) port_priority: PriorityVector,
    pub(crate) port_times: Times,
    pub(crate) designated_priority: PriorityVector,
    pub(crate) designated_times: Times,
    pub(crate) msg_priority: PriorityVector,
    pub(crate) msg_times: Times,

    /// Message handed from Port Receive to Port Information
    pub(crate) rcvd: Option<Bpdu>,
    /// BPDUs waiting for Port Receive
    pub(crate) pending: VecDeque<Bpdu>,

    pub(crate) hw: HwRequests,
    pub(crate) guard: GuardState,
    pub(crate) stats: PortStats,

    pub(crate) pim: PimMachine,
    pub(crate) prt: PrtMachine,
    pub(crate) pst: PstMachine,
    pub(crate) prx: PrxMachine,
    pub(crate) ptx: PtxMachine,
    pub(crate) ppm: PpmMachine,
    pub(crate) bdm: BdmMachine,
    pub(crate) tcm: TcmMachine,
}

impl Port {
    pub(crate) fn new(config: PortConfig, link_up: bool, bridge_times: Times) -> Self {
        let mut port = Self {
            port_id: config.port_id(),
            path_cost: config.effective_path_cost(),
            oper_point_to_point: config.admin_point_to_point.resolve(),
            link_up,
            port_enabled: false,
            config,
            role: PortRole::Disabled,
            selected_role: PortRole::Disabled,
            info_is: InfoIs::Disabled,
            rcvd_info: RcvdInfo::Other,
            vars: PortVars::default(),
            timers: PortTimers::default(),
            tx_count: 0,
            port_priority: PriorityVector::default(),
            port_times: bridge_times,
            designated_priority: PriorityVector::default(),
            designated_times: bridge_times,
            msg_priority: PriorityVector::default(),
            msg_times: Times::default(),
            rcvd: None,
            pending: VecDeque::new(),
            hw: HwRequests::default(),
            guard: GuardState::default(),
            stats: PortStats::default(),
            pim: PimMachine::default(),
            prt: PrtMachine::default(),
            pst: PstMachine::default(),
            prx: PrxMachine::default(),
            ptx: PtxMachine::default(),
            ppm: PpmMachine::default(),
            bdm: BdmMachine::default(),
            tcm: TcmMachine::default(),
        };
        port.port_enabled = port.compute_enabled();
        port.timers.set(TimerKind::EdgeDelayWhile, MIGRATE_TIME);
        port
    }

    /// Administrative and operational enable combined.
    pub(crate) fn compute_enabled(&self) -> bool {
        self.config.enable && self.link_up && !self.guard.tripped
    }

    pub fn ifindex(&self) -> u32 {
        self.config.ifindex
    }

    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    pub fn role(&self) -> PortRole {
        self.role
    }

    pub fn info_is(&self) -> InfoIs {
        self.info_is
    }

    pub fn vars(&self) -> &PortVars {
        &self.vars
    }

    pub fn timers(&self) -> &PortTimers {
        &self.timers
    }

    pub fn stats(&self) -> &PortStats {
        &self.stats
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.port_enabled
    }

    /// Forwarding state as last acknowledged by hardware.
    pub fn state(&self) -> PortState {
        if self.vars.forwarding {
            PortState::Forwarding
        } else if self.vars.learning {
            PortState::Learning
        } else {
            PortState::Discarding
        }
    }

    pub fn port_priority(&self) -> &PriorityVector {
        &self.port_priority
    }

    pub fn designated_priority(&self) -> &PriorityVector {
        &self.designated_priority
    }
}
