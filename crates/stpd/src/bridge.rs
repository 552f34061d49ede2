//! One spanning tree bridge (one VLAN): the bridge-wide variables, its
//! ports, and the queue through which every state machine is driven.
//!
//! The bridge is sans-io. Inputs (frames, ticks, link changes, hardware
//! acknowledgements) enqueue events; [`Bridge::process`] drains the queue,
//! running each machine until it settles, and returns the [`Action`]s the
//! caller must carry out. Machines never call each other; a machine that
//! changes a variable another machine reads enqueues a `Reevaluate` for it.

use std::collections::{BTreeMap, HashSet, VecDeque};

use tracing::{debug, error, info, warn};

use crate::bpdu::{self, Bpdu, BpduType, Encapsulation, TimeUnits};
use crate::config::{BridgeConfig, PortConfig};
use crate::error::{StpError, StpResult};
use crate::event::{Action, Event, Machine, Target};
use crate::machines::{self, PrsMachine};
use crate::port::Port;
use crate::status::{BridgeStatus, PortStatus};
use crate::timer::{Tick, TimerKind};
use crate::types::{PortRole, PortState};
use crate::vector::{BridgeId, PortId, PriorityVector, Times};

/// Upper bound on events handled by one `process` call. Reaching it means
/// two machines keep re-triggering each other.
const MAX_DISPATCH: usize = 100_000;

/// Bridge-wide topology change bookkeeping.
#[derive(Debug, Clone, Default)]
pub(crate) struct TopologyChanges {
    pub(crate) count: u64,
    pub(crate) seconds_since: u64,
}

pub struct Bridge {
    pub(crate) config: BridgeConfig,
    pub(crate) bridge_id: BridgeId,
    pub(crate) bridge_priority: PriorityVector,
    pub(crate) bridge_times: Times,
    pub(crate) root_priority: PriorityVector,
    pub(crate) root_port_id: PortId,
    pub(crate) root_times: Times,
    pub(crate) ports: BTreeMap<u32, Port>,
    pub(crate) prs: PrsMachine,
    pub(crate) units: TimeUnits,
    pub(crate) topology: TopologyChanges,
    /// Last tag handed out with a forwarding state request. Never reused,
    /// so a port that is removed and added again cannot be acknowledged by
    /// a request issued to its predecessor.
    hw_generation: u64,
    queue: VecDeque<(Target, Event)>,
    reevaluate_pending: HashSet<Target>,
    actions: Vec<Action>,
}

impl Bridge {
    /// Creates a bridge with IEEE wire time units.
    pub fn new(config: BridgeConfig) -> StpResult<Self> {
        Self::with_time_units(config, TimeUnits::Ieee)
    }

    pub fn with_time_units(config: BridgeConfig, units: TimeUnits) -> StpResult<Self> {
        config.validate()?;

        let bridge_id = config.bridge_id();
        let bridge_priority = PriorityVector::for_bridge(bridge_id);
        let bridge_times = config.times();
        let mut bridge = Self {
            config,
            bridge_id,
            bridge_priority,
            bridge_times,
            root_priority: bridge_priority,
            root_port_id: PortId::default(),
            root_times: bridge_times,
            ports: BTreeMap::new(),
            prs: PrsMachine::default(),
            units,
            topology: TopologyChanges::default(),
            hw_generation: 0,
            queue: VecDeque::new(),
            reevaluate_pending: HashSet::new(),
            actions: Vec::new(),
        };
        info!(vlan = bridge.vlan(), bridge_id = %bridge.bridge_id, "stpd: bridge created");
        bridge.enqueue(Target::Prs, Event::Begin);
        Ok(bridge)
    }

    pub fn vlan(&self) -> u16 {
        self.config.vlan
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn bridge_id(&self) -> BridgeId {
        self.bridge_id
    }

    pub fn root_priority(&self) -> &PriorityVector {
        &self.root_priority
    }

    pub fn root_times(&self) -> &Times {
        &self.root_times
    }

    /// Interface index of the root port, if any.
    pub fn root_port(&self) -> Option<u32> {
        self.ports
            .values()
            .find(|p| p.role == PortRole::Root)
            .map(|p| p.ifindex())
    }

    pub fn is_root(&self) -> bool {
        self.root_priority.root_bridge_id == self.bridge_id
    }

    pub fn port(&self, ifindex: u32) -> Option<&Port> {
        self.ports.get(&ifindex)
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    pub(crate) fn rstp_version(&self) -> bool {
        self.config.force_version.rstp_version()
    }

    // ---------------------------------------------------------------------
    // Inputs
    // ---------------------------------------------------------------------

    /// Attaches a port and starts its machines.
    pub fn add_port(&mut self, config: PortConfig, link_up: bool) -> StpResult<()> {
        config.validate()?;
        if config.brg_ifindex != self.vlan() {
            return Err(StpError::invalid_config(
                "brg_ifindex",
                format!("{} does not match bridge VLAN {}", config.brg_ifindex, self.vlan()),
            ));
        }
        let ifindex = config.ifindex;
        if self.ports.contains_key(&ifindex) {
            return Err(StpError::PortExists {
                vlan: self.vlan(),
                ifindex,
            });
        }

        let port = Port::new(config, link_up, self.bridge_times);
        info!(
            vlan = self.vlan(),
            ifindex,
            port_id = %port.port_id,
            enabled = port.port_enabled,
            "stpd: port added"
        );
        let arm_assurance = port.config.bridge_assurance;
        self.ports.insert(ifindex, port);
        if arm_assurance {
            self.arm_assurance(ifindex);
        }
        for machine in Machine::ALL {
            self.enqueue(Target::Port { ifindex, machine }, Event::Begin);
        }
        Ok(())
    }

    /// Detaches a port. Remaining ports re-run role selection.
    pub fn remove_port(&mut self, ifindex: u32) -> StpResult<()> {
        if self.ports.remove(&ifindex).is_none() {
            return Err(StpError::PortNotFound {
                vlan: self.vlan(),
                ifindex,
            });
        }
        self.queue.retain(|(target, _)| {
            !matches!(target, Target::Port { ifindex: i, .. } if *i == ifindex)
        });
        self.reevaluate_pending.retain(|target| {
            !matches!(target, Target::Port { ifindex: i, .. } if *i == ifindex)
        });
        info!(vlan = self.vlan(), ifindex, "stpd: port removed");
        self.reselect_all();
        Ok(())
    }

    /// Applies new port parameters after validating them.
    pub fn update_port(&mut self, config: PortConfig) -> StpResult<()> {
        config.validate()?;
        let vlan = self.vlan();
        let ifindex = config.ifindex;
        let rstp = self.rstp_version();
        let Some(port) = self.ports.get_mut(&ifindex) else {
            return Err(StpError::PortNotFound { vlan, ifindex });
        };
        if config.brg_ifindex != vlan {
            return Err(StpError::invalid_config(
                "brg_ifindex",
                format!("{} does not match bridge VLAN {}", config.brg_ifindex, vlan),
            ));
        }

        let old = std::mem::replace(&mut port.config, config);
        let new = port.config.clone();
        let identity_changed = old.priority != new.priority
            || old.effective_path_cost() != new.effective_path_cost();
        port.port_id = new.port_id();
        port.path_cost = new.effective_path_cost();
        port.oper_point_to_point = new.admin_point_to_point.resolve();
        if old.bpdu_guard && !new.bpdu_guard && port.guard.tripped {
            port.guard.tripped = false;
            port.guard.recovery.set(0);
            self.actions.push(Action::EnablePort { ifindex });
        }
        if !new.bridge_assurance {
            port.guard.assurance_inconsistent = false;
            port.guard.assurance_while.set(0);
        }
        debug!(vlan, ifindex, "stpd: port configuration updated");

        if new.bridge_assurance && !old.bridge_assurance {
            self.arm_assurance(ifindex);
        }
        if identity_changed {
            self.reselect_all();
        }
        if new.protocol_migration && !old.protocol_migration && rstp {
            self.enqueue(Target::Port { ifindex, machine: Machine::Ppm }, Event::Mcheck);
        }
        self.notify(ifindex, Machine::Bdm);
        self.notify(ifindex, Machine::Prt);
        self.refresh_enabled(ifindex);
        Ok(())
    }

    /// Applies new bridge parameters after validating them.
    pub fn update_config(&mut self, config: BridgeConfig) -> StpResult<()> {
        config.validate()?;
        if config.vlan != self.vlan() {
            return Err(StpError::invalid_config(
                "vlan",
                format!("{} does not match bridge VLAN {}", config.vlan, self.vlan()),
            ));
        }
        let version_changed = config.force_version != self.config.force_version;
        self.config = config;
        self.bridge_id = self.config.bridge_id();
        self.bridge_priority = PriorityVector::for_bridge(self.bridge_id);
        self.bridge_times = self.config.times();
        info!(vlan = self.vlan(), bridge_id = %self.bridge_id, "stpd: bridge configuration updated");

        if version_changed {
            // Protocol version changes restart every port machine.
            let ports: Vec<u32> = self.ports.keys().copied().collect();
            for ifindex in ports {
                for machine in Machine::ALL {
                    self.enqueue(Target::Port { ifindex, machine }, Event::Begin);
                }
            }
        } else {
            self.reselect_all();
        }
        Ok(())
    }

    /// Records a link state change.
    pub fn set_link(&mut self, ifindex: u32, up: bool) -> StpResult<()> {
        let vlan = self.vlan();
        let Some(port) = self.ports.get_mut(&ifindex) else {
            return Err(StpError::PortNotFound { vlan, ifindex });
        };
        port.link_up = up;
        self.refresh_enabled(ifindex);
        Ok(())
    }

    /// Requests a protocol migration check on a port.
    pub fn mcheck(&mut self, ifindex: u32) -> StpResult<()> {
        if !self.ports.contains_key(&ifindex) {
            return Err(StpError::PortNotFound {
                vlan: self.vlan(),
                ifindex,
            });
        }
        self.enqueue(Target::Port { ifindex, machine: Machine::Ppm }, Event::Mcheck);
        Ok(())
    }

    /// Handles a frame received on a port.
    pub fn receive_frame(&mut self, ifindex: u32, frame: &[u8]) {
        let vlan = self.vlan();
        let bridge_id = self.bridge_id;
        let units = self.units;
        let Some(port) = self.ports.get_mut(&ifindex) else {
            debug!(vlan, ifindex, "stpd: frame for unknown port dropped");
            return;
        };

        let received = match bpdu::parse_frame(frame, units) {
            Ok(received) => received,
            Err(e) => {
                port.stats.rx_unknown += 1;
                debug!(vlan, ifindex, error = %e, "stpd: unknown frame dropped");
                return;
            }
        };
        let bpdu = received.bpdu;

        if !port.port_enabled {
            port.stats.rx_discarded += 1;
            return;
        }

        if let Encapsulation::Pvst { vlan: frame_vlan } = received.encapsulation {
            if frame_vlan != vlan {
                port.stats.rx_discarded += 1;
                warn!(vlan, ifindex, frame_vlan, "stpd: PVST BPDU for another VLAN dropped");
                return;
            }
        }

        if bpdu.bpdu_type == BpduType::Config
            && bpdu.bridge_id == bridge_id
            && bpdu.port_id == port.port_id
        {
            port.stats.rx_discarded += 1;
            debug!(vlan, ifindex, "stpd: own BPDU looped back, dropped");
            return;
        }

        match bpdu.bpdu_type {
            BpduType::Config => port.stats.rx_config += 1,
            BpduType::Rst => port.stats.rx_rst += 1,
            BpduType::Tcn => port.stats.rx_tcn += 1,
        }

        if port.config.bpdu_guard {
            self.trip_bpdu_guard(ifindex);
            return;
        }

        if port.config.bridge_assurance {
            let was_inconsistent = port.guard.assurance_inconsistent;
            port.guard.assurance_inconsistent = false;
            if was_inconsistent {
                info!(vlan, ifindex, "stpd: bridge assurance restored");
                self.notify(ifindex, Machine::Prt);
            }
            self.arm_assurance(ifindex);
        }

        self.enqueue(
            Target::Port {
                ifindex,
                machine: Machine::Prx,
            },
            Event::RcvdBpdu(bpdu),
        );
    }

    /// One-second tick: decrements every port timer.
    pub fn tick(&mut self) {
        self.topology.seconds_since = self.topology.seconds_since.saturating_add(1);
        let ifindexes: Vec<u32> = self.ports.keys().copied().collect();
        for ifindex in ifindexes {
            let Some(port) = self.ports.get_mut(&ifindex) else {
                continue;
            };
            let report = port.timers.tick();
            let tx_released = port.tx_count > 0;
            port.tx_count = port.tx_count.saturating_sub(1);
            let recovered = port.guard.tripped
                && port.guard.recovery.tick() == Tick::Expired;
            let assurance_expired = port.config.bridge_assurance
                && port.port_enabled
                && port.guard.assurance_while.tick() == Tick::Expired;
            // Only a designated port expects to hear from its peer.
            let assurance_lost = assurance_expired && port.role == PortRole::Designated;

            for kind in &report.expired {
                for owner in kind.owners() {
                    self.enqueue(
                        Target::Port {
                            ifindex,
                            machine: *owner,
                        },
                        Event::TimerExpired(*kind),
                    );
                }
                if *kind == TimerKind::RrWhile {
                    self.notify_other_ports(ifindex, Machine::Prt);
                }
            }
            for kind in report.expired.iter().chain(report.running.iter()) {
                for watcher in kind.watchers() {
                    self.notify(ifindex, *watcher);
                }
            }
            if tx_released {
                self.notify(ifindex, Machine::Ptx);
            }
            if recovered {
                self.recover_bpdu_guard(ifindex);
            }
            if assurance_lost {
                self.lose_assurance(ifindex);
            } else if assurance_expired {
                self.arm_assurance(ifindex);
            }
        }
    }

    /// Hardware acknowledged a forwarding state change. `generation` is the
    /// value carried by the matching [`Action::SetPortState`].
    pub fn state_applied(&mut self, ifindex: u32, state: PortState, generation: u64) {
        self.enqueue(
            Target::Port {
                ifindex,
                machine: Machine::Pst,
            },
            Event::StateApplied { state, generation },
        );
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.hw_generation += 1;
        self.hw_generation
    }

    /// Hardware finished an address flush.
    pub fn fdb_flushed(&mut self, ifindex: u32) {
        self.enqueue(
            Target::Port {
                ifindex,
                machine: Machine::Tcm,
            },
            Event::FdbFlushed,
        );
    }

    /// Records a hardware request that failed after all retries.
    pub fn hardware_failed(&mut self, ifindex: u32) {
        if let Some(port) = self.ports.get_mut(&ifindex) {
            port.stats.hw_failures += 1;
        }
    }

    /// Records a BPDU the packet layer could not send.
    pub fn transmit_failed(&mut self, ifindex: u32) {
        if let Some(port) = self.ports.get_mut(&ifindex) {
            port.stats.tx_errors += 1;
        }
    }

    /// Accounts frames a receive pump dropped on a full queue.
    pub fn frames_dropped(&mut self, ifindex: u32, count: u64) {
        if let Some(port) = self.ports.get_mut(&ifindex) {
            port.stats.rx_dropped += count;
        }
    }

    /// Runs every queued event to completion and returns the resulting
    /// actions.
    pub fn process(&mut self) -> Vec<Action> {
        let mut handled = 0usize;
        while let Some((target, event)) = self.queue.pop_front() {
            if event == Event::Reevaluate {
                self.reevaluate_pending.remove(&target);
            }
            handled += 1;
            if handled > MAX_DISPATCH {
                error!(
                    vlan = self.vlan(),
                    dropped = self.queue.len() + 1,
                    "stpd: event storm, discarding queued events"
                );
                self.queue.clear();
                self.reevaluate_pending.clear();
                break;
            }
            self.dispatch(target, event);
        }
        std::mem::take(&mut self.actions)
    }

    /// Snapshot of the bridge and all of its ports.
    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            vlan: self.vlan(),
            bridge_id: self.bridge_id.to_string(),
            root_bridge_id: self.root_priority.root_bridge_id.to_string(),
            root_path_cost: self.root_priority.root_path_cost,
            root_port: self.root_port(),
            root_port_id: self.root_port_id.raw(),
            is_root: self.is_root(),
            max_age: self.root_times.max_age,
            hello_time: self.root_times.hello_time,
            forward_delay: self.root_times.forward_delay,
            topology_changes: self.topology.count,
            seconds_since_topology_change: self.topology.seconds_since,
            prs_state: format!("{:?}", self.prs.state),
            ports: self.ports.values().map(PortStatus::from_port).collect(),
        }
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    fn dispatch(&mut self, target: Target, event: Event) {
        match target {
            Target::Prs => {
                machines::prs::run(self, &event);
            }
            Target::Port { ifindex, machine } => {
                if !self.ports.contains_key(&ifindex) {
                    return;
                }
                let moved = match machine {
                    Machine::Pim => machines::pim::run(self, ifindex, &event),
                    Machine::Prt => machines::prt::run(self, ifindex, &event),
                    Machine::Pst => machines::pst::run(self, ifindex, &event),
                    Machine::Prx => machines::prx::run(self, ifindex, &event),
                    Machine::Ptx => machines::ptx::run(self, ifindex, &event),
                    Machine::Ppm => machines::ppm::run(self, ifindex, &event),
                    Machine::Bdm => machines::bdm::run(self, ifindex, &event),
                    Machine::Tcm => machines::tcm::run(self, ifindex, &event),
                };
                if moved {
                    self.notify_siblings(ifindex, machine);
                    if machine == Machine::Prt {
                        // allSynced and reRooted read the other ports
                        self.notify_other_ports(ifindex, Machine::Prt);
                    }
                }
            }
        }
    }

    pub(crate) fn enqueue(&mut self, target: Target, event: Event) {
        if event == Event::Reevaluate && !self.reevaluate_pending.insert(target) {
            return;
        }
        self.queue.push_back((target, event));
    }

    pub(crate) fn notify(&mut self, ifindex: u32, machine: Machine) {
        self.enqueue(Target::Port { ifindex, machine }, Event::Reevaluate);
    }

    fn notify_siblings(&mut self, ifindex: u32, except: Machine) {
        for machine in Machine::ALL {
            if machine != except {
                self.notify(ifindex, machine);
            }
        }
    }

    pub(crate) fn notify_other_ports(&mut self, ifindex: u32, machine: Machine) {
        let others: Vec<u32> = self.ports.keys().copied().filter(|i| *i != ifindex).collect();
        for other in others {
            self.notify(other, machine);
        }
    }

    pub(crate) fn notify_all_ports(&mut self, machine: Machine) {
        let all: Vec<u32> = self.ports.keys().copied().collect();
        for ifindex in all {
            self.notify(ifindex, machine);
        }
    }

    pub(crate) fn emit(&mut self, action: Action) {
        self.actions.push(action);
    }

    // ---------------------------------------------------------------------
    // Tree-wide procedures (802.1D 17.21)
    // ---------------------------------------------------------------------

    /// Raises `reselect` on a port and wakes role selection.
    pub(crate) fn request_reselect(&mut self, ifindex: u32) {
        if let Some(port) = self.ports.get_mut(&ifindex) {
            port.vars.reselect = true;
            port.vars.selected = false;
        }
        self.enqueue(Target::Prs, Event::Reevaluate);
    }

    fn reselect_all(&mut self) {
        for port in self.ports.values_mut() {
            port.vars.reselect = true;
            port.vars.selected = false;
        }
        self.enqueue(Target::Prs, Event::Reevaluate);
    }

    pub(crate) fn set_sync_tree(&mut self) {
        for port in self.ports.values_mut() {
            port.vars.sync = true;
        }
        self.notify_all_ports(Machine::Prt);
    }

    pub(crate) fn set_reroot_tree(&mut self) {
        for port in self.ports.values_mut() {
            port.vars.re_root = true;
        }
        self.notify_all_ports(Machine::Prt);
    }

    pub(crate) fn set_tc_prop_tree(&mut self, except: u32) {
        for (ifindex, port) in self.ports.iter_mut() {
            if *ifindex != except {
                port.vars.tc_prop = true;
            }
        }
        self.notify_other_ports(except, Machine::Tcm);
    }

    /// True when every other port is synced and settled in its selected
    /// role, and this port is settled too.
    pub(crate) fn all_synced(&self, ifindex: u32) -> bool {
        self.ports.iter().all(|(i, p)| {
            let settled = p.vars.selected && p.role == p.selected_role && !p.vars.updt_info;
            settled && (*i == ifindex || p.vars.synced)
        })
    }

    /// True when `rrWhile` has stopped on every other port.
    pub(crate) fn re_rooted(&self, ifindex: u32) -> bool {
        self.ports
            .iter()
            .filter(|(i, _)| **i != ifindex)
            .all(|(_, p)| p.timers.is_zero(TimerKind::RrWhile))
    }

    pub(crate) fn record_topology_change(&mut self) {
        self.topology.count += 1;
        self.topology.seconds_since = 0;
    }

    /// Encodes and queues a BPDU for transmission on a port.
    pub(crate) fn send_bpdu(&mut self, ifindex: u32, bpdu: &Bpdu) {
        let encapsulation = if self.config.pvst && self.vlan() != 1 {
            Encapsulation::Pvst { vlan: self.vlan() }
        } else {
            Encapsulation::Ieee
        };
        let frame = bpdu::build_frame(self.config.address, encapsulation, bpdu, self.units);
        if let Some(port) = self.ports.get_mut(&ifindex) {
            match bpdu.bpdu_type {
                BpduType::Config => port.stats.tx_config += 1,
                BpduType::Rst => port.stats.tx_rst += 1,
                BpduType::Tcn => port.stats.tx_tcn += 1,
            }
        }
        self.emit(Action::Transmit { ifindex, frame });
    }

    // ---------------------------------------------------------------------
    // Port enable, BPDU guard and bridge assurance
    // ---------------------------------------------------------------------

    pub(crate) fn refresh_enabled(&mut self, ifindex: u32) {
        let vlan = self.vlan();
        let Some(port) = self.ports.get_mut(&ifindex) else {
            return;
        };
        let enabled = port.compute_enabled();
        if enabled == port.port_enabled {
            return;
        }
        port.port_enabled = enabled;
        if !enabled {
            port.pending.clear();
        }
        info!(vlan, ifindex, enabled, "stpd: port enable changed");
        let event = if enabled {
            Event::PortEnabled
        } else {
            Event::PortDisabled
        };
        let assurance = port.config.bridge_assurance;
        for machine in Machine::ALL {
            self.enqueue(Target::Port { ifindex, machine }, event);
        }
        if enabled && assurance {
            self.arm_assurance(ifindex);
        }
    }

    fn trip_bpdu_guard(&mut self, ifindex: u32) {
        let vlan = self.vlan();
        let Some(port) = self.ports.get_mut(&ifindex) else {
            return;
        };
        port.guard.tripped = true;
        port.guard.recovery.set(port.config.bpdu_guard_interval);
        port.stats.bpdu_guard_trips += 1;
        warn!(vlan, ifindex, "stpd: BPDU received on BPDU guard port, shutting down");
        self.emit(Action::DisablePort {
            ifindex,
            reason: "bpdu guard".to_string(),
        });
        self.refresh_enabled(ifindex);
    }

    fn recover_bpdu_guard(&mut self, ifindex: u32) {
        let vlan = self.vlan();
        let Some(port) = self.ports.get_mut(&ifindex) else {
            return;
        };
        port.guard.tripped = false;
        info!(vlan, ifindex, "stpd: BPDU guard recovery interval elapsed, re-enabling");
        self.emit(Action::EnablePort { ifindex });
        self.refresh_enabled(ifindex);
    }

    fn arm_assurance(&mut self, ifindex: u32) {
        if let Some(port) = self.ports.get_mut(&ifindex) {
            let window = 3 * self.bridge_times.hello_time;
            port.guard.assurance_while.set(window);
        }
    }

    fn lose_assurance(&mut self, ifindex: u32) {
        let vlan = self.vlan();
        if let Some(port) = self.ports.get_mut(&ifindex) {
            if !port.guard.assurance_inconsistent {
                port.guard.assurance_inconsistent = true;
                warn!(vlan, ifindex, "stpd: no BPDU within bridge assurance window, blocking");
            }
        }
        self.notify(ifindex, Machine::Prt);
    }
}
