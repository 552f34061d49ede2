//! Port Receive machine (802.1D 17.23).

use serde::Serialize;
use tracing::warn;

use super::{settle, trace_transition, unexpected};
use crate::bpdu::BpduType;
use crate::bridge::Bridge;
use crate::config::MIGRATE_TIME;
use crate::event::{Event, Machine};
use crate::port::{Port, MAX_PENDING_BPDUS};
use crate::timer::TimerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PrxState {
    #[default]
    None,
    Discard,
    Receive,
}

machine_record!(
    /// Port Receive machine record.
    PrxMachine,
    PrxState
);

pub(crate) fn run(br: &mut Bridge, ifindex: u32, event: &Event) -> bool {
    let began = match event {
        Event::Begin => {
            enter(br, ifindex, PrxState::Discard, event);
            true
        }
        Event::RcvdBpdu(bpdu) => {
            let vlan = br.vlan();
            let Some(p) = br.ports.get_mut(&ifindex) else {
                return false;
            };
            if p.pending.len() >= MAX_PENDING_BPDUS {
                p.pending.pop_front();
                p.stats.rx_discarded += 1;
                warn!(vlan, ifindex, "stpd: receive backlog full, oldest BPDU dropped");
            }
            p.pending.push_back(*bpdu);
            false
        }
        Event::Reevaluate
        | Event::TimerExpired(_)
        | Event::PortEnabled
        | Event::PortDisabled => false,
        other => {
            let state = br.ports.get(&ifindex).map(|p| p.prx.state);
            unexpected(br, ifindex, Machine::Prx, state, other);
            return false;
        }
    };
    settle(br, ifindex, Machine::Prx, event, next, enter) || began
}

fn next(_br: &Bridge, p: &Port) -> Option<PrxState> {
    let state = p.prx.state;
    if state == PrxState::None {
        return None;
    }
    let received = !p.pending.is_empty();
    if (received || p.timers.get(TimerKind::EdgeDelayWhile) != MIGRATE_TIME) && !p.port_enabled {
        return Some(PrxState::Discard);
    }
    match state {
        PrxState::Discard if received && p.port_enabled => Some(PrxState::Receive),
        PrxState::Receive if received && p.port_enabled && !p.vars.rcvd_msg => {
            Some(PrxState::Receive)
        }
        _ => None,
    }
}

fn enter(br: &mut Bridge, ifindex: u32, state: PrxState, event: &Event) {
    let Some(p) = br.ports.get_mut(&ifindex) else {
        return;
    };
    let from = p.prx.state;
    p.prx.record(state, event);

    match state {
        PrxState::None => {}
        PrxState::Discard => {
            p.pending.clear();
            p.vars.rcvd_msg = false;
            p.vars.rcvd_rstp = false;
            p.vars.rcvd_stp = false;
            p.timers.set(TimerKind::EdgeDelayWhile, MIGRATE_TIME);
        }
        PrxState::Receive => {
            let Some(bpdu) = p.pending.pop_front() else {
                return;
            };
            // updtBPDUVersion
            if bpdu.bpdu_type == BpduType::Rst {
                p.vars.rcvd_rstp = true;
            } else {
                p.vars.rcvd_stp = true;
            }
            // setTcFlags
            match bpdu.bpdu_type {
                BpduType::Tcn => p.vars.rcvd_tcn = true,
                BpduType::Config | BpduType::Rst => {
                    if bpdu.flags.topology_change {
                        p.vars.rcvd_tc = true;
                    }
                    if bpdu.bpdu_type == BpduType::Config && bpdu.flags.topology_change_ack {
                        p.vars.rcvd_tc_ack = true;
                    }
                }
            }
            p.rcvd = Some(bpdu);
            p.vars.oper_edge = false;
            p.vars.rcvd_msg = true;
            p.timers.set(TimerKind::EdgeDelayWhile, MIGRATE_TIME);
        }
    }
    trace_transition(br, ifindex, Machine::Prx, from, state, event);
}
