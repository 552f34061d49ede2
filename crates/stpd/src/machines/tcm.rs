//! Topology Change machine (802.1D 17.31).
//!
//! Detects topology changes on forwarding root and designated ports,
//! propagates them to the other ports and flushes learned addresses. A
//! flush is a hardware request; `fdbFlush` stays set until the data plane
//! reports completion.

use serde::Serialize;
use tracing::info;

use super::{settle, trace_transition, unexpected};
use crate::bridge::Bridge;
use crate::event::{Action, Event, Machine};
use crate::port::Port;
use crate::timer::TimerKind;
use crate::types::PortRole;
use crate::vector::Times;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TcmState {
    #[default]
    None,
    Inactive,
    Learning,
    Detected,
    Active,
    NotifiedTcn,
    NotifiedTc,
    Propagating,
    Acknowledged,
}

machine_record!(
    /// Topology Change machine record.
    TcmMachine,
    TcmState
);

pub(crate) fn run(br: &mut Bridge, ifindex: u32, event: &Event) -> bool {
    let began = match event {
        Event::Begin => {
            enter(br, ifindex, TcmState::Inactive, event);
            true
        }
        Event::FdbFlushed => {
            flushed(br, ifindex, event);
            false
        }
        Event::Reevaluate
        | Event::TimerExpired(_)
        | Event::PortEnabled
        | Event::PortDisabled => false,
        other => {
            let state = br.ports.get(&ifindex).map(|p| p.tcm.state);
            unexpected(br, ifindex, Machine::Tcm, state, other);
            return false;
        }
    };
    settle(br, ifindex, Machine::Tcm, event, next, enter) || began
}

/// Hardware finished a flush. A flush requested meanwhile is sent now.
fn flushed(br: &mut Bridge, ifindex: u32, event: &Event) {
    let Some(p) = br.ports.get_mut(&ifindex) else {
        return;
    };
    if !p.hw.flush_in_flight {
        let state = p.tcm.state;
        unexpected(br, ifindex, Machine::Tcm, state, event);
        return;
    }
    if p.hw.flush_again {
        p.hw.flush_again = false;
        p.stats.fdb_flushes += 1;
        br.emit(Action::FlushFdb { ifindex });
        return;
    }
    p.hw.flush_in_flight = false;
    p.vars.fdb_flush = false;
}

/// Raises `fdbFlush` and asks hardware to flush, coalescing with a flush
/// already in progress.
fn request_flush(br: &mut Bridge, ifindex: u32) {
    let Some(p) = br.ports.get_mut(&ifindex) else {
        return;
    };
    p.vars.fdb_flush = true;
    if p.hw.flush_in_flight {
        p.hw.flush_again = true;
        return;
    }
    p.hw.flush_in_flight = true;
    p.stats.fdb_flushes += 1;
    br.emit(Action::FlushFdb { ifindex });
}

fn next(_br: &Bridge, p: &Port) -> Option<TcmState> {
    let v = &p.vars;
    let root_or_designated = matches!(p.role, PortRole::Root | PortRole::Designated);
    match p.tcm.state {
        TcmState::Inactive if v.learn && !v.fdb_flush => Some(TcmState::Learning),
        TcmState::Learning if root_or_designated && v.forward && !v.oper_edge => {
            Some(TcmState::Detected)
        }
        TcmState::Learning
            if v.rcvd_tc || v.rcvd_tcn || v.rcvd_tc_ack || v.tc_prop =>
        {
            Some(TcmState::Learning)
        }
        TcmState::Learning if !root_or_designated && !(v.learn || v.learning) => {
            Some(TcmState::Inactive)
        }
        TcmState::Active if !root_or_designated || v.oper_edge => Some(TcmState::Learning),
        TcmState::Active if v.rcvd_tcn => Some(TcmState::NotifiedTcn),
        TcmState::Active if v.rcvd_tc => Some(TcmState::NotifiedTc),
        TcmState::Active if v.tc_prop && !v.oper_edge => Some(TcmState::Propagating),
        TcmState::Active if v.rcvd_tc_ack => Some(TcmState::Acknowledged),
        TcmState::NotifiedTcn => Some(TcmState::NotifiedTc),
        TcmState::Detected
        | TcmState::NotifiedTc
        | TcmState::Propagating
        | TcmState::Acknowledged => Some(TcmState::Active),
        _ => None,
    }
}

fn enter(br: &mut Bridge, ifindex: u32, state: TcmState, event: &Event) {
    let vlan = br.vlan();
    let root_times = br.root_times;
    let Some(p) = br.ports.get_mut(&ifindex) else {
        return;
    };
    let from = p.tcm.state;
    p.tcm.record(state, event);

    let mut flush = false;
    let mut propagate = false;
    let mut detected = false;
    match state {
        TcmState::None | TcmState::Active => {}
        TcmState::Inactive => {
            flush = true;
            p.timers.set(TimerKind::TcWhile, 0);
            p.vars.tc_ack = false;
        }
        TcmState::Learning => {
            p.vars.rcvd_tc = false;
            p.vars.rcvd_tcn = false;
            p.vars.rcvd_tc_ack = false;
            p.vars.tc_prop = false;
        }
        TcmState::Detected => {
            new_tc_while(p, root_times);
            propagate = true;
            p.vars.new_info = true;
            p.stats.tc_detected += 1;
            detected = true;
        }
        TcmState::NotifiedTcn => new_tc_while(p, root_times),
        TcmState::NotifiedTc => {
            p.vars.rcvd_tcn = false;
            p.vars.rcvd_tc = false;
            if p.role == PortRole::Designated {
                p.vars.tc_ack = true;
            }
            propagate = true;
        }
        TcmState::Propagating => {
            new_tc_while(p, root_times);
            flush = true;
            p.vars.tc_prop = false;
        }
        TcmState::Acknowledged => {
            p.timers.set(TimerKind::TcWhile, 0);
            p.vars.rcvd_tc_ack = false;
        }
    }

    trace_transition(br, ifindex, Machine::Tcm, from, state, event);
    if detected {
        info!(vlan, ifindex, "stpd: topology change detected");
        br.record_topology_change();
    }
    if flush {
        request_flush(br, ifindex);
    }
    if propagate {
        br.set_tc_prop_tree(ifindex);
    }
}

/// newTcWhile (17.21.7)
fn new_tc_while(p: &mut Port, root_times: Times) {
    if !p.timers.is_zero(TimerKind::TcWhile) {
        return;
    }
    if p.vars.send_rstp {
        p.timers.set(TimerKind::TcWhile, p.designated_times.hello_time + 2);
        p.vars.new_info = true;
    } else {
        p.timers.set(TimerKind::TcWhile, root_times.max_age + root_times.forward_delay);
    }
}
