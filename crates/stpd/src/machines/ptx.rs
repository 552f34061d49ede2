//! Port Transmit machine (802.1D 17.26).

use serde::Serialize;

use super::{settle, trace_transition, unexpected};
use crate::bpdu::{Bpdu, BpduType};
use crate::bridge::Bridge;
use crate::event::{Event, Machine};
use crate::port::Port;
use crate::timer::TimerKind;
use crate::types::PortRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PtxState {
    #[default]
    None,
    TransmitInit,
    Idle,
    TransmitPeriodic,
    TransmitConfig,
    TransmitTcn,
    TransmitRstp,
}

machine_record!(
    /// Port Transmit machine record.
    PtxMachine,
    PtxState
);

pub(crate) fn run(br: &mut Bridge, ifindex: u32, event: &Event) -> bool {
    let began = match event {
        Event::Begin => {
            enter(br, ifindex, PtxState::TransmitInit, event);
            true
        }
        Event::Reevaluate
        | Event::TimerExpired(_)
        | Event::PortEnabled
        | Event::PortDisabled => false,
        other => {
            let state = br.ports.get(&ifindex).map(|p| p.ptx.state);
            unexpected(br, ifindex, Machine::Ptx, state, other);
            return false;
        }
    };
    settle(br, ifindex, Machine::Ptx, event, next, enter) || began
}

fn next(br: &Bridge, p: &Port) -> Option<PtxState> {
    let state = p.ptx.state;
    match state {
        PtxState::None => return None,
        PtxState::TransmitInit => {
            return p.port_enabled.then_some(PtxState::Idle);
        }
        _ if !p.port_enabled => return Some(PtxState::TransmitInit),
        PtxState::TransmitPeriodic
        | PtxState::TransmitConfig
        | PtxState::TransmitTcn
        | PtxState::TransmitRstp => return Some(PtxState::Idle),
        PtxState::Idle => {}
    }

    let v = &p.vars;
    if !v.selected || v.updt_info || p.role == PortRole::Disabled {
        return None;
    }
    let hello_when = p.timers.get(TimerKind::HelloWhen);
    if hello_when == 0 {
        return Some(PtxState::TransmitPeriodic);
    }
    let may_send = v.new_info && p.tx_count < br.config.tx_hold_count;
    if !may_send {
        return None;
    }
    if v.send_rstp {
        return Some(PtxState::TransmitRstp);
    }
    match p.role {
        PortRole::Root => Some(PtxState::TransmitTcn),
        PortRole::Designated => Some(PtxState::TransmitConfig),
        _ => None,
    }
}

fn enter(br: &mut Bridge, ifindex: u32, state: PtxState, event: &Event) {
    let Some(p) = br.ports.get_mut(&ifindex) else {
        return;
    };
    let from = p.ptx.state;
    p.ptx.record(state, event);

    let mut outgoing = None;
    match state {
        PtxState::None => {}
        PtxState::TransmitInit => {
            p.vars.new_info = true;
            p.tx_count = 0;
        }
        PtxState::Idle => {
            let hello = p.designated_times.hello_time;
            p.timers.set(TimerKind::HelloWhen, hello);
        }
        PtxState::TransmitPeriodic => {
            let tc_running = !p.timers.is_zero(TimerKind::TcWhile);
            // Bridge assurance ports send hellos in every role so the peer
            // keeps hearing from us.
            p.vars.new_info = p.vars.new_info
                || p.role == PortRole::Designated
                || (p.role == PortRole::Root && tc_running)
                || p.config.bridge_assurance;
        }
        PtxState::TransmitConfig => {
            outgoing = Some(config_bpdu(p));
            p.vars.tc_ack = false;
        }
        PtxState::TransmitTcn => outgoing = Some(Bpdu::tcn()),
        PtxState::TransmitRstp => {
            outgoing = Some(rst_bpdu(p));
            p.vars.tc_ack = false;
        }
    }
    if outgoing.is_some() {
        p.vars.new_info = false;
        p.tx_count = p.tx_count.saturating_add(1);
    }

    trace_transition(br, ifindex, Machine::Ptx, from, state, event);
    if let Some(bpdu) = outgoing {
        br.send_bpdu(ifindex, &bpdu);
    }
}

/// txConfig (17.21.19)
fn config_bpdu(p: &Port) -> Bpdu {
    let mut bpdu = Bpdu::carrying(BpduType::Config, &p.designated_priority, &p.designated_times);
    bpdu.flags.topology_change = !p.timers.is_zero(TimerKind::TcWhile);
    bpdu.flags.topology_change_ack = p.vars.tc_ack;
    bpdu
}

/// txRstp (17.21.20)
fn rst_bpdu(p: &Port) -> Bpdu {
    let mut bpdu = Bpdu::carrying(BpduType::Rst, &p.designated_priority, &p.designated_times);
    let flags = &mut bpdu.flags;
    flags.role = p.role.to_wire();
    flags.agreement = p.vars.agree;
    flags.proposal = p.vars.proposing;
    flags.learning = p.vars.learning;
    flags.forwarding = p.vars.forwarding;
    flags.topology_change = !p.timers.is_zero(TimerKind::TcWhile);
    bpdu
}
