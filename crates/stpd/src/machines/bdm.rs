//! Bridge Detection machine (802.1D 17.25): decides whether a port is an
//! operational edge port.

use serde::Serialize;

use super::{settle, trace_transition, unexpected};
use crate::bridge::Bridge;
use crate::event::{Event, Machine};
use crate::port::Port;
use crate::timer::TimerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BdmState {
    #[default]
    None,
    Edge,
    NotEdge,
}

machine_record!(
    /// Bridge Detection machine record.
    BdmMachine,
    BdmState
);

pub(crate) fn run(br: &mut Bridge, ifindex: u32, event: &Event) -> bool {
    let began = match event {
        Event::Begin => {
            let admin_edge = br
                .ports
                .get(&ifindex)
                .map(|p| p.config.admin_edge_port)
                .unwrap_or(false);
            let initial = if admin_edge {
                BdmState::Edge
            } else {
                BdmState::NotEdge
            };
            enter(br, ifindex, initial, event);
            true
        }
        Event::Reevaluate
        | Event::TimerExpired(_)
        | Event::PortEnabled
        | Event::PortDisabled => false,
        other => {
            let state = br.ports.get(&ifindex).map(|p| p.bdm.state);
            unexpected(br, ifindex, Machine::Bdm, state, other);
            return false;
        }
    };
    settle(br, ifindex, Machine::Bdm, event, next, enter) || began
}

fn next(_br: &Bridge, p: &Port) -> Option<BdmState> {
    let admin_edge = p.config.admin_edge_port;
    let v = &p.vars;
    match p.bdm.state {
        BdmState::Edge if (!p.port_enabled && !admin_edge) || !v.oper_edge => {
            Some(BdmState::NotEdge)
        }
        BdmState::NotEdge
            if (!p.port_enabled && admin_edge)
                || (p.timers.is_zero(TimerKind::EdgeDelayWhile)
                    && p.config.auto_edge
                    && v.send_rstp
                    && v.proposing) =>
        {
            Some(BdmState::Edge)
        }
        _ => None,
    }
}

fn enter(br: &mut Bridge, ifindex: u32, state: BdmState, event: &Event) {
    let Some(p) = br.ports.get_mut(&ifindex) else {
        return;
    };
    let from = p.bdm.state;
    p.bdm.record(state, event);
    match state {
        BdmState::None => {}
        BdmState::Edge => p.vars.oper_edge = true,
        BdmState::NotEdge => p.vars.oper_edge = false,
    }
    trace_transition(br, ifindex, Machine::Bdm, from, state, event);
}
