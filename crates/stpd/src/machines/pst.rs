//! Port State Transition machine (802.1D 17.30).
//!
//! `learning` and `forwarding` only follow once hardware acknowledges the
//! requested state, so the rest of the protocol never runs ahead of the
//! data plane.

use serde::Serialize;
use tracing::debug;

use super::{settle, trace_transition, unexpected};
use crate::bridge::Bridge;
use crate::event::{Action, Event, Machine};
use crate::port::Port;
use crate::types::PortState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PstState {
    #[default]
    None,
    Discarding,
    Learning,
    Forwarding,
}

machine_record!(
    /// Port State Transition machine record.
    PstMachine,
    PstState
);

pub(crate) fn run(br: &mut Bridge, ifindex: u32, event: &Event) -> bool {
    let began = match event {
        Event::Begin => {
            enter(br, ifindex, PstState::Discarding, event);
            true
        }
        Event::StateApplied { state, generation } => {
            applied(br, ifindex, *state, *generation, event);
            false
        }
        Event::Reevaluate
        | Event::TimerExpired(_)
        | Event::PortEnabled
        | Event::PortDisabled => false,
        other => {
            let state = br.ports.get(&ifindex).map(|p| p.pst.state);
            unexpected(br, ifindex, Machine::Pst, state, other);
            return false;
        }
    };
    settle(br, ifindex, Machine::Pst, event, next, enter) || began
}

/// Hardware acknowledged a state request.
fn applied(br: &mut Bridge, ifindex: u32, state: PortState, generation: u64, event: &Event) {
    let vlan = br.vlan();
    let Some(p) = br.ports.get_mut(&ifindex) else {
        return;
    };
    match p.hw.state {
        Some(pending) if pending == state && p.hw.generation == generation => {
            p.hw.state = None;
            p.hw.applied = state;
            p.vars.learning = state != PortState::Discarding;
            p.vars.forwarding = state == PortState::Forwarding;
            debug!(vlan, ifindex, state = state.as_str(), "stpd: port state applied");
            // learning/forwarding changed outside a transition
            br.notify(ifindex, Machine::Prt);
            br.notify(ifindex, Machine::Tcm);
        }
        Some(pending) => {
            debug!(
                vlan,
                ifindex,
                acked = state.as_str(),
                generation,
                expected = p.hw.generation,
                pending = pending.as_str(),
                "stpd: stale port state acknowledgement ignored"
            );
        }
        None if generation != p.hw.generation => {
            debug!(vlan, ifindex, generation, "stpd: stale port state acknowledgement ignored");
        }
        None => {
            let current = p.pst.state;
            unexpected(br, ifindex, Machine::Pst, current, event);
        }
    }
}

fn next(_br: &Bridge, p: &Port) -> Option<PstState> {
    if p.hw.state.is_some() {
        return None;
    }
    let v = &p.vars;
    match p.pst.state {
        PstState::Discarding if v.learn => Some(PstState::Learning),
        PstState::Learning if !v.learn => Some(PstState::Discarding),
        PstState::Learning if v.forward => Some(PstState::Forwarding),
        PstState::Forwarding if !v.forward => Some(PstState::Discarding),
        _ => None,
    }
}

fn enter(br: &mut Bridge, ifindex: u32, state: PstState, event: &Event) {
    let generation = br.next_generation();
    let Some(p) = br.ports.get_mut(&ifindex) else {
        return;
    };
    let from = p.pst.state;
    p.pst.record(state, event);
    let target = match state {
        PstState::None => return,
        PstState::Discarding => PortState::Discarding,
        PstState::Learning => PortState::Learning,
        PstState::Forwarding => PortState::Forwarding,
    };
    p.hw.state = Some(target);
    p.hw.generation = generation;
    trace_transition(br, ifindex, Machine::Pst, from, state, event);
    br.emit(Action::SetPortState {
        ifindex,
        state: target,
        generation,
    });
}
