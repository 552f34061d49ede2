//! Port Protocol Migration machine (802.1D 17.24).

use serde::Serialize;
use tracing::info;

use super::{settle, trace_transition, unexpected};
use crate::bridge::Bridge;
use crate::config::MIGRATE_TIME;
use crate::event::{Event, Machine};
use crate::port::Port;
use crate::timer::TimerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PpmState {
    #[default]
    None,
    CheckingRstp,
    SelectingStp,
    Sensing,
}

machine_record!(
    /// Port Protocol Migration machine record.
    PpmMachine,
    PpmState
);

pub(crate) fn run(br: &mut Bridge, ifindex: u32, event: &Event) -> bool {
    let began = match event {
        Event::Begin => {
            enter(br, ifindex, PpmState::CheckingRstp, event);
            true
        }
        Event::Mcheck => {
            let rstp = br.rstp_version();
            if let Some(p) = br.ports.get_mut(&ifindex) {
                p.vars.mcheck = rstp;
            }
            false
        }
        Event::Reevaluate
        | Event::TimerExpired(_)
        | Event::PortEnabled
        | Event::PortDisabled => false,
        other => {
            let state = br.ports.get(&ifindex).map(|p| p.ppm.state);
            unexpected(br, ifindex, Machine::Ppm, state, other);
            return false;
        }
    };
    settle(br, ifindex, Machine::Ppm, event, next, enter) || began
}

fn next(br: &Bridge, p: &Port) -> Option<PpmState> {
    let v = &p.vars;
    let mdelay_while = p.timers.get(TimerKind::MdelayWhile);
    match p.ppm.state {
        PpmState::CheckingRstp if mdelay_while != MIGRATE_TIME && !p.port_enabled => {
            Some(PpmState::CheckingRstp)
        }
        PpmState::CheckingRstp if mdelay_while == 0 => Some(PpmState::Sensing),
        PpmState::SelectingStp if mdelay_while == 0 || !p.port_enabled || v.mcheck => {
            Some(PpmState::Sensing)
        }
        PpmState::Sensing
            if !p.port_enabled
                || v.mcheck
                || (br.rstp_version() && !v.send_rstp && v.rcvd_rstp) =>
        {
            Some(PpmState::CheckingRstp)
        }
        PpmState::Sensing if v.send_rstp && v.rcvd_stp => Some(PpmState::SelectingStp),
        _ => None,
    }
}

fn enter(br: &mut Bridge, ifindex: u32, state: PpmState, event: &Event) {
    let rstp = br.rstp_version();
    let vlan = br.vlan();
    let Some(p) = br.ports.get_mut(&ifindex) else {
        return;
    };
    let from = p.ppm.state;
    p.ppm.record(state, event);
    let was_rstp = p.vars.send_rstp;

    match state {
        PpmState::None => {}
        PpmState::CheckingRstp => {
            p.vars.mcheck = false;
            p.vars.send_rstp = rstp;
            p.timers.set(TimerKind::MdelayWhile, MIGRATE_TIME);
        }
        PpmState::SelectingStp => {
            p.vars.send_rstp = false;
            p.timers.set(TimerKind::MdelayWhile, MIGRATE_TIME);
        }
        PpmState::Sensing => {
            p.vars.rcvd_rstp = false;
            p.vars.rcvd_stp = false;
        }
    }

    let send_rstp = p.vars.send_rstp;
    trace_transition(br, ifindex, Machine::Ppm, from, state, event);
    if from != PpmState::None && was_rstp != send_rstp {
        info!(
            vlan,
            ifindex,
            "stpd: port now sends {} BPDUs",
            if send_rstp { "RST" } else { "Configuration" }
        );
    }
}
