//! Port Information machine (802.1D 17.27).
//!
//! Classifies each received message against the information held for the
//! port, records superior information and ages it out when it is not
//! refreshed.

use serde::Serialize;

use super::{settle, trace_transition, unexpected};
use crate::bpdu::{Bpdu, BpduType};
use crate::bridge::Bridge;
use crate::event::{Event, Machine};
use crate::port::Port;
use crate::timer::TimerKind;
use crate::types::{InfoIs, PortRole, RcvdInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PimState {
    #[default]
    None,
    Disabled,
    Aged,
    Update,
    Current,
    Receive,
    SuperiorDesignated,
    RepeatedDesignated,
    InferiorDesignated,
    NotDesignated,
    Other,
}

machine_record!(
    /// Port Information machine record.
    PimMachine,
    PimState
);

pub(crate) fn run(br: &mut Bridge, ifindex: u32, event: &Event) -> bool {
    let began = match event {
        Event::Begin => {
            enter(br, ifindex, PimState::Disabled, event);
            true
        }
        Event::Reevaluate
        | Event::TimerExpired(_)
        | Event::PortEnabled
        | Event::PortDisabled => false,
        other => {
            let state = br.ports.get(&ifindex).map(|p| p.pim.state);
            unexpected(br, ifindex, Machine::Pim, state, other);
            return false;
        }
    };
    settle(br, ifindex, Machine::Pim, event, next, enter) || began
}

fn next(_br: &Bridge, p: &Port) -> Option<PimState> {
    use PimState as S;

    let v = &p.vars;
    let state = p.pim.state;
    if state == S::None {
        return None;
    }
    if !p.port_enabled && p.info_is != InfoIs::Disabled {
        return Some(S::Disabled);
    }

    match state {
        S::Disabled if v.rcvd_msg => Some(S::Disabled),
        S::Disabled if p.port_enabled => Some(S::Aged),
        S::Aged if v.selected && v.updt_info => Some(S::Update),
        S::Update => Some(S::Current),
        S::Current if v.selected && v.updt_info => Some(S::Update),
        S::Current
            if p.info_is == InfoIs::Received
                && p.timers.is_zero(TimerKind::RcvdInfoWhile)
                && !v.updt_info
                && !v.rcvd_msg =>
        {
            Some(S::Aged)
        }
        S::Current if v.rcvd_msg && !v.updt_info => Some(S::Receive),
        S::Receive => Some(match p.rcvd_info {
            RcvdInfo::SuperiorDesignated => S::SuperiorDesignated,
            RcvdInfo::RepeatedDesignated => S::RepeatedDesignated,
            RcvdInfo::InferiorDesignated => S::InferiorDesignated,
            RcvdInfo::NotDesignated => S::NotDesignated,
            RcvdInfo::Other => S::Other,
        }),
        S::SuperiorDesignated
        | S::RepeatedDesignated
        | S::InferiorDesignated
        | S::NotDesignated
        | S::Other => Some(S::Current),
        _ => None,
    }
}

fn enter(br: &mut Bridge, ifindex: u32, state: PimState, event: &Event) {
    let rstp = br.rstp_version();
    let Some(p) = br.ports.get_mut(&ifindex) else {
        return;
    };
    let from = p.pim.state;
    p.pim.record(state, event);

    let mut reselect = false;
    match state {
        PimState::None => {}
        PimState::Disabled => {
            p.vars.rcvd_msg = false;
            p.rcvd = None;
            p.vars.proposing = false;
            p.vars.proposed = false;
            p.vars.agree = false;
            p.vars.agreed = false;
            p.timers.set(TimerKind::RcvdInfoWhile, 0);
            p.info_is = InfoIs::Disabled;
            reselect = true;
        }
        PimState::Aged => {
            p.info_is = InfoIs::Aged;
            reselect = true;
        }
        PimState::Update => {
            p.vars.proposing = false;
            p.vars.proposed = false;
            p.vars.agreed = p.vars.agreed && better_or_same_info(p, InfoIs::Mine);
            p.vars.synced = p.vars.synced && p.vars.agreed;
            p.port_priority = p.designated_priority;
            p.port_times = p.designated_times;
            p.vars.updt_info = false;
            p.info_is = InfoIs::Mine;
            p.vars.new_info = true;
        }
        PimState::Current => {}
        PimState::Receive => {
            p.rcvd_info = rcv_info(p);
        }
        PimState::SuperiorDesignated => {
            p.vars.agreed = false;
            p.vars.proposing = false;
            record_proposal(p);
            p.vars.agree = p.vars.agree && better_or_same_info(p, InfoIs::Received);
            p.port_priority = p.msg_priority;
            record_times(p);
            update_rcvd_info_while(p);
            p.info_is = InfoIs::Received;
            p.vars.rcvd_msg = false;
            reselect = true;
        }
        PimState::RepeatedDesignated => {
            record_proposal(p);
            update_rcvd_info_while(p);
            p.vars.rcvd_msg = false;
        }
        PimState::InferiorDesignated => {
            record_dispute(p);
            p.vars.rcvd_msg = false;
        }
        PimState::NotDesignated => {
            record_agreement(p, rstp);
            p.vars.rcvd_msg = false;
        }
        PimState::Other => {
            p.vars.rcvd_msg = false;
        }
    }

    trace_transition(br, ifindex, Machine::Pim, from, state, event);
    if reselect {
        br.request_reselect(ifindex);
    }
}

/// betterorsameInfo (17.21.1)
fn better_or_same_info(p: &Port, new_info_is: InfoIs) -> bool {
    match new_info_is {
        InfoIs::Received => {
            p.info_is == InfoIs::Received && p.msg_priority.better_or_same(&p.port_priority)
        }
        InfoIs::Mine => {
            p.info_is == InfoIs::Mine && p.designated_priority.better_or_same(&p.port_priority)
        }
        _ => false,
    }
}

/// rcvInfo (17.21.8): records the message vector and times and classifies
/// the message.
fn rcv_info(p: &mut Port) -> RcvdInfo {
    let Some(bpdu) = p.rcvd else {
        return RcvdInfo::Other;
    };
    if bpdu.bpdu_type == BpduType::Tcn {
        return RcvdInfo::Other;
    }

    p.msg_priority = bpdu.priority_vector(p.port_id);
    p.msg_times = bpdu.times();
    let msg = &p.msg_priority;
    let held = &p.port_priority;

    match bpdu.role() {
        Some(PortRole::Designated) => {
            if msg.is_superior_to(held)
                || (msg.same_designated(held) && p.msg_times != p.port_times)
            {
                RcvdInfo::SuperiorDesignated
            } else if msg.same_designated(held) {
                RcvdInfo::RepeatedDesignated
            } else {
                RcvdInfo::InferiorDesignated
            }
        }
        Some(PortRole::Root | PortRole::Alternate | PortRole::Backup)
            if held.better_or_same(msg) =>
        {
            RcvdInfo::NotDesignated
        }
        _ => RcvdInfo::Other,
    }
}

fn received_rst(p: &Port) -> Option<Bpdu> {
    p.rcvd.filter(|b| b.bpdu_type == BpduType::Rst)
}

/// recordProposal (17.21.11)
fn record_proposal(p: &mut Port) {
    if let Some(bpdu) = received_rst(p) {
        if bpdu.role() == Some(PortRole::Designated) && bpdu.flags.proposal {
            p.vars.proposed = true;
        }
    }
}

/// recordAgreement (17.21.9)
fn record_agreement(p: &mut Port, rstp: bool) {
    let agreement = received_rst(p).map(|b| b.flags.agreement).unwrap_or(false);
    if rstp && p.oper_point_to_point && agreement {
        p.vars.agreed = true;
        p.vars.proposing = false;
    } else {
        p.vars.agreed = false;
    }
}

/// recordDispute (17.21.10)
fn record_dispute(p: &mut Port) {
    if received_rst(p).map(|b| b.flags.learning).unwrap_or(false) {
        p.vars.disputed = true;
        p.vars.agreed = false;
    }
}

/// recordTimes (17.21.13)
fn record_times(p: &mut Port) {
    p.port_times = p.msg_times;
    p.port_times.hello_time = p.port_times.hello_time.max(1);
}

/// updtRcvdInfoWhile (17.21.23)
fn update_rcvd_info_while(p: &mut Port) {
    let times = p.port_times;
    let value = if times.message_age.saturating_add(1) <= times.max_age {
        3 * times.hello_time
    } else {
        0
    };
    p.timers.set(TimerKind::RcvdInfoWhile, value);
}
