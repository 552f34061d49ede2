//! Port Role Transitions machine (802.1D 17.29).
//!
//! Moves a port into the role chosen by role selection and runs the
//! proposal/agreement handshake that lets designated and root ports reach
//! forwarding without waiting out the forward delay.

use serde::Serialize;
use tracing::info;

use super::{settle, trace_transition, unexpected};
use crate::bridge::Bridge;
use crate::config::MIGRATE_TIME;
use crate::event::{Event, Machine};
use crate::port::Port;
use crate::timer::TimerKind;
use crate::types::PortRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PrtState {
    #[default]
    None,
    InitPort,
    DisablePort,
    DisabledPort,
    RootProposed,
    RootAgreed,
    Reroot,
    RootPort,
    Rerooted,
    RootLearn,
    RootForward,
    DesignatedPropose,
    DesignatedSynced,
    DesignatedRetired,
    DesignatedDiscard,
    DesignatedPort,
    DesignatedLearn,
    DesignatedForward,
    AlternateProposed,
    AlternateAgreed,
    BlockPort,
    BackupPort,
    AlternatePort,
}

machine_record!(
    /// Port Role Transitions machine record.
    PrtMachine,
    PrtState
);

pub(crate) fn run(br: &mut Bridge, ifindex: u32, event: &Event) -> bool {
    let began = match event {
        Event::Begin => {
            enter(br, ifindex, PrtState::InitPort, event);
            true
        }
        Event::Reevaluate
        | Event::TimerExpired(_)
        | Event::PortEnabled
        | Event::PortDisabled => false,
        other => {
            let state = br.ports.get(&ifindex).map(|p| p.prt.state);
            unexpected(br, ifindex, Machine::Prt, state, other);
            return false;
        }
    };
    settle(br, ifindex, Machine::Prt, event, next, enter) || began
}

/// Timer values the machine derives from the port's designated times.
struct Durations {
    fwd_delay: u16,
    max_age: u16,
    hello_time: u16,
    /// `forwardDelay`: Hello Time when talking RSTP, Forward Delay otherwise
    forward_delay: u16,
    edge_delay: u16,
}

fn durations(p: &Port) -> Durations {
    let times = p.designated_times;
    Durations {
        fwd_delay: times.forward_delay,
        max_age: times.max_age,
        hello_time: times.hello_time,
        forward_delay: if p.vars.send_rstp {
            times.hello_time
        } else {
            times.forward_delay
        },
        edge_delay: if p.oper_point_to_point {
            MIGRATE_TIME
        } else {
            times.max_age
        },
    }
}

fn next(br: &Bridge, p: &Port) -> Option<PrtState> {
    use PrtState as S;

    let state = p.prt.state;
    if state == S::None {
        return None;
    }

    // Unconditional returns to the hub state of the role
    match state {
        S::InitPort => return Some(S::DisablePort),
        S::RootProposed | S::RootAgreed | S::Reroot | S::Rerooted | S::RootLearn
        | S::RootForward => return Some(S::RootPort),
        S::DesignatedPropose
        | S::DesignatedSynced
        | S::DesignatedRetired
        | S::DesignatedDiscard
        | S::DesignatedLearn
        | S::DesignatedForward => return Some(S::DesignatedPort),
        S::AlternateProposed | S::AlternateAgreed | S::BackupPort => {
            return Some(S::AlternatePort)
        }
        _ => {}
    }

    let v = &p.vars;
    if !v.selected || v.updt_info {
        return None;
    }

    if p.selected_role != p.role {
        return Some(match p.selected_role {
            PortRole::Disabled => S::DisablePort,
            PortRole::Root => S::RootPort,
            PortRole::Designated => S::DesignatedPort,
            PortRole::Alternate | PortRole::Backup => S::BlockPort,
        });
    }

    let d = durations(p);
    let timers = &p.timers;
    let fd_while = timers.get(TimerKind::FdWhile);
    let rr_while = timers.get(TimerKind::RrWhile);
    let rb_while = timers.get(TimerKind::RbWhile);
    let ifindex = p.ifindex();

    match state {
        S::DisablePort if !v.learning && !v.forwarding => Some(S::DisabledPort),
        S::DisabledPort if fd_while != d.max_age || v.sync || v.re_root || !v.synced => {
            Some(S::DisabledPort)
        }

        S::RootPort => {
            if v.proposed && !v.agree {
                return Some(S::RootProposed);
            }
            if (br.all_synced(ifindex) && !v.agree) || (v.proposed && v.agree) {
                return Some(S::RootAgreed);
            }
            if !v.forward && !v.re_root {
                return Some(S::Reroot);
            }
            if rr_while != d.fwd_delay {
                return Some(S::RootPort);
            }
            if v.re_root && v.forward {
                return Some(S::Rerooted);
            }
            let may_advance = fd_while == 0
                || (br.re_rooted(ifindex) && rb_while == 0 && br.rstp_version());
            if may_advance && !v.learn {
                return Some(S::RootLearn);
            }
            if may_advance && v.learn && !v.forward {
                return Some(S::RootForward);
            }
            None
        }

        S::DesignatedPort => {
            let oper_edge = v.oper_edge;
            let inconsistent = p.guard.assurance_inconsistent;
            if !v.forward && !v.agreed && !v.proposing && !oper_edge {
                return Some(S::DesignatedPropose);
            }
            if (!v.learning && !v.forwarding && !v.synced)
                || (v.agreed && !v.synced)
                || (oper_edge && !v.synced)
                || (v.sync && v.synced)
            {
                return Some(S::DesignatedSynced);
            }
            if rr_while == 0 && v.re_root {
                return Some(S::DesignatedRetired);
            }
            if ((v.sync && !v.synced) || (v.re_root && rr_while != 0) || v.disputed || inconsistent)
                && !oper_edge
                && (v.learn || v.forward)
            {
                return Some(S::DesignatedDiscard);
            }
            let may_advance = (fd_while == 0 || v.agreed || oper_edge)
                && (rr_while == 0 || !v.re_root)
                && !v.sync
                && !inconsistent;
            if may_advance && !v.learn {
                return Some(S::DesignatedLearn);
            }
            if may_advance && v.learn && !v.forward {
                return Some(S::DesignatedForward);
            }
            None
        }

        S::BlockPort if !v.learning && !v.forwarding => Some(S::AlternatePort),
        S::AlternatePort => {
            if v.proposed && !v.agree {
                return Some(S::AlternateProposed);
            }
            if (br.all_synced(ifindex) && !v.agree) || (v.proposed && v.agree) {
                return Some(S::AlternateAgreed);
            }
            if p.role == PortRole::Backup && rb_while != 2 * d.hello_time {
                return Some(S::BackupPort);
            }
            if fd_while != d.forward_delay || v.sync || v.re_root || !v.synced {
                return Some(S::AlternatePort);
            }
            None
        }

        _ => None,
    }
}

fn enter(br: &mut Bridge, ifindex: u32, state: PrtState, event: &Event) {
    let vlan = br.vlan();
    let Some(p) = br.ports.get_mut(&ifindex) else {
        return;
    };
    let from = p.prt.state;
    let old_role = p.role;
    p.prt.record(state, event);
    let d = durations(p);

    let mut sync_tree = false;
    let mut reroot_tree = false;
    match state {
        PrtState::None => {}
        PrtState::InitPort => {
            p.role = PortRole::Disabled;
            p.vars.learn = false;
            p.vars.forward = false;
            p.vars.synced = false;
            p.vars.sync = true;
            p.vars.re_root = true;
            p.timers.set(TimerKind::RrWhile, d.fwd_delay);
            p.timers.set(TimerKind::FdWhile, d.max_age);
            p.timers.set(TimerKind::RbWhile, 0);
        }
        PrtState::DisablePort | PrtState::BlockPort => {
            p.role = p.selected_role;
            p.vars.learn = false;
            p.vars.forward = false;
        }
        PrtState::DisabledPort => {
            p.timers.set(TimerKind::FdWhile, d.max_age);
            p.vars.synced = true;
            p.timers.set(TimerKind::RrWhile, 0);
            p.vars.sync = false;
            p.vars.re_root = false;
        }

        PrtState::RootProposed | PrtState::AlternateProposed => {
            sync_tree = true;
            p.vars.proposed = false;
        }
        PrtState::RootAgreed | PrtState::AlternateAgreed => {
            p.vars.proposed = false;
            p.vars.sync = false;
            p.vars.agree = true;
            p.vars.new_info = true;
        }
        PrtState::Reroot => reroot_tree = true,
        PrtState::RootPort => {
            p.role = PortRole::Root;
            p.timers.set(TimerKind::RrWhile, d.fwd_delay);
        }
        PrtState::Rerooted => p.vars.re_root = false,
        PrtState::RootLearn | PrtState::DesignatedLearn => {
            p.timers.set(TimerKind::FdWhile, d.forward_delay);
            p.vars.learn = true;
        }
        PrtState::RootForward => {
            p.timers.set(TimerKind::FdWhile, 0);
            p.vars.forward = true;
        }

        PrtState::DesignatedPropose => {
            p.vars.proposing = true;
            p.timers.set(TimerKind::EdgeDelayWhile, d.edge_delay);
            p.vars.new_info = true;
        }
        PrtState::DesignatedSynced => {
            p.timers.set(TimerKind::RrWhile, 0);
            p.vars.synced = true;
            p.vars.sync = false;
        }
        PrtState::DesignatedRetired => p.vars.re_root = false,
        PrtState::DesignatedDiscard => {
            p.vars.learn = false;
            p.vars.forward = false;
            p.vars.disputed = false;
            p.timers.set(TimerKind::FdWhile, d.forward_delay);
        }
        PrtState::DesignatedPort => p.role = PortRole::Designated,
        PrtState::DesignatedForward => {
            p.vars.forward = true;
            p.timers.set(TimerKind::FdWhile, 0);
            p.vars.agreed = p.vars.send_rstp;
        }

        PrtState::BackupPort => p.timers.set(TimerKind::RbWhile, 2 * d.hello_time),
        PrtState::AlternatePort => {
            p.timers.set(TimerKind::FdWhile, d.forward_delay);
            p.vars.synced = true;
            p.timers.set(TimerKind::RrWhile, 0);
            p.vars.sync = false;
            p.vars.re_root = false;
        }
    }

    let new_role = p.role;
    trace_transition(br, ifindex, Machine::Prt, from, state, event);
    if new_role != old_role {
        info!(
            vlan,
            ifindex,
            "stpd: port role {} -> {}",
            old_role.as_str(),
            new_role.as_str()
        );
    }
    if sync_tree {
        br.set_sync_tree();
    }
    if reroot_tree {
        br.set_reroot_tree();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;
    use crate::vector::Times;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_forward_delay_follows_protocol() {
        let mut p = Port::new(PortConfig::new(1, 1), true, Times::new(20, 2, 15));
        p.vars.send_rstp = true;
        assert_eq!(durations(&p).forward_delay, 2);
        p.vars.send_rstp = false;
        assert_eq!(durations(&p).forward_delay, 15);
    }

    #[test]
    fn test_edge_delay_depends_on_point_to_point() {
        let mut p = Port::new(PortConfig::new(1, 1), true, Times::new(20, 2, 15));
        assert_eq!(durations(&p).edge_delay, MIGRATE_TIME);
        p.oper_point_to_point = false;
        assert_eq!(durations(&p).edge_delay, 20);
    }
}
