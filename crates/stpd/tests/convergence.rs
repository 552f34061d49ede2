//! Multi-bridge convergence scenarios on the in-memory LAN.

mod common;

use common::Lan;
use pretty_assertions::assert_eq;
use sonic_stpd::machines::{PrtState, TcmState};
use sonic_stpd::timer::TimerKind;
use sonic_stpd::{Action, BpduType, PortRole, PortState};

#[test]
fn test_two_bridges_lower_id_wins() {
    let mut lan = Lan::new();
    let root = lan.add_bridge(0x01, 4096);
    let other = lan.add_bridge(0x02, 32768);
    lan.connect(root, 1, other, 1);

    let took = lan.run_until(30, |lan| {
        lan.state(root, 1) == PortState::Forwarding && lan.state(other, 1) == PortState::Forwarding
    });
    assert!(took.is_some(), "ports did not reach forwarding within 2 x ForwardDelay");

    assert!(lan.bridges[root].is_root());
    assert!(!lan.bridges[other].is_root());
    assert_eq!(lan.role(root, 1), PortRole::Designated);
    assert_eq!(lan.role(other, 1), PortRole::Root);
    assert_eq!(lan.bridges[other].root_port(), Some(1));

    let learned = lan.bridges[other].root_priority();
    assert_eq!(learned.root_bridge_id, lan.bridges[root].bridge_id());
    assert_eq!(learned.root_path_cost, 20_000);

    let status = lan.bridges[other].status();
    assert_eq!(status.root_port_id, lan.bridges[other].port(1).unwrap().port_id().raw());
    assert_eq!(status.root_bridge_id, lan.bridges[root].bridge_id().to_string());
}

#[test]
fn test_rapid_handshake_beats_forward_delay() {
    let mut lan = Lan::new();
    let root = lan.add_bridge(0x01, 4096);
    let other = lan.add_bridge(0x02, 32768);
    lan.connect(root, 1, other, 1);

    // Proposal and agreement on a point-to-point link: no forward delay wait.
    let took = lan.run_until(5, |lan| {
        lan.state(root, 1) == PortState::Forwarding && lan.state(other, 1) == PortState::Forwarding
    });
    assert!(took.is_some());
    assert!(!lan.bridges[root].port(1).unwrap().vars().oper_edge);
}

/// Bridges 0, 1 and 2 in a triangle; bridge 0 is root.
fn ring() -> (Lan, [usize; 3]) {
    let mut lan = Lan::new();
    let b0 = lan.add_bridge(0x01, 4096);
    let b1 = lan.add_bridge(0x02, 32768);
    let b2 = lan.add_bridge(0x03, 32768);
    lan.connect(b0, 1, b1, 1);
    lan.connect(b1, 2, b2, 1);
    lan.connect(b2, 2, b0, 2);
    // links: 0 = b0-b1, 1 = b1-b2, 2 = b2-b0
    (lan, [b0, b1, b2])
}

fn blocked_ports(lan: &Lan) -> Vec<(usize, u32)> {
    lan.all_ports()
        .into_iter()
        .filter(|&(b, p)| matches!(lan.role(b, p), PortRole::Alternate | PortRole::Backup))
        .collect()
}

fn converged(lan: &Lan) -> bool {
    let blocked = blocked_ports(lan);
    blocked.len() == 1
        && lan.all_ports().into_iter().all(|(b, p)| {
            let expected = if blocked.contains(&(b, p)) {
                PortState::Discarding
            } else {
                PortState::Forwarding
            };
            lan.state(b, p) == expected
        })
}

#[test]
fn test_ring_blocks_exactly_one_port() {
    let (mut lan, [b0, b1, b2]) = ring();
    let took = lan.run_until(30, converged);
    assert!(took.is_some(), "ring did not converge");

    // Equal cost to the root on the b1-b2 segment; b1 has the lower id.
    assert_eq!(blocked_ports(&lan), vec![(b2, 1)]);
    assert_eq!(lan.role(b2, 1), PortRole::Alternate);
    assert_eq!(lan.role(b1, 2), PortRole::Designated);
    assert_eq!(lan.bridges[b1].root_port(), Some(1));
    assert_eq!(lan.bridges[b2].root_port(), Some(2));
    assert!(lan.bridges[b0].is_root());

    // Only two of the three links forward in both directions.
    let forwarding_links = lan
        .links
        .iter()
        .filter(|link| {
            lan.state(link.a.0, link.a.1) == PortState::Forwarding
                && lan.state(link.b.0, link.b.1) == PortState::Forwarding
        })
        .count();
    assert_eq!(forwarding_links, 2);
}

#[test]
fn test_role_selection_is_stable_once_converged() {
    let (mut lan, _) = ring();
    lan.run_until(30, converged).expect("converged");
    let roles: Vec<PortRole> = lan.all_ports().iter().map(|&(b, p)| lan.role(b, p)).collect();
    let changes: Vec<u64> = lan
        .bridges
        .iter()
        .map(|b| b.status().topology_changes)
        .collect();

    lan.run(20);
    let after: Vec<PortRole> = lan.all_ports().iter().map(|&(b, p)| lan.role(b, p)).collect();
    assert_eq!(roles, after);
    let changes_after: Vec<u64> = lan
        .bridges
        .iter()
        .map(|b| b.status().topology_changes)
        .collect();
    assert_eq!(changes, changes_after);
}

#[test]
fn test_forced_reselection_keeps_roles() {
    let (mut lan, _) = ring();
    lan.run_until(30, converged).expect("converged");
    let roles: Vec<PortRole> = lan.all_ports().iter().map(|&(b, p)| lan.role(b, p)).collect();
    let states: Vec<PortState> = lan.all_ports().iter().map(|&(b, p)| lan.state(b, p)).collect();
    let changes: Vec<u64> = lan
        .bridges
        .iter()
        .map(|b| b.status().topology_changes)
        .collect();

    for _ in 0..3 {
        // Same parameters: every port is marked for reselection.
        for bridge in &mut lan.bridges {
            let config = bridge.config().clone();
            bridge.update_config(config).unwrap();
        }
        lan.settle();
        let after: Vec<PortRole> = lan.all_ports().iter().map(|&(b, p)| lan.role(b, p)).collect();
        assert_eq!(roles, after);
        lan.tick();
    }

    let states_after: Vec<PortState> = lan.all_ports().iter().map(|&(b, p)| lan.state(b, p)).collect();
    assert_eq!(states, states_after);
    let changes_after: Vec<u64> = lan
        .bridges
        .iter()
        .map(|b| b.status().topology_changes)
        .collect();
    assert_eq!(changes, changes_after);
}

#[test]
fn test_looped_back_port_becomes_backup() {
    let mut lan = Lan::new();
    let b0 = lan.add_bridge(0x01, 32768);
    lan.connect(b0, 1, b0, 2);

    let took = lan.run_until(35, |lan| {
        lan.role(b0, 2) == PortRole::Backup && lan.state(b0, 1) == PortState::Forwarding
    });
    assert!(took.is_some());
    assert_eq!(lan.role(b0, 1), PortRole::Designated);
    assert_eq!(lan.state(b0, 2), PortState::Discarding);

    // rbWhile is held at twice HelloTime for as long as the port is Backup.
    for _ in 0..5 {
        lan.tick();
        let port = lan.bridges[b0].port(2).unwrap();
        assert_eq!(port.role(), PortRole::Backup);
        assert_eq!(port.timers().get(TimerKind::RbWhile), 4);
        assert_eq!(lan.status(b0, 2).machines.prt.prev_state, PrtState::BackupPort);
    }
    assert_eq!(lan.state(b0, 2), PortState::Discarding);
}

/// Bridges in a line, each connected to the next through ports 2 and 1.
fn chain(len: usize, max_age: u16) -> Lan {
    let mut lan = Lan::new();
    for i in 0..len {
        let mut config = Lan::bridge_config(i as u8 + 1, if i == 0 { 4096 } else { 32768 });
        config.max_age = max_age;
        lan.add_bridge_with(config);
    }
    for i in 0..len - 1 {
        lan.connect(i, 2, i + 1, 1);
    }
    lan
}

#[test]
fn test_information_beyond_max_age_is_discarded() {
    let mut lan = chain(10, 6);
    let root = lan.bridges[0].bridge_id();
    let done = |lan: &Lan| {
        (1..=6).all(|i| lan.bridges[i].root_priority().root_bridge_id == root)
            && lan.bridges[7].is_root()
    };
    assert!(lan.run_until(40, done).is_some());
    lan.run(10);
    assert!(done(&lan));
    // Six hops is as far as the root's information travels.
    assert_eq!(lan.bridges[6].root_port(), Some(1));
    assert_ne!(lan.bridges[7].root_priority().root_bridge_id, root);
}

#[test]
fn test_silent_root_ages_out() {
    let mut lan = chain(3, 20);
    lan.run_until(30, |lan| lan.bridges[2].root_port() == Some(1))
        .expect("converged");
    lan.run(3);
    let rcvd_info_while = lan.bridges[1].port(1).unwrap().timers().get(TimerKind::RcvdInfoWhile);
    assert!(rcvd_info_while > 0);

    // The root keeps running but nothing it sends arrives any more.
    lan.mute(0, Some(0));
    let took = lan.run_until(10, |lan| lan.bridges[1].is_root()).expect("aged out");
    assert!((4..=6).contains(&took), "aged out after {}s", took);
    assert_eq!(lan.role(1, 1), PortRole::Designated);

    let b1 = lan.bridges[1].bridge_id();
    let took = lan.run_until(10, |lan| lan.bridges[2].root_priority().root_bridge_id == b1);
    assert!(took.is_some());
}

#[test]
fn test_link_loss_triggers_topology_change() {
    let (mut lan, [_b0, b1, b2]) = ring();
    lan.run_until(30, converged).expect("converged");
    // Let transmit hold counters drain.
    lan.run(5);
    let changes_before = lan.bridges[b2].status().topology_changes;

    let since = lan.history.len();
    lan.set_link(2, false);

    // The alternate port takes over as root port within one HelloTime.
    let took = lan.run_until(2, |lan| lan.state(b2, 1) == PortState::Forwarding);
    assert!(took.is_some());
    assert_eq!(lan.role(b2, 1), PortRole::Root);
    assert_eq!(lan.role(b2, 2), PortRole::Disabled);

    let port = lan.status(b2, 1);
    assert_eq!(port.machines.tcm.state, TcmState::Active);
    assert_eq!(port.machines.tcm.prev_state, TcmState::Detected);
    let tc_while = lan.bridges[b2].port(1).unwrap().timers().get(TimerKind::TcWhile);
    assert!(tc_while > 0 && tc_while <= 4, "tcWhile = {}", tc_while);

    let sent = lan.sent(since, b2, 1);
    assert!(sent
        .iter()
        .any(|bpdu| bpdu.bpdu_type == BpduType::Rst && bpdu.flags.topology_change));

    assert!(lan
        .actions(since, b2)
        .iter()
        .any(|a| matches!(a, Action::FlushFdb { .. })));
    // Propagated: b1 flushes the port towards the root.
    assert!(lan
        .actions(since, b1)
        .contains(&Action::FlushFdb { ifindex: 1 }));
    assert!(lan.bridges[b2].status().topology_changes > changes_before);
}

#[test]
fn test_link_restore_reconverges() {
    let (mut lan, [_, _, b2]) = ring();
    lan.run_until(30, converged).expect("converged");
    lan.set_link(2, false);
    lan.run(3);
    lan.set_link(2, true);

    let took = lan.run_until(30, converged);
    assert!(took.is_some(), "ring did not reconverge");
    assert_eq!(lan.bridges[b2].root_port(), Some(2));
    assert_eq!(blocked_ports(&lan), vec![(b2, 1)]);
}

#[test]
fn test_priority_change_moves_root() {
    let mut lan = Lan::new();
    let b0 = lan.add_bridge(0x01, 4096);
    let b1 = lan.add_bridge(0x02, 32768);
    lan.connect(b0, 1, b1, 1);
    lan.run(5);
    assert!(lan.bridges[b0].is_root());

    let mut config = lan.bridges[b1].config().clone();
    config.priority = 0;
    lan.bridges[b1].update_config(config).unwrap();
    lan.settle();

    let took = lan.run_until(10, |lan| {
        lan.bridges[b1].is_root() && lan.bridges[b0].root_port() == Some(1)
    });
    assert!(took.is_some());
    assert_eq!(lan.role(b1, 1), PortRole::Designated);
}

#[test]
fn test_removing_root_port_makes_bridge_root() {
    let mut lan = Lan::new();
    let b0 = lan.add_bridge(0x01, 4096);
    let b1 = lan.add_bridge(0x02, 32768);
    lan.connect(b0, 1, b1, 1);
    lan.run(3);
    assert!(!lan.bridges[b1].is_root());

    lan.bridges[b1].remove_port(1).unwrap();
    lan.links.clear();
    lan.settle();
    assert!(lan.bridges[b1].is_root());
    assert_eq!(lan.bridges[b1].root_port(), None);
}
