//! Deterministic in-memory LAN for protocol scenarios.
//!
//! Bridges are driven directly through the sans-io core: frames are handed
//! to the peer at the other end of each up link, hardware requests are
//! acknowledged as soon as they are issued, and time only moves when a test
//! calls [`Lan::tick`].

#![allow(dead_code)]

pub mod mock;

use sonic_stpd::bpdu::parse_frame;
use sonic_stpd::status::PortStatus;
use sonic_stpd::{
    Action, Bpdu, Bridge, BridgeConfig, MacAddress, PortConfig, PortRole, PortState, TimeUnits,
};

/// VLAN used by every bridge in the harness.
pub const VLAN: u16 = 1;

/// Point-to-point segment between two bridge ports.
#[derive(Debug, Clone)]
pub struct Link {
    pub a: (usize, u32),
    pub b: (usize, u32),
    pub up: bool,
    /// Frames sent by this bridge on the link are lost
    pub muted: Option<usize>,
}

#[derive(Default)]
pub struct Lan {
    pub bridges: Vec<Bridge>,
    pub links: Vec<Link>,
    /// Every action issued, tagged with the bridge that issued it
    pub history: Vec<(usize, Action)>,
}

impl Lan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bridge_config(mac: u8, priority: u16) -> BridgeConfig {
        let mut config = BridgeConfig::new(VLAN, MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, mac]));
        config.priority = priority;
        config
    }

    /// Adds an RSTP bridge whose address ends in `mac`.
    pub fn add_bridge(&mut self, mac: u8, priority: u16) -> usize {
        self.add_bridge_with(Self::bridge_config(mac, priority))
    }

    pub fn add_bridge_with(&mut self, config: BridgeConfig) -> usize {
        let bridge = Bridge::new(config).expect("valid bridge config");
        self.bridges.push(bridge);
        self.bridges.len() - 1
    }

    /// Connects port `pa` of bridge `a` to port `pb` of bridge `b` with
    /// default port parameters.
    pub fn connect(&mut self, a: usize, pa: u32, b: usize, pb: u32) -> usize {
        self.connect_with(a, PortConfig::new(VLAN, pa), b, PortConfig::new(VLAN, pb))
    }

    pub fn connect_with(&mut self, a: usize, pa: PortConfig, b: usize, pb: PortConfig) -> usize {
        let link = Link {
            a: (a, pa.ifindex),
            b: (b, pb.ifindex),
            up: true,
            muted: None,
        };
        self.bridges[a].add_port(pa, true).expect("port a");
        self.bridges[b].add_port(pb, true).expect("port b");
        self.links.push(link);
        self.settle();
        self.links.len() - 1
    }

    fn peer(&self, bridge: usize, ifindex: u32) -> Option<(usize, u32)> {
        self.links.iter().find_map(|link| {
            if !link.up || link.muted == Some(bridge) {
                return None;
            }
            if link.a == (bridge, ifindex) {
                Some(link.b)
            } else if link.b == (bridge, ifindex) {
                Some(link.a)
            } else {
                None
            }
        })
    }

    /// Runs every bridge until no bridge has anything left to do.
    pub fn settle(&mut self) {
        for _ in 0..10_000 {
            let mut idle = true;
            for i in 0..self.bridges.len() {
                let actions = self.bridges[i].process();
                for action in actions {
                    idle = false;
                    match &action {
                        Action::Transmit { ifindex, frame } => {
                            if let Some((j, pj)) = self.peer(i, *ifindex) {
                                self.bridges[j].receive_frame(pj, frame);
                            }
                        }
                        Action::SetPortState {
                            ifindex,
                            state,
                            generation,
                        } => self.bridges[i].state_applied(*ifindex, *state, *generation),
                        Action::FlushFdb { ifindex } => self.bridges[i].fdb_flushed(*ifindex),
                        Action::DisablePort { .. } | Action::EnablePort { .. } => {}
                    }
                    self.history.push((i, action));
                }
            }
            if idle {
                return;
            }
        }
        panic!("LAN did not settle");
    }

    /// Advances time by one second.
    pub fn tick(&mut self) {
        for bridge in &mut self.bridges {
            bridge.tick();
        }
        self.settle();
    }

    pub fn run(&mut self, seconds: u32) {
        for _ in 0..seconds {
            self.tick();
        }
    }

    /// Ticks until `done` holds and returns the seconds it took, or `None`
    /// if it did not hold within `limit` seconds.
    pub fn run_until(&mut self, limit: u32, done: impl Fn(&Lan) -> bool) -> Option<u32> {
        for elapsed in 0..=limit {
            if done(self) {
                return Some(elapsed);
            }
            if elapsed < limit {
                self.tick();
            }
        }
        None
    }

    /// Brings a link up or down at both ends.
    pub fn set_link(&mut self, link: usize, up: bool) {
        self.links[link].up = up;
        let (a, pa) = self.links[link].a;
        let (b, pb) = self.links[link].b;
        self.bridges[a].set_link(pa, up).expect("link end a");
        self.bridges[b].set_link(pb, up).expect("link end b");
        self.settle();
    }

    /// Silences one end of a link without taking it down.
    pub fn mute(&mut self, link: usize, bridge: Option<usize>) {
        self.links[link].muted = bridge;
    }

    pub fn role(&self, bridge: usize, ifindex: u32) -> PortRole {
        self.bridges[bridge].port(ifindex).expect("port").role()
    }

    pub fn state(&self, bridge: usize, ifindex: u32) -> PortState {
        self.bridges[bridge].port(ifindex).expect("port").state()
    }

    pub fn status(&self, bridge: usize, ifindex: u32) -> PortStatus {
        self.bridges[bridge]
            .status()
            .port(ifindex)
            .cloned()
            .expect("port status")
    }

    /// Every port of every bridge as (bridge, ifindex).
    pub fn all_ports(&self) -> Vec<(usize, u32)> {
        self.links.iter().flat_map(|link| [link.a, link.b]).collect()
    }

    /// BPDUs transmitted on a port after history position `since`.
    pub fn sent(&self, since: usize, bridge: usize, ifindex: u32) -> Vec<Bpdu> {
        self.history[since..]
            .iter()
            .filter_map(|(i, action)| match action {
                Action::Transmit { ifindex: port, frame } if *i == bridge && *port == ifindex => {
                    parse_frame(frame, TimeUnits::Ieee).ok().map(|r| r.bpdu)
                }
                _ => None,
            })
            .collect()
    }

    /// Actions issued by a bridge after history position `since`.
    pub fn actions(&self, since: usize, bridge: usize) -> Vec<Action> {
        self.history[since..]
            .iter()
            .filter(|(i, _)| *i == bridge)
            .map(|(_, action)| action.clone())
            .collect()
    }
}
