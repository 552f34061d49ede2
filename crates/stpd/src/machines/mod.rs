//! The 802.1D clause 17 state machines.
//!
//! Each port machine is a state enum plus two functions: `next` returns the
//! first transition whose guard holds in the current state, `enter` performs
//! the entry actions of a state. [`settle`] alternates the two until no
//! guard holds. Events only wake a machine; the guards decide.

/// Declares a machine record: current and previous state and the events
/// that caused them.
macro_rules! machine_record {
    ($(#[$meta:meta])* $name:ident, $state:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
        pub struct $name {
            pub state: $state,
            pub prev_state: $state,
            pub event: &'static str,
            pub prev_event: &'static str,
        }

        impl $name {
            pub(crate) fn record(&mut self, next: $state, event: &$crate::event::Event) {
                self.prev_state = self.state;
                self.prev_event = self.event;
                self.state = next;
                self.event = event.name();
            }
        }
    };
}

pub(crate) mod bdm;
pub(crate) mod pim;
pub(crate) mod ppm;
pub(crate) mod prs;
pub(crate) mod prt;
pub(crate) mod prx;
pub(crate) mod pst;
pub(crate) mod ptx;
pub(crate) mod tcm;

use std::fmt::Debug;

use tracing::{debug, error};

use crate::bridge::Bridge;
use crate::event::{Event, Machine};
use crate::port::Port;

pub use bdm::{BdmMachine, BdmState};
pub use pim::{PimMachine, PimState};
pub use ppm::{PpmMachine, PpmState};
pub use prs::{PrsMachine, PrsState};
pub use prt::{PrtMachine, PrtState};
pub use prx::{PrxMachine, PrxState};
pub use pst::{PstMachine, PstState};
pub use ptx::{PtxMachine, PtxState};
pub use tcm::{TcmMachine, TcmState};

/// Transitions a machine may take for one event before it is considered
/// stuck.
const MAX_STEPS: usize = 64;

/// Runs `next`/`enter` until no guard holds. Returns true if any transition
/// was taken.
pub(crate) fn settle<S: Copy + Debug>(
    br: &mut Bridge,
    ifindex: u32,
    machine: Machine,
    event: &Event,
    next: fn(&Bridge, &Port) -> Option<S>,
    enter: fn(&mut Bridge, u32, S, &Event),
) -> bool {
    let mut moved = false;
    for _ in 0..MAX_STEPS {
        let Some(port) = br.ports.get(&ifindex) else {
            return moved;
        };
        match next(br, port) {
            Some(state) => {
                enter(br, ifindex, state, event);
                moved = true;
            }
            None => return moved,
        }
    }
    error!(
        vlan = br.vlan(),
        ifindex,
        machine = machine.as_str(),
        "stpd: state machine did not settle after {} transitions",
        MAX_STEPS
    );
    moved
}

pub(crate) fn trace_transition(
    br: &Bridge,
    ifindex: u32,
    machine: Machine,
    from: impl Debug,
    to: impl Debug,
    event: &Event,
) {
    debug!(
        vlan = br.vlan(),
        ifindex,
        "stpd: {} {:?} -> {:?} on {}",
        machine.as_str(),
        from,
        to,
        event.name()
    );
}

/// Logs an event the machine has no rule for.
pub(crate) fn unexpected(br: &Bridge, ifindex: u32, machine: Machine, state: impl Debug, event: &Event) {
    error!(
        vlan = br.vlan(),
        ifindex,
        "stpd: {} has no transition for {} in state {:?}",
        machine.as_str(),
        event.name(),
        state
    );
}
