//! Events exchanged between state machines and the actions the engine
//! core asks its environment to carry out.

use serde::Serialize;

use crate::bpdu::Bpdu;
use crate::timer::TimerKind;
use crate::types::PortState;

/// Per-port state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Machine {
    /// Port Information
    Pim,
    /// Port Role Transition
    Prt,
    /// Port State Transition
    Pst,
    /// Port Receive
    Prx,
    /// Port Transmit
    Ptx,
    /// Port Protocol Migration
    Ppm,
    /// Bridge Detection
    Bdm,
    /// Topology Change
    Tcm,
}

impl Machine {
    /// All port machines, in the order they are started.
    pub const ALL: [Machine; 8] = [
        Machine::Pim,
        Machine::Prt,
        Machine::Pst,
        Machine::Prx,
        Machine::Ppm,
        Machine::Bdm,
        Machine::Ptx,
        Machine::Tcm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pim => "PIM",
            Self::Prt => "PRT",
            Self::Pst => "PST",
            Self::Prx => "PRX",
            Self::Ptx => "PTX",
            Self::Ppm => "PPM",
            Self::Bdm => "BDM",
            Self::Tcm => "TCM",
        }
    }
}

/// Input to a state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Machine (re)initialisation
    Begin,
    /// A variable this machine reads may have changed
    Reevaluate,
    TimerExpired(TimerKind),
    /// A BPDU arrived on the port (Port Receive only)
    RcvdBpdu(Bpdu),
    PortEnabled,
    PortDisabled,
    /// Hardware has applied the requested forwarding state (Port State
    /// Transition only). `generation` echoes the request being acknowledged.
    StateApplied { state: PortState, generation: u64 },
    /// Hardware has finished flushing the port's addresses (Topology Change
    /// only)
    FdbFlushed,
    /// Forced protocol migration check (Port Protocol Migration only)
    Mcheck,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Begin => "BEGIN",
            Self::Reevaluate => "REEVALUATE",
            Self::TimerExpired(kind) => kind.as_str(),
            Self::RcvdBpdu(_) => "RCVD_BPDU",
            Self::PortEnabled => "PORT_ENABLED",
            Self::PortDisabled => "PORT_DISABLED",
            Self::StateApplied { .. } => "STATE_APPLIED",
            Self::FdbFlushed => "FDB_FLUSHED",
            Self::Mcheck => "MCHECK",
        }
    }
}

/// Where a queued event is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Port Role Selection (one per bridge)
    Prs,
    Port { ifindex: u32, machine: Machine },
}

/// A side effect requested by the engine core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a complete Ethernet frame out of a port
    Transmit { ifindex: u32, frame: Vec<u8> },
    /// Program the port's forwarding state; acknowledge with
    /// `Bridge::state_applied`, passing `generation` back unchanged
    SetPortState {
        ifindex: u32,
        state: PortState,
        generation: u64,
    },
    /// Flush learned addresses on the port; acknowledge with
    /// `Bridge::fdb_flushed`
    FlushFdb { ifindex: u32 },
    /// Administratively shut the port down (BPDU guard)
    DisablePort { ifindex: u32, reason: String },
    /// Bring a port shut down by BPDU guard back up
    EnablePort { ifindex: u32 },
}
