//! Per-port countdown timers, ticked once per second.

use serde::Serialize;

use crate::event::Machine;

/// The eight per-port protocol timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    EdgeDelayWhile,
    FdWhile,
    HelloWhen,
    MdelayWhile,
    RbWhile,
    RcvdInfoWhile,
    RrWhile,
    TcWhile,
}

impl TimerKind {
    pub const ALL: [TimerKind; 8] = [
        TimerKind::EdgeDelayWhile,
        TimerKind::FdWhile,
        TimerKind::HelloWhen,
        TimerKind::MdelayWhile,
        TimerKind::RbWhile,
        TimerKind::RcvdInfoWhile,
        TimerKind::RrWhile,
        TimerKind::TcWhile,
    ];

    /// Machines notified when the timer reaches zero.
    pub fn owners(self) -> &'static [Machine] {
        match self {
            Self::EdgeDelayWhile => &[Machine::Bdm],
            Self::FdWhile | Self::RbWhile | Self::RrWhile => &[Machine::Prt],
            Self::HelloWhen => &[Machine::Ptx],
            Self::MdelayWhile => &[Machine::Ppm],
            Self::RcvdInfoWhile => &[Machine::Pim],
            Self::TcWhile => &[Machine::Tcm, Machine::Ptx],
        }
    }

    /// Machines whose guards read the running value and must re-evaluate on
    /// every decrement, not only on expiry.
    pub fn watchers(self) -> &'static [Machine] {
        match self {
            Self::EdgeDelayWhile => &[Machine::Prx],
            Self::FdWhile | Self::RbWhile | Self::RrWhile => &[Machine::Prt],
            Self::MdelayWhile => &[Machine::Ppm],
            _ => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EdgeDelayWhile => "edgeDelayWhile",
            Self::FdWhile => "fdWhile",
            Self::HelloWhen => "helloWhen",
            Self::MdelayWhile => "mdelayWhile",
            Self::RbWhile => "rbWhile",
            Self::RcvdInfoWhile => "rcvdInfoWhile",
            Self::RrWhile => "rrWhile",
            Self::TcWhile => "tcWhile",
        }
    }
}

/// Outcome of one tick on a single countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Idle,
    Running,
    Expired,
}

/// A whole-second countdown. Zero means stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Countdown(u16);

impl Countdown {
    pub fn set(&mut self, seconds: u16) {
        self.0 = seconds;
    }

    pub fn get(&self) -> u16 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn tick(&mut self) -> Tick {
        match self.0 {
            0 => Tick::Idle,
            1 => {
                self.0 = 0;
                Tick::Expired
            }
            _ => {
                self.0 -= 1;
                Tick::Running
            }
        }
    }
}

/// Result of ticking every timer of a port.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub expired: Vec<TimerKind>,
    pub running: Vec<TimerKind>,
}

/// The timer block of one port.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortTimers {
    timers: [Countdown; 8],
}

impl PortTimers {
    fn slot(kind: TimerKind) -> usize {
        match kind {
            TimerKind::EdgeDelayWhile => 0,
            TimerKind::FdWhile => 1,
            TimerKind::HelloWhen => 2,
            TimerKind::MdelayWhile => 3,
            TimerKind::RbWhile => 4,
            TimerKind::RcvdInfoWhile => 5,
            TimerKind::RrWhile => 6,
            TimerKind::TcWhile => 7,
        }
    }

    pub fn get(&self, kind: TimerKind) -> u16 {
        self.timers[Self::slot(kind)].get()
    }

    pub fn set(&mut self, kind: TimerKind, seconds: u16) {
        self.timers[Self::slot(kind)].set(seconds);
    }

    pub fn is_zero(&self, kind: TimerKind) -> bool {
        self.timers[Self::slot(kind)].is_zero()
    }

    /// Decrements all running timers by one second.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        for kind in TimerKind::ALL {
            match self.timers[Self::slot(kind)].tick() {
                Tick::Expired => report.expired.push(kind),
                Tick::Running => report.running.push(kind),
                Tick::Idle => {}
            }
        }
        report
    }

    /// Snapshot of all timer values by name.
    pub fn values(&self) -> Vec<(TimerKind, u16)> {
        TimerKind::ALL.iter().map(|k| (*k, self.get(*k))).collect()
    }
}
