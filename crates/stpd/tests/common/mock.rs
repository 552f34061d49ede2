//! Mock collaborators for driving the async engine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

use sonic_stpd::{HardwareControl, PacketIo, PortKey, PortState, StpError, StpResult};

/// Records every hardware request; selected requests can be made to fail.
#[derive(Default)]
pub struct MockHardware {
    calls: Mutex<Vec<String>>,
    links: Mutex<HashMap<PortKey, bool>>,
    /// Remaining forwarding state requests that fail
    state_failures: AtomicU32,
}

impl MockHardware {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn set_link(&self, port: PortKey, up: bool) {
        self.links.lock().unwrap().insert(port, up);
    }

    pub fn fail_state_requests(&self, count: u32) {
        self.state_failures.store(count, Ordering::SeqCst);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl HardwareControl for MockHardware {
    async fn create_forwarding_group(&self, vlan: u16) -> StpResult<u64> {
        self.record(format!("create {}", vlan));
        Ok(0x1000 + u64::from(vlan))
    }

    async fn delete_forwarding_group(&self, group: u64) -> StpResult<()> {
        self.record(format!("delete {:#x}", group));
        Ok(())
    }

    async fn set_port_forwarding_state(
        &self,
        _group: u64,
        port: PortKey,
        state: PortState,
    ) -> StpResult<()> {
        let failing = self
            .state_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.record(format!("state-failed {} {}", port, state));
            return Err(StpError::hardware("set_port_forwarding_state", "device busy"));
        }
        self.record(format!("state {} {}", port, state));
        Ok(())
    }

    async fn flush_fdb(&self, _group: u64, port: PortKey) -> StpResult<()> {
        self.record(format!("flush {}", port));
        Ok(())
    }

    async fn get_link_status(&self, port: PortKey) -> StpResult<bool> {
        Ok(self.links.lock().unwrap().get(&port).copied().unwrap_or(true))
    }

    async fn disable_port(&self, port: PortKey, reason: &str) -> StpResult<()> {
        self.record(format!("disable {} {}", port, reason));
        Ok(())
    }

    async fn enable_port(&self, port: PortKey) -> StpResult<()> {
        self.record(format!("enable {}", port));
        Ok(())
    }
}

/// One side of a set of virtual cables.
#[derive(Default)]
pub struct VirtualWire {
    outbound: Mutex<HashMap<PortKey, mpsc::UnboundedSender<Vec<u8>>>>,
    inbound: Mutex<HashMap<PortKey, mpsc::UnboundedReceiver<Vec<u8>>>>,
    unplugged: Mutex<HashSet<PortKey>>,
}

impl VirtualWire {
    /// Plugs a cable between `a` on this side and `b` on `other`.
    pub fn cable(&self, a: PortKey, other: &VirtualWire, b: PortKey) {
        let (ab_tx, ab_rx) = mpsc::unbounded_channel();
        let (ba_tx, ba_rx) = mpsc::unbounded_channel();
        self.outbound.lock().unwrap().insert(a, ab_tx);
        self.inbound.lock().unwrap().insert(a, ba_rx);
        other.outbound.lock().unwrap().insert(b, ba_tx);
        other.inbound.lock().unwrap().insert(b, ab_rx);
    }

    /// Cuts the cable at this side; later sends on `a` fail.
    pub fn unplug(&self, a: PortKey) {
        self.outbound.lock().unwrap().remove(&a);
        self.unplugged.lock().unwrap().insert(a);
    }
}

#[async_trait]
impl PacketIo for VirtualWire {
    async fn send(&self, port: PortKey, frame: Vec<u8>) -> StpResult<()> {
        if self.unplugged.lock().unwrap().contains(&port) {
            return Err(StpError::packet_io(port.ifindex, "no carrier"));
        }
        if let Some(tx) = self.outbound.lock().unwrap().get(&port) {
            let _ = tx.send(frame);
        }
        Ok(())
    }

    async fn receive_stream(&self, port: PortKey) -> StpResult<BoxStream<'static, Vec<u8>>> {
        match self.inbound.lock().unwrap().remove(&port) {
            Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|frame| (frame, rx))
            })
            .boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}
