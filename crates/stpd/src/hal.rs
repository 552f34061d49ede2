//! Collaborators the engine drives: packet I/O and the forwarding hardware.
//!
//! Both traits are object safe and shared between tasks behind `Arc`.
//! Implementations must not call back into the engine.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::warn;

use crate::error::StpResult;
use crate::types::{PortKey, PortState};

/// Frame transport for BPDUs.
#[async_trait]
pub trait PacketIo: Send + Sync {
    /// Sends one complete Ethernet frame out of a port.
    async fn send(&self, port: PortKey, frame: Vec<u8>) -> StpResult<()>;

    /// Frames received on a port. The stream ends when the port goes away.
    async fn receive_stream(&self, port: PortKey) -> StpResult<BoxStream<'static, Vec<u8>>>;
}

/// Data plane control.
#[async_trait]
pub trait HardwareControl: Send + Sync {
    /// Creates the forwarding group (STP instance) for a VLAN and returns
    /// its handle.
    async fn create_forwarding_group(&self, vlan: u16) -> StpResult<u64>;

    async fn delete_forwarding_group(&self, group: u64) -> StpResult<()>;

    async fn set_port_forwarding_state(
        &self,
        group: u64,
        port: PortKey,
        state: PortState,
    ) -> StpResult<()>;

    /// Flushes addresses learned on the port within the group.
    async fn flush_fdb(&self, group: u64, port: PortKey) -> StpResult<()>;

    /// Current link state of the interface.
    async fn get_link_status(&self, port: PortKey) -> StpResult<bool>;

    /// Shuts the interface down administratively.
    async fn disable_port(&self, port: PortKey, reason: &str) -> StpResult<()>;

    /// Reverses [`HardwareControl::disable_port`].
    async fn enable_port(&self, port: PortKey) -> StpResult<()>;
}

/// Exponential backoff for hardware requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0 based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> StpResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = StpResult<T>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry + 1 < self.attempts => {
                    let delay = self.delay(retry);
                    warn!(operation, error = %e, retry, ?delay, "stpd: hardware request failed, retrying");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
