//! The set of bridges a daemon runs, one actor per VLAN.
//!
//! The engine validates requests, routes them to the owning bridge actor and
//! tracks which bridges each interface belongs to so that link changes fan
//! out to all of them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::actor::{ActorConfig, BridgeHandle, RunningBridge};
use crate::bpdu::TimeUnits;
use crate::bridge::Bridge;
use crate::config::{BridgeConfig, PortConfig};
use crate::error::{StpError, StpResult};
use crate::hal::{HardwareControl, PacketIo};
use crate::status::BridgeStatus;
use crate::types::PortKey;

/// Engine-wide settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    pub actor: ActorConfig,
    /// Encoding of timer fields in transmitted and received BPDUs
    pub time_units: TimeUnits,
}

pub struct Engine {
    hardware: Arc<dyn HardwareControl>,
    packet_io: Arc<dyn PacketIo>,
    options: EngineOptions,
    bridges: BTreeMap<u16, RunningBridge>,
    /// Interface index to the VLANs of the bridges it is attached to
    memberships: BTreeMap<u32, BTreeSet<u16>>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        hardware: Arc<dyn HardwareControl>,
        packet_io: Arc<dyn PacketIo>,
        options: EngineOptions,
    ) -> Self {
        Self {
            hardware,
            packet_io,
            options,
            bridges: BTreeMap::new(),
            memberships: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// VLANs with a running bridge, in ascending order.
    pub fn vlans(&self) -> Vec<u16> {
        self.bridges.keys().copied().collect()
    }

    fn handle(&self, vlan: u16) -> StpResult<&BridgeHandle> {
        self.bridges
            .get(&vlan)
            .map(|running| &running.handle)
            .ok_or(StpError::BridgeNotFound { vlan })
    }

    /// Creates a bridge and starts its actor.
    #[instrument(skip(self, config), fields(vlan = config.vlan))]
    pub async fn create_bridge(&mut self, config: BridgeConfig) -> StpResult<()> {
        config.validate()?;
        let vlan = config.vlan;
        if self.bridges.contains_key(&vlan) {
            return Err(StpError::BridgeExists { vlan });
        }
        let bridge = Bridge::with_time_units(config, self.options.time_units)?;
        let running = BridgeHandle::spawn(
            bridge,
            Arc::clone(&self.hardware),
            Arc::clone(&self.packet_io),
            self.options.actor,
            self.cancel.child_token(),
        )
        .await?;
        self.bridges.insert(vlan, running);
        Ok(())
    }

    pub async fn update_bridge(&mut self, config: BridgeConfig) -> StpResult<()> {
        config.validate()?;
        self.handle(config.vlan)?.update_config(config).await
    }

    /// Detaches every port of the bridge, then stops it.
    #[instrument(skip(self))]
    pub async fn delete_bridge(&mut self, vlan: u16) -> StpResult<()> {
        let handle = self.handle(vlan)?.clone();
        let ports: Vec<u32> = self
            .memberships
            .iter()
            .filter(|(_, vlans)| vlans.contains(&vlan))
            .map(|(ifindex, _)| *ifindex)
            .collect();
        for ifindex in ports {
            if let Err(e) = handle.remove_port(ifindex).await {
                warn!(vlan, ifindex, error = %e, "stpd: failed to detach port");
            }
            self.forget(ifindex, vlan);
        }

        let Some(running) = self.bridges.remove(&vlan) else {
            return Err(StpError::BridgeNotFound { vlan });
        };
        running.handle.shutdown().await?;
        running
            .task
            .await
            .map_err(|e| StpError::internal(format!("bridge {} task failed: {}", vlan, e)))?;
        info!(vlan, "stpd: bridge deleted");
        Ok(())
    }

    /// Attaches a port to the bridge named by `config.brg_ifindex`. The
    /// initial link state is read from hardware.
    #[instrument(skip(self, config), fields(vlan = config.brg_ifindex, ifindex = config.ifindex))]
    pub async fn add_port(&mut self, config: PortConfig) -> StpResult<()> {
        config.validate()?;
        let vlan = config.brg_ifindex;
        let ifindex = config.ifindex;
        let handle = self.handle(vlan)?;

        let key = PortKey::new(vlan, ifindex);
        let link_up = match self.hardware.get_link_status(key).await {
            Ok(up) => up,
            Err(e) => {
                warn!(port = %key, error = %e, "stpd: link status unknown, assuming down");
                false
            }
        };
        handle.add_port(config, link_up).await?;
        self.memberships.entry(ifindex).or_default().insert(vlan);
        Ok(())
    }

    pub async fn update_port(&mut self, config: PortConfig) -> StpResult<()> {
        config.validate()?;
        self.handle(config.brg_ifindex)?.update_port(config).await
    }

    pub async fn remove_port(&mut self, vlan: u16, ifindex: u32) -> StpResult<()> {
        self.handle(vlan)?.remove_port(ifindex).await?;
        self.forget(ifindex, vlan);
        Ok(())
    }

    fn forget(&mut self, ifindex: u32, vlan: u16) {
        if let Some(vlans) = self.memberships.get_mut(&ifindex) {
            vlans.remove(&vlan);
            if vlans.is_empty() {
                self.memberships.remove(&ifindex);
            }
        }
    }

    /// Delivers a link change to every bridge the interface belongs to and
    /// returns how many there were.
    pub async fn set_link_state(&self, ifindex: u32, up: bool) -> StpResult<usize> {
        let Some(vlans) = self.memberships.get(&ifindex) else {
            debug!(ifindex, up, "stpd: link change for unattached interface ignored");
            return Ok(0);
        };
        for vlan in vlans {
            self.handle(*vlan)?.set_link(ifindex, up).await?;
        }
        Ok(vlans.len())
    }

    /// Forces a protocol migration check on a port.
    pub async fn mcheck(&self, vlan: u16, ifindex: u32) -> StpResult<()> {
        self.handle(vlan)?.mcheck(ifindex).await
    }

    pub async fn bridge_status(&self, vlan: u16) -> StpResult<BridgeStatus> {
        self.handle(vlan)?.status().await
    }

    /// Status of every bridge, ordered by VLAN.
    pub async fn status(&self) -> StpResult<Vec<BridgeStatus>> {
        let mut all = Vec::with_capacity(self.bridges.len());
        for running in self.bridges.values() {
            all.push(running.handle.status().await?);
        }
        Ok(all)
    }

    /// Stops every bridge. Bridges that fail to stop cleanly are cancelled.
    pub async fn shutdown(mut self) {
        let bridges = std::mem::take(&mut self.bridges);
        for (vlan, running) in bridges {
            if let Err(e) = running.handle.shutdown().await {
                warn!(vlan, error = %e, "stpd: bridge did not acknowledge shutdown");
            }
            if let Err(e) = running.task.await {
                warn!(vlan, error = %e, "stpd: bridge task ended abnormally");
            }
        }
        self.cancel.cancel();
        self.memberships.clear();
        info!("stpd: engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Actors still running stop at their next wakeup.
        self.cancel.cancel();
    }
}
