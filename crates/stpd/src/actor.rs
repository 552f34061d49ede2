//! Per-bridge actor.
//!
//! Each bridge runs in its own tokio task that owns the [`Bridge`] record
//! and every one of its ports. Configuration commands, received frames,
//! the one second tick and hardware completions all arrive on channels and
//! are applied strictly one at a time, so the state machines never see
//! concurrent mutation.
//!
//! Hardware requests run in spawned tasks and post their completion back to
//! the actor. Receive pumps forward frames with `try_send` and never block.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::bridge::Bridge;
use crate::config::{BridgeConfig, PortConfig};
use crate::error::{StpError, StpResult};
use crate::event::Action;
use crate::hal::{HardwareControl, PacketIo, RetryPolicy};
use crate::status::BridgeStatus;
use crate::types::{PortKey, PortState};

/// Default capacity of a bridge's command queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

const TICK: Duration = Duration::from_secs(1);

/// Runtime knobs shared by every bridge actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorConfig {
    pub queue_depth: usize,
    pub retry: RetryPolicy,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            retry: RetryPolicy::default(),
        }
    }
}

type Reply<T> = oneshot::Sender<StpResult<T>>;

enum Command {
    AddPort {
        config: PortConfig,
        link_up: bool,
        reply: Reply<()>,
    },
    RemovePort {
        ifindex: u32,
        reply: Reply<()>,
    },
    UpdatePort {
        config: PortConfig,
        reply: Reply<()>,
    },
    UpdateConfig {
        config: BridgeConfig,
        reply: Reply<()>,
    },
    SetLink {
        ifindex: u32,
        up: bool,
        reply: Reply<()>,
    },
    Mcheck {
        ifindex: u32,
        reply: Reply<()>,
    },
    Status {
        reply: Reply<BridgeStatus>,
    },
    /// A received frame, with the number of frames the pump dropped since
    /// the previous one got through
    Frame {
        ifindex: u32,
        frame: Vec<u8>,
        dropped: u64,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Outcome of a hardware request.
enum Completion {
    State {
        ifindex: u32,
        state: PortState,
        generation: u64,
        ok: bool,
    },
    Flush { ifindex: u32, ok: bool },
}

/// Cloneable handle to a running bridge actor.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    vlan: u16,
    tx: mpsc::Sender<Command>,
}

/// A bridge actor and the task running it.
#[derive(Debug)]
pub struct RunningBridge {
    pub handle: BridgeHandle,
    pub task: JoinHandle<()>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AddPort { .. } => "AddPort",
            Self::RemovePort { .. } => "RemovePort",
            Self::UpdatePort { .. } => "UpdatePort",
            Self::UpdateConfig { .. } => "UpdateConfig",
            Self::SetLink { .. } => "SetLink",
            Self::Mcheck { .. } => "Mcheck",
            Self::Status { .. } => "Status",
            Self::Frame { .. } => "Frame",
            Self::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl BridgeHandle {
    /// Creates the bridge's forwarding group and starts its actor.
    ///
    /// Fails without spawning anything if the group cannot be created.
    #[instrument(skip_all, fields(vlan = bridge.vlan()))]
    pub async fn spawn(
        bridge: Bridge,
        hardware: Arc<dyn HardwareControl>,
        packet_io: Arc<dyn PacketIo>,
        config: ActorConfig,
        cancel: CancellationToken,
    ) -> StpResult<RunningBridge> {
        let vlan = bridge.vlan();
        let group = config
            .retry
            .run("create_forwarding_group", || hardware.create_forwarding_group(vlan))
            .await?;
        info!(vlan, group, "stpd: forwarding group created");

        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let actor = BridgeActor {
            bridge,
            group,
            hardware,
            packet_io,
            retry: config.retry,
            commands: rx,
            pump_tx: tx.downgrade(),
            completions_tx: done_tx,
            completions: done_rx,
            pumps: HashMap::new(),
            cancel,
        };
        let task = tokio::spawn(actor.run());
        Ok(RunningBridge {
            handle: BridgeHandle { vlan, tx },
            task,
        })
    }

    pub fn vlan(&self) -> u16 {
        self.vlan
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> StpResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| StpError::ChannelClosed { vlan: self.vlan })?;
        rx.await
            .map_err(|_| StpError::ChannelClosed { vlan: self.vlan })?
    }

    pub async fn add_port(&self, config: PortConfig, link_up: bool) -> StpResult<()> {
        self.request(|reply| Command::AddPort {
            config,
            link_up,
            reply,
        })
        .await
    }

    pub async fn remove_port(&self, ifindex: u32) -> StpResult<()> {
        self.request(|reply| Command::RemovePort { ifindex, reply })
            .await
    }

    pub async fn update_port(&self, config: PortConfig) -> StpResult<()> {
        self.request(|reply| Command::UpdatePort { config, reply })
            .await
    }

    pub async fn update_config(&self, config: BridgeConfig) -> StpResult<()> {
        self.request(|reply| Command::UpdateConfig { config, reply })
            .await
    }

    pub async fn set_link(&self, ifindex: u32, up: bool) -> StpResult<()> {
        self.request(|reply| Command::SetLink { ifindex, up, reply })
            .await
    }

    pub async fn mcheck(&self, ifindex: u32) -> StpResult<()> {
        self.request(|reply| Command::Mcheck { ifindex, reply })
            .await
    }

    pub async fn status(&self) -> StpResult<BridgeStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Stops the actor. Commands still queued are discarded.
    pub async fn shutdown(&self) -> StpResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| StpError::ChannelClosed { vlan: self.vlan })?;
        rx.await
            .map_err(|_| StpError::ChannelClosed { vlan: self.vlan })
    }
}

struct BridgeActor {
    bridge: Bridge,
    group: u64,
    hardware: Arc<dyn HardwareControl>,
    packet_io: Arc<dyn PacketIo>,
    retry: RetryPolicy,
    commands: mpsc::Receiver<Command>,
    /// Weak so that dropping every handle closes the command queue
    pump_tx: mpsc::WeakSender<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    pumps: HashMap<u32, CancellationToken>,
    cancel: CancellationToken,
}

impl BridgeActor {
    async fn run(mut self) {
        let vlan = self.bridge.vlan();
        let mut ticker = time::interval_at(Instant::now() + TICK, TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(vlan, "stpd: bridge actor started");

        self.execute().await;
        let shutdown_reply = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => break Some(reply),
                    Some(command) => self.handle(command),
                    None => break None,
                },
                Some(done) = self.completions.recv() => self.complete(done),
                _ = ticker.tick() => self.bridge.tick(),
                _ = self.cancel.cancelled() => break None,
            }
            self.execute().await;
        };

        self.stop().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::AddPort {
                config,
                link_up,
                reply,
            } => {
                let ifindex = config.ifindex;
                let result = self.bridge.add_port(config, link_up);
                if result.is_ok() {
                    self.start_pump(ifindex);
                }
                let _ = reply.send(result);
            }
            Command::RemovePort { ifindex, reply } => {
                let result = self.bridge.remove_port(ifindex);
                if result.is_ok() {
                    self.stop_pump(ifindex);
                }
                let _ = reply.send(result);
            }
            Command::UpdatePort { config, reply } => {
                let _ = reply.send(self.bridge.update_port(config));
            }
            Command::UpdateConfig { config, reply } => {
                let _ = reply.send(self.bridge.update_config(config));
            }
            Command::SetLink { ifindex, up, reply } => {
                let _ = reply.send(self.bridge.set_link(ifindex, up));
            }
            Command::Mcheck { ifindex, reply } => {
                let _ = reply.send(self.bridge.mcheck(ifindex));
            }
            Command::Status { reply } => {
                let _ = reply.send(Ok(self.bridge.status()));
            }
            Command::Frame {
                ifindex,
                frame,
                dropped,
            } => {
                if dropped > 0 {
                    self.bridge.frames_dropped(ifindex, dropped);
                }
                self.bridge.receive_frame(ifindex, &frame);
            }
            // Handled by the run loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn complete(&mut self, done: Completion) {
        match done {
            Completion::State {
                ifindex,
                state,
                generation,
                ok,
            } => {
                if !ok {
                    self.bridge.hardware_failed(ifindex);
                }
                self.bridge.state_applied(ifindex, state, generation);
            }
            Completion::Flush { ifindex, ok } => {
                if !ok {
                    self.bridge.hardware_failed(ifindex);
                }
                self.bridge.fdb_flushed(ifindex);
            }
        }
    }

    fn key(&self, ifindex: u32) -> PortKey {
        PortKey::new(self.bridge.vlan(), ifindex)
    }

    /// Drains the bridge and carries out the resulting actions.
    async fn execute(&mut self) {
        for action in self.bridge.process() {
            match action {
                Action::Transmit { ifindex, frame } => {
                    if let Err(e) = self.transmit(ifindex, frame).await {
                        self.bridge.transmit_failed(ifindex);
                        warn!(port = %self.key(ifindex), error = %e, "stpd: BPDU transmit failed");
                    }
                }
                Action::SetPortState {
                    ifindex,
                    state,
                    generation,
                } => self.spawn_set_state(ifindex, state, generation),
                Action::FlushFdb { ifindex } => self.spawn_flush(ifindex),
                Action::DisablePort { ifindex, reason } => {
                    self.spawn_admin(ifindex, Some(reason))
                }
                Action::EnablePort { ifindex } => self.spawn_admin(ifindex, None),
            }
        }
    }

    async fn transmit(&self, ifindex: u32, frame: Vec<u8>) -> StpResult<()> {
        self.packet_io
            .send(self.key(ifindex), frame)
            .await
            .map_err(|e| match e {
                StpError::PacketIo { .. } => e,
                other => StpError::packet_io(ifindex, other.to_string()),
            })
    }

    fn spawn_set_state(&self, ifindex: u32, state: PortState, generation: u64) {
        let hardware = Arc::clone(&self.hardware);
        let done = self.completions_tx.clone();
        let retry = self.retry;
        let group = self.group;
        let key = self.key(ifindex);
        tokio::spawn(async move {
            let result = retry
                .run("set_port_forwarding_state", || {
                    hardware.set_port_forwarding_state(group, key, state)
                })
                .await;
            let ok = match result {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        port = %key,
                        %state,
                        error = %e,
                        "stpd: forwarding state not applied, continuing degraded"
                    );
                    false
                }
            };
            let _ = done.send(Completion::State {
                ifindex,
                state,
                generation,
                ok,
            });
        });
    }

    fn spawn_flush(&self, ifindex: u32) {
        let hardware = Arc::clone(&self.hardware);
        let done = self.completions_tx.clone();
        let retry = self.retry;
        let group = self.group;
        let key = self.key(ifindex);
        tokio::spawn(async move {
            let result = retry
                .run("flush_fdb", || hardware.flush_fdb(group, key))
                .await;
            let ok = match result {
                Ok(()) => true,
                Err(e) => {
                    error!(port = %key, error = %e, "stpd: FDB flush failed, continuing degraded");
                    false
                }
            };
            let _ = done.send(Completion::Flush { ifindex, ok });
        });
    }

    /// Administrative shutdown (`Some(reason)`) or re-enable of a port.
    fn spawn_admin(&self, ifindex: u32, disable: Option<String>) {
        let hardware = Arc::clone(&self.hardware);
        let retry = self.retry;
        let key = self.key(ifindex);
        tokio::spawn(async move {
            let result = match &disable {
                Some(reason) => {
                    retry
                        .run("disable_port", || hardware.disable_port(key, reason))
                        .await
                }
                None => retry.run("enable_port", || hardware.enable_port(key)).await,
            };
            if let Err(e) = result {
                error!(port = %key, error = %e, "stpd: port admin state change failed");
            }
        });
    }

    fn start_pump(&mut self, ifindex: u32) {
        let token = self.cancel.child_token();
        if let Some(old) = self.pumps.insert(ifindex, token.clone()) {
            old.cancel();
        }
        let pump = ReceivePump {
            key: self.key(ifindex),
            packet_io: Arc::clone(&self.packet_io),
            tx: self.pump_tx.clone(),
            cancel: token,
        };
        tokio::spawn(pump.run());
    }

    fn stop_pump(&mut self, ifindex: u32) {
        if let Some(token) = self.pumps.remove(&ifindex) {
            token.cancel();
        }
    }

    async fn stop(&mut self) {
        let vlan = self.bridge.vlan();
        for (_, token) in self.pumps.drain() {
            token.cancel();
        }
        let hardware = &self.hardware;
        let group = self.group;
        if let Err(e) = self
            .retry
            .run("delete_forwarding_group", || hardware.delete_forwarding_group(group))
            .await
        {
            warn!(vlan, group, error = %e, "stpd: failed to delete forwarding group");
        }
        info!(vlan, "stpd: bridge actor stopped");
    }
}

/// Forwards frames received on one port into the bridge queue.
struct ReceivePump {
    key: PortKey,
    packet_io: Arc<dyn PacketIo>,
    tx: mpsc::WeakSender<Command>,
    cancel: CancellationToken,
}

impl ReceivePump {
    async fn run(self) {
        let key = self.key;
        let mut frames = match self.packet_io.receive_stream(key).await {
            Ok(frames) => frames,
            Err(e) => {
                warn!(port = %key, error = %e, "stpd: cannot open receive stream");
                return;
            }
        };
        debug!(port = %key, "stpd: receive pump started");

        let mut dropped = 0u64;
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = frames.next() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            let Some(tx) = self.tx.upgrade() else {
                break;
            };
            let command = Command::Frame {
                ifindex: key.ifindex,
                frame,
                dropped,
            };
            match tx.try_send(command) {
                Ok(()) => dropped = 0,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    if dropped.is_power_of_two() {
                        warn!(port = %key, dropped, "stpd: bridge queue full, dropping frames");
                    }
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }
        debug!(port = %key, "stpd: receive pump stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MacAddress;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHardware {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingHardware {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl HardwareControl for RecordingHardware {
        async fn create_forwarding_group(&self, vlan: u16) -> StpResult<u64> {
            self.push(format!("create {}", vlan));
            Ok(u64::from(vlan) + 1000)
        }

        async fn delete_forwarding_group(&self, group: u64) -> StpResult<()> {
            self.push(format!("delete {}", group));
            Ok(())
        }

        async fn set_port_forwarding_state(
            &self,
            _group: u64,
            port: PortKey,
            state: PortState,
        ) -> StpResult<()> {
            self.push(format!("state {} {}", port, state));
            Ok(())
        }

        async fn flush_fdb(&self, _group: u64, port: PortKey) -> StpResult<()> {
            self.push(format!("flush {}", port));
            Ok(())
        }

        async fn get_link_status(&self, _port: PortKey) -> StpResult<bool> {
            Ok(true)
        }

        async fn disable_port(&self, port: PortKey, _reason: &str) -> StpResult<()> {
            self.push(format!("disable {}", port));
            Ok(())
        }

        async fn enable_port(&self, port: PortKey) -> StpResult<()> {
            self.push(format!("enable {}", port));
            Ok(())
        }
    }

    #[derive(Default)]
    struct SilentWire {
        sent: Mutex<Vec<(PortKey, Vec<u8>)>>,
    }

    #[async_trait]
    impl PacketIo for SilentWire {
        async fn send(&self, port: PortKey, frame: Vec<u8>) -> StpResult<()> {
            self.sent.lock().unwrap().push((port, frame));
            Ok(())
        }

        async fn receive_stream(&self, _port: PortKey) -> StpResult<BoxStream<'static, Vec<u8>>> {
            Ok(stream::pending().boxed())
        }
    }

    async fn spawn(hardware: Arc<RecordingHardware>, wire: Arc<SilentWire>) -> RunningBridge {
        let bridge = Bridge::new(BridgeConfig::new(10, MacAddress::new([0, 0, 0, 0, 0, 9]))).unwrap();
        BridgeHandle::spawn(
            bridge,
            hardware,
            wire,
            ActorConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_port_reaches_forwarding() {
        let hardware = Arc::new(RecordingHardware::default());
        let wire = Arc::new(SilentWire::default());
        let running = spawn(hardware.clone(), wire.clone()).await;
        let handle = running.handle.clone();

        handle.add_port(PortConfig::new(10, 4), true).await.unwrap();
        // Nothing answers on the wire; the port forwards on its own.
        time::sleep(Duration::from_secs(31)).await;

        let status = handle.status().await.unwrap();
        assert!(status.is_root);
        let port = status.port(4).unwrap();
        assert_eq!(port.state, PortState::Forwarding);
        assert!(!wire.sent.lock().unwrap().is_empty());

        handle.shutdown().await.unwrap();
        running.task.await.unwrap();

        let calls = hardware.calls();
        assert_eq!(calls.first().map(String::as_str), Some("create 10"));
        assert!(calls.contains(&"state Vlan10:4 forwarding".to_string()));
        assert_eq!(calls.last().map(String::as_str), Some("delete 1010"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_returned_to_caller() {
        let running = spawn(Arc::default(), Arc::default()).await;
        let handle = running.handle.clone();

        let err = handle.remove_port(7).await.unwrap_err();
        assert!(matches!(err, StpError::PortNotFound { vlan: 10, ifindex: 7 }));

        handle.add_port(PortConfig::new(10, 7), true).await.unwrap();
        let err = handle.add_port(PortConfig::new(10, 7), true).await.unwrap_err();
        assert!(matches!(err, StpError::PortExists { .. }));

        handle.shutdown().await.unwrap();
        running.task.await.unwrap();
        let err = handle.status().await.unwrap_err();
        assert!(matches!(err, StpError::ChannelClosed { vlan: 10 }));
    }
}
