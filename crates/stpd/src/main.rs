//! stpd - Spanning Tree Protocol Daemon
//!
//! Entry point for the stpd daemon. Loads the bridge and port configuration,
//! starts one bridge actor per VLAN and runs until interrupted.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sonic_stpd::config_file::DEFAULT_CONFIG_PATH;
use sonic_stpd::{
    Engine, HardwareControl, PacketIo, PortKey, PortState, StpResult, StpdConfig,
};

/// SONiC Spanning Tree Protocol daemon
#[derive(Parser, Debug)]
#[command(name = "stpd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print the status of every bridge as JSON after startup and exit
    #[arg(long)]
    dump_status: bool,
}

/// Initializes tracing/logging subsystem
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log level")?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set logger")?;
    Ok(())
}

/// Data plane stand-in that records requests in the log.
struct LoggingHardware;

#[async_trait]
impl HardwareControl for LoggingHardware {
    async fn create_forwarding_group(&self, vlan: u16) -> StpResult<u64> {
        info!(vlan, "stpd: create forwarding group");
        Ok(u64::from(vlan))
    }

    async fn delete_forwarding_group(&self, group: u64) -> StpResult<()> {
        info!(group, "stpd: delete forwarding group");
        Ok(())
    }

    async fn set_port_forwarding_state(
        &self,
        group: u64,
        port: PortKey,
        state: PortState,
    ) -> StpResult<()> {
        info!(group, %port, %state, "stpd: set port state");
        Ok(())
    }

    async fn flush_fdb(&self, group: u64, port: PortKey) -> StpResult<()> {
        info!(group, %port, "stpd: flush fdb");
        Ok(())
    }

    async fn get_link_status(&self, _port: PortKey) -> StpResult<bool> {
        Ok(true)
    }

    async fn disable_port(&self, port: PortKey, reason: &str) -> StpResult<()> {
        warn!(%port, reason, "stpd: disable port");
        Ok(())
    }

    async fn enable_port(&self, port: PortKey) -> StpResult<()> {
        info!(%port, "stpd: enable port");
        Ok(())
    }
}

/// Packet I/O with no attached wire: transmitted frames are discarded and
/// nothing is ever received.
struct DetachedWire;

#[async_trait]
impl PacketIo for DetachedWire {
    async fn send(&self, port: PortKey, frame: Vec<u8>) -> StpResult<()> {
        debug!(%port, len = frame.len(), "stpd: transmit");
        Ok(())
    }

    async fn receive_stream(&self, _port: PortKey) -> StpResult<BoxStream<'static, Vec<u8>>> {
        Ok(stream::pending().boxed())
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = StpdConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config))?;
    config.validate().context("invalid configuration")?;

    let mut engine = Engine::new(
        Arc::new(LoggingHardware),
        Arc::new(DetachedWire),
        config.engine_options(),
    );
    for bridge in &config.bridges {
        engine
            .create_bridge(bridge.clone())
            .await
            .with_context(|| format!("creating bridge {}", bridge.vlan))?;
    }
    for port in &config.ports {
        engine
            .add_port(port.clone())
            .await
            .with_context(|| format!("adding port {} to bridge {}", port.ifindex, port.brg_ifindex))?;
    }
    info!(
        bridges = config.bridges.len(),
        ports = config.ports.len(),
        "stpd: initialization complete"
    );

    if args.dump_status {
        let status = engine.status().await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
        info!("stpd: received SIGINT, shutting down");
    }

    engine.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("stpd: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!("--- Starting stpd ---");
    match run(args).await {
        Ok(()) => {
            info!("stpd: exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "stpd: exiting with error");
            ExitCode::FAILURE
        }
    }
}
