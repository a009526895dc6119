//! Runs a local population of gossamer peers until interrupted.

mod config;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use gossamer_network::{MemoryTransport, TcpTransport, Transport};
use gossamer_peer::{
    connect_all, connect_linked, connect_random, AbilityRegistry, IdleWorkload, Peer, PeerError,
    RandomWorkload,
};
use gossamer_protocol::{Address, Task, WireFormat};

use crate::config::{NodeConfig, Topology, TransportKind};

#[derive(Parser)]
#[command(name = "gossamer-node", about = "Run a local gossamer peer population")]
struct Cli {
    /// Config file (defaults to <config dir>/gossamer/config.toml)
    #[arg(long, env = "GOSSAMER_CONFIG")]
    config: Option<PathBuf>,

    /// Number of peers
    #[arg(long)]
    peers: Option<usize>,

    /// First TCP port; peer i listens on base_port + i
    #[arg(long)]
    base_port: Option<u16>,

    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    #[arg(long, value_enum)]
    topology: Option<Topology>,

    /// Seconds between group announcements
    #[arg(long)]
    broadcast_delay: Option<f64>,

    /// Let population health adjust the announce delay
    #[arg(long)]
    adaptive_delay: bool,

    /// Encode frames as TAG=payload instead of JSON envelopes
    #[arg(long)]
    legacy_wire: bool,

    /// Only relay and execute tasks, never originate them
    #[arg(long)]
    no_workload: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    run_for: Option<f64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "GOSSAMER_LOG")]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(peers) = self.peers {
            config.network.peers = peers;
        }
        if let Some(port) = self.base_port {
            config.network.base_port = port;
        }
        if let Some(transport) = self.transport {
            config.network.transport = transport;
        }
        if let Some(topology) = self.topology {
            config.network.topology = topology;
        }
        if let Some(delay) = self.broadcast_delay {
            config.peer.broadcast_delay_secs = delay;
        }
        if self.adaptive_delay {
            config.peer.adaptive_delay = true;
        }
        if self.legacy_wire {
            config.peer.wire_format = WireFormat::Legacy;
        }
        if self.no_workload {
            config.workload.enabled = false;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

/// Per-peer abilities. `sum` accumulates the `random` field of every task
/// the peer executes.
fn abilities(total: Arc<AtomicU64>) -> AbilityRegistry {
    let mut abilities = AbilityRegistry::new();
    abilities.register_fn(
        "sum",
        move |_executor: &Address, task: &Task| {
            let value = task.payload.get("random").and_then(|v| v.as_u64()).ok_or_else(|| {
                PeerError::Ability {
                    ability: "sum".into(),
                    reason: format!("payload has no numeric 'random' field: {}", task.payload),
                }
            })?;
            let total = total.fetch_add(value, Ordering::Relaxed) + value;
            Ok(Some(total.to_string()))
        },
        false,
    );
    abilities.register_fn(
        "echo",
        |executor: &Address, task: &Task| {
            tracing::info!(executor = %executor, sender = %task.sender, payload = %task.payload, "echo");
            Ok(Some(task.payload.to_string()))
        },
        false,
    );
    abilities
}

fn transport(config: &NodeConfig) -> Arc<dyn Transport> {
    match config.network.transport {
        TransportKind::Tcp => Arc::new(TcpTransport::new(config.network.tcp())),
        TransportKind::Memory => Arc::new(MemoryTransport::new()),
    }
}

async fn log_status(peers: &[Peer], totals: &[Arc<AtomicU64>]) {
    for (peer, total) in peers.iter().zip(totals) {
        let report = peer.report().await;
        tracing::info!(
            peer = %report.address,
            status = %report.status,
            group = report.group.len(),
            health = report.health.unwrap_or_default(),
            ratio = report.broadcast_ratio.unwrap_or_default(),
            delay_secs = report.broadcast_delay_secs.unwrap_or_default(),
            queue = report.queue_len.unwrap_or_default(),
            completed = report.tasks_completed.unwrap_or_default(),
            dead_letters = report.dead_letters.unwrap_or_default(),
            sum = total.load(Ordering::Relaxed),
            "Peer status"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = NodeConfig::load(cli.config.as_deref()).context("loading config")?;
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    config.validate().context("validating config")?;

    let transport = transport(&config);
    let addresses = config.network.addresses();
    let mut peers = Vec::with_capacity(addresses.len());
    let mut totals = Vec::with_capacity(addresses.len());
    for address in addresses {
        let total = Arc::new(AtomicU64::new(0));
        let builder = Peer::builder(address, transport.clone()).config(config.peer.clone());
        let builder = if config.workload.enabled {
            builder.with_tasks(
                abilities(total.clone()),
                RandomWorkload::new(config.workload.abilities.iter().cloned()),
            )
        } else {
            builder.with_tasks(abilities(total.clone()), IdleWorkload)
        };
        peers.push(builder.build()?);
        totals.push(total);
    }

    match config.network.topology {
        Topology::Ring => connect_linked(&peers).await?,
        Topology::All => connect_all(&peers).await?,
        Topology::Random => {
            connect_random(&peers, config.network.random_probability, &mut rand::thread_rng())
                .await?
        }
    }

    for peer in peers.iter_mut() {
        peer.setup()
            .await
            .with_context(|| format!("starting peer {}", peer.address()))?;
    }
    tracing::info!(
        peers = peers.len(),
        transport = ?config.network.transport,
        topology = ?config.network.topology,
        "Population running"
    );

    let run_for = cli
        .run_for
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("invalid --run-for")?;
    let mut status = tokio::time::interval(config.status_interval());
    status.tick().await;
    let deadline = async {
        match run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = status.tick() => log_status(&peers, &totals).await,
            _ = &mut deadline => {
                tracing::info!("Run time elapsed");
                break;
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    log_status(&peers, &totals).await;
    for peer in peers.iter_mut() {
        if let Err(e) = peer.teardown().await {
            tracing::warn!(peer = %peer.address(), error = %e, "Teardown failed");
        }
    }
    Ok(())
}
