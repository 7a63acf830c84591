//! Palisade demo cluster
//!
//! Runs an in-process cluster over the in-memory network, drives a batch of
//! proposals through the current leader and prints every member's status.
//!
//! # Usage
//!
//! ```bash
//! # Four members, ten proposals
//! palisade-node
//!
//! # Shared settings for every member, JSON on the wire
//! palisade-node --config node.toml --format json
//!
//! # Take node-0 (the first leader) off the network before proposing
//! palisade-node --nodes 5 --fail-node 0
//! ```
//!
//! # Configuration
//!
//! The config file is a `NodeConfig` applied to every member; `node_id` and
//! `address` are replaced per member. See `NodeConfig` for all options.

use anyhow::{bail, Context, Result};
use clap::Parser;
use palisade_production::{
    init_telemetry, ClusterNode, MemoryNetwork, NodeConfig, NodeStatusSnapshot, WireFormat,
};
use palisade_types::{KeyDirectory, KeyPair, NodeId, ProposalId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts per proposal before giving up.
const MAX_PROPOSAL_ATTEMPTS: usize = 10;

/// Palisade demo cluster
#[derive(Parser, Debug)]
#[command(name = "palisade-node")]
#[command(about = "Run an in-process Palisade cluster")]
#[command(version)]
struct Cli {
    /// Number of members
    #[arg(long, default_value_t = 4)]
    nodes: usize,

    /// Number of proposals to commit
    #[arg(long, default_value_t = 10)]
    proposals: usize,

    /// Path to a member configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wire format: json or binary (overrides config)
    #[arg(long)]
    format: Option<WireFormat>,

    /// Take this member off the network before proposing
    #[arg(long)]
    fail_node: Option<usize>,

    /// Print the first live member's Prometheus metrics
    #[arg(long)]
    metrics: bool,

    /// Log filter directive (overrides config; RUST_LOG wins over both)
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let template = match &cli.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };
    let mut telemetry = template.telemetry.clone();
    if let Some(filter) = &cli.log_filter {
        telemetry = telemetry.with_log_filter(filter.clone());
    }
    init_telemetry(&telemetry)?;

    if cli.nodes == 0 {
        bail!("--nodes must be at least 1");
    }
    if let Some(index) = cli.fail_node {
        if index >= cli.nodes {
            bail!("--fail-node {index} is not a member (cluster has {} nodes)", cli.nodes);
        }
    }

    let format = cli.format.unwrap_or(template.wire_format);
    let network = MemoryNetwork::new(format);
    let directory = Arc::new(KeyDirectory::new());
    let ids: Vec<NodeId> = (0..cli.nodes)
        .map(|i| NodeId::from(format!("node-{i}")))
        .collect();

    let mut nodes = Vec::with_capacity(ids.len());
    for id in &ids {
        let key = KeyPair::generate();
        directory.insert(id.clone(), key.public_key());

        let mut config = template.clone();
        config.node_id = id.to_string();
        config.address = format!("mem://{id}");
        config.wire_format = format;

        let node = ClusterNode::builder(config)
            .signing_key(key)
            .verifier(directory.clone())
            .transport(Arc::new(network.transport_for(id.clone())))
            .members(ids.iter().map(|peer| (peer.clone(), format!("mem://{peer}"))))
            .build()
            .with_context(|| format!("building {id}"))?;
        network.register(id.clone(), node.clone());
        nodes.push(node);
    }

    for node in &nodes {
        node.start()?;
    }
    info!(nodes = nodes.len(), format = ?format, "Cluster started");

    if let Some(index) = cli.fail_node {
        warn!(node = %ids[index], "Taking member off the network");
        network.set_down(&ids[index], true);
    }

    let retry = template.detector_config().heartbeat_interval;
    let mut committed = 0;
    for i in 0..cli.proposals {
        let payload = format!("op-{i}").into_bytes();
        match propose_via_leader(&nodes, &network, payload, retry).await {
            Ok(proposal) => {
                committed += 1;
                info!(proposal = %proposal, "Proposal committed");
            }
            Err(e) => warn!(error = %e, "Proposal failed"),
        }
    }
    info!(committed, requested = cli.proposals, "Proposals done");

    let statuses: Vec<NodeStatusSnapshot> = nodes.iter().map(|n| n.status()).collect();
    println!("{}", serde_json::to_string_pretty(&statuses)?);

    if cli.metrics {
        if let Some(node) = nodes
            .iter()
            .find(|n| !network.is_down(n.local_node_id()))
        {
            println!("{}", node.metrics_text());
        }
    }

    for node in &nodes {
        node.stop().await;
    }
    Ok(())
}

/// Propose through whichever member the live nodes consider leader,
/// retrying while a view change is in progress.
async fn propose_via_leader(
    nodes: &[Arc<ClusterNode>],
    network: &MemoryNetwork,
    payload: Vec<u8>,
    retry: Duration,
) -> Result<ProposalId> {
    let mut last_error = String::from("no live leader");
    for attempt in 1..=MAX_PROPOSAL_ATTEMPTS {
        let leader = nodes
            .iter()
            .filter(|n| !network.is_down(n.local_node_id()))
            .find_map(|n| n.status().leader_id);
        let target = leader.and_then(|leader| {
            nodes
                .iter()
                .find(|n| n.local_node_id() == &leader && !network.is_down(&leader))
        });

        match target {
            Some(node) => match node.propose(payload.clone(), 0).await {
                Ok(proposal) => return Ok(proposal),
                Err(e) => {
                    debug!(attempt, leader = %node.local_node_id(), error = %e, "Proposal attempt failed");
                    last_error = e.to_string();
                }
            },
            None => debug!(attempt, "Waiting for a live leader"),
        }
        tokio::time::sleep(retry).await;
    }
    bail!("not committed after {MAX_PROPOSAL_ATTEMPTS} attempts: {last_error}")
}
