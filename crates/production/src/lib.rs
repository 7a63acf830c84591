//! Production runner for cluster members.
//!
//! This crate wraps the synchronous consensus state machine and the
//! membership, recovery and replication components with async I/O:
//!
//! - Consensus envelopes and replica traffic via a [`Transport`]
//! - Timers via tokio tasks
//! - Heartbeats and timeout sweeps via tokio intervals
//! - Recovery episodes via a join set
//!
//! # Architecture
//!
//! Uses the event aggregator pattern: a single task owns the state machine
//! and receives events via an mpsc channel. Membership, reputation and
//! replication state are shared through concurrent maps.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           ClusterNode                                │
//! │                                                                      │
//! │  Consensus task:  loop { event = recv(); actions = state.handle(); } │
//! │        │                                                             │
//! │        ├─► outbound task ──► Transport ──► peers                     │
//! │        └─► timers ──► timer events                                   │
//! │                                                                      │
//! │  Heartbeat task ──► FailureDetector ──► recovery task                │
//! │  Monitor task   ──► FailureDetector ──► LeaderSuspected              │
//! │                                                                      │
//! │  InboundHandler: heartbeats → detector, envelopes → consensus task,  │
//! │                  replica frames → replica store                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use palisade_production::{ClusterNode, MemoryNetwork, NodeConfig, WireFormat};
//! use palisade_types::{KeyDirectory, KeyPair, NodeId};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let network = MemoryNetwork::new(WireFormat::Binary);
//! let directory = Arc::new(KeyDirectory::new());
//! let key = KeyPair::generate();
//! directory.insert(NodeId::from("node-0"), key.public_key());
//!
//! let node = ClusterNode::builder(NodeConfig::for_node("node-0"))
//!     .signing_key(key)
//!     .verifier(directory)
//!     .transport(Arc::new(network.transport_for(NodeId::from("node-0"))))
//!     .build()?;
//! network.register(NodeId::from("node-0"), node.clone());
//! node.start()?;
//!
//! let proposal = node.propose(b"set x=1".to_vec(), 0).await?;
//! println!("committed {proposal}");
//! node.stop().await;
//! # Ok(())
//! # }
//! ```

mod clock;
pub mod config;
mod heartbeat;
pub mod metrics;
pub mod network;
mod remediation;
mod runner;
mod status;
pub mod telemetry;
mod timers;

pub use clock::TokioClock;
pub use config::{ConfigError, NodeConfig};
pub use heartbeat::Pulse;
pub use metrics::Metrics;
pub use network::{
    Frame, InboundHandler, MemoryNetwork, MemoryTransport, ReplicaRequest, Transport, WireFormat,
};
pub use remediation::{NetworkRecoveryActions, NetworkReplicaTransport};
pub use runner::{ClusterNode, ClusterNodeBuilder, NodeError};
pub use status::{ConsensusStatus, MemberHealth, MonitoringSnapshot, NodeStatusSnapshot};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
pub use timers::TimerManager;
