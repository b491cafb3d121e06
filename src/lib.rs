//! A leaderless, crash-fault-tolerant consensus engine implementing the
//! Rabia protocol.
//!
//! The core ([`consensus::engine::RabiaEngine`]) is transport-, topology-
//! and state-machine-agnostic: it depends only on the [`transport::Transport`],
//! the cluster view in [`topology::TopologyManager`], and the
//! [`consensus::state_machine::StateMachine`] trait the host application
//! implements. An optional [`leader::LeaderManager`] sits on top for
//! applications that want a single elected proposer despite the core
//! itself being leaderless.
//!
//! This crate never installs a global `tracing` subscriber — that is the
//! embedding binary's responsibility. The example below installs one just
//! for its own output.
//!
//! ```no_run
//! use rabia_engine::{
//!     EngineConfig, FaultConfig, InMemoryNetwork, KvStateMachine, NodeId, RabiaEngine,
//!     TopologyManager,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> rabia_engine::Result<()> {
//! tracing_subscriber::fmt::init();
//!
//! let ids = vec![NodeId::new("a"), NodeId::new("b"), NodeId::new("c")];
//! let network = InMemoryNetwork::new(FaultConfig::default());
//! let topology = Arc::new(TopologyManager::new(ids.clone()));
//! let transport = network.join(ids[0].clone());
//! let state_machine = Arc::new(KvStateMachine::new());
//!
//! let engine = RabiaEngine::new(
//!     ids[0].clone(),
//!     topology,
//!     transport,
//!     state_machine,
//!     EngineConfig::default(),
//! );
//!
//! let result = engine.apply(b"put-encoded-command".to_vec()).await?;
//! println!("committed with {} result(s)", result.len());
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod config;
pub mod consensus;
pub mod error;
pub mod leader;
pub mod persistence;
pub mod router;
pub mod topology;
pub mod transport;

pub use common::NodeId;
pub use config::EngineConfig;
pub use consensus::{ApplyHandle, EngineState, KvStateMachine, RabiaEngine, RabiaMessage, StateMachine};
pub use error::{RabiaError, Result};
pub use leader::LeaderManager;
pub use persistence::{PersistenceShim, SavedState};
pub use router::{MessageHandler, MessageRouter};
pub use topology::TopologyManager;
pub use transport::{FaultConfig, InMemoryNetwork, InMemoryTransport, Transport, TransportEvent};
