//! Optional leader manager (spec §4.6).
//!
//! The consensus core is leaderless: nothing here is required for
//! Agreement/Validity. A leader is a convenience some host applications
//! want (e.g. to avoid client-side load balancing across proposers), so it
//! is layered on top rather than threaded through the engine.
//!
//! `Local` mode picks the lexicographically-first member as leader,
//! recomputed synchronously on every topology change — cheap, but not
//! linearizable: a brief network partition can produce two local "leaders"
//! until the view converges. `Consensus` mode instead runs leader claims
//! through the engine itself (`RabiaEngine::apply`), so the elected leader
//! is agreed the same way any other command is, at the cost of one round of
//! consensus per leadership change. Grounded on this codebase's Raft
//! election manager shape (`RaftConfig`, randomized-timeout claims) but
//! without its own timeout/voting machinery, since that role is delegated
//! to the engine.

use crate::common::NodeId;
use crate::consensus::RabiaEngine;
use crate::consensus::types::Command;
use crate::topology::TopologyManager;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A leadership transition, tagged with the epoch it belongs to so stale
/// notifications delivered out of order can be discarded by the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderChange {
    pub leader: Option<NodeId>,
    pub view_sequence: u64,
}

/// Wire payload for a consensus-mode leadership claim, submitted as an
/// ordinary command through the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaderClaim {
    candidate: NodeId,
    view_sequence: u64,
}

enum Mode {
    Local {
        topology: Arc<TopologyManager>,
    },
    Consensus {
        engine: Arc<RabiaEngine>,
    },
}

/// Tracks (or elects) a single leader for the host application's convenience.
pub struct LeaderManager {
    self_id: NodeId,
    mode: Mode,
    view_sequence: AtomicU64,
    current: parking_lot::RwLock<Option<NodeId>>,
    listeners: parking_lot::RwLock<Vec<mpsc::UnboundedSender<LeaderChange>>>,
}

impl LeaderManager {
    /// Local mode: leader is recomputed from topology membership alone,
    /// with no consensus round. `recompute` must be called by the owner
    /// whenever topology changes; a typical owner also pipes
    /// `topology.subscribe()` events into it.
    pub fn local(self_id: NodeId, topology: Arc<TopologyManager>) -> Arc<Self> {
        let manager = Arc::new(Self {
            self_id,
            mode: Mode::Local { topology },
            view_sequence: AtomicU64::new(0),
            current: parking_lot::RwLock::new(None),
            listeners: parking_lot::RwLock::new(Vec::new()),
        });
        manager.recompute_local();
        manager
    }

    /// Consensus mode: leadership claims are proposed through `engine`, so
    /// the elected leader is agreed rather than locally computed.
    pub fn consensus(self_id: NodeId, engine: Arc<RabiaEngine>) -> Arc<Self> {
        Arc::new(Self {
            self_id,
            mode: Mode::Consensus { engine },
            view_sequence: AtomicU64::new(0),
            current: parking_lot::RwLock::new(None),
            listeners: parking_lot::RwLock::new(Vec::new()),
        })
    }

    pub fn current_leader(&self) -> Option<NodeId> {
        self.current.read().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.current_leader().as_ref() == Some(&self.self_id)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LeaderChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.write().push(tx);
        rx
    }

    /// Recompute the local-mode leader from current topology. A no-op in
    /// `Consensus` mode.
    pub fn recompute_local(self: &Arc<Self>) {
        let Mode::Local { topology } = &self.mode else {
            return;
        };
        let candidate = topology.members().into_iter().next();
        let changed = {
            let mut current = self.current.write();
            if *current == candidate {
                false
            } else {
                *current = candidate.clone();
                true
            }
        };
        if changed {
            let view_sequence = self.view_sequence.fetch_add(1, Ordering::AcqRel) + 1;
            self.notify(LeaderChange {
                leader: candidate,
                view_sequence,
            });
        }
    }

    /// Propose `self_id` as leader in `Consensus` mode. Resolves once the
    /// claim has been decided and applied by the engine; the caller's own
    /// claim does not necessarily win if a competing claim for the same or
    /// a later view was decided first.
    pub async fn claim_leadership(self: &Arc<Self>) -> crate::Result<()> {
        let Mode::Consensus { engine } = &self.mode else {
            return Err(crate::RabiaError::Protocol(
                "claim_leadership requires consensus mode".into(),
            ));
        };
        let view_sequence = self.view_sequence.load(Ordering::Acquire) + 1;
        let claim = LeaderClaim {
            candidate: self.self_id.clone(),
            view_sequence,
        };
        let command: Command =
            bincode::serde::encode_to_vec(&claim, bincode::config::standard())?;
        engine.apply(command).await?;

        // The claim just committed, but by the time `apply` resolves a
        // competing claim for the same or a later view may already have been
        // installed via `on_leader_committed` (e.g. decided by a different
        // phase that finished first). Route through the same stale-check
        // install path so this can't clobber a newer view with an older one.
        self.try_install(claim.candidate, claim.view_sequence);
        Ok(())
    }

    /// Called by the host's `StateMachine::process` implementation when it
    /// recognizes a committed `LeaderClaim` command, so this manager's view
    /// stays consistent with what every node actually applied (not just
    /// what the local `claim_leadership` caller proposed).
    pub fn on_leader_committed(self: &Arc<Self>, command: &[u8]) {
        let Ok((claim, _)) =
            bincode::serde::decode_from_slice::<LeaderClaim, _>(command, bincode::config::standard())
        else {
            return;
        };
        self.try_install(claim.candidate, claim.view_sequence);
    }

    /// Install `candidate` as leader for `view_sequence` unless a claim for
    /// an equal or later view is already installed. Shared by
    /// `claim_leadership`'s post-commit step and `on_leader_committed` so
    /// both obey the same stale-commit rule instead of one of them
    /// overwriting unconditionally.
    fn try_install(self: &Arc<Self>, candidate: NodeId, view_sequence: u64) {
        let current_view = self.view_sequence.load(Ordering::Acquire);
        if view_sequence <= current_view {
            return;
        }
        self.view_sequence.store(view_sequence, Ordering::Release);
        *self.current.write() = Some(candidate.clone());
        self.notify_async(LeaderChange {
            leader: Some(candidate),
            view_sequence,
        });
    }

    fn notify(&self, change: LeaderChange) {
        self.listeners
            .read()
            .iter()
            .for_each(|tx| drop(tx.send(change.clone())));
    }

    /// Notify listeners from a spawned task rather than the caller's own
    /// call stack, so a listener that itself calls back into the leader
    /// manager (e.g. to re-claim) cannot reenter `claim_leadership`'s or
    /// `on_leader_committed`'s caller synchronously.
    fn notify_async(self: &Arc<Self>, change: LeaderChange) {
        let listeners: Vec<_> = self.listeners.read().clone();
        for tx in listeners {
            let change = change.clone();
            tokio::spawn(async move {
                let _ = tx.send(change);
            });
        }
    }
}
