//! Core data model: [`CorrelationId`], [`Command`], [`Batch`], [`StateValue`],
//! [`Phase`]. See spec §3.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Globally-unique, totally-orderable batch identifier.
///
/// Backed by a UUIDv7 (timestamp-then-random), which gives the "time-sortable
/// ULID-like identifier" the spec calls for: generation order and the
/// natural `Ord` on the 128-bit value agree, which is exactly the tie-break
/// semantics phase voting (spec §4.4) depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Fixed sentinel identifying the empty batch. All nodes must agree on
    /// what "the empty batch" is (spec §9 Open Question), so this is a fixed
    /// constant rather than freshly generated per phase. The all-zero UUID
    /// sorts before every generated (non-nil) UUIDv7, satisfying "empty
    /// batch is the smallest possible proposal".
    pub const NIL: CorrelationId = CorrelationId(Uuid::nil());

    /// Generate a fresh, time-ordered id for a newly submitted batch.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque command payload. The engine never interprets this; only the host
/// state machine does.
pub type Command = Vec<u8>;

/// A unit of commands committed atomically by one phase.
///
/// Identity is the `correlation_id`. Batches are totally ordered by
/// `correlation_id`; this ordering is what lets all honest nodes
/// deterministically agree on the same proposal in tie situations (spec
/// §4.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub correlation_id: CorrelationId,
    pub commands: Vec<Command>,
}

impl Batch {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            correlation_id: CorrelationId::generate(),
            commands,
        }
    }

    /// The sentinel batch used when a node must participate in a phase
    /// despite having nothing pending. Its `correlation_id` is the fixed
    /// [`CorrelationId::NIL`] so every node computes the same "smallest
    /// possible batch" without having exchanged anything.
    pub fn empty() -> Self {
        Self {
            correlation_id: CorrelationId::NIL,
            commands: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl PartialOrd for Batch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Batch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.correlation_id.cmp(&other.correlation_id)
    }
}

/// Monotonic, non-negative phase index. The sole sequencing domain of the
/// protocol; there is no persistent log of phases.
pub type Phase = u64;

/// Three-valued protocol tag.
///
/// `V1` = commit this batch, `V0` = commit nothing this phase, `VQ` =
/// undecided / need the common coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateValue {
    V0,
    V1,
    VQ,
}

/// The deterministic common coin consulted in processRound2Completion when
/// neither `V0` nor `V1` reaches `fPlusOne` support (spec §4.4).
///
/// All correct nodes map the phase number through this same function, so the
/// coin outcome is identical everywhere without any communication.
pub fn common_coin(phase: Phase) -> StateValue {
    if phase % 2 == 0 {
        StateValue::V1
    } else {
        StateValue::V0
    }
}

/// Cluster sizing derived from the topology's member count `n`.
///
/// `quorum_size` and `f_plus_one` are numerically identical
/// (`floor(n/2) + 1`) but named distinctly because they serve different
/// protocol roles: quorum is "enough votes collected to evaluate", f+1 is
/// "at least one honest vote required to decide" (spec §3).
pub fn quorum_size(n: usize) -> usize {
    n / 2 + 1
}

pub fn f_plus_one(n: usize) -> usize {
    n / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_sorts_before_generated_batches() {
        let empty = Batch::empty();
        let generated = Batch::new(vec![vec![1, 2, 3]]);
        assert!(empty < generated);
    }

    #[test]
    fn correlation_ids_are_time_ordered() {
        let a = CorrelationId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = CorrelationId::generate();
        assert!(a < b);
    }

    #[test]
    fn coin_is_deterministic_per_phase() {
        assert_eq!(common_coin(0), StateValue::V1);
        assert_eq!(common_coin(1), StateValue::V0);
        assert_eq!(common_coin(42), common_coin(42));
    }

    #[test]
    fn quorum_and_f_plus_one_agree_numerically() {
        for n in [1usize, 3, 5, 7] {
            assert_eq!(quorum_size(n), f_plus_one(n));
        }
        assert_eq!(quorum_size(3), 2);
        assert_eq!(quorum_size(5), 3);
    }
}
