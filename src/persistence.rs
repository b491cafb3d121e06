//! In-memory persistence shim (spec §4.7 / §6.4).
//!
//! `SavedState` bootstraps a rejoining node from a live peer's snapshot.
//! No on-disk format is mandated by the core: the shim is a single guarded
//! slot, and `SavedState` exists only while a node is disconnected —
//! discarded on reactivation after a successful restore.

use crate::consensus::types::{Batch, Phase};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// The triple used to transfer a live node's position to a rejoining peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedState {
    pub snapshot: Vec<u8>,
    pub last_committed_phase: Phase,
    pub pending_batches: Vec<Batch>,
}

impl SavedState {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Single in-memory save/restore slot for the last-known state of a node
/// that has gone Dormant.
///
/// A `parking_lot::Mutex` guards the slot: access is infrequent (only on the
/// Active/Dormant transition and `SyncRequest` handling) so a short critical
/// section is simpler than threading the value through the protocol
/// executor's own state.
#[derive(Default)]
pub struct PersistenceShim {
    slot: Mutex<Option<SavedState>>,
}

impl PersistenceShim {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Save the current state before going Dormant.
    pub fn save(&self, state: SavedState) {
        *self.slot.lock() = Some(state);
    }

    /// Load the previously saved state, if any, without clearing it.
    pub fn load(&self) -> Option<SavedState> {
        self.slot.lock().clone()
    }

    /// Discard the saved state after a successful restore.
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}
