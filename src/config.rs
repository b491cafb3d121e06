//! Engine configuration.
//!
//! The engine is a library with no CLI surface (spec §6): it is constructed
//! programmatically by the embedding application, the same way this
//! codebase's other internal engines (replication, membership) are wired up
//! by their hosts rather than configured from a file or command line.

use std::time::Duration;

/// Tunables accepted by [`crate::consensus::engine::RabiaEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the phase garbage collector sweeps for old `PhaseData`.
    pub cleanup_interval: Duration,

    /// Base interval between `SyncRequest` retransmissions while Syncing.
    pub sync_retry_interval: Duration,

    /// Maximum random jitter added to each sync retry, to avoid a thundering
    /// herd of simultaneously-rejoining nodes all retrying in lockstep.
    pub sync_retry_jitter: Duration,

    /// `PhaseData` for phases older than `current_phase - remove_older_than_phases`
    /// is discarded by the background GC task.
    pub remove_older_than_phases: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(5),
            sync_retry_interval: Duration::from_millis(500),
            sync_retry_jitter: Duration::from_millis(150),
            remove_older_than_phases: 256,
        }
    }
}
