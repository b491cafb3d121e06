//! The host state machine contract (spec §6.2), the seam between the
//! consensus core and the application it replicates.
//!
//! Mirrors the shape of this codebase's `ReplicableState` trait
//! (serialize/deserialize/version) but scoped to exactly what a Rabia phase
//! decision needs to deliver: ordered command application plus snapshot
//! install for catch-up.

use crate::error::RabiaError;
use async_trait::async_trait;

/// Implemented by the application embedding the engine.
///
/// `process` is invoked once per decided batch, in phase order, from the
/// single protocol executor task — implementations may assume calls never
/// overlap and never race each other, but must not block the executor for
/// long since no other phase progresses while `process` is in flight.
///
/// Fallible: a `process`/`make_snapshot`/`restore_snapshot` failure is not an
/// exception that crosses the executor boundary (spec §7) — the executor
/// logs it and treats it as a recoverable stall, retrying snapshot restores
/// and dropping the one malformed commit rather than crashing.
#[async_trait]
pub trait StateMachine: Send + Sync {
    /// Apply one command from a decided batch, in order, returning whatever
    /// the caller should see as the result of submitting it.
    async fn process(&self, command: &[u8]) -> Result<Vec<u8>, RabiaError>;

    /// Produce an opaque snapshot of current state, sent to rejoining peers
    /// in a `SyncResponse`.
    async fn make_snapshot(&self) -> Result<Vec<u8>, RabiaError>;

    /// Install a snapshot received from a peer, replacing all local state.
    async fn restore_snapshot(&self, snapshot: &[u8]) -> Result<(), RabiaError>;

    /// Discard all state and return to the fresh-start condition. Used in
    /// tests and when a node is recreated rather than rejoined.
    async fn reset(&self);
}

/// In-memory key/value store used as the reference [`StateMachine`] in
/// tests. Not part of the engine's public contract.
pub struct KvStateMachine {
    store: parking_lot::RwLock<std::collections::BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl KvStateMachine {
    pub fn new() -> Self {
        Self {
            store: parking_lot::RwLock::new(std::collections::BTreeMap::new()),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.store.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }
}

impl Default for KvStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire encoding for [`KvStateMachine`] commands: `Put(key, value)` or
/// `Delete(key)`, bincode-encoded by the caller before submission.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum KvCommand {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

#[async_trait]
impl StateMachine for KvStateMachine {
    async fn process(&self, command: &[u8]) -> Result<Vec<u8>, RabiaError> {
        let (cmd, _) =
            bincode::serde::decode_from_slice::<KvCommand, _>(command, bincode::config::standard())
                .map_err(|e| RabiaError::StateMachine(e.to_string()))?;
        Ok(match cmd {
            KvCommand::Put(key, value) => {
                self.store.write().insert(key, value);
                Vec::new()
            }
            KvCommand::Delete(key) => self.store.write().remove(&key).unwrap_or_default(),
        })
    }

    async fn make_snapshot(&self) -> Result<Vec<u8>, RabiaError> {
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> =
            self.store.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())
            .map_err(|e| RabiaError::StateMachine(e.to_string()))
    }

    async fn restore_snapshot(&self, snapshot: &[u8]) -> Result<(), RabiaError> {
        let (entries, _) = bincode::serde::decode_from_slice::<Vec<(Vec<u8>, Vec<u8>)>, _>(
            snapshot,
            bincode::config::standard(),
        )
        .map_err(|e| RabiaError::StateMachine(e.to_string()))?;
        let mut store = self.store.write();
        store.clear();
        store.extend(entries);
        Ok(())
    }

    async fn reset(&self) {
        self.store.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &[u8], value: &[u8]) -> Vec<u8> {
        bincode::serde::encode_to_vec(
            &KvCommand::Put(key.to_vec(), value.to_vec()),
            bincode::config::standard(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let sm = KvStateMachine::new();
        sm.process(&put(b"a", b"1")).await.unwrap();
        assert_eq!(sm.get(b"a"), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn snapshot_restore_reproduces_state() {
        let sm = KvStateMachine::new();
        sm.process(&put(b"a", b"1")).await.unwrap();
        sm.process(&put(b"b", b"2")).await.unwrap();
        let snap = sm.make_snapshot().await.unwrap();

        let restored = KvStateMachine::new();
        restored.restore_snapshot(&snap).await.unwrap();
        assert_eq!(restored.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(restored.get(b"b"), Some(b"2".to_vec()));
        assert_eq!(restored.len(), 2);
    }

    #[tokio::test]
    async fn reset_clears_all_state() {
        let sm = KvStateMachine::new();
        sm.process(&put(b"a", b"1")).await.unwrap();
        sm.reset().await;
        assert!(sm.is_empty());
    }
}
