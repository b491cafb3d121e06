//! The consensus core: data model, wire messages, per-phase voting state,
//! the protocol executor, and the host state machine contract.

pub mod engine;
pub mod messages;
pub mod phase;
pub mod state_machine;
pub mod types;

pub use engine::{ApplyHandle, EngineState, RabiaEngine};
pub use messages::RabiaMessage;
pub use state_machine::{KvStateMachine, StateMachine};
pub use types::{Batch, Command, CorrelationId, Phase, StateValue};
