//! In-process message router (spec §4.3).
//!
//! Distinct from [`crate::transport`]: the transport moves bytes between
//! nodes, the router dispatches a decoded [`RabiaMessage`] to whichever local
//! component cares about it. Modeled on this codebase's routing dispatch
//! pattern (synchronous delivery for handlers that must observe ordering,
//! a spawned task for ones that must not block the caller) without its
//! request/response correlation machinery, which belongs to RPC routing and
//! has no counterpart here.

use crate::consensus::messages::RabiaMessage;
use async_trait::async_trait;
use std::sync::Arc;

/// Implemented by every local component that wants to observe routed
/// messages (the protocol executor, the leader manager, diagnostics).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: RabiaMessage);
}

/// In-process pub/sub bus. `route` delivers synchronously, in registration
/// order, on the caller's task — used for the protocol executor's own inbox
/// feed where delivery order must match arrival order. `route_async` hands
/// the message to a spawned task per handler, used by components (like the
/// optional leader manager) that must not re-enter the caller.
#[derive(Default)]
pub struct MessageRouter {
    handlers: parking_lot::RwLock<Vec<Arc<dyn MessageHandler>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers.write().push(handler);
    }

    /// Deliver `message` to every registered handler in order, awaiting each
    /// before moving to the next.
    pub async fn route(&self, message: RabiaMessage) {
        let handlers: Vec<_> = self.handlers.read().clone();
        for handler in handlers {
            handler.handle(message.clone()).await;
        }
    }

    /// Deliver `message` to every registered handler on its own spawned
    /// task, without waiting for any of them.
    pub fn route_async(&self, message: RabiaMessage) {
        let handlers: Vec<_> = self.handlers.read().clone();
        for handler in handlers {
            let message = message.clone();
            tokio::spawn(async move {
                handler.handle(message).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeId;
    use crate::consensus::types::Batch;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct RecordingHandler {
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, message: RabiaMessage) {
            self.seen.lock().push(message.message_type());
        }
    }

    #[tokio::test]
    async fn route_delivers_to_all_handlers_in_order() {
        let router = MessageRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        router.register(Arc::new(RecordingHandler {
            seen: Arc::clone(&seen),
        }));
        router.register(Arc::new(RecordingHandler {
            seen: Arc::clone(&seen),
        }));

        router
            .route(RabiaMessage::NewBatch {
                sender: NodeId::new("a"),
                batch: Batch::empty(),
            })
            .await;

        assert_eq!(*seen.lock(), vec!["NewBatch", "NewBatch"]);
    }

    #[tokio::test]
    async fn route_async_eventually_delivers() {
        let router = MessageRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        router.register(Arc::new(RecordingHandler {
            seen: Arc::clone(&seen),
        }));

        router.route_async(RabiaMessage::SyncRequest {
            sender: NodeId::new("a"),
        });

        // Give the spawned task a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(*seen.lock(), vec!["SyncRequest"]);
    }
}
