//! Cluster topology (spec §4.2).
//!
//! Tracks two related but distinct sets, mirroring this codebase's
//! membership view manager (`networking/membership/view.rs`'s
//! `total_nodes()`/`active_nodes` split): the full configured membership
//! (`all`, used as the denominator for `quorum_size`/`f_plus_one`) and the
//! subset of it currently believed reachable (`reachable`, the numerator
//! compared against that quorum size). A `NodeDown` peer stays in `all` —
//! it is still a configured member — but drops out of `reachable`, which is
//! what lets a minority partition actually lose quorum instead of shrinking
//! both sides of the inequality in lockstep.

use crate::common::NodeId;
use crate::consensus::types::{f_plus_one, quorum_size};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// A change to cluster membership or reachability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    /// A member became reachable: either a brand-new member joined, or a
    /// previously-`NodeDown` member is reachable again.
    NodeAdded(NodeId),
    /// A member was gracefully removed from the configured membership.
    NodeRemoved(NodeId),
    /// A configured member became unreachable. Distinct from `NodeRemoved`:
    /// the node is still counted in `quorum_size`'s denominator until
    /// explicitly removed, it has merely dropped out of the reachable set.
    NodeDown(NodeId),
}

/// Edge-triggered quorum availability notification: fired only on the
/// transition, never on every membership tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumStateNotification {
    Established,
    Disappeared,
}

struct Members {
    /// The full configured membership, sorted ascending by `NodeId`.
    all: Vec<NodeId>,
}

/// Tracks the configured member set and the currently-reachable subset of
/// it for one engine instance, notifying registered listeners of
/// membership and quorum-state transitions.
pub struct TopologyManager {
    members: RwLock<Members>,
    reachable: RwLock<HashSet<NodeId>>,
    listeners: RwLock<Vec<mpsc::UnboundedSender<TopologyEvent>>>,
    quorum_listeners: RwLock<Vec<mpsc::UnboundedSender<QuorumStateNotification>>>,
    quorum_established: AtomicBool,
}

impl TopologyManager {
    /// All `initial` members are assumed reachable at construction time.
    pub fn new(initial: Vec<NodeId>) -> Self {
        let mut ids = initial;
        ids.sort();
        ids.dedup();
        let reachable = ids.iter().cloned().collect();
        let manager = Self {
            members: RwLock::new(Members { all: ids }),
            reachable: RwLock::new(reachable),
            listeners: RwLock::new(Vec::new()),
            quorum_listeners: RwLock::new(Vec::new()),
            quorum_established: AtomicBool::new(false),
        };
        // No listeners are registered yet, so this only primes the
        // edge-triggered flag to match the initial reachable set instead of
        // unconditionally starting at "no quorum".
        manager.recompute_quorum();
        manager
    }

    /// The full configured membership, sorted ascending by `NodeId`.
    pub fn members(&self) -> Vec<NodeId> {
        self.members.read().all.clone()
    }

    /// `quorum_size`/`f_plus_one`'s denominator: the configured membership
    /// count, independent of how many of them are currently reachable.
    pub fn member_count(&self) -> usize {
        self.members.read().all.len()
    }

    pub fn quorum_size(&self) -> usize {
        quorum_size(self.member_count())
    }

    pub fn f_plus_one(&self) -> usize {
        f_plus_one(self.member_count())
    }

    /// Is `id` part of the configured membership (regardless of
    /// reachability)?
    pub fn contains(&self, id: &NodeId) -> bool {
        self.members.read().all.binary_search(id).is_ok()
    }

    /// How many configured members are currently believed reachable.
    pub fn reachable_count(&self) -> usize {
        self.reachable.read().len()
    }

    pub fn is_reachable(&self, id: &NodeId) -> bool {
        self.reachable.read().contains(id)
    }

    /// Whether the reachable set currently meets `quorum_size`. Edge-state
    /// read of the same flag `QuorumStateNotification` is triggered from.
    pub fn has_quorum(&self) -> bool {
        self.quorum_established.load(Ordering::Acquire)
    }

    /// Add `id` to the configured membership if new, and mark it reachable
    /// either way. Covers both "a brand-new member joined" and "a
    /// previously `NodeDown` member is reachable again" — both are, per
    /// spec §4.2, a `NodeAdded` ("a member became reachable").
    pub fn add_node(&self, id: NodeId) {
        let newly_configured = {
            let mut members = self.members.write();
            match members.all.binary_search(&id) {
                Ok(_) => false,
                Err(pos) => {
                    members.all.insert(pos, id.clone());
                    true
                }
            }
        };
        let became_reachable = self.reachable.write().insert(id.clone());
        if newly_configured || became_reachable {
            self.notify(TopologyEvent::NodeAdded(id));
            self.recompute_quorum();
        }
    }

    /// Remove `id` from the configured membership entirely (and from the
    /// reachable set, if present).
    pub fn remove_node(&self, id: &NodeId) {
        let removed = {
            let mut members = self.members.write();
            match members.all.binary_search(id) {
                Ok(pos) => {
                    members.all.remove(pos);
                    true
                }
                Err(_) => false,
            }
        };
        self.reachable.write().remove(id);
        if removed {
            self.notify(TopologyEvent::NodeRemoved(id.clone()));
            self.recompute_quorum();
        }
    }

    /// Mark a configured member unreachable without removing it from
    /// membership, shrinking the reachable set (and therefore the quorum
    /// numerator) independently of `quorum_size`'s denominator — this is
    /// what lets a minority partition actually lose quorum.
    pub fn mark_down(&self, id: NodeId) {
        if !self.contains(&id) {
            return;
        }
        let was_reachable = self.reachable.write().remove(&id);
        if was_reachable {
            self.notify(TopologyEvent::NodeDown(id));
            self.recompute_quorum();
        }
    }

    /// Register a listener for membership change events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TopologyEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.write().push(tx);
        rx
    }

    /// Register a listener for edge-triggered quorum-state transitions.
    pub fn subscribe_quorum_state(&self) -> mpsc::UnboundedReceiver<QuorumStateNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.quorum_listeners.write().push(tx);
        rx
    }

    fn notify(&self, event: TopologyEvent) {
        self.listeners
            .read()
            .iter()
            .for_each(|tx| drop(tx.send(event.clone())));
    }

    /// Quorum is available whenever the *reachable* count meets
    /// `quorum_size` of the *configured* count — the two are tracked
    /// separately so a peer going unreachable (spec: `NodeDown`) can trip
    /// this independently of anyone being removed from membership.
    fn recompute_quorum(&self) {
        let quorum = self.quorum_size().max(1);
        let have = self.reachable_count() >= quorum;
        let had = self.quorum_established.load(Ordering::Acquire);
        if have == had {
            return;
        }
        self.quorum_established.store(have, Ordering::Release);
        let notification = if have {
            QuorumStateNotification::Established
        } else {
            QuorumStateNotification::Disappeared
        };
        self.quorum_listeners
            .read()
            .iter()
            .for_each(|tx| drop(tx.send(notification)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::new(id)
    }

    #[test]
    fn members_are_kept_sorted_and_deduped() {
        let topo = TopologyManager::new(vec![node("c"), node("a"), node("a"), node("b")]);
        assert_eq!(topo.members(), vec![node("a"), node("b"), node("c")]);
    }

    #[test]
    fn quorum_and_f_plus_one_track_member_count() {
        let topo = TopologyManager::new(vec![node("a"), node("b"), node("c")]);
        assert_eq!(topo.quorum_size(), 2);
        assert_eq!(topo.f_plus_one(), 2);
    }

    #[test]
    fn add_and_remove_notify_listeners() {
        let topo = TopologyManager::new(vec![node("a")]);
        let mut rx = topo.subscribe();
        topo.add_node(node("b"));
        assert_eq!(rx.try_recv().unwrap(), TopologyEvent::NodeAdded(node("b")));

        topo.remove_node(&node("b"));
        assert_eq!(
            rx.try_recv().unwrap(),
            TopologyEvent::NodeRemoved(node("b"))
        );
    }

    #[test]
    fn duplicate_add_does_not_renotify() {
        let topo = TopologyManager::new(vec![node("a")]);
        let mut rx = topo.subscribe();
        topo.add_node(node("a"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn quorum_notification_is_edge_triggered() {
        let topo = TopologyManager::new(vec![]);
        let mut rx = topo.subscribe_quorum_state();

        topo.add_node(node("a"));
        topo.add_node(node("b"));
        topo.add_node(node("c"));
        // Only one Established event despite three membership changes.
        assert_eq!(
            rx.try_recv().unwrap(),
            QuorumStateNotification::Established
        );
        assert!(rx.try_recv().is_err());
    }

    /// Marking peers down shrinks the reachable numerator without touching
    /// the configured membership denominator, so quorum can be lost by a
    /// minority partition alone — not just by removing members outright.
    #[test]
    fn mark_down_breaks_quorum_without_changing_membership() {
        let ids = vec![node("a"), node("b"), node("c"), node("d"), node("e")];
        let topo = TopologyManager::new(ids);
        let mut rx = topo.subscribe_quorum_state();
        assert!(topo.has_quorum());

        topo.mark_down(node("d"));
        assert!(topo.has_quorum()); // 4/5 reachable, quorum_size(5) = 3
        assert_eq!(topo.member_count(), 5); // membership itself is untouched
        assert!(rx.try_recv().is_err());

        topo.mark_down(node("e"));
        assert!(topo.has_quorum()); // 3/5 reachable, still meets quorum_size(5) = 3

        topo.mark_down(node("c"));
        assert!(!topo.has_quorum()); // 2/5 reachable, below quorum_size(5) = 3
        assert_eq!(topo.member_count(), 5);
        assert_eq!(
            rx.try_recv().unwrap(),
            QuorumStateNotification::Disappeared
        );

        // Healing: re-adding an already-configured member marks it
        // reachable again rather than inserting a duplicate.
        topo.add_node(node("c"));
        assert!(topo.has_quorum()); // 3/5 reachable again
        assert_eq!(topo.member_count(), 5);
        assert_eq!(
            rx.try_recv().unwrap(),
            QuorumStateNotification::Established
        );
    }

    #[test]
    fn reachable_queries_reflect_mark_down() {
        let topo = TopologyManager::new(vec![node("a"), node("b")]);
        assert!(topo.is_reachable(&node("a")));
        topo.mark_down(node("a"));
        assert!(!topo.is_reachable(&node("a")));
        assert!(topo.contains(&node("a"))); // still a configured member
        assert_eq!(topo.reachable_count(), 1);
    }
}
