//! The Rabia consensus engine (spec §4.5): the core.
//!
//! Owns a single serialized execution lane — one `tokio::task` draining an
//! mpsc inbox — so every piece of phase state (`phases`, `pending`,
//! `completion_handles`) is touched by exactly one task and never needs a
//! lock of its own. Everything else (submission, inbound transport
//! delivery, timers, topology events) only ever sends a command into that
//! inbox.
//!
//! Phase voting logic is kept synchronous and wrapped in
//! `std::panic::catch_unwind` at the dispatch boundary: a bug in one
//! message handler drops that message rather than taking the whole node
//! down. Anything that must `.await` (applying committed commands,
//! snapshotting for a sync response) is deferred to an [`Effect`] performed
//! after the synchronous handler returns.

use crate::common::NodeId;
use crate::config::EngineConfig;
use crate::consensus::messages::{decode, encode, RabiaMessage};
use crate::consensus::phase::{Decision, PhaseData};
use crate::consensus::state_machine::StateMachine;
use crate::consensus::types::{Batch, Command, CorrelationId, Phase, StateValue};
use crate::error::RabiaError;
use crate::persistence::{PersistenceShim, SavedState};
use crate::topology::{QuorumStateNotification, TopologyManager};
use crate::transport::Transport;

use rand::Rng;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Lifecycle state of one engine instance (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not in quorum; cannot vote. Initial state, and the state re-entered
    /// whenever quorum is lost.
    Dormant,
    /// Started with peers present; catching up via `SyncRequest`/`SyncResponse`
    /// before participating in phases.
    Syncing,
    /// Participating in phase voting.
    Active,
}

/// A handle to a command submitted to the engine. Resolves once the batch
/// containing it has been decided `V1` and every command in it has been
/// applied to the state machine, in order — or synchronously if the
/// submission itself was rejected (spec §7: `EmptyBatch`, `NodeInactive`).
pub struct ApplyHandle {
    rx: oneshot::Receiver<crate::Result<Vec<Vec<u8>>>>,
}

impl ApplyHandle {
    fn ready(result: crate::Result<Vec<Vec<u8>>>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for ApplyHandle {
    type Output = crate::Result<Vec<Vec<u8>>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(RabiaError::NodeInactive)))
    }
}

enum EngineCommand {
    Inbound(RabiaMessage),
    Submit(Batch, oneshot::Sender<crate::Result<Vec<Vec<u8>>>>),
    /// A forwarded submission (spec §4.5 `handleSubmit`): enqueued exactly
    /// like `Submit`, but with no completion handle for this node to
    /// resolve — whoever originated it tracks completion elsewhere.
    ForwardedSubmit(Batch),
    QuorumEstablished,
    QuorumDisappeared,
    TickCleanup,
    TickSyncRetry,
    Stop,
}

/// Deferred work produced by a synchronous phase-transition step. Kept
/// separate from the transition logic itself so that logic can stay plain
/// `&mut self` code, catchable with `catch_unwind`.
enum Effect {
    Broadcast(RabiaMessage),
    RespondSync(NodeId),
    Commit {
        correlation_id: CorrelationId,
        commands: Vec<Command>,
    },
    ApplySyncResponse(SavedState),
    GoDormant,
}

#[derive(Default)]
struct PhaseLocal {
    own_batch: Option<Batch>,
    r1_cast: bool,
    r2_cast: bool,
}

/// Owns all mutable phase state. Lives entirely inside the executor task;
/// nothing outside ever touches these fields directly.
struct Executor {
    self_id: NodeId,
    topology: Arc<TopologyManager>,
    persistence: Arc<PersistenceShim>,
    config: EngineConfig,
    state: Arc<parking_lot::RwLock<EngineState>>,
    current_phase: Arc<AtomicU64>,
    last_committed_phase: Arc<AtomicU64>,
    phases: HashMap<Phase, Arc<PhaseData>>,
    locals: HashMap<Phase, PhaseLocal>,
    pending: BTreeSet<Batch>,
    completion_handles: HashMap<CorrelationId, oneshot::Sender<crate::Result<Vec<Vec<u8>>>>>,
    /// `SyncResponse`s collected so far while `Syncing`, keyed by sender so a
    /// duplicate reply from the same peer overwrites rather than double-counts.
    sync_responses: HashMap<NodeId, SavedState>,
}

impl Executor {
    fn phase_entry(&mut self, phase: Phase) -> Arc<PhaseData> {
        Arc::clone(
            self.phases
                .entry(phase)
                .or_insert_with(|| Arc::new(PhaseData::new(phase))),
        )
    }

    fn in_phase(&self, phase: Phase) -> bool {
        self.locals
            .get(&phase)
            .is_some_and(|l| l.own_batch.is_some())
    }

    /// Starts `phase` if this node has not already started it. The
    /// `own_batch` presence check is the "is_in_phase" guard (spec §4.5):
    /// since only the executor task ever calls this, a plain check-then-set
    /// is equivalent to a CAS here, with no possibility of another writer
    /// racing it.
    fn start_phase(&mut self, phase: Phase) -> Vec<Effect> {
        if self.in_phase(phase) {
            return Vec::new();
        }

        let own_batch = self
            .pending
            .iter()
            .next()
            .cloned()
            .unwrap_or_else(Batch::empty);

        let phase_data = self.phase_entry(phase);
        phase_data.register_proposal(self.self_id.clone(), own_batch.clone());
        self.locals.entry(phase).or_default().own_batch = Some(own_batch.clone());

        let mut effects = vec![Effect::Broadcast(RabiaMessage::Propose {
            sender: self.self_id.clone(),
            phase,
            batch: own_batch,
        })];
        effects.extend(self.try_cast_round1(phase));
        effects
    }

    fn try_cast_round1(&mut self, phase: Phase) -> Vec<Effect> {
        let Some(local) = self.locals.get(&phase) else {
            return Vec::new();
        };
        if local.r1_cast {
            return Vec::new();
        }
        let Some(own_batch) = local.own_batch.clone() else {
            return Vec::new();
        };

        let phase_data = self.phase_entry(phase);
        if phase_data.proposal_count() == 0 {
            return Vec::new();
        }

        let vote = phase_data.evaluate_initial_vote(&own_batch);
        phase_data.register_round1_vote(self.self_id.clone(), vote);
        self.locals.get_mut(&phase).unwrap().r1_cast = true;

        let mut effects = vec![Effect::Broadcast(RabiaMessage::VoteRound1 {
            sender: self.self_id.clone(),
            phase,
            state_value: vote,
        })];
        effects.extend(self.try_cast_round2(phase));
        effects
    }

    fn try_cast_round2(&mut self, phase: Phase) -> Vec<Effect> {
        let Some(local) = self.locals.get(&phase) else {
            return Vec::new();
        };
        if local.r2_cast {
            return Vec::new();
        }

        let phase_data = self.phase_entry(phase);
        let quorum = self.topology.quorum_size();
        let f_plus_one = self.topology.f_plus_one();
        let Some(vote) = phase_data.evaluate_round2_vote(quorum, f_plus_one) else {
            return Vec::new();
        };

        phase_data.register_round2_vote(self.self_id.clone(), vote);
        self.locals.get_mut(&phase).unwrap().r2_cast = true;

        let mut effects = vec![Effect::Broadcast(RabiaMessage::VoteRound2 {
            sender: self.self_id.clone(),
            phase,
            state_value: vote,
        })];
        effects.extend(self.try_complete(phase));
        effects
    }

    fn try_complete(&mut self, phase: Phase) -> Vec<Effect> {
        let phase_data = self.phase_entry(phase);
        if phase_data.is_decided() {
            return Vec::new();
        }
        let quorum = self.topology.quorum_size();
        let f_plus_one = self.topology.f_plus_one();
        let Some(decision) = phase_data.process_round2_completion(quorum, f_plus_one) else {
            return Vec::new();
        };
        if !phase_data.try_mark_decided() {
            return Vec::new();
        }

        let mut effects = vec![Effect::Broadcast(RabiaMessage::Decision {
            sender: self.self_id.clone(),
            phase,
            state_value: decision.state_value,
            batch: decision.batch.clone(),
        })];
        effects.extend(self.finalize_decision(phase, decision));
        effects
    }

    /// Applies a decision reached either locally or via an inbound
    /// `Decision` message: commits the batch (if any), advances
    /// `current_phase`, and — if there is still pending work — schedules
    /// the next phase (spec §4.5: "if pending batches remain, schedule
    /// another startPhase"). A node with nothing pending goes idle instead
    /// of spinning forever on empty-batch phases; it resumes either on its
    /// own next `apply`/gossip or reactively when it observes a peer's
    /// `Propose` for the next phase.
    fn finalize_decision(&mut self, phase: Phase, decision: Decision) -> Vec<Effect> {
        let mut effects = Vec::new();
        if decision.state_value == StateValue::V1 && !decision.batch.is_empty() {
            self.pending.remove(&decision.batch);
            effects.push(Effect::Commit {
                correlation_id: decision.batch.correlation_id,
                commands: decision.batch.commands,
            });
        }

        tracing::debug!(
            node_id = %self.self_id,
            phase,
            state_value = ?decision.state_value,
            "phase decided"
        );
        self.last_committed_phase.store(phase, Ordering::Release);
        self.current_phase.store(phase + 1, Ordering::Release);
        if !self.pending.is_empty() {
            effects.extend(self.start_phase(phase + 1));
        }
        effects
    }

    fn handle_message(&mut self, message: RabiaMessage) -> Vec<Effect> {
        match message {
            RabiaMessage::Propose {
                sender,
                phase,
                batch,
            } => {
                let current = self.current_phase.load(Ordering::Acquire);
                if phase < current {
                    // Proposals for past phases are dropped silently.
                    return Vec::new();
                }
                let mut effects = Vec::new();
                if phase == current && !self.in_phase(phase) {
                    // We have not yet joined this phase ourselves: join it
                    // now so we register (and broadcast) our own candidate
                    // before evaluating a round-1 vote against the peer's.
                    effects.extend(self.start_phase(phase));
                }
                self.phase_entry(phase).register_proposal(sender, batch);
                effects.extend(self.try_cast_round1(phase));
                effects
            }
            RabiaMessage::VoteRound1 {
                sender,
                phase,
                state_value,
            } => {
                self.phase_entry(phase)
                    .register_round1_vote(sender, state_value);
                self.try_cast_round2(phase)
            }
            RabiaMessage::VoteRound2 {
                sender,
                phase,
                state_value,
            } => {
                self.phase_entry(phase)
                    .register_round2_vote(sender, state_value);
                self.try_complete(phase)
            }
            RabiaMessage::Decision {
                phase,
                state_value,
                batch,
                ..
            } => {
                let phase_data = self.phase_entry(phase);
                if !phase_data.try_mark_decided() {
                    return Vec::new();
                }
                self.finalize_decision(phase, Decision { state_value, batch })
            }
            RabiaMessage::NewBatch { batch, .. } => {
                self.pending.insert(batch);
                Vec::new()
            }
            RabiaMessage::SyncRequest { sender } => vec![Effect::RespondSync(sender)],
            RabiaMessage::SyncResponse { sender, state } => self.on_sync_response(sender, state),
        }
    }

    /// Submits a locally-originated batch: gossip it (spec §6: `NewBatch`),
    /// add it to the pending set, and kick off phase execution if this node
    /// is not currently participating in a phase of its own.
    fn on_submit(&mut self, batch: Batch) -> Vec<Effect> {
        let mut effects = vec![Effect::Broadcast(RabiaMessage::NewBatch {
            sender: self.self_id.clone(),
            batch: batch.clone(),
        })];
        self.pending.insert(batch);

        let phase = self.current_phase.load(Ordering::Acquire);
        if !self.in_phase(phase) {
            effects.extend(self.start_phase(phase));
        }
        effects
    }

    fn on_sync_retry_tick(&mut self) -> Vec<Effect> {
        if !matches!(*self.state.read(), EngineState::Syncing) {
            return Vec::new();
        }
        vec![Effect::Broadcast(RabiaMessage::SyncRequest {
            sender: self.self_id.clone(),
        })]
    }

    /// Records one peer's `SyncResponse` while `Syncing`. Once at least
    /// `quorum_size` distinct peers have replied, picks the response with
    /// the highest `last_committed_phase` (ties broken by the smallest
    /// sender id) and hands it off to be installed (spec §4.5).
    fn on_sync_response(&mut self, sender: NodeId, state: SavedState) -> Vec<Effect> {
        if !matches!(*self.state.read(), EngineState::Syncing) {
            return Vec::new();
        }
        self.sync_responses.insert(sender, state);

        let quorum = self.topology.quorum_size();
        if self.sync_responses.len() < quorum {
            return Vec::new();
        }

        let mut candidates: Vec<(NodeId, SavedState)> = self.sync_responses.drain().collect();
        candidates.sort_by(|a, b| {
            b.1.last_committed_phase
                .cmp(&a.1.last_committed_phase)
                .then_with(|| a.0.cmp(&b.0))
        });
        let (_, best) = candidates.into_iter().next().expect("quorum reached");
        vec![Effect::ApplySyncResponse(best)]
    }

    /// Installs a synced snapshot's phase position and pending batches, then
    /// moves to `Active` and starts the first phase after the synced point,
    /// if there is pending work to do. Called only after the state
    /// machine's snapshot restore has already succeeded.
    fn install_synced_state(&mut self, saved: SavedState) -> Vec<Effect> {
        if !matches!(*self.state.read(), EngineState::Syncing) {
            return Vec::new();
        }
        // A default/never-saved `SavedState` (every node bootstrapping a
        // brand new cluster answers `SyncRequest` this way, since nobody has
        // reached `Active` yet) must resume at phase 0, not phase 1 — the
        // `last_committed_phase: 0` it carries means "nothing decided yet",
        // not "phase 0 decided", and `wrapping_add(1)` would otherwise skip
        // phase 0 for every node uniformly.
        let fresh = saved.snapshot.is_empty()
            && saved.last_committed_phase == 0
            && saved.pending_batches.is_empty();
        let next_phase = if fresh {
            0
        } else {
            saved.last_committed_phase.wrapping_add(1)
        };
        self.last_committed_phase
            .store(saved.last_committed_phase, Ordering::Release);
        self.current_phase.store(next_phase, Ordering::Release);
        for batch in saved.pending_batches {
            self.pending.insert(batch);
        }
        self.persistence.clear();
        *self.state.write() = EngineState::Active;
        tracing::info!(
            node_id = %self.self_id,
            current_phase = next_phase,
            "synced from peers, now active"
        );
        if !self.pending.is_empty() {
            self.start_phase(next_phase)
        } else {
            Vec::new()
        }
    }

    /// Any -> Dormant (spec §4.5): persist current position, drop all phase
    /// bookkeeping, and fail every outstanding completion handle.
    fn go_dormant(&mut self, snapshot: Vec<u8>) {
        tracing::info!(
            node_id = %self.self_id,
            last_committed_phase = self.last_committed_phase.load(Ordering::Acquire),
            "quorum lost, going dormant"
        );
        self.persistence.save(SavedState {
            snapshot,
            last_committed_phase: self.last_committed_phase.load(Ordering::Acquire),
            pending_batches: self.pending.iter().cloned().collect(),
        });
        *self.state.write() = EngineState::Dormant;
        self.phases.clear();
        self.locals.clear();
        self.sync_responses.clear();
        for (_, tx) in self.completion_handles.drain() {
            let _ = tx.send(Err(RabiaError::NodeInactive));
        }
    }

    /// Discards `PhaseData`/`PhaseLocal` for phases older than
    /// `current_phase - remove_older_than_phases`, unless still undecided.
    fn cleanup(&mut self) {
        let current = self.current_phase.load(Ordering::Acquire);
        let floor = current.saturating_sub(self.config.remove_older_than_phases);
        self.phases
            .retain(|phase, data| *phase >= floor || !data.is_decided());
        self.locals.retain(|phase, _| *phase >= floor);
    }
}

fn catch_guarded<F: FnOnce() -> Vec<Effect>>(label: &'static str, f: F) -> Vec<Effect> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(effects) => effects,
        Err(_) => {
            tracing::error!(handler = label, "handler panicked, dropping event");
            Vec::new()
        }
    }
}

/// A leaderless, crash-fault-tolerant consensus engine implementing the
/// Rabia protocol (spec §1-§5).
///
/// Construct with [`RabiaEngine::new`] and call [`RabiaEngine::apply`] to
/// submit commands; stop with [`RabiaEngine::stop`]. Background tasks are
/// spawned by `new` itself.
pub struct RabiaEngine {
    self_id: NodeId,
    transport: Arc<dyn Transport>,
    state_machine: Arc<dyn StateMachine>,
    topology: Arc<TopologyManager>,
    config: EngineConfig,
    inbox_tx: mpsc::UnboundedSender<EngineCommand>,
    state: Arc<parking_lot::RwLock<EngineState>>,
    current_phase: Arc<AtomicU64>,
    last_committed_phase: Arc<AtomicU64>,
}

impl RabiaEngine {
    pub fn new(
        self_id: NodeId,
        topology: Arc<TopologyManager>,
        transport: Arc<dyn Transport>,
        state_machine: Arc<dyn StateMachine>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let state = Arc::new(parking_lot::RwLock::new(EngineState::Dormant));
        let current_phase = Arc::new(AtomicU64::new(0));
        let last_committed_phase = Arc::new(AtomicU64::new(0));

        Arc::new(Self {
            self_id,
            transport,
            state_machine,
            topology,
            config,
            inbox_tx,
            state,
            current_phase,
            last_committed_phase,
        })
        .with_inbox(inbox_rx)
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn current_phase(&self) -> Phase {
        self.current_phase.load(Ordering::Acquire)
    }

    pub fn last_committed_phase(&self) -> Phase {
        self.last_committed_phase.load(Ordering::Acquire)
    }

    /// Submit a single command. The returned handle resolves with the
    /// command's own result once decided and applied.
    pub fn apply(self: &Arc<Self>, command: Command) -> ApplyHandle {
        self.submit_batch(vec![command])
    }

    /// Submit multiple commands as a single atomically-committed batch.
    /// Fails synchronously with `EmptyBatch` if `commands` is empty, or
    /// `NodeInactive` if the engine is currently dormant (spec §4.5/§7).
    pub fn submit_batch(self: &Arc<Self>, commands: Vec<Command>) -> ApplyHandle {
        if commands.is_empty() {
            return ApplyHandle::ready(Err(RabiaError::EmptyBatch));
        }
        if matches!(self.state(), EngineState::Dormant) {
            return ApplyHandle::ready(Err(RabiaError::NodeInactive));
        }

        let batch = Batch::new(commands);
        let (tx, rx) = oneshot::channel();
        if self
            .inbox_tx
            .send(EngineCommand::Submit(batch, tx))
            .is_err()
        {
            return ApplyHandle::ready(Err(RabiaError::NodeInactive));
        }
        ApplyHandle { rx }
    }

    /// Same as `apply`/`submit_batch`, but allocates no completion handle
    /// (spec §4.5: "used for forwarded submissions") — for a batch this
    /// node is relaying on behalf of another submitter who is already
    /// tracking its own completion. Still fails synchronously with the same
    /// input errors `submit_batch` does.
    pub fn handle_submit(self: &Arc<Self>, commands: Vec<Command>) -> crate::Result<()> {
        if commands.is_empty() {
            return Err(RabiaError::EmptyBatch);
        }
        if matches!(self.state(), EngineState::Dormant) {
            return Err(RabiaError::NodeInactive);
        }
        let batch = Batch::new(commands);
        self.inbox_tx
            .send(EngineCommand::ForwardedSubmit(batch))
            .map_err(|_| RabiaError::NodeInactive)
    }

    /// Stop the engine: persists a snapshot of current position and moves to
    /// `Dormant`. Background tasks observe the closed inbox and exit.
    pub fn stop(&self) {
        let _ = self.inbox_tx.send(EngineCommand::Stop);
    }

    fn with_inbox(self: Arc<Self>, inbox_rx: mpsc::UnboundedReceiver<EngineCommand>) -> Arc<Self> {
        let exec = Executor {
            self_id: self.self_id.clone(),
            topology: Arc::clone(&self.topology),
            persistence: Arc::new(PersistenceShim::new()),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            current_phase: Arc::clone(&self.current_phase),
            last_committed_phase: Arc::clone(&self.last_committed_phase),
            phases: HashMap::new(),
            locals: HashMap::new(),
            pending: BTreeSet::new(),
            completion_handles: HashMap::new(),
            sync_responses: HashMap::new(),
        };

        let executor_engine = Arc::clone(&self);
        tokio::spawn(async move {
            executor_engine.run_executor(exec, inbox_rx).await;
        });

        let transport_engine = Arc::clone(&self);
        tokio::spawn(async move {
            transport_engine.run_transport_listener().await;
        });

        let cleanup_engine = Arc::clone(&self);
        tokio::spawn(async move {
            cleanup_engine.run_cleanup_ticker().await;
        });

        let sync_engine = Arc::clone(&self);
        tokio::spawn(async move {
            sync_engine.run_sync_ticker().await;
        });

        let topology_engine = Arc::clone(&self);
        tokio::spawn(async move {
            topology_engine.run_quorum_listener().await;
        });

        self
    }

    async fn run_executor(
        self: Arc<Self>,
        mut exec: Executor,
        mut inbox_rx: mpsc::UnboundedReceiver<EngineCommand>,
    ) {
        let initial_effects = if self.topology.member_count() <= 1 {
            *self.state.write() = EngineState::Active;
            Vec::new()
        } else if self.topology.has_quorum() {
            *self.state.write() = EngineState::Syncing;
            vec![Effect::Broadcast(RabiaMessage::SyncRequest {
                sender: exec.self_id.clone(),
            })]
        } else {
            // Quorum isn't even established yet (e.g. a minority-side node
            // bootstrapping already excluded from its own view): stay
            // Dormant until `QuorumEstablished` arrives, same as any other
            // Any -> Dormant -> Syncing path (spec §4.5).
            *self.state.write() = EngineState::Dormant;
            Vec::new()
        };
        self.run_effects(&mut exec, initial_effects).await;

        while let Some(command) = inbox_rx.recv().await {
            match command {
                EngineCommand::Stop => {
                    let snapshot = match self.state_machine.make_snapshot().await {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            tracing::error!(error = %err, "snapshot failed during stop");
                            Vec::new()
                        }
                    };
                    exec.go_dormant(snapshot);
                    break;
                }
                EngineCommand::Submit(batch, completion) => {
                    exec.completion_handles.insert(batch.correlation_id, completion);
                    let effects = catch_guarded("submit", || exec.on_submit(batch));
                    self.run_effects(&mut exec, effects).await;
                }
                EngineCommand::ForwardedSubmit(batch) => {
                    let effects = catch_guarded("forwarded_submit", || exec.on_submit(batch));
                    self.run_effects(&mut exec, effects).await;
                }
                EngineCommand::Inbound(message) => {
                    let effects = catch_guarded("inbound", || exec.handle_message(message));
                    self.run_effects(&mut exec, effects).await;
                }
                EngineCommand::QuorumEstablished => {
                    if matches!(*self.state.read(), EngineState::Dormant) {
                        tracing::info!(node_id = %exec.self_id, "quorum established, syncing");
                        *self.state.write() = EngineState::Syncing;
                        exec.sync_responses.clear();
                        let effects = vec![Effect::Broadcast(RabiaMessage::SyncRequest {
                            sender: exec.self_id.clone(),
                        })];
                        self.run_effects(&mut exec, effects).await;
                    }
                }
                EngineCommand::QuorumDisappeared => {
                    if !matches!(*self.state.read(), EngineState::Dormant) {
                        let effects = vec![Effect::GoDormant];
                        self.run_effects(&mut exec, effects).await;
                    }
                }
                EngineCommand::TickCleanup => exec.cleanup(),
                EngineCommand::TickSyncRetry => {
                    let effects = catch_guarded("sync_retry", || exec.on_sync_retry_tick());
                    self.run_effects(&mut exec, effects).await;
                }
            }
        }
    }

    async fn run_effects(&self, exec: &mut Executor, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Broadcast(message) => match encode(&message) {
                    Ok(bytes) => {
                        if let Err(err) = self.transport.broadcast(bytes).await {
                            tracing::warn!(error = %err, "broadcast failed");
                        }
                    }
                    Err(err) => tracing::error!(error = %err, "failed to encode outbound message"),
                },
                Effect::RespondSync(to) => {
                    // Active nodes answer with a fresh snapshot; dormant or
                    // still-syncing nodes answer with whatever they last
                    // persisted (possibly empty) rather than staying silent
                    // (spec §4.5) — without this, a cluster bootstrapping
                    // from scratch has no node able to answer anyone.
                    let saved = if matches!(*self.state.read(), EngineState::Active) {
                        match self.state_machine.make_snapshot().await {
                            Ok(snapshot) => Some(SavedState {
                                snapshot,
                                last_committed_phase: exec
                                    .last_committed_phase
                                    .load(Ordering::Acquire),
                                pending_batches: exec.pending.iter().cloned().collect(),
                            }),
                            Err(err) => {
                                tracing::error!(error = %err, "snapshot failed for sync response");
                                None
                            }
                        }
                    } else {
                        Some(exec.persistence.load().unwrap_or_default())
                    };
                    if let Some(saved) = saved {
                        let message = RabiaMessage::SyncResponse {
                            sender: exec.self_id.clone(),
                            state: saved,
                        };
                        match encode(&message) {
                            Ok(bytes) => {
                                if let Err(err) = self.transport.send(&to, bytes).await {
                                    tracing::warn!(error = %err, "sync response send failed");
                                }
                            }
                            Err(err) => {
                                tracing::error!(error = %err, "failed to encode sync response")
                            }
                        }
                    }
                }
                Effect::Commit {
                    correlation_id,
                    commands,
                } => {
                    let mut results = Vec::with_capacity(commands.len());
                    let mut failed = false;
                    for command in &commands {
                        match self.state_machine.process(command).await {
                            Ok(result) => results.push(result),
                            Err(err) => {
                                // A deterministic state machine must not fail
                                // on a command every replica agreed to
                                // commit; log and drop the action rather
                                // than risk replicas diverging (spec §7).
                                tracing::error!(
                                    error = %err,
                                    correlation_id = %correlation_id,
                                    "state machine rejected a committed command"
                                );
                                failed = true;
                                break;
                            }
                        }
                    }
                    if let Some(tx) = exec.completion_handles.remove(&correlation_id) {
                        let outcome = if failed {
                            Err(RabiaError::StateMachine(
                                "state machine failed to apply a committed command".into(),
                            ))
                        } else {
                            Ok(results)
                        };
                        let _ = tx.send(outcome);
                    }
                }
                Effect::ApplySyncResponse(saved) => {
                    if saved.snapshot.is_empty() {
                        let more =
                            catch_guarded("install_synced_state", || {
                                exec.install_synced_state(saved)
                            });
                        queue.extend(more);
                        continue;
                    }
                    match self.state_machine.restore_snapshot(&saved.snapshot).await {
                        Ok(()) => {
                            let more = catch_guarded("install_synced_state", || {
                                exec.install_synced_state(saved)
                            });
                            queue.extend(more);
                        }
                        Err(err) => {
                            // Spec §4.5: if snapshot restoration fails,
                            // remain Syncing and retry (the sync-retry
                            // ticker will re-broadcast `SyncRequest`).
                            tracing::error!(error = %err, "snapshot restore failed, remaining in Syncing");
                        }
                    }
                }
                Effect::GoDormant => {
                    let snapshot = match self.state_machine.make_snapshot().await {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            tracing::error!(error = %err, "snapshot failed while going dormant");
                            Vec::new()
                        }
                    };
                    exec.go_dormant(snapshot);
                }
            }
        }
    }

    async fn run_transport_listener(self: Arc<Self>) {
        let mut rx = self.transport.subscribe().await;
        while let Some(event) = rx.recv().await {
            match decode(&event.bytes) {
                Ok(message) => {
                    if self.inbox_tx.send(EngineCommand::Inbound(message)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, from = %event.from, "failed to decode inbound message")
                }
            }
        }
    }

    async fn run_cleanup_ticker(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if self.inbox_tx.send(EngineCommand::TickCleanup).is_err() {
                break;
            }
        }
    }

    async fn run_sync_ticker(self: Arc<Self>) {
        loop {
            let jitter_ms = self.config.sync_retry_jitter.as_millis() as u64;
            let jitter = if jitter_ms == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
            };
            tokio::time::sleep(self.config.sync_retry_interval + jitter).await;
            if self.inbox_tx.send(EngineCommand::TickSyncRetry).is_err() {
                break;
            }
        }
    }

    /// Forwards edge-triggered quorum notifications from the topology
    /// manager into the executor's inbox so membership changes observed
    /// after startup (not just at construction time) drive the Dormant ⇄
    /// Syncing transition described in spec §4.5.
    async fn run_quorum_listener(self: Arc<Self>) {
        let mut rx = self.topology.subscribe_quorum_state();
        while let Some(notification) = rx.recv().await {
            let command = match notification {
                QuorumStateNotification::Established => EngineCommand::QuorumEstablished,
                QuorumStateNotification::Disappeared => EngineCommand::QuorumDisappeared,
            };
            if self.inbox_tx.send(command).is_err() {
                break;
            }
        }
    }
}
