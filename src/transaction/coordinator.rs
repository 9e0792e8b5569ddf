//! # Transaction Coordinator
//!
//! Orchestrates prepare / commit / abort across the adapters registered for
//! one logical unit of work. The three backend kinds share no native
//! transaction protocol, so atomicity is synthesized here:
//!
//! - Native two-phase participants buffer writes until the coordinator
//!   drives the prepare vote and the commit message.
//! - Compensating participants execute eagerly; the coordinator records a
//!   compensating operation per write and replays them in reverse issue
//!   order if the transaction aborts.
//!
//! ## Phase machine
//!
//! `Open -> Preparing -> {Prepared -> Committing -> Committed} | Aborting -> Aborted`,
//! with the escape edge `Committing -> Indeterminate` when a participant
//! fails to acknowledge commit after voting yes. An indeterminate
//! transaction is parked on the [`ReconciliationQueue`] with its full
//! operation log; it is never silently treated as committed or aborted.
//!
//! ## Concurrency
//!
//! A coordinator is request-scoped and owned by one unit of work. Prepare
//! is the decision fan-out point: votes are dispatched concurrently, each
//! bounded by a per-participant timeout, and the coordinator waits for every
//! outcome before deciding. Commit acknowledgments fan out the same way:
//! the decision is already made at that point, so ordering cannot change
//! the outcome, and any unacknowledged participant lands the transaction in
//! `Indeterminate` regardless. The phase field is guarded by an async RwLock:
//! `execute` holds a read guard across the backend call so a late write can
//! never land in the middle of an in-flight `prepare`, which takes the
//! write guard to flip the phase.

use crate::adapter::{Adapter, AdapterId, BackendKind, ExecutionOutcome};
use crate::config::TransactionConfig;
use crate::events::EventPublisher;
use crate::transaction::errors::{TransactionError, TransactionResult};
use crate::transaction::operation::{Operation, OperationLog};
use crate::transaction::phase::TransactionPhase;
use crate::transaction::recovery::{ReconciliationQueue, ReconciliationRecord};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Coordinates one transaction across heterogeneous backend adapters.
pub struct TransactionCoordinator {
    id: Uuid,
    config: TransactionConfig,
    /// Registration order is preserved; duplicate ids are rejected.
    participants: Mutex<Vec<Arc<dyn Adapter>>>,
    /// Read-held across `execute`, write-held across phase flips.
    phase: RwLock<TransactionPhase>,
    log: Mutex<OperationLog>,
    events: EventPublisher,
    reconciliation: Arc<ReconciliationQueue>,
}

impl TransactionCoordinator {
    pub fn new(
        config: TransactionConfig,
        events: EventPublisher,
        reconciliation: Arc<ReconciliationQueue>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            participants: Mutex::new(Vec::new()),
            phase: RwLock::new(TransactionPhase::Open),
            log: Mutex::new(OperationLog::new()),
            events,
            reconciliation,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn phase(&self) -> TransactionPhase {
        *self.phase.read().await
    }

    /// Snapshot of the operation log issued so far.
    pub fn operation_log(&self) -> OperationLog {
        self.log.lock().clone()
    }

    /// Add a participant. Fails with `DuplicateParticipant` if an adapter
    /// with the same id is already registered for this transaction.
    pub async fn register(&self, adapter: Arc<dyn Adapter>) -> TransactionResult<()> {
        let phase = *self.phase.read().await;
        if !phase.accepts_operations() {
            return Err(TransactionError::invalid_state(
                self.id,
                "register",
                TransactionPhase::Open,
                phase,
            ));
        }

        let mut participants = self.participants.lock();
        if participants.iter().any(|p| p.id() == adapter.id()) {
            return Err(TransactionError::duplicate_participant(
                self.id,
                adapter.id().to_string(),
            ));
        }
        debug!(
            tx_id = %self.id,
            adapter = %adapter.id(),
            kind = %adapter.kind(),
            two_phase = adapter.supports_two_phase(),
            "Participant registered"
        );
        participants.push(adapter);
        Ok(())
    }

    /// First registered participant of the given backend kind.
    pub fn participant_of_kind(&self, kind: BackendKind) -> TransactionResult<AdapterId> {
        self.participants
            .lock()
            .iter()
            .find(|p| p.kind() == kind)
            .map(|p| p.id().clone())
            .ok_or(TransactionError::BackendUnavailable {
                tx_id: self.id,
                kind: kind.to_string(),
            })
    }

    fn participant(&self, adapter_id: &AdapterId) -> TransactionResult<Arc<dyn Adapter>> {
        self.participants
            .lock()
            .iter()
            .find(|p| p.id() == adapter_id)
            .cloned()
            .ok_or_else(|| TransactionError::unknown_participant(self.id, adapter_id.to_string()))
    }

    /// Route an operation to its adapter immediately (eager execution).
    ///
    /// For native two-phase adapters the write is provisional until commit.
    /// For compensating adapters it is already externally visible; the
    /// compensating operation is captured *before* execution and stored in
    /// the log for replay on abort.
    pub async fn execute(&self, op: Operation) -> TransactionResult<ExecutionOutcome> {
        // The read guard keeps prepare() from flipping the phase while this
        // operation is in flight against the backend.
        let phase_guard = self.phase.read().await;
        if !phase_guard.accepts_operations() {
            return Err(TransactionError::invalid_state(
                self.id,
                "execute",
                TransactionPhase::Open,
                *phase_guard,
            ));
        }

        let adapter = self.participant(&op.adapter_id)?;

        let op = if adapter.supports_two_phase() {
            op
        } else {
            let compensation = adapter.compensation_for(&op).await?;
            op.with_compensation(compensation)
        };

        let outcome = adapter.execute(&op).await?;
        debug!(
            tx_id = %self.id,
            adapter = %op.adapter_id,
            verb = %op.verb,
            target = %op.target,
            affected = outcome.affected,
            "Operation executed"
        );
        self.log.lock().append(op);
        Ok(outcome)
    }

    /// Run the prepare vote across every two-phase participant.
    ///
    /// Votes are dispatched concurrently, each bounded by the configured
    /// per-participant timeout; the coordinator waits for all outcomes
    /// before deciding. A timed-out participant counts as a no vote. Any
    /// no vote aborts every participant and returns `PrepareFailed` naming
    /// the first failed one.
    pub async fn prepare(&self) -> TransactionResult<()> {
        self.transition(TransactionPhase::Preparing, "prepare").await?;

        let voters: Vec<Arc<dyn Adapter>> = self
            .participants
            .lock()
            .iter()
            .filter(|p| p.supports_two_phase())
            .cloned()
            .collect();

        let timeout = self.config.prepare_timeout();
        let votes = join_all(voters.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            let tx_id = self.id;
            async move {
                let vote = vote_with_timeout(&adapter, tx_id, timeout).await;
                (adapter.id().clone(), vote)
            }
        }))
        .await;

        let failed = votes.iter().find(|(_, vote)| !matches!(vote, Vote::Yes));
        if let Some((participant, vote)) = failed {
            warn!(
                tx_id = %self.id,
                participant = %participant,
                vote = ?vote,
                "Prepare vote failed; aborting all participants"
            );
            let participant = participant.clone();
            self.transition(TransactionPhase::Aborting, "prepare").await?;
            self.run_abort().await?;
            return Err(TransactionError::prepare_failed(
                self.id,
                participant.to_string(),
            ));
        }

        self.transition(TransactionPhase::Prepared, "prepare").await?;
        info!(tx_id = %self.id, participants = votes.len(), "All participants voted yes");
        Ok(())
    }

    /// Send commit to every two-phase participant. Only callable after a
    /// successful `prepare`; anything else is a programming error.
    ///
    /// A participant that fails to acknowledge after voting yes moves the
    /// transaction to `Indeterminate`: some participants may already have
    /// committed, so the outcome cannot be decided locally. The full
    /// operation log and the acknowledgment map are queued for
    /// reconciliation.
    pub async fn commit(&self) -> TransactionResult<()> {
        {
            let mut phase = self.phase.write().await;
            if *phase != TransactionPhase::Prepared {
                return Err(TransactionError::invalid_state(
                    self.id,
                    "commit",
                    TransactionPhase::Prepared,
                    *phase,
                ));
            }
            *phase = TransactionPhase::Committing;
        }

        let committers: Vec<Arc<dyn Adapter>> = self
            .participants
            .lock()
            .iter()
            .filter(|p| p.supports_two_phase())
            .cloned()
            .collect();

        let timeout = self.config.commit_timeout();
        let acks = join_all(committers.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            let tx_id = self.id;
            async move {
                let acked =
                    match tokio::time::timeout(timeout, adapter.commit(tx_id)).await {
                        Ok(Ok(())) => true,
                        Ok(Err(e)) => {
                            error!(tx_id = %tx_id, participant = %adapter.id(), error = %e, "Commit not acknowledged");
                            false
                        }
                        Err(_) => {
                            error!(tx_id = %tx_id, participant = %adapter.id(), "Commit acknowledgment timed out");
                            false
                        }
                    };
                (adapter.id().clone(), acked)
            }
        }))
        .await;

        let unacked = acks.iter().find(|(_, acked)| !acked);
        if let Some((participant, _)) = unacked {
            // Cannot roll back: some participants may have committed.
            let participant = participant.clone();
            self.transition(TransactionPhase::Indeterminate, "commit").await?;

            let ack_map: HashMap<AdapterId, bool> = acks.into_iter().collect();
            self.reconciliation.enqueue(ReconciliationRecord::new(
                self.id,
                self.operation_log(),
                ack_map,
            ));
            return Err(TransactionError::commit_indeterminate(
                self.id,
                participant.to_string(),
            ));
        }

        self.transition(TransactionPhase::Committed, "commit").await?;
        info!(tx_id = %self.id, operations = self.log.lock().len(), "Transaction committed");
        Ok(())
    }

    /// Abort the transaction: rollback on two-phase participants,
    /// compensation replay (reverse issue order) on the rest.
    ///
    /// Callable from `Open` and `Prepared`; after a failed prepare the
    /// coordinator has already aborted itself, so calling `abort` on an
    /// `Aborted` transaction is an accepted no-op.
    pub async fn abort(&self) -> TransactionResult<()> {
        {
            let mut phase = self.phase.write().await;
            match *phase {
                TransactionPhase::Open | TransactionPhase::Prepared => {
                    *phase = TransactionPhase::Aborting;
                }
                TransactionPhase::Aborted => return Ok(()),
                other => {
                    return Err(TransactionError::invalid_state(
                        self.id,
                        "abort",
                        TransactionPhase::Open,
                        other,
                    ));
                }
            }
        }
        self.run_abort().await
    }

    /// Roll back every two-phase participant and replay compensations on
    /// the rest. A failed compensation replay leaves cleanup unfinished and
    /// surfaces as `AbortIncomplete` with the full operation log in the
    /// error log; it is never swallowed.
    async fn run_abort(&self) -> TransactionResult<()> {
        let participants: Vec<Arc<dyn Adapter>> = self.participants.lock().clone();
        let log = self.operation_log();
        let mut failure: Option<TransactionError> = None;

        for adapter in &participants {
            if adapter.supports_two_phase() {
                if let Err(e) = adapter.rollback(self.id).await {
                    error!(
                        tx_id = %self.id,
                        participant = %adapter.id(),
                        error = %e,
                        "Rollback failed during abort"
                    );
                    failure.get_or_insert(TransactionError::abort_incomplete(
                        self.id,
                        adapter.id().to_string(),
                        e.to_string(),
                    ));
                }
            } else {
                for compensation in log.compensations_for(adapter.id()) {
                    if let Err(e) = adapter.execute(&compensation).await {
                        error!(
                            tx_id = %self.id,
                            participant = %adapter.id(),
                            target = %compensation.target,
                            error = %e,
                            operation_log = %serde_json::to_string(&log).unwrap_or_default(),
                            "Compensation replay failed; manual cleanup required"
                        );
                        failure.get_or_insert(TransactionError::abort_incomplete(
                            self.id,
                            adapter.id().to_string(),
                            e.to_string(),
                        ));
                        break;
                    }
                }
            }
        }

        self.transition(TransactionPhase::Aborted, "abort").await?;

        match failure {
            Some(err) => Err(err),
            None => {
                info!(tx_id = %self.id, "Transaction aborted");
                Ok(())
            }
        }
    }

    /// Flip the phase along a defined edge; undefined edges are programming
    /// errors.
    async fn transition(
        &self,
        next: TransactionPhase,
        operation: &str,
    ) -> TransactionResult<()> {
        let mut phase = self.phase.write().await;
        if !phase.can_transition_to(next) {
            return Err(TransactionError::invalid_state(
                self.id,
                operation,
                next,
                *phase,
            ));
        }
        debug!(tx_id = %self.id, from = %*phase, to = %next, "Phase transition");
        *phase = next;
        self.events.publish_transaction_phase(self.id, next);
        Ok(())
    }
}

/// Outcome of one participant's prepare call.
#[derive(Debug)]
enum Vote {
    Yes,
    No(String),
    TimedOut,
}

async fn vote_with_timeout(adapter: &Arc<dyn Adapter>, tx_id: Uuid, timeout: Duration) -> Vote {
    match tokio::time::timeout(timeout, adapter.prepare(tx_id)).await {
        Ok(Ok(())) => Vote::Yes,
        Ok(Err(e)) => Vote::No(e.to_string()),
        Err(_) => Vote::TimedOut,
    }
}
