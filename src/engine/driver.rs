//! # Workflow Driver
//!
//! Runs one workflow step end to end: load current state, open a unit of
//! work, invoke the action, and — only if every participating write actually
//! committed — advance the state's version and persist it, then select the
//! next action from the transition table.
//!
//! ## Per-step algorithm
//!
//! 1. Load the current state for `(subject_id, partition)`.
//! 2. Check out the participating adapters, open a unit of work, build a
//!    fresh execution context.
//! 3. Invoke the action.
//! 4. Business failure (`result.success == false`): abort the unit of work,
//!    discard the proposed state, select the failure edge. The sequence does
//!    not advance.
//! 5. Success: commit the unit of work. Only on `Committed` is the proposed
//!    payload advanced to `sequence_id + 1` and saved.
//! 6. A save conflict means another writer advanced the state first: reload
//!    and recompute (bounded retries), never overwrite blindly. The first
//!    attempt's transaction has already committed by the time the conflict
//!    is detected, so a retry re-runs the action in a fresh transaction on
//!    top of those effects: conflict retries are not effect-idempotent, and
//!    actions must tolerate re-execution (keyed upserts rather than blind
//!    appends where duplicates matter).
//!
//! A transaction that lands `Indeterminate` is treated as failed for
//! state-advancement purposes even though some backends may have partially
//! committed; the error carries the reconciliation obligation and is
//! propagated, never mapped to a success edge.
//!
//! Everything here is request-scoped: coordinators, units of work, and
//! contexts are created fresh per step and never shared across requests.

use crate::adapter::{AdapterId, AdapterPool};
use crate::config::CoreConfig;
use crate::engine::action::{Action, ActionResult, CallerIdentity, ExecutionContext, SettingsView};
use crate::engine::errors::{EngineError, EngineResult};
use crate::engine::state::{Partition, State};
use crate::engine::transitions::{TransitionTable, TransitionTarget};
use crate::events::{lifecycle, EventPublisher};
use crate::persister::StatePersister;
use crate::transaction::{ReconciliationQueue, TransactionCoordinator, TransactionError};
use crate::uow::UnitOfWork;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Name-keyed registry of the actions a workflow can run.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> EngineResult<Arc<dyn Action>> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::unknown_action(name))
    }

    /// Registered names, for transition table validation.
    pub fn names(&self) -> HashSet<String> {
        self.actions.keys().cloned().collect()
    }
}

/// Result of one driver step.
#[derive(Debug)]
pub struct StepOutcome {
    /// Current state after the step: advanced on commit, unchanged otherwise.
    pub state: State,
    pub result: ActionResult,
    pub next: TransitionTarget,
    /// Whether the underlying transaction committed and the state advanced.
    pub committed: bool,
}

/// Summary of a full workflow run.
#[derive(Debug)]
pub struct WorkflowRunSummary {
    pub steps_executed: usize,
    pub final_state: State,
    pub final_result: ActionResult,
}

/// Drives workflows over the transaction coordinator and persister.
pub struct WorkflowDriver {
    registry: ActionRegistry,
    table: TransitionTable,
    persister: Arc<dyn StatePersister>,
    pool: Arc<AdapterPool>,
    /// Adapters checked out for every step's transaction.
    participants: Vec<AdapterId>,
    config: CoreConfig,
    events: EventPublisher,
    reconciliation: Arc<ReconciliationQueue>,
    settings: SettingsView,
}

impl WorkflowDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: ActionRegistry,
        table: TransitionTable,
        persister: Arc<dyn StatePersister>,
        pool: Arc<AdapterPool>,
        participants: Vec<AdapterId>,
        config: CoreConfig,
        events: EventPublisher,
        reconciliation: Arc<ReconciliationQueue>,
        settings: SettingsView,
    ) -> Self {
        Self {
            registry,
            table,
            persister,
            pool,
            participants,
            config,
            events,
            reconciliation,
            settings,
        }
    }

    /// Create and persist the first snapshot for a subject/partition.
    pub async fn initialize_state(
        &self,
        subject_id: &str,
        partition: Partition,
        payload: Value,
    ) -> EngineResult<State> {
        let state = State::initial(subject_id, partition, payload);
        self.persister.save(&state).await?;
        self.events
            .publish_state_saved(&state.subject_id, &state.partition.to_string(), state.sequence_id);
        Ok(state)
    }

    /// Run a single workflow step.
    #[instrument(skip(self, caller), fields(subject_id, action = action_name))]
    pub async fn run_step(
        &self,
        subject_id: &str,
        partition: &Partition,
        action_name: &str,
        caller: &CallerIdentity,
    ) -> EngineResult<StepOutcome> {
        let action = self.registry.get(action_name)?;
        let max_retries = self.config.driver.max_conflict_retries;
        let mut attempts: u32 = 0;

        loop {
            let state = self.persister.load(subject_id, partition).await?;

            // Fresh transaction scope per attempt: adapters checked out from
            // the pool, one coordinator, one unit of work.
            let mut checkouts = Vec::with_capacity(self.participants.len());
            for id in &self.participants {
                let checked_out = self
                    .pool
                    .checkout(id)
                    .map_err(|e| EngineError::Transaction(TransactionError::Adapter(e)))?;
                checkouts.push(checked_out);
            }

            let coordinator = Arc::new(TransactionCoordinator::new(
                self.config.transaction.clone(),
                self.events.clone(),
                Arc::clone(&self.reconciliation),
            ));
            for checked_out in &checkouts {
                coordinator.register(checked_out.adapter()).await?;
            }

            let ctx = ExecutionContext::new(
                UnitOfWork::new(Arc::clone(&coordinator)),
                self.settings.clone(),
                caller.clone(),
            );

            let run = action.run(&state, &ctx).await;
            let ExecutionContext { uow, .. } = ctx;

            let (proposed, result) = match run {
                Ok(outcome) => outcome,
                Err(e) => {
                    uow.abort().await?;
                    return Err(e);
                }
            };

            self.events.publish(
                lifecycle::ACTION_COMPLETED,
                json!({
                    "action": action_name,
                    "subject_id": subject_id,
                    "success": result.success,
                }),
            );

            if !result.success {
                // Business failure: discard the proposal, keep the sequence.
                uow.abort().await?;
                debug!(action = action_name, message = %result.message, "Business failure; state unchanged");
                let next = self.table.next(action_name, &result)?.clone();
                return Ok(StepOutcome {
                    state,
                    result,
                    next,
                    committed: false,
                });
            }

            match uow.commit().await {
                Ok(()) => {
                    let advanced = state.advance(proposed.payload);
                    match self.persister.save(&advanced).await {
                        Ok(()) => {
                            self.events.publish_state_saved(
                                subject_id,
                                &advanced.partition.to_string(),
                                advanced.sequence_id,
                            );
                            info!(
                                action = action_name,
                                subject_id,
                                sequence_id = advanced.sequence_id,
                                "Step committed and state advanced"
                            );
                            let next = self.table.next(action_name, &result)?.clone();
                            return Ok(StepOutcome {
                                state: advanced,
                                result,
                                next,
                                committed: true,
                            });
                        }
                        Err(e) if e.is_conflict() => {
                            attempts += 1;
                            if attempts > max_retries {
                                return Err(EngineError::ConflictRetriesExhausted {
                                    attempts,
                                    source: e,
                                });
                            }
                            warn!(
                                subject_id,
                                attempt = attempts,
                                "Save conflict; reloading and recomputing"
                            );
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e @ TransactionError::PrepareFailed { .. }) => {
                    // A participant voted no; the coordinator already
                    // aborted everything. Locally recoverable.
                    warn!(action = action_name, error = %e, "Prepare failed; taking failure edge");
                    let result = ActionResult::failure(e.to_string());
                    let next = self.table.next(action_name, &result)?.clone();
                    return Ok(StepOutcome {
                        state,
                        result,
                        next,
                        committed: false,
                    });
                }
                // Indeterminate, incomplete abort, invalid state: hard
                // errors. The state never advances.
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run a workflow from its initial action until an end edge, bounded by
    /// the configured step limit.
    pub async fn run_workflow(
        &self,
        subject_id: &str,
        partition: &Partition,
        caller: &CallerIdentity,
    ) -> EngineResult<WorkflowRunSummary> {
        let mut current = self.table.initial_action().to_string();
        let max_steps = self.config.driver.max_steps_per_run;

        for step in 1..=max_steps {
            let outcome = self
                .run_step(subject_id, partition, &current, caller)
                .await?;
            match outcome.next {
                TransitionTarget::End => {
                    return Ok(WorkflowRunSummary {
                        steps_executed: step,
                        final_state: outcome.state,
                        final_result: outcome.result,
                    });
                }
                TransitionTarget::Action(next) => current = next,
            }
        }

        Err(EngineError::StepLimitExceeded { max_steps })
    }
}
