//! Immutable state / action / transition engine.
//!
//! Every business action runs through this engine to reach the transaction
//! coordinator: a [`WorkflowDriver`] loads the current [`State`], hands the
//! action a fresh [`ExecutionContext`] wrapping one unit of work, and only
//! when every participating write committed does the state's version advance
//! and the [`TransitionTable`] select the next action.

pub mod action;
pub mod driver;
pub mod errors;
pub mod state;
pub mod transitions;

pub use action::{Action, ActionResult, CallerIdentity, ExecutionContext, SettingsView};
pub use driver::{ActionRegistry, StepOutcome, WorkflowDriver, WorkflowRunSummary};
pub use errors::{EngineError, EngineResult};
pub use state::{Partition, State};
pub use transitions::{
    Transition, TransitionPredicate, TransitionTable, TransitionTableBuilder, TransitionTarget,
};
