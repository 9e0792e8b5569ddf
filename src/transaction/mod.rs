//! Cross-store transaction coordination.
//!
//! This module synthesizes atomicity over backends that share no native
//! transaction protocol: the [`TransactionCoordinator`] drives two-phase
//! participants through prepare / commit and replays compensations on the
//! rest, the [`OperationLog`] records every issued write in order, and the
//! [`ReconciliationQueue`] holds transactions whose commit outcome could not
//! be determined locally.

pub mod coordinator;
pub mod errors;
pub mod operation;
pub mod phase;
pub mod recovery;

pub use coordinator::TransactionCoordinator;
pub use errors::{TransactionError, TransactionResult};
pub use operation::{Operation, OperationLog, OperationVerb};
pub use phase::TransactionPhase;
pub use recovery::{ReconciliationQueue, ReconciliationRecord, ReconciliationStatus};
