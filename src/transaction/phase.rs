//! Transaction phase definitions and the legal phase machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of one transaction.
///
/// `Indeterminate` is the escape edge out of `Committing`: a participant
/// voted yes but its commit acknowledgment was never confirmed, so the
/// global outcome cannot be known locally. It is surfaced for
/// reconciliation, never silently mapped to committed or aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionPhase {
    /// Accepting operations.
    Open,
    /// Prepare votes in flight.
    Preparing,
    /// Every participant voted yes.
    Prepared,
    /// Commit messages in flight.
    Committing,
    /// Every participant acknowledged commit.
    Committed,
    /// Rollback / compensation replay in flight.
    Aborting,
    /// All effects undone.
    Aborted,
    /// Commit acknowledgment lost after a yes vote; outcome unknown.
    Indeterminate,
}

impl TransactionPhase {
    /// Check if this is a terminal phase (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted | Self::Indeterminate)
    }

    /// Check if the transaction still accepts `execute` calls.
    pub fn accepts_operations(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether moving to `next` follows a defined edge of the phase machine.
    ///
    /// `Open -> Preparing -> {Prepared -> Committing -> Committed} | Aborting -> Aborted`,
    /// plus the `Committing -> Indeterminate` escape edge. `Open -> Aborting`
    /// covers an explicit abort before prepare was ever requested.
    pub fn can_transition_to(&self, next: TransactionPhase) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Preparing)
                | (Self::Open, Self::Aborting)
                | (Self::Preparing, Self::Prepared)
                | (Self::Preparing, Self::Aborting)
                | (Self::Prepared, Self::Committing)
                | (Self::Prepared, Self::Aborting)
                | (Self::Committing, Self::Committed)
                | (Self::Committing, Self::Indeterminate)
                | (Self::Aborting, Self::Aborted)
        )
    }
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Preparing => write!(f, "preparing"),
            Self::Prepared => write!(f, "prepared"),
            Self::Committing => write!(f, "committing"),
            Self::Committed => write!(f, "committed"),
            Self::Aborting => write!(f, "aborting"),
            Self::Aborted => write!(f, "aborted"),
            Self::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

impl std::str::FromStr for TransactionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "preparing" => Ok(Self::Preparing),
            "prepared" => Ok(Self::Prepared),
            "committing" => Ok(Self::Committing),
            "committed" => Ok(Self::Committed),
            "aborting" => Ok(Self::Aborting),
            "aborted" => Ok(Self::Aborted),
            "indeterminate" => Ok(Self::Indeterminate),
            _ => Err(format!("Invalid transaction phase: {s}")),
        }
    }
}

impl Default for TransactionPhase {
    fn default() -> Self {
        Self::Open
    }
}
