//! Immutable, versioned state snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Named lifecycle bucket a state lives in.
///
/// Partitions are independent: a draft advancing never touches the
/// published partition until an explicit promotion copies state across.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Partition {
    Draft,
    Published,
    Preview,
    /// Per-user scratch partition (`user:<id>`).
    User(String),
    /// Domain-defined partition outside the well-known set.
    Custom(String),
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Published => write!(f, "published"),
            Self::Preview => write!(f, "preview"),
            Self::User(id) => write!(f, "user:{id}"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for Partition {
    fn from(s: &str) -> Self {
        match s {
            "draft" => Self::Draft,
            "published" => Self::Published,
            "preview" => Self::Preview,
            _ => match s.strip_prefix("user:") {
                Some(id) => Self::User(id.to_string()),
                None => Self::Custom(s.to_string()),
            },
        }
    }
}

impl From<String> for Partition {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Partition> for String {
    fn from(p: Partition) -> Self {
        p.to_string()
    }
}

impl std::str::FromStr for Partition {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// An immutable, versioned snapshot of application data.
///
/// A state is never mutated in place: every business mutation produces a new
/// value with `sequence_id + 1`, and `sequence_id` strictly increases per
/// `(subject_id, partition)`. History is retained for rollback and audit;
/// snapshots are superseded, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub subject_id: String,
    pub partition: Partition,
    pub sequence_id: i64,
    pub payload: Value,
    pub saved_at: DateTime<Utc>,
}

impl State {
    /// First snapshot for a subject/partition, at sequence 1.
    pub fn initial(subject_id: impl Into<String>, partition: Partition, payload: Value) -> Self {
        Self {
            subject_id: subject_id.into(),
            partition,
            sequence_id: 1,
            payload,
            saved_at: Utc::now(),
        }
    }

    /// Produce the successor snapshot with the given payload.
    pub fn advance(&self, payload: Value) -> Self {
        Self {
            subject_id: self.subject_id.clone(),
            partition: self.partition.clone(),
            sequence_id: self.sequence_id + 1,
            payload,
            saved_at: Utc::now(),
        }
    }

    /// Replace the payload without advancing the version; used by actions to
    /// propose new content. The driver advances the version on commit.
    pub fn with_payload(&self, payload: Value) -> Self {
        Self {
            payload,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partition_round_trip() {
        for raw in ["draft", "published", "preview", "user:42", "editorial"] {
            let partition = Partition::from(raw);
            assert_eq!(partition.to_string(), raw);
        }
        assert_eq!(Partition::from("user:42"), Partition::User("42".to_string()));
        assert_eq!(
            Partition::from("editorial"),
            Partition::Custom("editorial".to_string())
        );
    }

    #[test]
    fn test_advance_increments_sequence() {
        let s1 = State::initial("site-1", Partition::Draft, json!({ "v": 1 }));
        assert_eq!(s1.sequence_id, 1);

        let s2 = s1.advance(json!({ "v": 2 }));
        assert_eq!(s2.sequence_id, 2);
        assert_eq!(s2.subject_id, "site-1");
        // The original is untouched.
        assert_eq!(s1.sequence_id, 1);
        assert_eq!(s1.payload["v"], 1);
    }

    #[test]
    fn test_with_payload_keeps_sequence() {
        let s1 = State::initial("site-1", Partition::Draft, json!({ "v": 1 }));
        let proposed = s1.with_payload(json!({ "v": 2 }));
        assert_eq!(proposed.sequence_id, s1.sequence_id);
        assert_eq!(proposed.payload["v"], 2);
    }

    #[test]
    fn test_state_serde_round_trip() {
        let state = State::initial("site-1", Partition::User("7".into()), json!({ "a": true }));
        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: State = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, state);
        assert!(encoded.contains("user:7"));
    }
}
