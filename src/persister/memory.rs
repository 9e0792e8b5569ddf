//! In-memory persister for embedded use and tests.

use crate::engine::state::{Partition, State};
use crate::persister::{PersistError, PersistResult, StatePersister};
use async_trait::async_trait;
use dashmap::DashMap;

/// Keeps full snapshot history per `(subject_id, partition)` in memory.
#[derive(Debug, Default)]
pub struct InMemoryStatePersister {
    // The dashmap entry guard makes the check-then-push in `save` atomic
    // per key, which is what conflict detection needs.
    records: DashMap<(String, String), Vec<State>>,
}

impl InMemoryStatePersister {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(subject_id: &str, partition: &Partition) -> (String, String) {
        (subject_id.to_string(), partition.to_string())
    }

    /// Number of retained snapshots for the subject/partition.
    pub fn history_len(&self, subject_id: &str, partition: &Partition) -> usize {
        self.records
            .get(&Self::key(subject_id, partition))
            .map_or(0, |history| history.len())
    }
}

#[async_trait]
impl StatePersister for InMemoryStatePersister {
    async fn save(&self, state: &State) -> PersistResult<()> {
        let mut history = self
            .records
            .entry(Self::key(&state.subject_id, &state.partition))
            .or_default();

        let latest = history.last().map_or(0, |s| s.sequence_id);
        if latest != state.sequence_id - 1 {
            return Err(PersistError::conflict(state, latest));
        }
        history.push(state.clone());
        Ok(())
    }

    async fn load(&self, subject_id: &str, partition: &Partition) -> PersistResult<State> {
        self.records
            .get(&Self::key(subject_id, partition))
            .and_then(|history| history.last().cloned())
            .ok_or_else(|| PersistError::not_found(subject_id, partition))
    }

    async fn load_version(
        &self,
        subject_id: &str,
        partition: &Partition,
        sequence_id: i64,
    ) -> PersistResult<State> {
        self.records
            .get(&Self::key(subject_id, partition))
            .and_then(|history| {
                history
                    .iter()
                    .find(|s| s.sequence_id == sequence_id)
                    .cloned()
            })
            .ok_or(PersistError::VersionNotFound {
                subject_id: subject_id.to_string(),
                partition: partition.to_string(),
                sequence_id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn initial(subject: &str, partition: Partition) -> State {
        State::initial(subject, partition, json!({ "title": "v1" }))
    }

    #[tokio::test]
    async fn test_save_and_load_latest() {
        let persister = InMemoryStatePersister::new();
        let s1 = initial("site-1", Partition::Draft);
        persister.save(&s1).await.unwrap();

        let s2 = s1.advance(json!({ "title": "v2" }));
        persister.save(&s2).await.unwrap();

        let latest = persister.load("site-1", &Partition::Draft).await.unwrap();
        assert_eq!(latest.sequence_id, 2);
        assert_eq!(latest.payload["title"], "v2");
        assert_eq!(persister.history_len("site-1", &Partition::Draft), 2);
    }

    #[tokio::test]
    async fn test_conflicting_save_rejected() {
        let persister = InMemoryStatePersister::new();
        let s1 = initial("site-1", Partition::Draft);
        persister.save(&s1).await.unwrap();

        // Two writers both derived sequence 2 from sequence 1.
        let a = s1.advance(json!({ "writer": "a" }));
        let b = s1.advance(json!({ "writer": "b" }));
        persister.save(&a).await.unwrap();

        let err = persister.save(&b).await.unwrap_err();
        assert!(err.is_conflict());
        // The losing writer's payload never landed.
        let latest = persister.load("site-1", &Partition::Draft).await.unwrap();
        assert_eq!(latest.payload["writer"], "a");
    }

    #[tokio::test]
    async fn test_partitions_are_independent() {
        let persister = InMemoryStatePersister::new();
        persister.save(&initial("site-1", Partition::Draft)).await.unwrap();

        assert!(persister
            .load("site-1", &Partition::Published)
            .await
            .is_err());

        // Promotion: explicit copy into the other partition.
        let draft = persister.load("site-1", &Partition::Draft).await.unwrap();
        let promoted = State::initial("site-1", Partition::Published, draft.payload.clone());
        persister.save(&promoted).await.unwrap();
        assert_eq!(
            persister
                .load("site-1", &Partition::Published)
                .await
                .unwrap()
                .sequence_id,
            1
        );
    }

    #[tokio::test]
    async fn test_load_version_returns_history() {
        let persister = InMemoryStatePersister::new();
        let s1 = initial("site-1", Partition::Draft);
        persister.save(&s1).await.unwrap();
        persister.save(&s1.advance(json!({ "title": "v2" }))).await.unwrap();

        let old = persister
            .load_version("site-1", &Partition::Draft, 1)
            .await
            .unwrap();
        assert_eq!(old.payload["title"], "v1");

        assert!(persister
            .load_version("site-1", &Partition::Draft, 9)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_initial_save_requires_empty_history() {
        let persister = InMemoryStatePersister::new();
        let s1 = initial("site-1", Partition::Draft);
        persister.save(&s1).await.unwrap();

        // A second "initial" snapshot conflicts with existing history.
        let another = initial("site-1", Partition::Draft);
        assert!(persister.save(&another).await.unwrap_err().is_conflict());
    }
}
