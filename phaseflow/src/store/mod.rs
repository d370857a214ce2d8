//! Durable progress storage.
//!
//! The store holds exactly one active `Run` record and replaces it whole on
//! every write, so a crash between read and write never leaves a torn
//! state. Writes are serialised behind an async mutex: one mutation in
//! flight at a time.

mod file;

pub use file::FileProgressStore;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::Run;
use crate::errors::{PhaseflowError, StoreCorruptError};

/// Protocol for progress storage backends.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Loads the active run, validating its structure.
    ///
    /// Returns `ProgressStoreCorrupt` if the record exists but fails
    /// validation. A corrupt record is never reset silently.
    async fn load(&self) -> Result<Option<Run>, PhaseflowError>;

    /// Replaces the active run record.
    async fn save(&self, run: &Run) -> Result<(), PhaseflowError>;

    /// Atomic read-modify-write of the active run.
    ///
    /// Returns the updated record, or `None` if no run is stored.
    async fn update(
        &self,
        mutate: &mut (dyn for<'r> FnMut(&'r mut Run) + Send),
    ) -> Result<Option<Run>, PhaseflowError>;

    /// Records a terminal run in the archive and clears the active slot
    /// if it holds that run.
    async fn archive(&self, run: &Run) -> Result<(), PhaseflowError>;
}

fn validated(run: Run) -> Result<Run, PhaseflowError> {
    run.validate()
        .map_err(|reason| StoreCorruptError::new(None, reason))?;
    Ok(run)
}

/// In-memory progress store.
///
/// Survives nothing, but follows the same single-writer protocol as the
/// file store. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    current: Mutex<Option<Run>>,
    archived: Mutex<Vec<Run>>,
}

impl InMemoryProgressStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns archived runs, oldest first.
    pub async fn archived(&self) -> Vec<Run> {
        self.archived.lock().await.clone()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn load(&self) -> Result<Option<Run>, PhaseflowError> {
        let current = self.current.lock().await.clone();
        current.map(validated).transpose()
    }

    async fn save(&self, run: &Run) -> Result<(), PhaseflowError> {
        *self.current.lock().await = Some(run.clone());
        Ok(())
    }

    async fn update(
        &self,
        mutate: &mut (dyn for<'r> FnMut(&'r mut Run) + Send),
    ) -> Result<Option<Run>, PhaseflowError> {
        let mut current = self.current.lock().await;
        let Some(run) = current.clone() else {
            return Ok(None);
        };
        let mut run = validated(run)?;
        mutate(&mut run);
        run.touch();
        *current = Some(run.clone());
        Ok(Some(run))
    }

    async fn archive(&self, run: &Run) -> Result<(), PhaseflowError> {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|c| c.run_id == run.run_id) {
            *current = None;
        }
        self.archived.lock().await.push(run.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PhaseDefinition, RunStatus, UnitSpec};

    fn sample_run() -> Run {
        Run::new(
            "greenfield",
            &[PhaseDefinition::new("stories").with_unit(UnitSpec::new("s1"))],
        )
    }

    #[tokio::test]
    async fn test_empty_store_loads_none() {
        let store = InMemoryProgressStore::new();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = InMemoryProgressStore::new();
        let run = sample_run();
        store.save(&run).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(run));
    }

    #[tokio::test]
    async fn test_update_is_read_modify_write() {
        let store = InMemoryProgressStore::new();
        store.save(&sample_run()).await.unwrap();

        let updated = store
            .update(&mut |run: &mut Run| run.current_phase_index = 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.current_phase_index, 1);
        assert_eq!(store.load().await.unwrap().unwrap().current_phase_index, 1);
    }

    #[tokio::test]
    async fn test_update_without_run_is_none() {
        let store = InMemoryProgressStore::new();
        let result = store.update(&mut |_run: &mut Run| {}).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_record() {
        let store = InMemoryProgressStore::new();
        let mut run = sample_run();
        run.status = RunStatus::Paused;
        store.save(&run).await.unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, PhaseflowError::ProgressStoreCorrupt(_)));
    }

    #[tokio::test]
    async fn test_archive_clears_active_slot() {
        let store = InMemoryProgressStore::new();
        let run = sample_run();
        store.save(&run).await.unwrap();
        store.archive(&run).await.unwrap();

        assert!(store.load().await.unwrap().is_none());
        assert_eq!(store.archived().await.len(), 1);
    }

    #[tokio::test]
    async fn test_archive_keeps_record_of_another_run() {
        let store = InMemoryProgressStore::new();
        let active = sample_run();
        store.save(&active).await.unwrap();

        store.archive(&sample_run()).await.unwrap();

        assert_eq!(store.load().await.unwrap().unwrap().run_id, active.run_id);
        assert_eq!(store.archived().await.len(), 1);
    }
}
