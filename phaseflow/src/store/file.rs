//! File-backed progress store.
//!
//! Layout:
//! - `<dir>/current-run.json` (or the configured path) holds the active run
//! - `<dir>/runs/<started>_<id8>.json` holds archived terminal runs

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::ProgressStore;
use crate::core::Run;
use crate::errors::{PhaseflowError, StoreCorruptError};
use crate::utils::{file_stamp, short_id};

/// Progress store persisted as a JSON document.
#[derive(Debug)]
pub struct FileProgressStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileProgressStore {
    /// Creates a store whose active record lives at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a store with the default file name inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("current-run.json"))
    }

    /// Path of the active record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that receives archived runs.
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map_or_else(|| PathBuf::from("runs"), |p| p.join("runs"))
    }

    async fn read_record(&self) -> Result<Option<Run>, PhaseflowError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let run: Run = serde_json::from_str(&contents).map_err(|e| {
            StoreCorruptError::new(Some(self.path.clone()), format!("unparseable record: {e}"))
        })?;
        run.validate()
            .map_err(|reason| StoreCorruptError::new(Some(self.path.clone()), reason))?;
        debug!(run_id = %run.run_id, status = %run.status, "progress record loaded");
        Ok(Some(run))
    }

    /// Id of the run in the active slot, read without validating the record.
    ///
    /// An unparseable record yields `None` so archiving never removes it.
    async fn active_run_id(&self) -> Result<Option<String>, PhaseflowError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let id = serde_json::from_str::<serde_json::Value>(&contents)
            .ok()
            .and_then(|record| record.get("run_id")?.as_str().map(str::to_string));
        Ok(id)
    }

    async fn write_record(&self, run: &Run) -> Result<(), PhaseflowError> {
        debug!(path = %self.path.display(), run_id = %run.run_id, status = %run.status, "writing progress record");
        write_atomic(&self.path, run).await
    }
}

async fn write_atomic(path: &Path, run: &Run) -> Result<(), PhaseflowError> {
    let mut buf = serde_json::to_string_pretty(run)?;
    buf.push('\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn load(&self) -> Result<Option<Run>, PhaseflowError> {
        self.read_record().await
    }

    async fn save(&self, run: &Run) -> Result<(), PhaseflowError> {
        let _guard = self.write_lock.lock().await;
        self.write_record(run).await
    }

    async fn update(
        &self,
        mutate: &mut (dyn for<'r> FnMut(&'r mut Run) + Send),
    ) -> Result<Option<Run>, PhaseflowError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut run) = self.read_record().await? else {
            return Ok(None);
        };
        mutate(&mut run);
        run.touch();
        self.write_record(&run).await?;
        Ok(Some(run))
    }

    async fn archive(&self, run: &Run) -> Result<(), PhaseflowError> {
        let _guard = self.write_lock.lock().await;
        let filename = format!(
            "{}_{}.json",
            file_stamp(&run.started_at),
            short_id(&run.run_id)
        );
        let target = self.archive_dir().join(filename);
        write_atomic(&target, run).await?;

        if self.active_run_id().await?.as_deref() == Some(run.run_id.as_str()) {
            fs::remove_file(&self.path).await?;
        }
        debug!(archive = %target.display(), run_id = %run.run_id, "run archived");
        Ok(())
    }
}
