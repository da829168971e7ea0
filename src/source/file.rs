use super::{ExternalSource, ExternalSourceError};
use crate::model::Snapshot;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// External source backed by a directory of `<external_id>.json` snapshot files
#[derive(Debug, Clone)]
pub struct FileSnapshotSource {
    root: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self, external_id: &str) -> Result<PathBuf, ExternalSourceError> {
        let valid = !external_id.is_empty()
            && !external_id.starts_with('.')
            && external_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(ExternalSourceError::Rejected(format!(
                "invalid external id: {external_id:?}"
            )));
        }
        Ok(self.root.join(format!("{external_id}.json")))
    }
}

#[async_trait]
impl ExternalSource for FileSnapshotSource {
    async fn fetch_snapshot(&self, external_id: &str) -> Result<Snapshot, ExternalSourceError> {
        let path = self.snapshot_path(external_id)?;

        let content = fs::read_to_string(&path).await.map_err(|e| {
            ExternalSourceError::Unavailable(format!("{}: {}", path.display(), e))
        })?;

        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| ExternalSourceError::MalformedResponse(e.to_string()))?;

        debug!(external_id, items = snapshot.items.len(), "Fetched remote snapshot");
        Ok(snapshot)
    }

    async fn push_snapshot(
        &self,
        external_id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), ExternalSourceError> {
        let path = self.snapshot_path(external_id)?;
        let unavailable = |e: std::io::Error| ExternalSourceError::Unavailable(e.to_string());

        fs::create_dir_all(&self.root).await.map_err(unavailable)?;

        // Write atomically using temp file + rename
        let temp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| ExternalSourceError::Rejected(e.to_string()))?;
        fs::write(&temp_path, &content).await.map_err(unavailable)?;
        fs::rename(&temp_path, &path).await.map_err(unavailable)?;

        debug!(external_id, items = snapshot.items.len(), "Pushed snapshot");
        Ok(())
    }
}
