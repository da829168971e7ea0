//! Contract of the external system a list is synchronized with.

mod file;

pub use file::FileSnapshotSource;

use crate::model::Snapshot;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExternalSourceError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Client of the external list provider
#[async_trait]
pub trait ExternalSource: Send + Sync {
    /// Capture the current remote state of a list
    async fn fetch_snapshot(&self, external_id: &str) -> Result<Snapshot, ExternalSourceError>;

    /// Replace the remote state of a list with `snapshot`
    async fn push_snapshot(
        &self,
        external_id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), ExternalSourceError>;
}
