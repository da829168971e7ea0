use crate::model::{ItemRecord, Snapshot};
use crate::reconciliation::ReconcilerOptions;
use crate::resolver::AutoResolveStrategy;
use crate::utils::seconds;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_purge_interval_secs() -> u64 {
    3600
}

fn default_conflict_retention_days() -> u32 {
    30
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_pass_lease_secs() -> u64 {
    600
}

fn default_push_local_changes() -> bool {
    true
}

fn default_max_concurrent_syncs() -> usize {
    4
}

fn default_backoff_base_secs() -> u64 {
    30
}

fn default_backoff_max_secs() -> u64 {
    3600
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Seconds between scheduled sync passes
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Seconds between conflict purges
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
    /// Resolved and inactive conflicts are kept this many days
    #[serde(default = "default_conflict_retention_days")]
    pub conflict_retention_days: u32,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Lifetime of a pass lease; an expired lease can be taken over
    #[serde(default = "default_pass_lease_secs")]
    pub pass_lease_secs: u64,
    #[serde(default = "default_push_local_changes")]
    pub push_local_changes: bool,
    #[serde(default = "default_max_concurrent_syncs")]
    pub max_concurrent_syncs: usize,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Resolve conflicts raised by scheduled passes automatically
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_resolve_strategy: Option<AutoResolveStrategy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            purge_interval_secs: default_purge_interval_secs(),
            conflict_retention_days: default_conflict_retention_days(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            pass_lease_secs: default_pass_lease_secs(),
            push_local_changes: default_push_local_changes(),
            max_concurrent_syncs: default_max_concurrent_syncs(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            auto_resolve_strategy: None,
        }
    }
}

impl EngineConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn conflict_retention(&self) -> chrono::Duration {
        seconds(u64::from(self.conflict_retention_days) * 24 * 60 * 60)
    }

    pub fn pass_lease(&self) -> Duration {
        Duration::from_secs(self.pass_lease_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            push_local_changes: self.push_local_changes,
        }
    }
}

/// Read the configuration file
pub async fn read_config(config_path: &Path) -> Result<Option<EngineConfig>, ConfigError> {
    if !config_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(config_path).await?;
    let config: EngineConfig = serde_json::from_str(&content)?;
    Ok(Some(config))
}

/// Write the configuration file
pub async fn write_config(config_path: &Path, config: &EngineConfig) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content).await?;
    Ok(())
}

/// A list the daemon hosts, with its initial items and sync target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSeed {
    pub list_id: String,
    /// Source name, e.g. `maps`; no sync when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub items: Vec<ItemRecord>,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl ListSeed {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            settings: self.settings.clone(),
            ..Snapshot::new(self.items.clone())
        }
    }
}

/// Read the list seed file (a JSON array of [`ListSeed`])
pub async fn read_list_seeds(seeds_path: &Path) -> Result<Vec<ListSeed>, ConfigError> {
    let content = fs::read_to_string(seeds_path).await?;
    Ok(serde_json::from_str(&content)?)
}
