use anyhow::Context;
use clap::Parser;
use listsync::utils::LISTSYNC_VERSION;
use listsync::{
    read_config, read_list_seeds, spawn_on_demand_sync, sync_trigger, AutoResolveStrategy,
    ConflictPurgeTask, ConflictResolver, EngineConfig, FileSnapshotSource, InMemoryRepository,
    PeriodicWorker, Reconciler, ScheduledSyncTask, SyncBackoff, SyncSource, SyncStateMachine,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Listsync daemon - keeps shared lists in step with their external sources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (JSON). Defaults apply when it is missing.
    #[arg(short, long, env = "LISTSYNC_CONFIG", default_value = "listsync.json")]
    config: PathBuf,

    /// Directory holding one `<external id>.json` snapshot per remote list
    #[arg(long, env = "LISTSYNC_SNAPSHOTS_DIR", default_value = "snapshots")]
    snapshots_dir: PathBuf,

    /// JSON file with the lists to host and their sync targets
    #[arg(long, env = "LISTSYNC_LISTS")]
    lists: Option<PathBuf>,

    /// Override the scheduled sync interval
    #[arg(long, env = "LISTSYNC_SYNC_INTERVAL_SECS")]
    sync_interval_secs: Option<u64>,

    /// Override the conflict purge interval
    #[arg(long, env = "LISTSYNC_PURGE_INTERVAL_SECS")]
    purge_interval_secs: Option<u64>,

    /// Override the external source timeout
    #[arg(long, env = "LISTSYNC_FETCH_TIMEOUT_SECS")]
    fetch_timeout_secs: Option<u64>,

    /// Resolve conflicts automatically (last-write-wins, source-priority,
    /// local-priority, merge-fields)
    #[arg(long, env = "LISTSYNC_AUTO_RESOLVE")]
    auto_resolve: Option<AutoResolveStrategy>,
}

impl Args {
    fn apply_overrides(&self, config: &mut EngineConfig) {
        if let Some(secs) = self.sync_interval_secs {
            config.sync_interval_secs = secs;
        }
        if let Some(secs) = self.purge_interval_secs {
            config.purge_interval_secs = secs;
        }
        if let Some(secs) = self.fetch_timeout_secs {
            config.fetch_timeout_secs = secs;
        }
        if self.auto_resolve.is_some() {
            config.auto_resolve_strategy = self.auto_resolve;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = read_config(&args.config)
        .await
        .with_context(|| format!("failed to read config {}", args.config.display()))?
        .unwrap_or_default();
    args.apply_overrides(&mut config);

    info!(
        version = LISTSYNC_VERSION,
        sync_interval_secs = config.sync_interval_secs,
        snapshots_dir = %args.snapshots_dir.display(),
        "Starting listsync daemon"
    );

    let repository = Arc::new(InMemoryRepository::new());
    let source = Arc::new(FileSnapshotSource::new(&args.snapshots_dir));
    let (trigger, triggers) = sync_trigger();
    let state_machine = Arc::new(
        SyncStateMachine::new(repository.clone(), config.pass_lease()).with_trigger(trigger),
    );
    let reconciler = Arc::new(Reconciler::new(
        repository.clone(),
        source,
        state_machine.clone(),
        config.reconciler_options(),
    ));

    if let Some(lists_path) = &args.lists {
        let seeds = read_list_seeds(lists_path)
            .await
            .with_context(|| format!("failed to read lists {}", lists_path.display()))?;

        for seed in seeds {
            repository.insert_list(&seed.list_id, seed.snapshot()).await;
            let Some(source_name) = &seed.source else {
                continue;
            };
            let enabled = match source_name.parse::<SyncSource>() {
                Ok(source) => state_machine
                    .enable(&seed.list_id, source, &seed.external_id)
                    .await,
                Err(err) => Err(err),
            };
            if let Err(err) = enabled {
                warn!(list_id = %seed.list_id, error = %err, "Could not enable sync for list");
            }
        }
    }

    let mut sync_task = ScheduledSyncTask::new(
        reconciler.clone(),
        config.max_concurrent_syncs,
        SyncBackoff::new(config.backoff_base(), config.backoff_max()),
    );
    if let Some(strategy) = config.auto_resolve_strategy {
        let resolver = Arc::new(ConflictResolver::new(repository.clone(), state_machine.clone()));
        sync_task = sync_task.with_auto_resolve(resolver, strategy);
    }
    let purge_task = ConflictPurgeTask::new(repository.clone(), config.conflict_retention());

    let workers = vec![
        PeriodicWorker::new(Arc::new(sync_task), config.sync_interval()).start(),
        PeriodicWorker::new(Arc::new(purge_task), config.purge_interval()).start(),
        spawn_on_demand_sync(reconciler, triggers),
    ];

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal, stopping workers...");

    for worker in &workers {
        worker.stop();
    }
    for worker in workers {
        worker.join().await;
    }

    info!("Listsync daemon stopped");
    Ok(())
}
