//! Shared services built once per process

use parking_lot::Mutex;
use rowguard_activity_log::{Ledger, SqliteLedgerStore};
use rowguard_config::{ConfigManager, RowguardConfig};
use rowguard_sql::SqlGateway;
use rowguard_undo::{
    SnapshotStore, SnapshotSweeper, SqliteUndoPersistence, UndoPersistence, UndoRegistry,
};
use std::sync::Arc;
use tracing::info;

use crate::error::{EngineError, EngineResult};

/// The ledger, snapshot store and undo registry, wired to one gateway
///
/// Cloning is cheap; every clone shares the same services.
#[derive(Clone)]
pub struct Services {
    /// Settings the services were built from
    pub config: Arc<RowguardConfig>,
    /// Relational store
    pub gateway: Arc<dyn SqlGateway>,
    /// Audit trail
    pub ledger: Arc<Ledger>,
    /// Row before-images
    pub snapshots: Arc<SnapshotStore>,
    /// Reversible operations
    pub registry: Arc<UndoRegistry>,
    sweeper: Arc<Mutex<Option<SnapshotSweeper>>>,
}

impl Services {
    /// Memory-only services with no background sweep
    pub fn in_memory(config: &RowguardConfig, gateway: Arc<dyn SqlGateway>) -> Self {
        let ledger = Arc::new(Ledger::new(config.ledger.max_workflows));
        let snapshots = Arc::new(SnapshotStore::new(
            gateway.clone(),
            config.snapshots.to_snapshot_config(),
        ));
        let registry = Arc::new(
            UndoRegistry::new(snapshots.clone(), ledger.clone(), config.undo.global_max)
                .with_policy(config.undo.rollback_policy),
        );
        Self {
            config: Arc::new(config.clone()),
            gateway,
            ledger,
            snapshots,
            registry,
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    /// Build every service from configuration
    ///
    /// When `storage.audit_database` is set, the ledger and undo state are stored there
    /// and reloaded. The snapshot sweeper is spawned on the current runtime. Settings that
    /// fail [`ConfigManager::validate_config`] are rejected before anything is opened.
    pub async fn bootstrap(
        config: RowguardConfig,
        gateway: Arc<dyn SqlGateway>,
    ) -> EngineResult<Self> {
        ConfigManager::new().validate_config(&config)?;

        let mut ledger = Ledger::new(config.ledger.max_workflows);
        let mut snapshots =
            SnapshotStore::new(gateway.clone(), config.snapshots.to_snapshot_config());
        let mut persistence: Option<Arc<dyn UndoPersistence>> = None;

        if let Some(path) = &config.storage.audit_database {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        EngineError::bootstrap(format!(
                            "Failed to create storage directory: {}",
                            e
                        ))
                    })?;
                }
            }
            ledger = ledger.with_store(Arc::new(SqliteLedgerStore::open(path)?));
            let undo_store: Arc<dyn UndoPersistence> = Arc::new(SqliteUndoPersistence::open(path)?);
            snapshots = snapshots.with_persistence(undo_store.clone());
            persistence = Some(undo_store);
        }

        let ledger = Arc::new(ledger);
        let snapshots = Arc::new(snapshots);
        let mut registry = UndoRegistry::new(snapshots.clone(), ledger.clone(), config.undo.global_max)
            .with_policy(config.undo.rollback_policy);
        if let Some(undo_store) = persistence {
            registry = registry.with_persistence(undo_store);
            let restored_snapshots = snapshots.rehydrate().await?;
            let restored_operations = registry.rehydrate().await?;
            info!(
                snapshots = restored_snapshots,
                operations = restored_operations,
                "Rehydrated undo state"
            );
        }

        let sweeper = SnapshotSweeper::spawn(snapshots.clone(), config.snapshots.sweep_interval());
        info!(
            durable = ledger.is_durable(),
            sweep_interval_secs = config.snapshots.sweep_interval_secs,
            "Services ready"
        );

        Ok(Self {
            config: Arc::new(config),
            gateway,
            ledger,
            snapshots,
            registry: Arc::new(registry),
            sweeper: Arc::new(Mutex::new(Some(sweeper))),
        })
    }

    /// Whether the background sweep is running
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .map(|s| !s.is_finished())
            .unwrap_or(false)
    }

    /// Stop the background sweep
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_sql::SqliteGateway;

    #[tokio::test]
    async fn test_in_memory_has_no_sweeper() {
        let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
        let services = Services::in_memory(&RowguardConfig::default(), gateway);
        assert!(!services.is_sweeping());
        assert!(!services.ledger.is_durable());
    }

    #[tokio::test]
    async fn test_bootstrap_spawns_sweeper_and_opens_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RowguardConfig::default();
        config.storage.audit_database = Some(dir.path().join("audit").join("rowguard.db"));

        let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
        let services = Services::bootstrap(config, gateway).await.unwrap();
        assert!(services.is_sweeping());
        assert!(services.ledger.is_durable());
        assert!(dir.path().join("audit").join("rowguard.db").exists());

        services.shutdown().await;
        assert!(!services.is_sweeping());
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_zero_sweep_interval() {
        let mut config = RowguardConfig::default();
        config.snapshots.sweep_interval_secs = 0;

        let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
        let result = Services::bootstrap(config, gateway).await;
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_empty_undo_stack() {
        let mut config = RowguardConfig::default();
        config.undo.global_max = 0;

        let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
        assert!(Services::bootstrap(config, gateway).await.is_err());
    }
}
