use std::panic;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod activity;
mod auth;
pub mod clock;
pub mod commands;
pub mod config;
mod database;
pub mod directory;
pub mod engine;
pub mod error;
pub mod ledger;
mod models;
pub mod reconciler;
pub mod registry;
pub mod store;

pub use activity::{ActivitySignal, SubscriberId};
pub use auth::AuthManager;
pub use clock::{Clock, ManualClock, SystemClock, TickSource};
pub use config::{EngineConfig, HttpConfig};
pub use database::Database;
pub use directory::{HttpTaskDirectory, StaticDirectory, WorkItem, WorkItemDirectory};
pub use engine::{
    format_elapsed, EntryId, Operation, PendingEntry, StopOutcome, Timer, TimerId, TimerStatus,
    WorkItemId,
};
pub use error::{DirectoryError, EngineError, EngineResult, LedgerError, StoreError};
pub use ledger::{HttpLedger, LedgerEntryRequest, LedgerService};
pub use registry::{RestoreReport, TimerRegistry};
pub use store::{DurableStore, MemoryStore};


/// Open the SQLite store; on a corrupted file, move it aside and start fresh once.
pub fn open_store(data_dir: &Path) -> Result<Database, String> {
    std::fs::create_dir_all(data_dir).map_err(|e| {
        let msg = match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                "Permission denied. Check data directory is writable."
            }
            _ => "Failed to create data directory.",
        };
        format!("{} Path: {} ({})", msg, data_dir.display(), e)
    })?;

    let db_path = data_dir.join("worktimer.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| format!("Database path contains invalid UTF-8: {}", db_path.display()))?;

    match Database::new(db_path_str) {
        Ok(db) => Ok(db),
        Err(e) => {
            if !database::is_corruption_error(&e) || !db_path.exists() {
                return Err(format!("Failed to initialize database: {}", e));
            }
            let backup_path = data_dir.join(format!(
                "worktimer.db.corrupted.{}",
                chrono::Utc::now().timestamp()
            ));
            if let Err(rename_e) = std::fs::rename(&db_path, &backup_path) {
                warn!(
                    "[DB] Failed to rename corrupted DB to {:?}: {}",
                    backup_path, rename_e
                );
                return Err(format!("Database corrupted and could not backup: {}", e));
            }
            info!(
                "[DB] Corrupted DB backed up to {:?}, starting fresh",
                backup_path
            );
            Database::new(db_path_str)
                .map_err(|e2| format!("Failed to create fresh database: {}", e2))
        }
    }
}

/// Panic recovery: persist timer state before the panic unwinds
fn install_panic_hook(registry: Arc<TimerRegistry>) {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if let Err(e) = registry.try_persist_now() {
            eprintln!("[PANIC_RECOVERY] Failed to persist timer state: {}", e);
        } else {
            eprintln!("[PANIC_RECOVERY] Timer state persisted before panic");
        }
        default_hook(info);
    }));
}

pub fn run() -> Result<(), String> {
    // Logs go to stderr so the console stays readable; default level info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_env();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;
    runtime.block_on(serve(config))
}

async fn serve(config: EngineConfig) -> Result<(), String> {
    let store: Arc<dyn DurableStore> = match &config.data_dir {
        Some(dir) => Arc::new(open_store(dir)?),
        None => {
            warn!("[DB] WORKTIMER_DATA_DIR not set, timer state will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };

    let auth = AuthManager::new(config.access_token.clone());
    let ledger: Arc<dyn LedgerService> = Arc::new(HttpLedger::new(&config.http, auth.clone()));
    let directory = HttpTaskDirectory::new(&config.http, auth);

    let registry = Arc::new(TimerRegistry::new(
        store,
        Arc::new(SystemClock),
        ledger,
        config.max_catch_up_secs,
    ));

    registry.activity().subscribe(|active| {
        info!(
            "[TIMER] Activity changed: {}",
            if active { "tracking" } else { "idle" }
        );
    });

    match registry.restore(&directory).await {
        Ok(report) => debug!("[RECOVERY] {:?}", report),
        Err(e) => error!("[RECOVERY] Restore failed, starting empty: {}", e),
    }
    install_panic_hook(registry.clone());

    let clock_driver = TimerRegistry::spawn_clock_driver(
        registry.clone(),
        Duration::from_millis(config.tick_interval_ms),
    );

    // Per-mutation writes are the contract; this only narrows the window for ticks
    let registry_for_periodic = registry.clone();
    let periodic_secs = config.periodic_save_secs.max(1);
    let periodic_save = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(periodic_secs));
        loop {
            interval.tick().await;
            if let Err(e) = registry_for_periodic.persist_now() {
                warn!("[TIMER] Failed to save state periodically: {}", e);
            } else {
                debug!("[TIMER] State saved periodically");
            }
        }
    });

    tokio::select! {
        _ = commands::run_console(registry.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("[SHUTDOWN] Interrupt received");
        }
    }

    clock_driver.abort();
    periodic_save.abort();
    let outstanding = registry.reconciler().in_flight_count();
    if outstanding > 0 {
        warn!(
            "[SHUTDOWN] Exiting with {} save(s) in flight; those timers stay Paused in the snapshot",
            outstanding
        );
    }
    if let Err(e) = registry.persist_now() {
        error!("[SHUTDOWN] Failed to save timer state on exit: {}", e);
    } else {
        info!("[SHUTDOWN] Timer state saved successfully on exit");
    }
    Ok(())
}
