use std::sync::{Arc, Mutex};

use tracing::info;

use streamctl_cluster::{
    ClusterTaskHandler, CommandMetaManager, HttpDiagnosticsClient, OrgTimezoneResolver,
};
use streamctl_core::config::StreamctlConfig;
use streamctl_scheduler::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "streamctl_server=info,streamctl_scheduler=info,streamctl_cluster=info".into()
            }),
        )
        .init();

    // load config: explicit path > STREAMCTL_CONFIG env > ~/.streamctl/streamctl.toml
    let config_path = std::env::var("STREAMCTL_CONFIG").ok();
    let config = StreamctlConfig::load_or_default(config_path.as_deref());

    // initialize SQLite database — single file for all subsystems
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    // run all schema migrations (idempotent)
    streamctl_scheduler::db::init_db(&db)?;
    streamctl_cluster::db::init_db(&db)?;
    info!("database migrations complete");

    // the worker gets its own connection; claim cycles take an immediate
    // transaction and must not contend with other subsystems for a mutex
    let worker_conn = Arc::new(Mutex::new(rusqlite::Connection::open(db_path)?));
    let meta = Arc::new(CommandMetaManager::new(config.meta.metactl_path.clone()));
    let diagnostics = Arc::new(HttpDiagnosticsClient::new()?);
    let handler = Arc::new(ClusterTaskHandler::new(meta, diagnostics));
    let worker = Worker::new(
        worker_conn,
        handler,
        Arc::new(OrgTimezoneResolver),
        &config.worker,
    )?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker_task = tokio::spawn(worker.run(shutdown_rx));

    info!("streamctl control plane running");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    let _ = worker_task.await;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
