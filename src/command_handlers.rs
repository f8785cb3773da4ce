use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::app::AppContext;
use crate::cli::ScanOptions;
use crate::database::Database;
use crate::monitor::PresenceMonitor;
use crate::presence::{NullPublisher, PresenceReconciler, Publisher, presence_health};
use crate::scanner::NetworkScanner;
use crate::worker::run_scan_worker;

/// Time given to the mDNS listener before a one-off scan
const MDNS_WARMUP: Duration = Duration::from_secs(2);

fn emit_json<T: Serialize>(context: &AppContext, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize command output")?;
    context.emit_line(&json);
    Ok(())
}

fn open_database(context: &AppContext) -> Result<Database> {
    let path = context.config().db_path.clone();
    Database::new(path.clone())
        .with_context(|| format!("Failed to open database at {}", path.display()))
}

fn reconciler(context: &AppContext) -> Result<PresenceReconciler> {
    Ok(PresenceReconciler::new(
        open_database(context)?,
        context.config().reconcile.clone(),
        Arc::new(NullPublisher),
    ))
}

/// Start the monitor and print every notification as one JSON line until
/// Ctrl-C.
pub(crate) async fn handle_run(context: &AppContext, options: &ScanOptions) -> Result<()> {
    let mut config = context.config().clone();
    options.apply_to_config(&mut config);

    crate::log_stderr!("presence-core v{}", env!("CARGO_PKG_VERSION"));
    crate::log_stderr!("Database: {}", config.db_path.display());

    let db = open_database(context)?;
    let sink = context.clone();
    let publisher: Arc<dyn Publisher> = Arc::new(move |topic: &str, payload: serde_json::Value| {
        let line = serde_json::json!({ "topic": topic, "payload": payload });
        sink.emit_line(&line.to_string());
    });

    let monitor = PresenceMonitor::new(config, db, publisher);
    monitor.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    crate::log_stderr!("Shutting down...");

    monitor.stop().await
}

/// One scanner cycle, printed as a JSON array.
pub(crate) async fn handle_scan_once(context: &AppContext, options: &ScanOptions) -> Result<()> {
    let mut settings = context.config().scanner.clone();
    options.apply_to(&mut settings);

    let mdns_enabled = settings.mdns_enabled;
    let scanner = NetworkScanner::new(settings);
    if mdns_enabled {
        tokio::time::sleep(MDNS_WARMUP).await;
    }

    let batch = scanner.scan_once().await;
    crate::log_stderr!("Discovered {} devices", batch.len());
    emit_json(context, &batch)
}

/// Child side of process isolation. Writes batches straight to stdout.
pub(crate) async fn handle_scan_worker(context: &AppContext, options: &ScanOptions) -> Result<()> {
    let mut settings = context.config().scanner.clone();
    options.apply_to(&mut settings);
    run_scan_worker(settings, context.config().channel_capacity).await
}

pub(crate) fn handle_status(context: &AppContext) -> Result<()> {
    let db = open_database(context)?;
    let health = {
        let conn = db.lock()?;
        presence_health(&conn, context.config().scanner.interval_secs, chrono::Utc::now())?
    };
    emit_json(context, &health)
}

pub(crate) fn handle_register(context: &AppContext, mac: &str, name: &str, track: bool) -> Result<()> {
    let device = reconciler(context)?.register_device(mac, name, track)?;
    emit_json(context, &device)
}

pub(crate) fn handle_track(context: &AppContext, mac: &str, enabled: bool) -> Result<()> {
    let device = reconciler(context)?.set_track_presence(mac, enabled)?;
    emit_json(context, &device)
}
