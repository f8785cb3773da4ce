//! Presence monitor
//!
//! Owns the configuration, the database handle, the publisher and the stop
//! signal; starts the scanner in its isolation mode and a consumer task that
//! reconciles each batch on the blocking pool.

mod events;

pub use events::{MONITOR_TOPIC, MonitorEvent, MonitorStatus};

use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{PollMode, PresenceConfig, RECV_TIMEOUT, SHORT_POLL_INTERVAL};
use crate::database::Database;
use crate::presence::{PresenceHealth, PresenceReconciler, Publisher, presence_health};
use crate::worker::{BatchReceiver, RecvOutcome, ScannerHandle, StopSignal};

struct Running {
    scanner: ScannerHandle,
    consumer: JoinHandle<()>,
    stop: StopSignal,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Presence detection orchestrator
pub struct PresenceMonitor {
    config: PresenceConfig,
    reconciler: PresenceReconciler,
    publisher: Arc<dyn Publisher>,
    running: Mutex<Option<Running>>,
    counters: Arc<Counters>,
    worker_exe: Option<PathBuf>,
}

impl PresenceMonitor {
    pub fn new(config: PresenceConfig, db: Database, publisher: Arc<dyn Publisher>) -> Self {
        let reconciler =
            PresenceReconciler::new(db, config.reconcile.clone(), Arc::clone(&publisher));
        Self {
            config,
            reconciler,
            publisher,
            running: Mutex::new(None),
            counters: Arc::new(Counters::default()),
            worker_exe: None,
        }
    }

    /// Run the process-isolated scanner from `exe` instead of the current
    /// executable.
    pub fn with_worker_exe(mut self, exe: PathBuf) -> Self {
        self.worker_exe = Some(exe);
        self
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &PresenceReconciler {
        &self.reconciler
    }

    /// Start scanner and consumer. Calling it while running is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        // One signal for the scanner side and the consumer
        let stop = StopSignal::new();
        let (scanner, receiver) = ScannerHandle::start(
            self.config.isolation,
            &self.config.scanner,
            self.config.channel_capacity,
            self.worker_exe.clone(),
            stop.clone(),
        )?;

        let consumer = tokio::spawn(consume_batches(
            receiver,
            self.reconciler.clone(),
            self.config.poll_mode,
            stop.clone(),
            Arc::clone(&self.publisher),
            Arc::clone(&self.counters),
        ));

        *running = Some(Running {
            scanner,
            consumer,
            stop,
        });

        tracing::info!(
            "[MONITOR] Presence monitoring started (interval: {}s, isolation: {:?}, poll: {:?})",
            self.config.scanner.interval_secs,
            self.config.isolation,
            self.config.poll_mode
        );
        publish_event(
            self.publisher.as_ref(),
            &MonitorEvent::MonitoringStarted {
                interval_seconds: self.config.scanner.interval_secs,
                isolation: format!("{:?}", self.config.isolation).to_lowercase(),
            },
        );

        Ok(())
    }

    /// Stop scanner and consumer, waiting at most the shutdown grace for
    /// each. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        let grace = self.config.shutdown_grace;

        running.stop.stop();
        let scanner_result = running.scanner.shutdown(grace).await;

        let mut consumer = running.consumer;
        if tokio::time::timeout(grace, &mut consumer).await.is_err() {
            tracing::warn!("[MONITOR] Consumer did not stop within {:?}, aborting", grace);
            consumer.abort();
        }

        tracing::info!("[MONITOR] Presence monitoring stopped");
        publish_event(self.publisher.as_ref(), &MonitorEvent::MonitoringStopped);
        scanner_result
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Liveness of both halves plus pass counters
    pub async fn status(&self) -> MonitorStatus {
        let mut running = self.running.lock().await;
        let (scanner_alive, consumer_alive) = match running.as_mut() {
            Some(r) => (r.scanner.is_alive(), !r.consumer.is_finished()),
            None => (false, false),
        };

        MonitorStatus {
            is_running: running.is_some(),
            scanner_alive,
            consumer_alive,
            interval_seconds: self.config.scanner.interval_secs,
            batches_processed: self.counters.processed.load(Ordering::SeqCst),
            batches_failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Staleness-based health report
    pub fn health(&self) -> Result<PresenceHealth> {
        let conn = self.reconciler.database().lock()?;
        presence_health(&conn, self.config.scanner.interval_secs, Utc::now())
    }
}

fn publish_event(publisher: &dyn Publisher, event: &MonitorEvent) {
    match serde_json::to_value(event) {
        Ok(payload) => publisher.publish(MONITOR_TOPIC, payload),
        Err(e) => {
            crate::log_warn!("Failed to encode monitor event: {}", e);
        }
    }
}

/// Pull batches in FIFO order until stopped or the channel closes.
async fn consume_batches(
    mut receiver: BatchReceiver,
    reconciler: PresenceReconciler,
    poll_mode: PollMode,
    stop: StopSignal,
    publisher: Arc<dyn Publisher>,
    counters: Arc<Counters>,
) {
    tracing::debug!("[MONITOR] Consumer started ({:?})", poll_mode);

    while !stop.is_stopped() {
        let outcome = match poll_mode {
            PollMode::Blocking => receiver.recv_timeout(RECV_TIMEOUT).await,
            PollMode::ShortPoll => {
                let outcome = receiver.try_recv();
                if matches!(outcome, RecvOutcome::Empty) {
                    tokio::time::sleep(SHORT_POLL_INTERVAL).await;
                }
                outcome
            }
        };

        let batch = match outcome {
            RecvOutcome::Batch(batch) => batch,
            RecvOutcome::Empty => continue,
            RecvOutcome::Closed => {
                tracing::warn!("[MONITOR] Scanner channel closed, consumer exiting");
                break;
            }
        };

        let pass_reconciler = reconciler.clone();
        let result =
            tokio::task::spawn_blocking(move || pass_reconciler.reconcile(&batch)).await;

        match result {
            Ok(Ok(report)) => {
                counters.processed.fetch_add(1, Ordering::SeqCst);
                publish_event(publisher.as_ref(), &MonitorEvent::from(&report));
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                publish_event(
                    publisher.as_ref(),
                    &MonitorEvent::ReconcileFailed {
                        message: format!("{:#}", e),
                    },
                );
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                crate::log_error!("Reconciliation task failed: {}", e);
            }
        }
    }

    receiver.close();
    tracing::debug!("[MONITOR] Consumer stopped");
}
