//! Scanner isolation
//!
//! `Process` mode re-executes the current binary as `scan-worker`. The child
//! writes one JSON array per line on stdout; the parent pumps those lines into
//! the result channel. Closing the child's stdin is the stop signal.

use anyhow::{Context, Result, anyhow};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use super::{BatchReceiver, BatchSender, RecvOutcome, SendOutcome, StopSignal, result_channel};
use crate::config::{RECV_TIMEOUT, ScannerIsolation, ScannerSettings};
use crate::models::DiscoveryBatch;
use crate::scanner::NetworkScanner;

/// Subcommand that runs the isolated scanner
pub const WORKER_SUBCOMMAND: &str = "scan-worker";

/// Arguments passed to the worker; everything else travels via the
/// inherited `PRESENCE_*` environment.
pub fn worker_args(settings: &ScannerSettings) -> Vec<String> {
    vec![
        WORKER_SUBCOMMAND.to_string(),
        "--target".to_string(),
        settings.target_ip.to_string(),
        "--community".to_string(),
        settings.snmp_community.clone(),
        "--interval".to_string(),
        settings.interval_secs.to_string(),
    ]
}

/// Decode one protocol line. Blank lines are ignored.
pub fn parse_batch_line(line: &str) -> Result<Option<DiscoveryBatch>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let batch: DiscoveryBatch =
        serde_json::from_str(line).context("Malformed batch line from scanner")?;
    Ok(Some(batch))
}

/// Parent-side handle on a scanner child process
pub struct ScannerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    pump: JoinHandle<()>,
}

impl ScannerProcess {
    /// Spawn `exe scan-worker ...` and start pumping its stdout into `sender`.
    ///
    /// The pump stops forwarding once `stop` trips, even if the child keeps
    /// writing.
    pub fn spawn(
        exe: &Path,
        settings: &ScannerSettings,
        sender: BatchSender,
        stop: StopSignal,
    ) -> Result<Self> {
        let mut child = Command::new(exe)
            .args(worker_args(settings))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn scanner process {}", exe.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Scanner process has no stdout"))?;
        let stdin = child.stdin.take();

        crate::log_stderr!("Scanner process started (pid {:?})", child.id());

        let pump = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_batch_line(&line) {
                        Ok(Some(batch)) => {
                            if sender.send(batch, &stop).await != SendOutcome::Sent {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            crate::log_warn!("{:#}", e);
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        crate::log_warn!("Scanner stdout read failed: {}", e);
                        break;
                    }
                }
            }

            crate::log_debug!("Scanner output pump finished");
        });

        Ok(Self { child, stdin, pump })
    }

    /// True while the child has not exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Close the child's stdin, wait up to `grace` for it to exit, then kill.
    pub async fn shutdown(mut self, grace: Duration) -> Result<()> {
        drop(self.stdin.take());

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                crate::log_stderr!("Scanner process exited ({})", status);
            }
            Ok(Err(e)) => {
                crate::log_warn!("Waiting for scanner process failed: {}", e);
            }
            Err(_) => {
                crate::log_warn!(
                    "Scanner process did not exit within {:?}, killing",
                    grace
                );
                self.child
                    .kill()
                    .await
                    .context("Failed to kill scanner process")?;
            }
        }

        if tokio::time::timeout(grace, &mut self.pump).await.is_err() {
            self.pump.abort();
        }
        Ok(())
    }
}

/// Running scanner, in either isolation mode
pub enum ScannerHandle {
    Process(ScannerProcess),
    Task {
        handle: JoinHandle<()>,
        stop: StopSignal,
    },
}

impl ScannerHandle {
    /// Start a scanner feeding a new bounded channel.
    ///
    /// `stop` is shared with the caller: tripping it halts the scan loop (task
    /// mode) or the output pump (process mode). `worker_exe` is only used in
    /// process mode and defaults to the current executable.
    pub fn start(
        isolation: ScannerIsolation,
        settings: &ScannerSettings,
        capacity: usize,
        worker_exe: Option<PathBuf>,
        stop: StopSignal,
    ) -> Result<(Self, BatchReceiver)> {
        let (sender, receiver) = result_channel(capacity);

        let handle = match isolation {
            ScannerIsolation::Process => {
                let exe = match worker_exe {
                    Some(exe) => exe,
                    None => std::env::current_exe().context("Cannot locate current executable")?,
                };
                ScannerHandle::Process(ScannerProcess::spawn(&exe, settings, sender, stop)?)
            }
            ScannerIsolation::Task => {
                let scanner_stop = stop.clone();
                let settings = settings.clone();
                let handle = tokio::spawn(async move {
                    NetworkScanner::new(settings).run(sender, scanner_stop).await;
                });
                ScannerHandle::Task { handle, stop }
            }
        };

        Ok((handle, receiver))
    }

    pub fn is_alive(&mut self) -> bool {
        match self {
            ScannerHandle::Process(process) => process.is_alive(),
            ScannerHandle::Task { handle, .. } => !handle.is_finished(),
        }
    }

    /// Stop the scanner and wait at most `grace` before forcing it down.
    pub async fn shutdown(self, grace: Duration) -> Result<()> {
        match self {
            ScannerHandle::Process(process) => process.shutdown(grace).await,
            ScannerHandle::Task { mut handle, stop } => {
                stop.stop();
                if tokio::time::timeout(grace, &mut handle).await.is_err() {
                    crate::log_warn!("Scanner task did not stop within {:?}, aborting", grace);
                    handle.abort();
                }
                Ok(())
            }
        }
    }
}

/// Entry point of the `scan-worker` child.
///
/// Runs the scan loop until stdin reaches EOF (parent closed it or died),
/// writing each batch to stdout as one JSON line.
pub async fn run_scan_worker(settings: ScannerSettings, capacity: usize) -> Result<()> {
    let stop = StopSignal::new();

    // Blocking stdin read on a plain thread so it never holds up runtime
    // shutdown.
    let stdin_stop = stop.clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut sink = String::new();
        while matches!(stdin.lock().read_line(&mut sink), Ok(n) if n > 0) {
            sink.clear();
        }
        stdin_stop.stop();
    });

    let (sender, mut receiver) = result_channel(capacity);
    let scanner_stop = stop.clone();
    let scanner = tokio::spawn(async move {
        NetworkScanner::new(settings).run(sender, scanner_stop).await;
    });

    loop {
        match receiver.recv_timeout(RECV_TIMEOUT).await {
            RecvOutcome::Batch(batch) => {
                if let Err(e) = write_batch_line(&batch) {
                    crate::log_error!("Scanner output failed, stopping: {:#}", e);
                    stop.stop();
                    break;
                }
            }
            RecvOutcome::Empty => {
                if stop.is_stopped() {
                    break;
                }
            }
            RecvOutcome::Closed => break,
        }
    }

    stop.stop();
    scanner.await.context("Scanner task panicked")?;
    Ok(())
}

fn write_batch_line(batch: &DiscoveryBatch) -> Result<()> {
    let line = serde_json::to_string(batch).context("Failed to encode batch")?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", line).context("Failed to write batch")?;
    out.flush().context("Failed to flush stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectorKind, SNMP_ARP_TABLE_OID};
    use std::net::Ipv4Addr;

    fn settings() -> ScannerSettings {
        ScannerSettings {
            target_ip: Ipv4Addr::new(10, 0, 0, 1),
            subnet: None,
            snmp_community: "home".to_string(),
            snmp_port: 161,
            snmp_timeout: Duration::from_millis(100),
            snmp_arp_oid: SNMP_ARP_TABLE_OID.to_vec(),
            snmp_hostname_oid: None,
            collectors: vec![CollectorKind::Snmp],
            ping_sweep: false,
            mdns_enabled: false,
            interval_secs: 30,
        }
    }

    #[test]
    fn test_worker_args() {
        assert_eq!(
            worker_args(&settings()),
            vec![
                "scan-worker",
                "--target",
                "10.0.0.1",
                "--community",
                "home",
                "--interval",
                "30"
            ]
        );
    }

    #[test]
    fn test_parse_batch_line() {
        let line = r#"[{"mac":"DA:A1:19:00:00:01","ip":"10.0.0.7","mdns_services":[],"device_info":{},"is_random":true}]"#;
        let batch = parse_batch_line(line).unwrap().unwrap();

        assert_eq!(batch.len(), 1);
        assert!(batch[0].is_random_mac);
        assert!(batch[0].hostname.is_none());

        assert!(parse_batch_line("   ").unwrap().is_none());
        assert!(parse_batch_line("{not json").is_err());
    }

    #[tokio::test]
    async fn test_task_scanner_stops_within_grace() {
        let mut settings = settings();
        // Nothing listens on this port; every cycle is empty.
        settings.target_ip = Ipv4Addr::LOCALHOST;
        settings.snmp_port = 9;

        let (mut handle, _receiver) =
            ScannerHandle::start(ScannerIsolation::Task, &settings, 4, None, StopSignal::new())
                .unwrap();
        assert!(handle.is_alive());

        let started = std::time::Instant::now();
        handle.shutdown(Duration::from_secs(2)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_task_scanner_honours_caller_stop() {
        let mut settings = settings();
        settings.target_ip = Ipv4Addr::LOCALHOST;
        settings.snmp_port = 9;

        let stop = StopSignal::new();
        let (mut handle, _receiver) =
            ScannerHandle::start(ScannerIsolation::Task, &settings, 4, None, stop.clone())
                .unwrap();
        assert!(handle.is_alive());

        // Tripping the caller's signal alone must end the scan loop
        stop.stop();
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while handle.is_alive() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!handle.is_alive());

        handle.shutdown(Duration::from_millis(100)).await.unwrap();
    }
}
