//! ICMP ping sweep
//!
//! Sends one echo request to every target so the OS ARP cache gets populated.
//! Replies are only counted for logging; the MACs come from the ARP table read
//! that follows.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use surge_ping::{Client, Config, PingIdentifier, PingSequence};
use tokio::sync::Semaphore;

/// Generates a ping identifier that differs between sweeps
fn rand_id() -> u16 {
    use std::time::SystemTime;
    let duration = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    ((duration.as_nanos() % 0xFFFF) as u16).wrapping_add(1)
}

/// Ping every target once with at most `max_in_flight` concurrent pings.
///
/// Returns the number of hosts that replied. An unavailable ICMP socket (no
/// privileges) is not an error: the sweep is skipped and 0 is returned.
pub async fn ping_sweep(targets: &[Ipv4Addr], max_in_flight: usize, timeout: Duration) -> usize {
    if targets.is_empty() {
        return 0;
    }

    let client = match Client::new(&Config::default()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            crate::log_warn!("ICMP client unavailable ({}), skipping ping sweep", e);
            return 0;
        }
    };

    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let replies = Arc::new(AtomicUsize::new(0));
    let ident = rand_id();
    let payload = [0u8; 16];

    let mut handles = Vec::with_capacity(targets.len());

    for (seq, &ip) in targets.iter().enumerate() {
        let client = Arc::clone(&client);
        let semaphore = Arc::clone(&semaphore);
        let replies = Arc::clone(&replies);

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    crate::log_warn!("Ping semaphore acquire failed for {}: {}", ip, e);
                    return;
                }
            };

            let mut pinger = client.pinger(IpAddr::V4(ip), PingIdentifier(ident)).await;
            pinger.timeout(timeout);
            if pinger.ping(PingSequence(seq as u16), &payload).await.is_ok() {
                replies.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            crate::log_warn!("Ping task failed: {}", e);
        }
    }

    let count = replies.load(Ordering::Relaxed);
    crate::log_debug!(
        "Ping sweep: {}/{} hosts replied in {:?}",
        count,
        targets.len(),
        started.elapsed()
    );
    count
}
