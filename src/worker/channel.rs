//! Bounded, unidirectional batch channel
//!
//! Scanner side holds the `BatchSender`, the reconciler side the
//! `BatchReceiver`. Batches are delivered whole and in FIFO order.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::StopSignal;
use crate::models::DiscoveryBatch;

/// How long a blocked send waits before rechecking the stop signal
const SEND_RETRY: Duration = Duration::from_secs(1);

/// Result of a send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Stop signal tripped while the channel was full
    Stopped,
    /// Receiver dropped
    Closed,
}

/// Result of a receive attempt
#[derive(Debug, PartialEq)]
pub enum RecvOutcome {
    Batch(DiscoveryBatch),
    /// No batch within the wait window
    Empty,
    /// All senders dropped and the buffer is drained
    Closed,
}

#[derive(Debug, Clone)]
pub struct BatchSender {
    tx: mpsc::Sender<DiscoveryBatch>,
}

#[derive(Debug)]
pub struct BatchReceiver {
    rx: mpsc::Receiver<DiscoveryBatch>,
}

/// Create a channel holding at most `capacity` pending batches.
pub fn result_channel(capacity: usize) -> (BatchSender, BatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BatchSender { tx }, BatchReceiver { rx })
}

impl BatchSender {
    /// Send one batch, waiting for room while the stop signal is clear.
    pub async fn send(&self, batch: DiscoveryBatch, stop: &StopSignal) -> SendOutcome {
        loop {
            if stop.is_stopped() {
                return SendOutcome::Stopped;
            }

            match tokio::time::timeout(SEND_RETRY, self.tx.reserve()).await {
                Ok(Ok(permit)) => {
                    permit.send(batch);
                    return SendOutcome::Sent;
                }
                Ok(Err(_)) => return SendOutcome::Closed,
                Err(_) => {
                    crate::log_debug!("Result channel full, waiting");
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl BatchReceiver {
    /// Wait up to `wait` for the next batch.
    pub async fn recv_timeout(&mut self, wait: Duration) -> RecvOutcome {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(batch)) => RecvOutcome::Batch(batch),
            Ok(None) => RecvOutcome::Closed,
            Err(_) => RecvOutcome::Empty,
        }
    }

    /// Take the next batch without waiting.
    pub fn try_recv(&mut self) -> RecvOutcome {
        match self.rx.try_recv() {
            Ok(batch) => RecvOutcome::Batch(batch),
            Err(TryRecvError::Empty) => RecvOutcome::Empty,
            Err(TryRecvError::Disconnected) => RecvOutcome::Closed,
        }
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscoveryRecord;

    fn batch(mac: &str) -> DiscoveryBatch {
        vec![DiscoveryRecord::new(mac, "192.168.1.10")]
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let (tx, mut rx) = result_channel(4);
        let stop = StopSignal::new();

        assert_eq!(tx.send(batch("AC:DE:48:00:00:01"), &stop).await, SendOutcome::Sent);
        assert_eq!(tx.send(batch("AC:DE:48:00:00:02"), &stop).await, SendOutcome::Sent);

        assert_eq!(
            rx.recv_timeout(Duration::from_millis(50)).await,
            RecvOutcome::Batch(batch("AC:DE:48:00:00:01"))
        );
        assert_eq!(rx.try_recv(), RecvOutcome::Batch(batch("AC:DE:48:00:00:02")));
        assert_eq!(rx.try_recv(), RecvOutcome::Empty);
    }

    #[tokio::test]
    async fn test_empty_and_closed() {
        let (tx, mut rx) = result_channel(1);

        assert_eq!(rx.recv_timeout(Duration::from_millis(20)).await, RecvOutcome::Empty);
        drop(tx);
        assert_eq!(rx.recv_timeout(Duration::from_millis(20)).await, RecvOutcome::Closed);
        assert_eq!(rx.try_recv(), RecvOutcome::Closed);
    }

    #[tokio::test]
    async fn test_full_channel_yields_to_stop() {
        let (tx, _rx) = result_channel(1);
        let stop = StopSignal::new();

        assert_eq!(tx.send(batch("AC:DE:48:00:00:01"), &stop).await, SendOutcome::Sent);

        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.stop();
        });

        assert_eq!(tx.send(batch("AC:DE:48:00:00:02"), &stop).await, SendOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (tx, rx) = result_channel(1);
        drop(rx);

        assert!(tx.is_closed());
        assert_eq!(
            tx.send(batch("AC:DE:48:00:00:01"), &StopSignal::new()).await,
            SendOutcome::Closed
        );
    }
}
