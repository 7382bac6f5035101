//! # Transport Module
//!
//! Fire-and-forget UDP output.
//!
//! This module handles:
//! - A bounded outbound queue per send worker that never blocks the caller
//! - Routing every datagram for one target through the same worker, so a
//!   robot receives its packets in the order they were queued
//! - Replacing queued motion with the stop packet when the gate closes
//!   before a worker gets to it
//! - Counting sent, failed and dropped datagrams
//! - Draining the pool with a bounded wait on shutdown
//!
//! There is no retry and no acknowledgement tracking. A failed send is
//! logged and forgotten; a full queue drops the datagram.

pub mod socket;

pub use socket::{DatagramSender, UdpSender};

use bytes::Bytes;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

use crate::gate::CommandGate;

/// One datagram waiting for a worker.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub payload: Bytes,
    pub target: SocketAddr,
    /// Sent instead of `payload` if the gate no longer allows motion when
    /// the worker picks this datagram up. `None` for anything but motion.
    pub neutral: Option<Bytes>,
}

/// Lock-free transport counters.
#[derive(Debug, Default)]
pub struct TransportStats {
    sent: AtomicU64,
    bytes_sent: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

impl TransportStats {
    fn record_sent(&self, bytes: usize) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams_sent: self.sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TransportStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    pub dropped: u64,
}

/// Outbound lanes plus their workers, one worker per lane.
pub struct Transport {
    lanes: Mutex<Option<Vec<mpsc::Sender<Outbound>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<TransportStats>,
}

impl Transport {
    /// Spawns `workers` send tasks on the current tokio runtime.
    ///
    /// The caller's current `tracing` dispatcher is attached to every worker.
    ///
    /// # Arguments
    ///
    /// * `sender` - Socket (or mock) every datagram goes through
    /// * `gate` - Consulted again at send time for motion datagrams
    /// * `workers` - Number of concurrent send lanes (at least 1)
    /// * `capacity` - Queue length per lane before datagrams are dropped (at least 1)
    pub fn start(
        sender: Arc<dyn DatagramSender>,
        gate: Arc<CommandGate>,
        workers: usize,
        capacity: usize,
    ) -> Self {
        let stats = Arc::new(TransportStats::default());
        let mut lanes = Vec::new();
        let mut handles = Vec::new();

        for index in 0..workers.max(1) {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            lanes.push(tx);
            handles.push(tokio::spawn(
                send_worker(
                    index,
                    rx,
                    Arc::clone(&sender),
                    Arc::clone(&gate),
                    Arc::clone(&stats),
                )
                .with_current_subscriber(),
            ));
        }

        Self {
            lanes: Mutex::new(Some(lanes)),
            workers: Mutex::new(handles),
            stats,
        }
    }

    fn lanes(&self) -> MutexGuard<'_, Option<Vec<mpsc::Sender<Outbound>>>> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues one datagram without waiting. Returns false if it was dropped.
    pub fn submit(&self, payload: Bytes, target: SocketAddr) -> bool {
        self.enqueue(Outbound {
            payload,
            target,
            neutral: None,
        })
    }

    /// Queues a motion datagram together with the stop packet that replaces
    /// it if motion is no longer allowed at send time.
    pub fn submit_motion(&self, payload: Bytes, neutral: Bytes, target: SocketAddr) -> bool {
        self.enqueue(Outbound {
            payload,
            target,
            neutral: Some(neutral),
        })
    }

    fn enqueue(&self, outbound: Outbound) -> bool {
        let target = outbound.target;
        let lanes = self.lanes();
        let Some(lanes) = lanes.as_ref().filter(|lanes| !lanes.is_empty()) else {
            self.stats.record_drop();
            debug!(%target, "Transport closed, datagram dropped");
            return false;
        };

        match lanes[lane_for(&target, lanes.len())].try_send(outbound) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stats.record_drop();
                warn!(%target, "Send queue full, datagram dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.record_drop();
                debug!(%target, "Transport closed, datagram dropped");
                false
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lanes().is_none()
    }

    /// Closes the lanes, lets the workers drain what is already queued and
    /// waits for them up to `timeout`. Workers still running after that are
    /// aborted. Later submissions are dropped.
    pub async fn shutdown(&self, timeout: Duration) {
        self.lanes().take();

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        let deadline = tokio::time::Instant::now() + timeout;

        let mut aborted = 0;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                aborted += 1;
            }
        }

        if aborted > 0 {
            warn!("Transport shutdown timed out, aborted {} send workers", aborted);
        } else {
            info!("Transport drained");
        }
    }
}

/// Lane index for `target`; stable for the life of the process.
fn lane_for(target: &SocketAddr, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    target.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

async fn send_worker(
    index: usize,
    mut queue: mpsc::Receiver<Outbound>,
    sender: Arc<dyn DatagramSender>,
    gate: Arc<CommandGate>,
    stats: Arc<TransportStats>,
) {
    while let Some(outbound) = queue.recv().await {
        let payload = match outbound.neutral {
            Some(neutral) if !gate.allows_motion() => {
                debug!(
                    worker = index,
                    target = %outbound.target,
                    "Queued motion replaced by stop"
                );
                neutral
            }
            _ => outbound.payload,
        };

        match sender.send_to(&payload, outbound.target).await {
            Ok(written) => stats.record_sent(written),
            Err(e) => {
                stats.record_failure();
                debug!(worker = index, target = %outbound.target, "Send failed: {}", e);
            }
        }
    }
    debug!(worker = index, "Send worker stopped");
}
