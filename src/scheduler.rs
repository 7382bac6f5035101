//! # Scheduler
//!
//! The bridge's repeating background tasks:
//!
//! | Task | Period | Work |
//! |------|--------|------|
//! | detection | `detect_interval_ms` | [`Bridge::detect_controllers`] on the blocking pool |
//! | polling | `poll_interval_ms` | [`Bridge::poll_once`] |
//! | liveness | `liveness_interval_ms` | [`Bridge::reap_once`] |
//! | discovery | receive timeout | [`Discovery::listen`](crate::discovery::Discovery::listen) |
//!
//! Late ticks are skipped rather than bunched up, so a slow cycle never
//! causes a burst of polls. Every task inherits the `tracing` dispatcher that
//! was current when the scheduler started.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

use crate::bridge::Bridge;

pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    /// Spawns the background tasks. `listener` is the bound discovery
    /// socket, or `None` to run without discovery.
    pub fn start(bridge: Arc<Bridge>, listener: Option<UdpSocket>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let config = bridge.config().clone();
        let mut tasks = Vec::new();

        let detect_bridge = Arc::clone(&bridge);
        tasks.push((
            "detection",
            spawn(repeat(
                "detection",
                config.detect_interval(),
                shutdown_rx.clone(),
                move || {
                    let bridge = Arc::clone(&detect_bridge);
                    async move {
                        let result = tokio::task::spawn_blocking(move || {
                            bridge.detect_controllers(Instant::now())
                        })
                        .await;
                        if let Err(e) = result {
                            warn!("Controller detection failed: {}", e);
                        }
                    }
                },
            )),
        ));

        let poll_bridge = Arc::clone(&bridge);
        tasks.push((
            "polling",
            spawn(repeat(
                "polling",
                config.poll_interval(),
                shutdown_rx.clone(),
                move || {
                    poll_bridge.poll_once(Instant::now());
                    std::future::ready(())
                },
            )),
        ));

        let reap_bridge = Arc::clone(&bridge);
        tasks.push((
            "liveness",
            spawn(repeat(
                "liveness",
                config.liveness_interval(),
                shutdown_rx.clone(),
                move || {
                    reap_bridge.reap_once(Instant::now());
                    std::future::ready(())
                },
            )),
        ));

        if let Some(socket) = listener {
            let recv_timeout = Duration::from_millis(config.network.discovery_recv_timeout_ms);
            tasks.push((
                "discovery",
                spawn(Arc::clone(bridge.discovery()).listen(socket, recv_timeout, shutdown_rx)),
            ));
        }

        info!("Scheduler started {} tasks", tasks.len());
        Self { shutdown, tasks }
    }

    /// Signals every task to stop and waits up to `timeout` for all of them.
    /// Tasks still running after that are aborted.
    pub async fn shutdown(self, timeout: Duration) {
        // Receivers live inside the tasks; a send error means they all ended
        let _ = self.shutdown.send(true);
        let deadline = tokio::time::Instant::now() + timeout;

        for (name, mut handle) in self.tasks {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(task = name, "Scheduler task did not stop in time, aborting");
                handle.abort();
            }
        }
        info!("Scheduler stopped");
    }
}

fn spawn<F>(task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(task.with_current_subscriber())
}

/// Runs `tick` every `period` until `shutdown` becomes true.
async fn repeat<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => tick().await,
        }
    }
    debug!(task = name, "Scheduler task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_repeat_ticks_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = Arc::clone(&count);
        let handle = tokio::spawn(repeat("test", Duration::from_millis(16), rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        // First tick fires immediately, then every 16 ms
        let ticks = count.load(Ordering::SeqCst);
        assert!((6..=8).contains(&ticks), "ticks = {}", ticks);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(repeat("test", Duration::from_secs(1), rx, || {
            std::future::ready(())
        }));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task did not stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_stuck_task() {
        let (shutdown, _rx) = watch::channel(false);
        let stuck = tokio::spawn(std::future::pending::<()>());
        let scheduler = Scheduler {
            shutdown,
            tasks: vec![("stuck", stuck)],
        };

        let started = tokio::time::Instant::now();
        scheduler.shutdown(Duration::from_secs(2)).await;
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }
}
