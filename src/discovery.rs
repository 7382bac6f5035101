//! # Discovery Module
//!
//! Listens on the discovery port and keeps the robot registry in step with
//! what robots announce about themselves.
//!
//! ## Inbound
//!
//! - Firmware pings refresh (or create) a discovered robot
//! - Legacy JSON registrations create the robot and are acknowledged
//! - Status reports touch the robot they name
//! - Our own broadcasts looping back are ignored
//!
//! ## Outbound
//!
//! Broadcast probes and the emergency-stop tokens go to the broadcast
//! address on the discovery port.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::protocol::DiscoveryMessage;
use crate::robot::RobotRegistry;
use crate::transport::Transport;

/// Number of probes sent by one [`Discovery::probe`] call.
pub const PROBE_COUNT: usize = 3;

/// Gap between two probes.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);

const MAX_DATAGRAM: usize = 1024;

pub struct Discovery {
    robots: Arc<RobotRegistry>,
    transport: Arc<Transport>,
    discovery_port: u16,
    broadcast: SocketAddr,
    probing: AtomicBool,
}

impl Discovery {
    /// # Arguments
    ///
    /// * `broadcast_ip` - Destination of probes and emergency-stop tokens
    /// * `discovery_port` - Port robots listen and announce on
    pub fn new(
        robots: Arc<RobotRegistry>,
        transport: Arc<Transport>,
        broadcast_ip: IpAddr,
        discovery_port: u16,
    ) -> Self {
        Self {
            robots,
            transport,
            discovery_port,
            broadcast: SocketAddr::new(broadcast_ip, discovery_port),
            probing: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn broadcast_address(&self) -> SocketAddr {
        self.broadcast
    }

    /// Applies one inbound datagram to the robot registry.
    ///
    /// # Errors
    ///
    /// Returns `Protocol`/`Json` for malformed messages. Nothing is changed
    /// in that case.
    pub fn handle_datagram(&self, raw: &[u8], from: SocketAddr, now: Instant) -> Result<()> {
        match DiscoveryMessage::parse(raw)? {
            DiscoveryMessage::Ping { robot_id, address } => {
                if self.robots.upsert_discovered(&robot_id, &robot_id, address, now) {
                    info!(robot = %robot_id, %address, "Robot announced itself");
                }
            }
            DiscoveryMessage::Registration(descriptor) => {
                self.robots
                    .upsert_discovered(&descriptor.id, &descriptor.name, from.ip(), now);
                let ack = DiscoveryMessage::Ack.encode()?;
                self.transport.submit(
                    ack.into_bytes().into(),
                    SocketAddr::new(from.ip(), self.discovery_port),
                );
                info!(robot = %descriptor.id, name = %descriptor.name, %from, "Robot registered via discovery");
            }
            DiscoveryMessage::Status(status) => {
                match self.robots.touch_by_name(&status.robot_name, now) {
                    Some(id) => debug!(robot = %id, status = %status.status, "Robot status"),
                    None => debug!(robot = %status.robot_name, "Status from unknown robot"),
                }
            }
            DiscoveryMessage::Probe
            | DiscoveryMessage::Ack
            | DiscoveryMessage::EmergencyStop
            | DiscoveryMessage::EmergencyStopRelease => {}
        }
        Ok(())
    }

    /// Broadcasts one message to the discovery port.
    pub fn broadcast(&self, message: &DiscoveryMessage) -> bool {
        match message.encode() {
            Ok(text) => self.transport.submit(text.into_bytes().into(), self.broadcast),
            Err(e) => {
                warn!("Failed to encode discovery message: {}", e);
                false
            }
        }
    }

    /// Sends [`PROBE_COUNT`] probes, [`PROBE_INTERVAL`] apart, in the
    /// background. Returns false if a probe run is already in progress.
    pub fn probe(self: &Arc<Self>) -> bool {
        if self.probing.swap(true, Ordering::SeqCst) {
            debug!("Discovery probe already running");
            return false;
        }

        let discovery = Arc::clone(self);
        tokio::spawn(
            async move {
                for attempt in 0..PROBE_COUNT {
                    if attempt > 0 {
                        tokio::time::sleep(PROBE_INTERVAL).await;
                    }
                    discovery.broadcast(&DiscoveryMessage::Probe);
                    debug!(attempt = attempt + 1, "Discovery probe sent");
                }
                discovery.probing.store(false, Ordering::SeqCst);
            }
            .with_current_subscriber(),
        );
        true
    }

    /// Receives on `socket` until `shutdown` flips to true.
    ///
    /// Every receive is bounded by `recv_timeout`, so the loop never blocks
    /// indefinitely. Bad datagrams are logged and discarded.
    pub async fn listen(
        self: Arc<Self>,
        socket: UdpSocket,
        recv_timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut buf = [0u8; MAX_DATAGRAM];
        info!("Discovery listener started on {:?}", socket.local_addr().ok());

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                received = tokio::time::timeout(recv_timeout, socket.recv_from(&mut buf)) => {
                    match received {
                        Err(_) => {}
                        Ok(Ok((len, from))) => {
                            if let Err(e) = self.handle_datagram(&buf[..len], from, Instant::now()) {
                                debug!(%from, "Discarded discovery datagram: {}", e);
                            }
                        }
                        Ok(Err(e)) => {
                            warn!("Discovery receive failed: {}", e);
                            tokio::time::sleep(recv_timeout).await;
                        }
                    }
                }
            }
        }

        info!("Discovery listener stopped");
    }
}

/// Binds the inbound discovery socket.
///
/// # Errors
///
/// Returns `Transport` if the port is taken.
pub async fn bind_listener(bind_ip: IpAddr, discovery_port: u16) -> Result<UdpSocket> {
    let local = SocketAddr::new(bind_ip, discovery_port);
    let socket = UdpSocket::bind(local).await.map_err(|e| {
        BridgeError::Transport(format!("Failed to bind discovery socket on {}: {}", local, e))
    })?;
    socket.set_broadcast(true)?;
    Ok(socket)
}
