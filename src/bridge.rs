//! # Bridge
//!
//! Owns every registry and exposes the operations a UI or HTTP layer calls.
//!
//! ## Command pipeline
//!
//! Each poll cycle, for every tracked controller:
//!
//! 1. Poll the device (failure: skip, detection reaps it later)
//! 2. Skip if disabled
//! 3. Normalize and store the snapshot
//! 4. Look up the paired robot (none: nothing is sent)
//! 5. Send motion or stop; the gate downgrades motion when not allowed
//!
//! An error for one controller is logged and never stops the others.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::controller::{
    normalize, Calibration, ControllerRegistry, ControllerView, Detection, EvdevBackend,
    InputBackend,
};
use crate::discovery::{bind_listener, Discovery};
use crate::error::{BridgeError, Result};
use crate::gate::{CommandGate, GateState};
use crate::match_timer::{MatchStatus, MatchTimer};
use crate::pairing::PairingTable;
use crate::protocol::{DiscoveryMessage, MatchState};
use crate::robot::{RobotRegistry, RobotView};
use crate::scheduler::Scheduler;
use crate::transport::{DatagramSender, StatsSnapshot, Transport, UdpSender};

pub struct Bridge {
    config: Config,
    calibration: Calibration,
    backend: Arc<dyn InputBackend>,
    controllers: ControllerRegistry,
    pairings: PairingTable,
    gate: Arc<CommandGate>,
    robots: Arc<RobotRegistry>,
    transport: Arc<Transport>,
    discovery: Arc<Discovery>,
    match_timer: MatchTimer,
    scheduler: tokio::sync::Mutex<Option<Scheduler>>,
    // Serializes pair/unpair so the back-reference follows the table
    pairing_lock: Mutex<()>,
}

impl Bridge {
    /// Builds a bridge around an input backend and a datagram sender.
    ///
    /// Spawns the send workers, so it must run inside a tokio runtime.
    /// Static robots from the configuration are registered right away.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration does not validate.
    pub fn new(
        config: Config,
        backend: Arc<dyn InputBackend>,
        sender: Arc<dyn DatagramSender>,
    ) -> Result<Self> {
        config.validate()?;

        let broadcast_ip: IpAddr = config
            .network
            .broadcast_address
            .parse()
            .map_err(|_| BridgeError::InvalidAddress(config.network.broadcast_address.clone()))?;

        let calibration = Calibration::new(
            config.controller.deadzone,
            config.controller.movement_threshold,
        );
        let gate = Arc::new(CommandGate::new());
        let transport = Arc::new(Transport::start(
            sender,
            Arc::clone(&gate),
            config.network.send_workers,
            config.network.send_queue_capacity,
        ));
        let robots = Arc::new(RobotRegistry::new(
            Arc::clone(&gate),
            Arc::clone(&transport),
            config.network.command_port,
        ));
        let discovery = Arc::new(Discovery::new(
            Arc::clone(&robots),
            Arc::clone(&transport),
            broadcast_ip,
            config.network.discovery_port,
        ));

        let now = Instant::now();
        for robot in &config.robots.static_robots {
            robots.register(&robot.name, &robot.address, now)?;
        }

        Ok(Self {
            match_timer: MatchTimer::new(Duration::from_secs(config.match_settings.duration_s)),
            config,
            calibration,
            backend,
            controllers: ControllerRegistry::new(),
            pairings: PairingTable::new(),
            gate,
            robots,
            transport,
            discovery,
            scheduler: tokio::sync::Mutex::new(None),
            pairing_lock: Mutex::new(()),
        })
    }

    /// Builds a bridge on real hardware: an evdev backend and a UDP socket
    /// on `[network].bind_address` with an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the socket cannot be bound, `Config` on invalid
    /// configuration.
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;
        let bind_ip = bind_ip(&config)?;
        let local = SocketAddr::new(bind_ip, 0);
        let sender = UdpSender::bind(local).await.map_err(|e| {
            BridgeError::Transport(format!("Failed to bind command socket on {}: {}", local, e))
        })?;
        info!("Command socket bound to {}", sender.local_addr()?);

        let backend = EvdevBackend::new(config.controller.vendor_keywords.clone());
        Self::new(config, Arc::new(backend), Arc::new(sender))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    fn pairing_guard(&self) -> MutexGuard<'_, ()> {
        self.pairing_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ==================== Lifecycle ====================

    /// Binds the discovery socket (if enabled) and starts the background
    /// tasks. Runs one detection cycle first so controllers are available
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if already started, `Transport` if the discovery port
    /// cannot be bound.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() {
            return Err(BridgeError::Rejected("Bridge already started".to_string()));
        }

        let listener = if self.config.network.discovery_enabled {
            Some(bind_listener(bind_ip(&self.config)?, self.config.network.discovery_port).await?)
        } else {
            None
        };

        self.refresh_controllers().await;
        *scheduler = Some(Scheduler::start(Arc::clone(self), listener));
        info!(
            robots = self.robots.len(),
            controllers = self.controllers.len(),
            "Bridge started"
        );
        Ok(())
    }

    /// Stops the background tasks, sends a final stop to every robot and
    /// drains the send queue, each with the configured bounded wait.
    pub async fn shutdown(&self) {
        let timeout = self.config.shutdown_timeout();

        if let Some(scheduler) = self.scheduler.lock().await.take() {
            scheduler.shutdown(timeout).await;
        }

        let stopped = self.robots.stop_all(Instant::now());
        debug!("Final stop sent to {} robots", stopped);

        self.transport.shutdown(timeout).await;
        info!("Bridge shut down");
    }

    // ==================== Periodic work ====================

    /// One pass of the command pipeline over every tracked controller.
    /// Returns the number of commands queued.
    pub fn poll_once(&self, now: Instant) -> usize {
        let mut sent = 0;

        for id in self.controllers.ids() {
            let sample = match self.backend.poll(&id) {
                Ok(sample) => sample,
                Err(e) => {
                    debug!(controller = %id, "Poll failed: {}", e);
                    continue;
                }
            };

            if !self.controllers.is_enabled(&id) {
                continue;
            }

            let input = normalize(&sample, self.calibration);
            self.controllers.record_snapshot(&id, input.clone(), now);

            let Some(robot_id) = self.pairings.lookup(&id) else {
                continue;
            };

            match self.robots.send_command(&robot_id, &input, now) {
                Ok(()) => sent += 1,
                Err(e) => debug!(controller = %id, robot = %robot_id, "Command not sent: {}", e),
            }
        }

        sent
    }

    /// One detection cycle. Removed controllers lose their pairing, and the
    /// robot they drove gets a stop.
    pub fn detect_controllers(&self, now: Instant) -> Detection {
        let detection = self
            .controllers
            .detect(self.backend.as_ref(), self.calibration, now);

        for id in &detection.removed {
            if let Some(robot_id) = self.drop_pairing(id) {
                if let Err(e) = self.robots.send_stop(&robot_id, now) {
                    debug!(robot = %robot_id, "Stop not sent: {}", e);
                }
            }
        }

        detection
    }

    /// Reaps silent robots and ends an expired match.
    pub fn reap_once(&self, now: Instant) {
        for robot in self.robots.reap_stale(self.config.robot_timeout(), now) {
            let unpaired = self.pairings.remove_robot(&robot.id);
            if !unpaired.is_empty() {
                info!(robot = %robot.id, "Unpaired {} controllers from timed-out robot", unpaired.len());
            }
        }

        if self.match_timer.is_expired(now) {
            info!("Match time expired");
            self.stop_match();
        }
    }

    // ==================== Robots ====================

    /// Registers a robot by name at `ip` or `ip:port`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` for an unparseable address.
    pub fn register_robot(&self, name: &str, address: &str) -> Result<RobotView> {
        let now = Instant::now();
        Ok(self.robots.register(name, address, now)?.view(now))
    }

    /// Forgets a robot and every pairing that targets it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRobot` if it is not registered.
    pub fn remove_robot(&self, robot_id: &str) -> Result<()> {
        let _guard = self.pairing_guard();
        self.robots
            .remove(robot_id)
            .ok_or_else(|| BridgeError::UnknownRobot(robot_id.to_string()))?;
        self.pairings.remove_robot(robot_id);
        info!(robot = %robot_id, "Robot removed");
        Ok(())
    }

    /// Promotes a discovered robot to connected.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRobot` if it is not registered.
    pub fn connect_robot(&self, robot_id: &str) -> Result<()> {
        self.robots.connect(robot_id, Instant::now())
    }

    #[must_use]
    pub fn list_robots(&self) -> Vec<RobotView> {
        self.robots.list(Instant::now())
    }

    // ==================== Controllers and pairing ====================

    /// Pairs a controller with a robot, replacing any previous pairing of
    /// that controller.
    ///
    /// # Errors
    ///
    /// Returns `UnknownController` or `UnknownRobot`; nothing is changed.
    pub fn pair(&self, controller_id: &str, robot_id: &str) -> Result<()> {
        let _guard = self.pairing_guard();

        if !self.controllers.contains(controller_id) {
            warn!(controller = %controller_id, "Cannot pair unknown controller");
            return Err(BridgeError::UnknownController(controller_id.to_string()));
        }
        if !self.robots.contains(robot_id) {
            warn!(robot = %robot_id, "Cannot pair with unknown robot");
            return Err(BridgeError::UnknownRobot(robot_id.to_string()));
        }

        if let Some(previous) = self.pairings.pair(controller_id, robot_id) {
            if previous != robot_id {
                self.robots.clear_paired(&previous, controller_id);
            }
        }
        self.robots.set_paired(robot_id, controller_id);
        info!(controller = %controller_id, robot = %robot_id, "Paired");
        Ok(())
    }

    /// Removes a pairing and sends a stop to the robot it pointed at.
    /// Returns that robot's id.
    pub fn unpair(&self, controller_id: &str) -> Option<String> {
        let robot_id = {
            let _guard = self.pairing_guard();
            self.drop_pairing(controller_id)?
        };
        if let Err(e) = self.robots.send_stop(&robot_id, Instant::now()) {
            debug!(robot = %robot_id, "Stop not sent: {}", e);
        }
        info!(controller = %controller_id, robot = %robot_id, "Unpaired");
        Some(robot_id)
    }

    fn drop_pairing(&self, controller_id: &str) -> Option<String> {
        let robot_id = self.pairings.unpair(controller_id)?;
        self.robots.clear_paired(&robot_id, controller_id);
        Some(robot_id)
    }

    #[must_use]
    pub fn paired_robot(&self, controller_id: &str) -> Option<String> {
        self.pairings.lookup(controller_id)
    }

    /// # Errors
    ///
    /// Returns `UnknownController` if the controller is not attached.
    pub fn enable(&self, controller_id: &str) -> Result<()> {
        if !self.controllers.set_enabled(controller_id, true) {
            return Err(BridgeError::UnknownController(controller_id.to_string()));
        }
        info!(controller = %controller_id, "Controller enabled");
        Ok(())
    }

    /// Disables a controller and stops its paired robot.
    ///
    /// # Errors
    ///
    /// Returns `UnknownController` if the controller is not attached.
    pub fn disable(&self, controller_id: &str) -> Result<()> {
        if !self.controllers.set_enabled(controller_id, false) {
            return Err(BridgeError::UnknownController(controller_id.to_string()));
        }
        if let Some(robot_id) = self.pairings.lookup(controller_id) {
            if let Err(e) = self.robots.send_stop(&robot_id, Instant::now()) {
                debug!(robot = %robot_id, "Stop not sent: {}", e);
            }
        }
        info!(controller = %controller_id, "Controller disabled");
        Ok(())
    }

    #[must_use]
    pub fn list_controllers(&self) -> Vec<ControllerView> {
        self.controllers
            .list(Instant::now(), self.config.connection_timeout())
    }

    /// Runs one detection cycle now, off the async executor.
    pub async fn refresh_controllers(self: &Arc<Self>) -> Detection {
        let bridge = Arc::clone(self);
        match tokio::task::spawn_blocking(move || bridge.detect_controllers(Instant::now())).await {
            Ok(detection) => detection,
            Err(e) => {
                warn!("Controller detection task failed: {}", e);
                Detection::default()
            }
        }
    }

    // ==================== Gate and match ====================

    /// Sets the emergency stop, stops every robot and broadcasts `ESTOP`.
    pub fn activate_emergency_stop(&self) {
        self.gate.activate_emergency_stop();
        let stopped = self.robots.stop_all(Instant::now());
        self.discovery.broadcast(&DiscoveryMessage::EmergencyStop);
        warn!("EMERGENCY STOP activated ({} robots stopped)", stopped);
    }

    /// Clears the emergency stop and broadcasts `ESTOP_OFF`. Does not
    /// resume motion; teleop must be started again if it was stopped.
    pub fn deactivate_emergency_stop(&self) {
        self.gate.deactivate_emergency_stop();
        self.discovery.broadcast(&DiscoveryMessage::EmergencyStopRelease);
        info!("Emergency stop released");
    }

    #[must_use]
    pub fn is_emergency_stop_active(&self) -> bool {
        self.gate.is_emergency_stop_active()
    }

    #[must_use]
    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    /// Enters TELEOP and tells every robot.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` while the emergency stop is active.
    pub fn start_teleop(&self) -> Result<()> {
        self.gate.start_teleop()?;
        self.robots.status_all(MatchState::Teleop);
        info!("Teleop started");
        Ok(())
    }

    /// Enters STANDBY, tells every robot and stops them.
    pub fn stop_teleop(&self) {
        self.gate.stop_teleop();
        self.announce_standby();
        info!("Teleop stopped");
    }

    fn announce_standby(&self) {
        self.robots.status_all(MatchState::Standby);
        self.robots.stop_all(Instant::now());
    }

    /// Starts the match timer and teleop.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` while the emergency stop is active.
    pub fn start_match(&self) -> Result<()> {
        self.start_teleop()?;
        if self.match_timer.start(Instant::now()) {
            info!("Match started ({} s)", self.match_timer.status(Instant::now()).duration_ms / 1000);
        }
        Ok(())
    }

    pub fn stop_match(&self) {
        self.match_timer.stop();
        self.stop_teleop();
    }

    /// Stops the timer and returns to STANDBY.
    pub fn reset_match(&self) {
        self.match_timer.reset();
        self.gate.reset_match();
        self.announce_standby();
        info!("Match reset");
    }

    /// # Errors
    ///
    /// Returns `Rejected` for a zero duration.
    pub fn set_match_duration(&self, seconds: u64) -> Result<()> {
        if seconds == 0 {
            return Err(BridgeError::Rejected("Match duration must be positive".to_string()));
        }
        self.match_timer.set_duration(Duration::from_secs(seconds));
        info!("Match duration set to {} s", seconds);
        Ok(())
    }

    #[must_use]
    pub fn match_status(&self) -> MatchStatus {
        self.match_timer.status(Instant::now())
    }

    // ==================== Network ====================

    #[must_use]
    pub fn network_stats(&self) -> StatsSnapshot {
        self.transport.stats()
    }

    /// Broadcasts discovery probes. Returns false if a probe is already running.
    pub fn broadcast_discovery(&self) -> bool {
        self.discovery.probe()
    }
}

fn bind_ip(config: &Config) -> Result<IpAddr> {
    config
        .network
        .bind_address
        .parse()
        .map_err(|_| BridgeError::InvalidAddress(config.network.bind_address.clone()))
}
