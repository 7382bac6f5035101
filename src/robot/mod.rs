//! # Robot Module
//!
//! Known robot endpoints and the command path to them.
//!
//! This module handles:
//! - Manual registration (`name` + `ip[:port]`) and discovered robots
//! - Liveness (`last_seen`) and reaping of silent robots
//! - Sending motion, stop and status messages through the command gate
//!
//! Every packet addressed to a robot passes [`CommandGate::admit`] right
//! before it is queued, so no caller can get motion past an active
//! emergency stop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::controller::input::NormalizedInput;
use crate::error::{BridgeError, Result};
use crate::gate::CommandGate;
use crate::protocol::{CommandPacket, MatchState, StatusMessage};
use crate::transport::Transport;

/// Firmware pings every 2 s; three missed pings mark a robot silent.
const SILENT_AFTER: Duration = Duration::from_secs(6);

/// Parses `"ip"` or `"ip:port"`. A bare IP gets `default_port`.
///
/// # Errors
///
/// Returns `InvalidAddress` for anything else.
///
/// # Examples
///
/// ```
/// use teleop_bridge::robot::parse_robot_address;
///
/// let addr = parse_robot_address("10.0.0.5", 2367).unwrap();
/// assert_eq!(addr.to_string(), "10.0.0.5:2367");
///
/// let addr = parse_robot_address("10.0.0.5:4000", 2367).unwrap();
/// assert_eq!(addr.port(), 4000);
///
/// assert!(parse_robot_address("robot.local", 2367).is_err());
/// ```
pub fn parse_robot_address(address: &str, default_port: u16) -> Result<SocketAddr> {
    let address = address.trim();
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }
    address
        .parse::<SocketAddr>()
        .map_err(|_| BridgeError::InvalidAddress(address.to_string()))
}

/// How the robot became known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotOrigin {
    Manual,
    Discovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotStatus {
    /// Seen on the network, not yet accepted by an operator.
    Discovered,
    Connected,
    /// Known but silent for longer than a few ping periods.
    Disconnected,
}

/// One known robot.
#[derive(Debug, Clone)]
pub struct RobotEndpoint {
    pub id: String,
    pub display_name: String,
    pub address: SocketAddr,
    pub last_seen: Instant,
    pub last_command_sent: Option<Instant>,
    pub paired_controller_id: Option<String>,
    pub status: RobotStatus,
    pub origin: RobotOrigin,
    last_seen_wall: DateTime<Utc>,
    last_command_wall: Option<DateTime<Utc>>,
}

impl RobotEndpoint {
    fn new(id: &str, display_name: &str, address: SocketAddr, origin: RobotOrigin, now: Instant) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            address,
            last_seen: now,
            last_command_sent: None,
            paired_controller_id: None,
            status: match origin {
                RobotOrigin::Manual => RobotStatus::Connected,
                RobotOrigin::Discovered => RobotStatus::Discovered,
            },
            origin,
            last_seen_wall: Utc::now(),
            last_command_wall: None,
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_seen = now;
        self.last_seen_wall = Utc::now();
    }

    /// Stored status, reported as `Disconnected` once the robot went silent.
    #[must_use]
    pub fn status_at(&self, now: Instant) -> RobotStatus {
        if now.saturating_duration_since(self.last_seen) > SILENT_AFTER {
            RobotStatus::Disconnected
        } else {
            self.status
        }
    }

    #[must_use]
    pub fn view(&self, now: Instant) -> RobotView {
        RobotView {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            address: self.address.to_string(),
            status: self.status_at(now),
            origin: self.origin,
            paired_controller_id: self.paired_controller_id.clone(),
            last_seen: self.last_seen_wall,
            last_command_sent: self.last_command_wall,
        }
    }
}

/// Serializable listing entry for a robot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotView {
    pub id: String,
    pub display_name: String,
    pub address: String,
    pub status: RobotStatus,
    pub origin: RobotOrigin,
    pub paired_controller_id: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub last_command_sent: Option<DateTime<Utc>>,
}

/// Thread-safe robot map plus the gated command path.
pub struct RobotRegistry {
    endpoints: RwLock<HashMap<String, RobotEndpoint>>,
    gate: Arc<CommandGate>,
    transport: Arc<Transport>,
    command_port: u16,
}

impl RobotRegistry {
    /// # Arguments
    ///
    /// * `gate` - Checked before every outbound packet
    /// * `transport` - Queue every datagram goes through
    /// * `command_port` - Port used when an address has none
    pub fn new(gate: Arc<CommandGate>, transport: Arc<Transport>, command_port: u16) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            gate,
            transport,
            command_port,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, RobotEndpoint>> {
        self.endpoints.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, RobotEndpoint>> {
        self.endpoints.write().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn command_port(&self) -> u16 {
        self.command_port
    }

    /// Registers (or updates) a robot by name. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if `address` is not `ip` or `ip:port`, and
    /// `Rejected` for an empty name.
    pub fn register(&self, name: &str, address: &str, now: Instant) -> Result<RobotEndpoint> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BridgeError::Rejected("Robot name must not be empty".to_string()));
        }
        let address = parse_robot_address(address, self.command_port)?;

        let mut endpoints = self.write();
        let endpoint = endpoints
            .entry(name.to_string())
            .and_modify(|e| {
                e.address = address;
                e.origin = RobotOrigin::Manual;
                e.status = RobotStatus::Connected;
                e.touch(now);
            })
            .or_insert_with(|| RobotEndpoint::new(name, name, address, RobotOrigin::Manual, now));

        info!(robot = %name, %address, "Robot registered");
        Ok(endpoint.clone())
    }

    /// Records a robot heard on the discovery port. New robots start as
    /// `Discovered`; known ones get their address and `last_seen` refreshed.
    /// Returns true if the robot was new.
    pub fn upsert_discovered(&self, id: &str, display_name: &str, ip: IpAddr, now: Instant) -> bool {
        let mut endpoints = self.write();
        match endpoints.get_mut(id) {
            Some(endpoint) => {
                if endpoint.address.ip() != ip {
                    info!(robot = %id, old = %endpoint.address.ip(), new = %ip, "Robot address changed");
                    endpoint.address = SocketAddr::new(ip, endpoint.address.port());
                }
                endpoint.touch(now);
                false
            }
            None => {
                let address = SocketAddr::new(ip, self.command_port);
                info!(robot = %id, %address, "Robot discovered");
                endpoints.insert(
                    id.to_string(),
                    RobotEndpoint::new(id, display_name, address, RobotOrigin::Discovered, now),
                );
                true
            }
        }
    }

    /// Promotes a discovered robot to `Connected`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRobot` if `id` is not registered.
    pub fn connect(&self, id: &str, now: Instant) -> Result<()> {
        let mut endpoints = self.write();
        let endpoint = endpoints
            .get_mut(id)
            .ok_or_else(|| BridgeError::UnknownRobot(id.to_string()))?;
        endpoint.status = RobotStatus::Connected;
        endpoint.touch(now);
        info!(robot = %id, "Robot connected");
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Option<RobotEndpoint> {
        self.write().remove(id)
    }

    /// Updates `last_seen`. Returns false for an unknown id.
    pub fn touch(&self, id: &str, now: Instant) -> bool {
        match self.write().get_mut(id) {
            Some(endpoint) => {
                endpoint.touch(now);
                true
            }
            None => false,
        }
    }

    /// Touches the robot whose id or display name is `name`. Returns its id.
    pub fn touch_by_name(&self, name: &str, now: Instant) -> Option<String> {
        let mut endpoints = self.write();
        if let Some(endpoint) = endpoints.get_mut(name) {
            endpoint.touch(now);
            return Some(endpoint.id.clone());
        }
        endpoints
            .values_mut()
            .find(|e| e.display_name == name)
            .map(|endpoint| {
                endpoint.touch(now);
                endpoint.id.clone()
            })
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<RobotEndpoint> {
        self.read().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// All endpoints sorted by id.
    #[must_use]
    pub fn all(&self) -> Vec<RobotEndpoint> {
        let mut all: Vec<RobotEndpoint> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    #[must_use]
    pub fn list(&self, now: Instant) -> Vec<RobotView> {
        self.all().iter().map(|e| e.view(now)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Removes every endpoint not seen for longer than `timeout`. Returns
    /// the removed endpoints.
    pub fn reap_stale(&self, timeout: Duration, now: Instant) -> Vec<RobotEndpoint> {
        let mut endpoints = self.write();
        let stale: Vec<String> = endpoints
            .values()
            .filter(|e| now.saturating_duration_since(e.last_seen) > timeout)
            .map(|e| e.id.clone())
            .collect();

        stale
            .iter()
            .filter_map(|id| endpoints.remove(id))
            .inspect(|e| info!(robot = %e.id, "Robot timed out"))
            .collect()
    }

    /// Sets the back-reference to the controller that drives this robot.
    pub fn set_paired(&self, robot_id: &str, controller_id: &str) -> bool {
        match self.write().get_mut(robot_id) {
            Some(endpoint) => {
                endpoint.paired_controller_id = Some(controller_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Clears the back-reference if it still points at `controller_id`.
    pub fn clear_paired(&self, robot_id: &str, controller_id: &str) {
        if let Some(endpoint) = self.write().get_mut(robot_id) {
            if endpoint.paired_controller_id.as_deref() == Some(controller_id) {
                endpoint.paired_controller_id = None;
            }
        }
    }

    /// Sends a motion command built from `input`. Downgraded to a stop by
    /// the gate unless motion is allowed, and to a stop anyway if `input`
    /// has no movement. The gate is checked again when the datagram leaves
    /// the queue.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRobot` if `robot_id` is not registered. Transport
    /// failures are not errors.
    pub fn send_command(&self, robot_id: &str, input: &NormalizedInput, now: Instant) -> Result<()> {
        let (name, address) = self.mark_command(robot_id, now)?;
        let stop = CommandPacket::stop(&name).encode();
        if !input.has_movement() {
            self.transport.submit(stop, address);
            return Ok(());
        }

        let packet = self.gate.admit(CommandPacket::from_input(&name, input));
        if packet.is_neutral() {
            self.transport.submit(stop, address);
        } else {
            // The worker sends `stop` instead if the gate closes first
            self.transport.submit_motion(packet.encode(), stop, address);
        }
        Ok(())
    }

    /// Sends the neutral packet.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRobot` if `robot_id` is not registered.
    pub fn send_stop(&self, robot_id: &str, now: Instant) -> Result<()> {
        let (name, address) = self.mark_command(robot_id, now)?;
        self.transport.submit(CommandPacket::stop(&name).encode(), address);
        Ok(())
    }

    /// Sends `"<name>:<status>"` to the robot's command port.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRobot` if `robot_id` is not registered.
    pub fn send_status(&self, robot_id: &str, state: MatchState) -> Result<()> {
        let endpoint = self
            .get(robot_id)
            .ok_or_else(|| BridgeError::UnknownRobot(robot_id.to_string()))?;
        let message = StatusMessage::new(&endpoint.display_name, state.as_str()).encode();
        self.transport.submit(message.into_bytes().into(), endpoint.address);
        Ok(())
    }

    /// Sends a stop packet to every known robot. Returns how many were queued.
    pub fn stop_all(&self, now: Instant) -> usize {
        let ids: Vec<String> = self.read().keys().cloned().collect();
        ids.iter().filter(|id| self.send_stop(id, now).is_ok()).count()
    }

    /// Sends a status message to every known robot.
    pub fn status_all(&self, state: MatchState) -> usize {
        let ids: Vec<String> = self.read().keys().cloned().collect();
        ids.iter().filter(|id| self.send_status(id, state).is_ok()).count()
    }

    /// Stamps `last_command_sent` and returns what the packet needs.
    fn mark_command(&self, robot_id: &str, now: Instant) -> Result<(String, SocketAddr)> {
        let mut endpoints = self.write();
        let endpoint = endpoints.get_mut(robot_id).ok_or_else(|| {
            debug!(robot = %robot_id, "Command for unknown robot");
            BridgeError::UnknownRobot(robot_id.to_string())
        })?;
        endpoint.last_command_sent = Some(now);
        endpoint.last_command_wall = Some(Utc::now());
        Ok((endpoint.display_name.clone(), endpoint.address))
    }
}
