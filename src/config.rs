//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all, via [`Config::default`]) yields a working configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::robot::parse_robot_address;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub robots: RobotsConfig,
    #[serde(default, rename = "match")]
    pub match_settings: MatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// UDP network configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_command_port")]
    pub command_port: u16,

    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,

    #[serde(default = "default_discovery_enabled")]
    pub discovery_enabled: bool,

    #[serde(default = "default_discovery_recv_timeout_ms")]
    pub discovery_recv_timeout_ms: u64,

    #[serde(default = "default_send_workers")]
    pub send_workers: usize,

    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

/// Controller configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControllerConfig {
    #[serde(default = "default_deadzone")]
    pub deadzone: f32,

    #[serde(default = "default_movement_threshold")]
    pub movement_threshold: f32,

    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    #[serde(default = "default_vendor_keywords")]
    pub vendor_keywords: Vec<String>,
}

/// Background task cadence
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_detect_interval_ms")]
    pub detect_interval_ms: u64,

    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

/// Robot registry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RobotsConfig {
    #[serde(default = "default_liveness_timeout_s")]
    pub liveness_timeout_s: u64,

    #[serde(default)]
    pub static_robots: Vec<StaticRobot>,
}

/// A robot registered at start-up
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct StaticRobot {
    pub name: String,
    pub address: String,
}

/// Match timer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MatchConfig {
    #[serde(default = "default_match_duration_s")]
    pub duration_s: u64,
}

/// Logging configuration (used by the binary only)
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_bind_address() -> String { "0.0.0.0".to_string() }
fn default_command_port() -> u16 { 2367 }
fn default_discovery_port() -> u16 { 12345 }
fn default_broadcast_address() -> String { "255.255.255.255".to_string() }
fn default_discovery_enabled() -> bool { true }
fn default_discovery_recv_timeout_ms() -> u64 { 100 }
fn default_send_workers() -> usize { 2 }
fn default_send_queue_capacity() -> usize { 256 }

fn default_deadzone() -> f32 { 0.1 }
fn default_movement_threshold() -> f32 { 0.05 }
fn default_connection_timeout_ms() -> u64 { 5000 }
fn default_vendor_keywords() -> Vec<String> {
    ["gamepad", "controller", "xbox", "playstation", "dualsense", "dualshock", "ps4", "ps5"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_poll_interval_ms() -> u64 { 16 }
fn default_detect_interval_ms() -> u64 { 3000 }
fn default_liveness_interval_ms() -> u64 { 1000 }
fn default_shutdown_timeout_ms() -> u64 { 2000 }

fn default_liveness_timeout_s() -> u64 { 60 }

fn default_match_duration_s() -> u64 { 120 }

fn default_log_level() -> String { "info".to_string() }

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            command_port: default_command_port(),
            discovery_port: default_discovery_port(),
            broadcast_address: default_broadcast_address(),
            discovery_enabled: default_discovery_enabled(),
            discovery_recv_timeout_ms: default_discovery_recv_timeout_ms(),
            send_workers: default_send_workers(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            deadzone: default_deadzone(),
            movement_threshold: default_movement_threshold(),
            connection_timeout_ms: default_connection_timeout_ms(),
            vendor_keywords: default_vendor_keywords(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            detect_interval_ms: default_detect_interval_ms(),
            liveness_interval_ms: default_liveness_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_s: default_liveness_timeout_s(),
            static_robots: Vec::new(),
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self { duration_s: default_match_duration_s() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use teleop_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        let net = &self.network;

        if net.command_port == 0 || net.discovery_port == 0 {
            return Err(invalid("ports must be non-zero"));
        }

        if net.command_port == net.discovery_port {
            return Err(invalid("command_port and discovery_port must differ"));
        }

        if net.bind_address.parse::<IpAddr>().is_err() {
            return Err(invalid(format!("bind_address '{}' is not an IP address", net.bind_address)));
        }

        if net.broadcast_address.parse::<IpAddr>().is_err() {
            return Err(invalid(format!(
                "broadcast_address '{}' is not an IP address",
                net.broadcast_address
            )));
        }

        if net.discovery_recv_timeout_ms == 0 || net.discovery_recv_timeout_ms > 5000 {
            return Err(invalid("discovery_recv_timeout_ms must be between 1 and 5000"));
        }

        if net.send_workers == 0 || net.send_workers > 64 {
            return Err(invalid("send_workers must be between 1 and 64"));
        }

        if net.send_queue_capacity == 0 {
            return Err(invalid("send_queue_capacity must be greater than 0"));
        }

        // Validate deadzones
        if !(0.0..=0.5).contains(&self.controller.deadzone) {
            return Err(invalid("deadzone must be between 0.0 and 0.5"));
        }

        if !(0.0..=0.5).contains(&self.controller.movement_threshold) {
            return Err(invalid("movement_threshold must be between 0.0 and 0.5"));
        }

        if self.controller.connection_timeout_ms == 0 {
            return Err(invalid("connection_timeout_ms must be greater than 0"));
        }

        // Validate timing fields
        let sched = &self.scheduler;
        if sched.poll_interval_ms == 0 || sched.poll_interval_ms > 1000 {
            return Err(invalid("poll_interval_ms must be between 1 and 1000"));
        }

        if sched.detect_interval_ms < 100 || sched.detect_interval_ms > 60000 {
            return Err(invalid("detect_interval_ms must be between 100 and 60000"));
        }

        if sched.liveness_interval_ms < 100 || sched.liveness_interval_ms > 60000 {
            return Err(invalid("liveness_interval_ms must be between 100 and 60000"));
        }

        if sched.shutdown_timeout_ms == 0 || sched.shutdown_timeout_ms > 30000 {
            return Err(invalid("shutdown_timeout_ms must be between 1 and 30000"));
        }

        if self.robots.liveness_timeout_s == 0 {
            return Err(invalid("liveness_timeout_s must be greater than 0"));
        }

        for robot in &self.robots.static_robots {
            if robot.name.is_empty() {
                return Err(invalid("static robot name cannot be empty"));
            }
            if parse_robot_address(&robot.address, net.command_port).is_err() {
                return Err(invalid(format!(
                    "static robot '{}' has invalid address '{}'",
                    robot.name, robot.address
                )));
            }
        }

        if self.match_settings.duration_s == 0 {
            return Err(invalid("match duration_s must be greater than 0"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.poll_interval_ms)
    }

    pub fn detect_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.detect_interval_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.liveness_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.scheduler.shutdown_timeout_ms)
    }

    pub fn robot_timeout(&self) -> Duration {
        Duration::from_secs(self.robots.liveness_timeout_s)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.controller.connection_timeout_ms)
    }
}

fn invalid(msg: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(msg))
}
