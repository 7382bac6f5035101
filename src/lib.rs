//! # Teleop Bridge Library
//!
//! Drive small wheeled robots from gamepads over UDP.
//!
//! This library provides the real-time command pipeline: input devices are
//! detected and polled, their readings normalized, routed to the paired
//! robot through an emergency-stop/teleop gate, encoded into the 24-byte
//! robot packet and sent fire-and-forget over UDP. A discovery listener
//! keeps the robot registry up to date.
//!
//! The library never installs a `tracing` subscriber; the caller decides
//! where logs go.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod gate;
pub mod match_timer;
pub mod pairing;
pub mod protocol;
pub mod robot;
pub mod scheduler;
pub mod transport;

pub use bridge::Bridge;
pub use config::Config;
pub use error::{BridgeError, Result};
