//! # Robot Wire Protocol Module
//!
//! Encoding and decoding of everything that travels over UDP between the
//! bridge and the robot firmware.
//!
//! This module handles:
//! - The fixed 24-byte motion/stop packet (robot name + axis bytes + buttons)
//! - The `"<name>:<status>"` text protocol for match state and pings
//! - Discovery pings, legacy JSON registrations and emergency-stop tokens

pub mod packet;
pub mod message;

pub use message::{DiscoveryMessage, MatchState, RobotDescriptor, StatusMessage};
pub use packet::{CommandPacket, FaceButtons};
