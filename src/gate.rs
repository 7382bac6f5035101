//! # Command Gate
//!
//! Process-wide STANDBY/TELEOP state plus the emergency-stop override.
//!
//! Both values are plain atomics: any thread may read them without locking,
//! and every outbound motion packet passes through [`CommandGate::admit`].
//!
//! | Emergency stop | State | Motion packet leaves as |
//! |----------------|-------|-------------------------|
//! | active | any | stop packet |
//! | inactive | STANDBY | stop packet |
//! | inactive | TELEOP | motion packet |

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::error::{BridgeError, Result};
use crate::protocol::CommandPacket;

const STANDBY: u8 = 0;
const TELEOP: u8 = 1;

/// Match mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateState {
    Standby,
    Teleop,
}

/// STANDBY/TELEOP state machine with an orthogonal emergency-stop flag.
#[derive(Debug)]
pub struct CommandGate {
    state: AtomicU8,
    emergency_stop: AtomicBool,
}

impl Default for CommandGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandGate {
    /// Starts in STANDBY with the emergency stop released.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STANDBY),
            emergency_stop: AtomicBool::new(false),
        }
    }

    /// Enters TELEOP.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` while the emergency stop is active.
    pub fn start_teleop(&self) -> Result<()> {
        if self.is_emergency_stop_active() {
            return Err(BridgeError::Rejected(
                "Cannot start teleop while emergency stop is active".to_string(),
            ));
        }
        self.state.store(TELEOP, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop_teleop(&self) {
        self.state.store(STANDBY, Ordering::SeqCst);
    }

    pub fn reset_match(&self) {
        self.stop_teleop();
    }

    /// Returns true if the flag was previously clear.
    pub fn activate_emergency_stop(&self) -> bool {
        !self.emergency_stop.swap(true, Ordering::SeqCst)
    }

    /// Returns true if the flag was previously set. Does not leave STANDBY.
    pub fn deactivate_emergency_stop(&self) -> bool {
        self.emergency_stop.swap(false, Ordering::SeqCst)
    }

    #[must_use]
    pub fn state(&self) -> GateState {
        match self.state.load(Ordering::SeqCst) {
            TELEOP => GateState::Teleop,
            _ => GateState::Standby,
        }
    }

    #[must_use]
    pub fn is_teleop(&self) -> bool {
        self.state() == GateState::Teleop
    }

    #[must_use]
    pub fn is_emergency_stop_active(&self) -> bool {
        self.emergency_stop.load(Ordering::SeqCst)
    }

    /// True if motion may leave the process right now.
    #[must_use]
    pub fn allows_motion(&self) -> bool {
        !self.is_emergency_stop_active() && self.is_teleop()
    }

    /// Final check before a packet is handed to the transport. Motion is
    /// downgraded to the stop packet for the same robot unless allowed.
    #[must_use]
    pub fn admit(&self, packet: CommandPacket) -> CommandPacket {
        if self.allows_motion() {
            packet
        } else {
            packet.neutralized()
        }
    }
}
