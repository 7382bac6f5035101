//! # Text Messages
//!
//! The status protocol (`"<name>:<status>"`, sent to the command port) and
//! the discovery protocol (sent to and received on the discovery port).
//!
//! ## Discovery messages
//!
//! | Message | Direction | Meaning |
//! |---------|-----------|---------|
//! | `DISCOVER:<id>:<ip>` | robot → bridge | Firmware liveness ping |
//! | `SOCCERBOTS_ROBOT:{json}` or `{json}` | robot → bridge | Legacy registration |
//! | `SOCCERBOTS_DISCOVERY` | bridge → broadcast | Active probe |
//! | `DISCOVERY_ACK` | bridge → robot | Registration accepted |
//! | `ESTOP` / `ESTOP_OFF` | bridge → broadcast | Emergency stop override |
//! | `<name>:<status>` | robot → bridge | Status report |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::error::{BridgeError, Result};

pub const DISCOVERY_PROBE: &str = "SOCCERBOTS_DISCOVERY";
pub const DISCOVERY_ACK: &str = "DISCOVERY_ACK";
pub const ESTOP: &str = "ESTOP";
pub const ESTOP_OFF: &str = "ESTOP_OFF";
pub const PING_PREFIX: &str = "DISCOVER:";
pub const REGISTRATION_PREFIX: &str = "SOCCERBOTS_ROBOT:";

/// Match state strings understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Teleop,
    Standby,
}

impl MatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchState::Teleop => "teleop",
            MatchState::Standby => "standby",
        }
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"<robotName>:<status>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub robot_name: String,
    pub status: String,
}

impl StatusMessage {
    pub fn new(robot_name: &str, status: impl Into<String>) -> Self {
        Self {
            robot_name: robot_name.to_string(),
            status: status.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.robot_name, self.status)
    }

    /// Splits on the first `:`. Both halves must be non-empty.
    pub fn parse(text: &str) -> Result<Self> {
        match text.split_once(':') {
            Some((name, status)) if !name.is_empty() && !status.is_empty() => {
                Ok(Self::new(name, status))
            }
            _ => Err(BridgeError::Protocol(format!("Not a status message: {:?}", text))),
        }
    }
}

/// Robot self-description sent with a legacy registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
}

/// Any message that can arrive on the discovery port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    Ping { robot_id: String, address: IpAddr },
    Registration(RobotDescriptor),
    Status(StatusMessage),
    Probe,
    Ack,
    EmergencyStop,
    EmergencyStopRelease,
}

impl DiscoveryMessage {
    /// Classifies one datagram received on the discovery port.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` (or `Json`) for anything that does not match a
    /// known shape.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| BridgeError::Protocol("Discovery message is not UTF-8".to_string()))?
            .trim();

        match text {
            DISCOVERY_PROBE => return Ok(Self::Probe),
            DISCOVERY_ACK => return Ok(Self::Ack),
            ESTOP => return Ok(Self::EmergencyStop),
            ESTOP_OFF => return Ok(Self::EmergencyStopRelease),
            _ => {}
        }

        if let Some(rest) = text.strip_prefix(PING_PREFIX) {
            let (robot_id, ip) = rest
                .split_once(':')
                .ok_or_else(|| BridgeError::Protocol(format!("Malformed ping: {:?}", text)))?;
            if robot_id.is_empty() {
                return Err(BridgeError::Protocol("Ping without robot id".to_string()));
            }
            let address = ip
                .parse::<IpAddr>()
                .map_err(|_| BridgeError::Protocol(format!("Ping with bad address: {:?}", ip)))?;
            return Ok(Self::Ping {
                robot_id: robot_id.to_string(),
                address,
            });
        }

        let json = text.strip_prefix(REGISTRATION_PREFIX).or_else(|| {
            if text.starts_with('{') {
                Some(text)
            } else {
                None
            }
        });
        if let Some(json) = json {
            let descriptor: RobotDescriptor = serde_json::from_str(json)?;
            if descriptor.id.is_empty() {
                return Err(BridgeError::Protocol("Registration without robot id".to_string()));
            }
            return Ok(Self::Registration(descriptor));
        }

        StatusMessage::parse(text).map(Self::Status)
    }

    /// Wire text for the messages the bridge itself sends.
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            Self::Ping { robot_id, address } => format!("{}{}:{}", PING_PREFIX, robot_id, address),
            Self::Registration(descriptor) => {
                format!("{}{}", REGISTRATION_PREFIX, serde_json::to_string(descriptor)?)
            }
            Self::Status(status) => status.encode(),
            Self::Probe => DISCOVERY_PROBE.to_string(),
            Self::Ack => DISCOVERY_ACK.to_string(),
            Self::EmergencyStop => ESTOP.to_string(),
            Self::EmergencyStopRelease => ESTOP_OFF.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message_encode() {
        let msg = StatusMessage::new("R1", MatchState::Teleop.as_str());
        assert_eq!(msg.encode(), "R1:teleop");
        assert_eq!(MatchState::Standby.to_string(), "standby");
    }

    #[test]
    fn test_status_message_parse() {
        let msg = StatusMessage::parse("R1:standby").unwrap();
        assert_eq!(msg.robot_name, "R1");
        assert_eq!(msg.status, "standby");

        assert!(StatusMessage::parse("R1").is_err());
        assert!(StatusMessage::parse(":teleop").is_err());
        assert!(StatusMessage::parse("R1:").is_err());
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!(DiscoveryMessage::parse(b"ESTOP").unwrap(), DiscoveryMessage::EmergencyStop);
        assert_eq!(
            DiscoveryMessage::parse(b"ESTOP_OFF").unwrap(),
            DiscoveryMessage::EmergencyStopRelease
        );
        assert_eq!(
            DiscoveryMessage::parse(b"SOCCERBOTS_DISCOVERY\n").unwrap(),
            DiscoveryMessage::Probe
        );
        assert_eq!(DiscoveryMessage::parse(b"DISCOVERY_ACK").unwrap(), DiscoveryMessage::Ack);
    }

    #[test]
    fn test_parse_firmware_ping() {
        let msg = DiscoveryMessage::parse(b"DISCOVER:minibot1:192.168.4.23").unwrap();
        assert_eq!(
            msg,
            DiscoveryMessage::Ping {
                robot_id: "minibot1".to_string(),
                address: "192.168.4.23".parse().unwrap(),
            }
        );
    }

    #[test]
    fn test_parse_malformed_ping() {
        assert!(DiscoveryMessage::parse(b"DISCOVER:minibot1").is_err());
        assert!(DiscoveryMessage::parse(b"DISCOVER::10.0.0.1").is_err());
        assert!(DiscoveryMessage::parse(b"DISCOVER:minibot1:not-an-ip").is_err());
    }

    #[test]
    fn test_parse_registration_with_prefix() {
        let raw = br#"SOCCERBOTS_ROBOT:{"id":"bot-7","name":"Striker","status":"ready"}"#;
        match DiscoveryMessage::parse(raw).unwrap() {
            DiscoveryMessage::Registration(descriptor) => {
                assert_eq!(descriptor.id, "bot-7");
                assert_eq!(descriptor.name, "Striker");
                assert_eq!(descriptor.status, "ready");
            }
            other => panic!("Expected registration, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bare_json_registration() {
        let raw = br#"{"id":"bot-8","name":"Keeper"}"#;
        match DiscoveryMessage::parse(raw).unwrap() {
            DiscoveryMessage::Registration(descriptor) => {
                assert_eq!(descriptor.id, "bot-8");
                assert!(descriptor.status.is_empty());
            }
            other => panic!("Expected registration, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bad_json() {
        let result = DiscoveryMessage::parse(b"SOCCERBOTS_ROBOT:{not json");
        assert!(matches!(result, Err(BridgeError::Json(_))));
    }

    #[test]
    fn test_parse_status_report() {
        let msg = DiscoveryMessage::parse(b"R1:ready").unwrap();
        assert_eq!(msg, DiscoveryMessage::Status(StatusMessage::new("R1", "ready")));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(DiscoveryMessage::parse(b"hello").is_err());
        assert!(DiscoveryMessage::parse(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_encode_outbound_messages() {
        assert_eq!(DiscoveryMessage::EmergencyStop.encode().unwrap(), "ESTOP");
        assert_eq!(DiscoveryMessage::EmergencyStopRelease.encode().unwrap(), "ESTOP_OFF");
        assert_eq!(DiscoveryMessage::Probe.encode().unwrap(), "SOCCERBOTS_DISCOVERY");
        assert_eq!(DiscoveryMessage::Ack.encode().unwrap(), "DISCOVERY_ACK");

        let registration = DiscoveryMessage::Registration(RobotDescriptor {
            id: "bot-7".to_string(),
            name: "Striker".to_string(),
            status: "ready".to_string(),
        });
        let text = registration.encode().unwrap();
        assert_eq!(
            text,
            r#"SOCCERBOTS_ROBOT:{"id":"bot-7","name":"Striker","status":"ready"}"#
        );
        assert_eq!(DiscoveryMessage::parse(text.as_bytes()).unwrap(), registration);
    }
}
