//! # Command Packet Codec
//!
//! Encodes normalized controller input into the fixed 24-byte datagram the
//! robot firmware expects, and decodes it back for diagnostics and tests.
//!
//! ## Layout
//!
//! | Offset | Len | Field | Encoding |
//! |--------|-----|-------|----------|
//! | 0 | 16 | robot name | ASCII, NUL-padded/truncated |
//! | 16 | 1 | left X | 0-255, center 125 |
//! | 17 | 1 | left Y | 0-255, center 130, inverted |
//! | 18 | 1 | right X | 0-255, center 127 |
//! | 19 | 1 | right Y | 0-255, center 130, inverted |
//! | 20 | 1 | reserved | always 125 |
//! | 21 | 1 | reserved | always 125 |
//! | 22 | 1 | buttons | bit0 cross, bit1 circle, bit2 square, bit3 triangle |
//! | 23 | 1 | reserved | always 0 |
//!
//! The axis centers are not symmetric. They match the firmware's calibration
//! and must not be "fixed" to 127/128.

use bytes::{BufMut, Bytes, BytesMut};

use crate::controller::input::NormalizedInput;
use crate::error::{BridgeError, Result};

/// Total packet length in bytes
pub const PACKET_LEN: usize = 24;

/// Length of the NUL-padded robot name field
pub const NAME_LEN: usize = 16;

/// Left stick X center/scale
pub const LEFT_X_CENTER: f32 = 125.0;
/// Left stick Y center/scale
pub const LEFT_Y_CENTER: f32 = 130.0;
/// Right stick X center/scale
pub const RIGHT_X_CENTER: f32 = 127.0;
/// Right stick Y center/scale
pub const RIGHT_Y_CENTER: f32 = 130.0;

/// Filler for the two unused axis bytes
pub const RESERVED_AXIS: u8 = 125;

pub const BUTTON_CROSS: u8 = 0x01;
pub const BUTTON_CIRCLE: u8 = 0x02;
pub const BUTTON_SQUARE: u8 = 0x04;
pub const BUTTON_TRIANGLE: u8 = 0x08;

/// The four face buttons carried in byte 22.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaceButtons {
    pub cross: bool,
    pub circle: bool,
    pub square: bool,
    pub triangle: bool,
}

impl FaceButtons {
    /// Packs the buttons into the wire bitmask.
    #[must_use]
    pub fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.cross {
            bits |= BUTTON_CROSS;
        }
        if self.circle {
            bits |= BUTTON_CIRCLE;
        }
        if self.square {
            bits |= BUTTON_SQUARE;
        }
        if self.triangle {
            bits |= BUTTON_TRIANGLE;
        }
        bits
    }

    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self {
            cross: bits & BUTTON_CROSS != 0,
            circle: bits & BUTTON_CIRCLE != 0,
            square: bits & BUTTON_SQUARE != 0,
            triangle: bits & BUTTON_TRIANGLE != 0,
        }
    }

    #[must_use]
    pub fn any(&self) -> bool {
        self.bits() != 0
    }
}

/// One motion or stop command, already quantized to wire bytes.
///
/// # Examples
///
/// ```
/// use teleop_bridge::protocol::CommandPacket;
///
/// let stop = CommandPacket::stop("R1");
/// let bytes = stop.encode();
/// assert_eq!(bytes.len(), 24);
/// assert_eq!(&bytes[0..2], b"R1");
/// assert_eq!(bytes[16], 125);
/// assert_eq!(bytes[17], 130);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub robot_name: String,
    pub left_x: u8,
    pub left_y: u8,
    pub right_x: u8,
    pub right_y: u8,
    pub buttons: u8,
}

impl CommandPacket {
    /// Neutral packet: every axis at its center, no buttons.
    #[must_use]
    pub fn stop(robot_name: &str) -> Self {
        Self {
            robot_name: robot_name.to_string(),
            left_x: LEFT_X_CENTER as u8,
            left_y: LEFT_Y_CENTER as u8,
            right_x: RIGHT_X_CENTER as u8,
            right_y: RIGHT_Y_CENTER as u8,
            buttons: 0,
        }
    }

    /// Quantizes stick values (-1.0 to 1.0) into a motion packet.
    ///
    /// Both Y axes are inverted before encoding.
    #[must_use]
    pub fn from_axes(
        robot_name: &str,
        left_x: f32,
        left_y: f32,
        right_x: f32,
        right_y: f32,
        buttons: FaceButtons,
    ) -> Self {
        Self {
            robot_name: robot_name.to_string(),
            left_x: encode_axis(left_x, LEFT_X_CENTER),
            left_y: encode_axis(-left_y, LEFT_Y_CENTER),
            right_x: encode_axis(right_x, RIGHT_X_CENTER),
            right_y: encode_axis(-right_y, RIGHT_Y_CENTER),
            buttons: buttons.bits(),
        }
    }

    /// Builds a motion packet from a deadzone-applied input snapshot.
    #[must_use]
    pub fn from_input(robot_name: &str, input: &NormalizedInput) -> Self {
        Self::from_axes(
            robot_name,
            input.left_x(),
            input.left_y(),
            input.right_x(),
            input.right_y(),
            input.face_buttons(),
        )
    }

    /// True if this packet carries zero effective motion.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        *self == Self::stop(&self.robot_name)
    }

    /// Returns the same packet with motion and buttons cleared.
    #[must_use]
    pub fn neutralized(self) -> Self {
        Self::stop(&self.robot_name)
    }

    /// Serializes to the 24-byte wire layout.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_LEN);

        let mut name = [0u8; NAME_LEN];
        for (slot, byte) in name.iter_mut().zip(self.robot_name.bytes()) {
            *slot = if byte.is_ascii() { byte } else { b'?' };
        }
        buf.put_slice(&name);

        buf.put_u8(self.left_x);
        buf.put_u8(self.left_y);
        buf.put_u8(self.right_x);
        buf.put_u8(self.right_y);
        buf.put_u8(RESERVED_AXIS);
        buf.put_u8(RESERVED_AXIS);
        buf.put_u8(self.buttons);
        buf.put_u8(0);

        buf.freeze()
    }

    /// Parses a 24-byte wire packet.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the slice is not exactly 24 bytes or the name
    /// field is not ASCII.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != PACKET_LEN {
            return Err(BridgeError::Protocol(format!(
                "Command packet must be {} bytes, got {}",
                PACKET_LEN,
                data.len()
            )));
        }

        let name_field = &data[..NAME_LEN];
        let name_len = name_field.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = &name_field[..name_len];
        if !name.is_ascii() {
            return Err(BridgeError::Protocol("Robot name is not ASCII".to_string()));
        }

        Ok(Self {
            robot_name: String::from_utf8_lossy(name).into_owned(),
            left_x: data[16],
            left_y: data[17],
            right_x: data[18],
            right_y: data[19],
            buttons: data[22],
        })
    }

    /// Recovers the stick values this packet encodes (inverse of [`CommandPacket::from_axes`]).
    #[must_use]
    pub fn axes(&self) -> (f32, f32, f32, f32) {
        (
            decode_axis(self.left_x, LEFT_X_CENTER),
            -decode_axis(self.left_y, LEFT_Y_CENTER),
            decode_axis(self.right_x, RIGHT_X_CENTER),
            -decode_axis(self.right_y, RIGHT_Y_CENTER),
        )
    }

    #[must_use]
    pub fn face_buttons(&self) -> FaceButtons {
        FaceButtons::from_bits(self.buttons)
    }
}

/// `round(value * center + center)` clamped to a byte. The center doubles as
/// the scale for every axis.
fn encode_axis(value: f32, center: f32) -> u8 {
    let value = if value.is_finite() { value } else { 0.0 };
    (value * center + center).round().clamp(0.0, 255.0) as u8
}

fn decode_axis(byte: u8, center: f32) -> f32 {
    (f32::from(byte) - center) / center
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_packet_layout() {
        let bytes = CommandPacket::stop("R1").encode();

        assert_eq!(bytes.len(), PACKET_LEN);
        assert_eq!(&bytes[0..2], b"R1");
        assert!(bytes[2..16].iter().all(|&b| b == 0));
        assert_eq!(bytes[16], 125);
        assert_eq!(bytes[17], 130);
        assert_eq!(bytes[18], 127);
        assert_eq!(bytes[19], 130);
        assert_eq!(bytes[20], 125);
        assert_eq!(bytes[21], 125);
        assert_eq!(bytes[22], 0);
        assert_eq!(bytes[23], 0);
    }

    #[test]
    fn test_name_truncated_to_16() {
        let bytes = CommandPacket::stop("a-very-long-robot-name").encode();
        assert_eq!(&bytes[0..16], b"a-very-long-robo");
        assert_eq!(bytes.len(), PACKET_LEN);
    }

    #[test]
    fn test_forward_left_y() {
        // Left stick pushed forward: normalized left Y is negative
        let packet = CommandPacket::from_axes("R1", 0.0, -0.5, 0.0, 0.0, FaceButtons::default());
        assert_eq!(packet.left_y, 195);
        assert_eq!(packet.left_x, 125);
        assert_eq!(packet.right_x, 127);
        assert_eq!(packet.right_y, 130);
        assert_eq!(packet.buttons, 0);
    }

    #[test]
    fn test_full_deflection_and_clamping() {
        let packet = CommandPacket::from_axes("R1", 1.0, -1.0, -1.0, 1.0, FaceButtons::default());
        assert_eq!(packet.left_x, 250);
        // 1.0 * 130 + 130 = 260, clamped
        assert_eq!(packet.left_y, 255);
        assert_eq!(packet.right_x, 0);
        assert_eq!(packet.right_y, 0);

        let packet = CommandPacket::from_axes("R1", -1.0, 1.0, 1.0, -1.0, FaceButtons::default());
        assert_eq!(packet.left_x, 0);
        assert_eq!(packet.left_y, 0);
        assert_eq!(packet.right_x, 254);
        assert_eq!(packet.right_y, 255);
    }

    #[test]
    fn test_out_of_range_and_nan_inputs() {
        let packet = CommandPacket::from_axes("R1", 5.0, f32::NAN, -7.0, f32::INFINITY, FaceButtons::default());
        assert_eq!(packet.left_x, 255);
        assert_eq!(packet.left_y, 130);
        assert_eq!(packet.right_x, 0);
        assert_eq!(packet.right_y, 130);
    }

    #[test]
    fn test_quantization_recovers_axis_values() {
        // X axes never clamp; Y axes clamp below -125/130 once inverted.
        for step in 0..=200 {
            let v = -1.0 + step as f32 * 0.01;
            let packet = CommandPacket::from_axes("R1", v, 0.0, v, 0.0, FaceButtons::default());
            let (lx, _, rx, _) = packet.axes();
            assert!((lx - v).abs() <= 1.0 / LEFT_X_CENTER, "left x {} -> {}", v, lx);
            assert!((rx - v).abs() <= 1.0 / RIGHT_X_CENTER, "right x {} -> {}", v, rx);

            if v >= -0.96 {
                let packet = CommandPacket::from_axes("R1", 0.0, v, 0.0, v, FaceButtons::default());
                let (_, ly, _, ry) = packet.axes();
                assert!((ly - v).abs() <= 1.0 / LEFT_Y_CENTER, "left y {} -> {}", v, ly);
                assert!((ry - v).abs() <= 1.0 / RIGHT_Y_CENTER, "right y {} -> {}", v, ry);
            }
        }
    }

    #[test]
    fn test_button_bits() {
        let buttons = FaceButtons { cross: true, circle: false, square: true, triangle: true };
        assert_eq!(buttons.bits(), 0b1101);
        assert_eq!(FaceButtons::from_bits(0b1101), buttons);
        assert!(!FaceButtons::default().any());

        let bytes = CommandPacket::from_axes("R1", 0.0, 0.0, 0.0, 0.0, buttons).encode();
        assert_eq!(bytes[22], 0b1101);
    }

    #[test]
    fn test_decode_encoded_packet() {
        let packet = CommandPacket::from_axes(
            "striker",
            0.3,
            -0.2,
            0.7,
            0.1,
            FaceButtons { triangle: true, ..Default::default() },
        );
        let decoded = CommandPacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_decode_wrong_length() {
        assert!(CommandPacket::decode(&[0u8; 23]).is_err());
        assert!(CommandPacket::decode(&[0u8; 25]).is_err());
    }

    #[test]
    fn test_neutral_detection() {
        assert!(CommandPacket::stop("R1").is_neutral());

        let moving = CommandPacket::from_axes("R1", 0.5, 0.0, 0.0, 0.0, FaceButtons::default());
        assert!(!moving.is_neutral());
        assert_eq!(moving.neutralized(), CommandPacket::stop("R1"));

        // Zero input encodes to the stop packet bit for bit
        let zero = CommandPacket::from_axes("R1", 0.0, 0.0, 0.0, 0.0, FaceButtons::default());
        assert_eq!(zero.encode(), CommandPacket::stop("R1").encode());
    }
}
