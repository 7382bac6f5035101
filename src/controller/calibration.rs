//! # Calibration Module
//!
//! Deadzone and movement threshold applied when reading stick values.
//!
//! ## Deadzone
//!
//! Stick readings whose magnitude is below the deadzone read back as exactly
//! 0.0 to absorb sensor noise. Readings outside the band pass through
//! unchanged (no rescaling), so the wire encoding of a full deflection stays
//! the same regardless of the deadzone setting.
//!
//! ## Movement threshold
//!
//! A derived scalar (forward, sideways, rotation) counts as movement when its
//! magnitude exceeds the threshold. Input with no movement is sent as a stop.
//!
//! ## Usage
//!
//! ```
//! use teleop_bridge::controller::calibration::Calibration;
//!
//! let cal = Calibration::new(0.1, 0.05);
//!
//! // Input near center (within deadzone)
//! assert_eq!(cal.apply(0.05), 0.0);
//!
//! // Input outside the deadzone is untouched
//! assert_eq!(cal.apply(0.4), 0.4);
//! ```

/// Deadzone and movement threshold for normalized stick input.
///
/// Input and output are in the range -1.0 to 1.0, where 0.0 is center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Deadzone as a fraction (0.0 to 0.5).
    deadzone: f32,
    /// Minimum magnitude that counts as movement (0.0 to 0.5).
    movement_threshold: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            deadzone: 0.1,
            movement_threshold: 0.05,
        }
    }
}

impl Calibration {
    /// Creates a calibration. Values outside 0.0..=0.5 are clamped.
    #[must_use]
    pub fn new(deadzone: f32, movement_threshold: f32) -> Self {
        Self {
            deadzone: deadzone.clamp(0.0, 0.5),
            movement_threshold: movement_threshold.clamp(0.0, 0.5),
        }
    }

    /// Calibration with neither deadzone nor threshold.
    #[must_use]
    pub fn linear() -> Self {
        Self {
            deadzone: 0.0,
            movement_threshold: 0.0,
        }
    }

    #[must_use]
    pub fn deadzone(&self) -> f32 {
        self.deadzone
    }

    #[must_use]
    pub fn movement_threshold(&self) -> f32 {
        self.movement_threshold
    }

    /// Applies the deadzone to a normalized stick value.
    ///
    /// # Examples
    ///
    /// ```
    /// use teleop_bridge::controller::calibration::Calibration;
    ///
    /// let cal = Calibration::new(0.1, 0.05);
    /// assert_eq!(cal.apply(-0.099), 0.0);
    /// assert_eq!(cal.apply(-0.1), -0.1);
    /// ```
    #[must_use]
    pub fn apply(&self, input: f32) -> f32 {
        if !input.is_finite() || input.abs() < self.deadzone {
            0.0
        } else {
            input
        }
    }

    /// True if a derived scalar counts as movement.
    #[must_use]
    pub fn is_moving(&self, value: f32) -> bool {
        value.abs() > self.movement_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cal = Calibration::default();
        assert_eq!(cal.deadzone(), 0.1);
        assert_eq!(cal.movement_threshold(), 0.05);
    }

    #[test]
    fn test_new_clamps() {
        let cal = Calibration::new(0.9, -1.0);
        assert_eq!(cal.deadzone(), 0.5);
        assert_eq!(cal.movement_threshold(), 0.0);
    }

    #[test]
    fn test_within_deadzone_is_zero() {
        let cal = Calibration::default();
        for v in [0.0, 0.01, -0.05, 0.0999, -0.0999] {
            assert_eq!(cal.apply(v), 0.0, "value {}", v);
        }
    }

    #[test]
    fn test_outside_deadzone_passes_through() {
        let cal = Calibration::default();
        for v in [0.1, -0.1, 0.5, -0.75, 1.0, -1.0] {
            assert_eq!(cal.apply(v), v, "value {}", v);
        }
    }

    #[test]
    fn test_non_finite_is_zero() {
        let cal = Calibration::default();
        assert_eq!(cal.apply(f32::NAN), 0.0);
        assert_eq!(cal.apply(f32::INFINITY), 0.0);
    }

    #[test]
    fn test_linear() {
        let cal = Calibration::linear();
        assert_eq!(cal.apply(0.01), 0.01);
        assert!(cal.is_moving(0.01));
        assert!(!cal.is_moving(0.0));
    }

    #[test]
    fn test_movement_threshold() {
        let cal = Calibration::default();
        assert!(!cal.is_moving(0.05));
        assert!(cal.is_moving(0.051));
        assert!(cal.is_moving(-0.2));
    }
}
