//! Core shared types for `wheel_dynamics` (engine-agnostic).
// wheel_dynamics/types.rs
use std::fmt;

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

// ============================================
// Wheel identification
// ============================================

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum WheelId { FL, FR, RL, RR }

impl WheelId {
    pub const ALL: [WheelId; 4] = [WheelId::FL, WheelId::FR, WheelId::RL, WheelId::RR];

    pub fn as_str(&self) -> &'static str {
        match self {
            WheelId::FL => "FL",
            WheelId::FR => "FR",
            WheelId::RL => "RL",
            WheelId::RR => "RR",
        }
    }

    /// Slot in the fixed `[_; 4]` wheel arrays.
    pub fn index(&self) -> usize {
        match self {
            WheelId::FL => 0,
            WheelId::FR => 1,
            WheelId::RL => 2,
            WheelId::RR => 3,
        }
    }

    pub fn is_front(&self) -> bool {
        matches!(self, WheelId::FL | WheelId::FR)
    }

    pub fn is_rear(&self) -> bool {
        matches!(self, WheelId::RL | WheelId::RR)
    }
}

impl fmt::Display for WheelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// ----- inputs -------------------------------
// ============================================

/// Per-tick control snapshot, written by the input layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlInput {
    pub throttle: f32,  // -1..1
    pub steering: f32,  // -1..1 (normalized steer input)
    pub brake: bool,
    pub reset: bool,
}

impl ControlInput {
    pub fn clamped(self) -> Self {
        Self {
            throttle: finite_or_zero(self.throttle).clamp(-1.0, 1.0),
            steering: finite_or_zero(self.steering).clamp(-1.0, 1.0),
            ..self
        }
    }
}

#[inline]
fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() { v } else { 0.0 }
}

// ============================================
// ----- per-wheel runtime state --------------
// ============================================

/// Runtime record of one wheel. Geometry fields are copied from the
/// vehicle config at spawn; everything else is rewritten every tick.
#[derive(Debug, Clone, Copy)]
pub struct WheelState {
    pub id: WheelId,

    // geometry
    pub radius: f32,              // m
    pub suspension_distance: f32, // m
    pub spring: f32,              // N/m
    pub damper: f32,              // N*s/m
    pub mass: f32,                // kg
    pub driven: bool,

    // contact
    pub grounded: bool,
    pub travel: f32,              // 0 = fully extended, 1 = fully compressed
    pub contact_point: Point3<f32>,
    pub contact_normal: Vector3<f32>,
    pub suspension_force: f32,    // N

    // slip (last measured)
    pub forward_slip: f32,
    pub sideways_slip: f32,

    // commands
    pub motor_torque: f32,        // N*m
    pub brake_torque: f32,        // N*m
    pub steer_angle: f32,         // rad

    // spin
    pub angular_velocity: f32,    // rad/s
    pub spin_angle: f32,          // rad, visual only
}

impl WheelState {
    pub fn new(id: WheelId) -> Self {
        Self {
            id,
            radius: 0.4,
            suspension_distance: 0.15,
            spring: 35_000.0,
            damper: 4_500.0,
            mass: 20.0,
            driven: id.is_rear(),
            grounded: false,
            travel: 1.0,
            contact_point: Point3::origin(),
            contact_normal: Vector3::y(),
            suspension_force: 0.0,
            forward_slip: 0.0,
            sideways_slip: 0.0,
            motor_torque: 0.0,
            brake_torque: 0.0,
            steer_angle: 0.0,
            angular_velocity: 0.0,
            spin_angle: 0.0,
        }
    }

    /// Spin inertia of a solid disc.
    pub fn inertia(&self) -> f32 {
        (0.5 * self.mass * self.radius * self.radius).max(1e-3)
    }

    /// Drop all contact data; travel parks at 1 for airborne wheels.
    pub fn clear_contact(&mut self) {
        self.grounded = false;
        self.travel = 1.0;
        self.suspension_force = 0.0;
        self.forward_slip = 0.0;
        self.sideways_slip = 0.0;
    }

    pub fn zero_commands(&mut self) {
        self.motor_torque = 0.0;
        self.brake_torque = 0.0;
        self.steer_angle = 0.0;
    }
}

pub fn grounded_count(wheels: &[WheelState]) -> usize {
    wheels.iter().filter(|w| w.grounded).count()
}

// ============================================
// ----- force actions ------------------------
// ============================================

/// A world-space force the solver wants applied this tick.
#[derive(Clone, Copy, Debug)]
pub struct AppliedForce {
    /// Force in world space (N).
    pub force: Vector3<f32>,

    /// Optional application point (world). If None => apply at COM.
    pub at_point: Option<Point3<f32>>,
}

impl AppliedForce {
    pub fn at_com(force: Vector3<f32>) -> Self {
        Self { force, at_point: None }
    }

    pub fn at(force: Vector3<f32>, point: Point3<f32>) -> Self {
        Self { force, at_point: Some(point) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_ids_map_to_array_slots() {
        for (slot, id) in WheelId::ALL.iter().enumerate() {
            assert_eq!(id.index(), slot);
            assert_eq!(id.to_string(), id.as_str());
        }
    }

    #[test]
    fn clamped_input_rejects_nan_and_range() {
        let raw = ControlInput { throttle: f32::NAN, steering: 3.0, brake: true, reset: false };
        let c = raw.clamped();
        assert_eq!(c.throttle, 0.0);
        assert_eq!(c.steering, 1.0);
        assert!(c.brake);
    }

    #[test]
    fn cleared_wheel_parks_at_full_travel() {
        let mut w = WheelState::new(WheelId::RL);
        w.grounded = true;
        w.travel = 0.3;
        w.clear_contact();
        assert!(!w.grounded);
        assert_eq!(w.travel, 1.0);
        assert!(w.driven);
    }
}
