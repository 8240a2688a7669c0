//! Traction control: trims motor torque on driven wheels that spin past the
//! slip allowance. Torque is never raised and never cut below 10%.

use crate::wheel_dynamics::types::WheelState;

pub const MIN_TORQUE_FACTOR: f32 = 0.1;

/// allowance = (1 − coefficient) × max_slip_ratio
pub fn slip_allowance(traction_control: f32, max_slip_ratio: f32) -> f32 {
    (1.0 - traction_control.clamp(0.0, 1.0)) * max_slip_ratio.max(0.0)
}

/// Multiplier in [0.1, 1] for a measured slip.
pub fn torque_factor(slip: f32, allowance: f32) -> f32 {
    let slip = slip.abs();
    if !slip.is_finite() {
        return MIN_TORQUE_FACTOR;
    }
    if slip <= allowance {
        return 1.0;
    }
    if allowance <= f32::EPSILON {
        // zero allowance: any slip at all is excess
        return MIN_TORQUE_FACTOR;
    }

    (1.0 - (slip - allowance) / allowance).clamp(MIN_TORQUE_FACTOR, 1.0)
}

/// Apply to every grounded, driven wheel. Returns how many wheels were trimmed.
pub fn apply_traction_control(
    traction_control: f32,
    max_slip_ratio: f32,
    wheels: &mut [WheelState; 4],
) -> usize {
    let allowance = slip_allowance(traction_control, max_slip_ratio);
    let mut trimmed = 0;

    for w in wheels.iter_mut().filter(|w| w.driven && w.grounded) {
        let factor = torque_factor(w.forward_slip, allowance);
        if factor < 1.0 {
            w.motor_torque *= factor;
            trimmed += 1;
        }
    }

    trimmed
}
