// ==============================================================================
// anti_roll.rs — ANTI-ROLL BAR (ARB) ROLL BALANCING
// ------------------------------------------------------------------------------
// For each axle pair (FL/FR, RL/RR):
// - delta = travel_left − travel_right   (travel: 0 = extended, 1 = compressed)
// - force = delta × coefficient
// - left mount gets +up × force, right mount gets −up × force
//
// The pair of forces has no net vertical component; it only produces a roll
// moment that pushes the compressed side up and the extended side down.
//
// Forces are emitted only for grounded wheels. An ungrounded wheel still
// reports travel = 1 but receives no force itself.
//
// The rear axle runs at `rear_anti_roll_share` of the front coefficient.
// ==============================================================================

use nalgebra::{Point3, Vector3};

use crate::wheel_dynamics::types::{AppliedForce, WheelId, WheelState};

/// Anti-roll force pair for one axle.
pub fn axle_anti_roll(
    left: &WheelState,
    right: &WheelState,
    left_mount: Point3<f32>,
    right_mount: Point3<f32>,
    up: Vector3<f32>,
    coefficient: f32,
) -> Vec<AppliedForce> {
    let mut out = Vec::with_capacity(2);

    let delta = left.travel - right.travel;
    if delta.abs() < 1e-4 {
        return out;
    }

    let force = up * (delta * coefficient);

    if left.grounded {
        out.push(AppliedForce::at(force, left_mount));
    }
    if right.grounded {
        out.push(AppliedForce::at(-force, right_mount));
    }

    out
}

/// Both axles. `mounts` are the world-space wheel mount points, indexed by
/// `WheelId::index()`.
pub fn anti_roll_forces(
    wheels: &[WheelState; 4],
    mounts: &[Point3<f32>; 4],
    up: Vector3<f32>,
    front_coefficient: f32,
    rear_share: f32,
) -> Vec<AppliedForce> {
    let axles = [
        (WheelId::FL, WheelId::FR, front_coefficient),
        (WheelId::RL, WheelId::RR, front_coefficient * rear_share),
    ];

    axles
        .iter()
        .flat_map(|&(l, r, k)| {
            axle_anti_roll(
                &wheels[l.index()],
                &wheels[r.index()],
                mounts[l.index()],
                mounts[r.index()],
                up,
                k,
            )
        })
        .collect()
}
