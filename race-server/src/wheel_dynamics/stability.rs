// ==============================================================================
// stability.rs — CHASSIS-LEVEL ASSISTS
// ------------------------------------------------------------------------------
// Pure functions over a BodyState snapshot; each returns the force/torque the
// caller should apply this tick (anti-roll lives in anti_roll.rs).
//
// - downforce:            −up × speed² × multiplier
// - lateral damping:      −(v · right) right × coefficient
// - grounded assist:      extra gravity when ≥3 wheels are down + air drag
// - anti-flip:            cross(up, Y) × anti_roll_force (× boost on impact)
// - wall assist:          flat lift + orientation slerp toward upright when a
//                         wall is within probe range on either side
// ==============================================================================

use nalgebra::{UnitQuaternion, Vector3};

use crate::backend::BodyState;

pub const GRAVITY: f32 = 9.81; // m/s^2

pub fn downforce(state: &BodyState, multiplier: f32) -> Vector3<f32> {
    let speed = state.speed();
    -state.up() * (speed * speed * multiplier)
}

pub fn lateral_damping(state: &BodyState, coefficient: f32) -> Vector3<f32> {
    let right = state.right();
    let lateral = right * state.linvel.dot(&right);
    -lateral * coefficient
}

/// Extra gravity for a planted car plus a small linear air drag.
pub fn grounded_assist(
    state: &BodyState,
    grounded: bool,
    gravity_scale: f32,
    air_resistance: f32,
) -> Vector3<f32> {
    let mut force = -state.linvel * air_resistance;
    if grounded {
        force += Vector3::new(0.0, -(gravity_scale - 1.0).max(0.0) * GRAVITY * state.mass, 0.0);
    }
    force
}

/// Righting torque once the body tilts past the threshold.
pub fn anti_flip_torque(
    state: &BodyState,
    dot_threshold: f32,
    anti_roll_force: f32,
    boost: f32,
) -> Option<Vector3<f32>> {
    let up = state.up();
    if up.dot(&Vector3::y()) >= dot_threshold {
        return None;
    }

    let axis = up.cross(&Vector3::y());
    if axis.norm_squared() < 1e-8 {
        // upside down: roll about the forward axis
        return Some(state.forward() * anti_roll_force * boost);
    }

    Some(axis * anti_roll_force * boost)
}

#[derive(Debug, Clone, Copy)]
pub struct WallCorrection {
    pub lift: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

/// Wall-proximity safety net. `wall_left`/`wall_right` are the side probe
/// results for this tick.
pub fn wall_assist(
    state: &BodyState,
    wall_left: bool,
    wall_right: bool,
    lift_force: f32,
    upright_rate: f32,
    dt: f32,
) -> Option<WallCorrection> {
    if !wall_left && !wall_right {
        return None;
    }

    let current = state.pose.rotation;
    let up = state.up();
    let tilt = UnitQuaternion::rotation_between(&up, &Vector3::y())
        .unwrap_or_else(|| UnitQuaternion::from_scaled_axis(state.forward() * std::f32::consts::PI));
    let upright = tilt * current;

    let t = (dt * upright_rate).clamp(0.0, 1.0);
    let rotation = current.try_slerp(&upright, t, 1e-6).unwrap_or(upright);

    Some(WallCorrection {
        lift: Vector3::y() * lift_force,
        rotation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Isometry3, Point3, Translation3};

    fn state(rotation: UnitQuaternion<f32>, linvel: Vector3<f32>) -> BodyState {
        BodyState {
            pose: Isometry3::from_parts(Translation3::new(0.0, 1.0, 0.0), rotation),
            center_of_mass: Point3::new(0.0, 1.0, 0.0),
            linvel,
            angvel: Vector3::zeros(),
            mass: 1_500.0,
            kinematic: false,
            collisions_enabled: true,
        }
    }

    #[test]
    fn downforce_is_quadratic_and_zero_at_rest() {
        let still = state(UnitQuaternion::identity(), Vector3::zeros());
        assert_eq!(downforce(&still, 2.0).norm(), 0.0);

        let slow = state(UnitQuaternion::identity(), Vector3::new(0.0, 0.0, -10.0));
        let fast = state(UnitQuaternion::identity(), Vector3::new(0.0, 0.0, -20.0));
        let a = downforce(&slow, 2.0);
        let b = downforce(&fast, 2.0);
        assert!(a.y < 0.0);
        assert!((b.y / a.y - 4.0).abs() < 1e-4);
    }

    #[test]
    fn lateral_damping_ignores_forward_motion() {
        let s = state(UnitQuaternion::identity(), Vector3::new(3.0, 0.0, -20.0));
        let f = lateral_damping(&s, 2_000.0);
        assert!((f.x + 6_000.0).abs() < 1e-2);
        assert!(f.z.abs() < 1e-4);
    }

    #[test]
    fn anti_flip_only_past_threshold() {
        let upright = state(UnitQuaternion::identity(), Vector3::zeros());
        assert!(anti_flip_torque(&upright, 0.5, 5_000.0, 1.0).is_none());

        let rolled = state(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 80f32.to_radians()),
            Vector3::zeros(),
        );
        let normal = anti_flip_torque(&rolled, 0.5, 5_000.0, 1.0).map(|t| t.norm());
        let boosted = anti_flip_torque(&rolled, 0.5, 5_000.0, 2.0).map(|t| t.norm());
        let (Some(n), Some(b)) = (normal, boosted) else {
            panic!("rolled body should get a righting torque");
        };
        assert!((b / n - 2.0).abs() < 1e-4);

        let flipped = state(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f32::consts::PI),
            Vector3::zeros(),
        );
        assert!(anti_flip_torque(&flipped, 0.5, 5_000.0, 1.0).is_some());
    }

    #[test]
    fn wall_assist_pulls_toward_upright() {
        let tilted = state(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 40f32.to_radians()),
            Vector3::zeros(),
        );
        assert!(wall_assist(&tilted, false, false, 5_000.0, 5.0, 1.0 / 60.0).is_none());

        let Some(fix) = wall_assist(&tilted, true, false, 5_000.0, 5.0, 1.0 / 60.0) else {
            panic!("wall on the left should trigger");
        };
        let before = tilted.up().dot(&Vector3::y());
        let after = (fix.rotation * Vector3::y()).dot(&Vector3::y());
        assert!(after > before);
        assert_eq!(fix.lift, Vector3::new(0.0, 5_000.0, 0.0));
    }

    #[test]
    fn grounded_assist_adds_gravity_only_when_planted() {
        let s = state(UnitQuaternion::identity(), Vector3::zeros());
        assert_eq!(grounded_assist(&s, false, 1.5, 0.1).norm(), 0.0);
        let f = grounded_assist(&s, true, 1.5, 0.1);
        assert!((f.y + 0.5 * GRAVITY * 1_500.0).abs() < 1e-2);
    }
}
