// ==============================================================================
// solve.rs — TIRE SOLVER (WHEEL SPIN + SLIP CURVES + FRICTION ELLIPSE)
// ==============================================================================
// ------------------------------------------------------------------------------
// Per grounded wheel:
//
// 1) Wheel basis on the contact plane: forward = chassis forward turned by the
//    steer angle about up, projected onto the ground; side = forward × normal.
// 2) Contact-point velocity split into v_long / v_lat.
// 3) Wheel spin: ω += (T_motor / I) dt, brake torque bleeds ω toward 0.
// 4) Slip:
//        forward  s_x = (ω r − v_long) / max(|v_long|, 1)
//        sideways s_y =  v_lat / max(|v_long|, 1)
//    Forces come from the forward/sideways FrictionCurve × Fz × grip.
// 5) No-overshoot caps: a wheel may not push more than the force that
//    cancels its quarter-mass share of the slip velocity in one step.
// 6) Combined slip ellipse against the two curve peaks.
// 7) Friction reaction spins the wheel back toward rolling; if it would
//    cross the rolling speed it snaps to v_long / r.
//
// Ungrounded wheels spin freely (motor, brake, light bearing drag) and emit
// no force.
//
// Outputs a list of AppliedForce actions; simulation.rs writes them to the
// chassis. Suspension force goes through the contact point, tire force
// through the contact point lifted toward COM height (roll_influence).
// ==============================================================================

use nalgebra::{Unit, UnitQuaternion, Vector3};

use crate::backend::BodyState;
use crate::vehicle::VehicleConfig;
use crate::wheel_dynamics::types::{AppliedForce, WheelState};

/// Below this ground speed slip is normalized by 1 m/s instead.
pub const SLIP_SPEED_FLOOR: f32 = 1.0; // m/s
/// Bearing drag on a free-spinning wheel (1/s).
pub const FREE_SPIN_DAMPING: f32 = 0.5;

pub fn solve_tires(
    cfg: &VehicleConfig,
    state: &BodyState,
    wheels: &mut [WheelState; 4],
    dt: f32,
) -> Vec<AppliedForce> {
    let mut out = Vec::with_capacity(8);
    if dt <= 0.0 {
        return out;
    }

    let up = state.up();
    let up_axis = Unit::new_normalize(up);
    let share = state.mass / wheels.len() as f32;

    for w in wheels.iter_mut() {
        let inertia = w.inertia();
        let max_spin = (cfg.max_speed * 1.5) / w.radius.max(1e-3);

        // --------------------------------------------------
        // Drive + brake on the wheel itself
        // --------------------------------------------------
        w.angular_velocity += w.motor_torque / inertia * dt;
        bleed_toward_zero(&mut w.angular_velocity, w.brake_torque / inertia * dt);

        if !w.grounded {
            w.angular_velocity *= (1.0 - FREE_SPIN_DAMPING * dt).max(0.0);
            w.angular_velocity = w.angular_velocity.clamp(-max_spin, max_spin);
            w.spin_angle = (w.spin_angle + w.angular_velocity * dt).rem_euclid(std::f32::consts::TAU);
            continue;
        }

        // --------------------------------------------------
        // Wheel basis (world)
        // --------------------------------------------------
        let n = w.contact_normal;
        let heading = UnitQuaternion::from_axis_angle(&up_axis, -w.steer_angle) * state.forward();
        let forward = (heading - n * heading.dot(&n))
            .try_normalize(1e-6)
            .unwrap_or_else(|| state.forward());
        let side = forward.cross(&n);

        let v = state.point_velocity(&w.contact_point);
        let v_long = v.dot(&forward);
        let v_lat = v.dot(&side);
        let fz = w.suspension_force;
        let slip_ref = v_long.abs().max(SLIP_SPEED_FLOOR);

        // --------------------------------------------------
        // Longitudinal
        // --------------------------------------------------
        let slip_speed = w.angular_velocity * w.radius - v_long;
        let slip_x = slip_speed / slip_ref;
        let max_fx = slip_speed.abs() * share / dt;
        let fx = (cfg.forward_friction.force(slip_x, fz) * cfg.grip_multiplier).clamp(-max_fx, max_fx);

        // --------------------------------------------------
        // Lateral
        // --------------------------------------------------
        let slip_y = v_lat / slip_ref;
        let max_fy = v_lat.abs() * share / dt;
        let fy = (-cfg.sideways_friction.force(slip_y, fz) * cfg.grip_multiplier).clamp(-max_fy, max_fy);

        // --------------------------------------------------
        // Combined slip ellipse
        // --------------------------------------------------
        let cap_x = (cfg.forward_friction.peak() * cfg.grip_multiplier * fz).max(1e-3);
        let cap_y = (cfg.sideways_friction.peak() * cfg.grip_multiplier * fz).max(1e-3);
        let nx = fx / cap_x;
        let ny = fy / cap_y;
        let ellipse = nx * nx + ny * ny;
        let scale = if ellipse > 1.0 { 1.0 / ellipse.sqrt() } else { 1.0 };
        let fx = fx * scale;
        let fy = fy * scale;

        // --------------------------------------------------
        // Reaction on the wheel, no crossing the rolling speed
        // --------------------------------------------------
        w.angular_velocity -= fx * w.radius / inertia * dt;
        let after = w.angular_velocity * w.radius - v_long;
        if slip_speed * after < 0.0 {
            w.angular_velocity = v_long / w.radius.max(1e-3);
        }
        w.angular_velocity = w.angular_velocity.clamp(-max_spin, max_spin);
        w.spin_angle = (w.spin_angle + w.angular_velocity * dt).rem_euclid(std::f32::consts::TAU);

        w.forward_slip = slip_x.clamp(-1.0, 1.0);
        w.sideways_slip = slip_y.clamp(-1.0, 1.0);

        // --------------------------------------------------
        // Emit forces
        // --------------------------------------------------
        if fz > 0.0 {
            out.push(AppliedForce::at(n * fz, w.contact_point));
        }

        let tire = forward * fx + side * fy;
        if tire.norm_squared() > 1e-8 {
            let lift = (state.center_of_mass - w.contact_point).dot(&up) * (1.0 - cfg.roll_influence);
            let app = w.contact_point + up * lift;
            out.push(AppliedForce::at(tire, app));
        }
    }

    out
}

fn bleed_toward_zero(value: &mut f32, amount: f32) {
    if amount <= 0.0 {
        return;
    }
    if value.abs() <= amount {
        *value = 0.0;
    } else {
        *value -= value.signum() * amount;
    }
}

/// Sum of a force list, for telemetry and tests.
pub fn net_force(forces: &[AppliedForce]) -> Vector3<f32> {
    forces.iter().fold(Vector3::zeros(), |acc, f| acc + f.force)
}
