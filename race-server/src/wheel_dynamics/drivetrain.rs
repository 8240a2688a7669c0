// ==============================================================================
// drivetrain.rs — INPUT → PER-WHEEL STEER / MOTOR / BRAKE COMMANDS
// ------------------------------------------------------------------------------
// Steering:
// - speed-sensitive max angle (full lock at rest, `min_steer_scale` of it at
//   `steer_speed_reference` and above)
// - rate-limited toward the target (max_steer_rate rad/s), front wheels only
//
// Torque policy (per tick, writes all four WheelState records):
// - |throttle| > deadzone and no brake flag: motor torque on driven wheels
//   (rear full, front `front_drive_share`), zero brake torque everywhere.
//   Reverse uses `reverse_power`. Motor is cut once `max_speed` is reached in
//   the commanded direction.
// - brake flag: zero motor, brake split front 100% / rear `rear_brake_share`.
//   With `brake_before_reverse`, reverse input above `reverse_brake_speed`
//   forward is treated the same way until the car has slowed down.
// - neither: zero motor, small `coast_brake` on all wheels so a released car
//   does not roll forever.
// ==============================================================================

use serde::Serialize;

use crate::vehicle::VehicleConfig;
use crate::wheel_dynamics::types::{ControlInput, WheelState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    Drive,
    Brake,
    Coast,
}

/// Target front-wheel angle (rad) for a steering input at a given speed.
pub fn steer_target(cfg: &VehicleConfig, steering: f32, speed: f32) -> f32 {
    let max_angle = cfg.max_steer_angle_deg.to_radians();
    let reference = cfg.steer_speed_reference.max(1e-3);
    let min_scale = cfg.min_steer_scale.clamp(0.0, 1.0);

    let t = (speed.abs() / reference).clamp(0.0, 1.0);
    let steer_scale = 1.0 + (min_scale - 1.0) * t;

    steering.clamp(-1.0, 1.0) * max_angle * steer_scale
}

/// Move the applied steer angle toward the target, rate-limited.
pub fn update_steering(
    cfg: &VehicleConfig,
    steering: f32,
    speed: f32,
    current: f32,
    dt: f32,
) -> f32 {
    let target = steer_target(cfg, steering, speed);

    let delta = target - current;
    let max_step = cfg.max_steer_rate.max(0.0) * dt;

    current + delta.clamp(-max_step, max_step)
}

/// Write steer/motor/brake commands for this tick.
pub fn apply_drivetrain(
    cfg: &VehicleConfig,
    input: &ControlInput,
    forward_speed: f32,
    steer_angle: f32,
    wheels: &mut [WheelState; 4],
) -> DriveMode {
    for w in wheels.iter_mut() {
        w.steer_angle = if w.id.is_front() { steer_angle } else { 0.0 };
    }

    let throttle = input.throttle.clamp(-1.0, 1.0);
    let reversing_while_rolling = cfg.brake_before_reverse
        && throttle < -cfg.throttle_deadzone
        && forward_speed > cfg.reverse_brake_speed;

    if input.brake || reversing_while_rolling {
        for w in wheels.iter_mut() {
            w.motor_torque = 0.0;
            w.brake_torque = if w.id.is_front() {
                cfg.brake_force
            } else {
                cfg.brake_force * cfg.rear_brake_share
            };
        }
        return DriveMode::Brake;
    }

    if throttle.abs() > cfg.throttle_deadzone {
        let power = if throttle < 0.0 {
            cfg.motor_force * cfg.reverse_power
        } else {
            cfg.motor_force
        };

        // speed limiter: no more torque once we're at max in that direction
        let at_limit = forward_speed * throttle.signum() >= cfg.max_speed;
        let torque = if at_limit { 0.0 } else { throttle * power };

        for w in wheels.iter_mut() {
            w.brake_torque = 0.0;
            w.motor_torque = match (w.driven, w.id.is_front()) {
                (false, _) => 0.0,
                (true, false) => torque,
                (true, true) => torque * cfg.front_drive_share,
            };
        }
        return DriveMode::Drive;
    }

    for w in wheels.iter_mut() {
        w.motor_torque = 0.0;
        w.brake_torque = cfg.coast_brake;
    }
    DriveMode::Coast
}

/// Race not started: no commands at all.
pub fn freeze_drivetrain(wheels: &mut [WheelState; 4]) {
    for w in wheels.iter_mut() {
        w.zero_commands();
        w.angular_velocity = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::ROADSTER;
    use crate::wheel_dynamics::types::WheelId;

    fn wheels() -> [WheelState; 4] {
        ROADSTER.wheels.map(|w| w.build_state())
    }

    #[test]
    fn sub_deadzone_throttle_coasts() {
        let mut ws = wheels();
        let input = ControlInput { throttle: 0.05, ..Default::default() };

        let mode = apply_drivetrain(&ROADSTER, &input, 3.0, 0.0, &mut ws);

        assert_eq!(mode, DriveMode::Coast);
        for w in &ws {
            assert_eq!(w.motor_torque, 0.0);
            assert!(w.brake_torque > 0.0);
            assert!(w.brake_torque < ROADSTER.brake_force);
            assert_eq!(w.brake_torque, ROADSTER.coast_brake);
        }
    }

    #[test]
    fn throttle_drives_rear_full_and_front_share() {
        let mut ws = wheels();
        let input = ControlInput { throttle: 1.0, ..Default::default() };

        apply_drivetrain(&ROADSTER, &input, 0.0, 0.0, &mut ws);

        let rl = ws[WheelId::RL.index()];
        let fl = ws[WheelId::FL.index()];
        assert_eq!(rl.motor_torque, ROADSTER.motor_force);
        assert!((fl.motor_torque - ROADSTER.motor_force * ROADSTER.front_drive_share).abs() < 1e-3);
        assert!(ws.iter().all(|w| w.brake_torque == 0.0));
    }

    #[test]
    fn reverse_is_derated() {
        let mut ws = wheels();
        let input = ControlInput { throttle: -1.0, ..Default::default() };

        apply_drivetrain(&ROADSTER, &input, 0.0, 0.0, &mut ws);

        let rr = ws[WheelId::RR.index()];
        assert!((rr.motor_torque + ROADSTER.motor_force * ROADSTER.reverse_power).abs() < 1e-3);
    }

    #[test]
    fn reverse_brakes_first_when_configured() {
        let cfg = VehicleConfig { brake_before_reverse: true, ..ROADSTER };
        let input = ControlInput { throttle: -1.0, ..Default::default() };

        let mut ws = wheels();
        assert_eq!(apply_drivetrain(&cfg, &input, 8.0, 0.0, &mut ws), DriveMode::Brake);
        assert!(ws.iter().all(|w| w.motor_torque == 0.0));
        assert_eq!(ws[WheelId::FL.index()].brake_torque, cfg.brake_force);

        // nearly stopped: reverse engages
        let mut ws = wheels();
        assert_eq!(apply_drivetrain(&cfg, &input, 0.5, 0.0, &mut ws), DriveMode::Drive);
        assert!(ws[WheelId::RR.index()].motor_torque < 0.0);

        // off by default: reverse torque straight away
        let mut ws = wheels();
        assert_eq!(apply_drivetrain(&ROADSTER, &input, 8.0, 0.0, &mut ws), DriveMode::Drive);
    }

    #[test]
    fn brake_flag_wins_and_splits_front_rear() {
        let mut ws = wheels();
        let input = ControlInput { throttle: 1.0, brake: true, ..Default::default() };

        let mode = apply_drivetrain(&ROADSTER, &input, 10.0, 0.0, &mut ws);

        assert_eq!(mode, DriveMode::Brake);
        assert_eq!(ws[WheelId::FR.index()].brake_torque, ROADSTER.brake_force);
        assert!(
            (ws[WheelId::RR.index()].brake_torque - ROADSTER.brake_force * ROADSTER.rear_brake_share).abs()
                < 1e-3
        );
        assert!(ws.iter().all(|w| w.motor_torque == 0.0));
    }

    #[test]
    fn limiter_cuts_motor_at_max_speed() {
        let mut ws = wheels();
        let input = ControlInput { throttle: 1.0, ..Default::default() };

        apply_drivetrain(&ROADSTER, &input, ROADSTER.max_speed + 1.0, 0.0, &mut ws);

        assert!(ws.iter().all(|w| w.motor_torque == 0.0 && w.brake_torque == 0.0));
    }

    #[test]
    fn steering_only_turns_front_wheels() {
        let mut ws = wheels();
        apply_drivetrain(&ROADSTER, &ControlInput::default(), 0.0, 0.3, &mut ws);
        assert_eq!(ws[WheelId::FL.index()].steer_angle, 0.3);
        assert_eq!(ws[WheelId::RL.index()].steer_angle, 0.0);
    }

    #[test]
    fn steering_is_rate_limited_and_speed_scaled() {
        let dt = 1.0 / 60.0;
        let step = update_steering(&ROADSTER, 1.0, 0.0, 0.0, dt);
        assert!((step - ROADSTER.max_steer_rate * dt).abs() < 1e-6);

        let slow = steer_target(&ROADSTER, 1.0, 0.0);
        let fast = steer_target(&ROADSTER, 1.0, 100.0);
        assert!((slow - ROADSTER.max_steer_angle_deg.to_radians()).abs() < 1e-6);
        assert!((fast - slow * ROADSTER.min_steer_scale).abs() < 1e-6);
    }
}
