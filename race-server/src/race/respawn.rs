// ==============================================================================
// respawn.rs — STAGED RESPAWN STATE MACHINE
// ------------------------------------------------------------------------------
//   Idle ──request──▶ Teleporting ──▶ BrakeHold ──▶ BrakeRelease ──▶ Idle
//
// request (entry):  kinematic, collisions off, motors 0, brakes 2×B, steer 0
// Teleporting:      `pose_write_steps` ticks writing the target pose,
//                   then dynamics + collisions back on,
//                   `settle_steps` ticks zeroing velocity,
//                   one downward settle impulse
// BrakeHold:        one tick at 2×B
// BrakeRelease:     brake ramps 2×B → 0 over `release_duration`, then Idle
//
// The machine is advanced once per tick. A request while not Idle is
// dropped. With no target (empty checkpoint graph) only velocities are
// zeroed.
// ==============================================================================

use log::{debug, info};
use nalgebra::{Isometry3, Translation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::backend::ChassisBody;
use crate::race::adherence::RecoveryTrigger;
use crate::vehicle::VehicleId;
use crate::wheel_dynamics::stability::GRAVITY;
use crate::wheel_dynamics::WheelState;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RespawnConfig {
    pub pose_write_steps: u32,
    pub settle_steps: u32,
    pub lift: f32,                 // m above the checkpoint, along its up
    pub brake_multiplier: f32,     // × brake_force while held
    pub release_duration: f32,     // s
    /// Settle impulse = mass × g × this × dt (one tick of that much force).
    pub settle_impulse_gravities: f32,
}

impl Default for RespawnConfig {
    fn default() -> Self {
        Self {
            pose_write_steps: 3,
            settle_steps: 3,
            lift: 0.5,
            brake_multiplier: 2.0,
            release_duration: 0.5,
            settle_impulse_gravities: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RespawnPhase {
    #[default]
    Idle,
    Teleporting { step: u32 },
    BrakeHold,
    BrakeRelease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespawnEvent {
    Started(RecoveryTrigger),
    Completed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RespawnState {
    phase: RespawnPhase,
    elapsed: f32,
    target: Option<Isometry3<f32>>,
    held_brake: f32,
    episodes: u32,
}

impl RespawnState {
    pub fn phase(&self) -> RespawnPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != RespawnPhase::Idle
    }

    /// Physics (tires, stability) is suspended while the body is kinematic.
    pub fn is_teleporting(&self) -> bool {
        matches!(self.phase, RespawnPhase::Teleporting { .. })
    }

    pub fn episodes(&self) -> u32 {
        self.episodes
    }

    /// Idle → Teleporting. Returns false (and does nothing) if an episode
    /// is already running.
    #[allow(clippy::too_many_arguments)]
    pub fn request<B: ChassisBody>(
        &mut self,
        id: VehicleId,
        trigger: RecoveryTrigger,
        checkpoint_pose: Option<Isometry3<f32>>,
        body: &mut B,
        wheels: &mut [WheelState; 4],
        brake_force: f32,
        cfg: &RespawnConfig,
    ) -> Option<RespawnEvent> {
        if self.is_active() {
            debug!("♻️ {id} respawn request ({trigger:?}) dropped, already respawning");
            return None;
        }

        body.set_kinematic(true);
        body.set_collisions_enabled(false);

        self.held_brake = brake_force * cfg.brake_multiplier;
        for w in wheels.iter_mut() {
            w.motor_torque = 0.0;
            w.brake_torque = self.held_brake;
            w.steer_angle = 0.0;
            w.angular_velocity = 0.0;
        }

        self.target = checkpoint_pose.map(|pose| {
            let up = pose.rotation * Vector3::y();
            let lifted = pose.translation.vector + up * cfg.lift;
            Isometry3::from_parts(Translation3::from(lifted), pose.rotation)
        });
        self.phase = RespawnPhase::Teleporting { step: 0 };
        self.elapsed = 0.0;
        self.episodes += 1;

        info!("♻️ {id} respawning ({trigger:?})");
        Some(RespawnEvent::Started(trigger))
    }

    /// Advance one tick.
    pub fn advance<B: ChassisBody>(
        &mut self,
        id: VehicleId,
        body: &mut B,
        wheels: &mut [WheelState; 4],
        cfg: &RespawnConfig,
        dt: f32,
    ) -> Option<RespawnEvent> {
        match self.phase {
            RespawnPhase::Idle => None,

            RespawnPhase::Teleporting { step } => {
                let writes = cfg.pose_write_steps.max(1);
                let settles = cfg.settle_steps;

                if step < writes {
                    if let Some(target) = self.target {
                        body.set_pose(target);
                    }
                    body.set_velocities(Vector3::zeros(), Vector3::zeros());
                    debug!("♻️ {id} pose write {}/{writes}", step + 1);
                } else if step == writes {
                    body.set_kinematic(false);
                    body.set_collisions_enabled(true);
                    body.set_velocities(Vector3::zeros(), Vector3::zeros());
                } else if step <= writes + settles {
                    body.set_velocities(Vector3::zeros(), Vector3::zeros());
                }

                if step >= writes + settles {
                    let mass = body.state().mass;
                    let impulse = mass * GRAVITY * cfg.settle_impulse_gravities * dt;
                    body.apply_impulse(Vector3::new(0.0, -impulse, 0.0));
                    self.phase = RespawnPhase::BrakeHold;
                } else {
                    self.phase = RespawnPhase::Teleporting { step: step + 1 };
                }

                self.hold_brakes(wheels);
                None
            }

            RespawnPhase::BrakeHold => {
                self.hold_brakes(wheels);
                self.phase = RespawnPhase::BrakeRelease;
                self.elapsed = 0.0;
                None
            }

            RespawnPhase::BrakeRelease => {
                self.elapsed += dt;
                let duration = cfg.release_duration.max(1e-3);
                let t = (self.elapsed / duration).clamp(0.0, 1.0);
                let brake = self.held_brake * (1.0 - t);

                for w in wheels.iter_mut() {
                    w.motor_torque = 0.0;
                    w.brake_torque = brake;
                }

                if t >= 1.0 {
                    self.finish(wheels);
                    info!("♻️ {id} respawn complete");
                    return Some(RespawnEvent::Completed);
                }
                None
            }
        }
    }

    /// Forced return to Idle (scene teardown): dynamics and collisions back,
    /// brakes released. No event is emitted.
    pub fn abort<B: ChassisBody>(&mut self, body: &mut B, wheels: &mut [WheelState; 4]) {
        if !self.is_active() {
            return;
        }
        body.set_kinematic(false);
        body.set_collisions_enabled(true);
        self.finish(wheels);
    }

    fn hold_brakes(&self, wheels: &mut [WheelState; 4]) {
        for w in wheels.iter_mut() {
            w.motor_torque = 0.0;
            w.brake_torque = self.held_brake;
        }
    }

    fn finish(&mut self, wheels: &mut [WheelState; 4]) {
        for w in wheels.iter_mut() {
            w.brake_torque = 0.0;
            w.motor_torque = 0.0;
        }
        self.phase = RespawnPhase::Idle;
        self.elapsed = 0.0;
        self.target = None;
    }
}
