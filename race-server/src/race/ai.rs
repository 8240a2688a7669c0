// ==============================================================================
// ai.rs — WAYPOINT-FOLLOWING AI DRIVER
// ------------------------------------------------------------------------------
// The AI car is a kinematic body. Each tick it:
// 1) checks it still has ground under it (3×3 down-ray grid); if not, it
//    teleports to its last passed checkpoint and re-targets the next one
// 2) turns toward the target checkpoint (rotate-towards, deg/s cap)
// 3) moves straight at the target at the current ramped speed
// 4) on arrival, reports the checkpoint to the shared progress graph and
//    picks the next one; stops once its race is finished
//
// Speed ramp (progress p over `acceleration_time`):
//   before the first checkpoint:  p ≤ 0.3, speed = lerp(0, initial, p)
//   after it (p restarted):       speed = lerp(initial, final, p)
// all × move_speed × the track's speed multiplier.
// ==============================================================================

use log::info;
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::backend::{BodyState, ChassisBody, QueryLayer, SceneQuery};
use crate::race::checkpoints::{CheckpointGraph, PassOutcome};
use crate::vehicle::VehicleId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub move_speed: f32,              // m/s at multiplier 1
    pub rotation_speed_deg: f32,      // deg/s
    pub waypoint_threshold: f32,      // m
    pub max_distance_from_track: f32, // m, grid ray length
    pub height_offset: f32,           // m, grid origin above body
    pub grid_spacing: f32,            // m
    pub acceleration_time: f32,       // s
    pub initial_speed_multiplier: f32,
    pub final_speed_multiplier: f32,
    pub pre_checkpoint_progress_cap: f32,
    pub respawn_lift: f32,            // m
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            move_speed: 50.0,
            rotation_speed_deg: 360.0,
            waypoint_threshold: 5.0,
            max_distance_from_track: 5.0,
            height_offset: 1.0,
            grid_spacing: 1.0,
            acceleration_time: 2.0,
            initial_speed_multiplier: 0.2,
            final_speed_multiplier: 1.1,
            pre_checkpoint_progress_cap: 0.3,
            respawn_lift: 0.5,
        }
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[derive(Debug, Clone, Copy)]
pub struct AiDriver {
    racing: bool,
    target: usize,
    last_passed: usize,
    passed_first: bool,
    acceleration: f32, // 0..1
    track_multiplier: f32,
    pub speed: f32,    // m/s, last tick
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiEvent {
    Passed(PassOutcome),
    Teleported { checkpoint: usize },
}

impl AiDriver {
    pub fn new(track_multiplier: f32) -> Self {
        Self {
            racing: false,
            target: 0,
            last_passed: 0,
            passed_first: false,
            acceleration: 0.0,
            track_multiplier,
            speed: 0.0,
        }
    }

    pub fn is_racing(&self) -> bool {
        self.racing
    }

    pub fn start_racing(&mut self) {
        if !self.racing {
            self.racing = true;
            self.acceleration = 0.0;
        }
    }

    pub fn stop_racing(&mut self) {
        self.racing = false;
        self.speed = 0.0;
    }

    pub fn target_speed(&self, cfg: &AiConfig) -> f32 {
        let multiplier = if self.passed_first {
            lerp(cfg.initial_speed_multiplier, cfg.final_speed_multiplier, self.acceleration)
        } else {
            lerp(0.0, cfg.initial_speed_multiplier, self.acceleration)
        };
        cfg.move_speed * multiplier * self.track_multiplier
    }

    fn ramp(&mut self, cfg: &AiConfig, dt: f32) {
        let rate = dt / cfg.acceleration_time.max(1e-3);
        let cap = if self.passed_first { 1.0 } else { cfg.pre_checkpoint_progress_cap };
        self.acceleration = (self.acceleration + rate).min(cap);
    }

    /// 3×3 grid of down rays; any hit within range counts as "over ground".
    pub fn over_ground<S: SceneQuery>(scene: &S, state: &BodyState, cfg: &AiConfig) -> bool {
        let center = state.position() + Vector3::y() * cfg.height_offset;
        let right = state.right();
        let forward = state.forward();

        (-1..=1).any(|x| {
            (-1..=1).any(|z| {
                let origin: Point3<f32> =
                    center + right * (x as f32 * cfg.grid_spacing) + forward * (z as f32 * cfg.grid_spacing);
                scene
                    .cast_ray(origin, -Vector3::y(), cfg.max_distance_from_track, QueryLayer::Any)
                    .is_some()
            })
        })
    }

    /// One AI tick. `over_ground` comes from the probe phase.
    #[allow(clippy::too_many_arguments)]
    pub fn drive<B: ChassisBody>(
        &mut self,
        id: VehicleId,
        cfg: &AiConfig,
        body: &mut B,
        graph: &mut CheckpointGraph,
        over_ground: bool,
        dt: f32,
    ) -> Vec<AiEvent> {
        let mut events = Vec::new();
        if !self.racing || graph.is_empty() {
            self.speed = 0.0;
            return events;
        }

        if !over_ground {
            if let Some(event) = self.teleport_to_last(id, cfg, body, graph) {
                events.push(event);
            }
            return events;
        }

        let Some(target) = graph.get(self.target).copied() else {
            self.target = 0;
            return events;
        };

        let state = body.state();
        let position = state.position();

        // flatten: the AI drives on the horizontal plane
        let mut to_target = target.position - position;
        to_target.y = 0.0;
        let distance = to_target.norm();

        if distance < cfg.waypoint_threshold {
            self.last_passed = self.target;
            let outcome = graph.pass(id, self.target);
            events.push(AiEvent::Passed(outcome));

            if !self.passed_first {
                self.passed_first = true;
                self.acceleration = 0.0;
            }

            self.target = graph.next(self.target);

            if graph.finished(id) {
                info!("🤖 {id} finished, parking");
                self.stop_racing();
            }
            return events;
        }

        self.ramp(cfg, dt);
        let speed = self.target_speed(cfg);
        self.speed = speed;

        let Some(dir) = to_target.try_normalize(1e-6) else {
            return events;
        };

        // chassis forward is −Z; face_towards maps +Z onto the direction
        let facing = UnitQuaternion::face_towards(&-dir, &Vector3::y());
        let max_turn = cfg.rotation_speed_deg.to_radians() * dt;
        let current = state.pose.rotation;
        let angle = current.angle_to(&facing);
        let rotation = if angle <= max_turn {
            facing
        } else {
            current.try_slerp(&facing, max_turn / angle, 1e-6).unwrap_or(facing)
        };

        let step = dir * (speed * dt).min(distance);
        let next = Isometry3::from_parts(
            Translation3::from(position.coords + step),
            rotation,
        );
        body.move_kinematic(next);

        events
    }

    /// Off the ground: back to the last passed checkpoint, aim for the next.
    pub fn teleport_to_last<B: ChassisBody>(
        &mut self,
        id: VehicleId,
        cfg: &AiConfig,
        body: &mut B,
        graph: &CheckpointGraph,
    ) -> Option<AiEvent> {
        let checkpoint = graph.get(self.last_passed).or_else(|| graph.get(0))?;
        let up = checkpoint.rotation * Vector3::y();
        let pose = Isometry3::from_parts(
            Translation3::from(checkpoint.position.coords + up * cfg.respawn_lift),
            checkpoint.rotation,
        );

        body.set_pose(pose);
        body.set_velocities(Vector3::zeros(), Vector3::zeros());
        self.target = graph.next(checkpoint.index);
        info!("🤖 {id} lost the track, back to checkpoint {}", checkpoint.index);

        Some(AiEvent::Teleported { checkpoint: checkpoint.index })
    }
}
