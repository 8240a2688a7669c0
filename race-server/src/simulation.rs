// ==============================================================================
// simulation.rs — FIXED-STEP RACE ORCHESTRATOR
// ------------------------------------------------------------------------------
// Owns every vehicle record, the AI drivers and the shared checkpoint graph.
// One call to `fixed_step` advances the race by one physics tick, strictly
// sequentially, vehicle by vehicle (BTreeMap order):
//
//   player / p2 car                       AI car
//   ---------------                       ------
//   probe   (4 wheel rays, track fan,     ground grid
//            side wall rays)
//   respawn sequence / freeze / drive     waypoint follow (kinematic)
//   traction control
//   tire solve + anti-roll + assists
//   apply forces
//   adherence monitor -> respawn request
//   checkpoint gates -> progress          (arrival -> progress)
//
// The physics world is stepped by the caller afterwards.
// ==============================================================================

use std::collections::BTreeMap;

use log::{error, info, warn};
use nalgebra::{Isometry3, Point3, Vector3};
use serde::Serialize;

use crate::backend::{BodyState, ChassisBody, PhysicsBackend, QueryLayer, SceneQuery};
use crate::config::{RaceConfig, TrackConfig};
use crate::race::ai::AiEvent;
use crate::race::{
    AdherenceMonitor, AiConfig, AiDriver, CheckpointGraph, MonitorConfig, PassOutcome, RaceSession,
    RecoveryTrigger, RespawnConfig, RespawnEvent, RespawnPhase,
};
use crate::suspension_contact::{apply_contact, probe_wheel, wheel_world_pose, SuspensionContact};
use crate::vehicle::{ConfigFault, Vehicle, VehicleConfig, VehicleId, VehicleRole};
use crate::wheel_dynamics::anti_roll::anti_roll_forces;
use crate::wheel_dynamics::drivetrain::{apply_drivetrain, freeze_drivetrain, update_steering, DriveMode};
use crate::wheel_dynamics::stability::{
    anti_flip_torque, downforce, grounded_assist, lateral_damping, wall_assist,
};
use crate::wheel_dynamics::traction::apply_traction_control;
use crate::wheel_dynamics::{solve_tires, AppliedForce, ControlInput, WheelId};

// ---------------------------------------------
// EVENTS
// ---------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RaceEvent {
    RaceStarted,
    CheckpointPassed { vehicle: VehicleId, index: usize },
    LapCompleted { vehicle: VehicleId, lap: u32 },
    Finished { vehicle: VehicleId, place: u32 },
    RespawnStarted { vehicle: VehicleId, trigger: RecoveryTrigger },
    RespawnCompleted { vehicle: VehicleId },
    AiTeleported { vehicle: VehicleId, checkpoint: usize },
}

fn progress_events(vehicle: VehicleId, outcome: PassOutcome, events: &mut Vec<RaceEvent>) {
    match outcome {
        PassOutcome::Advanced { index } => events.push(RaceEvent::CheckpointPassed { vehicle, index }),
        PassOutcome::LapCompleted { lap } => {
            events.push(RaceEvent::CheckpointPassed { vehicle, index: 0 });
            events.push(RaceEvent::LapCompleted { vehicle, lap });
        }
        PassOutcome::Finished { lap, place } => {
            events.push(RaceEvent::CheckpointPassed { vehicle, index: 0 });
            events.push(RaceEvent::LapCompleted { vehicle, lap });
            events.push(RaceEvent::Finished { vehicle, place });
        }
        PassOutcome::Ignored => {}
    }
}

// ---------------------------------------------
// TELEMETRY
// ---------------------------------------------
#[derive(Debug, Clone, Serialize)]
pub struct WheelTelemetry {
    pub id: WheelId,
    pub grounded: bool,
    pub travel: f32,
    pub forward_slip: f32,
    pub sideways_slip: f32,
    pub steer_angle: f32,
    pub position: [f32; 3],
    pub rotation: [f32; 4], // x, y, z, w
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleTelemetry {
    pub id: VehicleId,
    pub role: VehicleRole,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub speed: f32,         // m/s
    pub speed_kmh: f32,
    pub steer_angle: f32,
    pub drive_mode: DriveMode,
    pub grounded_wheels: usize,
    pub on_track: bool,
    pub respawn: RespawnPhase,
    pub lap: u32,
    pub total_laps: u32,
    pub last_checkpoint: usize,
    pub last_checkpoint_position: Option<[f32; 3]>,
    pub last_checkpoint_rotation: Option<[f32; 4]>, // x, y, z, w
    pub race_fraction: f32,
    pub finished: bool,
    pub place: Option<u32>,
    pub engine_muted: bool,
    pub engine_stopped: bool,
    pub disabled: Option<String>,
    pub wheels: Vec<WheelTelemetry>,
}

fn pose_arrays(pose: &Isometry3<f32>) -> ([f32; 3], [f32; 4]) {
    let t = pose.translation.vector;
    let q = pose.rotation.quaternion();
    ([t.x, t.y, t.z], [q.i, q.j, q.k, q.w])
}

// ---------------------------------------------
// ORCHESTRATOR
// ---------------------------------------------
struct Tick<'a> {
    graph: &'a mut CheckpointGraph,
    monitor: &'a MonitorConfig,
    respawn: &'a RespawnConfig,
    clock: f32,
    started: bool,
    accepting_input: bool,
    dt: f32,
}

pub struct RaceSimulation {
    vehicles: BTreeMap<VehicleId, Vehicle>,
    ai: BTreeMap<VehicleId, AiDriver>,
    graph: CheckpointGraph,

    monitor_cfg: MonitorConfig,
    respawn_cfg: RespawnConfig,
    ai_cfg: AiConfig,
    ai_speed_multiplier: f32,

    clock: f32,
    race_live: bool,
    accepting_input: bool,
    next_id: u32,
}

impl RaceSimulation {
    pub fn new(cfg: &RaceConfig, track: &TrackConfig) -> Self {
        if let Err(fault) = track.validate() {
            error!("❌ Track '{}': {fault}; progress and respawn are disabled", track.name);
        }

        Self {
            vehicles: BTreeMap::new(),
            ai: BTreeMap::new(),
            graph: CheckpointGraph::new(track.build_checkpoints(), cfg.total_laps),
            monitor_cfg: cfg.monitor,
            respawn_cfg: cfg.respawn,
            ai_cfg: cfg.ai,
            ai_speed_multiplier: track.ai_speed_multiplier,
            clock: 0.0,
            race_live: false,
            accepting_input: true,
            next_id: 1,
        }
    }

    /// Register a car. The caller spawns its body in the physics world under
    /// the returned id (AI bodies kinematic).
    pub fn add_vehicle(&mut self, role: VehicleRole, config: VehicleConfig) -> VehicleId {
        let id = VehicleId(self.next_id);
        self.next_id += 1;

        let vehicle = Vehicle::new(id, role, config);
        if let Some(fault) = &vehicle.disabled {
            error!("❌ {id} ({}) disabled: {fault}", role.as_str());
        } else {
            info!("🚗 {id} joined as {}", role.as_str());
        }

        if role.is_ai() {
            let mut driver = AiDriver::new(self.ai_speed_multiplier);
            if self.race_live {
                driver.start_racing();
            }
            self.ai.insert(id, driver);
        }
        self.vehicles.insert(id, vehicle);
        id
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(&id)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    pub fn vehicle_by_role(&self, role: VehicleRole) -> Option<VehicleId> {
        self.vehicles.values().find(|v| v.role == role).map(|v| v.id)
    }

    pub fn graph(&self) -> &CheckpointGraph {
        &self.graph
    }

    pub fn ai_driver(&self, id: VehicleId) -> Option<&AiDriver> {
        self.ai.get(&id)
    }

    pub fn clock(&self) -> f32 {
        self.clock
    }

    pub fn is_accepting_input(&self) -> bool {
        self.accepting_input
    }

    /// Latest control input for a human car. Ignored for AI cars and after
    /// scene cleanup.
    pub fn set_input(&mut self, id: VehicleId, input: ControlInput) -> bool {
        if !self.accepting_input || self.ai.contains_key(&id) {
            return false;
        }
        match self.vehicles.get_mut(&id) {
            Some(v) => {
                v.set_input(input);
                true
            }
            None => false,
        }
    }

    /// Manual reset; handled on the next tick as a `Manual` recovery.
    pub fn request_reset(&mut self, id: VehicleId) {
        if !self.accepting_input {
            return;
        }
        if let Some(v) = self.vehicles.get_mut(&id) {
            v.reset_requested = true;
        }
    }

    pub fn mute_engine(&mut self, id: VehicleId, muted: bool) {
        if let Some(v) = self.vehicles.get_mut(&id) {
            v.engine_muted = muted;
        }
    }

    /// Recorded for the audio side only; the drivetrain ignores it.
    pub fn stop_engine(&mut self, id: VehicleId, stopped: bool) {
        if let Some(v) = self.vehicles.get_mut(&id) {
            v.engine_stopped = stopped;
            info!("🔧 {id} engine {}", if stopped { "stopped" } else { "running" });
        }
    }

    pub fn all_finished(&self) -> bool {
        !self.vehicles.is_empty() && self.vehicles.keys().all(|id| self.graph.finished(*id))
    }

    /// Scene teardown: stop input, end running respawns, forget progress.
    pub fn cleanup_for_scene_change<W: PhysicsBackend>(&mut self, world: &mut W) {
        self.accepting_input = false;

        for v in self.vehicles.values_mut() {
            if let Some(mut body) = world.chassis(v.id) {
                v.respawn.abort(&mut body, &mut v.wheels);
            }
            v.monitor.reset();
            v.input = ControlInput::default();
            v.reset_requested = false;
            v.last_position = None;
            v.steer_angle = 0.0;
            freeze_drivetrain(&mut v.wheels);
        }
        for driver in self.ai.values_mut() {
            driver.stop_racing();
        }

        self.graph.reset();
        self.race_live = false;
        info!("♻️ Race state cleaned up for scene change");
    }

    pub fn telemetry(&self, id: VehicleId) -> Option<VehicleTelemetry> {
        let v = self.vehicles.get(&id)?;
        let state = v.last_state?;
        let (position, rotation) = pose_arrays(&state.pose);
        let progress = self.graph.progress(id);
        let checkpoint_pose = self.graph.get(progress.last_passed).map(|c| pose_arrays(&c.pose()));
        let speed = match self.ai.get(&id) {
            Some(driver) => driver.speed,
            None => v.speed,
        };

        let mounts = v.config.mount_points();
        let wheels = v
            .wheels
            .iter()
            .enumerate()
            .map(|(slot, w)| {
                let contact = v.contacts[slot].unwrap_or_else(|| airborne_contact(&state, mounts[slot], w.id));
                let (position, rotation) = pose_arrays(&wheel_world_pose(&state, &contact, w));
                WheelTelemetry {
                    id: w.id,
                    grounded: w.grounded,
                    travel: w.travel,
                    forward_slip: w.forward_slip,
                    sideways_slip: w.sideways_slip,
                    steer_angle: w.steer_angle,
                    position,
                    rotation,
                }
            })
            .collect();

        Some(VehicleTelemetry {
            id,
            role: v.role,
            position,
            rotation,
            speed,
            speed_kmh: speed * 3.6,
            steer_angle: v.steer_angle,
            drive_mode: v.drive_mode,
            grounded_wheels: v.grounded_wheels(),
            on_track: v.on_track(),
            respawn: v.respawn.phase(),
            lap: progress.lap,
            total_laps: self.graph.total_laps(),
            last_checkpoint: progress.last_passed,
            last_checkpoint_position: checkpoint_pose.map(|(p, _)| p),
            last_checkpoint_rotation: checkpoint_pose.map(|(_, r)| r),
            race_fraction: self.graph.race_fraction(id),
            finished: progress.finished,
            place: progress.place,
            engine_muted: v.engine_muted,
            engine_stopped: v.engine_stopped,
            disabled: v.disabled.as_ref().map(ConfigFault::to_string),
            wheels,
        })
    }

    // ------------------------------------------------------------------
    // One physics tick
    // ------------------------------------------------------------------
    pub fn fixed_step<W: PhysicsBackend>(
        &mut self,
        world: &mut W,
        session: &RaceSession,
        dt: f32,
    ) -> Vec<RaceEvent> {
        let mut events = Vec::new();
        if dt <= 0.0 {
            return events;
        }

        world.begin_tick();
        self.clock += dt;

        let started = session.has_started() && self.accepting_input;
        if started && !self.race_live {
            self.race_live = true;
            for driver in self.ai.values_mut() {
                driver.start_racing();
            }
            info!("🏁 Race started with {} cars", self.vehicles.len());
            events.push(RaceEvent::RaceStarted);
        }

        let mut ctx = Tick {
            graph: &mut self.graph,
            monitor: &self.monitor_cfg,
            respawn: &self.respawn_cfg,
            clock: self.clock,
            started,
            accepting_input: self.accepting_input,
            dt,
        };

        for vehicle in self.vehicles.values_mut() {
            if vehicle.disabled.is_some() {
                continue;
            }
            match self.ai.get_mut(&vehicle.id) {
                Some(driver) => step_ai(world, vehicle, driver, &self.ai_cfg, &mut ctx, &mut events),
                None => step_driven(world, vehicle, &mut ctx, &mut events),
            }
        }

        events
    }
}

fn airborne_contact(state: &BodyState, mount_local: Point3<f32>, wheel: WheelId) -> SuspensionContact {
    let mount = state.local_to_world(&mount_local);
    SuspensionContact {
        wheel,
        grounded: false,
        mount,
        hit_point: mount,
        ground_normal: state.up(),
        surface: None,
        hit_distance: 0.0,
        travel: 1.0,
        travel_rate: 0.0,
        suspension_force: 0.0,
    }
}

// ---------------------------------------------
// HUMAN-DRIVEN CAR
// ---------------------------------------------
fn step_driven<W: PhysicsBackend>(
    world: &mut W,
    v: &mut Vehicle,
    ctx: &mut Tick<'_>,
    events: &mut Vec<RaceEvent>,
) {
    let id = v.id;
    let cfg = v.config;
    let Some(state) = world.chassis(id).map(|c| c.state()) else {
        warn!("⚠️ {id} has no physics body");
        return;
    };
    let mounts = cfg.mount_points();

    // --------------------------------------------------
    // Probe phase (read-only scene)
    // --------------------------------------------------
    let due = v.monitor.is_due(ctx.clock, ctx.monitor);
    let mut track_hit = v.monitor.on_track();
    let mut wall_left = false;
    let mut wall_right = false;

    if let Some(scene) = world.scene(id) {
        for (slot, wheel) in v.wheels.iter().enumerate() {
            v.contacts[slot] = Some(probe_wheel(&scene, &state, mounts[slot], wheel, ctx.dt));
        }
        if due {
            track_hit = AdherenceMonitor::probe(&scene, &state, ctx.monitor);
        }
        if cfg.wall_assist {
            let origin = state.position();
            let reach = cfg.wall_probe_distance;
            wall_left = scene.cast_ray(origin, -state.right(), reach, QueryLayer::Walls).is_some();
            wall_right = scene.cast_ray(origin, state.right(), reach, QueryLayer::Walls).is_some();
        }
    }

    for (wheel, contact) in v.wheels.iter_mut().zip(v.contacts.iter()) {
        match contact {
            Some(c) => apply_contact(wheel, c),
            None => wheel.clear_contact(),
        }
    }
    v.speed = state.speed();
    v.last_state = Some(state);
    let collided = world.take_collision_started(id);

    let Some(mut body) = world.chassis(id) else {
        return;
    };

    // --------------------------------------------------
    // Respawn sequence owns the car while active
    // --------------------------------------------------
    if v.respawn.is_active() {
        if let Some(RespawnEvent::Completed) = v.respawn.advance(id, &mut body, &mut v.wheels, ctx.respawn, ctx.dt) {
            v.monitor.rearm(ctx.clock);
            events.push(RaceEvent::RespawnCompleted { vehicle: id });
        }
        v.last_position = None;
        if v.respawn.is_teleporting() {
            return;
        }
    }

    // --------------------------------------------------
    // Commands
    // --------------------------------------------------
    if v.respawn.is_active() {
        // brakes are driven by the respawn sequence
        v.drive_mode = DriveMode::Brake;
        for w in v.wheels.iter_mut() {
            w.steer_angle = 0.0;
        }
    } else if !ctx.started {
        freeze_drivetrain(&mut v.wheels);
        v.steer_angle = 0.0;
        v.drive_mode = DriveMode::Coast;
        body.set_velocities(Vector3::new(0.0, state.linvel.y, 0.0), Vector3::zeros());
    } else {
        let forward_speed = state.forward_speed();
        v.steer_angle = update_steering(&cfg, v.input.steering, forward_speed, v.steer_angle, ctx.dt);
        v.drive_mode = apply_drivetrain(&cfg, &v.input, forward_speed, v.steer_angle, &mut v.wheels);
        apply_traction_control(cfg.traction_control, cfg.max_slip_ratio, &mut v.wheels);
    }

    // --------------------------------------------------
    // Forces: collect, then apply
    // --------------------------------------------------
    let grounded = v.is_grounded();
    let world_mounts = mounts.map(|m| state.local_to_world(&m));

    let mut forces = solve_tires(&cfg, &state, &mut v.wheels, ctx.dt);
    forces.extend(anti_roll_forces(
        &v.wheels,
        &world_mounts,
        state.up(),
        cfg.anti_roll_force,
        cfg.rear_anti_roll_share,
    ));
    forces.push(AppliedForce::at_com(downforce(&state, cfg.downforce_multiplier)));
    if grounded {
        forces.push(AppliedForce::at_com(lateral_damping(&state, cfg.lateral_stabilization)));
    }
    forces.push(AppliedForce::at_com(grounded_assist(
        &state,
        grounded,
        cfg.grounded_gravity_scale,
        cfg.air_resistance,
    )));

    for f in &forces {
        match f.at_point {
            Some(point) => body.apply_force_at_point(f.force, point),
            None => body.apply_force(f.force),
        }
    }

    let boost = if collided { cfg.collision_flip_boost } else { 1.0 };
    if let Some(torque) = anti_flip_torque(&state, cfg.flip_dot_threshold, cfg.anti_roll_force, boost) {
        body.apply_torque(torque);
    }

    if cfg.wall_assist {
        if let Some(fix) = wall_assist(&state, wall_left, wall_right, cfg.wall_lift_force, cfg.wall_upright_rate, ctx.dt) {
            body.apply_force(fix.lift);
            body.set_pose(Isometry3::from_parts(state.pose.translation, fix.rotation));
        }
    }

    // --------------------------------------------------
    // Adherence -> respawn
    // --------------------------------------------------
    // after scene cleanup no new episode may start
    let mut trigger = None;
    if due && ctx.accepting_input {
        trigger = v.monitor.evaluate(id, ctx.clock, &state, track_hit, v.respawn.is_active(), ctx.monitor);
    }
    if std::mem::take(&mut v.reset_requested) && ctx.accepting_input {
        trigger = Some(RecoveryTrigger::Manual);
    }

    if let Some(trigger) = trigger {
        let target = ctx.graph.respawn_checkpoint(id).map(|c| c.pose());
        let started = v.respawn.request(
            id,
            trigger,
            target,
            &mut body,
            &mut v.wheels,
            cfg.brake_force,
            ctx.respawn,
        );
        if let Some(RespawnEvent::Started(trigger)) = started {
            v.last_position = None;
            events.push(RaceEvent::RespawnStarted { vehicle: id, trigger });
        }
    }

    // --------------------------------------------------
    // Checkpoint gates
    // --------------------------------------------------
    if v.respawn.is_active() {
        v.last_position = None;
        return;
    }

    let position = state.position();
    if ctx.started {
        if let Some(previous) = v.last_position {
            for index in ctx.graph.gates_entered(&previous, &position) {
                progress_events(id, ctx.graph.pass(id, index), events);
            }
        }
    }
    v.last_position = Some(position);
}

// ---------------------------------------------
// AI CAR
// ---------------------------------------------
fn step_ai<W: PhysicsBackend>(
    world: &mut W,
    v: &mut Vehicle,
    driver: &mut AiDriver,
    cfg: &AiConfig,
    ctx: &mut Tick<'_>,
    events: &mut Vec<RaceEvent>,
) {
    let id = v.id;
    let Some(state) = world.chassis(id).map(|c| c.state()) else {
        warn!("⚠️ {id} has no physics body");
        return;
    };
    v.last_state = Some(state);

    let over_ground = if driver.is_racing() {
        world
            .scene(id)
            .map(|scene| AiDriver::over_ground(&scene, &state, cfg))
            .unwrap_or(true)
    } else {
        true
    };

    let Some(mut body) = world.chassis(id) else {
        return;
    };

    if !ctx.started {
        body.set_velocities(Vector3::zeros(), Vector3::zeros());
    }

    for event in driver.drive(id, cfg, &mut body, ctx.graph, over_ground, ctx.dt) {
        match event {
            AiEvent::Passed(outcome) => progress_events(id, outcome, events),
            AiEvent::Teleported { checkpoint } => {
                events.push(RaceEvent::AiTeleported { vehicle: id, checkpoint });
            }
        }
    }
    v.speed = driver.speed;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RaceMode;
    use crate::sandbox::SandboxWorld;
    use crate::vehicle::ROADSTER;
    use nalgebra::{Translation3, UnitQuaternion};

    const DT: f32 = 1.0 / 60.0;

    fn setup(mode: RaceMode) -> (RaceSimulation, SandboxWorld, TrackConfig) {
        let cfg = RaceConfig { mode, ..RaceConfig::default() };
        let track = TrackConfig::circuit();
        let mut sim = RaceSimulation::new(&cfg, &track);
        let mut world = SandboxWorld::from_track(&track);
        for (slot, role) in cfg.roster().into_iter().enumerate() {
            let car = ROADSTER;
            let id = sim.add_vehicle(role, car);
            world.spawn(id, &car, track.grid.slot_pose(slot), role.is_ai());
        }
        (sim, world, track)
    }

    #[test]
    fn cars_settle_on_their_springs_before_the_start() {
        let (mut sim, mut world, _) = setup(RaceMode::TwoPlayer);
        let session = RaceSession::new(3.0);

        for _ in 0..120 {
            let events = sim.fixed_step(&mut world, &session, DT);
            assert!(events.is_empty());
            world.step(DT);
        }

        for v in sim.vehicles() {
            assert_eq!(v.grounded_wheels(), 4, "{} not on its wheels", v.id);
            let y = world.body(v.id).map(|b| b.pose.translation.y).unwrap_or_default();
            assert!(y > 0.3 && y < 1.2, "{} rides at {y}", v.id);
        }
    }

    #[test]
    fn input_is_ignored_for_ai_and_after_cleanup() {
        let (mut sim, mut world, _) = setup(RaceMode::VersusAi);
        let p1 = sim.vehicle_by_role(VehicleRole::Player1).unwrap_or(VehicleId(0));
        let ai = sim.vehicle_by_role(VehicleRole::Ai).unwrap_or(VehicleId(0));
        let push = ControlInput { throttle: 1.0, ..Default::default() };

        assert!(sim.set_input(p1, push));
        assert!(!sim.set_input(ai, push));

        sim.cleanup_for_scene_change(&mut world);
        assert!(!sim.set_input(p1, push));
        assert!(!sim.is_accepting_input());
    }

    #[test]
    fn race_start_is_announced_once_and_wakes_the_ai() {
        let (mut sim, mut world, _) = setup(RaceMode::VersusAi);
        let session = RaceSession::started();
        let ai = sim.vehicle_by_role(VehicleRole::Ai).unwrap_or(VehicleId(0));

        let first = sim.fixed_step(&mut world, &session, DT);
        world.step(DT);
        let second = sim.fixed_step(&mut world, &session, DT);

        assert!(first.contains(&RaceEvent::RaceStarted));
        assert!(!second.contains(&RaceEvent::RaceStarted));
        assert!(sim.ai_driver(ai).is_some_and(|d| d.is_racing()));
    }

    #[test]
    fn manual_reset_starts_one_episode() {
        let (mut sim, mut world, _) = setup(RaceMode::TwoPlayer);
        let session = RaceSession::started();
        let p1 = sim.vehicle_by_role(VehicleRole::Player1).unwrap_or(VehicleId(0));

        sim.request_reset(p1);
        sim.request_reset(p1);
        let mut started = 0;
        let mut completed = 0;
        for _ in 0..120 {
            for e in sim.fixed_step(&mut world, &session, DT) {
                match e {
                    RaceEvent::RespawnStarted { vehicle, trigger } if vehicle == p1 => {
                        assert_eq!(trigger, RecoveryTrigger::Manual);
                        started += 1;
                    }
                    RaceEvent::RespawnCompleted { vehicle } if vehicle == p1 => completed += 1,
                    _ => {}
                }
            }
            world.step(DT);
        }
        assert_eq!(started, 1);
        assert_eq!(completed, 1);
    }

    #[test]
    fn disabled_car_gets_no_physics() {
        let cfg = RaceConfig::default();
        let track = TrackConfig::circuit();
        let mut sim = RaceSimulation::new(&cfg, &track);
        let mut world = SandboxWorld::from_track(&track);

        let mut broken = ROADSTER;
        broken.mass = -5.0;
        let id = sim.add_vehicle(VehicleRole::Player1, broken);
        world.spawn(id, &ROADSTER, track.grid.slot_pose(0), false);

        let _ = sim.fixed_step(&mut world, &RaceSession::started(), DT);
        assert!(sim.vehicle(id).is_some_and(|v| v.disabled.is_some() && v.last_state.is_none()));
        assert!(sim.telemetry(id).is_none());
    }

    #[test]
    fn telemetry_reports_pose_and_progress() {
        let (mut sim, mut world, track) = setup(RaceMode::TwoPlayer);
        let p1 = sim.vehicle_by_role(VehicleRole::Player1).unwrap_or(VehicleId(0));
        let _ = sim.fixed_step(&mut world, &RaceSession::new(3.0), DT);

        let t = match sim.telemetry(p1) {
            Some(t) => t,
            None => panic!("no telemetry"),
        };
        let start = track.grid.slot_pose(0).translation.vector;
        assert!((t.position[0] - start.x).abs() < 1e-4);
        assert_eq!(t.wheels.len(), 4);
        assert_eq!(t.total_laps, 3);
        assert_eq!(t.lap, 0);

        // no gate passed yet: checkpoint 0 is reported
        let gate = track.build_checkpoints()[0];
        assert_eq!(t.last_checkpoint, 0);
        assert_eq!(t.last_checkpoint_position, Some([gate.position.x, gate.position.y, gate.position.z]));
        let q = gate.rotation.quaternion();
        assert_eq!(t.last_checkpoint_rotation, Some([q.i, q.j, q.k, q.w]));
        assert!(serde_json::to_string(&t).is_ok());
    }

    #[test]
    fn impact_doubles_the_righting_torque_once() {
        let (mut sim, mut world, track) = setup(RaceMode::TwoPlayer);
        let session = RaceSession::started();
        let p1 = sim.vehicle_by_role(VehicleRole::Player1).unwrap_or(VehicleId(0));
        let p2 = sim.vehicle_by_role(VehicleRole::Player2).unwrap_or(VehicleId(0));

        // airborne and rolled 70°: only the anti-flip torque acts
        let roll = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 70f32.to_radians());
        for (slot, id) in [p1, p2].into_iter().enumerate() {
            let grid = track.grid.slot_pose(slot);
            if let Some(body) = world.body_mut(id) {
                let lifted = Translation3::new(grid.translation.x, 3.0, grid.translation.z);
                body.pose = Isometry3::from_parts(lifted, roll * grid.rotation);
            }
        }
        world.flag_collision(p2);

        let _ = sim.fixed_step(&mut world, &session, DT);

        let plain = world.body(p1).map(|b| b.torque).unwrap_or_default();
        let boosted = world.body(p2).map(|b| b.torque).unwrap_or_default();
        assert!(plain.norm() > 1.0, "no righting torque: {plain:?}");
        assert!((boosted - plain * ROADSTER.collision_flip_boost).norm() < 1e-2 * plain.norm());
        assert!(!world.take_collision_started(p2));
    }

    #[test]
    fn wall_on_one_side_rolls_the_car_upright() {
        let cfg = RaceConfig::default();
        let track = TrackConfig::tunnel();
        let mut sim = RaceSimulation::new(&cfg, &track);
        let mut world = SandboxWorld::from_track(&track);
        let id = sim.add_vehicle(VehicleRole::Player1, ROADSTER);

        // south straight, outer wall face 1 m to the car's left, rolled 30°
        let heading = crate::config::yaw(90.0);
        let roll = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 30f32.to_radians());
        let pose = Isometry3::from_parts(Translation3::new(20.0, 0.9, 45.0), roll * heading);
        world.spawn(id, &ROADSTER, pose, false);
        let before = (pose.rotation * Vector3::y()).y;

        let _ = sim.fixed_step(&mut world, &RaceSession::started(), DT);

        let Some(body) = world.body(id) else {
            panic!("car vanished");
        };
        let after = (body.pose.rotation * Vector3::y()).y;
        assert_eq!(body.pose_writes, 1);
        assert!(after > before + 1e-3, "uprightness {before} -> {after}");
    }

    #[test]
    fn stopped_engine_is_only_a_flag() {
        let (mut sim, mut world, _) = setup(RaceMode::TwoPlayer);
        let session = RaceSession::started();
        let p1 = sim.vehicle_by_role(VehicleRole::Player1).unwrap_or(VehicleId(0));
        let p2 = sim.vehicle_by_role(VehicleRole::Player2).unwrap_or(VehicleId(0));
        let full = ControlInput { throttle: 1.0, ..Default::default() };

        sim.stop_engine(p2, true);
        for _ in 0..60 {
            assert!(sim.set_input(p1, full));
            assert!(sim.set_input(p2, full));
            let _ = sim.fixed_step(&mut world, &session, DT);
            world.step(DT);
        }

        let running = sim.vehicle(p1).map(|v| v.speed).unwrap_or_default();
        let stopped = sim.vehicle(p2).map(|v| v.speed).unwrap_or_default();
        assert!(running > 2.0, "running car at {running} m/s");
        assert!((running - stopped).abs() < 0.1, "{running} vs {stopped}");
        assert!(sim.telemetry(p2).is_some_and(|t| t.engine_stopped));
    }
}
