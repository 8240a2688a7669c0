// ==============================================================================
// sandbox.rs — IN-MEMORY BACKEND
// ------------------------------------------------------------------------------
// A tiny rigid-body integrator plus box-only scene, enough to drive the race
// core without rapier:
//
//   MockBody     one chassis: semi-implicit Euler about the COM, box inertia,
//                records pose writes and impulses for inspection
//   FlatScene    oriented boxes tagged with a SurfaceKind, slab ray casts
//   SandboxWorld BTreeMap of bodies + one scene, implements PhysicsBackend
//
// There is no collision response: bodies are held up by their own
// suspension forces or fall through.
// ==============================================================================

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{Isometry3, Matrix3, Point3, Translation3, UnitQuaternion, Vector3};

use crate::backend::{BodyState, ChassisBody, PhysicsBackend, QueryLayer, RayHit, SceneQuery, SurfaceKind};
use crate::config::{yaw, TrackConfig};
use crate::vehicle::{VehicleConfig, VehicleId};
use crate::wheel_dynamics::stability::GRAVITY;

// ---------------------------------------------
// BODY
// ---------------------------------------------
#[derive(Debug, Clone)]
pub struct MockBody {
    pub pose: Isometry3<f32>,
    pub linvel: Vector3<f32>,
    pub angvel: Vector3<f32>,
    pub mass: f32,
    pub inertia: Vector3<f32>,    // principal, body frame
    pub com_local: Vector3<f32>,
    pub linear_damping: f32,
    pub angular_damping: f32,

    pub kinematic: bool,
    pub collisions_enabled: bool,
    pub next_kinematic: Option<Isometry3<f32>>,

    pub force: Vector3<f32>,
    pub torque: Vector3<f32>,

    pub pose_writes: u32,
    pub impulses: Vec<Vector3<f32>>,
}

fn box_inertia(mass: f32, h: [f32; 3]) -> Vector3<f32> {
    let [x, y, z] = h.map(|v| v * v);
    Vector3::new(y + z, x + z, x + y) * (mass / 3.0)
}

impl MockBody {
    /// Default 1500 kg car-sized box at `pose`.
    pub fn at(pose: Isometry3<f32>) -> Self {
        let mass = 1_500.0;
        Self {
            pose,
            linvel: Vector3::zeros(),
            angvel: Vector3::zeros(),
            mass,
            inertia: box_inertia(mass, [0.9, 0.35, 2.1]),
            com_local: Vector3::zeros(),
            linear_damping: 0.0,
            angular_damping: 0.0,
            kinematic: false,
            collisions_enabled: true,
            next_kinematic: None,
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
            pose_writes: 0,
            impulses: Vec::new(),
        }
    }

    pub fn for_vehicle(cfg: &VehicleConfig, pose: Isometry3<f32>) -> Self {
        let [cx, cy, cz] = cfg.chassis_com_offset;
        Self {
            mass: cfg.mass,
            inertia: box_inertia(cfg.mass, cfg.chassis_half_extents),
            com_local: Vector3::new(cx, cy, cz),
            linear_damping: cfg.linear_damping,
            angular_damping: cfg.angular_damping,
            ..Self::at(pose)
        }
    }

    fn com_world(&self) -> Point3<f32> {
        self.pose * Point3::from(self.com_local)
    }

    fn inv_inertia_world(&self) -> Matrix3<f32> {
        let r = self.pose.rotation.to_rotation_matrix();
        let inv = Matrix3::from_diagonal(&self.inertia.map(|i| if i > 1e-6 { 1.0 / i } else { 0.0 }));
        r.matrix() * inv * r.matrix().transpose()
    }

    pub fn step(&mut self, gravity: Vector3<f32>, dt: f32) {
        let force = std::mem::replace(&mut self.force, Vector3::zeros());
        let torque = std::mem::replace(&mut self.torque, Vector3::zeros());

        if self.kinematic {
            if let Some(next) = self.next_kinematic.take() {
                self.linvel = (next.translation.vector - self.pose.translation.vector) / dt;
                self.angvel = Vector3::zeros();
                self.pose = next;
            }
            return;
        }

        self.linvel += (force / self.mass + gravity) * dt;
        self.linvel *= 1.0 / (1.0 + dt * self.linear_damping);
        self.angvel += self.inv_inertia_world() * torque * dt;
        self.angvel *= 1.0 / (1.0 + dt * self.angular_damping);

        let com = self.com_world() + self.linvel * dt;
        let rotation = UnitQuaternion::from_scaled_axis(self.angvel * dt) * self.pose.rotation;
        let origin = com - rotation * self.com_local;
        self.pose = Isometry3::from_parts(Translation3::from(origin.coords), rotation);
    }
}

impl ChassisBody for MockBody {
    fn state(&self) -> BodyState {
        BodyState {
            pose: self.pose,
            center_of_mass: self.com_world(),
            linvel: self.linvel,
            angvel: self.angvel,
            mass: self.mass,
            kinematic: self.kinematic,
            collisions_enabled: self.collisions_enabled,
        }
    }

    fn apply_force(&mut self, force: Vector3<f32>) {
        self.force += force;
    }

    fn apply_force_at_point(&mut self, force: Vector3<f32>, point: Point3<f32>) {
        self.force += force;
        self.torque += (point - self.com_world()).cross(&force);
    }

    fn apply_torque(&mut self, torque: Vector3<f32>) {
        self.torque += torque;
    }

    fn apply_impulse(&mut self, impulse: Vector3<f32>) {
        self.impulses.push(impulse);
        if !self.kinematic {
            self.linvel += impulse / self.mass;
        }
    }

    fn set_pose(&mut self, pose: Isometry3<f32>) {
        self.pose = pose;
        self.next_kinematic = None;
        self.pose_writes += 1;
    }

    fn move_kinematic(&mut self, pose: Isometry3<f32>) {
        self.next_kinematic = Some(pose);
    }

    fn set_velocities(&mut self, linvel: Vector3<f32>, angvel: Vector3<f32>) {
        self.linvel = linvel;
        self.angvel = angvel;
    }

    fn set_kinematic(&mut self, kinematic: bool) {
        self.kinematic = kinematic;
        if !kinematic {
            self.next_kinematic = None;
        }
    }

    fn set_collisions_enabled(&mut self, enabled: bool) {
        self.collisions_enabled = enabled;
    }
}

// ---------------------------------------------
// SCENE
// ---------------------------------------------
#[derive(Debug, Clone, Copy)]
pub struct SceneBox {
    pub kind: SurfaceKind,
    pub pose: Isometry3<f32>,
    pub half_extents: Vector3<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct FlatScene {
    pub boxes: Vec<SceneBox>,
}

impl FlatScene {
    pub fn from_track(track: &TrackConfig) -> Self {
        let boxes = track
            .scene_boxes()
            .into_iter()
            .map(|b| SceneBox {
                kind: b.kind,
                pose: Isometry3::from_parts(Translation3::new(b.center[0], b.center[1], b.center[2]), yaw(b.yaw_deg)),
                half_extents: Vector3::new(b.half_extents[0], b.half_extents[1], b.half_extents[2]),
            })
            .collect();
        Self { boxes }
    }

    pub fn with_box(mut self, kind: SurfaceKind, center: Point3<f32>, half_extents: Vector3<f32>) -> Self {
        self.boxes.push(SceneBox {
            kind,
            pose: Isometry3::translation(center.x, center.y, center.z),
            half_extents,
        });
        self
    }
}

/// Entry distance and local face normal of a ray against an axis-aligned box.
/// A ray starting inside reports distance 0.
fn slab_cast(
    origin: &Point3<f32>,
    dir: &Vector3<f32>,
    half: &Vector3<f32>,
) -> Option<(f32, Vector3<f32>)> {
    let mut t_min = f32::NEG_INFINITY;
    let mut t_max = f32::INFINITY;
    let mut normal = Vector3::zeros();

    for axis in 0..3 {
        let o = origin[axis];
        let d = dir[axis];
        let h = half[axis];
        if d.abs() < 1e-9 {
            if o < -h || o > h {
                return None;
            }
            continue;
        }
        let mut t1 = (-h - o) / d;
        let mut t2 = (h - o) / d;
        let mut sign = -1.0;
        if t1 > t2 {
            std::mem::swap(&mut t1, &mut t2);
            sign = 1.0;
        }
        if t1 > t_min {
            t_min = t1;
            normal = Vector3::zeros();
            normal[axis] = sign;
        }
        t_max = t_max.min(t2);
        if t_min > t_max {
            return None;
        }
    }

    if t_max < 0.0 {
        return None;
    }
    if t_min < 0.0 {
        return Some((0.0, -dir));
    }
    Some((t_min, normal))
}

impl SceneQuery for FlatScene {
    fn cast_ray(
        &self,
        origin: Point3<f32>,
        dir: Vector3<f32>,
        max_dist: f32,
        layer: QueryLayer,
    ) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;

        for b in self.boxes.iter().filter(|b| layer.accepts(b.kind)) {
            let local_origin = b.pose.inverse_transform_point(&origin);
            let local_dir = b.pose.inverse_transform_vector(&dir);
            let Some((t, local_normal)) = slab_cast(&local_origin, &local_dir, &b.half_extents) else {
                continue;
            };
            if t > max_dist || best.is_some_and(|h| h.distance <= t) {
                continue;
            }
            best = Some(RayHit {
                distance: t,
                point: origin + dir * t,
                normal: b.pose.transform_vector(&local_normal),
                surface: b.kind,
            });
        }

        best
    }
}

// ---------------------------------------------
// WORLD
// ---------------------------------------------
pub struct SandboxWorld {
    pub gravity: Vector3<f32>,
    pub scene: FlatScene,
    bodies: BTreeMap<VehicleId, MockBody>,
    collisions: BTreeSet<VehicleId>,
}

impl SandboxWorld {
    pub fn new(scene: FlatScene) -> Self {
        Self {
            gravity: Vector3::new(0.0, -GRAVITY, 0.0),
            scene,
            bodies: BTreeMap::new(),
            collisions: BTreeSet::new(),
        }
    }

    pub fn from_track(track: &TrackConfig) -> Self {
        Self::new(FlatScene::from_track(track))
    }

    pub fn spawn(&mut self, id: VehicleId, cfg: &VehicleConfig, pose: Isometry3<f32>, kinematic: bool) {
        let mut body = MockBody::for_vehicle(cfg, pose);
        body.kinematic = kinematic;
        self.bodies.insert(id, body);
    }

    pub fn insert(&mut self, id: VehicleId, body: MockBody) {
        self.bodies.insert(id, body);
    }

    pub fn remove(&mut self, id: VehicleId) -> Option<MockBody> {
        self.collisions.remove(&id);
        self.bodies.remove(&id)
    }

    pub fn body(&self, id: VehicleId) -> Option<&MockBody> {
        self.bodies.get(&id)
    }

    pub fn body_mut(&mut self, id: VehicleId) -> Option<&mut MockBody> {
        self.bodies.get_mut(&id)
    }

    /// Pretend the chassis hit something this tick.
    pub fn flag_collision(&mut self, id: VehicleId) {
        self.collisions.insert(id);
    }

    pub fn step(&mut self, dt: f32) {
        for body in self.bodies.values_mut() {
            body.step(self.gravity, dt);
        }
    }
}

impl PhysicsBackend for SandboxWorld {
    type Chassis<'a> = &'a mut MockBody;
    type Scene<'a> = &'a FlatScene;

    fn scene(&self, id: VehicleId) -> Option<Self::Scene<'_>> {
        self.bodies.contains_key(&id).then_some(&self.scene)
    }

    fn chassis(&mut self, id: VehicleId) -> Option<Self::Chassis<'_>> {
        self.bodies.get_mut(&id)
    }

    fn take_collision_started(&mut self, id: VehicleId) -> bool {
        self.collisions.remove(&id)
    }
}
