// src/physics.rs
// ==============================================================================
// RAPIER WORLD
// ------------------------------------------------------------------------------
// Owns the rapier pipeline, the static track scene and one chassis rigid body
// per vehicle, and exposes them to the race core through `PhysicsBackend`:
//
//   RapierScene    query-pipeline ray casts, filtered by the SurfaceKind tag
//                  stored in each static collider's `user_data`
//   RapierChassis  one chassis body (+ its collider) borrowed for a tick
//
// Forces added by the race core live until the next `begin_tick`, which
// clears them and refreshes the query pipeline.
// ==============================================================================

use std::collections::BTreeMap;

use log::{info, warn};
use rapier3d::prelude::*;

use crate::backend::{
    BodyState, ChassisBody, PhysicsBackend, QueryLayer, RayHit, SceneQuery, SurfaceKind,
};
use crate::config::{yaw, TrackConfig};
use crate::vehicle::{VehicleConfig, VehicleId};
use crate::wheel_dynamics::stability::GRAVITY;

const GROUP_GROUND: Group = Group::from_bits_truncate(0b0001);
const GROUP_CHASSIS: Group = Group::from_bits_truncate(0b0010);

fn surface_friction(kind: SurfaceKind) -> Real {
    match kind {
        SurfaceKind::Track => 1.2,
        SurfaceKind::Terrain => 0.8,
        SurfaceKind::Wall => 0.3,
    }
}

#[derive(Debug, Clone, Copy)]
struct ChassisHandles {
    body: RigidBodyHandle,
    collider: ColliderHandle,
    touching: bool,          // chassis touched a wall or another car last step
    collision_started: bool, // rising edge, consumed by take_collision_started
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,              // gravity vector
    pub pipeline: PhysicsPipeline,          // physics pipeline
    pub island_manager: IslandManager,      // manages islands of bodies
    pub broad_phase: DefaultBroadPhase,     // broad-phase collision detection
    pub narrow_phase: NarrowPhase,          // collision detection
    pub bodies: RigidBodySet,               // for rigid bodies
    pub colliders: ColliderSet,             // for collision shapes
    pub joints: ImpulseJointSet,            // for constraints
    pub multibody_joints: MultibodyJointSet,// for articulated bodies
    pub ccd: CCDSolver,                     // continuous collision detection
    pub query_pipeline: QueryPipeline,      // for raycasting
    chassis: BTreeMap<VehicleId, ChassisHandles>,
}

impl PhysicsWorld {
    /// Static scene for the given track: ground slab, road strips and walls,
    /// each collider tagged with its SurfaceKind.
    pub fn new(track: &TrackConfig) -> Self {
        let gravity = vector![0.0, -GRAVITY, 0.0];

        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        for b in track.scene_boxes() {
            let [x, y, z] = b.center;
            let [hx, hy, hz] = b.half_extents;
            let rb = RigidBodyBuilder::fixed()
                .position(Isometry::from_parts(Translation::new(x, y, z), yaw(b.yaw_deg)))
                .build();
            let handle = bodies.insert(rb);

            let collider = ColliderBuilder::cuboid(hx, hy, hz)
                .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
                .friction(surface_friction(b.kind))
                .restitution(0.0)
                .user_data(b.kind.tag())
                .build();
            colliders.insert_with_parent(collider, handle, &mut bodies);
        }

        info!(
            "🌎 Track '{}' built. Bodies = {}, Colliders = {}",
            track.name,
            bodies.len(),
            colliders.len()
        );

        Self {
            gravity,
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            chassis: BTreeMap::new(),
        }
    }

    /// Box chassis with the configured mass. AI cars are kinematic.
    pub fn spawn_vehicle(
        &mut self,
        id: VehicleId,
        config: &VehicleConfig,
        pose: Isometry<Real>,
        kinematic: bool,
    ) -> RigidBodyHandle {
        if self.chassis.contains_key(&id) {
            self.remove_vehicle(id);
        }

        let [hx, hy, hz] = config.chassis_half_extents;
        let [cx, cy, cz] = config.chassis_com_offset;
        let volume = 8.0 * hx * hy * hz;
        let density = config.mass / volume.max(1e-3); // ρ = m / V

        let builder = if kinematic {
            RigidBodyBuilder::kinematic_position_based()
        } else {
            RigidBodyBuilder::dynamic()
        };
        let rb = builder
            .position(pose)
            .linear_damping(config.linear_damping)
            .angular_damping(config.angular_damping)
            .ccd_enabled(true)
            .build();

        let collider = ColliderBuilder::cuboid(hx, hy, hz)
            .translation(vector![cx, cy, cz]) // COM offset
            .collision_groups(InteractionGroups::new(
                GROUP_CHASSIS,
                GROUP_GROUND | GROUP_CHASSIS,
            ))
            .density(density)
            .friction(0.0) // grip comes from the tire model only
            .restitution(0.0)
            .build();

        let body = self.bodies.insert(rb);
        let collider = self.colliders.insert_with_parent(collider, body, &mut self.bodies);
        self.chassis.insert(
            id,
            ChassisHandles { body, collider, touching: false, collision_started: false },
        );

        info!(
            "🚗 Spawned {id} at {:?} ({})",
            pose.translation.vector,
            if kinematic { "kinematic" } else { "dynamic" }
        );
        body
    }

    pub fn remove_vehicle(&mut self, id: VehicleId) {
        let Some(handles) = self.chassis.remove(&id) else {
            return;
        };
        self.bodies.remove(
            handles.body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
        info!("🧹 Removed body of {id}");
    }

    pub fn body_handle(&self, id: VehicleId) -> Option<RigidBodyHandle> {
        self.chassis.get(&id).map(|h| h.body)
    }

    pub fn step(&mut self, dt: Real) {
        let hooks = ();
        let events = ();

        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters {
                dt,
                ..IntegrationParameters::default()
            },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &hooks,
            &events,
        );

        self.track_collisions();

        // Safety: a NaN body can't be respawned by pose writes alone
        for handles in self.chassis.values() {
            let Some(body) = self.bodies.get_mut(handles.body) else {
                continue;
            };
            let pos = *body.translation();
            if pos.iter().all(|c| c.is_finite()) {
                continue;
            }
            body.set_translation(vector![0.0, 1.0, 0.0], true);
            body.set_rotation(Rotation::identity(), true);
            body.set_linvel(Vector::zeros(), true);
            body.set_angvel(Vector::zeros(), true);
            warn!("⚠️ Reset exploding body back to origin");
        }
    }

    /// Rising edge of "chassis touches a wall or another car".
    fn track_collisions(&mut self) {
        for handles in self.chassis.values_mut() {
            let me = handles.collider;
            let touching = self.narrow_phase.contact_pairs_with(me).any(|pair| {
                if !pair.has_any_active_contact {
                    return false;
                }
                let other = if pair.collider1 == me { pair.collider2 } else { pair.collider1 };
                let surface = self
                    .colliders
                    .get(other)
                    .and_then(|c| SurfaceKind::from_tag(c.user_data));
                !matches!(surface, Some(SurfaceKind::Track | SurfaceKind::Terrain))
            });

            if touching && !handles.touching {
                handles.collision_started = true;
            }
            handles.touching = touching;
        }
    }
}

// ---------------------------------------------
// SCENE QUERIES
// ---------------------------------------------
pub struct RapierScene<'a> {
    query_pipeline: &'a QueryPipeline,
    bodies: &'a RigidBodySet,
    colliders: &'a ColliderSet,
    exclude: RigidBodyHandle,
}

impl SceneQuery for RapierScene<'_> {
    fn cast_ray(
        &self,
        origin: Point<Real>,
        dir: Vector<Real>,
        max_dist: Real,
        layer: QueryLayer,
    ) -> Option<RayHit> {
        let ray = Ray::new(origin, dir);
        let on_layer = |_: ColliderHandle, c: &Collider| {
            SurfaceKind::from_tag(c.user_data).is_some_and(|s| layer.accepts(s))
        };
        let filter = QueryFilter::default()
            .exclude_rigid_body(self.exclude)
            .predicate(&on_layer);

        let (handle, hit) = self.query_pipeline.cast_ray_and_get_normal(
            self.bodies,
            self.colliders,
            &ray,
            max_dist,
            true,
            filter,
        )?;
        let surface = SurfaceKind::from_tag(self.colliders.get(handle)?.user_data)?;

        Some(RayHit {
            distance: hit.time_of_impact,
            point: ray.point_at(hit.time_of_impact),
            normal: hit.normal,
            surface,
        })
    }
}

// ---------------------------------------------
// CHASSIS
// ---------------------------------------------
pub struct RapierChassis<'a> {
    body: &'a mut RigidBody,
    collider: Option<&'a mut Collider>,
}

impl ChassisBody for RapierChassis<'_> {
    fn state(&self) -> BodyState {
        BodyState {
            pose: *self.body.position(),
            center_of_mass: *self.body.center_of_mass(),
            linvel: *self.body.linvel(),
            angvel: *self.body.angvel(),
            mass: self.body.mass(),
            kinematic: self.body.is_kinematic(),
            collisions_enabled: self.collider.as_ref().map_or(true, |c| c.is_enabled()),
        }
    }

    fn apply_force(&mut self, force: Vector<Real>) {
        self.body.add_force(force, true);
    }

    fn apply_force_at_point(&mut self, force: Vector<Real>, point: Point<Real>) {
        self.body.add_force_at_point(force, point, true);
    }

    fn apply_torque(&mut self, torque: Vector<Real>) {
        self.body.add_torque(torque, true);
    }

    fn apply_impulse(&mut self, impulse: Vector<Real>) {
        self.body.apply_impulse(impulse, true);
    }

    fn set_pose(&mut self, pose: Isometry<Real>) {
        self.body.set_position(pose, true);
        if self.body.is_kinematic() {
            self.body.set_next_kinematic_position(pose);
        }
    }

    fn move_kinematic(&mut self, pose: Isometry<Real>) {
        self.body.set_next_kinematic_position(pose);
    }

    fn set_velocities(&mut self, linvel: Vector<Real>, angvel: Vector<Real>) {
        self.body.set_linvel(linvel, true);
        self.body.set_angvel(angvel, true);
    }

    fn set_kinematic(&mut self, kinematic: bool) {
        let body_type = if kinematic {
            RigidBodyType::KinematicPositionBased
        } else {
            RigidBodyType::Dynamic
        };
        if self.body.body_type() != body_type {
            self.body.set_body_type(body_type, true);
        }
    }

    fn set_collisions_enabled(&mut self, enabled: bool) {
        if let Some(c) = self.collider.as_mut() {
            c.set_enabled(enabled);
        }
    }
}

impl PhysicsBackend for PhysicsWorld {
    type Chassis<'a> = RapierChassis<'a>;
    type Scene<'a> = RapierScene<'a>;

    fn begin_tick(&mut self) {
        for handles in self.chassis.values() {
            if let Some(body) = self.bodies.get_mut(handles.body) {
                body.reset_forces(true);
                body.reset_torques(true);
            }
        }
        self.query_pipeline.update(&self.colliders);
    }

    fn scene(&self, id: VehicleId) -> Option<Self::Scene<'_>> {
        let handles = self.chassis.get(&id)?;
        Some(RapierScene {
            query_pipeline: &self.query_pipeline,
            bodies: &self.bodies,
            colliders: &self.colliders,
            exclude: handles.body,
        })
    }

    fn chassis(&mut self, id: VehicleId) -> Option<Self::Chassis<'_>> {
        let handles = *self.chassis.get(&id)?;
        let body = self.bodies.get_mut(handles.body)?;
        let collider = self.colliders.get_mut(handles.collider);
        Some(RapierChassis { body, collider })
    }

    fn take_collision_started(&mut self, id: VehicleId) -> bool {
        match self.chassis.get_mut(&id) {
            Some(h) => std::mem::take(&mut h.collision_started),
            None => false,
        }
    }
}
