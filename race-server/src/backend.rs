// ==============================================================================
// backend.rs — PHYSICS BACKEND CAPABILITIES
// ------------------------------------------------------------------------------
// The race core never talks to rapier directly. It sees a vehicle chassis
// through `ChassisBody` (read a snapshot, push forces, write poses) and the
// static scene through `SceneQuery` (tagged ray casts). `PhysicsBackend`
// hands those out per vehicle, one borrow at a time:
//
//   probe phase:  scene(id)     -> read-only ray casts
//   apply phase:  chassis(id)   -> forces / impulses / pose writes
//
// physics.rs implements this over rapier; sandbox.rs over a tiny in-memory
// integrator for tests.
// ==============================================================================

use nalgebra::{Isometry3, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::vehicle::VehicleId;

// ---------------------------------------------
// SURFACES + LAYERS
// ---------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    Track,
    Wall,
    Terrain,
}

impl SurfaceKind {
    /// Collider `user_data` tag. 0 is reserved for "not a surface" (cars).
    pub fn tag(self) -> u128 {
        match self {
            SurfaceKind::Track => 1,
            SurfaceKind::Wall => 2,
            SurfaceKind::Terrain => 3,
        }
    }

    pub fn from_tag(tag: u128) -> Option<Self> {
        match tag {
            1 => Some(SurfaceKind::Track),
            2 => Some(SurfaceKind::Wall),
            3 => Some(SurfaceKind::Terrain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryLayer {
    /// Anything a wheel can stand on.
    Ground,
    /// The "track layer": only track-tagged surfaces.
    TrackOnly,
    Walls,
    Any,
}

impl QueryLayer {
    pub fn accepts(self, surface: SurfaceKind) -> bool {
        match self {
            QueryLayer::Ground => matches!(surface, SurfaceKind::Track | SurfaceKind::Terrain),
            QueryLayer::TrackOnly => surface == SurfaceKind::Track,
            QueryLayer::Walls => surface == SurfaceKind::Wall,
            QueryLayer::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    pub distance: f32,
    pub point: Point3<f32>,
    pub normal: Vector3<f32>,
    pub surface: SurfaceKind,
}

pub trait SceneQuery {
    /// `dir` must be normalized; `distance` in the hit is in world units.
    fn cast_ray(
        &self,
        origin: Point3<f32>,
        dir: Vector3<f32>,
        max_dist: f32,
        layer: QueryLayer,
    ) -> Option<RayHit>;
}

// ---------------------------------------------
// CHASSIS
// ---------------------------------------------
#[derive(Debug, Clone, Copy)]
pub struct BodyState {
    pub pose: Isometry3<f32>,
    pub center_of_mass: Point3<f32>, // world space
    pub linvel: Vector3<f32>,
    pub angvel: Vector3<f32>,
    pub mass: f32,
    pub kinematic: bool,
    pub collisions_enabled: bool,
}

impl BodyState {
    pub fn position(&self) -> Point3<f32> {
        Point3::from(self.pose.translation.vector)
    }

    pub fn up(&self) -> Vector3<f32> {
        self.pose.rotation * Vector3::y()
    }

    /// Chassis forward is local −Z.
    pub fn forward(&self) -> Vector3<f32> {
        self.pose.rotation * -Vector3::z()
    }

    pub fn right(&self) -> Vector3<f32> {
        self.pose.rotation * Vector3::x()
    }

    pub fn speed(&self) -> f32 {
        self.linvel.norm()
    }

    pub fn forward_speed(&self) -> f32 {
        self.linvel.dot(&self.forward())
    }

    /// up · world-up: 1 upright, 0 on its side, −1 on its roof.
    pub fn uprightness(&self) -> f32 {
        self.up().dot(&Vector3::y())
    }

    pub fn point_velocity(&self, point: &Point3<f32>) -> Vector3<f32> {
        self.linvel + self.angvel.cross(&(point - self.center_of_mass))
    }

    pub fn local_to_world(&self, local: &Point3<f32>) -> Point3<f32> {
        self.pose * local
    }

    /// NaN or absurd coordinates: the integrator blew up.
    pub fn is_sane(&self, bound: f32) -> bool {
        let p = self.pose.translation.vector;
        p.iter().all(|c| c.is_finite() && c.abs() <= bound)
            && self.linvel.iter().all(|c| c.is_finite())
            && self.angvel.iter().all(|c| c.is_finite())
    }
}

pub trait ChassisBody {
    fn state(&self) -> BodyState;

    fn apply_force(&mut self, force: Vector3<f32>);
    fn apply_force_at_point(&mut self, force: Vector3<f32>, point: Point3<f32>);
    fn apply_torque(&mut self, torque: Vector3<f32>);
    fn apply_impulse(&mut self, impulse: Vector3<f32>);

    /// Teleport (dynamic or kinematic).
    fn set_pose(&mut self, pose: Isometry3<f32>);
    /// Kinematic target for the next integration step.
    fn move_kinematic(&mut self, pose: Isometry3<f32>);
    fn set_velocities(&mut self, linvel: Vector3<f32>, angvel: Vector3<f32>);

    fn set_kinematic(&mut self, kinematic: bool);
    fn set_collisions_enabled(&mut self, enabled: bool);
}

pub trait PhysicsBackend {
    type Chassis<'a>: ChassisBody
    where
        Self: 'a;
    type Scene<'a>: SceneQuery
    where
        Self: 'a;

    /// Called once per tick before any vehicle is processed.
    fn begin_tick(&mut self) {}

    /// Scene view that ignores the given vehicle's own colliders.
    fn scene(&self, id: VehicleId) -> Option<Self::Scene<'_>>;

    fn chassis(&mut self, id: VehicleId) -> Option<Self::Chassis<'_>>;

    /// True once per new contact between the chassis and anything else.
    fn take_collision_started(&mut self, id: VehicleId) -> bool;
}

impl<S: SceneQuery + ?Sized> SceneQuery for &S {
    fn cast_ray(
        &self,
        origin: Point3<f32>,
        dir: Vector3<f32>,
        max_dist: f32,
        layer: QueryLayer,
    ) -> Option<RayHit> {
        (**self).cast_ray(origin, dir, max_dist, layer)
    }
}

impl<B: ChassisBody + ?Sized> ChassisBody for &mut B {
    fn state(&self) -> BodyState {
        (**self).state()
    }
    fn apply_force(&mut self, force: Vector3<f32>) {
        (**self).apply_force(force)
    }
    fn apply_force_at_point(&mut self, force: Vector3<f32>, point: Point3<f32>) {
        (**self).apply_force_at_point(force, point)
    }
    fn apply_torque(&mut self, torque: Vector3<f32>) {
        (**self).apply_torque(torque)
    }
    fn apply_impulse(&mut self, impulse: Vector3<f32>) {
        (**self).apply_impulse(impulse)
    }
    fn set_pose(&mut self, pose: Isometry3<f32>) {
        (**self).set_pose(pose)
    }
    fn move_kinematic(&mut self, pose: Isometry3<f32>) {
        (**self).move_kinematic(pose)
    }
    fn set_velocities(&mut self, linvel: Vector3<f32>, angvel: Vector3<f32>) {
        (**self).set_velocities(linvel, angvel)
    }
    fn set_kinematic(&mut self, kinematic: bool) {
        (**self).set_kinematic(kinematic)
    }
    fn set_collisions_enabled(&mut self, enabled: bool) {
        (**self).set_collisions_enabled(enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_filter_surfaces() {
        assert!(QueryLayer::Ground.accepts(SurfaceKind::Terrain));
        assert!(!QueryLayer::Ground.accepts(SurfaceKind::Wall));
        assert!(QueryLayer::TrackOnly.accepts(SurfaceKind::Track));
        assert!(!QueryLayer::TrackOnly.accepts(SurfaceKind::Terrain));
        assert!(QueryLayer::Any.accepts(SurfaceKind::Wall));
    }

    #[test]
    fn surface_tags_round_trip_and_zero_is_untagged() {
        for s in [SurfaceKind::Track, SurfaceKind::Wall, SurfaceKind::Terrain] {
            assert_eq!(SurfaceKind::from_tag(s.tag()), Some(s));
        }
        assert_eq!(SurfaceKind::from_tag(0), None);
    }
}
