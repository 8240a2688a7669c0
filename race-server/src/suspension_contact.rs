// ==============================================================================
// suspension_contact.rs — RAYCAST SUSPENSION + CONTACT PROBE
// ------------------------------------------------------------------------------
// Per wheel, cast a ray from the wheel mount along the chassis "down" axis,
// length suspension_distance + radius, against the Ground layer:
//
// - miss                       -> ungrounded, travel = 1 (by convention)
// - hit at distance d          -> depth  = (suspension_distance + radius) − d
//                                 travel = clamp(depth / suspension_distance)
// - force = spring × travel × suspension_distance
//         + damper × (d travel/dt) × suspension_distance, clamped ≥ 0
//
// The rate term only runs when the wheel was already grounded last tick, so
// a landing does not produce a one-tick damper spike.
//
// This file does NOT apply forces. It only measures and builds contact data;
// solve.rs turns it into tire forces.
// ==============================================================================

use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

use crate::backend::{BodyState, QueryLayer, SceneQuery, SurfaceKind};
use crate::wheel_dynamics::types::{WheelId, WheelState};

#[derive(Debug, Clone, Copy)]
pub struct SuspensionContact {
    pub wheel: WheelId,
    pub grounded: bool,

    // geometry
    pub mount: Point3<f32>,
    pub hit_point: Point3<f32>,
    pub ground_normal: Vector3<f32>,
    pub surface: Option<SurfaceKind>,
    pub hit_distance: f32,

    // suspension state
    pub travel: f32,
    pub travel_rate: f32,
    pub suspension_force: f32,
}

pub fn compute_suspension_force(
    travel: f32,
    travel_rate: f32,
    spring: f32,
    damper: f32,
    suspension_distance: f32,
) -> f32 {
    let compression = travel.clamp(0.0, 1.0) * suspension_distance; // m
    let velocity = travel_rate * suspension_distance;                // m/s

    (spring * compression + damper * velocity).max(0.0)
}

pub fn probe_wheel<S: SceneQuery>(
    scene: &S,
    state: &BodyState,
    mount_local: Point3<f32>,
    wheel: &WheelState,
    dt: f32,
) -> SuspensionContact {
    let mount = state.local_to_world(&mount_local);
    let down = -state.up();
    let max_dist = wheel.suspension_distance + wheel.radius;

    let mut contact = SuspensionContact {
        wheel: wheel.id,
        grounded: false,
        mount,
        hit_point: mount + down * max_dist,
        ground_normal: state.up(),
        surface: None,
        hit_distance: max_dist,
        travel: 1.0,
        travel_rate: 0.0,
        suspension_force: 0.0,
    };

    let Some(hit) = scene.cast_ray(mount, down, max_dist, QueryLayer::Ground) else {
        return contact;
    };

    let depth = max_dist - hit.distance;
    let travel = if wheel.suspension_distance > f32::EPSILON {
        (depth / wheel.suspension_distance).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let travel_rate = if wheel.grounded && dt > 0.0 {
        (travel - wheel.travel) / dt
    } else {
        0.0
    };

    contact.grounded = true;
    contact.hit_point = hit.point;
    contact.ground_normal = if hit.normal.norm_squared() > 1e-8 {
        hit.normal.normalize()
    } else {
        state.up()
    };
    contact.surface = Some(hit.surface);
    contact.hit_distance = hit.distance;
    contact.travel = travel;
    contact.travel_rate = travel_rate;
    contact.suspension_force = compute_suspension_force(
        travel,
        travel_rate,
        wheel.spring,
        wheel.damper,
        wheel.suspension_distance,
    );

    contact
}

/// Copy probe results into the wheel record.
pub fn apply_contact(wheel: &mut WheelState, contact: &SuspensionContact) {
    if !contact.grounded {
        wheel.clear_contact();
        return;
    }

    wheel.grounded = true;
    wheel.travel = contact.travel;
    wheel.contact_point = contact.hit_point;
    wheel.contact_normal = contact.ground_normal;
    wheel.suspension_force = contact.suspension_force;
}

/// World-space wheel pose: hub sits `radius` above the contact along the
/// chassis up axis (or at full droop when airborne), steered about up and
/// spun about the axle.
pub fn wheel_world_pose(
    state: &BodyState,
    contact: &SuspensionContact,
    wheel: &WheelState,
) -> Isometry3<f32> {
    let down = -state.up();
    let hub_offset = if contact.grounded {
        (contact.hit_distance - wheel.radius).max(0.0)
    } else {
        wheel.suspension_distance
    };
    let center = contact.mount + down * hub_offset;

    let steer = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -wheel.steer_angle);
    let spin = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), wheel.spin_angle);

    Isometry3::from_parts(
        Translation3::from(center.coords),
        state.pose.rotation * steer * spin,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RayHit;

    /// Infinite plane at y = `height`, every hit tagged Track.
    struct Plane {
        height: f32,
    }

    impl SceneQuery for Plane {
        fn cast_ray(
            &self,
            origin: Point3<f32>,
            dir: Vector3<f32>,
            max_dist: f32,
            layer: QueryLayer,
        ) -> Option<RayHit> {
            if !layer.accepts(SurfaceKind::Track) || dir.y >= -1e-6 {
                return None;
            }
            let t = (origin.y - self.height) / -dir.y;
            (t >= 0.0 && t <= max_dist).then(|| RayHit {
                distance: t,
                point: origin + dir * t,
                normal: Vector3::y(),
                surface: SurfaceKind::Track,
            })
        }
    }

    fn body_at(y: f32) -> BodyState {
        BodyState {
            pose: Isometry3::translation(0.0, y, 0.0),
            center_of_mass: Point3::new(0.0, y, 0.0),
            linvel: Vector3::zeros(),
            angvel: Vector3::zeros(),
            mass: 1_500.0,
            kinematic: false,
            collisions_enabled: true,
        }
    }

    #[test]
    fn half_compressed_wheel() {
        let wheel = WheelState::new(WheelId::FL); // r 0.4, travel span 0.15
        // mount sits at body origin; ground 0.475 below => depth 0.075
        let contact = probe_wheel(&Plane { height: 0.0 }, &body_at(0.475), Point3::origin(), &wheel, 1.0 / 60.0);

        assert!(contact.grounded);
        assert!((contact.travel - 0.5).abs() < 1e-4);
        let expected = wheel.spring * 0.5 * wheel.suspension_distance;
        assert!((contact.suspension_force - expected).abs() < 1.0);
        assert_eq!(contact.travel_rate, 0.0);
    }

    #[test]
    fn out_of_reach_is_ungrounded_with_full_travel() {
        let mut wheel = WheelState::new(WheelId::RR);
        let contact = probe_wheel(&Plane { height: 0.0 }, &body_at(2.0), Point3::origin(), &wheel, 1.0 / 60.0);

        assert!(!contact.grounded);
        assert_eq!(contact.travel, 1.0);
        assert_eq!(contact.suspension_force, 0.0);

        wheel.grounded = true;
        apply_contact(&mut wheel, &contact);
        assert!(!wheel.grounded);
        assert_eq!(wheel.travel, 1.0);
    }

    #[test]
    fn damper_adds_force_while_compressing() {
        let mut wheel = WheelState::new(WheelId::FR);
        wheel.grounded = true;
        wheel.travel = 0.2;
        let dt = 1.0 / 60.0;

        let contact = probe_wheel(&Plane { height: 0.0 }, &body_at(0.475), Point3::origin(), &wheel, dt);

        assert!(contact.travel_rate > 0.0);
        let spring_only = compute_suspension_force(contact.travel, 0.0, wheel.spring, wheel.damper, wheel.suspension_distance);
        assert!(contact.suspension_force > spring_only);
    }

    #[test]
    fn force_never_pulls() {
        assert_eq!(compute_suspension_force(0.1, -50.0, 35_000.0, 4_500.0, 0.15), 0.0);
    }

    #[test]
    fn hub_sits_radius_above_contact() {
        let wheel = WheelState::new(WheelId::FL);
        let state = body_at(0.475);
        let contact = probe_wheel(&Plane { height: 0.0 }, &state, Point3::origin(), &wheel, 1.0 / 60.0);
        let pose = wheel_world_pose(&state, &contact, &wheel);
        assert!((pose.translation.vector.y - wheel.radius).abs() < 1e-4);
    }
}
