// ==============================================================================
// adherence.rs — TRACK ADHERENCE MONITOR
// ------------------------------------------------------------------------------
// Every `interval` seconds of sim time (not every tick) cast a fan of rays
// from just above the chassis, down and slightly sideways, against the track
// layer. Any track hit within `max_distance_from_track` means "on track".
//
// Recovery is requested when
//     (off track && speed > min_offtrack_speed) || up · Y < tilt threshold
// but only on the rising edge: once requested, the monitor stays quiet until
// the condition clears (or a respawn re-arms it). On/off transitions are
// logged once, not every evaluation.
// ==============================================================================

use log::info;
use nalgebra::{Point3, Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::backend::{BodyState, QueryLayer, SceneQuery};
use crate::vehicle::VehicleId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval: f32,               // s
    pub max_distance_from_track: f32,
    pub ray_count: usize,
    pub cone_angle_deg: f32,         // full fan width
    pub origin_lift: f32,            // m above body origin
    pub min_offtrack_speed: f32,     // m/s
    pub tilt_dot_threshold: f32,
    pub out_of_bounds: f32,          // |coord| beyond this is a blown-up body
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: 0.1,
            max_distance_from_track: 5.0,
            ray_count: 8,
            cone_angle_deg: 45.0,
            origin_lift: 0.5,
            min_offtrack_speed: 0.5,
            tilt_dot_threshold: 0.5,
            out_of_bounds: 1_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTrigger {
    OffTrack,
    Tilted,
    OutOfBounds,
    Manual,
}

#[derive(Debug, Clone, Copy)]
pub struct AdherenceMonitor {
    last_check: Option<f32>,
    on_track: bool,
    latched: bool,
}

impl Default for AdherenceMonitor {
    fn default() -> Self {
        Self {
            last_check: None,
            on_track: true,
            latched: false,
        }
    }
}

/// Fan directions in world space: `ray_count` rays spread across the cone,
/// tilted about the chassis forward axis, all pointing down-ish.
pub fn fan_directions(state: &BodyState, cfg: &MonitorConfig) -> Vec<Vector3<f32>> {
    let down = -state.up();
    let axis = Unit::new_normalize(state.forward());
    let n = cfg.ray_count.max(1);
    let half = cfg.cone_angle_deg.to_radians() * 0.5;

    (0..n)
        .map(|i| {
            let t = if n == 1 { 0.5 } else { i as f32 / (n - 1) as f32 };
            let angle = -half + t * 2.0 * half;
            UnitQuaternion::from_axis_angle(&axis, angle) * down
        })
        .collect()
}

impl AdherenceMonitor {
    pub fn on_track(&self) -> bool {
        self.on_track
    }

    pub fn is_due(&self, now: f32, cfg: &MonitorConfig) -> bool {
        match self.last_check {
            None => true,
            Some(t) => now - t >= cfg.interval,
        }
    }

    /// Ray fan against the track layer.
    pub fn probe<S: SceneQuery>(scene: &S, state: &BodyState, cfg: &MonitorConfig) -> bool {
        let origin: Point3<f32> = state.position() + state.up() * cfg.origin_lift;
        fan_directions(state, cfg).into_iter().any(|dir| {
            scene
                .cast_ray(origin, dir, cfg.max_distance_from_track, QueryLayer::TrackOnly)
                .is_some()
        })
    }

    /// One evaluation. `track_hit` is the probe result for this tick; the
    /// caller only probes when `is_due`.
    pub fn evaluate(
        &mut self,
        id: VehicleId,
        now: f32,
        state: &BodyState,
        track_hit: bool,
        respawning: bool,
        cfg: &MonitorConfig,
    ) -> Option<RecoveryTrigger> {
        self.last_check = Some(now);

        let was_on_track = self.on_track;
        self.on_track = track_hit;
        if was_on_track && !track_hit {
            info!("🚧 {id} left the track");
        } else if !was_on_track && track_hit {
            info!("🛣️ {id} back on track");
        }

        let trigger = if !state.is_sane(cfg.out_of_bounds) {
            Some(RecoveryTrigger::OutOfBounds)
        } else if state.uprightness() < cfg.tilt_dot_threshold {
            Some(RecoveryTrigger::Tilted)
        } else if !self.on_track && state.speed() > cfg.min_offtrack_speed {
            Some(RecoveryTrigger::OffTrack)
        } else {
            None
        };

        let Some(trigger) = trigger else {
            self.latched = false;
            return None;
        };

        if self.latched || respawning {
            return None;
        }

        self.latched = true;
        Some(trigger)
    }

    /// After a completed respawn the car is on the track by definition.
    pub fn rearm(&mut self, now: f32) {
        self.on_track = true;
        self.latched = false;
        self.last_check = Some(now);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
