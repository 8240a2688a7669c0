// ==============================================================================
// config.rs — RACE CONFIGURATION (explicitly passed, never global)
// ------------------------------------------------------------------------------
// RaceConfig is handed to the orchestrator at session start. Everything has a
// default, so a JSON file only needs the fields it changes:
//
//   { "mode": "two_player", "total_laps": 5, "selected_track": "tunnel" }
//
// Tracks are either one of the built-ins (circuit, tunnel) or a full inline
// `track` block.
// ==============================================================================

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::Context;
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::backend::SurfaceKind;
use crate::race::{AiConfig, Checkpoint, MonitorConfig, RespawnConfig};
use crate::vehicle::{preset, ConfigFault, VehicleConfig, VehicleRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceMode {
    TwoPlayer,
    VersusAi,
}

pub fn yaw(deg: f32) -> UnitQuaternion<f32> {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), deg.to_radians())
}

#[inline]
fn p3(v: [f32; 3]) -> Point3<f32> {
    Point3::new(v[0], v[1], v[2])
}

// ---------------------------------------------
// TRACK
// ---------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub position: [f32; 3],
    pub yaw_deg: f32, // heading of travel through the gate
    #[serde(default = "default_gate_extents")]
    pub half_extents: [f32; 3],
}

fn default_gate_extents() -> [f32; 3] {
    [6.0, 2.5, 0.25]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceBox {
    pub kind: SurfaceKind,
    pub center: [f32; 3],
    pub half_extents: [f32; 3],
    #[serde(default)]
    pub yaw_deg: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub origin: [f32; 3],
    pub yaw_deg: f32,
    pub lateral_spacing: f32,
    pub forward_offset: f32,
    pub spawn_height: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            origin: [12.0, 0.3, 40.0],
            yaw_deg: 90.0,
            lateral_spacing: 4.0,
            forward_offset: 2.0,
            spawn_height: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackConfig {
    pub name: String,
    #[serde(default = "default_ai_speed")]
    pub ai_speed_multiplier: f32,
    #[serde(default = "default_ground")]
    pub ground_half_extent: f32,
    pub checkpoints: Vec<CheckpointConfig>,
    #[serde(default)]
    pub surfaces: Vec<SurfaceBox>,
    #[serde(default)]
    pub grid: GridConfig,
}

fn default_ai_speed() -> f32 {
    1.0
}

fn default_ground() -> f32 {
    300.0
}

impl GridConfig {
    /// Two cars abreast, later rows `forward_offset` further back.
    pub fn slot_pose(&self, slot: usize) -> Isometry3<f32> {
        let rotation = yaw(self.yaw_deg);
        let right = rotation * Vector3::x();
        let forward = rotation * -Vector3::z();

        let side = if slot % 2 == 0 { -0.5 } else { 0.5 };
        let row = (slot / 2) as f32;
        let stagger = (slot % 2) as f32 * 0.5;

        let position = p3(self.origin)
            + right * (side * self.lateral_spacing)
            - forward * ((row + stagger) * self.forward_offset)
            + Vector3::y() * self.spawn_height;
        Isometry3::from_parts(Translation3::from(position.coords), rotation)
    }
}

// rectangle loop, 120 × 80 m centreline, 12 m wide
const LOOP_HALF_X: f32 = 60.0;
const LOOP_HALF_Z: f32 = 40.0;
const ROAD_HALF_WIDTH: f32 = 6.0;
const ROAD_TOP: f32 = 0.02;
const ROAD_HALF_THICKNESS: f32 = 0.05;
const GATE_HEIGHT: f32 = 0.6;

impl TrackConfig {
    fn road_strips() -> Vec<SurfaceBox> {
        let y = ROAD_TOP - ROAD_HALF_THICKNESS;
        let long = LOOP_HALF_X + ROAD_HALF_WIDTH;
        let short = LOOP_HALF_Z - ROAD_HALF_WIDTH;
        vec![
            SurfaceBox { kind: SurfaceKind::Track, center: [0.0, y, LOOP_HALF_Z], half_extents: [long, ROAD_HALF_THICKNESS, ROAD_HALF_WIDTH], yaw_deg: 0.0 },
            SurfaceBox { kind: SurfaceKind::Track, center: [0.0, y, -LOOP_HALF_Z], half_extents: [long, ROAD_HALF_THICKNESS, ROAD_HALF_WIDTH], yaw_deg: 0.0 },
            SurfaceBox { kind: SurfaceKind::Track, center: [-LOOP_HALF_X, y, 0.0], half_extents: [ROAD_HALF_WIDTH, ROAD_HALF_THICKNESS, short], yaw_deg: 0.0 },
            SurfaceBox { kind: SurfaceKind::Track, center: [LOOP_HALF_X, y, 0.0], half_extents: [ROAD_HALF_WIDTH, ROAD_HALF_THICKNESS, short], yaw_deg: 0.0 },
        ]
    }

    fn loop_gates() -> Vec<CheckpointConfig> {
        let e = default_gate_extents();
        vec![
            CheckpointConfig { position: [0.0, GATE_HEIGHT, LOOP_HALF_Z], yaw_deg: 90.0, half_extents: e },
            CheckpointConfig { position: [-LOOP_HALF_X, GATE_HEIGHT, 0.0], yaw_deg: 0.0, half_extents: e },
            CheckpointConfig { position: [0.0, GATE_HEIGHT, -LOOP_HALF_Z], yaw_deg: -90.0, half_extents: e },
            CheckpointConfig { position: [LOOP_HALF_X, GATE_HEIGHT, 0.0], yaw_deg: 180.0, half_extents: e },
        ]
    }

    /// Open rectangle loop, grass all around.
    pub fn circuit() -> Self {
        Self {
            name: "circuit".into(),
            ai_speed_multiplier: 0.4,
            ground_half_extent: default_ground(),
            checkpoints: Self::loop_gates(),
            surfaces: Self::road_strips(),
            grid: GridConfig::default(),
        }
    }

    /// Same loop, walled in on both sides.
    pub fn tunnel() -> Self {
        let mut surfaces = Self::road_strips();
        let wall = |center: [f32; 3], half: [f32; 3]| SurfaceBox {
            kind: SurfaceKind::Wall,
            center,
            half_extents: half,
            yaw_deg: 0.0,
        };
        let h = 1.0;
        let t = 0.25;
        let outer_x = LOOP_HALF_X + ROAD_HALF_WIDTH + t;
        let inner_x = LOOP_HALF_X - ROAD_HALF_WIDTH - t;
        let outer_z = LOOP_HALF_Z + ROAD_HALF_WIDTH + t;
        let inner_z = LOOP_HALF_Z - ROAD_HALF_WIDTH - t;

        surfaces.extend([
            wall([0.0, h, outer_z], [outer_x, h, t]),
            wall([0.0, h, -outer_z], [outer_x, h, t]),
            wall([outer_x, h, 0.0], [t, h, outer_z]),
            wall([-outer_x, h, 0.0], [t, h, outer_z]),
            wall([0.0, h, inner_z], [inner_x, h, t]),
            wall([0.0, h, -inner_z], [inner_x, h, t]),
            wall([inner_x, h, 0.0], [t, h, inner_z]),
            wall([-inner_x, h, 0.0], [t, h, inner_z]),
        ]);

        Self {
            name: "tunnel".into(),
            ai_speed_multiplier: 1.0,
            ground_half_extent: default_ground(),
            checkpoints: Self::loop_gates(),
            surfaces,
            grid: GridConfig::default(),
        }
    }

    pub fn builtin(name: &str) -> Result<Self, ConfigFault> {
        match name.to_ascii_lowercase().as_str() {
            "circuit" => Ok(Self::circuit()),
            "tunnel" => Ok(Self::tunnel()),
            _ => Err(ConfigFault::UnknownTrack(name.to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigFault> {
        if self.checkpoints.is_empty() {
            return Err(ConfigFault::EmptyCheckpoints);
        }
        Ok(())
    }

    /// Every static box in the scene, ground slab first (top face at y = 0).
    pub fn scene_boxes(&self) -> Vec<SurfaceBox> {
        let g = self.ground_half_extent.max(1.0);
        let mut boxes = Vec::with_capacity(self.surfaces.len() + 1);
        boxes.push(SurfaceBox {
            kind: SurfaceKind::Terrain,
            center: [0.0, -1.0, 0.0],
            half_extents: [g, 1.0, g],
            yaw_deg: 0.0,
        });
        boxes.extend(self.surfaces.iter().copied());
        boxes
    }

    pub fn build_checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints
            .iter()
            .enumerate()
            .map(|(index, c)| Checkpoint {
                index,
                position: p3(c.position),
                rotation: yaw(c.yaw_deg),
                half_extents: Vector3::new(c.half_extents[0], c.half_extents[1], c.half_extents[2]),
            })
            .collect()
    }
}

// ---------------------------------------------
// RACE
// ---------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    pub mode: RaceMode,
    pub total_laps: u32,
    pub tick_hz: f32,
    pub countdown: f32,
    pub selected_track: String,
    /// Inline track; wins over `selected_track`.
    pub track: Option<TrackConfig>,
    pub player1_car: String,
    pub player2_car: String,
    pub ai_car: String,
    /// Full per-car override, applied on top of the preset choice.
    pub car_overrides: Vec<(VehicleRole, VehicleConfig)>,
    pub ai: AiConfig,
    pub monitor: MonitorConfig,
    pub respawn: RespawnConfig,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            mode: RaceMode::VersusAi,
            total_laps: 3,
            tick_hz: 60.0,
            countdown: 3.0,
            selected_track: "circuit".into(),
            track: None,
            player1_car: "roadster".into(),
            player2_car: "muscle".into(),
            ai_car: "muscle".into(),
            car_overrides: Vec::new(),
            ai: AiConfig::default(),
            monitor: MonitorConfig::default(),
            respawn: RespawnConfig::default(),
        }
    }
}

impl RaceConfig {
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_hz.clamp(10.0, 240.0)
    }

    /// Roles on the grid, in grid-slot order.
    pub fn roster(&self) -> Vec<VehicleRole> {
        match self.mode {
            RaceMode::TwoPlayer => vec![VehicleRole::Player1, VehicleRole::Player2],
            RaceMode::VersusAi => vec![VehicleRole::Player1, VehicleRole::Ai],
        }
    }

    pub fn resolve_track(&self) -> Result<TrackConfig, ConfigFault> {
        match &self.track {
            Some(track) => Ok(track.clone()),
            None => TrackConfig::builtin(&self.selected_track),
        }
    }

    pub fn car_for(&self, role: VehicleRole) -> Result<VehicleConfig, ConfigFault> {
        if let Some((_, cfg)) = self.car_overrides.iter().find(|(r, _)| *r == role) {
            return Ok(*cfg);
        }
        let name = match role {
            VehicleRole::Player1 => &self.player1_car,
            VehicleRole::Player2 => &self.player2_car,
            VehicleRole::Ai => &self.ai_car,
        };
        preset(name)
    }
}

/// read_race_config reads the JSON file and decodes it into a RaceConfig.
pub fn read_race_config(filepath: &Path) -> anyhow::Result<RaceConfig> {
    let fh = OpenOptions::new()
        .read(true)
        .open(filepath)
        .context(format!("Failed to open race config {}!", filepath.display()))?;

    let cfg = serde_json::from_reader(&fh)
        .context(format!("Failed to parse race config {}!", filepath.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: RaceConfig = match serde_json::from_str(r#"{ "mode": "two_player", "total_laps": 5 }"#) {
            Ok(c) => c,
            Err(e) => panic!("parse failed: {e}"),
        };
        assert_eq!(cfg.mode, RaceMode::TwoPlayer);
        assert_eq!(cfg.total_laps, 5);
        assert_eq!(cfg.selected_track, "circuit");
        assert_eq!(cfg.roster(), vec![VehicleRole::Player1, VehicleRole::Player2]);
    }

    #[test]
    fn builtin_tracks_are_well_formed() {
        for name in ["circuit", "tunnel"] {
            let t = match TrackConfig::builtin(name) {
                Ok(t) => t,
                Err(e) => panic!("{e}"),
            };
            assert_eq!(t.validate(), Ok(()));
            let cps = t.build_checkpoints();
            assert_eq!(cps.len(), 4);
            assert!(cps.iter().enumerate().all(|(i, c)| c.index == i));
        }
        assert!(TrackConfig::tunnel().surfaces.iter().any(|s| s.kind == SurfaceKind::Wall));
        assert!(matches!(TrackConfig::builtin("moon"), Err(ConfigFault::UnknownTrack(_))));
    }

    #[test]
    fn gates_face_the_direction_of_travel() {
        let cps = TrackConfig::circuit().build_checkpoints();
        for (i, c) in cps.iter().enumerate() {
            let next = cps[(i + 1) % cps.len()].position;
            let heading = c.rotation * -Vector3::z();
            let to_next = (next - c.position).normalize();
            assert!(heading.dot(&to_next) > 0.5, "gate {i} faces away from gate {}", (i + 1) % cps.len());
        }
    }

    #[test]
    fn grid_slots_sit_behind_the_first_gate() {
        let track = TrackConfig::circuit();
        let gate = track.build_checkpoints()[0];
        let heading = gate.rotation * -Vector3::z();
        let a = track.grid.slot_pose(0);
        let b = track.grid.slot_pose(1);

        for pose in [a, b] {
            let to_gate = gate.position - Point3::from(pose.translation.vector);
            assert!(to_gate.dot(&heading) > 0.0);
            assert!(!gate.contains(&Point3::from(pose.translation.vector)));
        }
        let gap = (a.translation.vector - b.translation.vector).norm();
        assert!(gap >= track.grid.lateral_spacing);
    }

    #[test]
    fn empty_track_is_a_config_fault() {
        let mut t = TrackConfig::circuit();
        t.checkpoints.clear();
        assert_eq!(t.validate(), Err(ConfigFault::EmptyCheckpoints));
    }

    #[test]
    fn missing_file_reports_context() {
        let err = match read_race_config(Path::new("/definitely/not/here.json")) {
            Ok(_) => panic!("should fail"),
            Err(e) => e,
        };
        assert!(format!("{err}").contains("Failed to open race config"));
    }
}
