use std::fmt;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::backend::BodyState;
use crate::race::adherence::AdherenceMonitor;
use crate::race::respawn::RespawnState;
use crate::suspension_contact::SuspensionContact;
use crate::wheel_dynamics::drivetrain::DriveMode;
use crate::wheel_dynamics::{grounded_count, ControlInput, FrictionCurve, WheelId, WheelState};

// ---------------------------------------------
// IDENTITY
// ---------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub u32);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "car-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleRole {
    Player1,
    Player2,
    Ai,
}

impl VehicleRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleRole::Player1 => "player1",
            VehicleRole::Player2 => "player2",
            VehicleRole::Ai => "ai",
        }
    }

    pub fn is_ai(&self) -> bool {
        matches!(self, VehicleRole::Ai)
    }
}

// ---------------------------------------------
// CONFIG ERRORS
// ---------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigFault {
    NonPositiveMass(f32),
    MissingWheel(WheelId),
    WheelGeometry { wheel: WheelId, field: &'static str, value: f32 },
    FrictionCurve(&'static str),
    NegativeForce { field: &'static str, value: f32 },
    EmptyCheckpoints,
    UnknownPreset(String),
    UnknownTrack(String),
}

impl fmt::Display for ConfigFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFault::NonPositiveMass(m) => write!(f, "vehicle mass must be positive (got {m})"),
            ConfigFault::MissingWheel(id) => write!(f, "wheel {id} is missing or out of slot"),
            ConfigFault::WheelGeometry { wheel, field, value } => {
                write!(f, "wheel {wheel}: {field} must be positive (got {value})")
            }
            ConfigFault::FrictionCurve(which) => write!(f, "{which} friction curve is malformed"),
            ConfigFault::NegativeForce { field, value } => {
                write!(f, "{field} must not be negative (got {value})")
            }
            ConfigFault::EmptyCheckpoints => write!(f, "track has no checkpoints"),
            ConfigFault::UnknownPreset(name) => write!(f, "unknown car preset '{name}'"),
            ConfigFault::UnknownTrack(name) => write!(f, "unknown track '{name}'"),
        }
    }
}

impl std::error::Error for ConfigFault {}

// ---------------------------------------------
// WHEELS
// ---------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WheelConfig {
    pub id: WheelId,
    pub mount: [f32; 3],          // chassis local, m
    pub radius: f32,              // m
    pub suspension_distance: f32, // m
    pub spring: f32,              // N/m
    pub damper: f32,              // N*s/m
    pub mass: f32,                // kg
    pub driven: bool,
}

impl WheelConfig {
    pub fn mount_point(&self) -> Point3<f32> {
        Point3::new(self.mount[0], self.mount[1], self.mount[2])
    }

    pub fn build_state(&self) -> WheelState {
        let mut w = WheelState::new(self.id);
        w.radius = self.radius;
        w.suspension_distance = self.suspension_distance;
        w.spring = self.spring;
        w.damper = self.damper;
        w.mass = self.mass;
        w.driven = self.driven;
        w
    }

    const fn corner(id: WheelId, x: f32, z: f32, driven: bool) -> Self {
        Self {
            id,
            mount: [x, -0.2, z],
            radius: 0.4,
            suspension_distance: 0.15,
            spring: 50_000.0,
            damper: 4_500.0,
            mass: 20.0,
            driven,
        }
    }
}

// ---------------------------------------------
// VEHICLE CONFIG
// ---------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    // --- Body ---
    pub mass: f32,                      // kg
    pub chassis_half_extents: [f32; 3], // [hx, hy, hz] meters
    pub chassis_com_offset: [f32; 3],   // local offset from body origin
    pub linear_damping: f32,
    pub angular_damping: f32,

    // --- Drivetrain ---
    pub motor_force: f32,               // N*m at a rear wheel
    pub brake_force: f32,               // N*m
    pub coast_brake: f32,               // N*m, no throttle + no brake
    pub reverse_power: f32,             // 0..1 of motor_force
    pub brake_before_reverse: bool,     // reverse input brakes while still rolling forward
    pub reverse_brake_speed: f32,       // m/s, forward speed above which reverse brakes
    pub front_drive_share: f32,         // 0 = RWD
    pub rear_brake_share: f32,          // rear brake vs front
    pub throttle_deadzone: f32,
    pub max_speed: f32,                 // m/s

    // --- Steering ---
    pub max_steer_angle_deg: f32,
    pub steer_speed_reference: f32,     // m/s where steering reaches min scale
    pub min_steer_scale: f32,
    pub max_steer_rate: f32,            // rad/s

    // --- Grip ---
    pub traction_control: f32,          // 0..1
    pub max_slip_ratio: f32,
    pub grip_multiplier: f32,
    pub roll_influence: f32,            // 0 = tire force at COM height, 1 = at contact
    pub forward_friction: FrictionCurve,
    pub sideways_friction: FrictionCurve,

    // --- Stability ---
    pub anti_roll_force: f32,           // N per unit travel difference
    pub rear_anti_roll_share: f32,
    pub downforce_multiplier: f32,      // N per (m/s)^2
    pub lateral_stabilization: f32,     // N per m/s of side slip
    pub grounded_gravity_scale: f32,
    pub air_resistance: f32,
    pub flip_dot_threshold: f32,
    pub collision_flip_boost: f32,
    pub wall_assist: bool,
    pub wall_probe_distance: f32,       // m
    pub wall_lift_force: f32,           // N
    pub wall_upright_rate: f32,         // 1/s

    // --- Wheels (FL, FR, RL, RR) ---
    pub wheels: [WheelConfig; 4],
}

impl Default for VehicleConfig {
    fn default() -> Self {
        ROADSTER
    }
}

pub const ROADSTER: VehicleConfig = VehicleConfig {
    mass: 1500.0,
    chassis_half_extents: [0.9, 0.35, 2.1],
    chassis_com_offset: [0.0, -0.15, 0.05], // slightly below visual center
    linear_damping: 0.05,
    angular_damping: 0.6,

    motor_force: 3000.0,
    brake_force: 3000.0,
    coast_brake: 100.0,
    reverse_power: 0.6,
    brake_before_reverse: false,
    reverse_brake_speed: 1.0,
    front_drive_share: 0.3,
    rear_brake_share: 0.6,
    throttle_deadzone: 0.1,
    max_speed: 55.0,

    max_steer_angle_deg: 30.0,
    steer_speed_reference: 30.0,
    min_steer_scale: 0.5,
    max_steer_rate: 2.5,

    traction_control: 0.5,
    max_slip_ratio: 0.3,
    grip_multiplier: 1.0,
    roll_influence: 0.1,
    forward_friction: FrictionCurve::new(0.4, 1.5, 0.8, 1.4, 0.72),
    sideways_friction: FrictionCurve::new(0.25, 1.8, 0.5, 1.6, 0.8),

    anti_roll_force: 5000.0,
    rear_anti_roll_share: 0.7,
    downforce_multiplier: 1.5,
    lateral_stabilization: 2000.0,
    grounded_gravity_scale: 1.3,
    air_resistance: 0.1,
    flip_dot_threshold: 0.5,
    collision_flip_boost: 2.0,
    wall_assist: true,
    wall_probe_distance: 1.5,
    wall_lift_force: 5000.0,
    wall_upright_rate: 5.0,

    wheels: [
        WheelConfig::corner(WheelId::FL, -0.8, -1.35, true),
        WheelConfig::corner(WheelId::FR, 0.8, -1.35, true),
        WheelConfig::corner(WheelId::RL, -0.8, 1.35, true),
        WheelConfig::corner(WheelId::RR, 0.8, 1.35, true),
    ],
};

pub const MUSCLE: VehicleConfig = VehicleConfig {
    mass: 1700.0,
    chassis_half_extents: [0.95, 0.4, 2.3],
    chassis_com_offset: [0.0, -0.1, 0.1],
    linear_damping: 0.05,
    angular_damping: 0.6,

    motor_force: 3600.0,
    brake_force: 3200.0,
    coast_brake: 120.0,
    reverse_power: 0.5,
    brake_before_reverse: true,
    reverse_brake_speed: 1.0,
    front_drive_share: 0.0,
    rear_brake_share: 0.6,
    throttle_deadzone: 0.1,
    max_speed: 60.0,

    max_steer_angle_deg: 28.0,
    steer_speed_reference: 30.0,
    min_steer_scale: 0.5,
    max_steer_rate: 2.2,

    traction_control: 0.4,
    max_slip_ratio: 0.3,
    grip_multiplier: 0.95,
    roll_influence: 0.1,
    forward_friction: FrictionCurve::new(0.4, 1.5, 0.8, 1.4, 0.7),
    sideways_friction: FrictionCurve::new(0.25, 1.8, 0.5, 1.5, 0.75),

    anti_roll_force: 6000.0,
    rear_anti_roll_share: 0.7,
    downforce_multiplier: 1.2,
    lateral_stabilization: 2000.0,
    grounded_gravity_scale: 1.3,
    air_resistance: 0.1,
    flip_dot_threshold: 0.5,
    collision_flip_boost: 2.0,
    wall_assist: true,
    wall_probe_distance: 1.5,
    wall_lift_force: 5000.0,
    wall_upright_rate: 5.0,

    wheels: [
        WheelConfig::corner(WheelId::FL, -0.85, -1.45, false),
        WheelConfig::corner(WheelId::FR, 0.85, -1.45, false),
        WheelConfig::corner(WheelId::RL, -0.85, 1.45, true),
        WheelConfig::corner(WheelId::RR, 0.85, 1.45, true),
    ],
};

pub fn preset(name: &str) -> Result<VehicleConfig, ConfigFault> {
    match name.to_ascii_lowercase().as_str() {
        "roadster" => Ok(ROADSTER),
        "muscle" => Ok(MUSCLE),
        _ => Err(ConfigFault::UnknownPreset(name.to_string())),
    }
}

impl VehicleConfig {
    pub fn validate(&self) -> Result<(), ConfigFault> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(ConfigFault::NonPositiveMass(self.mass));
        }

        for (field, value) in [
            ("motor_force", self.motor_force),
            ("brake_force", self.brake_force),
            ("coast_brake", self.coast_brake),
            ("max_speed", self.max_speed),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigFault::NegativeForce { field, value });
            }
        }

        for (slot, id) in WheelId::ALL.iter().enumerate() {
            let wheel = &self.wheels[slot];
            if wheel.id != *id {
                return Err(ConfigFault::MissingWheel(*id));
            }
            for (field, value) in [
                ("radius", wheel.radius),
                ("suspension_distance", wheel.suspension_distance),
                ("spring", wheel.spring),
                ("mass", wheel.mass),
            ] {
                if !(value.is_finite() && value > 0.0) {
                    return Err(ConfigFault::WheelGeometry { wheel: *id, field, value });
                }
            }
        }

        if !self.forward_friction.is_well_formed() {
            return Err(ConfigFault::FrictionCurve("forward"));
        }
        if !self.sideways_friction.is_well_formed() {
            return Err(ConfigFault::FrictionCurve("sideways"));
        }

        Ok(())
    }

    pub fn mount_points(&self) -> [Point3<f32>; 4] {
        self.wheels.map(|w| w.mount_point())
    }
}

// ---------------------------------------------
// RUNTIME VEHICLE
// ---------------------------------------------
pub struct Vehicle {
    pub id: VehicleId,
    pub role: VehicleRole,
    pub config: VehicleConfig,

    pub input: ControlInput,        // latest, clamped
    pub wheels: [WheelState; 4],
    pub contacts: [Option<SuspensionContact>; 4],
    pub steer_angle: f32,           // current applied steering angle (radians)
    pub drive_mode: DriveMode,

    pub speed: f32,                 // m/s, last tick
    pub monitor: AdherenceMonitor,
    pub respawn: RespawnState,
    pub reset_requested: bool,
    pub last_position: Option<Point3<f32>>,
    pub last_state: Option<BodyState>, // snapshot after the last tick's probe

    pub engine_muted: bool,
    pub engine_stopped: bool,

    /// Set when the config failed validation; the vehicle gets no physics.
    pub disabled: Option<ConfigFault>,
}

impl Vehicle {
    pub fn new(id: VehicleId, role: VehicleRole, config: VehicleConfig) -> Self {
        let disabled = config.validate().err();
        Self {
            id,
            role,
            config,
            input: ControlInput::default(),
            wheels: config.wheels.map(|w| w.build_state()),
            contacts: [None; 4],
            steer_angle: 0.0,
            drive_mode: DriveMode::Coast,
            speed: 0.0,
            monitor: AdherenceMonitor::default(),
            respawn: RespawnState::default(),
            reset_requested: false,
            last_position: None,
            last_state: None,
            engine_muted: false,
            engine_stopped: false,
            disabled,
        }
    }

    pub fn on_track(&self) -> bool {
        self.monitor.on_track()
    }

    pub fn is_respawning(&self) -> bool {
        self.respawn.is_active()
    }

    pub fn grounded_wheels(&self) -> usize {
        grounded_count(&self.wheels)
    }

    /// "Car is grounded" means at least three wheels touch.
    pub fn is_grounded(&self) -> bool {
        self.grounded_wheels() >= 3
    }

    pub fn set_input(&mut self, input: ControlInput) {
        let input = input.clamped();
        if input.reset {
            self.reset_requested = true;
        }
        self.input = ControlInput { reset: false, ..input };
    }
}
