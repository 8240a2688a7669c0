use std::collections::HashMap;

use log::{error, info, warn};
use nalgebra::Isometry3;
use serde::Serialize;

use crate::config::{RaceConfig, TrackConfig};
use crate::physics::PhysicsWorld;
use crate::sandbox::SandboxWorld;
use crate::simulation::RaceSimulation;
use crate::vehicle::{VehicleConfig, VehicleId, VehicleRole};

// ---------------------------------------------
// BODY CREATION, PER BACKEND
// ---------------------------------------------
pub trait VehicleSpawner {
    fn spawn_body(&mut self, id: VehicleId, config: &VehicleConfig, pose: Isometry3<f32>, kinematic: bool);
}

impl VehicleSpawner for PhysicsWorld {
    fn spawn_body(&mut self, id: VehicleId, config: &VehicleConfig, pose: Isometry3<f32>, kinematic: bool) {
        self.spawn_vehicle(id, config, pose, kinematic);
    }
}

impl VehicleSpawner for SandboxWorld {
    fn spawn_body(&mut self, id: VehicleId, config: &VehicleConfig, pose: Isometry3<f32>, kinematic: bool) {
        self.spawn(id, config, pose, kinematic);
    }
}

// ---------------------------------------------
// SPAWN RESULT RETURNED TO STATE + NET
// ---------------------------------------------
#[derive(Debug, Clone, Serialize)]
pub struct PlayerSpawnInfo {
    pub client_id: String,
    pub vehicle: VehicleId,
    pub role: VehicleRole,
    pub position: [f32; 3],
}

#[derive(Debug, Clone)]
struct Seat {
    vehicle: VehicleId,
    role: VehicleRole,
    position: [f32; 3],
    client: Option<String>,
}

// ---------------------------------------------
// SEATS: which client drives which car
// ---------------------------------------------
#[derive(Debug, Default)]
pub struct SpawnManager {
    seats: Vec<Seat>,
    by_client: HashMap<String, VehicleId>,
}

impl SpawnManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// AI cars are never offered to clients.
    pub fn add_seat(&mut self, vehicle: VehicleId, role: VehicleRole, position: [f32; 3]) {
        if role.is_ai() {
            return;
        }
        self.seats.push(Seat { vehicle, role, position, client: None });
    }

    // ---------------------------------------------------------
    // First free seat in grid order (player1 before player2)
    // ---------------------------------------------------------
    pub fn claim(&mut self, client_id: &str) -> Option<PlayerSpawnInfo> {
        if let Some(&vehicle) = self.by_client.get(client_id) {
            let seat = self.seats.iter().find(|s| s.vehicle == vehicle)?;
            return Some(Self::info(client_id, seat));
        }

        let seat = self.seats.iter_mut().find(|s| s.client.is_none())?;
        seat.client = Some(client_id.to_string());
        self.by_client.insert(client_id.to_string(), seat.vehicle);

        info!("🪑 {client_id} takes {} ({})", seat.vehicle, seat.role.as_str());
        Some(Self::info(client_id, seat))
    }

    pub fn release(&mut self, client_id: &str) -> Option<VehicleId> {
        let vehicle = self.by_client.remove(client_id)?;
        if let Some(seat) = self.seats.iter_mut().find(|s| s.vehicle == vehicle) {
            seat.client = None;
        }
        info!("🪑 {vehicle} is free again");
        Some(vehicle)
    }

    pub fn seat_of(&self, client_id: &str) -> Option<VehicleId> {
        self.by_client.get(client_id).copied()
    }

    pub fn free_seats(&self) -> usize {
        self.seats.iter().filter(|s| s.client.is_none()).count()
    }

    fn info(client_id: &str, seat: &Seat) -> PlayerSpawnInfo {
        PlayerSpawnInfo {
            client_id: client_id.to_string(),
            vehicle: seat.vehicle,
            role: seat.role,
            position: seat.position,
        }
    }
}

/// Put every car of the roster on its grid slot: register it with the race,
/// create its body, and open a seat for each human car. An unknown car
/// preset falls back to the default car.
pub fn populate_grid<S: VehicleSpawner>(
    cfg: &RaceConfig,
    track: &TrackConfig,
    sim: &mut RaceSimulation,
    world: &mut S,
) -> SpawnManager {
    let mut seats = SpawnManager::new();

    for (slot, role) in cfg.roster().into_iter().enumerate() {
        let car = cfg.car_for(role).unwrap_or_else(|fault| {
            error!("❌ {} car: {fault}; using the default car", role.as_str());
            VehicleConfig::default()
        });

        let pose = track.grid.slot_pose(slot);
        let id = sim.add_vehicle(role, car);
        world.spawn_body(id, &car, pose, role.is_ai());

        let t = pose.translation.vector;
        seats.add_seat(id, role, [t.x, t.y, t.z]);
    }

    if seats.free_seats() == 0 {
        warn!("⚠️ No human seats on the grid");
    }
    seats
}
