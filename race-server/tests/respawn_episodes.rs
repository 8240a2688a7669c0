use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

use race_server::config::{RaceConfig, RaceMode, TrackConfig};
use race_server::race::{RaceSession, RecoveryTrigger, RespawnPhase};
use race_server::sandbox::SandboxWorld;
use race_server::simulation::{RaceEvent, RaceSimulation};
use race_server::spawn::populate_grid;
use race_server::vehicle::{VehicleId, VehicleRole};

const DT: f32 = 1.0 / 60.0;

struct Race {
    sim: RaceSimulation,
    world: SandboxWorld,
    session: RaceSession,
    car: VehicleId,
}

impl Race {
    fn on(track: TrackConfig) -> Self {
        let cfg = RaceConfig { mode: RaceMode::TwoPlayer, ..RaceConfig::default() };
        let mut sim = RaceSimulation::new(&cfg, &track);
        let mut world = SandboxWorld::from_track(&track);
        let _ = populate_grid(&cfg, &track, &mut sim, &mut world);
        let car = sim.vehicle_by_role(VehicleRole::Player1).unwrap_or(VehicleId(0));
        Self { sim, world, session: RaceSession::started(), car }
    }

    fn place(&mut self, pose: Isometry3<f32>, linvel: Vector3<f32>) {
        if let Some(body) = self.world.body_mut(self.car) {
            body.pose = pose;
            body.linvel = linvel;
            body.angvel = Vector3::zeros();
        }
    }

    fn tick(&mut self) -> Vec<RaceEvent> {
        let events = self.sim.fixed_step(&mut self.world, &self.session, DT);
        self.world.step(DT);
        events
    }

    fn starts(events: &[RaceEvent], car: VehicleId) -> Vec<RecoveryTrigger> {
        events
            .iter()
            .filter_map(|e| match e {
                RaceEvent::RespawnStarted { vehicle, trigger } if *vehicle == car => Some(*trigger),
                _ => None,
            })
            .collect()
    }

    fn run_until_complete(&mut self, max_ticks: usize) -> (Vec<RecoveryTrigger>, bool) {
        let mut starts = Vec::new();
        for _ in 0..max_ticks {
            let events = self.tick();
            starts.extend(Self::starts(&events, self.car));
            if events.contains(&RaceEvent::RespawnCompleted { vehicle: self.car }) {
                return (starts, true);
            }
        }
        (starts, false)
    }

    fn episodes(&self) -> u32 {
        self.sim.vehicle(self.car).map(|v| v.respawn.episodes()).unwrap_or_default()
    }
}

#[test]
fn driving_off_the_road_gives_one_episode() {
    let mut race = Race::on(TrackConfig::circuit());
    // infield grass, rolling forward (−Z) at 8 m/s
    race.place(Isometry3::translation(0.0, 0.7, 0.0), Vector3::new(0.0, 0.0, -8.0));

    let mut starts = Vec::new();
    // 0.5 s: five monitor evaluations
    for _ in 0..30 {
        starts.extend(Race::starts(&race.tick(), race.car));
    }

    assert_eq!(starts, vec![RecoveryTrigger::OffTrack]);
    assert_eq!(race.episodes(), 1);
}

#[test]
fn hammering_reset_still_gives_one_episode() {
    let mut race = Race::on(TrackConfig::circuit());

    let mut starts = Vec::new();
    for _ in 0..20 {
        race.sim.request_reset(race.car);
        starts.extend(Race::starts(&race.tick(), race.car));
    }
    let (rest, completed) = race.run_until_complete(240);
    starts.extend(rest);

    assert!(completed);
    assert_eq!(starts, vec![RecoveryTrigger::Manual]);
    assert_eq!(race.episodes(), 1);
}

#[test]
fn car_without_progress_goes_back_to_the_first_gate() {
    let track = TrackConfig::circuit();
    let gate = track.build_checkpoints()[0];
    let mut race = Race::on(track);
    race.sim.request_reset(race.car);

    // entry tick + three pose writes
    for _ in 0..4 {
        let _ = race.tick();
    }

    let body = race.world.body(race.car).map(|b| b.pose).unwrap_or_else(Isometry3::identity);
    let dx = body.translation.x - gate.position.x;
    let dz = body.translation.z - gate.position.z;
    assert!(dx.abs() < 0.1 && dz.abs() < 0.1, "respawned at {:?}", body.translation);
    assert!(body.rotation.angle_to(&gate.rotation) < 1e-3);
}

#[test]
fn flipped_car_is_put_back_on_its_wheels() {
    let mut race = Race::on(TrackConfig::circuit());
    let roof_down = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f32::consts::PI);
    race.place(
        Isometry3::from_parts(Translation3::new(12.0, 1.0, 42.0), roof_down),
        Vector3::zeros(),
    );

    let (starts, completed) = race.run_until_complete(240);
    assert!(completed);
    assert_eq!(starts, vec![RecoveryTrigger::Tilted]);

    let up = race
        .world
        .body(race.car)
        .map(|b| b.pose.rotation * Vector3::y())
        .unwrap_or_else(Vector3::zeros);
    assert!(up.y > 0.9, "still tilted: {up:?}");
    assert!(race.sim.vehicle(race.car).is_some_and(|v| v.respawn.phase() == RespawnPhase::Idle && v.on_track()));
}

#[test]
fn empty_track_respawns_in_place() {
    let mut track = TrackConfig::circuit();
    track.checkpoints.clear();
    let mut race = Race::on(track);
    race.sim.request_reset(race.car);

    let (starts, completed) = race.run_until_complete(240);
    assert!(completed);
    assert_eq!(starts, vec![RecoveryTrigger::Manual]);
    assert_eq!(race.world.body(race.car).map(|b| b.pose_writes), Some(0));
    assert_eq!(race.sim.graph().progress(race.car).last_passed, 0);
}

#[test]
fn cleanup_aborts_a_running_respawn() {
    let mut race = Race::on(TrackConfig::circuit());
    race.sim.request_reset(race.car);
    let _ = race.tick();
    assert!(race.sim.vehicle(race.car).is_some_and(|v| v.is_respawning()));

    race.sim.cleanup_for_scene_change(&mut race.world);

    assert!(race.sim.vehicle(race.car).is_some_and(|v| !v.is_respawning()));
    assert!(race.world.body(race.car).is_some_and(|b| !b.kinematic && b.collisions_enabled));
}

#[test]
fn torn_down_scene_starts_no_new_episode() {
    let mut race = Race::on(TrackConfig::circuit());
    race.sim.cleanup_for_scene_change(&mut race.world);

    race.sim.request_reset(race.car);
    let mut starts = Vec::new();
    for _ in 0..30 {
        starts.extend(Race::starts(&race.tick(), race.car));
    }
    assert!(starts.is_empty(), "manual reset after cleanup: {starts:?}");

    // off the road and moving
    race.place(Isometry3::translation(0.0, 0.7, 0.0), Vector3::new(0.0, 0.0, -8.0));
    for _ in 0..30 {
        starts.extend(Race::starts(&race.tick(), race.car));
    }
    assert!(starts.is_empty(), "off track after cleanup: {starts:?}");
    assert_eq!(race.episodes(), 0);
}
