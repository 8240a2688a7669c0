use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::race::{CountdownEvent, RaceSession};
use crate::simulation::{RaceEvent, RaceSimulation, VehicleTelemetry};
use crate::spawn::SpawnManager;
use crate::vehicle::VehicleId;
use crate::wheel_dynamics::ControlInput;

// ---------------------------------------------
// CLIENT → SERVER
// ---------------------------------------------
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Input(ControlInput),
    Reset,
    Mute { muted: bool },
    Engine { stopped: bool },
    Ping,
}

/// What the tick loop applies to the race for one seated client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientCommand {
    Input(ControlInput),
    Reset,
    Mute(bool),
    StopEngine(bool),
}

impl ClientCommand {
    pub fn apply(self, sim: &mut RaceSimulation, vehicle: VehicleId) {
        match self {
            ClientCommand::Input(input) => {
                sim.set_input(vehicle, input);
            }
            ClientCommand::Reset => sim.request_reset(vehicle),
            ClientCommand::Mute(muted) => sim.mute_engine(vehicle, muted),
            ClientCommand::StopEngine(stopped) => sim.stop_engine(vehicle, stopped),
        }
    }
}

// ---------------------------------------------
// SERVER → CLIENT
// ---------------------------------------------
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    Welcome {
        client_id: &'a str,
        vehicle: Option<VehicleId>,
    },
    Pong,
    Countdown {
        seconds: u32,
    },
    Go,
    Event {
        #[serde(flatten)]
        event: &'a RaceEvent,
    },
    Snapshot(&'a Snapshot),
}

#[derive(Serialize)]
pub struct Snapshot {
    pub tick: u64,
    pub racing: bool,
    pub countdown: Option<u32>,
    pub cars: Vec<VehicleTelemetry>,
}

impl ServerMessage<'_> {
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

// ---------------------------------------------
// SHARED STATE (net tasks <-> tick loop)
// ---------------------------------------------
pub struct SharedGameState {
    pub tick: u64,
    pub clients: HashMap<String, UnboundedSender<String>>,
    pub spawns: SpawnManager,
    pending: Vec<(VehicleId, ClientCommand)>,
}

impl SharedGameState {
    pub fn new(spawns: SpawnManager) -> Self {
        Self {
            tick: 0,
            clients: HashMap::new(),
            spawns,
            pending: Vec::new(),
        }
    }

    /// Registers the client's outgoing channel and seats it if a car is free.
    pub fn register_client(&mut self, client_id: &str, tx: UnboundedSender<String>) -> Option<VehicleId> {
        self.clients.insert(client_id.to_string(), tx);
        self.spawns.claim(client_id).map(|info| info.vehicle)
    }

    /// Drops the channel, frees the seat and parks the car.
    pub fn remove_client(&mut self, client_id: &str) {
        self.clients.remove(client_id);
        if let Some(vehicle) = self.spawns.release(client_id) {
            self.pending.push((vehicle, ClientCommand::Input(ControlInput::default())));
        }
    }

    /// Spectators (no seat) are ignored.
    pub fn queue(&mut self, client_id: &str, command: ClientCommand) {
        match self.spawns.seat_of(client_id) {
            Some(vehicle) => self.pending.push((vehicle, command)),
            None => debug!("👀 {client_id} has no car, command dropped"),
        }
    }

    pub fn drain_commands(&mut self) -> Vec<(VehicleId, ClientCommand)> {
        std::mem::take(&mut self.pending)
    }

    pub fn send_to(&self, client_id: &str, msg: &ServerMessage<'_>) {
        if let (Some(tx), Some(json)) = (self.clients.get(client_id), msg.to_json()) {
            let _ = tx.send(json);
        }
    }

    pub fn broadcast(&self, msg: &ServerMessage<'_>) {
        let Some(json) = msg.to_json() else {
            return;
        };
        for tx in self.clients.values() {
            let _ = tx.send(json.clone());
        }
    }

    pub fn broadcast_countdown(&self, event: CountdownEvent) {
        match event {
            CountdownEvent::Count(seconds) => self.broadcast(&ServerMessage::Countdown { seconds }),
            CountdownEvent::Go => self.broadcast(&ServerMessage::Go),
        }
    }

    pub fn broadcast_events(&self, events: &[RaceEvent]) {
        for event in events {
            self.broadcast(&ServerMessage::Event { event });
        }
    }

    /// Build and send a snapshot of all cars to all clients.
    pub fn broadcast_snapshot(&self, sim: &RaceSimulation, session: &RaceSession) {
        let cars = sim
            .vehicles()
            .filter_map(|v| sim.telemetry(v.id))
            .collect();

        let snapshot = Snapshot {
            tick: self.tick,
            racing: session.has_started(),
            countdown: session.countdown(),
            cars,
        };
        self.broadcast(&ServerMessage::Snapshot(&snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::VehicleRole;
    use tokio::sync::mpsc;

    fn seats() -> SpawnManager {
        let mut s = SpawnManager::new();
        s.add_seat(VehicleId(1), VehicleRole::Player1, [0.0; 3]);
        s
    }

    #[test]
    fn client_messages_parse() {
        let input: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"input","throttle":0.5,"steering":-1.0,"brake":true}"#);
        assert_eq!(
            input.ok(),
            Some(ClientMessage::Input(ControlInput { throttle: 0.5, steering: -1.0, brake: true, reset: false }))
        );

        let mute: Result<ClientMessage, _> = serde_json::from_str(r#"{"type":"mute","muted":true}"#);
        assert_eq!(mute.ok(), Some(ClientMessage::Mute { muted: true }));

        let ping: Result<ClientMessage, _> = serde_json::from_str(r#"{"type":"ping"}"#);
        assert_eq!(ping.ok(), Some(ClientMessage::Ping));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"fly"}"#).is_err());
    }

    #[test]
    fn commands_route_to_the_seated_car_only() {
        let mut game = SharedGameState::new(seats());
        let (tx, _rx) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        assert_eq!(game.register_client("a", tx), Some(VehicleId(1)));
        assert_eq!(game.register_client("b", tx2), None);

        game.queue("a", ClientCommand::Reset);
        game.queue("b", ClientCommand::Reset);
        assert_eq!(game.drain_commands(), vec![(VehicleId(1), ClientCommand::Reset)]);
        assert!(game.drain_commands().is_empty());
    }

    #[test]
    fn leaving_parks_the_car_and_frees_the_seat() {
        let mut game = SharedGameState::new(seats());
        let (tx, _rx) = mpsc::unbounded_channel();
        let _ = game.register_client("a", tx);
        game.remove_client("a");

        assert_eq!(
            game.drain_commands(),
            vec![(VehicleId(1), ClientCommand::Input(ControlInput::default()))]
        );
        assert_eq!(game.spawns.free_seats(), 1);
        assert!(game.clients.is_empty());
    }

    #[test]
    fn broadcast_reaches_every_client() {
        let mut game = SharedGameState::new(seats());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let _ = game.register_client("a", tx);
        let _ = game.register_client("b", tx2);

        game.broadcast_countdown(CountdownEvent::Count(3));
        let a = rx.try_recv().unwrap_or_default();
        let b = rx2.try_recv().unwrap_or_default();
        assert_eq!(a, r#"{"type":"countdown","seconds":3}"#);
        assert_eq!(a, b);
    }

    #[test]
    fn events_are_flattened_into_the_envelope() {
        let event = RaceEvent::LapCompleted { vehicle: VehicleId(2), lap: 1 };
        let json = ServerMessage::Event { event: &event }.to_json().unwrap_or_default();
        assert_eq!(json, r#"{"type":"event","event":"lap_completed","vehicle":2,"lap":1}"#);
    }
}
