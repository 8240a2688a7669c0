//! race_server - arcade vehicle dynamics, race progress and a websocket front end.

pub mod backend;
pub mod config;
pub mod logging;
pub mod net;
pub mod physics;
pub mod race;
pub mod sandbox;
pub mod simulation;
pub mod spawn;
pub mod state;
pub mod suspension_contact;
pub mod vehicle;
pub mod wheel_dynamics;
