//! race - checkpoint progress, track adherence, respawn and AI driving

pub mod checkpoints;
pub mod adherence;
pub mod respawn;
pub mod ai;
pub mod session;

pub use checkpoints::{Checkpoint, CheckpointGraph, PassOutcome, VehicleProgress};
pub use adherence::{AdherenceMonitor, MonitorConfig, RecoveryTrigger};
pub use respawn::{RespawnConfig, RespawnEvent, RespawnPhase, RespawnState};
pub use ai::{AiConfig, AiDriver};
pub use session::{CountdownEvent, RaceSession};
