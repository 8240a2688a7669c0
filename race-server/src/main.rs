use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};

use race_server::config::{read_race_config, RaceConfig};
use race_server::logging;
use race_server::net::start_websocket_server;
use race_server::physics::PhysicsWorld;
use race_server::race::RaceSession;
use race_server::simulation::RaceSimulation;
use race_server::spawn::populate_grid;
use race_server::state::SharedGameState;

#[derive(Parser, Debug)]
#[command(version, about = "Arcade race server: two cars (or a car and an AI) around a checkpoint loop")]
pub struct ServerOpts {
    /// Race config JSON; defaults are used for anything it leaves out
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long, default_value_t = 9001)]
    pub port: u16,

    /// Built-in track name (circuit, tunnel)
    #[arg(short, long)]
    pub track: Option<String>,

    #[arg(short, long)]
    pub laps: Option<u32>,

    /// Seconds before the start; 0 starts immediately
    #[arg(long)]
    pub countdown: Option<f32>,
}

impl ServerOpts {
    fn race_config(&self) -> anyhow::Result<RaceConfig> {
        let mut cfg = match &self.config {
            Some(path) => read_race_config(path)?,
            None => RaceConfig::default(),
        };
        if let Some(track) = &self.track {
            cfg.selected_track = track.clone();
            cfg.track = None;
        }
        if let Some(laps) = self.laps {
            cfg.total_laps = laps;
        }
        if let Some(countdown) = self.countdown {
            cfg.countdown = countdown;
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::try_init().context("Logger already initialised")?;
    let opts = ServerOpts::parse();

    info!("🚀 Starting race server...");

    let cfg = opts.race_config()?;
    let track = cfg.resolve_track().context("Cannot load the selected track")?;
    let dt = cfg.dt();

    let mut world = PhysicsWorld::new(&track);
    let mut sim = RaceSimulation::new(&cfg, &track);
    let seats = populate_grid(&cfg, &track, &mut sim, &mut world);
    let mut session = RaceSession::new(cfg.countdown);

    let state = Arc::new(Mutex::new(SharedGameState::new(seats)));

    // Start WebSocket server
    let net_state = Arc::clone(&state);
    let port = opts.port;
    tokio::spawn(async move {
        if let Err(e) = start_websocket_server(net_state, port).await {
            error!("❌ WebSocket server stopped: {e:#}");
        }
    });

    // Fixed timestep
    let mut ticker = interval(Duration::from_secs_f32(dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut podium_announced = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("🔴 Shutting down");
                sim.cleanup_for_scene_change(&mut world);
                break;
            }
        }

        let mut game = state.lock().await;

        for (vehicle, command) in game.drain_commands() {
            command.apply(&mut sim, vehicle);
        }

        if let Some(event) = session.tick(dt) {
            game.broadcast_countdown(event);
        }

        let events = sim.fixed_step(&mut world, &session, dt);
        world.step(dt);

        game.tick += 1;
        game.broadcast_events(&events);
        game.broadcast_snapshot(&sim, &session);

        if !podium_announced && sim.all_finished() {
            podium_announced = true;
            info!("🏆 Every car has finished");
        }
    }

    Ok(())
}
