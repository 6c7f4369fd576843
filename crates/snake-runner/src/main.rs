//! Headless arena runner.
//!
//! Loads a JSON config (first argument, optional), fills the arena with
//! reference bots and steps the simulation on a fixed interval until the tick
//! budget runs out or the process is interrupted.

#[macro_use]
mod telemetry;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use snake_agents::{handle, SimpleBot};
use snake_core::{Position, SimConfig};
use snake_world::{Grid, ObserverHandle, Simulation, SimulationObserver};
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

/// Counts grid activity for the run summary
#[derive(Debug, Default)]
struct ActivityCounter {
    ticks: u64,
    touched: u64,
}

impl SimulationObserver for ActivityCounter {
    fn on_step(&mut self, _grid: &Grid, touched: &[Position]) {
        self.ticks += 1;
        self.touched += touched.len() as u64;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_telemetry()?;

    let config = load_config()?;
    info!(
        event = "runner_started",
        width = config.world.width,
        height = config.world.height,
        bots = config.runner.bots,
        ticks = config.runner.ticks,
        "Starting snake arena"
    );

    let mut sim = Simulation::new(config.clone()).context("failed to create simulation")?;
    let mut bot_rng = ChaCha8Rng::seed_from_u64(config.seed);
    for _ in 0..config.runner.bots {
        sim.add_agent(handle(SimpleBot::new(&mut bot_rng)));
    }

    let activity = Arc::new(Mutex::new(ActivityCounter::default()));
    let observer: ObserverHandle = activity.clone();
    sim.attach_observer(observer);

    let outcome = run(&mut sim, &config, &mut bot_rng).await;
    if let Err(e) = &outcome {
        error!(event = "runner_failed", error = %e, "Simulation stopped");
    }

    emit_run_summary(&sim, &activity.lock());
    outcome
}

fn load_config() -> Result<SimConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {}", path);
            SimConfig::from_path(&path).with_context(|| format!("failed to load config from {path}"))
        }
        None => {
            info!("No config path given, using defaults");
            Ok(SimConfig::default())
        }
    }
}

async fn run(sim: &mut Simulation, config: &SimConfig, bot_rng: &mut ChaCha8Rng) -> Result<()> {
    let mut ticker = interval(Duration::from_millis(config.runner.tick_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        if config.runner.ticks > 0 && sim.tick() >= config.runner.ticks {
            info!(tick = sim.tick(), "Tick budget reached");
            return Ok(());
        }

        tokio::select! {
            _ = &mut shutdown => {
                return Ok(());
            }
            _ = ticker.tick() => {
                let report = sim.step().context("simulation step failed")?;

                if !report.deaths.is_empty() {
                    replenish(sim, config.runner.bots, bot_rng);
                }
                if config.runner.summary_every > 0 && report.tick % config.runner.summary_every == 0 {
                    emit_population_summary(sim);
                }
            }
        }
    }
}

/// Register fresh bots until the configured population is reached again.
fn replenish(sim: &mut Simulation, target: usize, rng: &mut ChaCha8Rng) {
    let registered: usize = sim.ports().iter().map(|port| port.len()).sum();
    for _ in registered..target {
        let id = sim.add_agent(handle(SimpleBot::new(rng)));
        info!(event = "bot_added", entity_id = %id, tick = sim.tick(), "Replacement bot added");
    }
}

fn emit_population_summary(sim: &Simulation) {
    let summary = sim.summary();

    info!(
        event = "population_metrics",
        tick = summary.tick,
        live_snakes = summary.live_snakes,
        registered = summary.registered_agents,
        total_energy = summary.total_energy,
        average_length = summary.average_length,
        food_cells = summary.food_cells,
        deaths = summary.total_deaths,
        "Population metrics snapshot"
    );

    record_gauge!("live_snakes", summary.live_snakes, tick = summary.tick);
    record_gauge!("food_cells", summary.food_cells, tick = summary.tick);
    record_gauge!("top_score", summary.top_score, tick = summary.tick);
}

fn emit_run_summary(sim: &Simulation, activity: &ActivityCounter) {
    let summary = sim.summary();

    match serde_json::to_string(&summary) {
        Ok(json) => info!(
            event = "run_summary",
            summary = %json,
            observed_ticks = activity.ticks,
            touched_cells = activity.touched,
            halted = sim.is_halted(),
            "Run finished"
        ),
        Err(e) => warn!("Failed to serialize run summary: {}", e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
