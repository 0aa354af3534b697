//! Duration estimation: headless bot-only simulations in subprocesses.
//!
//! The live game raises an estimate request; we spawn N copies of this
//! binary's `simulate` subcommand, collect tick counts into a shared pool,
//! and the game polls the pool from its tick. Each subprocess is bounded
//! by a wall-clock timeout; runs that hit the in-game tick cap report
//! `timed_out` and are excluded.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use parlor_core::game::{
    EstimatePool, GameStatus, NUM_ESTIMATE_SIMULATIONS, SharedEstimatePool, UserAttachment,
};
use parlor_core::player::PlayerId;
use uuid::Uuid;

use crate::registry::GameRegistry;

/// Wall-clock bound per simulation subprocess.
const SIMULATION_TIMEOUT: Duration = Duration::from_secs(600);

/// In-game tick cap for a headless run. Far above any sane game length
/// (400k ticks is over five hours of simulated play); a configuration
/// that still hasn't finished reports `timed_out` instead of hanging the
/// pool.
pub const SIMULATION_TICK_CAP: u64 = 400_000;

/// What the `simulate` subcommand prints on stdout.
#[derive(Debug, Serialize, Deserialize)]
pub struct SimulationReport {
    pub ticks: u64,
    #[serde(default)]
    pub timed_out: bool,
}

/// Spawn the simulation subprocesses for one estimate request and return
/// the shared pool they fill.
pub fn spawn_estimates(
    game_type: &str,
    options: &[(String, String)],
    bots: usize,
) -> std::io::Result<SharedEstimatePool> {
    let exe = std::env::current_exe()?;
    let pool = Arc::new(Mutex::new(EstimatePool {
        expected: NUM_ESTIMATE_SIMULATIONS,
        ..EstimatePool::default()
    }));

    for _ in 0..NUM_ESTIMATE_SIMULATIONS {
        let mut command = tokio::process::Command::new(&exe);
        command.arg("simulate").arg(game_type).arg("--bots").arg(bots.to_string()).arg("--quiet");
        for (name, value) in options {
            command.arg("--option").arg(format!("{name}={value}"));
        }
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());

        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(SIMULATION_TIMEOUT, command.output()).await;
            let mut guard = match pool.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            guard.finished += 1;
            match outcome {
                Ok(Ok(output)) if output.status.success() => {
                    match serde_json::from_slice::<SimulationReport>(&output.stdout) {
                        Ok(report) if !report.timed_out => guard.ticks.push(report.ticks),
                        Ok(_) => guard.errors.push("simulation timed out".to_string()),
                        Err(e) => guard.errors.push(format!("bad simulation output: {e}")),
                    }
                },
                Ok(Ok(output)) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    guard.errors.push(stderr.chars().take(200).collect());
                },
                Ok(Err(e)) => guard.errors.push(e.to_string()),
                Err(_) => guard.errors.push("simulation timed out".to_string()),
            }
        });
    }
    Ok(pool)
}

/// Drive one bot-only game to completion. Returns the report the
/// subcommand prints.
pub fn run_simulation(
    registry: &GameRegistry,
    game_type: &str,
    options: &[(String, String)],
    bots: usize,
) -> Result<SimulationReport, String> {
    let mut game =
        registry.create(game_type).ok_or_else(|| format!("unknown game type: {game_type}"))?;

    for (name, value) in options {
        if !game.set_option_raw(name, value) {
            tracing::warn!(option = %name, "simulation option not recognized, ignoring");
        }
    }

    let host_id: PlayerId = Uuid::new_v4();
    let bots = bots.max(game.min_players());
    game.initialize_lobby("Simulant", UserAttachment::bot(host_id, "Simulant"));
    for _ in 1..bots {
        game.execute_action(host_id, "add_bot");
    }
    game.execute_action(host_id, "start_game");
    if game.core().status != GameStatus::Playing {
        return Err("simulation failed to start".to_string());
    }

    let mut ticks = 0;
    while ticks < SIMULATION_TICK_CAP {
        game.on_tick();
        ticks += 1;
        let core = game.core();
        if core.status == GameStatus::Finished || core.runtime.destroyed {
            return Ok(SimulationReport { ticks: core.sound_tick, timed_out: false });
        }
    }
    Ok(SimulationReport { ticks, timed_out: true })
}
