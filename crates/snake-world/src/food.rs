//! Random food scattering.

use crate::grid::Grid;
use rand::Rng;
use snake_core::{Cell, FoodConfig, Position};

/// Per-cell spawn rate at `tick`, decaying from `spawn_rate` toward `floor_rate`.
pub fn spawn_rate(config: &FoodConfig, tick: u64) -> f64 {
    config.floor_rate
        + (config.spawn_rate - config.floor_rate) / (1.0 + tick as f64 / config.half_rate_tick)
}

/// Scatter this tick's food pieces. Pieces landing on anything but an empty
/// cell are lost. Returns the cells that received food.
pub fn scatter<R: Rng + ?Sized>(
    grid: &mut Grid,
    config: &FoodConfig,
    tick: u64,
    rng: &mut R,
) -> Vec<Position> {
    let pieces = (spawn_rate(config, tick) * rng.gen::<f64>() * grid.len() as f64).floor() as usize;
    let mut placed = Vec::new();

    for _ in 0..pieces {
        let pos = Position::new(rng.gen_range(0..grid.width), rng.gen_range(0..grid.height));
        if grid.get(pos).is_some_and(|cell| cell.is_empty()) {
            grid.set(pos, Cell::food(config.spawned_value, None, tick));
            placed.push(pos);
        }
    }
    placed
}
