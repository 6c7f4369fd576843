//! Procedural obstacle generation.

use crate::grid::Grid;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use snake_core::{Cell, Error, GeneratorConfig, Position, Result};
use tracing::debug;

/// Draws allowed per tile while seeding the initial voids
const VOID_DRAWS_PER_TILE: usize = 64;

/// A generated field and the walls placed on it
#[derive(Debug, Clone)]
pub struct GeneratedField {
    pub grid: Grid,
    pub walls: Vec<Position>,
}

/// Generate a field with default constants.
pub fn generate(width: i32, height: i32, seed: u64) -> Result<GeneratedField> {
    FieldGenerator::new(GeneratorConfig::default(), width, height, seed).generate()
}

/// Invisible repulsor that makes nearby placement unlikely
#[derive(Debug, Clone, Copy)]
struct Void {
    pos: Position,
    value: f64,
}

pub struct FieldGenerator {
    config: GeneratorConfig,
    width: i32,
    height: i32,
    seed: u64,
}

impl FieldGenerator {
    pub fn new(config: GeneratorConfig, width: i32, height: i32, seed: u64) -> Self {
        Self {
            config,
            width,
            height,
            seed,
        }
    }

    pub fn generate(&self) -> Result<GeneratedField> {
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::Configuration(format!(
                "field dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        self.config.validate()?;

        let mut run = Run {
            config: &self.config,
            grid: Grid::new(self.width, self.height),
            rng: ChaCha8Rng::seed_from_u64(self.seed),
            voids: Vec::new(),
            walls: Vec::new(),
            threshold: 0.0,
            failed_attempts: 0,
        };

        run.seed_initial_voids();
        run.place_obstacles();

        debug!(
            event = "field_generated",
            width = self.width,
            height = self.height,
            seed = self.seed,
            walls = run.walls.len(),
            "Field generated"
        );

        Ok(GeneratedField {
            grid: run.grid,
            walls: run.walls,
        })
    }
}

struct Run<'a> {
    config: &'a GeneratorConfig,
    grid: Grid,
    rng: ChaCha8Rng,
    voids: Vec<Void>,
    walls: Vec<Position>,
    threshold: f64,
    failed_attempts: u32,
}

impl Run<'_> {
    fn tiles(&self) -> usize {
        self.grid.len()
    }

    fn seed_initial_voids(&mut self) {
        let count = (self.tiles() as f64 * self.config.initial_voids_per_tile) as usize;
        let limit = self.tiles() * VOID_DRAWS_PER_TILE;

        for _ in 0..count {
            let Some((pos, _)) = self.sample(limit) else {
                break;
            };
            self.voids.push(Void {
                pos,
                value: self.config.initial_void_value,
            });
        }
    }

    fn place_obstacles(&mut self) {
        let budget = (self.tiles() as f64 * self.config.obstacle_iterations_per_tile) as usize;
        let mut spent = 0usize;

        loop {
            let Some((pos, draws)) = self.sample(budget - spent + 1) else {
                break;
            };
            spent += draws;
            if spent > budget {
                break;
            }

            if !self.can_become_wall(pos) {
                continue;
            }
            self.grow_cluster(pos);
        }
    }

    fn grow_cluster(&mut self, seed: Position) {
        let mut cluster = vec![seed];
        self.place_wall(seed);

        loop {
            let size = cluster.len() as f64;
            let keep_growing = 1.0 / (1.0 + (size - self.config.average_obstacle_size).exp());
            if keep_growing < self.rng.gen::<f64>() {
                break;
            }

            let Some(tile) = self.pick_neighbor(&cluster) else {
                break;
            };
            self.place_wall(tile);
            cluster.push(tile);
        }
    }

    /// A random free neighbor of a random cluster tile, or `None` after
    /// `cluster.len()` unlucky picks.
    fn pick_neighbor(&mut self, cluster: &[Position]) -> Option<Position> {
        for _ in 0..cluster.len() {
            let origin = cluster[self.rng.gen_range(0..cluster.len())];
            let candidates: Vec<Position> = neighbors(origin)
                .into_iter()
                .filter(|tile| self.can_become_wall(*tile))
                .collect();

            if candidates.is_empty() {
                continue;
            }
            return Some(candidates[self.rng.gen_range(0..candidates.len())]);
        }
        None
    }

    fn place_wall(&mut self, pos: Position) {
        self.grid.set(pos, Cell::wall());
        self.walls.push(pos);
        self.voids.push(Void {
            pos,
            value: self.config.obstacle_void_value,
        });
    }

    /// A wall may not leave any free neighbor with fewer than two other
    /// free neighbors.
    fn can_become_wall(&self, tile: Position) -> bool {
        if !self.is_free(tile) {
            return false;
        }

        neighbors(tile)
            .into_iter()
            .filter(|n| self.is_free(*n))
            .all(|n| {
                neighbors(n)
                    .into_iter()
                    .filter(|m| *m != tile && self.is_free(*m))
                    .count()
                    > 1
            })
    }

    fn is_free(&self, pos: Position) -> bool {
        self.grid.get(pos).is_some_and(|cell| cell.is_empty())
    }

    /// Rejection-sample a position away from existing voids. Gives up after
    /// `limit` draws; otherwise returns the position and the draws spent.
    fn sample(&mut self, limit: usize) -> Option<(Position, usize)> {
        for draws in 1..=limit {
            let pos = Position::new(
                self.rng.gen_range(0..self.grid.width),
                self.rng.gen_range(0..self.grid.height),
            );

            if self.accepts(pos) {
                return Some((pos, draws));
            }
        }
        None
    }

    fn accepts(&mut self, pos: Position) -> bool {
        let probability = self.spawn_probability(pos);
        let relief = ((f64::from(self.config.relief_attempts_threshold)
            - f64::from(self.failed_attempts))
            * self.config.relief_strength)
            .exp()
            .min(1.0);

        if self.threshold * relief < probability {
            self.failed_attempts = 0;
            self.threshold = 0.5 + 0.5 * self.rng.gen::<f64>();
            return true;
        }

        self.failed_attempts = self.failed_attempts.saturating_add(1);
        false
    }

    fn spawn_probability(&self, pos: Position) -> f64 {
        self.voids
            .iter()
            .map(|void| {
                let distance = (pos.distance_squared(&void.pos) as f64).sqrt();
                1.0 - 1.0 / (1.0 + (distance / void.value).powi(2))
            })
            .product()
    }
}

fn neighbors(pos: Position) -> [Position; 4] {
    [
        pos.add(-1, 0),
        pos.add(0, 1),
        pos.add(1, 0),
        pos.add(0, -1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use snake_core::CellKind;

    #[test]
    fn test_same_seed_same_layout() {
        let a = generate(40, 30, 1234).unwrap();
        let b = generate(40, 30, 1234).unwrap();
        assert_eq!(a.grid, b.grid);
        assert_eq!(a.walls, b.walls);
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = generate(40, 40, 1).unwrap();
        let b = generate(40, 40, 2).unwrap();
        assert_ne!(a.walls, b.walls);
    }

    #[test]
    fn test_walls_match_grid() {
        let field = generate(32, 32, 99).unwrap();
        assert!(!field.walls.is_empty());
        assert_eq!(field.grid.count(CellKind::Wall), field.walls.len());
        for wall in &field.walls {
            assert_eq!(field.grid.kind_at(*wall), Some(CellKind::Wall));
        }
    }

    #[test]
    fn test_no_free_tile_is_sealed_off() {
        let field = generate(48, 48, 7).unwrap();
        let grid = &field.grid;

        for (pos, cell) in grid.iter() {
            if !cell.is_empty() {
                continue;
            }
            let free = neighbors(pos)
                .into_iter()
                .filter(|n| grid.get(*n).is_some_and(|c| c.is_empty()))
                .count();
            assert!(free >= 1, "free tile {pos} is enclosed");
        }
    }

    #[test]
    fn test_tiny_fields_terminate() {
        for (w, h) in [(1, 1), (1, 5), (2, 2), (3, 1)] {
            let field = generate(w, h, 5).unwrap();
            assert_eq!(field.grid.len(), (w * h) as usize);
        }
    }

    #[test]
    fn test_large_obstacle_size_terminates() {
        let config = GeneratorConfig {
            average_obstacle_size: 100.0,
            ..Default::default()
        };
        for (w, h) in [(3, 3), (8, 8), (24, 16)] {
            let field = FieldGenerator::new(config.clone(), w, h, 1).generate().unwrap();
            assert_eq!(field.grid.count(CellKind::Wall), field.walls.len());
        }
    }

    #[test]
    fn test_invalid_constants_rejected() {
        let config = GeneratorConfig {
            average_obstacle_size: f64::NAN,
            ..Default::default()
        };
        let result = FieldGenerator::new(config, 10, 10, 1).generate();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_non_positive_dimensions_rejected() {
        assert!(matches!(generate(0, 10, 1), Err(Error::Configuration(_))));
        assert!(matches!(generate(10, -3, 1), Err(Error::Configuration(_))));
    }
}
