//! Configuration types for the simulation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// World configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Width of the world grid
    pub width: i32,
    /// Height of the world grid
    pub height: i32,
    /// Seed for obstacle generation
    pub field_seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            field_seed: 0,
        }
    }
}

/// Obstacle generation constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Candidate draws spent on obstacles, per tile
    pub obstacle_iterations_per_tile: f64,
    /// Repulsion strength of a placed wall tile
    pub obstacle_void_value: f64,
    /// Cluster size around which growth becomes unlikely
    pub average_obstacle_size: f64,
    /// Invisible voids seeded before any obstacle, per tile
    pub initial_voids_per_tile: f64,
    /// Repulsion strength of an initial void
    pub initial_void_value: f64,
    /// Rejections tolerated before the acceptance threshold relaxes
    pub relief_attempts_threshold: u32,
    /// How fast the threshold relaxes after that
    pub relief_strength: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            obstacle_iterations_per_tile: 1.0,
            obstacle_void_value: 5.0,
            average_obstacle_size: 6.0,
            initial_voids_per_tile: 0.01,
            initial_void_value: 10.0,
            relief_attempts_threshold: 10,
            relief_strength: 0.1,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.average_obstacle_size.is_finite() && self.average_obstacle_size > 0.0) {
            return Err(Error::Configuration(format!(
                "generator.average_obstacle_size must be positive and finite, got {}",
                self.average_obstacle_size
            )));
        }
        if !(self.obstacle_void_value.is_finite() && self.obstacle_void_value > 0.0)
            || !(self.initial_void_value.is_finite() && self.initial_void_value > 0.0)
        {
            return Err(Error::Configuration(
                "generator void values must be positive and finite".to_string(),
            ));
        }
        let rates = [
            ("obstacle_iterations_per_tile", self.obstacle_iterations_per_tile),
            ("initial_voids_per_tile", self.initial_voids_per_tile),
            ("relief_strength", self.relief_strength),
        ];
        for (name, value) in rates {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::Configuration(format!(
                    "generator.{name} must be finite and not negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Food spawning and remains
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FoodConfig {
    /// Nutrition of a spawned food piece; also the floor for remains
    pub spawned_value: f64,
    /// Maximum pieces per cell per tick at tick 0
    pub spawn_rate: f64,
    /// Rate the spawn schedule decays toward
    pub floor_rate: f64,
    /// Tick at which the decaying part of the rate is halved
    pub half_rate_tick: f64,
    /// Fraction of a victim's per-segment energy left in each remains piece
    pub remains_share: f64,
}

impl Default for FoodConfig {
    fn default() -> Self {
        Self {
            spawned_value: 1.0,
            spawn_rate: 0.05,
            floor_rate: 0.002,
            half_rate_tick: 30.0,
            remains_share: 0.8,
        }
    }
}

/// Energy and cost configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// Energy charged for every polled move
    pub move_cost: f64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self { move_cost: 0.1 }
    }
}

/// Snake placement retries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Attempts that also require no snake near the spawn box
    pub strict_attempts: u32,
    /// Attempts that only require a free box
    pub relaxed_attempts: u32,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            strict_attempts: 100,
            relaxed_attempts: 100,
        }
    }
}

/// Agent port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Worker threads used to collect moves (0 = available parallelism)
    pub workers: usize,
    /// Energy charged per move for agents of this port
    pub move_cost: f64,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            move_cost: EnergyConfig::default().move_cost,
        }
    }
}

/// Headless runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of ticks to run (0 = until interrupted)
    pub ticks: u64,
    /// Reference bots added before the first tick
    pub bots: usize,
    /// Delay between ticks (milliseconds)
    pub tick_interval_ms: u64,
    /// Emit a population summary every N ticks
    pub summary_every: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            ticks: 1_000,
            bots: 12,
            tick_interval_ms: 10,
            summary_every: 100,
        }
    }
}

/// Simulation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Random seed for food scattering and spawn placement
    pub seed: u64,
    pub world: WorldConfig,
    pub generator: GeneratorConfig,
    pub food: FoodConfig,
    pub energy: EnergyConfig,
    pub spawn: SpawnConfig,
    pub port: PortConfig,
    pub runner: RunnerConfig,
}

impl SimConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Port configuration with the energy cost of this simulation applied
    pub fn port_config(&self) -> PortConfig {
        PortConfig {
            move_cost: self.energy.move_cost,
            ..self.port.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.world.width <= 0 || self.world.height <= 0 {
            return Err(Error::Configuration(format!(
                "grid dimensions must be positive, got {}x{}",
                self.world.width, self.world.height
            )));
        }
        self.generator.validate()?;
        if self.food.half_rate_tick <= 0.0 {
            return Err(Error::Configuration(
                "food.half_rate_tick must be positive".to_string(),
            ));
        }
        if self.food.spawn_rate < 0.0 || self.food.floor_rate < 0.0 {
            return Err(Error::Configuration(
                "food spawn rates must not be negative".to_string(),
            ));
        }
        if self.energy.move_cost < 0.0 {
            return Err(Error::Configuration(
                "energy.move_cost must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let world_config = WorldConfig::default();
        assert_eq!(world_config.width, 64);
        assert_eq!(world_config.height, 64);

        let food_config = FoodConfig::default();
        assert_eq!(food_config.spawned_value, 1.0);

        let sim_config = SimConfig::default();
        assert!(sim_config.validate().is_ok());
        assert_eq!(sim_config.port_config().move_cost, 0.1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SimConfig::from_json_str(
            r#"{ "seed": 9, "world": { "width": 32 }, "energy": { "move_cost": 0.5 } }"#,
        )
        .unwrap();

        assert_eq!(config.seed, 9);
        assert_eq!(config.world.width, 32);
        assert_eq!(config.world.height, 64);
        assert_eq!(config.port_config().move_cost, 0.5);
        assert_eq!(config.generator.relief_attempts_threshold, 10);
    }

    #[test]
    fn test_invalid_dimensions_rejected() {
        let result = SimConfig::from_json_str(r#"{ "world": { "width": 0 } }"#);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_nonsensical_generator_constants_rejected() {
        for json in [
            r#"{ "generator": { "average_obstacle_size": 0.0 } }"#,
            r#"{ "generator": { "average_obstacle_size": -4.0 } }"#,
            r#"{ "generator": { "obstacle_void_value": 0.0 } }"#,
            r#"{ "generator": { "initial_voids_per_tile": -0.5 } }"#,
            r#"{ "generator": { "relief_strength": -1.0 } }"#,
        ] {
            let result = SimConfig::from_json_str(json);
            assert!(matches!(result, Err(Error::Configuration(_))), "{json}");
        }

        let config = GeneratorConfig {
            average_obstacle_size: f64::INFINITY,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let large = GeneratorConfig {
            average_obstacle_size: 100.0,
            ..Default::default()
        };
        assert!(large.validate().is_ok());
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let result = SimConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
