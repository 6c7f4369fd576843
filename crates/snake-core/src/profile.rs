//! Static snake profiles and kinship.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Cosmetic descriptor of a snake. Only used to compare snakes with each other.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScalePattern {
    /// (z, ratio) of the three gyroid layers
    pub gyroids: [(f32, f32); 3],
    /// Background color followed by the two pattern colors (RGBA)
    pub colors: [[f32; 4]; 3],
}

impl ScalePattern {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut pattern = Self::default();
        for gyroid in &mut pattern.gyroids {
            *gyroid = (rng.gen_range(0.1..2.0), rng.gen_range(0.1..2.0));
        }
        for color in &mut pattern.colors {
            *color = [rng.gen(), rng.gen(), rng.gen(), 0.0];
        }
        pattern
    }

    pub fn squared_distance(&self, other: &ScalePattern) -> f32 {
        let gyroid: f32 = self
            .gyroids
            .iter()
            .zip(&other.gyroids)
            .map(|(a, b)| (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2))
            .sum();

        let colors: f32 = self
            .colors
            .iter()
            .zip(&other.colors)
            .flat_map(|(a, b)| a.iter().zip(b).map(|(x, y)| (x - y).powi(2)))
            .sum();

        gyroid + colors
    }
}

/// Static profile of an agent class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnakeProfile {
    /// Target body length; spawned bodies start at this length
    pub max_length: usize,
    /// Energy budget a freshly spawned snake starts with
    pub max_energy: f64,
    /// Half of the view cone, in radians
    pub half_view_angle: f32,
    /// Number of angular buckets in a perception
    pub resolution: usize,
    /// Radius of the visibility query
    pub cull_radius: f32,
    pub pattern: ScalePattern,
}

impl Default for SnakeProfile {
    fn default() -> Self {
        Self {
            max_length: 5,
            max_energy: 5.0,
            half_view_angle: 0.75 * std::f32::consts::PI,
            resolution: 9,
            cull_radius: 7.0,
            pattern: ScalePattern::default(),
        }
    }
}

impl SnakeProfile {
    /// Categorical similarity in `(0, 1]`; identical profiles score 1.
    pub fn kinship(a: &SnakeProfile, b: &SnakeProfile) -> f32 {
        let length_delta = a.max_length as f32 - b.max_length as f32;
        let distance =
            0.7 * a.pattern.squared_distance(&b.pattern) + 0.3 * length_delta * length_delta;

        1.0 / (1.0 + distance.sqrt())
    }
}
