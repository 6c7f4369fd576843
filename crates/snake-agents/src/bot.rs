//! Reference bot: chases food and strangers it can see.

use crate::Agent;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use snake_core::{Direction, Perception, ScalePattern, SnakeProfile};
use std::f32::consts::FRAC_PI_4;

/// Kinship below which another snake counts as prey
const STRANGER_KINSHIP: f32 = 0.01;

#[derive(Debug, Clone)]
pub struct SimpleBot {
    profile: SnakeProfile,
}

impl SimpleBot {
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            profile: SnakeProfile {
                pattern: ScalePattern::random(rng),
                ..SnakeProfile::default()
            },
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(&mut ChaCha8Rng::seed_from_u64(seed))
    }

    /// Most attractive bucket, scanning from the centre outward so ties
    /// favour going straight.
    fn pick_bucket(perception: &Perception) -> Option<usize> {
        let resolution = perception.resolution();
        let mut best: Option<(usize, f32)> = None;

        let mut k = (resolution / 2) as isize;
        for i in 0..resolution as isize {
            k += if i % 2 == 0 { i } else { -i };
            let Some(bucket) = usize::try_from(k).ok().filter(|b| *b < resolution) else {
                continue;
            };

            let wall = perception.wall[bucket];
            let food = perception.food[bucket] - wall;
            let prey = if perception.kinship[bucket] < STRANGER_KINSHIP {
                perception.snake[bucket] - wall
            } else {
                f32::NEG_INFINITY
            };

            let value = food.max(2.0 * prey);
            if best.map_or(true, |(_, current)| current < value) {
                best = Some((bucket, value));
            }
        }

        best.map(|(bucket, _)| bucket)
    }

    /// Angle of a bucket centre relative to forward; negative is left.
    fn bucket_angle(&self, bucket: usize, resolution: usize) -> f32 {
        let h = self.profile.half_view_angle;
        -h + 2.0 * h * (bucket as f32 + 0.5) / resolution as f32
    }
}

impl Agent for SimpleBot {
    fn profile(&self) -> SnakeProfile {
        self.profile.clone()
    }

    fn needs_perception(&self) -> bool {
        true
    }

    fn decide(&mut self, facing: Direction, perception: Option<&Perception>) -> Direction {
        let facing = if facing.is_none() { Direction::Up } else { facing };

        let Some(perception) = perception else {
            return facing;
        };
        let Some(bucket) = Self::pick_bucket(perception) else {
            return facing;
        };

        let angle = self.bucket_angle(bucket, perception.resolution());
        if angle.abs() <= FRAC_PI_4 {
            facing
        } else if angle > 0.0 {
            facing.turn_right()
        } else {
            facing.turn_left()
        }
    }
}
