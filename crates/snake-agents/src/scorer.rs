//! Score keeping with a decaying streak multiplier.

use snake_core::EntityId;
use std::collections::HashMap;
use std::time::Instant;

/// Multiplier bump limit per gain
const MAX_BUMP: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
struct ScoreEntry {
    score: f64,
    multiplier: f64,
    last_update: f64,
}

/// Accumulates energy gains into scores. Quick successive gains raise a
/// multiplier that decays back to 1 when the snake goes hungry.
#[derive(Debug, Clone)]
pub struct Scorer {
    epoch: Instant,
    entries: HashMap<EntityId, ScoreEntry>,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Scorer {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            entries: HashMap::new(),
        }
    }

    pub fn update(&mut self, id: EntityId, gained: f64) {
        let now = self.now();
        self.update_at(id, gained, now);
    }

    /// Record a gain at an explicit time, in seconds.
    pub fn update_at(&mut self, id: EntityId, gained: f64, now: f64) {
        if gained <= 0.0 {
            return;
        }

        let Some(entry) = self.entries.get_mut(&id) else {
            self.entries.insert(
                id,
                ScoreEntry {
                    score: gained,
                    multiplier: 1.0,
                    last_update: now,
                },
            );
            return;
        };

        let elapsed = now - entry.last_update;
        let mut multiplier = decayed(entry.multiplier, elapsed);

        let bump = 1.0 / elapsed - (1.0 / multiplier - 1.0).exp();
        multiplier += bump.clamp(0.0, MAX_BUMP);
        multiplier = multiplier.max(1.0);

        entry.multiplier = multiplier;
        entry.score += gained * multiplier;
        entry.last_update = now;
    }

    /// Accumulated score; 0 for unknown ids.
    pub fn score_of(&self, id: EntityId) -> f64 {
        self.entries.get(&id).map_or(0.0, |entry| entry.score)
    }

    pub fn multiplier_of(&self, id: EntityId) -> f64 {
        self.multiplier_at(id, self.now())
    }

    /// Multiplier as it would read at `now`; 1 for unknown ids.
    pub fn multiplier_at(&self, id: EntityId, now: f64) -> f64 {
        self.entries.get(&id).map_or(1.0, |entry| {
            decayed(entry.multiplier, now - entry.last_update)
        })
    }

    pub fn forget(&mut self, id: EntityId) {
        self.entries.remove(&id);
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

fn decayed(multiplier: f64, elapsed: f64) -> f64 {
    1.0 + (multiplier - 1.0) * (-elapsed * elapsed).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_ids_have_defaults() {
        let scorer = Scorer::new();
        assert_eq!(scorer.score_of(EntityId(3)), 0.0);
        assert_eq!(scorer.multiplier_of(EntityId(3)), 1.0);
    }

    #[test]
    fn test_first_gain_is_unmultiplied() {
        let mut scorer = Scorer::new();
        scorer.update_at(EntityId(0), 2.5, 10.0);
        assert_eq!(scorer.score_of(EntityId(0)), 2.5);
        assert_eq!(scorer.multiplier_at(EntityId(0), 10.0), 1.0);
    }

    #[test]
    fn test_quick_gains_raise_multiplier() {
        let mut scorer = Scorer::new();
        let id = EntityId(1);
        scorer.update_at(id, 1.0, 0.0);
        scorer.update_at(id, 1.0, 0.1);

        let multiplier = scorer.multiplier_at(id, 0.1);
        assert!((multiplier - 1.1).abs() < 1e-9);
        assert!((scorer.score_of(id) - 2.1).abs() < 1e-9);

        // Long pause: decays back toward 1
        assert!(scorer.multiplier_at(id, 10.0) - 1.0 < 1e-9);
    }

    #[test]
    fn test_zero_gain_is_ignored() {
        let mut scorer = Scorer::new();
        let id = EntityId(2);
        scorer.update_at(id, 1.0, 0.0);
        scorer.update_at(id, 1.0, 0.1);
        scorer.update_at(id, 0.0, 0.2);

        assert!((scorer.multiplier_at(id, 0.1) - 1.1).abs() < 1e-9);
        assert!((scorer.score_of(id) - 2.1).abs() < 1e-9);
    }

    #[test]
    fn test_slow_gains_keep_multiplier_at_one() {
        let mut scorer = Scorer::new();
        let id = EntityId(4);
        scorer.update_at(id, 1.0, 0.0);
        scorer.update_at(id, 1.0, 5.0);
        assert_eq!(scorer.multiplier_at(id, 5.0), 1.0);
        assert_eq!(scorer.score_of(id), 2.0);
    }
}
