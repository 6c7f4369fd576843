//! Snake entity records.

use crate::grid::Grid;
use serde::{Deserialize, Serialize};
use snake_core::{settle_energy, EntityId, Error, Position, Result, SnakeProfile};

/// Engine-side state of a snake on the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnakeRecord {
    pub id: EntityId,
    pub head: Position,
    pub energy: f64,
    pub length: usize,
    pub profile: SnakeProfile,
    /// Tick the snake was placed on the grid
    pub born_tick: u64,
}

impl SnakeRecord {
    /// A freshly spawned snake at full length and energy
    pub fn spawned(id: EntityId, head: Position, profile: SnakeProfile, tick: u64) -> Self {
        Self {
            id,
            head,
            energy: profile.max_energy,
            length: profile.max_length,
            profile,
            born_tick: tick,
        }
    }

    /// Charge a move. Returns `false` when the budget went negative.
    pub fn charge(&mut self, cost: f64) -> bool {
        if self.energy >= 0.0 {
            self.energy = settle_energy(self.energy - cost);
        }
        self.energy >= 0.0
    }

    pub fn gain(&mut self, amount: f64) {
        self.energy = settle_energy(self.energy + amount);
    }

    pub fn lose(&mut self, amount: f64) {
        self.energy = settle_energy(self.energy - amount);
    }

    pub fn is_shortened(&self) -> bool {
        self.length < self.profile.max_length
    }

    pub fn age(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.born_tick)
    }
}

/// Flat indices of the body of `id` from `start` to the tail.
///
/// Fails when a link leaves the grid, reaches a cell of another owner, or the
/// walk takes more steps than the grid has cells.
pub fn body_chain(grid: &Grid, id: EntityId, start: usize) -> Result<Vec<usize>> {
    let mut chain = Vec::new();
    let mut link = Some(start);

    while let Some(index) = link {
        if chain.len() >= grid.len() {
            return Err(Error::invariant(format!("body chain of {id} does not terminate")));
        }
        let cell = grid
            .cell(index)
            .ok_or_else(|| Error::invariant(format!("body link {index} of {id} points past the grid")))?;
        if !cell.is_segment_of(id) {
            return Err(Error::invariant(format!(
                "body chain of {id} reaches a foreign cell at {}",
                grid.position_of(index)
            )));
        }
        chain.push(index);
        link = cell.back_link;
    }
    Ok(chain)
}
