//! Movement and collision resolution for one tick.
//!
//! Intents are applied one entity at a time. When a move targets the body of
//! a snake that has not moved yet this tick, that snake is resolved first.
//! Dependencies are followed with an explicit work stack and a resolved set,
//! so every entity is processed at most once per tick and a cycle of snakes
//! chasing each other terminates.

use crate::grid::Grid;
use crate::snake::{body_chain, SnakeRecord};
use serde::Serialize;
use snake_core::{
    settle_energy, Cell, CellFlags, CellKind, Direction, EntityId, Error, FoodConfig, MoveIntent,
    Position, Result,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeathCause {
    /// Energy budget went negative
    Starved,
    /// Two heads met
    HeadOn,
    /// Bitten at the tail tip or right behind the head
    Eaten,
}

/// What is left to report about a snake that died this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Remains {
    pub head: Position,
    pub facing: Direction,
    pub energy: f64,
    pub length: usize,
    pub cause: DeathCause,
}

/// Everything the resolver learned during one tick
#[derive(Debug, Default)]
pub struct TickState {
    pub tick: u64,
    pub touched: BTreeSet<Position>,
    pub gained: HashMap<EntityId, f64>,
    pub bitten: HashSet<EntityId>,
    pub bit_self: HashSet<EntityId>,
    pub fallen: BTreeMap<EntityId, Remains>,
    resolved: HashSet<EntityId>,
}

impl TickState {
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            ..Default::default()
        }
    }

    pub fn is_dead(&self, id: EntityId) -> bool {
        self.fallen.contains_key(&id)
    }

    pub fn is_resolved(&self, id: EntityId) -> bool {
        self.resolved.contains(&id)
    }

    pub fn touch(&mut self, pos: Position) {
        self.touched.insert(pos);
    }

    pub fn gained_by(&self, id: EntityId) -> f64 {
        self.gained.get(&id).copied().unwrap_or(0.0)
    }
}

enum Frame {
    Begin(EntityId),
    /// Re-evaluate a move after the snake it ran into has been resolved
    Finish {
        id: EntityId,
        from: Position,
        to: Position,
        dir: Direction,
    },
}

pub struct Resolver<'a> {
    grid: &'a mut Grid,
    snakes: &'a mut BTreeMap<EntityId, SnakeRecord>,
    food: &'a FoodConfig,
    state: TickState,
}

impl<'a> Resolver<'a> {
    pub fn new(
        grid: &'a mut Grid,
        snakes: &'a mut BTreeMap<EntityId, SnakeRecord>,
        food: &'a FoodConfig,
        state: TickState,
    ) -> Self {
        Self {
            grid,
            snakes,
            food,
            state,
        }
    }

    /// Exclude an entity from resolution this tick.
    pub fn mark_resolved(&mut self, id: EntityId) {
        self.state.resolved.insert(id);
    }

    pub fn into_state(self) -> TickState {
        self.state
    }

    /// Apply all intents in ascending id order.
    pub fn resolve_all(&mut self, intents: &BTreeMap<EntityId, MoveIntent>) -> Result<()> {
        for &id in intents.keys() {
            self.resolve(id, intents)?;
        }
        Ok(())
    }

    pub fn resolve(
        &mut self,
        id: EntityId,
        intents: &BTreeMap<EntityId, MoveIntent>,
    ) -> Result<()> {
        let mut stack = vec![Frame::Begin(id)];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Begin(id) => self.begin(id, intents, &mut stack)?,
                Frame::Finish { id, from, to, dir } => {
                    if !self.state.is_dead(id) {
                        self.advance(id, from, to, dir)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn begin(
        &mut self,
        id: EntityId,
        intents: &BTreeMap<EntityId, MoveIntent>,
        stack: &mut Vec<Frame>,
    ) -> Result<()> {
        if self.state.is_dead(id) || self.state.is_resolved(id) {
            return Ok(());
        }
        let (Some(intent), Some(record)) = (intents.get(&id), self.snakes.get(&id)) else {
            return Ok(());
        };
        self.state.resolved.insert(id);

        let head = record.head;
        let facing = self.head_cell(id, head)?.facing;
        let dir = if intent.direction.is_none() {
            facing
        } else {
            intent.direction
        };

        if dir.is_none() {
            self.walk_chain(id, head, false)?;
            return Ok(());
        }

        if !self.record_mut(id)?.charge(intent.energy_cost) {
            return self.kill(id, DeathCause::Starved);
        }

        let target = head.step(dir);
        let reversed = !facing.is_none() && dir == facing.opposite();
        let blocked = self
            .grid
            .get(target)
            .map_or(true, |cell| cell.kind == CellKind::Wall);

        if reversed || blocked {
            self.walk_chain(id, head, false)?;
            self.state.touch(head);
            return Ok(());
        }

        if let Some(owner) = self.unresolved_owner(id, target, intents) {
            trace!(
                event = "dependent_resolution",
                entity_id = %id,
                depends_on = %owner,
                "Resolving blocking snake first"
            );
            stack.push(Frame::Finish {
                id,
                from: head,
                to: target,
                dir,
            });
            stack.push(Frame::Begin(owner));
            return Ok(());
        }

        self.advance(id, head, target, dir)
    }

    /// Owner of the snake cell at `target` if it still has a move to make.
    fn unresolved_owner(
        &self,
        id: EntityId,
        target: Position,
        intents: &BTreeMap<EntityId, MoveIntent>,
    ) -> Option<EntityId> {
        let cell = self.grid.get(target)?;
        if cell.kind != CellKind::Snake {
            return None;
        }
        let owner = cell.owner?;

        (owner != id
            && !self.state.is_resolved(owner)
            && !self.state.is_dead(owner)
            && intents.contains_key(&owner))
        .then_some(owner)
    }

    /// Move `id` from `from` into `to`, classifying whatever is there now.
    fn advance(&mut self, id: EntityId, from: Position, to: Position, dir: Direction) -> Result<()> {
        let to_index = self.index_of(to)?;
        let cell = *self.cell(to_index)?;

        match cell.kind {
            CellKind::Empty => self.step_head(id, from, to, dir, false),
            CellKind::Food => self.eat(id, from, to, dir, cell),
            CellKind::Wall => {
                self.walk_chain(id, from, false)?;
                self.state.touch(from);
                Ok(())
            }
            CellKind::Snake => {
                let victim = cell
                    .owner
                    .ok_or_else(|| Error::invariant(format!("snake cell {to} has no owner")))?;

                // Following its own tail tip
                if victim == id && cell.back_link.is_none() {
                    return self.step_head(id, from, to, dir, false);
                }

                if victim != id && cell.is_head() {
                    trace!(
                        event = "head_on",
                        attacker = %id,
                        victim = %victim,
                        x = to.x,
                        y = to.y,
                        "Heads collided"
                    );
                    self.kill(id, DeathCause::HeadOn)?;
                    return self.kill(victim, DeathCause::HeadOn);
                }

                let victim_head = self.record(victim)?.head;
                let neck = self.head_cell(victim, victim_head)?.back_link == Some(to_index);
                let tail_tip = cell.back_link.is_none();

                if victim != id && (neck || tail_tip) {
                    trace!(
                        event = "full_kill",
                        attacker = %id,
                        victim = %victim,
                        "Bite killed the victim"
                    );
                    self.kill(victim, DeathCause::Eaten)?;
                } else {
                    self.bite_off(victim, to_index, id)?;
                }

                let remains = *self.cell(to_index)?;
                self.eat(id, from, to, dir, remains)
            }
        }
    }

    fn eat(&mut self, id: EntityId, from: Position, to: Position, dir: Direction, food: Cell) -> Result<()> {
        if food.kind != CellKind::Food {
            return Err(Error::invariant(format!(
                "{id} tried to eat a {:?} cell at {to}",
                food.kind
            )));
        }

        if food.owner == Some(id) {
            self.state.bit_self.insert(id);
        }

        self.record_mut(id)?.gain(food.energy);
        let gained = self.state.gained.entry(id).or_default();
        *gained = settle_energy(*gained + food.energy);

        let grow = self.head_cell(id, from)?.flags.contains(CellFlags::PENDING_SHORTEN);
        self.step_head(id, from, to, dir, grow)
    }

    /// Put a new head on `to`. Without growth the tail retracts by one.
    fn step_head(
        &mut self,
        id: EntityId,
        from: Position,
        to: Position,
        dir: Direction,
        grow: bool,
    ) -> Result<()> {
        let from_index = self.index_of(from)?;
        let mut flags = self.cell(from_index)?.flags.union(CellFlags::HEAD);

        let back_link = if grow {
            self.walk_chain(id, from, false)?;
            let record = self.record_mut(id)?;
            record.length += 1;
            if record.length >= record.profile.max_length {
                flags.remove(CellFlags::PENDING_SHORTEN);
            }
            Some(from_index)
        } else {
            match self.walk_chain(id, from, true)? {
                // The head was the whole body
                Some(cleared) if cleared == from => None,
                _ => Some(from_index),
            }
        };

        if back_link.is_some() {
            let old_head = self.cell_mut(from_index)?;
            old_head.flags.remove(CellFlags::HEAD);
            old_head.flags.remove(CellFlags::PENDING_SHORTEN);
            self.state.touch(from);
        }

        let tick = self.state.tick;
        self.grid
            .set(to, Cell::segment(id, back_link, flags, dir, tick));
        self.state.touch(to);
        self.record_mut(id)?.head = to;
        Ok(())
    }

    /// Convert the whole body of `id` to food and drop its record.
    fn kill(&mut self, id: EntityId, cause: DeathCause) -> Result<()> {
        let record = self.record(id)?.clone();
        let head_index = self.index_of(record.head)?;
        let facing = self.cell(head_index)?.facing;
        let chain = self.collect_chain(id, head_index)?;

        let share = self.food.remains_share * record.energy / record.length.max(1) as f64;
        let value = share.max(self.food.spawned_value);
        self.scatter(&chain, id, value);

        self.snakes.remove(&id);
        self.state.fallen.insert(
            id,
            Remains {
                head: record.head,
                facing,
                energy: record.energy,
                length: record.length,
                cause,
            },
        );

        debug!(
            event = "snake_died",
            entity_id = %id,
            cause = ?cause,
            tick = self.state.tick,
            length = record.length,
            energy = record.energy,
            age = record.age(self.state.tick),
            "Snake died"
        );
        Ok(())
    }

    /// Cut the body of `victim` at `bitten` and scatter the cut part.
    fn bite_off(&mut self, victim: EntityId, bitten: usize, attacker: EntityId) -> Result<()> {
        let record = self.record(victim)?;
        let (energy, length, head) = (record.energy, record.length, record.head);

        let mut index = self.index_of(head)?;
        let mut steps = 0;
        loop {
            steps += 1;
            if steps > self.grid.len() {
                return Err(Error::invariant(format!("body chain of {victim} does not terminate")));
            }
            let cell = self.cell(index)?;
            if !cell.is_segment_of(victim) {
                return Err(Error::invariant(format!(
                    "body chain of {victim} reaches a foreign cell at {}",
                    self.grid.position_of(index)
                )));
            }
            match cell.back_link {
                Some(next) if next == bitten => break,
                Some(next) => index = next,
                None => {
                    return Err(Error::invariant(format!(
                        "bitten cell {} is not on the body of {victim}",
                        self.grid.position_of(bitten)
                    )))
                }
            }
        }

        let chain = self.collect_chain(victim, bitten)?;
        self.cell_mut(index)?.back_link = None;

        let pieces = chain.len();
        let share = self.food.remains_share * energy / length.max(1) as f64;
        let value = share
            .max(self.food.spawned_value)
            .min(energy / pieces as f64)
            .max(0.0);
        self.scatter(&chain, victim, value);

        let record = self.record_mut(victim)?;
        record.lose(value * pieces as f64);
        record.length = record.length.saturating_sub(pieces);
        let victim_head = record.head;

        let head_index = self.index_of(victim_head)?;
        self.cell_mut(head_index)?
            .flags
            .insert(CellFlags::PENDING_SHORTEN);
        if victim != attacker {
            self.state.bitten.insert(victim);
        }

        trace!(
            event = "bite_off",
            attacker = %attacker,
            victim = %victim,
            segments = pieces,
            piece_value = value,
            "Body bitten off"
        );
        Ok(())
    }

    fn scatter(&mut self, chain: &[usize], owner: EntityId, value: f64) {
        let tick = self.state.tick;
        for &index in chain {
            if let Some(cell) = self.grid.cell_mut(index) {
                *cell = Cell::food(value, Some(owner), tick);
            }
            let pos = self.grid.position_of(index);
            self.state.touch(pos);
        }
    }

    /// Refresh every segment of `id`; with `retract`, also clear the tail.
    /// Returns the cleared position.
    fn walk_chain(&mut self, id: EntityId, head: Position, retract: bool) -> Result<Option<Position>> {
        let tick = self.state.tick;
        let limit = self.grid.len();

        let mut index = self.index_of(head)?;
        let mut previous = None;
        let mut steps = 0;

        loop {
            steps += 1;
            if steps > limit {
                return Err(Error::invariant(format!("body chain of {id} does not terminate")));
            }

            let pos = self.grid.position_of(index);
            let cell = self.cell_mut(index)?;
            if !cell.is_segment_of(id) {
                return Err(Error::invariant(format!(
                    "body chain of {id} reaches a foreign cell at {pos}"
                )));
            }
            cell.last_tick = tick;

            match cell.back_link {
                Some(next) => {
                    previous = Some(index);
                    index = next;
                }
                None => break,
            }
        }

        if !retract {
            return Ok(None);
        }

        let tail = self.grid.position_of(index);
        *self.cell_mut(index)? = Cell::empty();
        if let Some(previous) = previous {
            self.cell_mut(previous)?.back_link = None;
        }
        self.state.touch(tail);
        Ok(Some(tail))
    }

    fn collect_chain(&self, id: EntityId, start: usize) -> Result<Vec<usize>> {
        body_chain(&*self.grid, id, start)
    }

    fn head_cell(&self, id: EntityId, head: Position) -> Result<&Cell> {
        let cell = self
            .grid
            .get(head)
            .ok_or_else(|| Error::invariant(format!("head of {id} is off the grid at {head}")))?;
        if !cell.is_head() || cell.owner != Some(id) {
            return Err(Error::invariant(format!(
                "record of {id} points at {head}, which is not its head"
            )));
        }
        Ok(cell)
    }

    fn record(&self, id: EntityId) -> Result<&SnakeRecord> {
        self.snakes
            .get(&id)
            .ok_or_else(|| Error::invariant(format!("missing record for {id}")))
    }

    fn record_mut(&mut self, id: EntityId) -> Result<&mut SnakeRecord> {
        self.snakes
            .get_mut(&id)
            .ok_or_else(|| Error::invariant(format!("missing record for {id}")))
    }

    fn index_of(&self, pos: Position) -> Result<usize> {
        self.grid
            .index_of(pos)
            .ok_or_else(|| Error::invariant(format!("position {pos} is off the grid")))
    }

    fn cell(&self, index: usize) -> Result<&Cell> {
        self.grid
            .cell(index)
            .ok_or_else(|| Error::invariant(format!("link {index} points past the grid")))
    }

    fn cell_mut(&mut self, index: usize) -> Result<&mut Cell> {
        self.grid
            .cell_mut(index)
            .ok_or_else(|| Error::invariant(format!("link {index} points past the grid")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::lay_body;
    use snake_core::SnakeProfile;

    struct Arena {
        grid: Grid,
        snakes: BTreeMap<EntityId, SnakeRecord>,
        food: FoodConfig,
    }

    impl Arena {
        fn new() -> Self {
            Self {
                grid: Grid::new(10, 10),
                snakes: BTreeMap::new(),
                food: FoodConfig::default(),
            }
        }

        fn place(&mut self, id: u32, body: &[(i32, i32)], energy: f64) {
            let id = EntityId(id);
            let body: Vec<Position> = body.iter().map(|&(x, y)| Position::new(x, y)).collect();
            lay_body(&mut self.grid, id, &body, 1);

            let mut record = SnakeRecord::spawned(id, body[0], SnakeProfile::default(), 0);
            record.energy = energy;
            record.length = body.len();
            self.snakes.insert(id, record);
        }

        fn run(&mut self, moves: &[(u32, Direction, f64)]) -> Result<TickState> {
            let intents: BTreeMap<EntityId, MoveIntent> = moves
                .iter()
                .map(|&(id, dir, cost)| (EntityId(id), MoveIntent::new(EntityId(id), dir, cost)))
                .collect();

            let mut resolver =
                Resolver::new(&mut self.grid, &mut self.snakes, &self.food, TickState::new(1));
            resolver.resolve_all(&intents)?;
            Ok(resolver.into_state())
        }

        fn kind(&self, x: i32, y: i32) -> CellKind {
            self.grid.kind_at(Position::new(x, y)).unwrap()
        }

        fn cell(&self, x: i32, y: i32) -> Cell {
            *self.grid.get(Position::new(x, y)).unwrap()
        }

        fn body(&self, id: u32) -> Vec<Position> {
            let record = &self.snakes[&EntityId(id)];
            let mut body = vec![record.head];
            let mut link = self.grid.get(record.head).unwrap().back_link;
            while let Some(index) = link {
                body.push(self.grid.position_of(index));
                link = self.grid.cell(index).unwrap().back_link;
            }
            body
        }
    }

    fn positions(cells: &[(i32, i32)]) -> Vec<Position> {
        cells.iter().map(|&(x, y)| Position::new(x, y)).collect()
    }

    #[test]
    fn test_move_into_empty_cell() {
        let mut arena = Arena::new();
        arena.place(1, &[(2, 2), (2, 1), (2, 0)], 5.0);

        let state = arena.run(&[(1, Direction::Up, 0.1)]).unwrap();

        assert_eq!(arena.body(1), positions(&[(2, 3), (2, 2), (2, 1)]));
        assert_eq!(arena.kind(2, 0), CellKind::Empty);
        assert_eq!(arena.snakes[&EntityId(1)].energy, 4.9);
        assert!(arena.cell(2, 3).is_head());
        assert!(!arena.cell(2, 2).is_head());
        assert!(state.touched.contains(&Position::new(2, 0)));
        assert!(state.touched.contains(&Position::new(2, 3)));
    }

    #[test]
    fn test_none_keeps_current_facing() {
        let mut arena = Arena::new();
        arena.place(1, &[(2, 2), (2, 1)], 5.0);
        arena.run(&[(1, Direction::None, 0.1)]).unwrap();
        assert_eq!(arena.body(1), positions(&[(2, 3), (2, 2)]));
    }

    #[test]
    fn test_reversal_stays_in_place() {
        let mut arena = Arena::new();
        arena.place(1, &[(2, 2), (2, 1), (2, 0)], 5.0);

        arena.run(&[(1, Direction::Down, 0.5)]).unwrap();

        assert_eq!(arena.body(1), positions(&[(2, 2), (2, 1), (2, 0)]));
        assert_eq!(arena.cell(2, 2).facing, Direction::Up);
        assert_eq!(arena.cell(2, 0).last_tick, 1);
        assert_eq!(arena.snakes[&EntityId(1)].energy, 4.5);
    }

    #[test]
    fn test_wall_and_border_block() {
        let mut arena = Arena::new();
        arena.place(1, &[(2, 2), (2, 1)], 5.0);
        arena.place(2, &[(0, 5), (1, 5)], 5.0);
        arena.grid.set(Position::new(2, 3), Cell::wall());

        arena
            .run(&[(1, Direction::Up, 0.1), (2, Direction::Left, 0.1)])
            .unwrap();

        assert_eq!(arena.body(1), positions(&[(2, 2), (2, 1)]));
        assert_eq!(arena.body(2), positions(&[(0, 5), (1, 5)]));
        assert_eq!(arena.snakes[&EntityId(2)].energy, 4.9);
    }

    #[test]
    fn test_eating_keeps_length() {
        let mut arena = Arena::new();
        arena.place(1, &[(2, 2), (2, 1), (2, 0)], 5.0);
        arena.grid.set(Position::new(2, 3), Cell::food(2.0, None, 0));

        let state = arena.run(&[(1, Direction::Up, 0.1)]).unwrap();

        assert_eq!(arena.body(1), positions(&[(2, 3), (2, 2), (2, 1)]));
        assert_eq!(arena.snakes[&EntityId(1)].energy, 6.9);
        assert_eq!(state.gained_by(EntityId(1)), 2.0);
        assert!(!state.bit_self.contains(&EntityId(1)));
    }

    #[test]
    fn test_starvation_scatters_body() {
        let mut arena = Arena::new();
        arena.place(1, &[(2, 2), (2, 1), (2, 0)], 0.5);

        let state = arena.run(&[(1, Direction::Up, 1.0)]).unwrap();

        assert!(arena.snakes.is_empty());
        let remains = state.fallen[&EntityId(1)];
        assert_eq!(remains.cause, DeathCause::Starved);
        assert_eq!(remains.head, Position::new(2, 2));
        for (x, y) in [(2, 2), (2, 1), (2, 0)] {
            let cell = arena.cell(x, y);
            assert_eq!(cell.kind, CellKind::Food);
            assert_eq!(cell.owner, Some(EntityId(1)));
            assert_eq!(cell.energy, 1.0);
        }
        assert_eq!(arena.kind(2, 3), CellKind::Empty);
    }

    #[test]
    fn test_heads_meeting_kill_both() {
        let mut arena = Arena::new();
        arena.place(1, &[(1, 2), (0, 2)], 5.0);
        arena.place(2, &[(3, 2), (4, 2)], 5.0);

        let state = arena
            .run(&[(1, Direction::Right, 0.1), (2, Direction::Left, 0.1)])
            .unwrap();

        assert!(state.is_dead(EntityId(1)));
        assert!(state.is_dead(EntityId(2)));
        assert_eq!(state.fallen[&EntityId(2)].cause, DeathCause::HeadOn);
        for x in 1..5 {
            assert_eq!(arena.kind(x, 2), CellKind::Food, "cell ({x}, 2)");
        }
        // Tail of the first snake retracted before the collision
        assert_eq!(arena.kind(0, 2), CellKind::Empty);
    }

    #[test]
    fn test_adjacent_heads_swapping_kill_both() {
        // Either snake can be the one resolved first
        for (left, right) in [(1, 2), (2, 1)] {
            let mut arena = Arena::new();
            arena.place(left, &[(4, 5), (3, 5)], 5.0);
            arena.place(right, &[(5, 5), (6, 5)], 5.0);

            let state = arena
                .run(&[(left, Direction::Right, 0.1), (right, Direction::Left, 0.1)])
                .unwrap();

            assert!(arena.snakes.is_empty());
            for id in [left, right] {
                assert_eq!(state.fallen[&EntityId(id)].cause, DeathCause::HeadOn);
            }
            for x in 3..=6 {
                assert_eq!(arena.kind(x, 5), CellKind::Food, "cell ({x}, 5)");
            }
            assert_eq!(arena.cell(3, 5).owner, Some(EntityId(left)));
            assert_eq!(arena.cell(6, 5).owner, Some(EntityId(right)));
        }
    }

    #[test]
    fn test_heads_meeting_with_lower_id_on_the_right() {
        let mut arena = Arena::new();
        arena.place(1, &[(6, 5), (7, 5)], 5.0);
        arena.place(2, &[(4, 5), (3, 5)], 5.0);

        let state = arena
            .run(&[(1, Direction::Left, 0.1), (2, Direction::Right, 0.1)])
            .unwrap();

        assert!(arena.snakes.is_empty());
        assert_eq!(state.fallen[&EntityId(1)].cause, DeathCause::HeadOn);
        assert_eq!(state.fallen[&EntityId(2)].cause, DeathCause::HeadOn);
        for x in 3..=6 {
            assert_eq!(arena.kind(x, 5), CellKind::Food, "cell ({x}, 5)");
        }
        // Tail of the first resolved snake retracted before the collision
        assert_eq!(arena.kind(7, 5), CellKind::Empty);
    }

    #[test]
    fn test_bite_off_after_dependent_move() {
        let mut arena = Arena::new();
        arena.place(1, &[(4, 3), (3, 3)], 5.0);
        arena.place(2, &[(5, 5), (5, 4), (5, 3), (5, 2), (5, 1)], 5.0);

        let state = arena
            .run(&[(1, Direction::Right, 0.1), (2, Direction::Up, 0.1)])
            .unwrap();

        // Victim moved first, then lost the part from the bite to its tail
        assert_eq!(arena.body(2), positions(&[(5, 6), (5, 5), (5, 4)]));
        let victim = &arena.snakes[&EntityId(2)];
        assert_eq!(victim.length, 3);
        assert_eq!(victim.energy, 2.9);
        assert!(arena.cell(5, 6).flags.contains(CellFlags::PENDING_SHORTEN));
        assert!(state.bitten.contains(&EntityId(2)));

        assert_eq!(arena.cell(5, 2).kind, CellKind::Food);
        assert_eq!(arena.cell(5, 2).owner, Some(EntityId(2)));
        assert_eq!(arena.cell(5, 2).energy, 1.0);
        assert_eq!(arena.kind(5, 1), CellKind::Empty);

        assert_eq!(arena.body(1), positions(&[(5, 3), (4, 3)]));
        assert_eq!(arena.snakes[&EntityId(1)].energy, 5.9);
        assert_eq!(state.gained_by(EntityId(1)), 1.0);
    }

    #[test]
    fn test_bite_behind_head_kills() {
        let mut arena = Arena::new();
        arena.place(1, &[(4, 4), (3, 4)], 5.0);
        arena.place(2, &[(5, 5), (5, 4), (5, 3)], 5.0);

        let state = arena.run(&[(1, Direction::Right, 0.1)]).unwrap();

        assert_eq!(state.fallen[&EntityId(2)].cause, DeathCause::Eaten);
        assert_eq!(arena.kind(5, 5), CellKind::Food);
        assert_eq!(arena.kind(5, 3), CellKind::Food);
        assert_eq!(arena.body(1), positions(&[(5, 4), (4, 4)]));

        let piece = 0.8 * 5.0 / 3.0;
        assert!((state.gained_by(EntityId(1)) - piece).abs() < 1e-6);
    }

    #[test]
    fn test_bite_on_tail_tip_kills() {
        let mut arena = Arena::new();
        arena.place(1, &[(4, 1), (3, 1)], 5.0);
        arena.place(2, &[(5, 4), (5, 3), (5, 2), (5, 1)], 5.0);

        let state = arena.run(&[(1, Direction::Right, 0.1)]).unwrap();
        assert!(state.is_dead(EntityId(2)));
        assert_eq!(arena.snakes.len(), 1);
    }

    #[test]
    fn test_self_bite_regrows() {
        let mut arena = Arena::new();
        arena.place(1, &[(2, 2), (3, 2), (3, 3), (2, 3), (1, 3)], 5.0);

        let state = arena.run(&[(1, Direction::Up, 0.1)]).unwrap();

        assert!(state.bit_self.contains(&EntityId(1)));
        assert!(!state.bitten.contains(&EntityId(1)));
        assert_eq!(arena.body(1), positions(&[(2, 3), (2, 2), (3, 2), (3, 3)]));

        let record = &arena.snakes[&EntityId(1)];
        assert_eq!(record.length, 4);
        assert_eq!(record.energy, 3.9);
        assert!(arena.cell(2, 3).flags.contains(CellFlags::PENDING_SHORTEN));
        assert_eq!(arena.kind(1, 3), CellKind::Food);
    }

    #[test]
    fn test_shortened_snake_grows_back() {
        let mut arena = Arena::new();
        arena.place(1, &[(2, 2), (2, 1), (2, 0)], 5.0);
        arena
            .grid
            .get_mut(Position::new(2, 2))
            .unwrap()
            .flags
            .insert(CellFlags::PENDING_SHORTEN);
        arena.grid.set(Position::new(2, 3), Cell::food(1.0, None, 0));
        arena.grid.set(Position::new(2, 4), Cell::food(1.0, None, 0));
        arena.grid.set(Position::new(2, 5), Cell::food(1.0, None, 0));

        for _ in 0..3 {
            arena.run(&[(1, Direction::Up, 0.0)]).unwrap();
        }

        // Grew to the target length of 5, then kept it
        assert_eq!(arena.snakes[&EntityId(1)].length, 5);
        assert_eq!(arena.body(1).len(), 5);
        assert!(!arena.cell(2, 5).flags.contains(CellFlags::PENDING_SHORTEN));
        assert_eq!(arena.kind(2, 0), CellKind::Empty);
    }

    #[test]
    fn test_following_own_tail_is_harmless() {
        let mut arena = Arena::new();
        arena.place(1, &[(2, 2), (2, 1), (1, 1), (1, 2)], 5.0);

        let state = arena.run(&[(1, Direction::Left, 0.1)]).unwrap();

        assert!(state.fallen.is_empty());
        assert_eq!(arena.body(1), positions(&[(1, 2), (2, 2), (2, 1), (1, 1)]));
    }

    #[test]
    fn test_single_cell_snake_moves() {
        let mut arena = Arena::new();
        arena.place(1, &[(5, 5)], 5.0);

        arena.run(&[(1, Direction::Right, 0.1)]).unwrap();

        assert_eq!(arena.body(1), positions(&[(6, 5)]));
        assert_eq!(arena.kind(5, 5), CellKind::Empty);
        assert_eq!(arena.cell(6, 5).back_link, None);
    }

    #[test]
    fn test_chasing_cycle_terminates() {
        let mut arena = Arena::new();
        // Two snakes each heading into the other's tail tip
        arena.place(1, &[(2, 2), (2, 1)], 5.0);
        arena.place(2, &[(3, 1), (3, 2)], 5.0);

        let state = arena
            .run(&[(1, Direction::Right, 0.1), (2, Direction::Left, 0.1)])
            .unwrap();

        // The second snake is resolved first and takes the first one's tail
        assert!(state.is_dead(EntityId(1)));
        assert!(!state.is_dead(EntityId(2)));
        assert_eq!(arena.body(2)[0], Position::new(2, 1));
    }

    #[test]
    fn test_corrupt_chain_is_fatal() {
        let mut arena = Arena::new();
        arena.place(1, &[(2, 2), (2, 1), (2, 0)], 5.0);
        let dangling = arena.grid.index_of(Position::new(7, 7)).unwrap();
        arena.grid.get_mut(Position::new(2, 1)).unwrap().back_link = Some(dangling);

        let err = arena.run(&[(1, Direction::Up, 0.1)]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_bite_scatter_never_exceeds_energy() {
        let mut arena = Arena::new();
        arena.place(1, &[(4, 3), (3, 3)], 5.0);
        arena.place(2, &[(5, 7), (5, 6), (5, 5), (5, 4), (5, 3), (5, 2), (5, 1)], 0.6);

        let state = arena.run(&[(1, Direction::Right, 0.1)]).unwrap();

        let left_behind: f64 = [(5, 2), (5, 1)]
            .iter()
            .map(|&(x, y)| arena.cell(x, y).energy)
            .sum();
        let scattered = left_behind + state.gained_by(EntityId(1));
        assert!(scattered <= 0.6 + 1e-9);
        assert!(arena.snakes[&EntityId(2)].energy >= 0.0);
        assert_eq!(arena.snakes[&EntityId(2)].length, 4);
    }
}
