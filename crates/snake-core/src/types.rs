//! Core type definitions for the simulation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable integer identifier of a snake entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out entity ids. Owned by the engine and passed down to ports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next += 1;
        id
    }
}

/// 2D position on the grid. `+y` is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn add(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Neighbor one step in `dir`; `Direction::None` returns the same position.
    pub fn step(&self, dir: Direction) -> Self {
        let (dx, dy) = dir.to_delta();
        self.add(dx, dy)
    }

    pub fn distance_squared(&self, other: &Position) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }

    /// Manhattan distance to another position
    pub fn manhattan_distance(&self, other: &Position) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Direction of a unit step from `self` to `other`, if they are 4-adjacent.
    pub fn direction_to(&self, other: &Position) -> Option<Direction> {
        match (other.x - self.x, other.y - self.y) {
            (0, 1) => Some(Direction::Up),
            (1, 0) => Some(Direction::Right),
            (0, -1) => Some(Direction::Down),
            (-1, 0) => Some(Direction::Left),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Direction for movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    None,
    Up,
    Right,
    Down,
    Left,
}

impl Direction {
    pub fn to_delta(&self) -> (i32, i32) {
        match self {
            Direction::None => (0, 0),
            Direction::Up => (0, 1),
            Direction::Right => (1, 0),
            Direction::Down => (0, -1),
            Direction::Left => (-1, 0),
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::None => Direction::None,
            Direction::Up => Direction::Down,
            Direction::Right => Direction::Left,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
        }
    }

    pub fn turn_left(&self) -> Direction {
        match self {
            Direction::None => Direction::None,
            Direction::Up => Direction::Left,
            Direction::Right => Direction::Up,
            Direction::Down => Direction::Right,
            Direction::Left => Direction::Down,
        }
    }

    pub fn turn_right(&self) -> Direction {
        self.turn_left().opposite()
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Direction::None)
    }

    pub fn all() -> [Direction; 4] {
        [Direction::Up, Direction::Right, Direction::Down, Direction::Left]
    }
}

/// What occupies a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CellKind {
    #[default]
    Empty,
    Food,
    Wall,
    Snake,
}

/// Per-cell bit set: `HEAD` and `PENDING_SHORTEN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CellFlags(u8);

impl CellFlags {
    pub const NONE: CellFlags = CellFlags(0);
    pub const HEAD: CellFlags = CellFlags(1);
    /// The body is shorter than its target length and regrows on the next food.
    pub const PENDING_SHORTEN: CellFlags = CellFlags(2);

    pub fn contains(&self, other: CellFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: CellFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: CellFlags) {
        self.0 &= !other.0;
    }

    pub fn union(self, other: CellFlags) -> CellFlags {
        CellFlags(self.0 | other.0)
    }
}

/// Grid cell state
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Cell {
    pub kind: CellKind,
    /// Segment owner, or the snake whose remains a food piece came from.
    pub owner: Option<EntityId>,
    pub last_tick: u64,
    /// Flat index of the next segment toward the tail; `None` marks the tail.
    pub back_link: Option<usize>,
    pub energy: f64,
    pub flags: CellFlags,
    pub facing: Direction,
}

impl Cell {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn wall() -> Self {
        Self {
            kind: CellKind::Wall,
            ..Self::default()
        }
    }

    pub fn food(value: f64, owner: Option<EntityId>, tick: u64) -> Self {
        Self {
            kind: CellKind::Food,
            owner,
            last_tick: tick,
            energy: value,
            ..Self::default()
        }
    }

    pub fn segment(
        owner: EntityId,
        back_link: Option<usize>,
        flags: CellFlags,
        facing: Direction,
        tick: u64,
    ) -> Self {
        Self {
            kind: CellKind::Snake,
            owner: Some(owner),
            last_tick: tick,
            back_link,
            energy: 0.0,
            flags,
            facing,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind == CellKind::Empty
    }

    pub fn is_head(&self) -> bool {
        self.kind == CellKind::Snake && self.flags.contains(CellFlags::HEAD)
    }

    pub fn is_segment_of(&self, id: EntityId) -> bool {
        self.kind == CellKind::Snake && self.owner == Some(id)
    }

    /// Cells a spawning body may overwrite
    pub fn is_spawnable(&self) -> bool {
        matches!(self.kind, CellKind::Empty | CellKind::Food)
    }
}

/// One agent's requested move for a tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveIntent {
    pub id: EntityId,
    pub direction: Direction,
    pub energy_cost: f64,
}

impl MoveIntent {
    pub fn new(id: EntityId, direction: Direction, energy_cost: f64) -> Self {
        Self {
            id,
            direction,
            energy_cost,
        }
    }

    /// Zero-cost placeholder for agents that have not been placed yet.
    pub fn idle(id: EntityId) -> Self {
        Self::new(id, Direction::None, 0.0)
    }
}

/// Status bits reported in a [`MoveOutcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OutcomeFlags(u8);

impl OutcomeFlags {
    pub const NONE: OutcomeFlags = OutcomeFlags(0);
    pub const ALIVE: OutcomeFlags = OutcomeFlags(1);
    pub const ATE_FOOD: OutcomeFlags = OutcomeFlags(2);
    pub const WAS_BITTEN: OutcomeFlags = OutcomeFlags(4);
    pub const BIT_SELF: OutcomeFlags = OutcomeFlags(8);

    pub fn contains(&self, other: OutcomeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: OutcomeFlags) {
        self.0 |= other.0;
    }
}

/// Per-agent result of a tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub id: EntityId,
    pub remaining_energy: f64,
    /// Last known head position
    pub head_position: Position,
    pub head_direction: Direction,
    pub energy_gained: f64,
    pub status: OutcomeFlags,
}

impl MoveOutcome {
    pub fn is_alive(&self) -> bool {
        self.status.contains(OutcomeFlags::ALIVE)
    }
}

/// Angular sensory array produced for one agent
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Perception {
    pub food: Vec<f32>,
    pub wall: Vec<f32>,
    pub snake: Vec<f32>,
    pub kinship: Vec<f32>,
}

impl Perception {
    pub fn empty(resolution: usize) -> Self {
        Self {
            food: vec![0.0; resolution],
            wall: vec![0.0; resolution],
            snake: vec![0.0; resolution],
            kinship: vec![0.0; resolution],
        }
    }

    /// Number of angular buckets
    pub fn resolution(&self) -> usize {
        self.food.len()
    }

    pub fn is_blank(&self) -> bool {
        self.food
            .iter()
            .chain(&self.wall)
            .chain(&self.snake)
            .chain(&self.kinship)
            .all(|v| *v == 0.0)
    }
}

/// Settle an energy value to a fixed precision so repeated costs do not drift.
pub fn settle_energy(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_delta() {
        assert_eq!(Direction::Up.to_delta(), (0, 1));
        assert_eq!(Direction::Down.to_delta(), (0, -1));
        assert_eq!(Direction::Right.to_delta(), (1, 0));
        assert_eq!(Direction::Left.to_delta(), (-1, 0));
        assert_eq!(Direction::None.to_delta(), (0, 0));
    }

    #[test]
    fn test_direction_turns() {
        for dir in Direction::all() {
            assert_eq!(dir.turn_left().turn_right(), dir);
            assert_eq!(dir.opposite().opposite(), dir);
            assert_ne!(dir.turn_left(), dir.opposite());
        }
        assert_eq!(Direction::Up.turn_right(), Direction::Right);
        assert_eq!(Direction::Up.turn_left(), Direction::Left);
    }

    #[test]
    fn test_direction_to() {
        let p = Position::new(3, 3);
        assert_eq!(p.direction_to(&Position::new(3, 4)), Some(Direction::Up));
        assert_eq!(p.direction_to(&Position::new(2, 3)), Some(Direction::Left));
        assert_eq!(p.direction_to(&Position::new(4, 4)), None);
        assert_eq!(p.step(Direction::Down), Position::new(3, 2));
    }

    #[test]
    fn test_cell_flags() {
        let mut flags = CellFlags::HEAD;
        assert!(flags.contains(CellFlags::HEAD));
        assert!(!flags.contains(CellFlags::PENDING_SHORTEN));

        flags.insert(CellFlags::PENDING_SHORTEN);
        flags.remove(CellFlags::HEAD);
        assert!(!flags.contains(CellFlags::HEAD));
        assert!(flags.contains(CellFlags::PENDING_SHORTEN));
    }

    #[test]
    fn test_cell_constructors() {
        let head = Cell::segment(EntityId(3), Some(7), CellFlags::HEAD, Direction::Up, 1);
        assert!(head.is_head());
        assert!(head.is_segment_of(EntityId(3)));
        assert!(!head.is_segment_of(EntityId(4)));
        assert!(Cell::food(1.0, None, 0).is_spawnable());
        assert!(!Cell::wall().is_spawnable());
    }

    #[test]
    fn test_settle_energy() {
        let mut energy = 1.0;
        for _ in 0..10 {
            energy = settle_energy(energy - 0.1);
        }
        assert_eq!(energy, 0.0);
    }

    #[test]
    fn test_id_allocator() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next_id(), EntityId(0));
        assert_eq!(ids.next_id(), EntityId(1));
    }

    #[test]
    fn test_empty_perception() {
        let perception = Perception::empty(9);
        assert_eq!(perception.resolution(), 9);
        assert!(perception.is_blank());
    }
}
