//! Placing new snake bodies on the grid.

use crate::grid::Grid;
use crate::spatial::SquareTree;
use rand::Rng;
use snake_core::{Cell, CellFlags, CellKind, Direction, EntityId, Error, Position, Result, SpawnConfig};
use tracing::warn;

/// Axis-aligned box of cells, corners inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnBox {
    pub min: Position,
    pub max: Position,
}

impl SpawnBox {
    pub fn width(&self) -> i32 {
        self.max.x - self.min.x + 1
    }

    pub fn height(&self) -> i32 {
        self.max.y - self.min.y + 1
    }

    pub fn center(&self) -> Position {
        self.min.add((self.width() - 1) / 2, (self.height() - 1) / 2)
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.min.x <= pos.x && pos.x <= self.max.x && self.min.y <= pos.y && pos.y <= self.max.y
    }

    pub fn cells(&self) -> impl Iterator<Item = Position> + '_ {
        (self.min.y..=self.max.y)
            .flat_map(move |y| (self.min.x..=self.max.x).map(move |x| Position::new(x, y)))
    }

    /// Drop the edge the spiral just walked along.
    fn shrink(&mut self, face: u8) {
        match face {
            0 => self.min.x += 1,
            1 => self.max.y -= 1,
            2 => self.max.x -= 1,
            _ => self.min.y += 1,
        }
    }

    /// Starting corner and walking direction for a spiral edge.
    fn corner(&self, face: u8, clockwise: bool) -> (Position, Direction) {
        let (min, max) = (self.min, self.max);
        match (face, clockwise) {
            (0, true) => (min, Direction::Up),
            (0, false) => (Position::new(min.x, max.y), Direction::Down),
            (1, true) => (Position::new(min.x, max.y), Direction::Right),
            (1, false) => (max, Direction::Left),
            (2, true) => (max, Direction::Down),
            (2, false) => (Position::new(max.x, min.y), Direction::Up),
            (_, true) => (Position::new(max.x, min.y), Direction::Left),
            (_, false) => (min, Direction::Right),
        }
    }
}

/// Box side lengths for a body of `length` cells, in random orientation.
pub fn box_dimensions<R: Rng + ?Sized>(length: usize, rng: &mut R) -> (i32, i32) {
    let length = length.max(1);
    let a = (length as f64).sqrt().ceil() as usize;
    let b = length.div_ceil(a);

    if rng.gen_bool(0.5) {
        (a as i32, b as i32)
    } else {
        (b as i32, a as i32)
    }
}

/// Find a free box for a body of `length` cells.
///
/// Strict attempts also keep the box away from other snakes; relaxed
/// attempts only need the box itself to be free.
pub fn find_site<R: Rng + ?Sized>(
    grid: &Grid,
    index: &SquareTree,
    length: usize,
    config: &SpawnConfig,
    rng: &mut R,
) -> Result<SpawnBox> {
    let (w, h) = box_dimensions(length, rng);
    if grid.width < w || grid.height < h {
        return Err(Error::SpawnPlacement(format!(
            "{}x{} grid cannot hold a {w}x{h} spawn box",
            grid.width, grid.height
        )));
    }

    let draw = |rng: &mut R| {
        let min = Position::new(
            rng.gen_range(0..=grid.width - w),
            rng.gen_range(0..=grid.height - h),
        );
        SpawnBox {
            min,
            max: min.add(w - 1, h - 1),
        }
    };

    let mut nearby = Vec::new();
    for _ in 0..config.strict_attempts {
        let candidate = draw(rng);
        if !box_is_free(grid, &candidate) {
            continue;
        }

        nearby.clear();
        let radius = 2.0 * w.max(h) as f32;
        index.query_circle_into(candidate.center(), radius, &mut nearby);
        let crowded = nearby
            .iter()
            .any(|p| grid.kind_at(*p) == Some(CellKind::Snake));

        if !crowded {
            return Ok(candidate);
        }
    }

    for attempt in 0..config.relaxed_attempts {
        let candidate = draw(rng);
        if box_is_free(grid, &candidate) {
            warn!(
                event = "spawn_relaxed",
                attempt,
                x = candidate.min.x,
                y = candidate.min.y,
                "Spawned close to another snake"
            );
            return Ok(candidate);
        }
    }

    Err(Error::SpawnPlacement(format!(
        "no free {w}x{h} box after {} attempts",
        config.strict_attempts + config.relaxed_attempts
    )))
}

fn box_is_free(grid: &Grid, spawn_box: &SpawnBox) -> bool {
    spawn_box
        .cells()
        .all(|pos| grid.get(pos).is_some_and(|cell| cell.is_spawnable()))
}

/// Lay a body as a spiral inside `spawn_box`, head first.
///
/// The spiral starts at a random corner and turns in a random sense. Cells
/// get `last_tick = tick - 1` so they still count as unresolved this tick.
pub fn lay_spiral<R: Rng + ?Sized>(
    grid: &mut Grid,
    mut spawn_box: SpawnBox,
    id: EntityId,
    length: usize,
    tick: u64,
    rng: &mut R,
) -> Vec<Position> {
    let length = length.max(1);
    let roll: u8 = rng.gen_range(0..8);
    let mut face = ((roll + 1) / 2) % 4;
    let clockwise = roll % 2 == 1;

    let (mut next, mut dir) = spawn_box.corner(face, clockwise);
    let mut body = Vec::with_capacity(length);

    for i in 0..length {
        let current = next;

        if i + 1 < length {
            if spawn_box.contains(current.step(dir)) {
                next = current.step(dir);
            } else {
                spawn_box.shrink(face);
                face = (face + if clockwise { 1 } else { 3 }) % 4;
                (next, dir) = spawn_box.corner(face, clockwise);
            }
        }

        let back_link = if i + 1 == length {
            None
        } else {
            grid.index_of(next)
        };
        let flags = if i == 0 { CellFlags::HEAD } else { CellFlags::NONE };

        grid.set(
            current,
            Cell::segment(id, back_link, flags, dir.opposite(), tick.saturating_sub(1)),
        );
        body.push(current);
    }

    body
}

/// Check an explicit body (head first) before placing it.
pub fn validate_body(grid: &Grid, body: &[Position]) -> Result<()> {
    if body.is_empty() {
        return Err(Error::SpawnPlacement("body must have at least one cell".to_string()));
    }

    for (i, pos) in body.iter().enumerate() {
        let Some(cell) = grid.get(*pos) else {
            return Err(Error::SpawnPlacement(format!("body cell {pos} is outside the grid")));
        };
        if !cell.is_spawnable() {
            return Err(Error::SpawnPlacement(format!(
                "body cell {pos} is occupied by {:?}",
                cell.kind
            )));
        }
        if body[..i].contains(pos) {
            return Err(Error::SpawnPlacement(format!("body cell {pos} repeats")));
        }
        if i > 0 && body[i - 1].manhattan_distance(pos) != 1 {
            return Err(Error::SpawnPlacement(format!(
                "body cells {} and {pos} are not adjacent",
                body[i - 1]
            )));
        }
    }
    Ok(())
}

/// Write a validated body onto the grid.
pub fn lay_body(grid: &mut Grid, id: EntityId, body: &[Position], tick: u64) {
    for (i, pos) in body.iter().enumerate() {
        let back = body.get(i + 1);
        let facing = match (back, i.checked_sub(1).map(|j| body[j])) {
            (Some(back), _) => back.direction_to(pos),
            (None, Some(front)) => pos.direction_to(&front),
            (None, None) => Some(Direction::Up),
        }
        .unwrap_or(Direction::Up);

        let flags = if i == 0 { CellFlags::HEAD } else { CellFlags::NONE };
        let back_link = back.and_then(|p| grid.index_of(*p));
        grid.set(
            *pos,
            Cell::segment(id, back_link, flags, facing, tick.saturating_sub(1)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn walk(grid: &Grid, head: Position, id: EntityId) -> Vec<Position> {
        let mut body = vec![head];
        let mut link = grid.get(head).unwrap().back_link;
        while let Some(index) = link {
            let cell = grid.cell(index).unwrap();
            assert!(cell.is_segment_of(id));
            assert!(!cell.is_head());
            body.push(grid.position_of(index));
            link = cell.back_link;
            assert!(body.len() <= grid.len());
        }
        body
    }

    #[test]
    fn test_box_dimensions_cover_length() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for length in 1..40 {
            let (w, h) = box_dimensions(length, &mut rng);
            assert!((w * h) as usize >= length);
            assert!((w - h).abs() <= 1);
        }
        assert_eq!(
            {
                let (w, h) = box_dimensions(5, &mut rng);
                (w.max(h), w.min(h))
            },
            (3, 2)
        );
    }

    #[test]
    fn test_spiral_is_contiguous_for_every_roll() {
        for seed in 0..64 {
            for length in [1usize, 2, 3, 5, 9, 12] {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let mut grid = Grid::new(12, 12);
                let (w, h) = box_dimensions(length, &mut rng);
                let spawn_box = SpawnBox {
                    min: Position::new(3, 3),
                    max: Position::new(3 + w - 1, 3 + h - 1),
                };

                let id = EntityId(1);
                let body = lay_spiral(&mut grid, spawn_box, id, length, 5, &mut rng);
                assert_eq!(body.len(), length);
                assert!(body.iter().all(|p| spawn_box.contains(*p)));
                assert!(grid.get(body[0]).unwrap().is_head());
                assert_eq!(walk(&grid, body[0], id), body);

                for pair in body.windows(2) {
                    let step = pair[1].direction_to(&pair[0]).unwrap();
                    assert_eq!(grid.get(pair[0]).unwrap().facing, step);
                }
                assert_eq!(grid.get(body[0]).unwrap().last_tick, 4);
            }
        }
    }

    #[test]
    fn test_find_site_avoids_occupied_cells() {
        let mut grid = Grid::new(10, 10);
        let positions: Vec<_> = grid.iter().map(|(p, _)| p).collect();
        for pos in positions.into_iter().filter(|p| p.x < 7) {
            grid.set(pos, Cell::wall());
        }
        let index = SquareTree::new(-1, -1, 12, 12);
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        let site = find_site(&grid, &index, 4, &SpawnConfig::default(), &mut rng).unwrap();
        assert!(site.cells().all(|p| p.x >= 7));
    }

    #[test]
    fn test_find_site_fails_when_full() {
        let mut grid = Grid::new(6, 6);
        let positions: Vec<_> = grid.iter().map(|(p, _)| p).collect();
        for pos in positions {
            grid.set(pos, Cell::wall());
        }
        let index = SquareTree::new(-1, -1, 8, 8);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let result = find_site(&grid, &index, 4, &SpawnConfig::default(), &mut rng);
        assert!(matches!(result, Err(Error::SpawnPlacement(_))));

        let tiny = Grid::new(1, 1);
        let result = find_site(&tiny, &index, 5, &SpawnConfig::default(), &mut rng);
        assert!(matches!(result, Err(Error::SpawnPlacement(_))));
    }

    #[test]
    fn test_validate_body() {
        let mut grid = Grid::new(8, 8);
        grid.set(Position::new(5, 5), Cell::wall());
        grid.set(Position::new(2, 3), Cell::food(1.0, None, 0));

        let good = [Position::new(2, 2), Position::new(2, 3), Position::new(3, 3)];
        assert!(validate_body(&grid, &good).is_ok());

        let gap = [Position::new(2, 2), Position::new(2, 4)];
        let repeat = [Position::new(2, 2), Position::new(2, 3), Position::new(2, 2)];
        let outside = [Position::new(0, 0), Position::new(-1, 0)];
        let blocked = [Position::new(5, 4), Position::new(5, 5)];

        let empty: [Position; 0] = [];
        for body in [&gap[..], &repeat[..], &outside[..], &blocked[..], &empty[..]] {
            assert!(matches!(validate_body(&grid, body), Err(Error::SpawnPlacement(_))));
        }
    }

    #[test]
    fn test_lay_body_links_and_facing() {
        let mut grid = Grid::new(8, 8);
        let body = [Position::new(2, 4), Position::new(2, 3), Position::new(2, 2)];
        lay_body(&mut grid, EntityId(7), &body, 1);

        assert_eq!(walk(&grid, body[0], EntityId(7)), body.to_vec());
        assert_eq!(grid.get(body[0]).unwrap().facing, Direction::Up);
        assert_eq!(grid.get(body[2]).unwrap().facing, Direction::Up);
        assert_eq!(grid.get(body[2]).unwrap().back_link, None);
    }
}
