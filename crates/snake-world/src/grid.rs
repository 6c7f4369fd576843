//! Bounded 2D grid of cells.

use serde::{Deserialize, Serialize};
use snake_core::{Cell, CellKind, Position};

/// A bounded grid stored row-major, `index = y * width + x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub width: i32,
    pub height: i32,
    cells: Vec<Cell>,
}

impl Grid {
    pub fn new(width: i32, height: i32) -> Self {
        let size = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            cells: vec![Cell::empty(); size],
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn in_bounds(&self, pos: Position) -> bool {
        0 <= pos.x && pos.x < self.width && 0 <= pos.y && pos.y < self.height
    }

    /// Flat index of an in-bounds position
    pub fn index_of(&self, pos: Position) -> Option<usize> {
        self.in_bounds(pos)
            .then(|| (pos.y * self.width + pos.x) as usize)
    }

    pub fn position_of(&self, index: usize) -> Position {
        let x = (index as i32) % self.width;
        let y = (index as i32) / self.width;
        Position::new(x, y)
    }

    /// Cell at `pos`; `None` outside the grid.
    pub fn get(&self, pos: Position) -> Option<&Cell> {
        self.index_of(pos).map(|index| &self.cells[index])
    }

    pub fn get_mut(&mut self, pos: Position) -> Option<&mut Cell> {
        self.index_of(pos).map(move |index| &mut self.cells[index])
    }

    /// Cell at a flat index; `None` past the end.
    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn cell_mut(&mut self, index: usize) -> Option<&mut Cell> {
        self.cells.get_mut(index)
    }

    /// Overwrite the cell at `pos`. Returns `false` outside the grid.
    pub fn set(&mut self, pos: Position, cell: Cell) -> bool {
        match self.get_mut(pos) {
            Some(slot) => {
                *slot = cell;
                true
            }
            None => false,
        }
    }

    pub fn kind_at(&self, pos: Position) -> Option<CellKind> {
        self.get(pos).map(|cell| cell.kind)
    }

    /// Iterator over all cells with positions
    pub fn iter(&self) -> impl Iterator<Item = (Position, &Cell)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, cell)| (self.position_of(i), cell))
    }

    pub fn occupied(&self) -> impl Iterator<Item = Position> + '_ {
        self.iter()
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(pos, _)| pos)
    }

    pub fn count(&self, kind: CellKind) -> usize {
        self.cells.iter().filter(|cell| cell.kind == kind).count()
    }

    /// Positions of the one-cell frame just outside the grid.
    pub fn border(&self) -> Vec<Position> {
        let mut border = Vec::with_capacity(2 * (self.width + self.height) as usize + 4);
        for x in -1..=self.width {
            border.push(Position::new(x, -1));
            border.push(Position::new(x, self.height));
        }
        for y in 0..self.height {
            border.push(Position::new(-1, y));
            border.push(Position::new(self.width, y));
        }
        border
    }
}
