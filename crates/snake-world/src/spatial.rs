//! Square tree over occupied cells, for bounded-radius lookups.

use snake_core::Position;
use std::collections::HashMap;

/// Points a leaf holds before it splits
const LEAF_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
struct Node {
    min: Position,
    width: i32,
    height: i32,
    points: Vec<Position>,
    /// Quadrants: upper-right, upper-left, lower-left, lower-right
    children: Option<[usize; 4]>,
}

impl Node {
    fn new(min: Position, width: i32, height: i32) -> Self {
        Self {
            min,
            width,
            height,
            points: Vec::with_capacity(LEAF_CAPACITY),
            children: None,
        }
    }

    fn contains(&self, pos: Position) -> bool {
        let (rx, ry) = (pos.x - self.min.x, pos.y - self.min.y);
        0 <= rx && rx < self.width && 0 <= ry && ry < self.height
    }

    fn quadrant(&self, pos: Position) -> usize {
        let (rx, ry) = (pos.x - self.min.x, pos.y - self.min.y);
        match (rx < self.width / 2, ry < self.height / 2) {
            (false, false) => 0,
            (true, false) => 1,
            (true, true) => 2,
            (false, true) => 3,
        }
    }

    /// Squared distance from `center` to the closest cell of this node
    fn distance_squared_to(&self, center: Position) -> i64 {
        let max_x = self.min.x + self.width - 1;
        let max_y = self.min.y + self.height - 1;
        let closest = Position::new(
            center.x.clamp(self.min.x, max_x.max(self.min.x)),
            center.y.clamp(self.min.y, max_y.max(self.min.y)),
        );
        closest.distance_squared(&center)
    }
}

/// Region quadtree storing a set of integer points.
///
/// Nodes live in an arena; `locations` maps each stored point to the leaf
/// holding it so removal does not walk the tree.
#[derive(Debug, Clone)]
pub struct SquareTree {
    nodes: Vec<Node>,
    locations: HashMap<Position, usize>,
}

impl SquareTree {
    pub fn new(min_x: i32, min_y: i32, width: i32, height: i32) -> Self {
        Self {
            nodes: vec![Node::new(Position::new(min_x, min_y), width, height)],
            locations: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.locations.contains_key(&pos)
    }

    /// Whether `pos` lies in the covered region
    pub fn covers(&self, pos: Position) -> bool {
        self.nodes[0].contains(pos)
    }

    /// Add a point. `false` when it lies outside the covered region.
    pub fn insert(&mut self, pos: Position) -> bool {
        if !self.covers(pos) {
            return false;
        }
        if self.contains(pos) {
            return true;
        }

        let mut node = 0;
        loop {
            if let Some(children) = self.nodes[node].children {
                node = children[self.nodes[node].quadrant(pos)];
                continue;
            }

            if self.nodes[node].points.len() < LEAF_CAPACITY {
                self.nodes[node].points.push(pos);
                self.locations.insert(pos, node);
                return true;
            }

            self.split(node);
        }
    }

    /// Drop a point. Absent points are left alone and report `false`.
    pub fn remove(&mut self, pos: Position) -> bool {
        let Some(node) = self.locations.remove(&pos) else {
            return false;
        };

        let points = &mut self.nodes[node].points;
        if let Some(i) = points.iter().position(|p| *p == pos) {
            points.swap_remove(i);
        }
        true
    }

    pub fn query_circle(&self, center: Position, radius: f32) -> Vec<Position> {
        let mut found = Vec::new();
        self.query_circle_into(center, radius, &mut found);
        found
    }

    /// Append every point within `radius` of `center` (inclusive) to `found`.
    pub fn query_circle_into(&self, center: Position, radius: f32, found: &mut Vec<Position>) {
        if radius < 0.0 || radius.is_nan() {
            return;
        }

        let limit = f64::from(radius) * f64::from(radius);
        let mut stack = vec![0usize];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if node.width <= 0 || node.height <= 0 {
                continue;
            }
            if node.distance_squared_to(center) as f64 > limit {
                continue;
            }

            found.extend(
                node.points
                    .iter()
                    .filter(|p| p.distance_squared(&center) as f64 <= limit),
            );

            if let Some(children) = node.children {
                stack.extend(children);
            }
        }
    }

    fn split(&mut self, index: usize) {
        let (min, w, h) = {
            let node = &self.nodes[index];
            (node.min, node.width, node.height)
        };

        let base = self.nodes.len();
        self.nodes.extend([
            Node::new(min.add(w / 2, h / 2), (w + 1) / 2, (h + 1) / 2),
            Node::new(min.add(0, h / 2), w / 2, (h + 1) / 2),
            Node::new(min, w / 2, h / 2),
            Node::new(min.add(w / 2, 0), (w + 1) / 2, h / 2),
        ]);
        let children = [base, base + 1, base + 2, base + 3];

        let points = std::mem::take(&mut self.nodes[index].points);
        self.nodes[index].children = Some(children);

        for pos in points {
            let child = children[self.nodes[index].quadrant(pos)];
            self.nodes[child].points.push(pos);
            self.locations.insert(pos, child);
        }
    }
}
