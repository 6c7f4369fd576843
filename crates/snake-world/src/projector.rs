//! Projection of nearby cells onto an agent's angular field of view.

use crate::grid::Grid;
use crate::snake::SnakeRecord;
use crate::spatial::SquareTree;
use snake_agents::{PerceptionSource, ViewRequest};
use snake_core::{CellKind, Direction, EntityId, Perception, Position, SnakeProfile};
use std::collections::BTreeMap;
use std::f32::consts::PI;

/// Angular interval covered by one visible cell, in radians relative to
/// forward (negative is left).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    start: f32,
    end: f32,
    distance: f32,
    density: f32,
    kinship: f32,
}

#[derive(Default)]
struct Spans {
    food: Vec<Span>,
    wall: Vec<Span>,
    snake: Vec<Span>,
}

/// Read-only view over the world used to build perceptions.
#[derive(Clone, Copy)]
pub struct FieldProjector<'a> {
    grid: &'a Grid,
    index: &'a SquareTree,
    snakes: &'a BTreeMap<EntityId, SnakeRecord>,
}

impl<'a> FieldProjector<'a> {
    pub fn new(
        grid: &'a Grid,
        index: &'a SquareTree,
        snakes: &'a BTreeMap<EntityId, SnakeRecord>,
    ) -> Self {
        Self {
            grid,
            index,
            snakes,
        }
    }

    /// Perception without an observer profile; kinship stays zero.
    pub fn view(
        &self,
        position: Position,
        facing: Direction,
        cull_radius: f32,
        half_view_angle: f32,
        resolution: usize,
    ) -> Perception {
        self.project(None, position, facing, cull_radius, half_view_angle, resolution)
    }

    /// Perception of a registered snake, with kinship against its profile.
    pub fn view_as(
        &self,
        observer: EntityId,
        position: Position,
        facing: Direction,
        cull_radius: f32,
        half_view_angle: f32,
        resolution: usize,
    ) -> Perception {
        let profile = self.snakes.get(&observer).map(|snake| &snake.profile);
        self.project(profile, position, facing, cull_radius, half_view_angle, resolution)
    }

    fn project(
        &self,
        observer: Option<&SnakeProfile>,
        position: Position,
        facing: Direction,
        cull_radius: f32,
        half_view_angle: f32,
        resolution: usize,
    ) -> Perception {
        let mut perception = Perception::empty(resolution);
        if resolution == 0 {
            return perception;
        }

        let half_view = half_view_angle.clamp(0.0, PI);
        let spans = self.collect_spans(observer, position, facing, cull_radius, half_view);

        let raster = Raster::new(half_view, resolution);
        raster.fill_density(&flatten(spans.food), &mut perception.food);
        raster.fill_density(&flatten(spans.wall), &mut perception.wall);

        let snakes = flatten(spans.snake);
        raster.fill_density(&snakes, &mut perception.snake);
        raster.fill_kinship(&snakes, &mut perception.kinship);

        perception
    }

    fn collect_spans(
        &self,
        observer: Option<&SnakeProfile>,
        position: Position,
        facing: Direction,
        cull_radius: f32,
        half_view: f32,
    ) -> Spans {
        let forward = if facing.is_none() { Direction::Up } else { facing };
        let (fx, fy) = forward.to_delta();
        let (rx, ry) = (fy, -fx);

        let mut spans = Spans::default();
        for point in self.index.query_circle(position, cull_radius) {
            if point == position {
                continue;
            }

            let (dx, dy) = (point.x - position.x, point.y - position.y);
            let local_x = (dx * rx + dy * ry) as f32;
            let local_y = (dx * fx + dy * fy) as f32;

            let distance = local_x.hypot(local_y);
            let angle = local_x.atan2(local_y);
            let half_width = 0.5f32.atan2(distance);

            let (start, end) = (angle - half_width, angle + half_width);
            if end < -half_view || start > half_view {
                continue;
            }

            let mut span = Span {
                start,
                end,
                distance,
                density: 1.0 / distance,
                kinship: 0.0,
            };

            match self.grid.get(point) {
                // Outside the grid: the world border
                None => spans.wall.push(span),
                Some(cell) => match cell.kind {
                    CellKind::Food => spans.food.push(span),
                    CellKind::Wall => spans.wall.push(span),
                    CellKind::Snake => {
                        span.kinship = self.kinship_with(observer, cell.owner);
                        spans.snake.push(span);
                    }
                    CellKind::Empty => {}
                },
            }
        }
        spans
    }

    fn kinship_with(&self, observer: Option<&SnakeProfile>, owner: Option<EntityId>) -> f32 {
        let owner = owner.and_then(|id| self.snakes.get(&id));
        match (observer, owner) {
            (Some(observer), Some(owner)) => SnakeProfile::kinship(observer, &owner.profile),
            _ => 0.0,
        }
    }
}

impl PerceptionSource for FieldProjector<'_> {
    fn view(&self, request: &ViewRequest) -> Perception {
        self.view_as(
            request.observer,
            request.position,
            request.facing,
            request.cull_radius,
            request.half_view_angle,
            request.resolution,
        )
    }
}

/// Remove the parts of every span hidden behind nearer spans of the same set.
fn flatten(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(b.density.total_cmp(&a.density))
    });

    let mut covered: Vec<(f32, f32)> = Vec::new();
    let mut visible = Vec::with_capacity(spans.len());

    for span in spans {
        let mut pieces = vec![(span.start, span.end)];
        for &(c_start, c_end) in &covered {
            pieces = pieces
                .into_iter()
                .flat_map(|(start, end)| subtract((start, end), (c_start, c_end)))
                .collect();
            if pieces.is_empty() {
                break;
            }
        }

        visible.extend(pieces.into_iter().map(|(start, end)| Span { start, end, ..span }));
        covered.push((span.start, span.end));
    }

    visible
}

/// `a` minus `b`, as zero, one or two intervals.
fn subtract(a: (f32, f32), b: (f32, f32)) -> Vec<(f32, f32)> {
    if b.1 <= a.0 || a.1 <= b.0 {
        return vec![a];
    }

    let mut rest = Vec::with_capacity(2);
    if a.0 < b.0 {
        rest.push((a.0, b.0));
    }
    if b.1 < a.1 {
        rest.push((b.1, a.1));
    }
    rest
}

/// Equal angular buckets from the left edge of the cone, clockwise.
struct Raster {
    left: f32,
    bucket_width: f32,
    resolution: usize,
}

impl Raster {
    fn new(half_view: f32, resolution: usize) -> Self {
        Self {
            left: -half_view,
            bucket_width: 2.0 * half_view / resolution as f32,
            resolution,
        }
    }

    /// Buckets overlapped by `span`, with the covered fraction of each.
    fn overlaps(&self, span: &Span) -> impl Iterator<Item = (usize, f32)> + '_ {
        let (start, end) = (span.start, span.end);
        (0..self.resolution).filter_map(move |bucket| {
            if self.bucket_width <= 0.0 {
                return None;
            }
            let lo = self.left + bucket as f32 * self.bucket_width;
            let hi = lo + self.bucket_width;
            let overlap = end.min(hi) - start.max(lo);
            (overlap > 0.0).then(|| (bucket, overlap / self.bucket_width))
        })
    }

    fn fill_density(&self, spans: &[Span], out: &mut [f32]) {
        for span in spans {
            for (bucket, fraction) in self.overlaps(span) {
                out[bucket] += span.density * fraction;
            }
        }
    }

    fn fill_kinship(&self, spans: &[Span], out: &mut [f32]) {
        let mut nearest = vec![f32::INFINITY; self.resolution];
        for span in spans {
            for (bucket, _) in self.overlaps(span) {
                if span.distance < nearest[bucket] {
                    nearest[bucket] = span.distance;
                    out[bucket] = span.kinship;
                }
            }
        }
    }
}
