//! Agent mechanism for the arena.
//!
//! This module provides the boundary between the engine and agent code:
//! - The [`Agent`] contract external decision policies implement
//! - The [`AgentPort`] that polls agents on a worker pool
//! - The [`Scorer`] tracking decaying score multipliers
//! - A reference [`SimpleBot`]

pub mod bot;
pub mod port;
pub mod scorer;

pub use bot::SimpleBot;
pub use port::AgentPort;
pub use scorer::Scorer;

use parking_lot::Mutex;
use snake_core::{Direction, EntityId, MoveOutcome, Perception, Position, SnakeProfile};
use std::sync::Arc;

/// A pluggable decision policy controlling one snake.
pub trait Agent: Send {
    /// Static profile of the snake this agent controls
    fn profile(&self) -> SnakeProfile;

    /// Whether [`Agent::decide`] wants a perception. Agents that answer `false`
    /// always receive `None`.
    fn needs_perception(&self) -> bool {
        false
    }

    /// Choose the next direction given the current head facing.
    fn decide(&mut self, facing: Direction, perception: Option<&Perception>) -> Direction;

    /// Called on the engine thread after every tick the agent took part in.
    fn on_outcome(&mut self, _outcome: &MoveOutcome) {}
}

/// Shared handle to an agent. Identity is the allocation, not the value.
pub type AgentHandle = Arc<Mutex<dyn Agent>>;

/// Wrap an agent into a handle
pub fn handle<A: Agent + 'static>(agent: A) -> AgentHandle {
    Arc::new(Mutex::new(agent))
}

pub(crate) fn same_agent(a: &AgentHandle, b: &AgentHandle) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const u8,
        Arc::as_ptr(b) as *const u8,
    )
}

/// Everything needed to build one agent's perception
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRequest {
    pub observer: EntityId,
    pub position: Position,
    pub facing: Direction,
    pub cull_radius: f32,
    pub half_view_angle: f32,
    pub resolution: usize,
}

/// Read-only source of perceptions, shared by all move-collection workers.
pub trait PerceptionSource: Sync {
    fn view(&self, request: &ViewRequest) -> Perception;
}

/// Source that sees nothing. Used when no world is attached.
pub struct Blind;

impl PerceptionSource for Blind {
    fn view(&self, request: &ViewRequest) -> Perception {
        Perception::empty(request.resolution)
    }
}
