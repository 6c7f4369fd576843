//! World simulation engine.
//!
//! This module implements the bounded grid the snakes live on, the spatial
//! index used for visibility, and the tick loop that moves, feeds and kills them.

pub mod food;
pub mod generator;
pub mod grid;
pub mod projector;
pub mod resolver;
pub mod simulation;
pub mod snake;
pub mod spatial;
pub mod spawn;

pub use generator::{generate, FieldGenerator, GeneratedField};
pub use grid::Grid;
pub use projector::FieldProjector;
pub use resolver::{DeathCause, Remains};
pub use simulation::{ObserverHandle, PopulationSummary, Simulation, SimulationObserver, StepReport};
pub use snake::SnakeRecord;
pub use spatial::SquareTree;
