//! Simulation engine: owns the grid, the spatial index and the snake records
//! and advances them one tick at a time.

use crate::food;
use crate::generator::FieldGenerator;
use crate::grid::Grid;
use crate::projector::FieldProjector;
use crate::resolver::{Resolver, TickState};
use crate::snake::{body_chain, SnakeRecord};
use crate::spatial::SquareTree;
use crate::spawn::{find_site, lay_body, lay_spiral, validate_body};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use snake_agents::{AgentHandle, AgentPort, Scorer};
use snake_core::{
    Cell, CellFlags, CellKind, EntityId, Error, IdAllocator, MoveIntent, MoveOutcome,
    OutcomeFlags, PortConfig, Position, Result, SimConfig, SnakeProfile,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, trace, warn};

/// Receives the grid after every completed tick.
pub trait SimulationObserver: Send {
    fn on_step(&mut self, grid: &Grid, touched: &[Position]);
}

pub type ObserverHandle = Arc<Mutex<dyn SimulationObserver>>;

/// Result of one completed tick
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub tick: u64,
    /// Every cell changed this tick, sorted
    pub touched: Vec<Position>,
    pub outcomes: Vec<MoveOutcome>,
    pub deaths: Vec<EntityId>,
}

/// Population snapshot for periodic reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct PopulationSummary {
    pub tick: u64,
    pub live_snakes: usize,
    pub registered_agents: usize,
    pub total_energy: f64,
    pub average_length: f64,
    pub longest: usize,
    pub food_cells: usize,
    pub total_spawns: u64,
    pub total_deaths: u64,
    pub top_score: f64,
}

pub struct Simulation {
    config: SimConfig,
    grid: Grid,
    index: SquareTree,
    snakes: BTreeMap<EntityId, SnakeRecord>,
    ports: Vec<AgentPort>,
    observers: Vec<ObserverHandle>,
    ids: IdAllocator,
    rng: ChaCha8Rng,
    tick: u64,
    /// Set when a tick aborted on an invariant violation
    poisoned: Option<String>,
    total_spawns: u64,
    total_deaths: u64,
}

impl Simulation {
    /// Generate a field from `config.world` and start an empty simulation on it.
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;

        let field = FieldGenerator::new(
            config.generator.clone(),
            config.world.width,
            config.world.height,
            config.world.field_seed,
        )
        .generate()?;

        Self::from_grid(config, field.grid)
    }

    /// Start a simulation on a prepared grid of walls and food.
    pub fn from_grid(mut config: SimConfig, grid: Grid) -> Result<Self> {
        if grid.iter().any(|(_, cell)| cell.kind == CellKind::Snake) {
            return Err(Error::Configuration(
                "a prepared grid may only hold walls and food".to_string(),
            ));
        }

        config.world.width = grid.width;
        config.world.height = grid.height;
        config.validate()?;

        let index = build_index(&grid);
        let default_port = AgentPort::new(config.port_config()).with_scorer(Scorer::new());
        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        info!(
            event = "simulation_created",
            width = grid.width,
            height = grid.height,
            walls = grid.count(CellKind::Wall),
            seed = config.seed,
            "Simulation created"
        );

        Ok(Self {
            config,
            grid,
            index,
            snakes: BTreeMap::new(),
            ports: vec![default_port],
            observers: Vec::new(),
            ids: IdAllocator::new(),
            rng,
            tick: 0,
            poisoned: None,
            total_spawns: 0,
            total_deaths: 0,
        })
    }

    /// Add an agent port. Returns its index for [`Simulation::add_agent_to`].
    pub fn add_port(&mut self, config: PortConfig) -> usize {
        self.ports
            .push(AgentPort::new(config).with_scorer(Scorer::new()));
        self.ports.len() - 1
    }

    /// Register an agent with the default port. It spawns on the next tick.
    pub fn add_agent(&mut self, agent: AgentHandle) -> EntityId {
        if let Some(id) = self.registered_id(&agent) {
            return id;
        }
        self.ports[0].add_agent(agent, &mut self.ids)
    }

    pub fn add_agent_to(&mut self, port: usize, agent: AgentHandle) -> Result<EntityId> {
        if let Some(id) = self.registered_id(&agent) {
            return Ok(id);
        }
        let port = self
            .ports
            .get_mut(port)
            .ok_or_else(|| Error::NotFound(format!("agent port {port}")))?;
        Ok(port.add_agent(agent, &mut self.ids))
    }

    /// Register an agent and place its body (head first) immediately.
    pub fn add_agent_at(&mut self, agent: AgentHandle, body: &[Position]) -> Result<EntityId> {
        validate_body(&self.grid, body)?;

        let id = match self.registered_id(&agent) {
            Some(id) if self.snakes.contains_key(&id) => {
                return Err(Error::InvalidState(format!("{id} is already on the grid")));
            }
            Some(id) => id,
            None => self.ports[0].add_agent(agent.clone(), &mut self.ids),
        };
        let profile = agent.lock().profile();

        lay_body(&mut self.grid, id, body, self.tick + 1);
        let head = body[0];
        let facing = self.grid.get(head).map(|cell| cell.facing).unwrap_or_default();

        if body.len() < profile.max_length {
            if let Some(cell) = self.grid.get_mut(head) {
                cell.flags.insert(CellFlags::PENDING_SHORTEN);
            }
        }
        for pos in body {
            self.index.insert(*pos);
        }

        let mut record = SnakeRecord::spawned(id, head, profile, self.tick);
        record.length = body.len();
        self.snakes.insert(id, record);
        self.total_spawns += 1;

        if let Some(port) = self.ports.iter_mut().find(|port| port.contains_id(id)) {
            port.place(id, head, facing);
        }

        debug!(
            event = "snake_placed",
            entity_id = %id,
            x = head.x,
            y = head.y,
            length = body.len(),
            "Snake placed"
        );
        Ok(id)
    }

    /// Remove an agent and clear its body. `false` when the id is unknown.
    pub fn remove_agent(&mut self, id: EntityId) -> Result<bool> {
        let unregistered = self
            .ports
            .iter_mut()
            .find_map(|port| port.remove_agent(id))
            .is_some();

        let Some(record) = self.snakes.get(&id) else {
            return Ok(unregistered);
        };

        let head = self
            .grid
            .index_of(record.head)
            .ok_or_else(|| Error::invariant(format!("head of {id} is off the grid")))?;
        for index in body_chain(&self.grid, id, head)? {
            if let Some(cell) = self.grid.cell_mut(index) {
                *cell = Cell::empty();
            }
            self.index.remove(self.grid.position_of(index));
        }
        self.snakes.remove(&id);

        debug!(event = "snake_removed", entity_id = %id, tick = self.tick, "Snake removed");
        Ok(true)
    }

    /// Attach an observer. Attaching the same handle twice is a no-op.
    pub fn attach_observer(&mut self, observer: ObserverHandle) -> bool {
        if self.observers.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    pub fn remove_observer(&mut self, observer: &ObserverHandle) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| !same_observer(o, observer));
        self.observers.len() != before
    }

    /// Advance the simulation by one tick.
    ///
    /// An invariant violation aborts the tick before anything is delivered
    /// and halts the simulation; every later call returns `InvalidState`.
    #[instrument(skip(self), fields(tick = self.tick + 1))]
    pub fn step(&mut self) -> Result<StepReport> {
        if let Some(reason) = &self.poisoned {
            return Err(Error::InvalidState(format!(
                "simulation halted after an invariant violation: {reason}"
            )));
        }

        match self.run_tick() {
            Ok(report) => Ok(report),
            Err(err) => {
                if err.is_fatal() {
                    error!(
                        event = "tick_aborted",
                        tick = self.tick,
                        error = %err,
                        "Tick aborted, simulation halted"
                    );
                    self.poisoned = Some(err.to_string());
                }
                Err(err)
            }
        }
    }

    fn run_tick(&mut self) -> Result<StepReport> {
        self.tick += 1;
        let tick = self.tick;

        let intents = self.collect_intents()?;

        let mut state = TickState::new(tick);
        let spawned = self.spawn_pending(&intents, &mut state);

        let mut resolver = Resolver::new(&mut self.grid, &mut self.snakes, &self.config.food, state);
        for id in spawned {
            resolver.mark_resolved(id);
        }
        resolver.resolve_all(&intents)?;
        let mut state = resolver.into_state();

        for pos in food::scatter(&mut self.grid, &self.config.food, tick, &mut self.rng) {
            state.touch(pos);
        }

        self.sync_index(&state);
        self.check_heads()?;

        let outcomes = self.deliver(&state);
        let touched: Vec<Position> = state.touched.iter().copied().collect();
        for observer in &self.observers {
            observer.lock().on_step(&self.grid, &touched);
        }

        let deaths: Vec<EntityId> = state.fallen.keys().copied().collect();
        self.total_deaths += deaths.len() as u64;

        trace!(
            event = "tick_complete",
            tick,
            touched = touched.len(),
            deaths = deaths.len(),
            live = self.snakes.len(),
            "Tick complete"
        );

        Ok(StepReport {
            tick,
            touched,
            outcomes,
            deaths,
        })
    }

    /// Poll every port; duplicate ids across ports are an invariant violation.
    fn collect_intents(&self) -> Result<BTreeMap<EntityId, MoveIntent>> {
        let projector = FieldProjector::new(&self.grid, &self.index, &self.snakes);
        let mut intents = BTreeMap::new();

        for port in &self.ports {
            for intent in port.collect_moves(&projector) {
                let id = intent.id;
                if intents.insert(id, intent).is_some() {
                    return Err(Error::invariant(format!("entity id {id} collected twice")));
                }
            }
        }
        Ok(intents)
    }

    /// Spawn every polled entity that has no body yet. An entity without room
    /// stays unplaced and is retried on the next tick.
    fn spawn_pending(
        &mut self,
        intents: &BTreeMap<EntityId, MoveIntent>,
        state: &mut TickState,
    ) -> Vec<EntityId> {
        let mut spawned = Vec::new();

        for &id in intents.keys() {
            if self.snakes.contains_key(&id) {
                continue;
            }
            let Some(profile) = self.port_profile(id) else {
                continue;
            };

            match self.spawn(id, profile, state) {
                Ok(()) => spawned.push(id),
                Err(err) => warn!(
                    event = "spawn_deferred",
                    entity_id = %id,
                    tick = self.tick,
                    error = %err,
                    "No room to spawn, retrying next tick"
                ),
            }
        }
        spawned
    }

    fn spawn(&mut self, id: EntityId, profile: SnakeProfile, state: &mut TickState) -> Result<()> {
        let length = profile.max_length.max(1);
        let site = find_site(&self.grid, &self.index, length, &self.config.spawn, &mut self.rng)?;
        let body = lay_spiral(&mut self.grid, site, id, length, self.tick, &mut self.rng);

        let head = *body
            .first()
            .ok_or_else(|| Error::invariant(format!("spawned body of {id} is empty")))?;
        for pos in &body {
            self.index.insert(*pos);
            state.touch(*pos);
        }

        let mut record = SnakeRecord::spawned(id, head, profile, self.tick);
        record.length = body.len();
        self.snakes.insert(id, record);
        self.total_spawns += 1;

        debug!(
            event = "snake_spawned",
            entity_id = %id,
            tick = self.tick,
            x = head.x,
            y = head.y,
            length = body.len(),
            "Snake spawned"
        );
        Ok(())
    }

    fn sync_index(&mut self, state: &TickState) {
        for &pos in &state.touched {
            if self.grid.get(pos).is_some_and(|cell| !cell.is_empty()) {
                self.index.insert(pos);
            } else {
                self.index.remove(pos);
            }
        }
    }

    /// Cheap per-tick check that every record still points at its head.
    fn check_heads(&self) -> Result<()> {
        for record in self.snakes.values() {
            let valid = self
                .grid
                .get(record.head)
                .is_some_and(|cell| cell.is_head() && cell.owner == Some(record.id));
            if !valid {
                return Err(Error::invariant(format!(
                    "record of {} points at {}, which is not its head",
                    record.id, record.head
                )));
            }
        }
        Ok(())
    }

    fn deliver(&mut self, state: &TickState) -> Vec<MoveOutcome> {
        let mut delivered = Vec::new();

        for port in &mut self.ports {
            let outcomes: Vec<MoveOutcome> = port
                .ids()
                .filter_map(|id| outcome_for(id, &self.snakes, &self.grid, state))
                .collect();
            port.deliver_outcomes(&outcomes);
            delivered.extend(outcomes);
        }
        delivered
    }

    /// Check the body invariants over the whole grid: one head per live snake,
    /// chains that end within the record's length, and no orphaned segments.
    pub fn verify(&self) -> Result<()> {
        let mut heads: HashMap<EntityId, usize> = HashMap::new();
        let mut segments = 0usize;

        for (pos, cell) in self.grid.iter() {
            if cell.kind != CellKind::Snake {
                continue;
            }
            segments += 1;

            let owner = cell
                .owner
                .ok_or_else(|| Error::invariant(format!("snake cell {pos} has no owner")))?;
            if !self.snakes.contains_key(&owner) {
                return Err(Error::invariant(format!(
                    "snake cell {pos} belongs to {owner}, which has no record"
                )));
            }
            if cell.is_head() {
                *heads.entry(owner).or_default() += 1;
            }
        }

        let mut chained = 0usize;
        for record in self.snakes.values() {
            let count = heads.get(&record.id).copied().unwrap_or(0);
            if count != 1 {
                return Err(Error::invariant(format!(
                    "{} has {count} head cells",
                    record.id
                )));
            }

            let head = self
                .grid
                .index_of(record.head)
                .ok_or_else(|| Error::invariant(format!("head of {} is off the grid", record.id)))?;
            if !self.grid.cell(head).is_some_and(|cell| cell.is_head()) {
                return Err(Error::invariant(format!(
                    "record of {} does not point at its head",
                    record.id
                )));
            }

            let chain = body_chain(&self.grid, record.id, head)?;
            if chain.len() != record.length {
                return Err(Error::invariant(format!(
                    "{} has {} linked segments but length {}",
                    record.id,
                    chain.len(),
                    record.length
                )));
            }
            chained += chain.len();
        }

        if chained != segments {
            return Err(Error::invariant(format!(
                "{} snake cells are not linked to any head",
                segments - chained.min(segments)
            )));
        }
        Ok(())
    }

    pub fn summary(&self) -> PopulationSummary {
        let live = self.snakes.len();
        let total_length: usize = self.snakes.values().map(|s| s.length).sum();

        PopulationSummary {
            tick: self.tick,
            live_snakes: live,
            registered_agents: self.ports.iter().map(AgentPort::len).sum(),
            total_energy: self.snakes.values().map(|s| s.energy).sum(),
            average_length: if live > 0 {
                total_length as f64 / live as f64
            } else {
                0.0
            },
            longest: self.snakes.values().map(|s| s.length).max().unwrap_or(0),
            food_cells: self.grid.count(CellKind::Food),
            total_spawns: self.total_spawns,
            total_deaths: self.total_deaths,
            top_score: self
                .snakes
                .keys()
                .map(|id| self.score_of(*id))
                .fold(0.0, f64::max),
        }
    }

    /// Score kept by the port scorers; 0 for unknown or retired ids.
    pub fn score_of(&self, id: EntityId) -> f64 {
        self.ports
            .iter()
            .filter_map(AgentPort::scorer)
            .map(|scorer| scorer.score_of(id))
            .fold(0.0, f64::max)
    }

    pub fn snake(&self, id: EntityId) -> Option<&SnakeRecord> {
        self.snakes.get(&id)
    }

    pub fn live_snakes(&self) -> impl Iterator<Item = &SnakeRecord> + '_ {
        self.snakes.values()
    }

    /// Profile of a placed snake, or of a registered agent still waiting to spawn.
    pub fn profile_of(&self, id: EntityId) -> Option<SnakeProfile> {
        self.snakes
            .get(&id)
            .map(|snake| snake.profile.clone())
            .or_else(|| self.port_profile(id))
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn index(&self) -> &SquareTree {
        &self.index
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn ports(&self) -> &[AgentPort] {
        &self.ports
    }

    pub fn is_halted(&self) -> bool {
        self.poisoned.is_some()
    }

    fn registered_id(&self, agent: &AgentHandle) -> Option<EntityId> {
        self.ports.iter().find_map(|port| port.id_for(agent))
    }

    fn port_profile(&self, id: EntityId) -> Option<SnakeProfile> {
        self.ports.iter().find_map(|port| port.profile_of(id))
    }
}

/// Spatial index over every occupied cell plus the permanent border frame.
fn build_index(grid: &Grid) -> SquareTree {
    let mut index = SquareTree::new(-1, -1, grid.width + 2, grid.height + 2);
    for pos in grid.border() {
        index.insert(pos);
    }
    for pos in grid.occupied() {
        index.insert(pos);
    }
    index
}

fn outcome_for(
    id: EntityId,
    snakes: &BTreeMap<EntityId, SnakeRecord>,
    grid: &Grid,
    state: &TickState,
) -> Option<MoveOutcome> {
    let energy_gained = state.gained_by(id);
    let mut status = OutcomeFlags::NONE;
    if energy_gained > 0.0 {
        status.insert(OutcomeFlags::ATE_FOOD);
    }
    if state.bitten.contains(&id) {
        status.insert(OutcomeFlags::WAS_BITTEN);
    }
    if state.bit_self.contains(&id) {
        status.insert(OutcomeFlags::BIT_SELF);
    }

    if let Some(remains) = state.fallen.get(&id) {
        return Some(MoveOutcome {
            id,
            remaining_energy: remains.energy,
            head_position: remains.head,
            head_direction: remains.facing,
            energy_gained,
            status,
        });
    }

    // Unplaced agents get nothing until they spawn
    let record = snakes.get(&id)?;
    status.insert(OutcomeFlags::ALIVE);

    Some(MoveOutcome {
        id,
        remaining_energy: record.energy,
        head_position: record.head,
        head_direction: grid.get(record.head).map(|cell| cell.facing).unwrap_or_default(),
        energy_gained,
        status,
    })
}

fn same_observer(a: &ObserverHandle, b: &ObserverHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const u8, Arc::as_ptr(b) as *const u8)
}
