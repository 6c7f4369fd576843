//! Agent port: id bookkeeping, parallel move collection and outcome delivery.

use crate::{same_agent, AgentHandle, PerceptionSource, Scorer, ViewRequest};
use parking_lot::Mutex;
use snake_core::{
    Direction, EntityId, IdAllocator, MoveIntent, MoveOutcome, PortConfig, Position, SnakeProfile,
};
use tracing::{debug, trace};

struct AgentSlot {
    id: EntityId,
    agent: AgentHandle,
    /// Head position and facing from the last delivered outcome; `None` until placed.
    head: Option<(Position, Direction)>,
}

/// Maps stable entity ids to agents and talks to them once per tick.
pub struct AgentPort {
    config: PortConfig,
    slots: Vec<AgentSlot>,
    scorer: Option<Scorer>,
}

impl AgentPort {
    pub fn new(config: PortConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            scorer: None,
        }
    }

    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn scorer(&self) -> Option<&Scorer> {
        self.scorer.as_ref()
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Register an agent. Adding the same handle again returns its existing id.
    pub fn add_agent(&mut self, agent: AgentHandle, ids: &mut IdAllocator) -> EntityId {
        if let Some(id) = self.id_for(&agent) {
            return id;
        }

        let id = ids.next_id();
        self.slots.push(AgentSlot {
            id,
            agent,
            head: None,
        });
        debug!(event = "agent_registered", entity_id = %id, "Agent registered");
        id
    }

    pub fn contains(&self, agent: &AgentHandle) -> bool {
        self.id_for(agent).is_some()
    }

    pub fn contains_id(&self, id: EntityId) -> bool {
        self.slot(id).is_some()
    }

    pub fn id_for(&self, agent: &AgentHandle) -> Option<EntityId> {
        self.slots
            .iter()
            .find(|slot| same_agent(&slot.agent, agent))
            .map(|slot| slot.id)
    }

    /// Unregister an agent and drop its score; unknown ids are ignored.
    pub fn remove_agent(&mut self, id: EntityId) -> Option<AgentHandle> {
        let index = self.slots.iter().position(|slot| slot.id == id)?;
        if let Some(scorer) = self.scorer.as_mut() {
            scorer.forget(id);
        }
        Some(self.slots.remove(index).agent)
    }

    pub fn profile_of(&self, id: EntityId) -> Option<SnakeProfile> {
        self.slot(id).map(|slot| slot.agent.lock().profile())
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots.iter().map(|slot| slot.id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record a head placed outside the normal tick flow.
    pub fn place(&mut self, id: EntityId, head: Position, facing: Direction) {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) {
            slot.head = Some((head, facing));
        }
    }

    /// Poll every registered agent for one move. Blocks until all workers finish.
    pub fn collect_moves(&self, source: &dyn PerceptionSource) -> Vec<MoveIntent> {
        let workers = self.worker_count();

        let mut intents = if workers <= 1 {
            self.slots
                .iter()
                .map(|slot| self.evaluate(slot, source))
                .collect::<Vec<_>>()
        } else {
            let next_slot = Mutex::new(0usize);
            let results = Mutex::new(Vec::with_capacity(self.slots.len()));

            std::thread::scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(|| loop {
                        let index = {
                            let mut next = next_slot.lock();
                            let index = *next;
                            *next += 1;
                            index
                        };

                        let Some(slot) = self.slots.get(index) else {
                            break;
                        };

                        let intent = self.evaluate(slot, source);
                        results.lock().push(intent);
                    });
                }
            });

            results.into_inner()
        };

        intents.sort_by_key(|intent| intent.id);
        trace!(agents = self.slots.len(), workers, "Collected moves");
        intents
    }

    /// Hand tick results back to their agents. Runs on the engine thread.
    pub fn deliver_outcomes(&mut self, outcomes: &[MoveOutcome]) {
        for outcome in outcomes {
            let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == outcome.id) else {
                continue;
            };

            slot.head = Some((outcome.head_position, outcome.head_direction));

            if let Some(scorer) = self.scorer.as_mut() {
                scorer.update(outcome.id, outcome.energy_gained);
            }

            slot.agent.lock().on_outcome(outcome);
        }

        let mut retired = 0usize;
        for outcome in outcomes.iter().filter(|outcome| !outcome.is_alive()) {
            if self.remove_agent(outcome.id).is_some() {
                retired += 1;
            }
        }
        if retired > 0 {
            debug!(event = "agents_retired", count = retired, "Retired dead agents");
        }
    }

    fn slot(&self, id: EntityId) -> Option<&AgentSlot> {
        self.slots.iter().find(|slot| slot.id == id)
    }

    fn worker_count(&self) -> usize {
        let configured = if self.config.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.config.workers
        };
        configured.min(self.slots.len()).max(1)
    }

    fn evaluate(&self, slot: &AgentSlot, source: &dyn PerceptionSource) -> MoveIntent {
        // Not on the grid yet: the engine spawns it on this tick.
        let Some((position, facing)) = slot.head else {
            return MoveIntent::idle(slot.id);
        };

        let mut agent = slot.agent.lock();
        let perception = if agent.needs_perception() {
            let profile = agent.profile();
            Some(source.view(&ViewRequest {
                observer: slot.id,
                position,
                facing,
                cull_radius: profile.cull_radius,
                half_view_angle: profile.half_view_angle,
                resolution: profile.resolution,
            }))
        } else {
            None
        };

        let direction = agent.decide(facing, perception.as_ref());
        MoveIntent::new(slot.id, direction, self.config.move_cost)
    }
}
