//! Actor sensing - what the host world tells us about a participant

use std::sync::{PoisonError, RwLock};

use ahash::{AHashMap, AHashSet};

use crate::core::types::{ActorId, WorldPos};

/// Read-only view of actors supplied by the host world.
///
/// Implementations must be thread-safe; they are queried from both the
/// request path and the capture tick.
pub trait ActorSense: Send + Sync {
    /// Current position, or `None` if the actor is unknown
    fn position(&self, actor: ActorId) -> Option<WorldPos>;

    fn is_online(&self, actor: ActorId) -> bool;

    /// Whether the actor currently holds an item of the given kind
    fn holds_item(&self, actor: ActorId, item: &str) -> bool;
}

#[derive(Debug, Clone)]
struct ActorState {
    position: WorldPos,
    online: bool,
    items: AHashSet<String>,
}

/// In-memory actor table for embedding hosts and tests
#[derive(Debug, Default)]
pub struct Roster {
    actors: RwLock<AHashMap<ActorId, ActorState>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or reconnect) an actor at a position
    pub fn spawn(&self, actor: ActorId, position: WorldPos) {
        let mut actors = self.actors.write().unwrap_or_else(PoisonError::into_inner);
        let state = actors.entry(actor).or_insert_with(|| ActorState {
            position: position.clone(),
            online: true,
            items: AHashSet::new(),
        });
        state.position = position;
        state.online = true;
    }

    pub fn move_to(&self, actor: ActorId, position: WorldPos) {
        if let Some(state) = self
            .actors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&actor)
        {
            state.position = position;
        }
    }

    pub fn set_online(&self, actor: ActorId, online: bool) {
        if let Some(state) = self
            .actors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&actor)
        {
            state.online = online;
        }
    }

    pub fn give_item(&self, actor: ActorId, item: &str) {
        if let Some(state) = self
            .actors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&actor)
        {
            state.items.insert(item.to_string());
        }
    }

    pub fn take_item(&self, actor: ActorId, item: &str) {
        if let Some(state) = self
            .actors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&actor)
        {
            state.items.remove(item);
        }
    }

    pub fn online_actors(&self) -> Vec<ActorId> {
        let mut online: Vec<ActorId> = self
            .actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, s)| s.online)
            .map(|(id, _)| *id)
            .collect();
        online.sort();
        online
    }
}

impl ActorSense for Roster {
    fn position(&self, actor: ActorId) -> Option<WorldPos> {
        self.actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&actor)
            .map(|s| s.position.clone())
    }

    fn is_online(&self, actor: ActorId) -> bool {
        self.actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&actor)
            .is_some_and(|s| s.online)
    }

    fn holds_item(&self, actor: ActorId, item: &str) -> bool {
        self.actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&actor)
            .is_some_and(|s| s.items.contains(item))
    }
}
