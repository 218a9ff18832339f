//! Core type definitions used throughout the codebase

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical time in milliseconds, as reported by a [`Clock`](crate::core::clock::Clock)
pub type Timestamp = u64;

/// Unique identifier for actors (connected participants)
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[display(fmt = "{}", _0)]
pub struct ActorId(pub Uuid);

impl ActorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for ActorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for factions. Never zero; "no faction" is `Option::None`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[display(fmt = "faction#{}", _0)]
pub struct FactionId(pub u32);

impl FactionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

/// Unique identifier for flags
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[display(fmt = "flag#{}", _0)]
pub struct FlagId(pub u32);

impl FlagId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

/// A point in a named world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldPos {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl WorldPos {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// Euclidean distance, or `None` when the points are in different worlds
    pub fn distance(&self, other: &Self) -> Option<f64> {
        if self.world != other.world {
            return None;
        }
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        Some((dx * dx + dy * dy + dz * dz).sqrt())
    }
}
