//! Flags - fixed world locations that a faction can own

use serde::{Deserialize, Serialize};

use crate::core::types::{ActorId, FactionId, FlagId, Timestamp, WorldPos};

/// A capturable location.
///
/// Ownership changes only through a completed capture; the audit fields
/// record who did it and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub id: FlagId,
    pub name: String,
    pub position: WorldPos,
    /// World units; inclusive
    pub capture_radius: f64,
    pub capture_duration_secs: u64,
    /// `None` is neutral
    #[serde(default)]
    pub owner: Option<FactionId>,
    #[serde(default)]
    pub last_captured_at: Option<Timestamp>,
    #[serde(default)]
    pub last_captured_by: Option<ActorId>,
    pub created_at: Timestamp,
}

impl Flag {
    pub fn new(
        id: FlagId,
        name: String,
        position: WorldPos,
        capture_radius: f64,
        capture_duration_secs: u64,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            name,
            position,
            capture_radius,
            capture_duration_secs,
            owner: None,
            last_captured_at: None,
            last_captured_by: None,
            created_at: now,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.owner.is_none()
    }

    pub fn is_owned_by(&self, faction: FactionId) -> bool {
        self.owner == Some(faction)
    }

    /// Same world and within `capture_radius`
    pub fn in_range(&self, pos: &WorldPos) -> bool {
        self.position
            .distance(pos)
            .is_some_and(|d| d <= self.capture_radius)
    }

    pub fn capture_duration_ms(&self) -> u64 {
        self.capture_duration_secs.saturating_mul(1000)
    }

    /// Transfer ownership and stamp the audit trail
    pub fn capture(&mut self, faction: FactionId, actor: ActorId, now: Timestamp) {
        self.owner = Some(faction);
        self.last_captured_at = Some(now);
        self.last_captured_by = Some(actor);
    }
}

/// A flag together with its owner's display name, for listings
#[derive(Debug, Clone, PartialEq)]
pub struct FlagInfo {
    pub flag: Flag,
    /// `None` for neutral flags and for owners that no longer exist
    pub owner_name: Option<String>,
}
