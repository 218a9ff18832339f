//! Capture sessions - ephemeral, one per actor, never persisted

use std::fmt;

use crate::core::types::{ActorId, FactionId, FlagId, Timestamp};

/// An in-progress attempt by one actor to take one flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSession {
    pub actor: ActorId,
    pub flag: FlagId,
    pub started_at: Timestamp,
}

impl CaptureSession {
    pub fn new(actor: ActorId, flag: FlagId, started_at: Timestamp) -> Self {
        Self {
            actor,
            flag,
            started_at,
        }
    }

    pub fn elapsed(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.started_at)
    }

    pub fn is_complete(&self, now: Timestamp, duration_ms: u64) -> bool {
        self.elapsed(now) >= duration_ms
    }

    /// Whole percent of the duration elapsed, capped at 100
    pub fn percent(&self, now: Timestamp, duration_ms: u64) -> u8 {
        if duration_ms == 0 {
            return 100;
        }
        let pct = self.elapsed(now).saturating_mul(100) / duration_ms;
        pct.min(100) as u8
    }
}

/// Why a session ended without a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    Requested,
    Disconnected,
    Died,
    OutOfRange,
    FactionDisbanded,
    LeftFaction,
    NoFaction,
    NotAtWar,
    AlreadyOwned,
    FlagRemoved,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CancelReason::Requested => "cancelled by request",
            CancelReason::Disconnected => "disconnected",
            CancelReason::Died => "you died",
            CancelReason::OutOfRange => "moved out of range",
            CancelReason::FactionDisbanded => "your faction was disbanded",
            CancelReason::LeftFaction => "you left your faction",
            CancelReason::NoFaction => "you no longer belong to a faction",
            CancelReason::NotAtWar => "your faction is no longer at war with the owner",
            CancelReason::AlreadyOwned => "your faction already owns this flag",
            CancelReason::FlagRemoved => "the flag was removed",
        };
        f.write_str(text)
    }
}

/// A completed ownership transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub actor: ActorId,
    pub flag: FlagId,
    pub faction: FactionId,
    pub previous_owner: Option<FactionId>,
    pub at: Timestamp,
}

/// Outcome of one tick over every live session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Sessions still running after this tick
    pub progressed: usize,
    pub completed: Vec<CaptureRecord>,
    pub cancelled: Vec<(ActorId, CancelReason)>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.progressed == 0 && self.completed.is_empty() && self.cancelled.is_empty()
    }
}
