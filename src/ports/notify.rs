//! Notifications delivered to actors; fire-and-forget

use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::core::types::{ActorId, FactionId};
use crate::territory::session::CancelReason;

/// A structured message for one actor or a whole faction
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    CaptureStarted { flag: String, duration_secs: u64 },
    CaptureProgress { flag: String, percent: u8 },
    CaptureCancelled { flag: String, reason: CancelReason },
    FlagCaptured { flag: String, faction: String },
    FactionCapturedFlag { actor: ActorId, flag: String },
    WarDeclared { attacker: String, defender: String },
    PeaceMade { initiator: String, other: String },
    LordshipPassed { faction: String, new_lord: ActorId },
    FactionDisbanded { faction: String },
    Kicked { faction: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::CaptureStarted {
                flag,
                duration_secs,
            } => write!(
                f,
                "Capturing {}. Hold your ground for {} seconds.",
                flag, duration_secs
            ),
            Notice::CaptureProgress { flag, percent } => {
                write!(f, "Capturing {}... {}%", flag, percent)
            }
            Notice::CaptureCancelled { flag, reason } => {
                write!(f, "Capture of {} cancelled: {}", flag, reason)
            }
            Notice::FlagCaptured { flag, faction } => {
                write!(f, "{} now belongs to {}!", flag, faction)
            }
            Notice::FactionCapturedFlag { actor, flag } => {
                write!(f, "{} captured {} for your faction", actor, flag)
            }
            Notice::WarDeclared { attacker, defender } => {
                write!(f, "{} has declared war on {}!", attacker, defender)
            }
            Notice::PeaceMade { initiator, other } => {
                write!(f, "{} has made peace with {}", initiator, other)
            }
            Notice::LordshipPassed { faction, new_lord } => {
                write!(f, "{} is now lord of {}", new_lord, faction)
            }
            Notice::FactionDisbanded { faction } => write!(f, "{} has been disbanded", faction),
            Notice::Kicked { faction } => write!(f, "You have been removed from {}", faction),
        }
    }
}

/// Delivery of notices; no acknowledgment is expected
pub trait Notifier: Send + Sync {
    fn notify(&self, actor: ActorId, notice: &Notice);

    /// Deliver to every listed member of `faction`
    fn broadcast(&self, _faction: FactionId, members: &[ActorId], notice: &Notice) {
        for member in members {
            self.notify(*member, notice);
        }
    }
}

/// Writes notices to the log; used when no host channel is wired
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, actor: ActorId, notice: &Notice) {
        tracing::info!(target: "territory_control::notice", %actor, "{}", notice);
    }
}

/// Keeps every delivered notice in order
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<(ActorId, Notice)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<(ActorId, Notice)> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn for_actor(&self, actor: ActorId) -> Vec<Notice> {
        self.delivered()
            .into_iter()
            .filter(|(a, _)| *a == actor)
            .map(|(_, n)| n)
            .collect()
    }

    pub fn clear(&self) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, actor: ActorId, notice: &Notice) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((actor, notice.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_each_member() {
        let notifier = RecordingNotifier::new();
        let a = ActorId::new();
        let b = ActorId::new();
        let notice = Notice::FactionDisbanded {
            faction: "North".into(),
        };
        notifier.broadcast(FactionId(1), &[a, b], &notice);

        assert_eq!(notifier.for_actor(a), vec![notice.clone()]);
        assert_eq!(notifier.for_actor(b), vec![notice]);
        notifier.clear();
        assert!(notifier.delivered().is_empty());
    }

    #[test]
    fn test_notice_text() {
        let notice = Notice::CaptureProgress {
            flag: "Oakford".into(),
            percent: 40,
        };
        assert_eq!(notice.to_string(), "Capturing Oakford... 40%");
    }
}
