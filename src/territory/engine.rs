//! Capture engine - flag ownership and per-actor capture sessions
//!
//! The engine owns the flag table and the session table. Faction data is
//! only ever read through [`FactionRegistry`], once per evaluation step.
//!
//! Lock order: `captures` before `flags`, and both before any registry
//! read. Notices are collected while locks are held and delivered after
//! they are released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashMap;

use crate::core::clock::Clock;
use crate::core::config::LiveConfig;
use crate::core::error::{Result, Subject, TerritoryError};
use crate::core::types::{ActorId, FactionId, FlagId, Timestamp, WorldPos};
use crate::faction::{CooldownTable, FactionRegistry};
use crate::ports::notify::{Notice, Notifier};
use crate::ports::sense::ActorSense;
use crate::territory::flag::{Flag, FlagInfo};
use crate::territory::session::{CancelReason, CaptureRecord, CaptureSession, TickReport};

struct FlagTable {
    by_id: AHashMap<FlagId, Flag>,
    next_id: u32,
}

impl FlagTable {
    fn by_name(&self, name: &str) -> Option<&Flag> {
        let wanted = name.to_lowercase();
        self.by_id.values().find(|f| f.name.to_lowercase() == wanted)
    }
}

#[derive(Default)]
struct CaptureTable {
    sessions: AHashMap<ActorId, CaptureSession>,
    /// Post-capture throttle, keyed by the capturing actor
    cooldowns: CooldownTable<ActorId>,
}

enum Delivery {
    Actor(ActorId, Notice),
    Faction(FactionId, Vec<ActorId>, Notice),
}

/// What one tick decided for one session
enum Step {
    Progress(u8),
    Cancel(CancelReason),
    Complete(FactionId),
}

pub struct CaptureEngine {
    config: Arc<LiveConfig>,
    clock: Arc<dyn Clock>,
    registry: Arc<FactionRegistry>,
    sense: Arc<dyn ActorSense>,
    notifier: Arc<dyn Notifier>,
    flags: RwLock<FlagTable>,
    captures: Mutex<CaptureTable>,
}

impl CaptureEngine {
    pub fn new(
        config: Arc<LiveConfig>,
        clock: Arc<dyn Clock>,
        registry: Arc<FactionRegistry>,
        sense: Arc<dyn ActorSense>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            clock,
            registry,
            sense,
            notifier,
            flags: RwLock::new(FlagTable {
                by_id: AHashMap::new(),
                next_id: 1,
            }),
            captures: Mutex::new(CaptureTable::default()),
        }
    }

    /// Load persisted flags, replacing any with the same id
    pub fn restore(&self, flags: impl IntoIterator<Item = Flag>) {
        let mut table = self.write_flags();
        for flag in flags {
            let next = table.next_id.max(flag.id.0.saturating_add(1));
            table.next_id = next;
            table.by_id.insert(flag.id, flag);
        }
        tracing::info!("Restored {} flags", table.by_id.len());
    }

    fn read_flags(&self) -> RwLockReadGuard<'_, FlagTable> {
        self.flags.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_flags(&self) -> RwLockWriteGuard<'_, FlagTable> {
        self.flags.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_captures(&self) -> MutexGuard<'_, CaptureTable> {
        self.captures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match delivery {
                Delivery::Actor(actor, notice) => self.notifier.notify(actor, &notice),
                Delivery::Faction(faction, members, notice) => {
                    self.notifier.broadcast(faction, &members, &notice)
                }
            }
        }
    }

    // === FLAG ADMINISTRATION ===

    /// Create a flag with the configured default radius and duration
    pub fn create_flag(&self, name: &str, position: WorldPos) -> Result<Flag> {
        let settings = self.config.get().flags;
        self.create_flag_with(
            name,
            position,
            settings.default_capture_radius,
            settings.default_capture_duration_secs,
        )
    }

    pub fn create_flag_with(
        &self,
        name: &str,
        position: WorldPos,
        capture_radius: f64,
        capture_duration_secs: u64,
    ) -> Result<Flag> {
        let settings = self.config.get().flags;
        let len = name.chars().count();
        if len < settings.name_min_len || len > settings.name_max_len {
            return Err(TerritoryError::InvalidName {
                name: name.to_string(),
                reason: format!(
                    "must be {} to {} characters",
                    settings.name_min_len, settings.name_max_len
                ),
            });
        }
        if !(capture_radius.is_finite() && capture_radius > 0.0) {
            return Err(TerritoryError::InvalidTarget(
                "capture radius must be positive".into(),
            ));
        }
        if capture_duration_secs == 0 {
            return Err(TerritoryError::InvalidTarget(
                "capture duration must be positive".into(),
            ));
        }

        let now = self.clock.now();
        let mut table = self.write_flags();
        if table.by_name(name).is_some() {
            return Err(TerritoryError::NameTaken(name.to_string()));
        }
        let id = FlagId(table.next_id);
        table.next_id += 1;
        let flag = Flag::new(
            id,
            name.to_string(),
            position,
            capture_radius,
            capture_duration_secs,
            now,
        );
        table.by_id.insert(id, flag.clone());

        tracing::info!(
            "Created flag {} ({}) at {} {:.1},{:.1},{:.1}",
            name,
            id,
            flag.position.world,
            flag.position.x,
            flag.position.y,
            flag.position.z
        );
        Ok(flag)
    }

    /// Delete a flag, cancelling every session that targets it
    pub fn remove_flag(&self, id: FlagId) -> Result<Flag> {
        let (flag, cancelled) = {
            let mut captures = self.lock_captures();
            let flag = self
                .write_flags()
                .by_id
                .remove(&id)
                .ok_or(TerritoryError::NotFound(Subject::Flag(id)))?;
            let mut cancelled: Vec<ActorId> = captures
                .sessions
                .values()
                .filter(|s| s.flag == id)
                .map(|s| s.actor)
                .collect();
            cancelled.sort();
            for actor in &cancelled {
                captures.sessions.remove(actor);
            }
            (flag, cancelled)
        };

        for actor in cancelled {
            self.notifier.notify(
                actor,
                &Notice::CaptureCancelled {
                    flag: flag.name.clone(),
                    reason: CancelReason::FlagRemoved,
                },
            );
        }
        tracing::info!("Removed flag {} ({})", flag.name, id);
        Ok(flag)
    }

    // === CAPTURE LIFECYCLE ===

    /// Open a capture session for `actor` on `flag_id`.
    ///
    /// Checks run in a fixed order and the first failure wins; nothing is
    /// changed on failure.
    pub fn start_capture(&self, actor: ActorId, flag_id: FlagId) -> Result<CaptureSession> {
        let settings = self.config.get().flags;
        let position = self.sense.position(actor);
        let holds_item = self.sense.holds_item(actor, &settings.capture_item);
        let now = self.clock.now();

        let (session, notice) = {
            let mut captures = self.lock_captures();
            let flags = self.read_flags();
            let flag = flags
                .by_id
                .get(&flag_id)
                .ok_or(TerritoryError::NotFound(Subject::Flag(flag_id)))?;

            if captures.sessions.contains_key(&actor) {
                return Err(TerritoryError::AlreadyCapturing(actor));
            }
            if let Some(remaining_ms) =
                captures
                    .cooldowns
                    .remaining(actor, now, settings.capture_cooldown_ms())
            {
                return Err(TerritoryError::CooldownActive { remaining_ms });
            }
            if !holds_item {
                return Err(TerritoryError::MissingItem(actor, settings.capture_item));
            }
            if !position.as_ref().is_some_and(|p| flag.in_range(p)) {
                return Err(TerritoryError::OutOfRange {
                    actor,
                    flag: flag_id,
                });
            }

            let standing = self.registry.standing(actor, flag.owner);
            let faction = standing.faction.ok_or(TerritoryError::NoFaction(actor))?;
            if flag.is_owned_by(faction) {
                return Err(TerritoryError::AlreadyOwned {
                    flag: flag_id,
                    faction,
                });
            }
            // An owner that no longer exists leaves the flag effectively neutral
            if let Some(owner) = flag.owner {
                if standing.owner_exists && !standing.at_war_with_owner {
                    return Err(TerritoryError::NotAtWar(faction, owner));
                }
            }

            let session = CaptureSession::new(actor, flag_id, now);
            captures.sessions.insert(actor, session);
            tracing::info!("Actor {} started capturing {} for {}", actor, flag.name, faction);
            (
                session,
                Notice::CaptureStarted {
                    flag: flag.name.clone(),
                    duration_secs: flag.capture_duration_secs,
                },
            )
        };

        self.notifier.notify(actor, &notice);
        Ok(session)
    }

    /// Drop the actor's session if there is one.
    ///
    /// Returns `None` when there was nothing to cancel, including when the
    /// session already completed. Disconnects are cancelled silently.
    pub fn cancel_capture(&self, actor: ActorId, reason: CancelReason) -> Option<CaptureSession> {
        let session = self.lock_captures().sessions.remove(&actor)?;
        let flag_name = self
            .read_flags()
            .by_id
            .get(&session.flag)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| session.flag.to_string());

        tracing::info!("Capture of {} by {} cancelled: {}", flag_name, actor, reason);
        if reason != CancelReason::Disconnected {
            self.notifier.notify(
                actor,
                &Notice::CaptureCancelled {
                    flag: flag_name,
                    reason,
                },
            );
        }
        Some(session)
    }

    /// Cancel each listed actor's session; returns how many existed
    pub fn cancel_for_actors(&self, actors: &[ActorId], reason: CancelReason) -> usize {
        actors
            .iter()
            .filter(|actor| self.cancel_capture(**actor, reason).is_some())
            .count()
    }

    // === TICK ===

    fn evaluate(&self, session: &CaptureSession, flag: &Flag, now: Timestamp) -> Step {
        if !self.sense.is_online(session.actor) {
            return Step::Cancel(CancelReason::Disconnected);
        }
        match self.sense.position(session.actor) {
            Some(pos) if flag.in_range(&pos) => {}
            _ => return Step::Cancel(CancelReason::OutOfRange),
        }

        let standing = self.registry.standing(session.actor, flag.owner);
        if standing.faction.is_some_and(|f| flag.is_owned_by(f)) {
            return Step::Cancel(CancelReason::AlreadyOwned);
        }

        let duration_ms = flag.capture_duration_ms();
        if !session.is_complete(now, duration_ms) {
            return Step::Progress(session.percent(now, duration_ms));
        }

        let Some(faction) = standing.faction else {
            return Step::Cancel(CancelReason::NoFaction);
        };
        if flag.owner.is_some() && standing.owner_exists && !standing.at_war_with_owner {
            return Step::Cancel(CancelReason::NotAtWar);
        }
        Step::Complete(faction)
    }

    /// Evaluate every live session once.
    ///
    /// The session table stays locked for the whole pass, so a concurrent
    /// cancel either lands before a session is evaluated or finds it gone.
    pub fn tick(&self) -> TickReport {
        let cooldown_ms = self.config.get().flags.capture_cooldown_ms();
        let now = self.clock.now();
        let mut report = TickReport::default();
        let mut deliveries = Vec::new();

        {
            let mut captures = self.lock_captures();
            let mut flags = self.write_flags();
            let CaptureTable {
                sessions,
                cooldowns,
            } = &mut *captures;

            let mut actors: Vec<ActorId> = sessions.keys().copied().collect();
            actors.sort();

            for actor in actors {
                let Some(session) = sessions.get(&actor).copied() else {
                    continue;
                };
                let Some(flag) = flags.by_id.get_mut(&session.flag) else {
                    sessions.remove(&actor);
                    report.cancelled.push((actor, CancelReason::FlagRemoved));
                    continue;
                };

                match self.evaluate(&session, flag, now) {
                    Step::Progress(percent) => {
                        report.progressed += 1;
                        deliveries.push(Delivery::Actor(
                            actor,
                            Notice::CaptureProgress {
                                flag: flag.name.clone(),
                                percent,
                            },
                        ));
                    }
                    Step::Cancel(reason) => {
                        sessions.remove(&actor);
                        tracing::info!("Capture of {} by {} cancelled: {}", flag.name, actor, reason);
                        if reason != CancelReason::Disconnected {
                            deliveries.push(Delivery::Actor(
                                actor,
                                Notice::CaptureCancelled {
                                    flag: flag.name.clone(),
                                    reason,
                                },
                            ));
                        }
                        report.cancelled.push((actor, reason));
                    }
                    Step::Complete(faction) => {
                        sessions.remove(&actor);
                        let previous_owner = flag.owner;
                        flag.capture(faction, actor, now);
                        cooldowns.start(actor, now);

                        let faction_name = self
                            .registry
                            .get(faction)
                            .map(|f| f.display_name)
                            .unwrap_or_else(|| faction.to_string());
                        let others: Vec<ActorId> = self
                            .registry
                            .members_of(faction)
                            .into_iter()
                            .filter(|m| *m != actor)
                            .collect();

                        tracing::info!(
                            "Flag {} captured by {} for {} (previously {:?})",
                            flag.name,
                            actor,
                            faction_name,
                            previous_owner
                        );
                        deliveries.push(Delivery::Actor(
                            actor,
                            Notice::FlagCaptured {
                                flag: flag.name.clone(),
                                faction: faction_name,
                            },
                        ));
                        deliveries.push(Delivery::Faction(
                            faction,
                            others,
                            Notice::FactionCapturedFlag {
                                actor,
                                flag: flag.name.clone(),
                            },
                        ));
                        report.completed.push(CaptureRecord {
                            actor,
                            flag: flag.id,
                            faction,
                            previous_owner,
                            at: now,
                        });
                    }
                }
            }
            // Cooldown windows are short; drop stale entries as we go
            cooldowns.prune(now, cooldown_ms);
        }

        self.dispatch(deliveries);
        report
    }

    /// Drop elapsed post-capture cooldowns. Returns how many were removed.
    pub fn prune_cooldowns(&self) -> usize {
        let window = self.config.get().flags.capture_cooldown_ms();
        let now = self.clock.now();
        self.lock_captures().cooldowns.prune(now, window)
    }

    // === QUERIES ===

    pub fn flag(&self, id: FlagId) -> Option<Flag> {
        self.read_flags().by_id.get(&id).cloned()
    }

    /// Case-insensitive exact match
    pub fn flag_by_name(&self, name: &str) -> Option<Flag> {
        self.read_flags().by_name(name).cloned()
    }

    /// Nearest flag whose capture radius contains `pos`
    pub fn flag_at(&self, pos: &WorldPos) -> Option<Flag> {
        self.read_flags()
            .by_id
            .values()
            .filter_map(|f| {
                f.position
                    .distance(pos)
                    .filter(|d| *d <= f.capture_radius)
                    .map(|d| (d, f))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.id.cmp(&b.1.id)))
            .map(|(_, f)| f.clone())
    }

    pub fn flags_owned_by(&self, faction: FactionId) -> Vec<Flag> {
        let mut owned: Vec<Flag> = self
            .read_flags()
            .by_id
            .values()
            .filter(|f| f.is_owned_by(faction))
            .cloned()
            .collect();
        owned.sort_by_key(|f| f.id);
        owned
    }

    pub fn all_flags(&self) -> Vec<Flag> {
        let mut all: Vec<Flag> = self.read_flags().by_id.values().cloned().collect();
        all.sort_by_key(|f| f.id);
        all
    }

    /// The flag plus its owner's display name
    pub fn flag_info(&self, id: FlagId) -> Option<FlagInfo> {
        let flag = self.flag(id)?;
        let owner_name = flag
            .owner
            .and_then(|owner| self.registry.get(owner))
            .map(|f| f.display_name);
        Some(FlagInfo { flag, owner_name })
    }

    pub fn is_capturing(&self, actor: ActorId) -> bool {
        self.lock_captures().sessions.contains_key(&actor)
    }

    pub fn session_of(&self, actor: ActorId) -> Option<CaptureSession> {
        self.lock_captures().sessions.get(&actor).copied()
    }

    pub fn session_count(&self) -> usize {
        self.lock_captures().sessions.len()
    }

    /// Milliseconds until the actor may start another capture
    pub fn capture_cooldown_remaining(&self, actor: ActorId) -> Option<u64> {
        let window = self.config.get().flags.capture_cooldown_ms();
        let now = self.clock.now();
        self.lock_captures().cooldowns.remaining(actor, now, window)
    }
}
