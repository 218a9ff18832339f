//! Territory service - lifecycle and cross-component wiring
//!
//! Built once at startup from the store, the service owns the registry, the
//! capture engine, the write-behind checkpoint and the scheduler. Every
//! mutating call goes through here so that capture sessions, broadcasts and
//! dirty marking follow faction changes.

pub mod checkpoint;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::clock::Clock;
use crate::core::config::LiveConfig;
use crate::core::error::{Result, SystemError};
use crate::core::types::{ActorId, FactionId, FlagId, WorldPos};
use crate::faction::{Departure, Disbandment, Faction, FactionRegistry, GrantableRole};
use crate::ports::notify::{Notice, Notifier};
use crate::ports::sense::ActorSense;
use crate::ports::store::Store;
use crate::scheduler::{SchedulerHandle, TickScheduler};
use crate::territory::{CancelReason, CaptureEngine, CaptureSession, Flag};

pub use checkpoint::{Checkpoint, FlushReport};

pub const CAPTURE_TICK_JOB: &str = "capture-tick";
pub const COOLDOWN_SWEEP_JOB: &str = "cooldown-sweep";
pub const CHECKPOINT_JOB: &str = "checkpoint";

pub struct TerritoryService {
    config: Arc<LiveConfig>,
    clock: Arc<dyn Clock>,
    registry: Arc<FactionRegistry>,
    engine: Arc<CaptureEngine>,
    checkpoint: Arc<Checkpoint>,
    notifier: Arc<dyn Notifier>,
    scheduler: TickScheduler,
    driver: Mutex<Option<SchedulerHandle>>,
}

impl TerritoryService {
    /// Load all state from `store` and register the periodic jobs.
    ///
    /// Job periods are taken from the configuration at this point; the jobs
    /// only run when driven by [`run_due`](Self::run_due) or
    /// [`spawn_scheduler`](Self::spawn_scheduler).
    pub fn start(
        store: Arc<dyn Store>,
        sense: Arc<dyn ActorSense>,
        notifier: Arc<dyn Notifier>,
        config: Arc<LiveConfig>,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, SystemError> {
        let factions = store.load_all_factions()?;
        let memberships: Vec<(ActorId, FactionId)> = store
            .load_all_players()?
            .into_iter()
            .filter_map(|p| p.faction.map(|f| (p.actor, f)))
            .collect();
        let flags = store.load_all_flags()?;

        let registry = Arc::new(FactionRegistry::restore(
            config.clone(),
            clock.clone(),
            factions,
            memberships,
        ));
        let engine = Arc::new(CaptureEngine::new(
            config.clone(),
            clock.clone(),
            registry.clone(),
            sense,
            notifier.clone(),
        ));
        engine.restore(flags);
        let checkpoint = Arc::new(Checkpoint::new(store, registry.clone(), engine.clone()));

        let schedule = config.get().schedule;
        let mut scheduler = TickScheduler::new(clock.clone());
        {
            let engine = engine.clone();
            let checkpoint = checkpoint.clone();
            scheduler.add(CAPTURE_TICK_JOB, schedule.capture_tick_ms, move |_| {
                let report = engine.tick();
                for record in &report.completed {
                    checkpoint.mark_flag(record.flag);
                }
            });
        }
        {
            let registry = registry.clone();
            let engine = engine.clone();
            scheduler.add(COOLDOWN_SWEEP_JOB, schedule.cooldown_sweep_ms, move |_| {
                let pruned = registry.process_cooldowns() + engine.prune_cooldowns();
                if pruned > 0 {
                    tracing::debug!("Cooldown sweep removed {} entries", pruned);
                }
            });
        }
        {
            let checkpoint = checkpoint.clone();
            scheduler.add(CHECKPOINT_JOB, schedule.checkpoint_ms, move |_| {
                checkpoint.flush();
            });
        }

        tracing::info!(
            "Territory service started: {} factions, {} flags",
            registry.all().len(),
            engine.all_flags().len()
        );

        Ok(Self {
            config,
            clock,
            registry,
            engine,
            checkpoint,
            notifier,
            scheduler,
            driver: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Arc<LiveConfig> {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<FactionRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<CaptureEngine> {
        &self.engine
    }

    pub fn checkpoint(&self) -> &Arc<Checkpoint> {
        &self.checkpoint
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    pub fn reload_config(&self, path: &Path) -> std::result::Result<(), SystemError> {
        self.config.reload(path)
    }

    // === SCHEDULING ===

    /// Run whichever jobs are due at the current logical time
    pub fn run_due(&self) -> Vec<String> {
        self.scheduler.run_due()
    }

    /// Hand the jobs to tokio. Must be called inside a runtime.
    pub fn spawn_scheduler(&self) {
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if driver.is_none() {
            *driver = Some(self.scheduler.spawn());
        }
    }

    /// Write all dirty records now
    pub fn flush(&self) -> FlushReport {
        self.checkpoint.flush()
    }

    /// Stop the scheduler drivers, if any, and write a final checkpoint
    pub async fn shutdown(&self) -> FlushReport {
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        let report = self.checkpoint.flush();
        tracing::info!(
            "Territory service stopped ({} records written, {} unwritten)",
            report.written,
            report.failed
        );
        report
    }

    // === FACTIONS ===

    pub fn create_faction(
        &self,
        name: &str,
        display_name: &str,
        founder: ActorId,
        paid: u64,
    ) -> Result<Faction> {
        let faction = self
            .registry
            .create_faction(name, display_name, founder, paid)?;
        self.checkpoint.mark_faction(faction.id);
        self.checkpoint.mark_player(founder);
        Ok(faction)
    }

    pub fn join_faction(&self, actor: ActorId, faction: FactionId) -> Result<()> {
        self.registry.join_faction(actor, faction)?;
        self.checkpoint.mark_player(actor);
        Ok(())
    }

    pub fn leave_faction(&self, actor: ActorId) -> Result<Departure> {
        let departure = self.registry.leave_faction(actor)?;
        self.engine.cancel_capture(actor, CancelReason::LeftFaction);
        self.apply_departure(actor, &departure);
        Ok(departure)
    }

    pub fn kick_member(&self, faction: FactionId, actor: ActorId) -> Result<Departure> {
        let departure = self.registry.kick_member(faction, actor)?;
        self.engine.cancel_capture(actor, CancelReason::LeftFaction);
        self.apply_departure(actor, &departure);

        let name = self.faction_name(faction);
        self.notifier.notify(actor, &Notice::Kicked { faction: name });
        Ok(departure)
    }

    pub fn disband_faction(&self, faction: FactionId) -> Result<Disbandment> {
        let disbandment = self.registry.disband_faction(faction)?;
        self.apply_disbandment(&disbandment);
        Ok(disbandment)
    }

    fn apply_departure(&self, actor: ActorId, departure: &Departure) {
        self.checkpoint.mark_player(actor);
        match departure {
            Departure::Left { faction } => self.checkpoint.mark_faction(*faction),
            Departure::Succeeded { faction, new_lord } => {
                self.checkpoint.mark_faction(*faction);
                let notice = Notice::LordshipPassed {
                    faction: self.faction_name(*faction),
                    new_lord: *new_lord,
                };
                self.notifier
                    .broadcast(*faction, &self.registry.members_of(*faction), &notice);
            }
            Departure::Disbanded(disbandment) => self.apply_disbandment(disbandment),
        }
    }

    fn apply_disbandment(&self, disbandment: &Disbandment) {
        let id = disbandment.faction.id;
        let cancelled = self
            .engine
            .cancel_for_actors(&disbandment.members, CancelReason::FactionDisbanded);

        self.checkpoint.mark_faction(id);
        for enemy in &disbandment.former_enemies {
            self.checkpoint.mark_faction(*enemy);
        }
        self.checkpoint.mark_players(&disbandment.members);

        self.notifier.broadcast(
            id,
            &disbandment.members,
            &Notice::FactionDisbanded {
                faction: disbandment.faction.display_name.clone(),
            },
        );
        tracing::info!(
            "Disbandment of {} cancelled {} capture sessions",
            disbandment.faction.name,
            cancelled
        );
    }

    fn faction_name(&self, faction: FactionId) -> String {
        self.registry
            .get(faction)
            .map(|f| f.display_name)
            .unwrap_or_else(|| faction.to_string())
    }

    fn broadcast_to_both(&self, a: FactionId, b: FactionId, notice: &Notice) {
        for faction in [a, b] {
            self.notifier
                .broadcast(faction, &self.registry.members_of(faction), notice);
        }
    }

    pub fn declare_war(&self, attacker: FactionId, defender: FactionId) -> Result<()> {
        self.registry.declare_war(attacker, defender)?;
        self.checkpoint.mark_faction(attacker);
        self.checkpoint.mark_faction(defender);
        let notice = Notice::WarDeclared {
            attacker: self.faction_name(attacker),
            defender: self.faction_name(defender),
        };
        self.broadcast_to_both(attacker, defender, &notice);
        Ok(())
    }

    pub fn make_peace(&self, initiator: FactionId, other: FactionId) -> Result<()> {
        self.registry.make_peace(initiator, other)?;
        self.checkpoint.mark_faction(initiator);
        self.checkpoint.mark_faction(other);
        let notice = Notice::PeaceMade {
            initiator: self.faction_name(initiator),
            other: self.faction_name(other),
        };
        self.broadcast_to_both(initiator, other, &notice);
        Ok(())
    }

    pub fn add_marshall(&self, faction: FactionId, actor: ActorId) -> Result<bool> {
        self.grant_role(faction, GrantableRole::Marshall, actor)
    }

    pub fn remove_marshall(&self, faction: FactionId, actor: ActorId) -> Result<bool> {
        self.revoke_role(faction, GrantableRole::Marshall, actor)
    }

    pub fn grant_role(&self, faction: FactionId, role: GrantableRole, actor: ActorId) -> Result<bool> {
        let changed = self.registry.grant_role(faction, role, actor)?;
        if changed {
            self.checkpoint.mark_faction(faction);
        }
        Ok(changed)
    }

    pub fn revoke_role(&self, faction: FactionId, role: GrantableRole, actor: ActorId) -> Result<bool> {
        let changed = self.registry.revoke_role(faction, role, actor)?;
        if changed {
            self.checkpoint.mark_faction(faction);
        }
        Ok(changed)
    }

    pub fn lock_poll(&self, faction: FactionId, duration_ms: u64) -> Result<()> {
        self.registry.lock_poll(faction, duration_ms)?;
        self.checkpoint.mark_faction(faction);
        Ok(())
    }

    // === FLAGS AND CAPTURES ===

    pub fn create_flag(&self, name: &str, position: WorldPos) -> Result<Flag> {
        let flag = self.engine.create_flag(name, position)?;
        self.checkpoint.mark_flag(flag.id);
        Ok(flag)
    }

    pub fn create_flag_with(
        &self,
        name: &str,
        position: WorldPos,
        capture_radius: f64,
        capture_duration_secs: u64,
    ) -> Result<Flag> {
        let flag = self
            .engine
            .create_flag_with(name, position, capture_radius, capture_duration_secs)?;
        self.checkpoint.mark_flag(flag.id);
        Ok(flag)
    }

    pub fn remove_flag(&self, id: FlagId) -> Result<Flag> {
        let flag = self.engine.remove_flag(id)?;
        self.checkpoint.mark_flag(id);
        Ok(flag)
    }

    pub fn start_capture(&self, actor: ActorId, flag: FlagId) -> Result<CaptureSession> {
        self.engine.start_capture(actor, flag)
    }

    /// Explicit cancel; `None` means there was nothing to cancel
    pub fn cancel_capture(&self, actor: ActorId) -> Option<CaptureSession> {
        self.engine.cancel_capture(actor, CancelReason::Requested)
    }

    pub fn on_disconnect(&self, actor: ActorId) {
        self.engine.cancel_capture(actor, CancelReason::Disconnected);
    }

    pub fn on_death(&self, actor: ActorId) {
        self.engine.cancel_capture(actor, CancelReason::Died);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::config::TerritoryConfig;
    use crate::ports::notify::RecordingNotifier;
    use crate::ports::sense::Roster;
    use crate::ports::store::MemoryStore;

    fn service() -> (TerritoryService, Arc<MemoryStore>, Arc<RecordingNotifier>) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = TerritoryService::start(
            store.clone(),
            Arc::new(Roster::new()),
            notifier.clone(),
            Arc::new(LiveConfig::new(TerritoryConfig::default())),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        (service, store, notifier)
    }

    #[test]
    fn test_start_registers_jobs() {
        let (service, _, _) = service();
        let names: Vec<&str> = service.scheduler().jobs().iter().map(|j| j.name()).collect();
        assert_eq!(names, vec![CAPTURE_TICK_JOB, COOLDOWN_SWEEP_JOB, CHECKPOINT_JOB]);
    }

    #[test]
    fn test_war_broadcasts_to_both_sides() {
        let (service, _, notifier) = service();
        let a = ActorId::new();
        let b = ActorId::new();
        let north = service.create_faction("north", "North", a, 5000).unwrap().id;
        let south = service.create_faction("south", "South", b, 5000).unwrap().id;

        service.declare_war(north, south).unwrap();
        let expected = Notice::WarDeclared {
            attacker: "North".into(),
            defender: "South".into(),
        };
        assert_eq!(notifier.for_actor(a), vec![expected.clone()]);
        assert_eq!(notifier.for_actor(b), vec![expected]);
    }

    #[test]
    fn test_lord_leaving_passes_lordship() {
        let (service, _, notifier) = service();
        let lord = ActorId::new();
        let heir = ActorId::new();
        let north = service.create_faction("north", "North", lord, 5000).unwrap().id;
        service.join_faction(heir, north).unwrap();
        service.add_marshall(north, heir).unwrap();

        let departure = service.leave_faction(lord).unwrap();
        assert_eq!(
            departure,
            Departure::Succeeded {
                faction: north,
                new_lord: heir
            }
        );
        assert_eq!(
            notifier.for_actor(heir),
            vec![Notice::LordshipPassed {
                faction: "North".into(),
                new_lord: heir
            }]
        );
    }

    #[test]
    fn test_mutations_reach_store_after_flush() {
        let (service, store, _) = service();
        let lord = ActorId::new();
        let north = service.create_faction("north", "North", lord, 5000).unwrap();
        assert!(store.load_all_factions().unwrap().is_empty());

        service.flush();
        assert_eq!(store.load_all_factions().unwrap(), vec![north.clone()]);

        service.disband_faction(north.id).unwrap();
        service.flush();
        assert!(store.load_all_factions().unwrap().is_empty());
        assert_eq!(store.load_player(lord).unwrap().unwrap().faction, None);
    }
}
