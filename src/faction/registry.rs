//! Faction registry - the sole owner of faction state
//!
//! The faction table and the actor -> faction index share one `RwLock`, so
//! every mutation (join, leave, disband, war, peace) is observed atomically
//! by the capture engine's eligibility reads. Cooldowns live behind their
//! own mutexes and are always locked after the tables, never before.

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashMap;

use crate::core::clock::Clock;
use crate::core::config::LiveConfig;
use crate::core::error::{Result, Subject, TerritoryError};
use crate::core::types::{ActorId, FactionId};
use crate::faction::cooldown::CooldownTable;
use crate::faction::faction::Faction;
use crate::faction::roles::{GrantableRole, Roles};

struct FactionTables {
    factions: AHashMap<FactionId, Faction>,
    members: AHashMap<ActorId, FactionId>,
    next_id: u32,
}

impl FactionTables {
    fn faction(&self, id: FactionId) -> Result<&Faction> {
        self.factions
            .get(&id)
            .ok_or(TerritoryError::NotFound(Subject::Faction(id)))
    }

    fn faction_mut(&mut self, id: FactionId) -> Result<&mut Faction> {
        self.factions
            .get_mut(&id)
            .ok_or(TerritoryError::NotFound(Subject::Faction(id)))
    }

    fn by_name(&self, name: &str) -> Option<&Faction> {
        let wanted = name.to_lowercase();
        self.factions
            .values()
            .find(|f| f.name.to_lowercase() == wanted)
    }

    fn members_of(&self, id: FactionId) -> Vec<ActorId> {
        let mut members: Vec<ActorId> = self
            .members
            .iter()
            .filter(|(_, f)| **f == id)
            .map(|(actor, _)| *actor)
            .collect();
        members.sort();
        members
    }

    /// Actor must be a member of `id`
    fn require_member(&self, id: FactionId, actor: ActorId) -> Result<()> {
        match self.members.get(&actor) {
            Some(f) if *f == id => Ok(()),
            _ => Err(TerritoryError::NotInFaction(actor)),
        }
    }

    fn disband(&mut self, id: FactionId) -> Result<Disbandment> {
        let faction = self
            .factions
            .remove(&id)
            .ok_or(TerritoryError::NotFound(Subject::Faction(id)))?;

        let members = self.members_of(id);
        self.members.retain(|_, f| *f != id);

        let mut former_enemies = Vec::new();
        for other in self.factions.values_mut() {
            if other.remove_war(id) {
                former_enemies.push(other.id);
            }
        }
        former_enemies.sort();

        Ok(Disbandment {
            faction,
            members,
            former_enemies,
        })
    }
}

/// Everything a disband touched, so callers can cancel sessions and persist
#[derive(Debug, Clone, PartialEq)]
pub struct Disbandment {
    pub faction: Faction,
    /// Former members, lord included; their faction id is now cleared
    pub members: Vec<ActorId>,
    /// Factions that were at war with the disbanded one
    pub former_enemies: Vec<FactionId>,
}

/// Result of an actor leaving (or being removed from) a faction
#[derive(Debug, Clone, PartialEq)]
pub enum Departure {
    /// A plain member left and lost any roles they held
    Left { faction: FactionId },
    /// The lord left and the first marshall inherited
    Succeeded { faction: FactionId, new_lord: ActorId },
    /// The lord left with no successor
    Disbanded(Disbandment),
}

impl Departure {
    pub fn faction(&self) -> FactionId {
        match self {
            Departure::Left { faction } | Departure::Succeeded { faction, .. } => *faction,
            Departure::Disbanded(d) => d.faction.id,
        }
    }
}

/// Membership and diplomacy as seen by one capture evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Standing {
    pub faction: Option<FactionId>,
    /// The queried owner still exists
    pub owner_exists: bool,
    pub at_war_with_owner: bool,
}

pub struct FactionRegistry {
    config: Arc<LiveConfig>,
    clock: Arc<dyn Clock>,
    tables: RwLock<FactionTables>,
    war_cooldowns: Mutex<CooldownTable<FactionId>>,
    peace_cooldowns: Mutex<CooldownTable<FactionId>>,
}

impl FactionRegistry {
    pub fn new(config: Arc<LiveConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            tables: RwLock::new(FactionTables {
                factions: AHashMap::new(),
                members: AHashMap::new(),
                next_id: 1,
            }),
            war_cooldowns: Mutex::new(CooldownTable::new()),
            peace_cooldowns: Mutex::new(CooldownTable::new()),
        }
    }

    /// Rebuild from persisted factions and actor memberships.
    ///
    /// Memberships that point at unknown factions are dropped. War entries are
    /// made symmetric: if either side recorded the war, both sides hold it.
    pub fn restore(
        config: Arc<LiveConfig>,
        clock: Arc<dyn Clock>,
        factions: Vec<Faction>,
        memberships: impl IntoIterator<Item = (ActorId, FactionId)>,
    ) -> Self {
        let registry = Self::new(config, clock);
        {
            let mut tables = registry.write();
            for faction in factions {
                let next = tables.next_id.max(faction.id.0.saturating_add(1));
                tables.next_id = next;
                tables.factions.insert(faction.id, faction);
            }

            let wars: Vec<(FactionId, FactionId)> = tables
                .factions
                .values()
                .flat_map(|f| f.war_declarations.iter().map(move |other| (f.id, *other)))
                .collect();
            for (a, b) in wars {
                if !tables.factions.contains_key(&b) {
                    if let Some(f) = tables.factions.get_mut(&a) {
                        f.remove_war(b);
                    }
                    continue;
                }
                if let Some(f) = tables.factions.get_mut(&b) {
                    f.add_war(a);
                }
            }

            for (actor, faction) in memberships {
                if tables.factions.contains_key(&faction) {
                    tables.members.insert(actor, faction);
                }
            }
            // A lord is always a member of their own faction
            let lords: Vec<(ActorId, FactionId)> =
                tables.factions.values().map(|f| (f.lord, f.id)).collect();
            for (lord, id) in lords {
                tables.members.insert(lord, id);
            }

            tracing::info!(
                "Restored {} factions with {} members",
                tables.factions.len(),
                tables.members.len()
            );
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, FactionTables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FactionTables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate_names(&self, name: &str, display_name: &str) -> Result<()> {
        let settings = self.config.get().factions;
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
        if display_name.chars().count() > settings.display_name_max_len {
            return Err(TerritoryError::InvalidName {
                name: display_name.to_string(),
                reason: format!(
                    "display name exceeds {} characters",
                    settings.display_name_max_len
                ),
            });
        }
        Ok(())
    }

    // === LIFECYCLE ===

    /// Create a faction with `founder` as lord.
    ///
    /// `paid` is what the economy already deducted from the founder; the
    /// caller refunds it if this returns an error.
    pub fn create_faction(
        &self,
        name: &str,
        display_name: &str,
        founder: ActorId,
        paid: u64,
    ) -> Result<Faction> {
        self.validate_names(name, display_name)?;
        let required = self.config.get().factions.creation_cost;

        let mut tables = self.write();
        if tables.by_name(name).is_some() {
            return Err(TerritoryError::NameTaken(name.to_string()));
        }
        if let Some(existing) = tables.members.get(&founder) {
            return Err(TerritoryError::AlreadyInFaction {
                actor: founder,
                faction: *existing,
            });
        }
        if paid < required {
            return Err(TerritoryError::InsufficientFunds { required, paid });
        }

        let id = FactionId(tables.next_id);
        tables.next_id += 1;
        let faction = Faction::new(
            id,
            name.to_string(),
            display_name.to_string(),
            founder,
            self.clock.now(),
        );
        tables.factions.insert(id, faction.clone());
        tables.members.insert(founder, id);

        tracing::info!("Created faction {} ({}) with lord {}", name, id, founder);
        Ok(faction)
    }

    pub fn join_faction(&self, actor: ActorId, faction: FactionId) -> Result<()> {
        let mut tables = self.write();
        let name = tables.faction(faction)?.name.clone();
        if let Some(existing) = tables.members.get(&actor) {
            return Err(TerritoryError::AlreadyInFaction {
                actor,
                faction: *existing,
            });
        }
        tables.members.insert(actor, faction);
        tracing::info!("Actor {} joined faction {}", actor, name);
        Ok(())
    }

    /// Leave the actor's faction, handing lordship on or disbanding as needed
    pub fn leave_faction(&self, actor: ActorId) -> Result<Departure> {
        let mut tables = self.write();
        let id = *tables
            .members
            .get(&actor)
            .ok_or(TerritoryError::NotInFaction(actor))?;
        Self::depart(&mut tables, id, actor)
    }

    /// Remove a non-lord member on behalf of the faction's management
    pub fn kick_member(&self, faction: FactionId, actor: ActorId) -> Result<Departure> {
        let mut tables = self.write();
        if tables.faction(faction)?.is_lord(actor) {
            return Err(TerritoryError::PermissionDenied(
                "the lord cannot be kicked".into(),
            ));
        }
        tables.require_member(faction, actor)?;
        Self::depart(&mut tables, faction, actor)
    }

    fn depart(tables: &mut FactionTables, id: FactionId, actor: ActorId) -> Result<Departure> {
        let Some(faction) = tables.factions.get_mut(&id) else {
            // Index pointed at a faction that is gone; heal it
            tables.members.remove(&actor);
            return Err(TerritoryError::NotFound(Subject::Faction(id)));
        };

        if !faction.is_lord(actor) {
            faction.strip_roles(actor);
            let name = faction.name.clone();
            tables.members.remove(&actor);
            tracing::info!("Actor {} left faction {}", actor, name);
            return Ok(Departure::Left { faction: id });
        }

        faction.strip_roles(actor);
        match faction.promote_successor() {
            Some(new_lord) => {
                tracing::info!(
                    "Lord {} left faction {}; {} inherits",
                    actor,
                    faction.name,
                    new_lord
                );
                tables.members.remove(&actor);
                Ok(Departure::Succeeded {
                    faction: id,
                    new_lord,
                })
            }
            None => {
                let disbandment = tables.disband(id)?;
                tracing::info!(
                    "Lord {} left faction {} with no successor; disbanded",
                    actor,
                    disbandment.faction.name
                );
                Ok(Departure::Disbanded(disbandment))
            }
        }
    }

    /// Remove a faction outright. A second call fails with `NotFound`.
    pub fn disband_faction(&self, faction: FactionId) -> Result<Disbandment> {
        let disbandment = self.write().disband(faction)?;
        self.war_cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear(faction);
        self.peace_cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear(faction);
        tracing::info!(
            "Disbanded faction {} ({}), detached {} members",
            disbandment.faction.name,
            faction,
            disbandment.members.len()
        );
        Ok(disbandment)
    }

    // === DIPLOMACY ===

    pub fn declare_war(&self, attacker: FactionId, defender: FactionId) -> Result<()> {
        if attacker == defender {
            return Err(TerritoryError::InvalidTarget(
                "a faction cannot declare war on itself".into(),
            ));
        }
        let window = self.config.get().factions.war_timeout_ms();
        let now = self.clock.now();

        let mut tables = self.write();
        tables.faction(attacker)?;
        tables.faction(defender)?;

        let mut cooldowns = self
            .war_cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(remaining_ms) = cooldowns.remaining(attacker, now, window) {
            return Err(TerritoryError::CooldownActive { remaining_ms });
        }

        tables.faction_mut(attacker)?.add_war(defender);
        tables.faction_mut(defender)?.add_war(attacker);
        cooldowns.start(attacker, now);

        tracing::info!("War declared: {} against {}", attacker, defender);
        Ok(())
    }

    /// End a war. The peace cooldown is keyed by `initiator`.
    pub fn make_peace(&self, initiator: FactionId, other: FactionId) -> Result<()> {
        let window = self.config.get().factions.peace_timeout_ms();
        let now = self.clock.now();

        let mut tables = self.write();
        if !tables.faction(initiator)?.is_at_war_with(other) {
            tables.faction(other)?;
            return Err(TerritoryError::NotAtWar(initiator, other));
        }
        tables.faction(other)?;

        let mut cooldowns = self
            .peace_cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(remaining_ms) = cooldowns.remaining(initiator, now, window) {
            return Err(TerritoryError::CooldownActive { remaining_ms });
        }

        tables.faction_mut(initiator)?.remove_war(other);
        tables.faction_mut(other)?.remove_war(initiator);
        cooldowns.start(initiator, now);

        tracing::info!("Peace made between {} and {}", initiator, other);
        Ok(())
    }

    // === ROLES ===

    /// Appoint a marshall. Returns true if the appointment is new.
    pub fn add_marshall(&self, faction: FactionId, actor: ActorId) -> Result<bool> {
        self.grant_role(faction, GrantableRole::Marshall, actor)
    }

    /// Returns true if the actor was a marshall
    pub fn remove_marshall(&self, faction: FactionId, actor: ActorId) -> Result<bool> {
        self.revoke_role(faction, GrantableRole::Marshall, actor)
    }

    pub fn grant_role(&self, faction: FactionId, role: GrantableRole, actor: ActorId) -> Result<bool> {
        let mut tables = self.write();
        tables.faction(faction)?;
        tables.require_member(faction, actor)?;
        let record = tables.faction_mut(faction)?;
        if role == GrantableRole::Marshall && record.is_lord(actor) {
            return Err(TerritoryError::InvalidTarget(
                "the lord cannot also be a marshall".into(),
            ));
        }
        let granted = record.grant(role, actor);
        if granted {
            tracing::info!("Granted {:?} to {} in {}", role, actor, record.name);
        }
        Ok(granted)
    }

    pub fn revoke_role(&self, faction: FactionId, role: GrantableRole, actor: ActorId) -> Result<bool> {
        let mut tables = self.write();
        let record = tables.faction_mut(faction)?;
        let revoked = record.revoke(role, actor);
        if revoked {
            tracing::info!("Revoked {:?} from {} in {}", role, actor, record.name);
        }
        Ok(revoked)
    }

    // === POLL GATE ===

    pub fn lock_poll(&self, faction: FactionId, duration_ms: u64) -> Result<()> {
        let now = self.clock.now();
        self.write().faction_mut(faction)?.lock_poll(now, duration_ms);
        Ok(())
    }

    pub fn is_poll_unlocked(&self, faction: FactionId) -> Result<bool> {
        let now = self.clock.now();
        Ok(self.read().faction(faction)?.is_poll_unlocked(now))
    }

    // === QUERIES ===

    pub fn get(&self, faction: FactionId) -> Option<Faction> {
        self.read().factions.get(&faction).cloned()
    }

    /// Case-insensitive exact match
    pub fn get_by_name(&self, name: &str) -> Option<Faction> {
        self.read().by_name(name).cloned()
    }

    pub fn faction_of(&self, actor: ActorId) -> Option<Faction> {
        let tables = self.read();
        let id = tables.members.get(&actor)?;
        tables.factions.get(id).cloned()
    }

    pub fn faction_id_of(&self, actor: ActorId) -> Option<FactionId> {
        let tables = self.read();
        tables
            .members
            .get(&actor)
            .copied()
            .filter(|id| tables.factions.contains_key(id))
    }

    pub fn is_in_faction(&self, actor: ActorId) -> bool {
        self.faction_id_of(actor).is_some()
    }

    pub fn members_of(&self, faction: FactionId) -> Vec<ActorId> {
        self.read().members_of(faction)
    }

    pub fn all(&self) -> Vec<Faction> {
        let mut all: Vec<Faction> = self.read().factions.values().cloned().collect();
        all.sort_by_key(|f| f.id);
        all
    }

    pub fn are_at_war(&self, a: FactionId, b: FactionId) -> bool {
        let tables = self.read();
        let forward = tables.factions.get(&a).is_some_and(|f| f.is_at_war_with(b));
        debug_assert_eq!(
            forward,
            tables.factions.get(&b).is_some_and(|f| f.is_at_war_with(a)),
            "war declarations must be symmetric"
        );
        forward
    }

    /// Roles of `actor` within their own faction
    pub fn roles_of(&self, actor: ActorId) -> Roles {
        let tables = self.read();
        tables
            .members
            .get(&actor)
            .and_then(|id| tables.factions.get(id))
            .map(|f| f.roles_of(actor))
            .unwrap_or_default()
    }

    pub fn has_management_permission(&self, actor: ActorId) -> bool {
        self.roles_of(actor).has_management()
    }

    pub fn can_manage_doors(&self, actor: ActorId) -> bool {
        self.roles_of(actor).can_manage_doors()
    }

    pub fn can_manage_chests(&self, actor: ActorId) -> bool {
        self.roles_of(actor).can_manage_chests()
    }

    /// The actor's faction, if they hold management permission in it
    pub fn require_management(&self, actor: ActorId) -> Result<FactionId> {
        let tables = self.read();
        let id = *tables
            .members
            .get(&actor)
            .ok_or(TerritoryError::NoFaction(actor))?;
        if tables.faction(id)?.has_management_permission(actor) {
            Ok(id)
        } else {
            Err(TerritoryError::PermissionDenied(
                "lord or marshall required".into(),
            ))
        }
    }

    /// The actor's faction, if they are its lord
    pub fn require_lord(&self, actor: ActorId) -> Result<FactionId> {
        let tables = self.read();
        let id = *tables
            .members
            .get(&actor)
            .ok_or(TerritoryError::NoFaction(actor))?;
        if tables.faction(id)?.is_lord(actor) {
            Ok(id)
        } else {
            Err(TerritoryError::PermissionDenied("lord required".into()))
        }
    }

    /// Consistent read of an actor's faction and its relation to a flag owner
    pub fn standing(&self, actor: ActorId, owner: Option<FactionId>) -> Standing {
        let tables = self.read();
        let faction = tables
            .members
            .get(&actor)
            .copied()
            .filter(|id| tables.factions.contains_key(id));
        let owner_faction = owner.and_then(|o| tables.factions.get(&o));
        Standing {
            faction,
            owner_exists: owner_faction.is_some(),
            at_war_with_owner: match (faction, owner_faction) {
                (Some(mine), Some(theirs)) => theirs.is_at_war_with(mine),
                _ => false,
            },
        }
    }

    // === HOUSEKEEPING ===

    /// Drop elapsed war and peace cooldowns. Returns how many were removed.
    pub fn process_cooldowns(&self) -> usize {
        let settings = self.config.get().factions;
        let now = self.clock.now();
        let wars = self
            .war_cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .prune(now, settings.war_timeout_ms());
        let peaces = self
            .peace_cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .prune(now, settings.peace_timeout_ms());
        if wars + peaces > 0 {
            tracing::debug!("Pruned {} war and {} peace cooldowns", wars, peaces);
        }
        wars + peaces
    }

    /// Number of live cooldown entries (war, peace)
    pub fn cooldown_counts(&self) -> (usize, usize) {
        (
            self.war_cooldowns
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            self.peace_cooldowns
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::config::TerritoryConfig;

    const MINUTE: u64 = 60 * 1000;

    fn registry() -> (FactionRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let config = Arc::new(LiveConfig::new(TerritoryConfig::default()));
        (FactionRegistry::new(config, clock.clone()), clock)
    }

    fn found(registry: &FactionRegistry, name: &str) -> (FactionId, ActorId) {
        let lord = ActorId::new();
        let faction = registry.create_faction(name, name, lord, 5000).unwrap();
        (faction.id, lord)
    }

    #[test]
    fn test_create_assigns_lord_and_membership() {
        let (registry, clock) = registry();
        let lord = ActorId::new();
        let faction = registry
            .create_faction("north", "The North", lord, 5000)
            .unwrap();

        assert_eq!(faction.lord, lord);
        assert_eq!(faction.created_at, clock.now());
        assert_eq!(registry.faction_id_of(lord), Some(faction.id));
        assert!(registry.has_management_permission(lord));
    }

    #[test]
    fn test_create_rejects_duplicate_name_case_insensitively() {
        let (registry, _) = registry();
        found(&registry, "north");
        let err = registry
            .create_faction("NORTH", "Other", ActorId::new(), 5000)
            .unwrap_err();
        assert_eq!(err, TerritoryError::NameTaken("NORTH".into()));
    }

    #[test]
    fn test_create_rejects_founder_in_faction() {
        let (registry, _) = registry();
        let (id, lord) = found(&registry, "north");
        let err = registry.create_faction("south", "South", lord, 5000).unwrap_err();
        assert_eq!(
            err,
            TerritoryError::AlreadyInFaction {
                actor: lord,
                faction: id
            }
        );
    }

    #[test]
    fn test_create_requires_payment() {
        let (registry, _) = registry();
        let err = registry
            .create_faction("north", "North", ActorId::new(), 4999)
            .unwrap_err();
        assert_eq!(
            err,
            TerritoryError::InsufficientFunds {
                required: 5000,
                paid: 4999
            }
        );
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_create_validates_name_length() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.create_faction("ab", "ab", ActorId::new(), 5000),
            Err(TerritoryError::InvalidName { .. })
        ));
        assert!(matches!(
            registry.create_faction("abcdefghijklmnopq", "x", ActorId::new(), 5000),
            Err(TerritoryError::InvalidName { .. })
        ));
        let long_display = "x".repeat(33);
        assert!(matches!(
            registry.create_faction("north", &long_display, ActorId::new(), 5000),
            Err(TerritoryError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_join_errors() {
        let (registry, _) = registry();
        let (id, lord) = found(&registry, "north");
        assert_eq!(
            registry.join_faction(ActorId::new(), FactionId(99)),
            Err(TerritoryError::NotFound(Subject::Faction(FactionId(99))))
        );
        assert!(matches!(
            registry.join_faction(lord, id),
            Err(TerritoryError::AlreadyInFaction { .. })
        ));
    }

    #[test]
    fn test_member_leave_strips_roles() {
        let (registry, _) = registry();
        let (id, _) = found(&registry, "north");
        let member = ActorId::new();
        registry.join_faction(member, id).unwrap();
        registry.add_marshall(id, member).unwrap();
        registry
            .grant_role(id, GrantableRole::DoorManager, member)
            .unwrap();

        assert_eq!(
            registry.leave_faction(member).unwrap(),
            Departure::Left { faction: id }
        );
        let faction = registry.get(id).unwrap();
        assert!(faction.marshalls.is_empty());
        assert!(faction.door_managers.is_empty());
        assert_eq!(registry.faction_id_of(member), None);
        assert_eq!(
            registry.leave_faction(member),
            Err(TerritoryError::NotInFaction(member))
        );
    }

    #[test]
    fn test_lord_leave_promotes_first_marshall() {
        let (registry, _) = registry();
        let (id, lord) = found(&registry, "north");
        let first = ActorId::new();
        let second = ActorId::new();
        for m in [first, second] {
            registry.join_faction(m, id).unwrap();
            registry.add_marshall(id, m).unwrap();
        }

        assert_eq!(
            registry.leave_faction(lord).unwrap(),
            Departure::Succeeded {
                faction: id,
                new_lord: first
            }
        );
        let faction = registry.get(id).unwrap();
        assert_eq!(faction.lord, first);
        assert_eq!(faction.marshalls, vec![second]);
        assert_eq!(registry.faction_id_of(first), Some(id));
        assert_eq!(registry.faction_id_of(lord), None);
    }

    #[test]
    fn test_lord_leave_without_marshall_disbands() {
        let (registry, _) = registry();
        let (id, lord) = found(&registry, "north");
        let member = ActorId::new();
        registry.join_faction(member, id).unwrap();

        match registry.leave_faction(lord).unwrap() {
            Departure::Disbanded(d) => {
                assert_eq!(d.faction.id, id);
                let mut expected = vec![lord, member];
                expected.sort();
                assert_eq!(d.members, expected);
            }
            other => panic!("expected disband, got {:?}", other),
        }
        assert!(registry.get(id).is_none());
        assert_eq!(registry.faction_id_of(member), None);
    }

    #[test]
    fn test_disband_clears_wars_and_is_not_repeatable() {
        let (registry, _) = registry();
        let (a, _) = found(&registry, "north");
        let (b, _) = found(&registry, "south");
        let (c, _) = found(&registry, "east");
        registry.declare_war(a, b).unwrap();
        registry.declare_war(c, a).unwrap();

        let d = registry.disband_faction(a).unwrap();
        assert_eq!(d.former_enemies, vec![b, c]);
        assert!(registry.get(b).unwrap().war_declarations.is_empty());
        assert!(registry.get(c).unwrap().war_declarations.is_empty());
        assert_eq!(
            registry.disband_faction(a),
            Err(TerritoryError::NotFound(Subject::Faction(a)))
        );
    }

    #[test]
    fn test_war_is_symmetric_and_throttled() {
        let (registry, clock) = registry();
        let (a, _) = found(&registry, "north");
        let (b, _) = found(&registry, "south");
        let (c, _) = found(&registry, "east");

        registry.declare_war(a, b).unwrap();
        assert!(registry.are_at_war(a, b));
        assert!(registry.are_at_war(b, a));

        assert!(matches!(
            registry.declare_war(a, c),
            Err(TerritoryError::CooldownActive { .. })
        ));
        // The defender is not throttled
        registry.declare_war(b, c).unwrap();

        clock.advance(30 * MINUTE);
        registry.declare_war(a, c).unwrap();
        assert!(registry.are_at_war(c, a));
    }

    #[test]
    fn test_war_on_self_rejected() {
        let (registry, _) = registry();
        let (a, _) = found(&registry, "north");
        assert!(matches!(
            registry.declare_war(a, a),
            Err(TerritoryError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_peace_requires_war_and_respects_cooldown() {
        let (registry, clock) = registry();
        let (a, _) = found(&registry, "north");
        let (b, _) = found(&registry, "south");

        assert_eq!(registry.make_peace(a, b), Err(TerritoryError::NotAtWar(a, b)));

        registry.declare_war(a, b).unwrap();
        registry.make_peace(a, b).unwrap();
        assert!(!registry.are_at_war(a, b));
        assert!(!registry.are_at_war(b, a));

        registry.declare_war(b, a).unwrap();
        clock.advance(MINUTE);
        assert!(matches!(
            registry.make_peace(a, b),
            Err(TerritoryError::CooldownActive { .. })
        ));
        // Keyed by initiator, so the other side may still make peace
        registry.make_peace(b, a).unwrap();
        assert!(!registry.are_at_war(a, b));
    }

    #[test]
    fn test_marshall_rules() {
        let (registry, _) = registry();
        let (id, lord) = found(&registry, "north");
        let outsider = ActorId::new();
        assert_eq!(
            registry.add_marshall(id, outsider),
            Err(TerritoryError::NotInFaction(outsider))
        );
        assert!(matches!(
            registry.add_marshall(id, lord),
            Err(TerritoryError::InvalidTarget(_))
        ));

        let member = ActorId::new();
        registry.join_faction(member, id).unwrap();
        assert_eq!(registry.add_marshall(id, member), Ok(true));
        assert_eq!(registry.add_marshall(id, member), Ok(false));
        assert_eq!(registry.remove_marshall(id, member), Ok(true));
        assert_eq!(registry.remove_marshall(id, member), Ok(false));
    }

    #[test]
    fn test_kick_refuses_lord() {
        let (registry, _) = registry();
        let (id, lord) = found(&registry, "north");
        let member = ActorId::new();
        registry.join_faction(member, id).unwrap();

        assert!(matches!(
            registry.kick_member(id, lord),
            Err(TerritoryError::PermissionDenied(_))
        ));
        assert_eq!(
            registry.kick_member(id, member).unwrap(),
            Departure::Left { faction: id }
        );
        assert_eq!(
            registry.kick_member(id, member),
            Err(TerritoryError::NotInFaction(member))
        );
    }

    #[test]
    fn test_permission_queries() {
        let (registry, _) = registry();
        let (id, lord) = found(&registry, "north");
        let doors = ActorId::new();
        registry.join_faction(doors, id).unwrap();
        registry
            .grant_role(id, GrantableRole::DoorManager, doors)
            .unwrap();

        assert!(registry.can_manage_doors(doors));
        assert!(!registry.can_manage_chests(doors));
        assert_eq!(registry.require_management(lord), Ok(id));
        assert!(matches!(
            registry.require_management(doors),
            Err(TerritoryError::PermissionDenied(_))
        ));
        assert_eq!(registry.require_lord(lord), Ok(id));
    }

    #[test]
    fn test_standing_reflects_war_state() {
        let (registry, _) = registry();
        let (a, _) = found(&registry, "north");
        let (b, _) = found(&registry, "south");
        let soldier = ActorId::new();
        registry.join_faction(soldier, b).unwrap();

        let before = registry.standing(soldier, Some(a));
        assert_eq!(before.faction, Some(b));
        assert!(before.owner_exists);
        assert!(!before.at_war_with_owner);

        registry.declare_war(a, b).unwrap();
        assert!(registry.standing(soldier, Some(a)).at_war_with_owner);

        let stale = registry.standing(soldier, Some(FactionId(77)));
        assert!(!stale.owner_exists);
    }

    #[test]
    fn test_process_cooldowns_prunes_after_window() {
        let (registry, clock) = registry();
        let (a, _) = found(&registry, "north");
        let (b, _) = found(&registry, "south");
        registry.declare_war(a, b).unwrap();
        registry.make_peace(a, b).unwrap();
        assert_eq!(registry.cooldown_counts(), (1, 1));

        clock.advance(10 * MINUTE);
        assert_eq!(registry.process_cooldowns(), 0);
        clock.advance(20 * MINUTE);
        assert_eq!(registry.process_cooldowns(), 2);
        assert_eq!(registry.cooldown_counts(), (0, 0));
    }

    #[test]
    fn test_restore_repairs_asymmetric_wars_and_index() {
        let clock = Arc::new(ManualClock::new(0));
        let config = Arc::new(LiveConfig::new(TerritoryConfig::default()));
        let lord_a = ActorId::new();
        let lord_b = ActorId::new();
        let mut a = Faction::new(FactionId(3), "north".into(), "N".into(), lord_a, 0);
        let b = Faction::new(FactionId(5), "south".into(), "S".into(), lord_b, 0);
        a.add_war(FactionId(5));
        a.add_war(FactionId(9));

        let stray = ActorId::new();
        let registry = FactionRegistry::restore(
            config,
            clock,
            vec![a, b],
            vec![(stray, FactionId(9))],
        );

        assert!(registry.are_at_war(FactionId(5), FactionId(3)));
        assert!(!registry.get(FactionId(3)).unwrap().is_at_war_with(FactionId(9)));
        assert_eq!(registry.faction_id_of(lord_b), Some(FactionId(5)));
        assert_eq!(registry.faction_id_of(stray), None);

        let next = registry
            .create_faction("east", "E", ActorId::new(), 5000)
            .unwrap();
        assert_eq!(next.id, FactionId(6));
    }

    #[test]
    fn test_concurrent_joins_admit_actor_once() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);
        let (a, _) = found(&registry, "north");
        let (b, _) = found(&registry, "south");
        let actor = ActorId::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                let target = if i % 2 == 0 { a } else { b };
                std::thread::spawn(move || registry.join_faction(actor, target).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
