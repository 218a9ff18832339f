//! Faction - a persistent group of actors led by a lord

use serde::{Deserialize, Serialize};

use crate::core::types::{ActorId, FactionId, Timestamp};
use crate::faction::roles::{GrantableRole, Roles};

/// A faction and its role assignments.
///
/// Membership itself lives in the registry's actor index; this record only
/// holds the actors that carry a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    pub id: FactionId,
    pub name: String,
    pub display_name: String,
    pub lord: ActorId,
    /// Appointment order; the first entry inherits lordship
    pub marshalls: Vec<ActorId>,
    pub door_managers: Vec<ActorId>,
    pub chest_managers: Vec<ActorId>,
    pub war_declarations: Vec<FactionId>,
    pub poll_unlocked_at: Timestamp,
    pub created_at: Timestamp,
}

impl Faction {
    pub fn new(
        id: FactionId,
        name: String,
        display_name: String,
        lord: ActorId,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            name,
            display_name,
            lord,
            marshalls: Vec::new(),
            door_managers: Vec::new(),
            chest_managers: Vec::new(),
            war_declarations: Vec::new(),
            poll_unlocked_at: 0,
            created_at: now,
        }
    }

    /// Roles held by `actor`; empty for plain members and outsiders alike
    pub fn roles_of(&self, actor: ActorId) -> Roles {
        let mut roles = Roles::empty();
        if self.lord == actor {
            roles |= Roles::LORD;
        }
        if self.marshalls.contains(&actor) {
            roles |= Roles::MARSHALL;
        }
        if self.door_managers.contains(&actor) {
            roles |= Roles::DOOR_MANAGER;
        }
        if self.chest_managers.contains(&actor) {
            roles |= Roles::CHEST_MANAGER;
        }
        roles
    }

    pub fn is_lord(&self, actor: ActorId) -> bool {
        self.lord == actor
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

    fn role_list_mut(&mut self, role: GrantableRole) -> &mut Vec<ActorId> {
        match role {
            GrantableRole::Marshall => &mut self.marshalls,
            GrantableRole::DoorManager => &mut self.door_managers,
            GrantableRole::ChestManager => &mut self.chest_managers,
        }
    }

    /// Returns true if the role was newly granted
    pub fn grant(&mut self, role: GrantableRole, actor: ActorId) -> bool {
        let list = self.role_list_mut(role);
        if list.contains(&actor) {
            return false;
        }
        list.push(actor);
        true
    }

    /// Returns true if the role was held
    pub fn revoke(&mut self, role: GrantableRole, actor: ActorId) -> bool {
        let list = self.role_list_mut(role);
        let before = list.len();
        list.retain(|a| *a != actor);
        list.len() != before
    }

    /// Drop every role held by `actor` (lordship is handled by the registry)
    pub fn strip_roles(&mut self, actor: ActorId) {
        self.marshalls.retain(|a| *a != actor);
        self.door_managers.retain(|a| *a != actor);
        self.chest_managers.retain(|a| *a != actor);
    }

    /// Promote the earliest-appointed marshall to lord.
    ///
    /// Returns the new lord, or `None` if there is no marshall to inherit.
    pub fn promote_successor(&mut self) -> Option<ActorId> {
        if self.marshalls.is_empty() {
            return None;
        }
        let heir = self.marshalls.remove(0);
        self.lord = heir;
        Some(heir)
    }

    pub fn is_at_war_with(&self, other: FactionId) -> bool {
        self.war_declarations.contains(&other)
    }

    pub(crate) fn add_war(&mut self, other: FactionId) {
        if !self.war_declarations.contains(&other) {
            self.war_declarations.push(other);
        }
    }

    pub(crate) fn remove_war(&mut self, other: FactionId) -> bool {
        let before = self.war_declarations.len();
        self.war_declarations.retain(|f| *f != other);
        self.war_declarations.len() != before
    }

    pub fn is_poll_unlocked(&self, now: Timestamp) -> bool {
        now >= self.poll_unlocked_at
    }

    pub fn lock_poll(&mut self, now: Timestamp, duration_ms: u64) {
        self.poll_unlocked_at = now.saturating_add(duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Faction, ActorId) {
        let lord = ActorId::new();
        let faction = Faction::new(
            FactionId(1),
            "north".to_string(),
            "The North".to_string(),
            lord,
            100,
        );
        (faction, lord)
    }

    #[test]
    fn test_roles_of_lord_and_outsider() {
        let (faction, lord) = sample();
        assert_eq!(faction.roles_of(lord), Roles::LORD);
        assert_eq!(faction.roles_of(ActorId::new()), Roles::empty());
        assert!(faction.has_management_permission(lord));
    }

    #[test]
    fn test_grant_is_idempotent() {
        let (mut faction, _) = sample();
        let m = ActorId::new();
        assert!(faction.grant(GrantableRole::Marshall, m));
        assert!(!faction.grant(GrantableRole::Marshall, m));
        assert_eq!(faction.marshalls, vec![m]);
        assert!(faction.revoke(GrantableRole::Marshall, m));
        assert!(!faction.revoke(GrantableRole::Marshall, m));
    }

    #[test]
    fn test_promote_successor_takes_first_marshall() {
        let (mut faction, _) = sample();
        let first = ActorId::new();
        let second = ActorId::new();
        faction.grant(GrantableRole::Marshall, first);
        faction.grant(GrantableRole::Marshall, second);

        assert_eq!(faction.promote_successor(), Some(first));
        assert_eq!(faction.lord, first);
        assert_eq!(faction.marshalls, vec![second]);
        assert!(!faction.roles_of(first).contains(Roles::MARSHALL));
    }

    #[test]
    fn test_promote_without_marshalls() {
        let (mut faction, lord) = sample();
        assert_eq!(faction.promote_successor(), None);
        assert_eq!(faction.lord, lord);
    }

    #[test]
    fn test_strip_roles_keeps_others() {
        let (mut faction, _) = sample();
        let a = ActorId::new();
        let b = ActorId::new();
        faction.grant(GrantableRole::DoorManager, a);
        faction.grant(GrantableRole::ChestManager, a);
        faction.grant(GrantableRole::ChestManager, b);
        faction.strip_roles(a);
        assert_eq!(faction.roles_of(a), Roles::empty());
        assert!(faction.can_manage_chests(b));
    }

    #[test]
    fn test_poll_gate() {
        let (mut faction, _) = sample();
        assert!(faction.is_poll_unlocked(0));
        faction.lock_poll(1_000, 500);
        assert!(!faction.is_poll_unlocked(1_499));
        assert!(faction.is_poll_unlocked(1_500));

        faction.lock_poll(2_000, u64::MAX);
        assert!(!faction.is_poll_unlocked(u64::MAX - 1));
    }
}
