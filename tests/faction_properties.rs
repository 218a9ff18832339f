//! Faction registry invariants under arbitrary operation sequences

use std::sync::Arc;

use proptest::prelude::*;

use territory_control::core::clock::ManualClock;
use territory_control::core::config::{LiveConfig, TerritoryConfig};
use territory_control::core::error::TerritoryError;
use territory_control::core::types::{ActorId, FactionId};
use territory_control::faction::{Departure, FactionRegistry};

const MINUTE: u64 = 60 * 1000;

fn registry() -> (FactionRegistry, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let config = Arc::new(LiveConfig::new(TerritoryConfig::default()));
    (FactionRegistry::new(config, clock.clone()), clock)
}

fn found(registry: &FactionRegistry, count: usize) -> Vec<FactionId> {
    (0..count)
        .map(|i| {
            registry
                .create_faction(&format!("house{}", i), "House", ActorId::new(), 5000)
                .unwrap()
                .id
        })
        .collect()
}

/// Every war entry has a live, reciprocating counterpart
fn assert_wars_symmetric(registry: &FactionRegistry) {
    let all = registry.all();
    for a in &all {
        for b in &a.war_declarations {
            let other = all
                .iter()
                .find(|f| f.id == *b)
                .unwrap_or_else(|| panic!("{} at war with missing {}", a.id, b));
            assert!(
                other.is_at_war_with(a.id),
                "{} lists {} but not the reverse",
                a.id,
                b
            );
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    War(usize, usize),
    Peace(usize, usize),
    Disband(usize),
    Wait(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..5usize, 0..5usize).prop_map(|(a, b)| Op::War(a, b)),
        3 => (0..5usize, 0..5usize).prop_map(|(a, b)| Op::Peace(a, b)),
        1 => (0..5usize).prop_map(Op::Disband),
        2 => (1..40u64).prop_map(Op::Wait),
    ]
}

proptest! {
    #[test]
    fn war_graph_stays_symmetric(ops in prop::collection::vec(op(), 1..60)) {
        let (registry, clock) = registry();
        let ids = found(&registry, 5);

        for op in ops {
            match op {
                Op::War(a, b) => {
                    let _ = registry.declare_war(ids[a], ids[b]);
                }
                Op::Peace(a, b) => {
                    let _ = registry.make_peace(ids[a], ids[b]);
                }
                Op::Disband(a) => {
                    let _ = registry.disband_faction(ids[a]);
                }
                Op::Wait(minutes) => {
                    clock.advance(minutes * MINUTE);
                    registry.process_cooldowns();
                }
            }
            assert_wars_symmetric(&registry);
            for a in &ids {
                for b in &ids {
                    prop_assert_eq!(registry.are_at_war(*a, *b), registry.are_at_war(*b, *a));
                }
            }
        }
    }

    #[test]
    fn one_membership_per_actor(joins in prop::collection::vec((0..6usize, 0..3usize), 1..40)) {
        let (registry, _) = registry();
        let ids = found(&registry, 3);
        let actors: Vec<ActorId> = (0..6).map(|_| ActorId::new()).collect();

        for (actor, faction) in joins {
            let already = registry.faction_id_of(actors[actor]);
            let result = registry.join_faction(actors[actor], ids[faction]);
            match already {
                Some(existing) => prop_assert_eq!(
                    result,
                    Err(TerritoryError::AlreadyInFaction { actor: actors[actor], faction: existing })
                ),
                None => prop_assert!(result.is_ok()),
            }
        }

        let total: usize = ids.iter().map(|id| registry.members_of(*id).len()).sum();
        let joined = actors.iter().filter(|a| registry.is_in_faction(**a)).count();
        // Each faction also holds its lord
        prop_assert_eq!(total, joined + ids.len());
    }
}

#[test]
fn test_disband_leaves_no_dangling_references() {
    let (registry, _) = registry();
    let ids = found(&registry, 3);
    let member = ActorId::new();
    registry.join_faction(member, ids[0]).unwrap();
    registry.declare_war(ids[0], ids[1]).unwrap();
    registry.declare_war(ids[2], ids[0]).unwrap();

    let disbandment = registry.disband_faction(ids[0]).unwrap();
    assert_eq!(disbandment.former_enemies, vec![ids[1], ids[2]]);
    assert!(disbandment.members.contains(&member));
    assert_eq!(registry.faction_id_of(member), None);
    assert!(registry.all().iter().all(|f| f.war_declarations.is_empty()));
    assert_wars_symmetric(&registry);

    assert!(matches!(
        registry.disband_faction(ids[0]),
        Err(TerritoryError::NotFound(_))
    ));
}

#[test]
fn test_first_marshall_inherits() {
    let (registry, _) = registry();
    let lord = ActorId::new();
    let id = registry.create_faction("keep", "Keep", lord, 5000).unwrap().id;
    let first = ActorId::new();
    let second = ActorId::new();
    for m in [first, second] {
        registry.join_faction(m, id).unwrap();
    }
    registry.add_marshall(id, first).unwrap();
    registry.add_marshall(id, second).unwrap();

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
    assert_eq!(registry.faction_id_of(lord), None);
}

#[test]
fn test_war_cooldown_window() {
    let (registry, clock) = registry();
    let ids = found(&registry, 3);

    registry.declare_war(ids[0], ids[1]).unwrap();
    clock.advance(29 * MINUTE);
    assert!(matches!(
        registry.declare_war(ids[0], ids[2]),
        Err(TerritoryError::CooldownActive { remaining_ms }) if remaining_ms == MINUTE
    ));
    // Another faction is not throttled by it
    registry.declare_war(ids[1], ids[2]).unwrap();

    clock.advance(MINUTE);
    registry.declare_war(ids[0], ids[2]).unwrap();
}
