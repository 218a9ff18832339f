//! Factions: membership, roles, diplomacy and their cooldowns

pub mod cooldown;
#[allow(clippy::module_inception)]
pub mod faction;
pub mod registry;
pub mod roles;

pub use cooldown::CooldownTable;
pub use faction::Faction;
pub use registry::{Departure, Disbandment, FactionRegistry, Standing};
pub use roles::{GrantableRole, Roles};
