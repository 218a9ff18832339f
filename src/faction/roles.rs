//! Per-member capability set and the permission queries over it

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Roles an actor holds inside their faction
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Roles: u8 {
        const LORD = 1 << 0;
        const MARSHALL = 1 << 1;
        const DOOR_MANAGER = 1 << 2;
        const CHEST_MANAGER = 1 << 3;
    }
}

/// A role that can be granted or revoked independently of lordship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantableRole {
    Marshall,
    DoorManager,
    ChestManager,
}

impl GrantableRole {
    pub fn as_roles(self) -> Roles {
        match self {
            GrantableRole::Marshall => Roles::MARSHALL,
            GrantableRole::DoorManager => Roles::DOOR_MANAGER,
            GrantableRole::ChestManager => Roles::CHEST_MANAGER,
        }
    }
}

impl Roles {
    /// Lord or marshall
    pub fn has_management(self) -> bool {
        self.intersects(Roles::LORD | Roles::MARSHALL)
    }

    pub fn can_manage_doors(self) -> bool {
        self.has_management() || self.contains(Roles::DOOR_MANAGER)
    }

    pub fn can_manage_chests(self) -> bool {
        self.has_management() || self.contains(Roles::CHEST_MANAGER)
    }
}
