use thiserror::Error;

use crate::core::types::{ActorId, FactionId, FlagId};

/// Validation failures returned to the command layer.
///
/// None of these are fatal; they describe why a request was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerritoryError {
    #[error("{0} not found")]
    NotFound(Subject),

    #[error("name '{0}' is already taken")]
    NameTaken(String),

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("actor {actor} already belongs to {faction}")]
    AlreadyInFaction { actor: ActorId, faction: FactionId },

    #[error("actor {0} is not in the expected faction")]
    NotInFaction(ActorId),

    #[error("creation costs {required} but only {paid} was paid")]
    InsufficientFunds { required: u64, paid: u64 },

    #[error("cooldown active for another {remaining_ms}ms")]
    CooldownActive { remaining_ms: u64 },

    #[error("{0} and {1} are not at war")]
    NotAtWar(FactionId, FactionId),

    #[error("{flag} is already owned by {faction}")]
    AlreadyOwned { flag: FlagId, faction: FactionId },

    #[error("actor {0} does not belong to a faction")]
    NoFaction(ActorId),

    #[error("actor {actor} is out of range of {flag}")]
    OutOfRange { actor: ActorId, flag: FlagId },

    #[error("actor {0} is already capturing a flag")]
    AlreadyCapturing(ActorId),

    #[error("actor {0} does not hold the required item '{1}'")]
    MissingItem(ActorId, String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

/// What a [`TerritoryError::NotFound`] was looking for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Faction(FactionId),
    FactionNamed(String),
    Flag(FlagId),
    FlagNamed(String),
    Actor(ActorId),
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Faction(id) => write!(f, "{}", id),
            Subject::FactionNamed(name) => write!(f, "faction '{}'", name),
            Subject::Flag(id) => write!(f, "{}", id),
            Subject::FlagNamed(name) => write!(f, "flag '{}'", name),
            Subject::Actor(id) => write!(f, "actor {}", id),
        }
    }
}

pub type Result<T> = std::result::Result<T, TerritoryError>;

/// Startup and infrastructure failures (configuration, storage)
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    StoreError(#[from] crate::ports::store::StoreError),
}
