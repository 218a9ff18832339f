pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LiveConfig, TerritoryConfig};
pub use error::{Result, Subject, SystemError, TerritoryError};
pub use types::{ActorId, FactionId, FlagId, Timestamp, WorldPos};
