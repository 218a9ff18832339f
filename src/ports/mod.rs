//! Capabilities the engine consumes from its host

pub mod json_store;
pub mod notify;
pub mod sense;
pub mod store;

pub use json_store::JsonStore;
pub use notify::{Notice, Notifier, RecordingNotifier, TracingNotifier};
pub use sense::{ActorSense, Roster};
pub use store::{MemoryStore, PlayerRecord, Store, StoreError};
