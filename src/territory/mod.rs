//! Territory: flags, capture sessions and the engine that evaluates them

pub mod engine;
pub mod flag;
pub mod session;

pub use engine::CaptureEngine;
pub use flag::{Flag, FlagInfo};
pub use session::{CancelReason, CaptureRecord, CaptureSession, TickReport};
