//! Territory Control - faction diplomacy and flag capture for a persistent world

pub mod core;
pub mod faction;
pub mod ports;
pub mod scheduler;
pub mod service;
pub mod territory;
