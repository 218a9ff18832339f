//! Territory configuration with documented defaults
//!
//! All tunable numbers are collected here. Values are read through
//! [`LiveConfig::get`] once per operation, so a reload is picked up by the
//! very next request or tick.

use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::core::error::SystemError;

/// Complete configuration, one section per subsystem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerritoryConfig {
    pub factions: FactionSettings,
    pub flags: FlagSettings,
    pub schedule: ScheduleSettings,
}

/// Faction lifecycle and diplomacy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactionSettings {
    /// Gold the founder must have paid before a faction is created
    pub creation_cost: u64,

    /// Minutes a faction must wait between two war declarations
    pub war_declare_timeout_minutes: u64,

    /// Minutes a faction must wait between two peace declarations
    ///
    /// Tracked separately from the war cooldown, keyed by the initiator.
    pub peace_declare_timeout_minutes: u64,

    /// Inclusive bounds on the unique faction name, in characters
    pub name_min_len: usize,
    pub name_max_len: usize,

    /// Upper bound on the free-form display name
    pub display_name_max_len: usize,
}

impl Default for FactionSettings {
    fn default() -> Self {
        Self {
            creation_cost: 5000,
            war_declare_timeout_minutes: 30,
            peace_declare_timeout_minutes: 30,
            name_min_len: 3,
            name_max_len: 16,
            display_name_max_len: 32,
        }
    }
}

impl FactionSettings {
    pub fn war_timeout_ms(&self) -> u64 {
        self.war_declare_timeout_minutes.saturating_mul(60 * 1000)
    }

    pub fn peace_timeout_ms(&self) -> u64 {
        self.peace_declare_timeout_minutes.saturating_mul(60 * 1000)
    }
}

/// Flag placement and capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagSettings {
    /// Seconds an actor must wait after a completed capture before starting another
    pub capture_cooldown_secs: u64,

    /// Item an actor must hold to start a capture
    pub capture_item: String,

    /// Radius given to newly created flags (world units)
    pub default_capture_radius: f64,

    /// Seconds of uninterrupted presence needed to capture a new flag
    pub default_capture_duration_secs: u64,

    /// Inclusive bounds on flag names, in characters
    pub name_min_len: usize,
    pub name_max_len: usize,
}

impl Default for FlagSettings {
    fn default() -> Self {
        Self {
            capture_cooldown_secs: 60,
            capture_item: "BANNER".to_string(),
            default_capture_radius: 3.0,
            default_capture_duration_secs: 10,
            name_min_len: 3,
            name_max_len: 32,
        }
    }
}

impl FlagSettings {
    pub fn capture_cooldown_ms(&self) -> u64 {
        self.capture_cooldown_secs.saturating_mul(1000)
    }
}

/// Periods of the background jobs, in logical milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Capture session evaluation period
    pub capture_tick_ms: u64,

    /// Cooldown housekeeping period
    pub cooldown_sweep_ms: u64,

    /// Write-behind checkpoint period
    ///
    /// This bounds the data-loss window after a crash.
    pub checkpoint_ms: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            capture_tick_ms: 1000,
            cooldown_sweep_ms: 60_000,
            checkpoint_ms: 1000,
        }
    }
}

impl TerritoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(content: &str) -> Result<Self, SystemError> {
        let config: Self = toml::from_str(content)?;
        config.validate().map_err(SystemError::InvalidConfig)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, SystemError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<(), String> {
        let f = &self.factions;
        if f.name_min_len == 0 || f.name_min_len > f.name_max_len {
            return Err(format!(
                "faction name bounds ({}..={}) are empty",
                f.name_min_len, f.name_max_len
            ));
        }

        let g = &self.flags;
        if g.name_min_len == 0 || g.name_min_len > g.name_max_len {
            return Err(format!(
                "flag name bounds ({}..={}) are empty",
                g.name_min_len, g.name_max_len
            ));
        }
        if g.default_capture_radius <= 0.0 {
            return Err("default_capture_radius must be positive".into());
        }
        if g.default_capture_duration_secs == 0 {
            return Err("default_capture_duration_secs must be positive".into());
        }
        if g.capture_item.trim().is_empty() {
            return Err("capture_item must not be empty".into());
        }

        let s = &self.schedule;
        if s.capture_tick_ms == 0 || s.cooldown_sweep_ms == 0 || s.checkpoint_ms == 0 {
            return Err("schedule periods must be positive".into());
        }

        Ok(())
    }
}

/// Shared, replaceable configuration
#[derive(Debug, Default)]
pub struct LiveConfig {
    current: RwLock<TerritoryConfig>,
}

impl LiveConfig {
    pub fn new(config: TerritoryConfig) -> Self {
        Self {
            current: RwLock::new(config),
        }
    }

    /// Snapshot of the current settings
    pub fn get(&self) -> TerritoryConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in new settings after validating them
    pub fn replace(&self, config: TerritoryConfig) -> Result<(), SystemError> {
        config.validate().map_err(SystemError::InvalidConfig)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = config;
        tracing::info!("Configuration replaced");
        Ok(())
    }

    /// Re-read a TOML file and swap it in
    pub fn reload(&self, path: &Path) -> Result<(), SystemError> {
        self.replace(TerritoryConfig::load(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TerritoryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.factions.creation_cost, 5000);
        assert_eq!(config.factions.war_timeout_ms(), 30 * 60 * 1000);
        assert_eq!(config.flags.capture_cooldown_ms(), 60_000);
    }

    #[test]
    fn test_huge_timeouts_saturate() {
        let mut config = TerritoryConfig::default();
        config.factions.war_declare_timeout_minutes = u64::MAX;
        config.factions.peace_declare_timeout_minutes = u64::MAX / 1000;
        config.flags.capture_cooldown_secs = u64::MAX;
        assert!(config.validate().is_ok());
        assert_eq!(config.factions.war_timeout_ms(), u64::MAX);
        assert_eq!(config.factions.peace_timeout_ms(), u64::MAX);
        assert_eq!(config.flags.capture_cooldown_ms(), u64::MAX);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TerritoryConfig::from_toml_str(
            r#"
            [factions]
            war_declare_timeout_minutes = 5

            [flags]
            capture_item = "WHITE_BANNER"
            "#,
        )
        .unwrap();

        assert_eq!(config.factions.war_declare_timeout_minutes, 5);
        assert_eq!(config.factions.peace_declare_timeout_minutes, 30);
        assert_eq!(config.flags.capture_item, "WHITE_BANNER");
        assert_eq!(config.schedule.capture_tick_ms, 1000);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = TerritoryConfig::from_toml_str("[schedule]\ncapture_tick_ms = 0\n");
        assert!(matches!(result, Err(SystemError::InvalidConfig(_))));
    }

    #[test]
    fn test_live_config_replace_is_observed() {
        let live = LiveConfig::new(TerritoryConfig::default());
        let mut next = live.get();
        next.flags.capture_cooldown_secs = 5;
        live.replace(next).unwrap();
        assert_eq!(live.get().flags.capture_cooldown_secs, 5);
    }

    #[test]
    fn test_live_config_rejects_invalid_replacement() {
        let live = LiveConfig::new(TerritoryConfig::default());
        let mut bad = live.get();
        bad.flags.default_capture_radius = -1.0;
        assert!(live.replace(bad).is_err());
        assert_eq!(live.get().flags.default_capture_radius, 3.0);
    }
}
