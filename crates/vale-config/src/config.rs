//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Tick scheduler and watchdog settings.
    pub tick: TickConfig,
    /// Character persistence settings.
    pub save: SaveConfig,
    /// Gameplay tuning constants.
    pub gameplay: GameplayConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Tick scheduler and watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TickConfig {
    /// Simulation tick rate (Hz).
    pub rate_hz: u32,
    /// Seconds between watchdog health checks.
    pub watchdog_interval_secs: u64,
    /// Worker is considered stalled once its last iteration started this
    /// many milliseconds ago.
    pub stale_after_ms: u64,
}

/// Character persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SaveConfig {
    /// Seconds between automatic saves of each online character.
    pub autosave_interval_secs: u64,
}

/// Gameplay tuning constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GameplayConfig {
    /// Upper bound every primary stat is clamped to.
    pub stat_cap: i32,
    /// Maximum gold a character may carry.
    pub max_carry_gold: u32,
    /// Cooldown (milliseconds) applied to abilities with no cooldown of
    /// their own.
    pub base_ability_delay_ms: u64,
    /// Maximum tile distance at which a ground item can be click-looted.
    pub click_loot_distance: f64,
    /// Maximum tile distance at which a drop may be placed.
    pub drop_distance: f64,
    /// Carry weight granted per point of strength.
    pub weight_per_str: i32,
    /// Map new characters start on.
    pub starting_map: u32,
    /// Map dead characters are sent to.
    pub death_map: u32,
    /// Message sent to a session whose character record fails sanity checks.
    pub corrupt_save_message: String,
    /// Message shown when a skulled character is reaped.
    pub reap_message: String,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log every tick phase duration at trace level.
    pub trace_tick_phases: bool,
}

// --- Default implementations ---

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30,
            watchdog_interval_secs: 5,
            stale_after_ms: 1000,
        }
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            autosave_interval_secs: 120,
        }
    }
}

impl Default for GameplayConfig {
    fn default() -> Self {
        Self {
            stat_cap: 255,
            max_carry_gold: 1_000_000,
            base_ability_delay_ms: 900,
            click_loot_distance: 2.0,
            drop_distance: 9.0,
            weight_per_str: 10,
            starting_map: 1,
            death_map: 85,
            corrupt_save_message: "Your character record is corrupt. Contact an administrator."
                .to_string(),
            reap_message: "Your soul has been claimed.".to_string(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            trace_tick_phases: false,
        }
    }
}

// --- Load / Save / Reload ---

impl ServerConfig {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("server.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: ServerConfig = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = ServerConfig::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `server.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("server.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("server.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: ServerConfig =
            ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Tick interval derived from the configured rate.
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.tick.rate_hz.max(1)))
    }
}
