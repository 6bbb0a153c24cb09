//! Simulation configuration: every tunable is a simple scalar, grouped by
//! subsystem, with design defaults baked into `Default` and an optional
//! JSON overlay loaded at startup.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

#[derive(Resource, Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Tiles per face axis.
    pub subdivisions: u16,
    pub tick_interval_ms: u64,
    pub save_interval_ms: u64,
    /// Seed used when no saved world is loaded.
    pub world_seed: u64,
    pub corruption: CorruptionConfig,
    pub creatures: CreatureConfig,
    pub power: PowerConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            subdivisions: 64,
            tick_interval_ms: 200,
            save_interval_ms: 30_000,
            world_seed: 42,
            corruption: CorruptionConfig::default(),
            creatures: CreatureConfig::default(),
            power: PowerConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::Parse)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Ticks between periodic persistence saves.
    pub fn save_interval_ticks(&self) -> u64 {
        (self.save_interval_ms / self.tick_interval_ms.max(1)).max(1)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse simulation config: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("failed to read simulation config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorruptionConfig {
    /// World age before the first seeding event.
    pub start_tick: u64,
    pub seed_interval: u64,
    pub spread_interval: u64,
    pub max_intensity: u8,
    /// Intensity at which a cell starts emitting hiss entities.
    pub entity_spawn_threshold: u8,
    /// Intensity at which buildings on the cell start taking damage.
    pub damage_threshold: u8,
    pub destroy_ticks: u32,
    pub beacon_radius: u16,
    pub turret_radius: u16,
    pub hiss_move_interval: u64,
    pub max_entities: usize,
}

impl Default for CorruptionConfig {
    fn default() -> Self {
        Self {
            start_tick: 500,
            seed_interval: 200,
            spread_interval: 50,
            max_intensity: 10,
            entity_spawn_threshold: 7,
            damage_threshold: 5,
            destroy_ticks: 25,
            beacon_radius: 5,
            turret_radius: 3,
            hiss_move_interval: 8,
            max_entities: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CreatureConfig {
    pub spawn_interval: u64,
    pub move_interval: u64,
    pub capture_radius: u16,
    /// Consecutive in-range ticks before a trap captures.
    pub capture_time: u32,
    pub max_wild: usize,
    pub evolution_seconds: u64,
    pub evolution_check_interval: u64,
}

impl Default for CreatureConfig {
    fn default() -> Self {
        Self {
            spawn_interval: 25,
            move_interval: 5,
            capture_radius: 3,
            capture_time: 15,
            max_wild: 200,
            evolution_seconds: 600,
            evolution_check_interval: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub resolve_interval: u64,
    /// Chebyshev reach from a generator to a feeding substation.
    pub gen_radius: u16,
    /// Chebyshev reach of a substation: links substations and powers tiles.
    pub sub_radius: u16,
    /// Chebyshev reach of a transfer station link.
    pub tx_radius: u16,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            resolve_interval: 5,
            gen_radius: 3,
            sub_radius: 4,
            tx_radius: 8,
        }
    }
}
