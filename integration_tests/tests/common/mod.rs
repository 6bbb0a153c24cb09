use bevy::prelude::App;

use core_sim::SimulationConfig;

/// A small, fast world for end-to-end runs.
pub fn small_config() -> SimulationConfig {
    SimulationConfig {
        subdivisions: 8,
        ..SimulationConfig::default()
    }
}

pub fn small_app() -> App {
    core_sim::build_headless_app(small_config())
}
