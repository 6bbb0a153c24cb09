//! Telemetry collected at the end of every tick, plus the soft-deadline
//! watchdog.

use std::time::Instant;

use bevy::prelude::*;

use crate::config::SimulationConfig;
use crate::corruption::CorruptionField;
use crate::creatures::CreatureLedger;
use crate::power::PowerGrid;
use crate::store::SpatialStore;
use crate::systems::SimulationTick;

#[derive(Resource, Default, Debug, Clone)]
pub struct SimulationMetrics {
    pub tick: u64,
    pub buildings: usize,
    pub wild_creatures: usize,
    pub corruption_cells: usize,
    pub hiss_entities: usize,
    pub power_networks: usize,
    pub last_tick_ms: f32,
    pub overruns: u64,
}

/// Wall-clock stamp taken at the top of the tick so the watchdog can
/// measure the full pipeline.
#[derive(Resource, Debug, Default)]
pub struct TickTimer {
    started: Option<Instant>,
}

pub fn begin_tick_timer(mut timer: ResMut<TickTimer>) {
    timer.started = Some(Instant::now());
}

pub fn collect_metrics(
    mut metrics: ResMut<SimulationMetrics>,
    mut timer: ResMut<TickTimer>,
    config: Res<SimulationConfig>,
    tick: Res<SimulationTick>,
    store: Res<SpatialStore>,
    ledger: Res<CreatureLedger>,
    field: Res<CorruptionField>,
    grid: Res<PowerGrid>,
) {
    metrics.tick = tick.0;
    metrics.buildings = store.building_count();
    metrics.wild_creatures = ledger.wild_count();
    metrics.corruption_cells = field.cell_count();
    metrics.hiss_entities = field.entity_count();
    metrics.power_networks = grid.network_count();

    if let Some(started) = timer.started.take() {
        let elapsed_ms = started.elapsed().as_secs_f32() * 1_000.0;
        metrics.last_tick_ms = elapsed_ms;
        // Overruns are logged, never skipped: the next tick starts late
        // rather than dropping phases.
        if elapsed_ms > config.tick_interval_ms as f32 {
            metrics.overruns += 1;
            tracing::warn!(
                tick = tick.0,
                elapsed_ms,
                interval_ms = config.tick_interval_ms,
                "tick overran its interval"
            );
        }
    }
}
