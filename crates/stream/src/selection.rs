//! Per-tick choice of which entities are live.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use gridstream_common::{EntityId, Observer, WORLD_INTERIOR};
use gridstream_kernel::{EntityRegistry, StoredEntity};

use crate::access::AccessManager;
use crate::backend::EntityBackend;
use crate::budget::StreamStats;
use crate::config::StreamerConfig;
use crate::error::StreamError;
use crate::grid::{CellCoord, SpatialGrid};
use crate::respawn::RespawnManager;
use crate::scheduler::DisposeToken;

/// An entity considered for this pass, with its distance to the nearest
/// observer in the same virtual world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: EntityId,
    pub distance: f32,
    pub sequence: u64,
}

/// Everything one selection pass reads or changes.
pub struct SelectionContext<'a> {
    pub registry: &'a mut EntityRegistry,
    pub grid: &'a mut SpatialGrid,
    pub access: &'a mut AccessManager,
    pub respawn: &'a mut RespawnManager,
    pub backend: &'a mut dyn EntityBackend,
    pub observers: &'a [Observer],
    pub now: Duration,
}

/// Chooses the live set of one streamer.
///
/// Entities held by someone (non-zero reference count) stay live no matter
/// what and take their budget slots first. The remaining slots go to the
/// nearest candidates, ties broken by registration order. Everything else
/// that is live gets dematerialized before anything new is materialized, so
/// the live count never exceeds the budget during a pass.
#[derive(Debug)]
pub struct SelectionManager {
    max_visible: usize,
    streaming_distance: f32,
    cell_radius: i32,
    token: DisposeToken,
}

impl SelectionManager {
    pub fn new(config: &StreamerConfig, token: DisposeToken) -> Self {
        Self {
            max_visible: config.max_visible,
            streaming_distance: config.streaming_distance,
            cell_radius: config.cell_radius(),
            token,
        }
    }

    pub fn max_visible(&self) -> usize {
        self.max_visible
    }

    pub fn streaming_distance(&self) -> f32 {
        self.streaming_distance
    }

    /// Candidates around `observers`, nearest first.
    ///
    /// Observers outside the world interior see nothing. Observers sharing a
    /// grid cell and virtual world share one grid query. Persistent entities
    /// found by a query are candidates even beyond the streaming distance.
    pub fn rank(
        &self,
        registry: &EntityRegistry,
        grid: &SpatialGrid,
        observers: &[Observer],
    ) -> Result<Vec<Candidate>, StreamError> {
        let mut regions: HashMap<(CellCoord, u32), Vec<&Observer>> = HashMap::new();
        for observer in observers.iter().filter(|o| o.interior_id == WORLD_INTERIOR) {
            let cell = grid.position_to_cell(observer.position);
            regions
                .entry((cell, observer.virtual_world_id))
                .or_default()
                .push(observer);
        }

        let mut nearest: HashMap<EntityId, Candidate> = HashMap::new();
        for ((_, world), members) in &regions {
            let center = members[0].position;
            for id in grid.query(center, self.cell_radius) {
                let entity = registry.get(id)?;
                let definition = entity.definition();
                if definition.virtual_world_id != *world {
                    continue;
                }
                let position = entity.position();
                let distance = members
                    .iter()
                    .map(|o| o.position.distance(position))
                    .fold(f32::INFINITY, f32::min);
                if distance > self.streaming_distance && !definition.persistent {
                    continue;
                }
                nearest
                    .entry(id)
                    .and_modify(|c| c.distance = c.distance.min(distance))
                    .or_insert(Candidate {
                        id,
                        distance,
                        sequence: entity.sequence(),
                    });
            }
        }

        let mut ranked: Vec<Candidate> = nearest.into_values().collect();
        ranked.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.sequence.cmp(&b.sequence))
        });
        Ok(ranked)
    }

    /// Run one selection pass.
    pub fn select(&self, ctx: SelectionContext<'_>) -> Result<StreamStats, StreamError> {
        let started = Instant::now();
        let SelectionContext {
            registry,
            grid,
            access,
            respawn,
            backend,
            observers,
            now,
        } = ctx;

        if self.token.is_disposed() {
            return Ok(StreamStats::default());
        }

        let ranked = self.rank(registry, grid, observers)?;
        let pinned: HashSet<EntityId> = registry
            .iter()
            .filter(|e| e.is_live() && e.ref_count() > 0)
            .map(StoredEntity::id)
            .collect();
        let room = self.max_visible.saturating_sub(pinned.len());
        let chosen: Vec<EntityId> = ranked
            .iter()
            .map(|c| c.id)
            .filter(|id| !pinned.contains(id))
            .take(room)
            .collect();
        let selected: HashSet<EntityId> = pinned.iter().chain(chosen.iter()).copied().collect();

        let mut stats = StreamStats {
            candidates: ranked.len(),
            selected: selected.len(),
            pinned: pinned.len(),
            ..StreamStats::default()
        };

        let evicted: Vec<EntityId> = registry
            .iter()
            .filter(|e| e.is_live() && !selected.contains(&e.id()))
            .map(StoredEntity::id)
            .collect();
        for id in evicted {
            let entity = registry.get_mut(id)?;
            stats.dematerialized += 1;
            if retire(entity, grid, access, respawn, backend, now)? {
                stats.respawns_queued += 1;
            }
        }

        if self.token.is_disposed() {
            stats.live = live_count(registry);
            stats.pass_time = started.elapsed();
            return Ok(stats);
        }

        for id in chosen {
            let entity = registry.get_mut(id)?;
            if entity.is_live() {
                continue;
            }
            match backend.materialize(entity) {
                Ok(handle) => {
                    entity.set_live_handle(handle);
                    stats.materialized += 1;
                }
                Err(error) => {
                    stats.failed += 1;
                    tracing::warn!(entity = %id, %error, "materialization failed");
                }
            }
        }

        for entity in registry.iter().filter(|e| e.is_live()) {
            if let Some(handle) = entity.live_handle() {
                access.synchronize(entity.id(), handle, observers, backend);
            }
        }

        stats.live = live_count(registry);
        stats.pass_time = started.elapsed();
        tracing::trace!(
            candidates = stats.candidates,
            live = stats.live,
            materialized = stats.materialized,
            dematerialized = stats.dematerialized,
            "selection pass"
        );
        Ok(stats)
    }
}

/// Take an entity out of the backend. If it was used since its last respawn
/// it also leaves the grid and is queued to come back at its defined pose.
/// Returns whether a respawn was queued.
pub(crate) fn retire(
    entity: &mut StoredEntity,
    grid: &mut SpatialGrid,
    access: &mut AccessManager,
    respawn: &mut RespawnManager,
    backend: &mut dyn EntityBackend,
    now: Duration,
) -> Result<bool, StreamError> {
    let id = entity.id();
    if let Some(handle) = entity.take_live_handle() {
        backend.dematerialize(handle);
        access.forget_live(id);
    }
    if !entity.needs_respawn() {
        return Ok(false);
    }
    respawn.enqueue(entity, now)?;
    grid.remove(id);
    entity.clear_respawn_mark();
    Ok(true)
}

fn live_count(registry: &EntityRegistry) -> usize {
    registry.iter().filter(|e| e.is_live()).count()
}
