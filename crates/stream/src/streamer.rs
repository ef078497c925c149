use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use glam::Vec3;
use gridstream_common::{EntityDefinition, EntityId, EntityKind, Observer, ObserverId};
use gridstream_kernel::{EntityRegistry, StoredEntity};

use crate::access::AccessManager;
use crate::backend::EntityBackend;
use crate::budget::StreamStats;
use crate::config::{ConfigError, StreamerConfig};
use crate::error::StreamError;
use crate::grid::SpatialGrid;
use crate::observer::ObserverSource;
use crate::respawn::RespawnManager;
use crate::scheduler::{DisposeToken, Streamer};
use crate::selection::{SelectionContext, SelectionManager};

/// Streams the entities of one kind through a backend.
///
/// Owns every piece of per-kind state. All mutation goes through this type so
/// the registry, grid, respawn queue and access tables never disagree about
/// an entity.
pub struct EntityStreamer<B> {
    name: String,
    config: StreamerConfig,
    registry: EntityRegistry,
    grid: SpatialGrid,
    access: AccessManager,
    respawn: RespawnManager,
    selection: SelectionManager,
    backend: B,
    observers: Rc<dyn ObserverSource>,
    last_observers: Vec<Observer>,
    token: DisposeToken,
    stats: StreamStats,
}

impl<B: EntityBackend> EntityStreamer<B> {
    pub fn new(
        config: StreamerConfig,
        backend: B,
        observers: Rc<dyn ObserverSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let token = DisposeToken::new();
        Ok(Self {
            name: format!("{}-streamer", config.kind),
            registry: EntityRegistry::new(config.kind),
            grid: SpatialGrid::new(config.cell_size(), config.min_bound, config.max_bound),
            access: AccessManager::new(),
            respawn: RespawnManager::new(config.ephemeral_delay(), config.persistent_delay()),
            selection: SelectionManager::new(&config, token.clone()),
            backend,
            observers,
            last_observers: Vec::new(),
            token,
            stats: StreamStats::default(),
            config,
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.config.kind
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// Register a new entity. World-bound entities are indexed right away;
    /// ones inside an interior are kept but never streamed.
    pub fn define(&mut self, definition: EntityDefinition) -> Result<EntityId, StreamError> {
        self.ensure_open()?;
        let position = definition.position;
        let interior_id = definition.interior_id;
        let world_bound = definition.is_world_bound();
        let id = self.registry.define(definition)?;

        if world_bound {
            if let Err(error) = self.grid.insert(id, position, interior_id) {
                self.registry.remove(id)?;
                return Err(error.into());
            }
        }
        tracing::debug!(entity = %id, kind = %self.config.kind, world_bound, "entity defined");
        Ok(id)
    }

    /// Destroy an entity and all bookkeeping about it.
    pub fn remove(&mut self, id: EntityId) -> Result<StoredEntity, StreamError> {
        let mut entity = self.registry.remove(id)?;
        if let Some(handle) = entity.take_live_handle() {
            self.backend.dematerialize(handle);
        }
        self.grid.remove(id);
        self.respawn.cancel(id);
        self.access.delete(id);
        tracing::debug!(entity = %id, "entity removed");
        Ok(entity)
    }

    pub fn restrict_to_level(&mut self, id: EntityId, minimum_level: u32) -> Result<(), StreamError> {
        self.registry.get(id)?;
        self.access.restrict_to_level(id, minimum_level);
        self.synchronize(id)
    }

    pub fn restrict_to_vip(&mut self, id: EntityId) -> Result<(), StreamError> {
        self.registry.get(id)?;
        self.access.restrict_to_vip(id);
        self.synchronize(id)
    }

    pub fn unlock(&mut self, id: EntityId) -> Result<(), StreamError> {
        self.registry.get(id)?;
        self.access.unlock(id);
        self.synchronize(id)
    }

    pub fn can_access(&self, observer: &Observer, id: EntityId) -> bool {
        self.access.can_access(observer, id)
    }

    fn synchronize(&mut self, id: EntityId) -> Result<(), StreamError> {
        if let Some(handle) = self.registry.get(id)?.live_handle() {
            self.access
                .synchronize(id, handle, &self.last_observers, &mut self.backend);
        }
        Ok(())
    }

    /// Take a reference on a live entity. Returns the new count.
    pub fn acquire(&mut self, id: EntityId) -> Result<u32, StreamError> {
        let entity = self.registry.get_mut(id)?;
        if !entity.is_live() {
            return Err(StreamError::NotLive(id));
        }
        Ok(entity.acquire())
    }

    /// Drop a reference. Returns the remaining count.
    pub fn release(&mut self, id: EntityId) -> Result<u32, StreamError> {
        Ok(self.registry.get_mut(id)?.release()?)
    }

    /// Follow a live entity that a holder has moved.
    pub fn report_position(&mut self, id: EntityId, position: Vec3) -> Result<(), StreamError> {
        let entity = self.registry.get(id)?;
        if !entity.is_live() {
            return Err(StreamError::NotLive(id));
        }
        if self.grid.contains(id) {
            self.grid.relocate(id, position)?;
        }
        self.registry.get_mut(id)?.set_position(position);
        Ok(())
    }

    /// Take an unused entity out of the world now and queue it to come back
    /// at its defined pose. Returns when it is due.
    pub fn respawn(&mut self, id: EntityId, now: Duration) -> Result<Duration, StreamError> {
        self.ensure_open()?;
        let entity = self.registry.get_mut(id)?;
        if entity.ref_count() > 0 {
            return Err(StreamError::InUse {
                id,
                ref_count: entity.ref_count(),
            });
        }
        if let Some(handle) = entity.take_live_handle() {
            self.backend.dematerialize(handle);
            self.access.forget_live(id);
        }
        let due = self.respawn.enqueue(entity, now)?;
        self.grid.remove(id);
        entity.clear_respawn_mark();
        Ok(due)
    }

    /// Number of defined entities.
    pub fn count(&self) -> usize {
        self.registry.len()
    }

    pub fn live_count(&self) -> usize {
        self.registry.iter().filter(|e| e.is_live()).count()
    }

    pub fn has(&self, id: EntityId) -> bool {
        self.registry.contains(id)
    }

    pub fn is_live(&self, id: EntityId) -> bool {
        self.registry.get(id).is_ok_and(StoredEntity::is_live)
    }

    pub fn is_respawn_queued(&self, id: EntityId) -> bool {
        self.respawn.has(id)
    }

    /// Entities waiting to be put back at their defined pose.
    pub fn pending_respawns(&self) -> usize {
        self.respawn.len()
    }

    pub fn get(&self, id: EntityId) -> Result<&StoredEntity, StreamError> {
        Ok(self.registry.get(id)?)
    }

    /// Statistics of the last pass.
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_disposed()
    }

    /// Shut down: every live entity is dematerialized and later ticks do
    /// nothing. Definitions stay registered.
    pub fn dispose(&mut self) {
        if self.token.is_disposed() {
            return;
        }
        self.token.dispose();
        let mut released = 0usize;
        for entity in self.registry.iter_mut() {
            if let Some(handle) = entity.take_live_handle() {
                self.backend.dematerialize(handle);
                self.access.forget_live(entity.id());
                released += 1;
            }
        }
        tracing::info!(streamer = %self.name, released, "streamer disposed");
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        if self.token.is_disposed() {
            return Err(StreamError::Disposed);
        }
        Ok(())
    }

    // Put due entities back at their defined pose.
    fn drain_respawns(&mut self, now: Duration) -> Result<usize, StreamError> {
        let due = self.respawn.drain_due(now);
        let drained = due.len();
        for id in due {
            let Ok(entity) = self.registry.get_mut(id) else {
                continue;
            };
            entity.reset_position();
            let definition = entity.definition();
            if definition.is_world_bound() {
                self.grid
                    .insert(id, definition.position, definition.interior_id)?;
            }
            tracing::debug!(entity = %id, "entity respawned");
        }
        Ok(drained)
    }
}

impl<B: EntityBackend> Streamer for EntityStreamer<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_entities(&self) -> bool {
        !self.registry.is_empty()
    }

    fn tick(&mut self, now: Duration) -> Result<(), StreamError> {
        if self.token.is_disposed() {
            return Ok(());
        }
        let _span = tracing::info_span!("stream_pass", streamer = %self.name).entered();

        self.last_observers = self.observers.snapshot();
        let present: HashSet<ObserverId> = self.last_observers.iter().map(|o| o.id).collect();
        self.access.retain_observers(&present);

        let drained = self.drain_respawns(now)?;
        let mut stats = self.selection.select(SelectionContext {
            registry: &mut self.registry,
            grid: &mut self.grid,
            access: &mut self.access,
            respawn: &mut self.respawn,
            backend: &mut self.backend,
            observers: &self.last_observers,
            now,
        })?;
        stats.respawns_drained = drained;
        self.stats = stats;
        Ok(())
    }
}
