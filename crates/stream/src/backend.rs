//! Boundary to the host game engine.
//!
//! The streaming engine never creates or destroys live entities itself; it
//! asks an [`EntityBackend`] to. [`InMemoryBackend`] is a self-contained
//! implementation used by the CLI simulation and the test suite.

use std::collections::{BTreeMap, HashMap, HashSet};

use gridstream_common::{EntityId, EntityKind, ObserverId, RuntimeHandle};
use gridstream_kernel::StoredEntity;

/// Errors a backend may report when materializing. Always transient from the
/// streamer's point of view: the entity is simply reconsidered next tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("no capacity left for another {0}")]
    Exhausted(EntityKind),
    #[error("entity {id} rejected: {reason}")]
    Rejected { id: EntityId, reason: String },
}

/// Capabilities the host engine provides for live entities.
pub trait EntityBackend {
    /// Create the live representation of `entity` at its current position.
    fn materialize(&mut self, entity: &StoredEntity) -> Result<RuntimeHandle, BackendError>;

    /// Destroy a live representation. Always succeeds.
    fn dematerialize(&mut self, handle: RuntimeHandle);

    /// Allow or forbid `observer` to use the live entity behind `handle`.
    /// Live entities start out usable by everyone.
    fn set_usable(&mut self, handle: RuntimeHandle, observer: ObserverId, usable: bool);
}

/// Counters kept by [`InMemoryBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCounters {
    pub materialized: u64,
    pub dematerialized: u64,
    pub failed: u64,
    pub usability_updates: u64,
}

/// Backend that keeps live entities in memory.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    capacity: Option<usize>,
    next_handle: u32,
    live: BTreeMap<RuntimeHandle, EntityId>,
    usable: HashMap<(RuntimeHandle, ObserverId), bool>,
    rejected: HashSet<EntityId>,
    fail_next: usize,
    counters: BackendCounters,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that refuses to hold more than `capacity` live entities.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Make the next `count` materializations fail.
    pub fn fail_next(&mut self, count: usize) {
        self.fail_next = count;
    }

    /// Refuse to materialize `id` until [`InMemoryBackend::accept`] is called.
    pub fn reject(&mut self, id: EntityId) {
        self.rejected.insert(id);
    }

    pub fn accept(&mut self, id: EntityId) {
        self.rejected.remove(&id);
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn handle_of(&self, id: EntityId) -> Option<RuntimeHandle> {
        self.live
            .iter()
            .find(|(_, entity)| **entity == id)
            .map(|(handle, _)| *handle)
    }

    pub fn is_live(&self, id: EntityId) -> bool {
        self.handle_of(id).is_some()
    }

    /// Entities currently live, in handle order.
    pub fn live_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.live.values().copied()
    }

    pub fn is_usable(&self, handle: RuntimeHandle, observer: ObserverId) -> bool {
        self.usable.get(&(handle, observer)).copied().unwrap_or(true)
    }

    pub fn counters(&self) -> BackendCounters {
        self.counters
    }
}

impl EntityBackend for InMemoryBackend {
    fn materialize(&mut self, entity: &StoredEntity) -> Result<RuntimeHandle, BackendError> {
        let id = entity.id();
        if self.fail_next > 0 {
            self.fail_next -= 1;
            self.counters.failed += 1;
            return Err(BackendError::Rejected {
                id,
                reason: "injected failure".into(),
            });
        }
        if self.rejected.contains(&id) {
            self.counters.failed += 1;
            return Err(BackendError::Rejected {
                id,
                reason: "entity is rejected".into(),
            });
        }
        if self.capacity.is_some_and(|cap| self.live.len() >= cap) {
            self.counters.failed += 1;
            return Err(BackendError::Exhausted(entity.definition().kind()));
        }

        let handle = RuntimeHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.live.insert(handle, id);
        self.counters.materialized += 1;
        Ok(handle)
    }

    fn dematerialize(&mut self, handle: RuntimeHandle) {
        if self.live.remove(&handle).is_some() {
            self.usable.retain(|(h, _), _| *h != handle);
            self.counters.dematerialized += 1;
        }
    }

    fn set_usable(&mut self, handle: RuntimeHandle, observer: ObserverId, usable: bool) {
        if self.live.contains_key(&handle) {
            self.usable.insert((handle, observer), usable);
            self.counters.usability_updates += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use gridstream_common::{EntityDefinition, KindAttributes};
    use gridstream_kernel::EntityRegistry;

    fn registry_with(count: usize) -> (EntityRegistry, Vec<EntityId>) {
        let mut registry = EntityRegistry::new(EntityKind::Vehicle);
        let ids = (0..count)
            .map(|i| {
                registry
                    .define(EntityDefinition::new(
                        400,
                        Vec3::new(i as f32, 0.0, 0.0),
                        KindAttributes::vehicle(),
                    ))
                    .unwrap()
            })
            .collect();
        (registry, ids)
    }

    #[test]
    fn materialize_and_dematerialize() {
        let (registry, ids) = registry_with(1);
        let mut backend = InMemoryBackend::new();
        let handle = backend.materialize(registry.get(ids[0]).unwrap()).unwrap();
        assert!(backend.is_live(ids[0]));
        assert_eq!(backend.handle_of(ids[0]), Some(handle));

        backend.dematerialize(handle);
        assert_eq!(backend.live_count(), 0);
        assert_eq!(backend.counters().materialized, 1);
        assert_eq!(backend.counters().dematerialized, 1);
    }

    #[test]
    fn capacity_exhaustion_is_reported() {
        let (registry, ids) = registry_with(2);
        let mut backend = InMemoryBackend::with_capacity(1);
        backend.materialize(registry.get(ids[0]).unwrap()).unwrap();
        let err = backend.materialize(registry.get(ids[1]).unwrap()).unwrap_err();
        assert_eq!(err, BackendError::Exhausted(EntityKind::Vehicle));
        assert_eq!(backend.counters().failed, 1);
    }

    #[test]
    fn injected_failures_run_out() {
        let (registry, ids) = registry_with(1);
        let entity = registry.get(ids[0]).unwrap();
        let mut backend = InMemoryBackend::new();
        backend.fail_next(1);
        assert!(backend.materialize(entity).is_err());
        assert!(backend.materialize(entity).is_ok());
    }

    #[test]
    fn rejected_entities_fail_until_accepted() {
        let (registry, ids) = registry_with(1);
        let entity = registry.get(ids[0]).unwrap();
        let mut backend = InMemoryBackend::new();
        backend.reject(ids[0]);
        assert!(backend.materialize(entity).is_err());
        backend.accept(ids[0]);
        assert!(backend.materialize(entity).is_ok());
    }

    #[test]
    fn usability_defaults_to_true_and_clears_on_destroy() {
        let (registry, ids) = registry_with(1);
        let mut backend = InMemoryBackend::new();
        let handle = backend.materialize(registry.get(ids[0]).unwrap()).unwrap();
        let observer = ObserverId(3);
        assert!(backend.is_usable(handle, observer));
        backend.set_usable(handle, observer, false);
        assert!(!backend.is_usable(handle, observer));
        backend.dematerialize(handle);
        assert!(backend.is_usable(handle, observer));
    }
}
