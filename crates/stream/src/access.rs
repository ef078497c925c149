use std::collections::{HashMap, HashSet};

use gridstream_common::{EntityId, Observer, ObserverId, RuntimeHandle};

use crate::backend::EntityBackend;

/// Restriction on who may use a live entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLock {
    /// Observers at or above this level.
    MinimumLevel(u32),
    /// VIP observers only.
    VipOnly,
}

impl AccessLock {
    pub fn permits(&self, observer: &Observer) -> bool {
        match self {
            AccessLock::MinimumLevel(level) => observer.level >= *level,
            AccessLock::VipOnly => observer.vip,
        }
    }
}

/// Access locks per entity, plus the usability each observer was last told
/// about for every live entity.
///
/// The usability table is explicit side state: rows go away when the entity
/// stops being live ([`AccessManager::forget_live`]), when it is deleted, or
/// when an observer leaves ([`AccessManager::retain_observers`]).
#[derive(Debug, Default)]
pub struct AccessManager {
    locks: HashMap<EntityId, AccessLock>,
    applied: HashMap<EntityId, HashMap<ObserverId, bool>>,
}

impl AccessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a minimum-level lock, returning the lock it replaced.
    pub fn restrict_to_level(&mut self, id: EntityId, minimum_level: u32) -> Option<AccessLock> {
        self.locks.insert(id, AccessLock::MinimumLevel(minimum_level))
    }

    /// Install a VIP-only lock, returning the lock it replaced.
    pub fn restrict_to_vip(&mut self, id: EntityId) -> Option<AccessLock> {
        self.locks.insert(id, AccessLock::VipOnly)
    }

    pub fn unlock(&mut self, id: EntityId) -> Option<AccessLock> {
        self.locks.remove(&id)
    }

    pub fn lock_of(&self, id: EntityId) -> Option<AccessLock> {
        self.locks.get(&id).copied()
    }

    pub fn can_access(&self, observer: &Observer, id: EntityId) -> bool {
        self.locks
            .get(&id)
            .is_none_or(|lock| lock.permits(observer))
    }

    /// Drop all bookkeeping for an entity being destroyed. Nothing is sent
    /// to the backend.
    pub fn delete(&mut self, id: EntityId) {
        self.locks.remove(&id);
        self.applied.remove(&id);
    }

    /// The entity's live handle is gone; what observers were told no longer
    /// applies.
    pub fn forget_live(&mut self, id: EntityId) {
        self.applied.remove(&id);
    }

    /// Drop usability rows for observers that are no longer present.
    pub fn retain_observers(&mut self, present: &HashSet<ObserverId>) {
        for rows in self.applied.values_mut() {
            rows.retain(|observer, _| present.contains(observer));
        }
        self.applied.retain(|_, rows| !rows.is_empty());
    }

    /// Bring the backend's per-observer usability of a live entity in line
    /// with its lock. Only changes are sent; a fresh handle is usable by
    /// everyone. Returns the number of updates sent.
    pub fn synchronize(
        &mut self,
        id: EntityId,
        handle: RuntimeHandle,
        observers: &[Observer],
        backend: &mut dyn EntityBackend,
    ) -> usize {
        let lock = self.locks.get(&id).copied();
        if lock.is_none() && !self.applied.contains_key(&id) {
            return 0;
        }

        let rows = self.applied.entry(id).or_default();
        let mut sent = 0;
        for observer in observers {
            let usable = lock.is_none_or(|lock| lock.permits(observer));
            let known = rows.get(&observer.id).copied().unwrap_or(true);
            if known != usable {
                backend.set_usable(handle, observer.id, usable);
                sent += 1;
            }
            rows.insert(observer.id, usable);
        }
        if lock.is_none() {
            self.applied.remove(&id);
        }
        sent
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
