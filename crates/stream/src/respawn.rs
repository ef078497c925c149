use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use gridstream_common::EntityId;
use gridstream_kernel::StoredEntity;

use crate::queue::PriorityQueue;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RespawnError {
    #[error("entity {0} already has a pending respawn")]
    AlreadyQueued(EntityId),
    #[error("respawn of entity {0} would be due past the end of the clock")]
    DueOverflow(EntityId),
}

/// A pending respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespawnEntry {
    pub entity: EntityId,
    pub due: Duration,
}

// Earliest due time has the highest priority.
fn earliest_first(a: &RespawnEntry, b: &RespawnEntry) -> Ordering {
    b.due.cmp(&a.due)
}

/// Time-ordered queue of entities waiting to be put back at their defined
/// pose.
///
/// Ephemeral entities wait a fixed, short delay; persistent entities wait
/// their own configured delay, or the manager's persistent default.
#[derive(Debug)]
pub struct RespawnManager {
    ephemeral_delay: Duration,
    persistent_delay: Duration,
    queue: PriorityQueue<RespawnEntry>,
    pending: HashMap<EntityId, RespawnEntry>,
}

impl RespawnManager {
    pub fn new(ephemeral_delay: Duration, persistent_delay: Duration) -> Self {
        Self {
            ephemeral_delay,
            persistent_delay,
            queue: PriorityQueue::with_comparator(
                earliest_first as fn(&RespawnEntry, &RespawnEntry) -> Ordering,
            ),
            pending: HashMap::new(),
        }
    }

    pub fn ephemeral_delay(&self) -> Duration {
        self.ephemeral_delay
    }

    /// Delay that applies to `entity` once it is taken out of the world.
    pub fn delay_for(&self, entity: &StoredEntity) -> Duration {
        let definition = entity.definition();
        if !definition.persistent {
            return self.ephemeral_delay;
        }
        definition
            .respawn_delay_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(self.persistent_delay)
    }

    /// Queue `entity` for respawn, counting its delay from `now`. Returns the
    /// due time. An entity may only be queued once at a time.
    pub fn enqueue(
        &mut self,
        entity: &StoredEntity,
        now: Duration,
    ) -> Result<Duration, RespawnError> {
        let id = entity.id();
        if self.pending.contains_key(&id) {
            return Err(RespawnError::AlreadyQueued(id));
        }
        let due = now
            .checked_add(self.delay_for(entity))
            .ok_or(RespawnError::DueOverflow(id))?;
        let entry = RespawnEntry { entity: id, due };
        self.queue.push(entry);
        self.pending.insert(id, entry);
        tracing::debug!(entity = %id, due = ?entry.due, "respawn queued");
        Ok(entry.due)
    }

    pub fn has(&self, id: EntityId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn due_at(&self, id: EntityId) -> Option<Duration> {
        self.pending.get(&id).map(|entry| entry.due)
    }

    /// Earliest pending due time.
    pub fn next_due(&self) -> Option<Duration> {
        self.queue.peek().ok().map(|entry| entry.due)
    }

    /// Withdraw a pending respawn. Returns whether one existed.
    pub fn cancel(&mut self, id: EntityId) -> bool {
        match self.pending.remove(&id) {
            Some(entry) => self.queue.delete(&entry),
            None => false,
        }
    }

    /// Remove and return every entity due at or before `now`, earliest first.
    /// Re-inserting them into the world is up to the caller.
    pub fn drain_due(&mut self, now: Duration) -> Vec<EntityId> {
        let mut due = Vec::new();
        while self.queue.peek().is_ok_and(|entry| entry.due <= now) {
            let Ok(entry) = self.queue.pop() else {
                break;
            };
            self.pending.remove(&entry.entity);
            due.push(entry.entity);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use gridstream_common::{EntityDefinition, EntityKind, KindAttributes};
    use gridstream_kernel::EntityRegistry;

    const EPHEMERAL: Duration = Duration::from_secs(10);
    const PERSISTENT: Duration = Duration::from_secs(180);

    fn manager() -> RespawnManager {
        RespawnManager::new(EPHEMERAL, PERSISTENT)
    }

    fn define(registry: &mut EntityRegistry, persistent: bool, delay: Option<f64>) -> EntityId {
        let mut def = EntityDefinition::new(411, Vec3::ZERO, KindAttributes::vehicle());
        def.persistent = persistent;
        def.respawn_delay_secs = delay;
        registry.define(def).unwrap()
    }

    #[test]
    fn delays_depend_on_persistence() {
        let mut registry = EntityRegistry::new(EntityKind::Vehicle);
        let ephemeral = define(&mut registry, false, Some(600.0));
        let persistent = define(&mut registry, true, None);
        let custom = define(&mut registry, true, Some(600.0));
        let m = manager();
        assert_eq!(m.delay_for(registry.get(ephemeral).unwrap()), EPHEMERAL);
        assert_eq!(m.delay_for(registry.get(persistent).unwrap()), PERSISTENT);
        assert_eq!(
            m.delay_for(registry.get(custom).unwrap()),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn ephemeral_and_persistent_become_due_in_order() {
        let mut registry = EntityRegistry::new(EntityKind::Vehicle);
        let ephemeral = define(&mut registry, false, None);
        let persistent = define(&mut registry, true, Some(600.0));
        let mut m = manager();
        let t = Duration::ZERO;
        m.enqueue(registry.get(ephemeral).unwrap(), t).unwrap();
        m.enqueue(registry.get(persistent).unwrap(), t).unwrap();

        assert!(m.drain_due(EPHEMERAL - Duration::from_millis(1)).is_empty());
        assert_eq!(m.drain_due(EPHEMERAL), vec![ephemeral]);
        assert!(!m.has(ephemeral));
        assert!(m.has(persistent));

        assert!(m.drain_due(Duration::from_secs(599)).is_empty());
        assert_eq!(m.drain_due(Duration::from_secs(600)), vec![persistent]);
        assert!(m.is_empty());
    }

    #[test]
    fn double_enqueue_fails() {
        let mut registry = EntityRegistry::new(EntityKind::Vehicle);
        let id = define(&mut registry, false, None);
        let mut m = manager();
        m.enqueue(registry.get(id).unwrap(), Duration::ZERO).unwrap();
        assert_eq!(
            m.enqueue(registry.get(id).unwrap(), Duration::from_secs(1)),
            Err(RespawnError::AlreadyQueued(id))
        );
        assert_eq!(m.len(), 1);
        assert_eq!(m.due_at(id), Some(EPHEMERAL));
    }

    #[test]
    fn due_time_past_the_clock_is_an_error() {
        let mut registry = EntityRegistry::new(EntityKind::Vehicle);
        let id = define(&mut registry, true, Some(1e19));
        let mut m = manager();
        let late = Duration::from_secs(u64::MAX - 10);
        assert_eq!(
            m.enqueue(registry.get(id).unwrap(), late),
            Err(RespawnError::DueOverflow(id))
        );
        assert!(m.is_empty());
    }

    #[test]
    fn drain_returns_batch_earliest_first() {
        let mut registry = EntityRegistry::new(EntityKind::Vehicle);
        let a = define(&mut registry, false, None);
        let b = define(&mut registry, false, None);
        let c = define(&mut registry, false, None);
        let mut m = manager();
        m.enqueue(registry.get(b).unwrap(), Duration::from_secs(2)).unwrap();
        m.enqueue(registry.get(a).unwrap(), Duration::from_secs(1)).unwrap();
        m.enqueue(registry.get(c).unwrap(), Duration::from_secs(2)).unwrap();
        assert_eq!(m.next_due(), Some(Duration::from_secs(11)));

        assert_eq!(m.drain_due(Duration::from_secs(12)), vec![a, b, c]);
        assert_eq!(m.next_due(), None);
    }

    #[test]
    fn cancel_withdraws_entry() {
        let mut registry = EntityRegistry::new(EntityKind::Vehicle);
        let a = define(&mut registry, false, None);
        let b = define(&mut registry, false, None);
        let mut m = manager();
        m.enqueue(registry.get(a).unwrap(), Duration::ZERO).unwrap();
        m.enqueue(registry.get(b).unwrap(), Duration::ZERO).unwrap();

        assert!(m.cancel(a));
        assert!(!m.cancel(a));
        assert_eq!(m.drain_due(EPHEMERAL), vec![b]);

        // Cancelled entities may be queued again.
        m.enqueue(registry.get(a).unwrap(), Duration::ZERO).unwrap();
        assert!(m.has(a));
    }
}
