use std::time::Duration;

use glam::Vec3;
use gridstream_common::{EntityDefinition, EntityId, EntityKind, RuntimeHandle};

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("definition of kind {actual} registered with the {expected} registry")]
    KindMismatch {
        expected: EntityKind,
        actual: EntityKind,
    },
    #[error("unknown or stale entity {0}")]
    UnknownEntity(EntityId),
    #[error("entity {0} released more often than it was acquired")]
    RefCountUnderflow(EntityId),
    #[error("respawn delay must be a finite, non-negative number of seconds")]
    InvalidRespawnDelay,
}

/// A registered entity: its immutable definition plus the runtime state the
/// streaming engine maintains for it.
#[derive(Debug, Clone)]
pub struct StoredEntity {
    id: EntityId,
    sequence: u64,
    definition: EntityDefinition,
    position: Vec3,
    live_handle: Option<RuntimeHandle>,
    ref_count: u32,
    total_ref_count: u64,
    needs_respawn: bool,
}

impl StoredEntity {
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Registration order within the owning registry. Never reused, so it
    /// gives a stable tie-break between otherwise equal candidates.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    /// Current position. Starts at the defined position and follows the
    /// live entity while holders move it around.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Put the entity back at its defined pose.
    pub fn reset_position(&mut self) {
        self.position = self.definition.position;
    }

    pub fn live_handle(&self) -> Option<RuntimeHandle> {
        self.live_handle
    }

    pub fn is_live(&self) -> bool {
        self.live_handle.is_some()
    }

    /// Record that the entity is now represented in the backend.
    pub fn set_live_handle(&mut self, handle: RuntimeHandle) {
        self.live_handle = Some(handle);
    }

    /// Forget the backend representation, returning the handle to destroy.
    pub fn take_live_handle(&mut self) -> Option<RuntimeHandle> {
        self.live_handle.take()
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn total_ref_count(&self) -> u64 {
        self.total_ref_count
    }

    /// Register a holder. Also marks the entity for respawn, since a holder
    /// may have moved it away from its defined pose.
    pub fn acquire(&mut self) -> u32 {
        self.ref_count += 1;
        self.total_ref_count += 1;
        self.needs_respawn = true;
        self.ref_count
    }

    /// Drop a holder and return the remaining count.
    pub fn release(&mut self) -> Result<u32, RegistryError> {
        if self.ref_count == 0 {
            return Err(RegistryError::RefCountUnderflow(self.id));
        }
        self.ref_count -= 1;
        Ok(self.ref_count)
    }

    /// Whether the entity has been used since it was last placed at its
    /// defined pose.
    pub fn needs_respawn(&self) -> bool {
        self.needs_respawn
    }

    pub fn clear_respawn_mark(&mut self) {
        self.needs_respawn = false;
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entity: Option<StoredEntity>,
}

/// Dense arena owning every [`StoredEntity`] of one kind.
///
/// Ids are `(index, generation)` pairs. Removing an entity bumps the slot's
/// generation before the index is recycled, so stale ids are rejected instead
/// of aliasing a newer entity.
#[derive(Debug)]
pub struct EntityRegistry {
    kind: EntityKind,
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
    next_sequence: u64,
}

impl EntityRegistry {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            next_sequence: 0,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Register a definition and return its id.
    pub fn define(&mut self, definition: EntityDefinition) -> Result<EntityId, RegistryError> {
        if definition.kind() != self.kind {
            return Err(RegistryError::KindMismatch {
                expected: self.kind,
                actual: definition.kind(),
            });
        }
        if definition
            .respawn_delay_secs
            .is_some_and(|secs| Duration::try_from_secs_f64(secs).is_err())
        {
            return Err(RegistryError::InvalidRespawnDelay);
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = EntityId::new(index, slot.generation);
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        slot.entity = Some(StoredEntity {
            id,
            sequence,
            position: definition.position,
            definition,
            live_handle: None,
            ref_count: 0,
            total_ref_count: 0,
            needs_respawn: false,
        });
        self.len += 1;
        Ok(id)
    }

    /// Remove an entity, returning it. The caller is responsible for having
    /// torn down grid membership, respawn entries, locks and live handles.
    pub fn remove(&mut self, id: EntityId) -> Result<StoredEntity, RegistryError> {
        let slot = self
            .slots
            .get_mut(id.index() as usize)
            .filter(|s| s.generation == id.generation())
            .ok_or(RegistryError::UnknownEntity(id))?;
        let entity = slot.entity.take().ok_or(RegistryError::UnknownEntity(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.len -= 1;
        Ok(entity)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_ok()
    }

    pub fn get(&self, id: EntityId) -> Result<&StoredEntity, RegistryError> {
        self.slots
            .get(id.index() as usize)
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.entity.as_ref())
            .ok_or(RegistryError::UnknownEntity(id))
    }

    pub fn get_mut(&mut self, id: EntityId) -> Result<&mut StoredEntity, RegistryError> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.entity.as_mut())
            .ok_or(RegistryError::UnknownEntity(id))
    }

    /// All stored entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &StoredEntity> {
        self.slots.iter().filter_map(|s| s.entity.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StoredEntity> {
        self.slots.iter_mut().filter_map(|s| s.entity.as_mut())
    }
}
