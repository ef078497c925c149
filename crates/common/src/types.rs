use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Interior id of the outdoor world. Only entities in this interior are
/// indexed for proximity streaming.
pub const WORLD_INTERIOR: u32 = 0;

/// Generation-checked handle to a stored entity.
///
/// The index addresses a slot in the owning registry; the generation is
/// bumped every time the slot is freed, so a handle kept past removal never
/// resolves to the entity that reuses the slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub const fn index(&self) -> u32 {
        self.index
    }

    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Identifier of an observer (a connected player).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObserverId(pub u32);

/// Opaque handle of a live entity inside the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuntimeHandle(pub u32);

/// The kinds of world entity the streaming engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Vehicle,
    Object,
    Pickup,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Vehicle => "vehicle",
            EntityKind::Object => "object",
            EntityKind::Pickup => "pickup",
        })
    }
}

/// Kind-specific visual attributes of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KindAttributes {
    Vehicle {
        primary_color: i32,
        secondary_color: i32,
        paintjob: Option<u8>,
        siren: bool,
    },
    Object {
        draw_distance: f32,
    },
    Pickup {
        pickup_type: i32,
    },
}

impl KindAttributes {
    pub fn kind(&self) -> EntityKind {
        match self {
            KindAttributes::Vehicle { .. } => EntityKind::Vehicle,
            KindAttributes::Object { .. } => EntityKind::Object,
            KindAttributes::Pickup { .. } => EntityKind::Pickup,
        }
    }

    /// Vehicle attributes with random-colour defaults.
    pub fn vehicle() -> Self {
        KindAttributes::Vehicle {
            primary_color: -1,
            secondary_color: -1,
            paintjob: None,
            siren: false,
        }
    }
}

/// Immutable description of a world entity.
///
/// The streaming engine creates and destroys live instances from this
/// definition; it never changes after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub model_id: i32,
    /// Position with z pointing up; streaming uses the x/y plane.
    pub position: Vec3,
    /// Euler rotation in degrees. Vehicles only use `z` as their heading.
    pub rotation: Vec3,
    pub attributes: KindAttributes,
    pub interior_id: u32,
    pub virtual_world_id: u32,
    /// Persistent entities always try to be live once considered.
    pub persistent: bool,
    /// Respawn delay for persistent entities. `None` uses the streamer default.
    pub respawn_delay_secs: Option<f64>,
}

impl EntityDefinition {
    /// A world-bound, non-persistent definition at `position`.
    pub fn new(model_id: i32, position: Vec3, attributes: KindAttributes) -> Self {
        Self {
            model_id,
            position,
            rotation: Vec3::ZERO,
            attributes,
            interior_id: WORLD_INTERIOR,
            virtual_world_id: 0,
            persistent: false,
            respawn_delay_secs: None,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.attributes.kind()
    }

    pub fn is_world_bound(&self) -> bool {
        self.interior_id == WORLD_INTERIOR
    }
}

/// Per-tick snapshot of an observer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    pub id: ObserverId,
    pub position: Vec3,
    pub interior_id: u32,
    pub virtual_world_id: u32,
    pub level: u32,
    pub vip: bool,
}

impl Observer {
    /// An observer in the outdoor world and default virtual world.
    pub fn at(id: u32, position: Vec3) -> Self {
        Self {
            id: ObserverId(id),
            position,
            interior_id: WORLD_INTERIOR,
            virtual_world_id: 0,
            level: 0,
            vip: false,
        }
    }
}
