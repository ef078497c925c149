//! Shared value types: entity identifiers, definitions and observer snapshots.

mod types;

pub use types::{
    EntityDefinition, EntityId, EntityKind, KindAttributes, Observer, ObserverId, RuntimeHandle,
    WORLD_INTERIOR,
};
