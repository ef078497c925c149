use gridstream_common::EntityId;
use gridstream_kernel::RegistryError;

use crate::grid::GridError;
use crate::respawn::RespawnError;

/// Errors surfaced by a streamer. Every variant points at a caller bug or a
/// broken invariant; transient backend failures never show up here.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Respawn(#[from] RespawnError),
    #[error("entity {0} is not live")]
    NotLive(EntityId),
    #[error("entity {id} is in use by {ref_count} holder(s)")]
    InUse { id: EntityId, ref_count: u32 },
    #[error("streamer has been disposed")]
    Disposed,
}
