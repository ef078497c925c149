//! Streaming: decides which world entities are live around a moving set of
//! observers, under a hard per-kind budget.
//!
//! # Invariants
//! - A streamer never has more than `max_visible` live entities after a pass.
//! - An entity held by someone (non-zero reference count) is never evicted.
//! - An entity is never live and queued for respawn at the same time.
//! - Once disposed, neither a scheduler nor a streamer runs another pass.
//!
//! Outdoor space is bucketed by a fixed-size [`SpatialGrid`] whose cell size
//! equals the streaming distance, so a one-cell radius query around an
//! observer covers everything it can see.

mod access;
mod backend;
mod budget;
mod clock;
mod config;
mod error;
mod grid;
mod observer;
mod queue;
mod respawn;
mod scheduler;
mod selection;
mod streamer;

pub use access::{AccessLock, AccessManager};
pub use backend::{BackendCounters, BackendError, EntityBackend, InMemoryBackend};
pub use budget::{FrameTimer, StreamStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ServerConfig, StreamerConfig};
pub use error::StreamError;
pub use grid::{CellCoord, GridError, SpatialGrid};
pub use observer::{ObserverSource, ObserverTable};
pub use queue::{PriorityQueue, QueueError};
pub use respawn::{RespawnEntry, RespawnError, RespawnManager};
pub use scheduler::{
    DisposeToken, Scheduler, SchedulerError, SchedulerState, SharedStreamer, Streamer,
};
pub use selection::{Candidate, SelectionContext, SelectionManager};
pub use streamer::EntityStreamer;

pub fn crate_info() -> &'static str {
    "gridstream-stream v0.1.0"
}
