//! Entity kernel: the registry that owns every stored entity of one kind.
//!
//! # Invariants
//! - Ids are never reused while a definition is alive; stale ids are rejected.
//! - All runtime state mutations flow through explicit operations.

pub mod registry;

pub use registry::{EntityRegistry, RegistryError, StoredEntity};
