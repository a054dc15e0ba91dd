//! Shared data model, vector clock, conflict resolution, versioned store,
//! and wire protocol for The Goodies' Inbetweenies sync engine.
//!
//! This crate is deliberately transport- and storage-backend-agnostic
//! beyond SQLite: `funkygibbon` (server) and `blowing-off` (client) each
//! own a `SqliteVersionedStore` pointed at their own database file and
//! build their respective sync engines on top of the same model and
//! conflict-resolution code.

pub mod conflict;
pub mod error;
pub mod model;
pub mod protocol;
pub mod store;
pub mod vector_clock;

pub use conflict::{ConflictPolicy, ConflictReport};
pub use error::{InbetweeniesError, InbetweeniesResult};
pub use model::{EntityType, EntityVersion, Relationship, SourceType};
pub use protocol::{Change, ChangeType, SyncRequest, SyncResponse, SyncStats, SyncType, PROTOCOL_VERSION};
pub use store::{CurrentState, PutOutcome, SqliteVersionedStore, VersionedStore};
pub use vector_clock::{Comparison, VectorClock};
