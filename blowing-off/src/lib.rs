//! Client half of The Goodies: a local versioned-graph replica that stays
//! usable offline and reconciles with `funkygibbon` over the Inbetweenies
//! protocol. Builds on `inbetweenies`'s shared store, vector clock, and
//! conflict resolution; adds the client-only change tracker, sync state,
//! transport, and sync engine (§4.5-§4.6).

pub mod auth;
pub mod config;
pub mod error;
pub mod replica;
pub mod state;
pub mod sync_engine;
pub mod tracker;
pub mod transport;

pub use config::Config;
pub use error::{ClientError, ClientResult};
pub use replica::Replica;
pub use sync_engine::SyncOutcome;
