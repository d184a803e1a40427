//! Offline-first sync core for a caregiver-facing home-health app.
//!
//! The crate is structured in layers: a SQLite-backed local store and
//! durable queue/journal blobs at the bottom, a clock/crypto layer and
//! canonicalization contract used for integrity hashing, state-specific
//! EVV validation rules above that, then the optimistic-update manager,
//! offline queue, conflict resolver and sync manager that coordinate
//! reading and writing while the device may be offline. The facade at
//! the top is the only thing a caregiver-facing app talks to.

pub mod canonical;
pub mod clock;
pub mod conflict;
pub mod config;
pub mod error;
pub mod facade;
pub mod http_client;
pub mod model;
pub mod network;
pub mod offline_queue;
pub mod optimistic;
pub mod queue_store;
pub mod state_rules;
pub mod store;
pub mod sync_manager;
pub mod validator;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use facade::{ClockInInput, ClockOutInput, ClockResult, EvvFacade, SyncStateSnapshot};
pub use network::{DebouncedNetworkProbe, NetworkProbe};
pub use offline_queue::OfflineQueue;
pub use optimistic::OptimisticUpdateManager;
pub use state_rules::StateRulesTable;
pub use store::LocalStore;
pub use sync_manager::{SyncManager, SyncOutcome, SyncStats};
