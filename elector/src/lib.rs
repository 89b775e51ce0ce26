#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Lease-based election of a single active worker among redundant replicas.
//!
//! Every replica runs an [`Elector`] against the same coordination key in a
//! shared [`LeaseStore`]. Whichever replica holds the lease runs the guarded
//! work handed to [`Callbacks::on_acquired`]; the others keep retrying until
//! the lease is released or expires.

pub mod config;
pub mod controller;
pub mod election;
pub mod error;
pub mod store;
pub mod supervisor;

pub mod test_utils;

pub use config::ElectorConfig;
pub use controller::Elector;
pub use election::ElectionState;
pub use error::{Error, Result, StoreError};
pub use store::{memory::InMemoryLeaseStore, LeaseStore};
pub use supervisor::Callbacks;

#[cfg(feature = "redis")]
pub use store::redis::RedisLeaseStore;

pub use tokio_util::sync::CancellationToken;

/// Owner token written into the lease by one elector instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Identity(pub uuid::Uuid);

impl Identity {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
