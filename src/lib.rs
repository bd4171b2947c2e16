//! # failover-migrate
//!
//! Copies the keyspace of one Redis cluster into another when traffic is
//! switched between an active and a failover deployment.
//!
//! Every key is moved with `DUMP` / `RESTORE ... REPLACE`, keeping its
//! remaining TTL. A key that fails is recorded and skipped; an entry that
//! fails is reported and the next entry still runs.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Configuration document: cluster pairs, connection, logging |
//! | [`migration`] | Prober, cleaner, engine, orchestrator and cluster clients |

#![forbid(unsafe_code)]

pub mod config;
pub mod migration;

pub use config::Config;
pub use migration::{
    ClusterEndpoint, ClusterEntry, Direction, MigrationError, MigrationPair, MigrationResult,
    Orchestrator, RunReport,
};
