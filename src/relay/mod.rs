//! Forwarding and migration engine.

pub mod engine;
pub mod migration;
pub mod notify;
pub mod pipeline;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{RelayDeps, RelayEngine, spawn_retention_task};
pub use migration::{
    MigrationCounts, MigrationReport, MigrationRequest, MigrationRun, MigrationStatus, Migrator,
};
pub use notify::Notifier;
pub use pipeline::{DeliveryPipeline, DeliveryReport};
