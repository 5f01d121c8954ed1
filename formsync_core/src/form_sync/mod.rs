//! Form import, response reconciliation and recurring provider sync.

pub mod deletion;
pub mod engine;
pub mod models;
pub mod reconcile;
pub mod registry;
pub mod schedule;
pub mod traits;

pub use deletion::DeletionPropagation;
pub use engine::{FormSyncEngine, RefreshJob, SyncRunner};
pub use reconcile::ReconciliationEngine;
pub use registry::StaticProviderRegistry;
pub use schedule::{JobInfo, JobOutcome, ScheduleOptions, ScheduledTask, SyncScheduler};
pub use traits::{FormSync, ProviderClient, ProviderRegistry};
