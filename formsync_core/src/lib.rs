//! formsync core library: models, stores, reconciliation and the recurring sync engine.

pub mod config;
pub mod error;
pub mod form_sync;
pub mod models;
pub mod o11y;
pub mod store;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use form_sync::models::{
    Answer, ConvertedPayload, DeletionRequest, DeletionRequestStatus, FormImportRequest,
    FormResponse, FormSettings, ProviderResponse, ReconcileReport, ResponseQuery, ResponseState,
    StandardForm, SyncJobPayload, WorkspaceForm, WorkspaceFormSettings, job_key,
};
pub use form_sync::{
    FormSync, FormSyncEngine, JobInfo, JobOutcome, ProviderClient, ProviderRegistry,
    ReconciliationEngine, ScheduleOptions, StaticProviderRegistry, SyncScheduler,
};
pub use models::{Actor, Plan, ProviderAuth, UserId, WorkspaceId};
pub use store::{MemorySyncStore, SqliteSyncStore, SyncStore, WorkspaceAccess, WorkspaceRole};
