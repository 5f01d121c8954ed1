use crate::Result;
use crate::form_sync::models::{ConvertedPayload, FormImportRequest, ReconcileReport};
use crate::form_sync::schedule::JobInfo;
use crate::models::{Actor, ProviderAuth, WorkspaceId};
use async_trait::async_trait;

/// Client for a provider's conversion endpoint.
///
/// Implementations live in `formsync_integrations` (HTTP) or in tests.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Ask the provider at `base_url` to convert `form` into the canonical shape.
    ///
    /// Transport failures, timeouts and non-2xx answers map to
    /// `Error::ProviderUnavailable`; an undecodable body maps to `Error::MalformedPayload`.
    ///
    /// `form` is the raw provider definition on import. Scheduled refreshes only hold a
    /// reference and send `{"form_id": "..."}` (see `SyncJobPayload::form_reference`), so
    /// the provider service must accept that shape and resolve the current definition
    /// itself. A service that only takes full definitions fails every scheduled tick.
    async fn convert(
        &self,
        base_url: &str,
        provider: &str,
        form: &serde_json::Value,
        auth: &ProviderAuth,
    ) -> Result<ConvertedPayload>;
}

/// Resolves a provider name to the base URL of its conversion service.
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    async fn base_url(&self, provider: &str) -> Result<String>;
}

/// Form import and recurring synchronization.
#[async_trait]
pub trait FormSync: Send + Sync {
    /// Import a provider form into a workspace and register its recurring refresh.
    async fn import_form(
        &self,
        workspace_id: WorkspaceId,
        provider: &str,
        request: FormImportRequest,
        actor: &Actor,
        auth: ProviderAuth,
    ) -> Result<ReconcileReport>;

    /// Pull the current state of an already-imported form and reconcile it.
    async fn refresh(
        &self,
        provider: &str,
        form_id: &str,
        data_owner_field: &str,
        actor: &Actor,
    ) -> Result<ReconcileReport>;

    /// Scheduler view of a form's recurring refresh, if one is registered.
    async fn job_status(&self, provider: &str, form_id: &str) -> Option<JobInfo>;

    /// Unregister a form's recurring refresh. Returns whether a job existed.
    async fn stop_sync(
        &self,
        workspace_id: WorkspaceId,
        provider: &str,
        form_id: &str,
        actor: &Actor,
    ) -> Result<bool>;
}
