use crate::Result;
use crate::form_sync::models::{
    DeletionRequest, FormResponse, ResponseQuery, StandardForm, WorkspaceForm,
};
use crate::models::{Actor, WorkspaceId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Shared, multi-writer store behind the sync engine.
///
/// Four logical collections: forms (key `form_id`), responses (key `form_id` +
/// `response_id`), deletion requests (key `form_id` + `provider` + `response_id`) and
/// workspace forms (key `form_id`). Every write is an idempotent upsert or a
/// conditional bulk update; no cross-collection transaction is assumed.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn upsert_form(&self, form: &StandardForm) -> Result<()>;
    async fn get_form(&self, form_id: &str) -> Result<Option<StandardForm>>;

    async fn get_response(&self, form_id: &str, response_id: &str)
    -> Result<Option<FormResponse>>;
    /// Insert or overwrite by `(form_id, response_id)`. A row that already exists keeps
    /// its stored `id`; `response.id` only applies to new rows.
    async fn upsert_response(&self, response: &FormResponse) -> Result<()>;
    /// Tombstone the listed responses of a form that still carry answers. Returns how
    /// many were cleared.
    async fn tombstone_responses(&self, form_id: &str, response_ids: &[String]) -> Result<u64>;
    /// Read model over a form's responses, newest first.
    async fn list_responses(&self, form_id: &str, query: &ResponseQuery)
    -> Result<Vec<FormResponse>>;

    async fn upsert_deletion_request(&self, request: &DeletionRequest) -> Result<()>;
    async fn get_deletion_request(
        &self,
        form_id: &str,
        provider: &str,
        response_id: &str,
    ) -> Result<Option<DeletionRequest>>;
    /// PENDING requests of `(form_id, provider)` whose response id is not in `exclude`.
    async fn list_pending_deletions(
        &self,
        form_id: &str,
        provider: &str,
        exclude: &BTreeSet<String>,
    ) -> Result<Vec<DeletionRequest>>;
    /// Move PENDING requests to SUCCESS. Requests already in SUCCESS are left alone.
    async fn mark_deletions_succeeded(
        &self,
        form_id: &str,
        provider: &str,
        response_ids: &[String],
        deleted_at: DateTime<Utc>,
    ) -> Result<u64>;

    async fn upsert_workspace_form(&self, workspace_form: &WorkspaceForm) -> Result<()>;
    async fn get_workspace_form(&self, form_id: &str) -> Result<Option<WorkspaceForm>>;
    async fn list_workspace_forms(&self, limit: usize, offset: usize)
    -> Result<Vec<WorkspaceForm>>;
    /// Stored responses (tombstoned included) across every form of a workspace.
    async fn count_workspace_responses(&self, workspace_id: WorkspaceId) -> Result<u64>;
}

/// Workspace role lookup.
#[async_trait]
pub trait WorkspaceAccess: Send + Sync {
    /// True when the actor owns the workspace or holds the admin role in it.
    async fn is_admin(&self, workspace_id: WorkspaceId, actor: &Actor) -> Result<bool>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WorkspaceRole {
    Owner,
    Admin,
    Member,
}

impl WorkspaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceRole::Owner => "owner",
            WorkspaceRole::Admin => "admin",
            WorkspaceRole::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(WorkspaceRole::Owner),
            "admin" => Some(WorkspaceRole::Admin),
            "member" => Some(WorkspaceRole::Member),
            _ => None,
        }
    }

    pub fn can_administer(&self) -> bool {
        matches!(self, WorkspaceRole::Owner | WorkspaceRole::Admin)
    }
}
