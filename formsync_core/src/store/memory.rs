use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::traits::{SyncStore, WorkspaceAccess, WorkspaceRole};
use crate::Result;
use crate::form_sync::models::{
    DeletionRequest, DeletionRequestStatus, FormResponse, ResponseQuery, StandardForm,
    WorkspaceForm,
};
use crate::models::{Actor, UserId, WorkspaceId};

type ResponseKey = (String, String);
type DeletionKey = (String, String, String);

/// In-memory store for local development and unit tests.
///
/// Data lives for the process lifetime only. Clones share the same maps.
#[derive(Clone, Default)]
pub struct MemorySyncStore {
    forms: Arc<Mutex<HashMap<String, StandardForm>>>,
    responses: Arc<Mutex<BTreeMap<ResponseKey, FormResponse>>>,
    deletions: Arc<Mutex<BTreeMap<DeletionKey, DeletionRequest>>>,
    workspace_forms: Arc<Mutex<BTreeMap<String, WorkspaceForm>>>,
    roles: Arc<Mutex<HashMap<(WorkspaceId, UserId), WorkspaceRole>>>,
}

impl MemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn grant(&self, workspace_id: WorkspaceId, user_id: UserId, role: WorkspaceRole) {
        self.roles.lock().await.insert((workspace_id, user_id), role);
    }

    /// Snapshot of every stored response of a form, tombstoned included (primarily for tests).
    pub async fn responses_of(&self, form_id: &str) -> Vec<FormResponse> {
        self.responses
            .lock()
            .await
            .values()
            .filter(|r| r.form_id == form_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SyncStore for MemorySyncStore {
    async fn upsert_form(&self, form: &StandardForm) -> Result<()> {
        self.forms
            .lock()
            .await
            .insert(form.form_id.clone(), form.clone());
        Ok(())
    }

    async fn get_form(&self, form_id: &str) -> Result<Option<StandardForm>> {
        Ok(self.forms.lock().await.get(form_id).cloned())
    }

    async fn get_response(
        &self,
        form_id: &str,
        response_id: &str,
    ) -> Result<Option<FormResponse>> {
        let key = (form_id.to_string(), response_id.to_string());
        Ok(self.responses.lock().await.get(&key).cloned())
    }

    async fn upsert_response(&self, response: &FormResponse) -> Result<()> {
        let key = (response.form_id.clone(), response.response_id.clone());
        let mut responses = self.responses.lock().await;
        match responses.entry(key) {
            Entry::Occupied(mut slot) => {
                let id = slot.get().id;
                *slot.get_mut() = FormResponse {
                    id,
                    ..response.clone()
                };
            }
            Entry::Vacant(slot) => {
                slot.insert(response.clone());
            }
        }
        Ok(())
    }

    async fn tombstone_responses(&self, form_id: &str, response_ids: &[String]) -> Result<u64> {
        let mut responses = self.responses.lock().await;
        let mut cleared = 0u64;
        for response_id in response_ids {
            let key = (form_id.to_string(), response_id.clone());
            if let Some(r) = responses.get_mut(&key) {
                if !r.is_tombstoned() {
                    r.tombstone();
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }

    async fn list_responses(
        &self,
        form_id: &str,
        query: &ResponseQuery,
    ) -> Result<Vec<FormResponse>> {
        let responses = self.responses.lock().await;
        let mut out: Vec<FormResponse> = responses
            .values()
            .filter(|r| r.form_id == form_id && query.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn upsert_deletion_request(&self, request: &DeletionRequest) -> Result<()> {
        let key = (
            request.form_id.clone(),
            request.provider.clone(),
            request.response_id.clone(),
        );
        self.deletions.lock().await.insert(key, request.clone());
        Ok(())
    }

    async fn get_deletion_request(
        &self,
        form_id: &str,
        provider: &str,
        response_id: &str,
    ) -> Result<Option<DeletionRequest>> {
        let key = (
            form_id.to_string(),
            provider.to_string(),
            response_id.to_string(),
        );
        Ok(self.deletions.lock().await.get(&key).cloned())
    }

    async fn list_pending_deletions(
        &self,
        form_id: &str,
        provider: &str,
        exclude: &BTreeSet<String>,
    ) -> Result<Vec<DeletionRequest>> {
        let deletions = self.deletions.lock().await;
        Ok(deletions
            .values()
            .filter(|d| {
                d.form_id == form_id
                    && d.provider == provider
                    && d.status == DeletionRequestStatus::Pending
                    && !exclude.contains(&d.response_id)
            })
            .cloned()
            .collect())
    }

    async fn mark_deletions_succeeded(
        &self,
        form_id: &str,
        provider: &str,
        response_ids: &[String],
        deleted_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut deletions = self.deletions.lock().await;
        let mut updated = 0u64;
        for response_id in response_ids {
            let key = (
                form_id.to_string(),
                provider.to_string(),
                response_id.clone(),
            );
            if let Some(d) = deletions.get_mut(&key) {
                if d.status == DeletionRequestStatus::Pending {
                    d.status = DeletionRequestStatus::Success;
                    d.deleted_at = Some(deleted_at);
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn upsert_workspace_form(&self, workspace_form: &WorkspaceForm) -> Result<()> {
        let mut forms = self.workspace_forms.lock().await;
        let mut next = workspace_form.clone();
        if let Some(existing) = forms.get(&workspace_form.form_id) {
            next.created_at = existing.created_at;
        }
        forms.insert(next.form_id.clone(), next);
        Ok(())
    }

    async fn get_workspace_form(&self, form_id: &str) -> Result<Option<WorkspaceForm>> {
        Ok(self.workspace_forms.lock().await.get(form_id).cloned())
    }

    async fn list_workspace_forms(&self, limit: usize, offset: usize) -> Result<Vec<WorkspaceForm>> {
        Ok(self
            .workspace_forms
            .lock()
            .await
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_workspace_responses(&self, workspace_id: WorkspaceId) -> Result<u64> {
        let form_ids: BTreeSet<String> = self
            .workspace_forms
            .lock()
            .await
            .values()
            .filter(|wf| wf.workspace_id == workspace_id)
            .map(|wf| wf.form_id.clone())
            .collect();
        let responses = self.responses.lock().await;
        Ok(responses
            .values()
            .filter(|r| form_ids.contains(&r.form_id))
            .count() as u64)
    }
}

#[async_trait]
impl WorkspaceAccess for MemorySyncStore {
    async fn is_admin(&self, workspace_id: WorkspaceId, actor: &Actor) -> Result<bool> {
        Ok(self
            .roles
            .lock()
            .await
            .get(&(workspace_id, actor.user_id))
            .map(WorkspaceRole::can_administer)
            .unwrap_or(false))
    }
}
