use crate::Result;
use crate::form_sync::models::DeletionRequest;
use crate::store::SyncStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Deletion request bookkeeping for reconciliation.
///
/// A request is confirmed only once a full batch from the provider no longer lists its
/// response. Confirmation is terminal.
#[derive(Clone)]
pub struct DeletionPropagation {
    store: Arc<dyn SyncStore>,
}

impl DeletionPropagation {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    /// PENDING requests of `(form_id, provider)` not present in `seen`.
    #[tracing::instrument(level = "debug", skip(self, seen), fields(seen = seen.len()))]
    pub async fn pending_excluding(
        &self,
        form_id: &str,
        provider: &str,
        seen: &BTreeSet<String>,
    ) -> Result<Vec<DeletionRequest>> {
        self.store
            .list_pending_deletions(form_id, provider, seen)
            .await
    }

    /// Mark requests SUCCESS. Requests already confirmed are not touched again.
    #[tracing::instrument(level = "debug", skip(self, response_ids), fields(count = response_ids.len()))]
    pub async fn confirm(
        &self,
        form_id: &str,
        provider: &str,
        response_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64> {
        if response_ids.is_empty() {
            return Ok(0);
        }
        self.store
            .mark_deletions_succeeded(form_id, provider, response_ids, at)
            .await
    }
}
