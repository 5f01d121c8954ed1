use crate::form_sync::deletion::DeletionPropagation;
use crate::form_sync::models::{
    ConvertedPayload, FormResponse, ProviderResponse, ReconcileReport, ResponseFailure,
};
use crate::store::SyncStore;
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;

/// Merges a converted provider payload into the store.
///
/// Every step is an idempotent upsert or a conditional update, so a run may be repeated
/// (or resumed after a crash) with the same result.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn SyncStore>,
    deletions: DeletionPropagation,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        let deletions = DeletionPropagation::new(store.clone());
        Self { store, deletions }
    }

    #[tracing::instrument(
        level = "info",
        skip(self, payload),
        fields(responses = payload.responses.len())
    )]
    pub async fn reconcile(
        &self,
        payload: ConvertedPayload,
        data_owner_field: &str,
    ) -> Result<ReconcileReport> {
        if payload.is_empty() {
            tracing::info!("provider returned nothing to reconcile");
            return Ok(ReconcileReport::nothing_to_reconcile());
        }

        let ConvertedPayload { form, responses } = payload;
        let form = form.ok_or_else(|| {
            Error::MalformedPayload(format!(
                "payload carries {} responses but no form",
                responses.len()
            ))
        })?;
        form.validate()?;

        self.store.upsert_form(&form).await?;

        let form_id = form.form_id.clone();
        let provider = form.settings.provider.clone();
        let mut report = ReconcileReport {
            form: Some(form),
            ..Default::default()
        };

        for incoming in responses {
            let response_id = incoming.response_id.clone();
            // Seen even when the write fails: the provider still has it.
            report.seen_ids.insert(response_id.clone());
            match self
                .upsert_response(&form_id, incoming, data_owner_field)
                .await
            {
                Ok(()) => report.responses_upserted += 1,
                Err(e) => {
                    tracing::warn!(
                        form_id = %form_id,
                        response_id = %response_id,
                        error = %e,
                        "response upsert failed; continuing with batch"
                    );
                    report.response_failures.push(ResponseFailure {
                        response_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let pending = self
            .deletions
            .pending_excluding(&form_id, &provider, &report.seen_ids)
            .await?;
        if !pending.is_empty() {
            let ids: Vec<String> = pending.into_iter().map(|d| d.response_id).collect();
            // Tombstone first; a crash before confirmation leaves the requests PENDING
            // and the next run finishes the job.
            report.tombstoned = self.store.tombstone_responses(&form_id, &ids).await?;
            self.deletions
                .confirm(&form_id, &provider, &ids, Utc::now())
                .await?;
            report.confirmed_deletions = ids;
        }

        tracing::info!(
            form_id = %form_id,
            upserted = report.responses_upserted,
            failed = report.response_failures.len(),
            tombstoned = report.tombstoned,
            confirmed = report.confirmed_deletions.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    async fn upsert_response(
        &self,
        form_id: &str,
        incoming: ProviderResponse,
        data_owner_field: &str,
    ) -> Result<()> {
        let existing = self
            .store
            .get_response(form_id, &incoming.response_id)
            .await?;
        let stored = FormResponse::from_provider(
            existing.map(|r| r.id),
            form_id,
            incoming,
            data_owner_field,
        );
        self.store.upsert_response(&stored).await
    }
}
