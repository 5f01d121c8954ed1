use crate::config::SyncConfig;
use crate::form_sync::models::{
    FormImportRequest, ReconcileReport, SyncJobPayload, WorkspaceForm, job_key,
};
use crate::form_sync::reconcile::ReconciliationEngine;
use crate::form_sync::schedule::{JobInfo, ScheduleOptions, ScheduledTask, SyncScheduler};
use crate::form_sync::traits::{FormSync, ProviderClient, ProviderRegistry};
use crate::models::{Actor, Plan, ProviderAuth, WorkspaceId};
use crate::store::{SyncStore, WorkspaceAccess};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Provider round trip plus reconciliation; shared by imports and scheduled refreshes.
pub struct SyncRunner {
    client: Arc<dyn ProviderClient>,
    registry: Arc<dyn ProviderRegistry>,
    reconciler: ReconciliationEngine,
}

impl SyncRunner {
    pub fn new(
        store: Arc<dyn SyncStore>,
        client: Arc<dyn ProviderClient>,
        registry: Arc<dyn ProviderRegistry>,
    ) -> Self {
        Self {
            client,
            registry,
            reconciler: ReconciliationEngine::new(store),
        }
    }

    #[tracing::instrument(level = "info", skip(self, form, auth))]
    pub async fn pull(
        &self,
        provider: &str,
        form: &serde_json::Value,
        data_owner_field: &str,
        auth: &ProviderAuth,
    ) -> Result<ReconcileReport> {
        let base_url = self.registry.base_url(provider).await?;
        let payload = self.client.convert(&base_url, provider, form, auth).await?;
        self.reconciler.reconcile(payload, data_owner_field).await
    }
}

/// Scheduled tick for one imported form.
pub struct RefreshJob {
    runner: Arc<SyncRunner>,
    payload: SyncJobPayload,
}

impl RefreshJob {
    pub fn new(runner: Arc<SyncRunner>, payload: SyncJobPayload) -> Self {
        Self { runner, payload }
    }
}

#[async_trait]
impl ScheduledTask for RefreshJob {
    async fn run(&self) -> Result<()> {
        let p = &self.payload;
        let report = self
            .runner
            .pull(
                &p.provider,
                &p.form_reference(),
                &p.data_owner_field,
                &ProviderAuth::unattended(&p.actor),
            )
            .await?;
        if !report.response_failures.is_empty() {
            tracing::warn!(
                job_key = %p.job_key(),
                failed = report.response_failures.len(),
                "scheduled refresh finished with failed responses"
            );
        }
        Ok(())
    }

    fn payload(&self) -> serde_json::Value {
        serde_json::to_value(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Default `FormSync` implementation.
pub struct FormSyncEngine {
    store: Arc<dyn SyncStore>,
    access: Arc<dyn WorkspaceAccess>,
    runner: Arc<SyncRunner>,
    scheduler: Arc<SyncScheduler>,
    refresh_interval: Duration,
    response_quota: u64,
}

impl FormSyncEngine {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(
        store: Arc<dyn SyncStore>,
        access: Arc<dyn WorkspaceAccess>,
        client: Arc<dyn ProviderClient>,
        registry: Arc<dyn ProviderRegistry>,
        scheduler: Arc<SyncScheduler>,
        config: &SyncConfig,
    ) -> Self {
        let runner = Arc::new(SyncRunner::new(store.clone(), client, registry));
        Self {
            store,
            access,
            runner,
            scheduler,
            refresh_interval: config.refresh_interval,
            response_quota: config.response_quota,
        }
    }

    pub fn scheduler(&self) -> Arc<SyncScheduler> {
        self.scheduler.clone()
    }

    #[tracing::instrument(level = "debug", skip(self, actor), fields(user_id = %actor.user_id))]
    async fn ensure_admin(&self, workspace_id: WorkspaceId, actor: &Actor) -> Result<()> {
        if !self.access.is_admin(workspace_id, actor).await? {
            return Err(Error::Unauthorized(format!(
                "user {} is not an admin of workspace {workspace_id}",
                actor.user_id
            )));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, actor), fields(plan = actor.plan.as_str()))]
    async fn ensure_quota(&self, workspace_id: WorkspaceId, actor: &Actor) -> Result<()> {
        if !actor.plan.is_constrained() {
            return Ok(());
        }
        let count = self.store.count_workspace_responses(workspace_id).await?;
        if count > self.response_quota {
            return Err(Error::QuotaExceeded {
                count,
                limit: self.response_quota,
            });
        }
        Ok(())
    }

    async fn schedule_refresh(&self, payload: SyncJobPayload) -> Result<()> {
        let key = payload.job_key();
        let job = Arc::new(RefreshJob::new(self.runner.clone(), payload));
        self.scheduler
            .schedule(&key, self.refresh_interval, job, ScheduleOptions::default())
            .await
    }

    /// Register a refresh job for every stored workspace form. Jobs live in memory only,
    /// so this runs once at process start.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn resume_scheduled(&self) -> Result<usize> {
        let limit = 200usize;
        let mut offset = 0usize;
        let mut resumed = 0usize;
        loop {
            let batch = self.store.list_workspace_forms(limit, offset).await?;
            if batch.is_empty() {
                break;
            }
            for wf in &batch {
                let payload = SyncJobPayload {
                    provider: wf.settings.provider.clone(),
                    form_id: wf.form_id.clone(),
                    data_owner_field: wf.settings.response_data_owner_field.clone(),
                    actor: Actor::new(wf.user_id, Plan::default()),
                };
                self.schedule_refresh(payload).await?;
                resumed += 1;
            }
            offset += limit;
        }
        tracing::info!(jobs = resumed, "resumed scheduled form refreshes");
        Ok(resumed)
    }
}

#[async_trait]
impl FormSync for FormSyncEngine {
    #[tracing::instrument(
        level = "info",
        skip(self, request, actor, auth),
        fields(user_id = %actor.user_id)
    )]
    async fn import_form(
        &self,
        workspace_id: WorkspaceId,
        provider: &str,
        request: FormImportRequest,
        actor: &Actor,
        auth: ProviderAuth,
    ) -> Result<ReconcileReport> {
        if provider.trim().is_empty() {
            return Err(Error::InvalidInput("provider is empty".to_string()));
        }
        if request.response_data_owner.trim().is_empty() {
            return Err(Error::InvalidInput(
                "response_data_owner is empty".to_string(),
            ));
        }

        self.ensure_admin(workspace_id, actor).await?;
        self.ensure_quota(workspace_id, actor).await?;

        let report = self
            .runner
            .pull(provider, &request.form, &request.response_data_owner, &auth)
            .await?;
        let Some(form) = report.form.as_ref() else {
            return Ok(report);
        };

        let workspace_form = WorkspaceForm::for_import(
            workspace_id,
            actor.user_id,
            provider,
            form,
            &request.response_data_owner,
            Utc::now(),
        );
        self.store.upsert_workspace_form(&workspace_form).await?;

        self.schedule_refresh(SyncJobPayload {
            provider: provider.to_string(),
            form_id: form.form_id.clone(),
            data_owner_field: request.response_data_owner.clone(),
            actor: actor.clone(),
        })
        .await?;

        tracing::info!(
            form_id = %form.form_id,
            upserted = report.responses_upserted,
            "form imported"
        );
        Ok(report)
    }

    #[tracing::instrument(level = "info", skip(self, actor))]
    async fn refresh(
        &self,
        provider: &str,
        form_id: &str,
        data_owner_field: &str,
        actor: &Actor,
    ) -> Result<ReconcileReport> {
        let payload = SyncJobPayload {
            provider: provider.to_string(),
            form_id: form_id.to_string(),
            data_owner_field: data_owner_field.to_string(),
            actor: actor.clone(),
        };
        self.runner
            .pull(
                provider,
                &payload.form_reference(),
                data_owner_field,
                &ProviderAuth::unattended(actor),
            )
            .await
    }

    async fn job_status(&self, provider: &str, form_id: &str) -> Option<JobInfo> {
        self.scheduler.job(&job_key(provider, form_id)).await
    }

    #[tracing::instrument(level = "info", skip(self, actor))]
    async fn stop_sync(
        &self,
        workspace_id: WorkspaceId,
        provider: &str,
        form_id: &str,
        actor: &Actor,
    ) -> Result<bool> {
        self.ensure_admin(workspace_id, actor).await?;
        if let Some(wf) = self.store.get_workspace_form(form_id).await? {
            if wf.workspace_id != workspace_id {
                return Err(Error::NotFound(format!(
                    "form '{form_id}' is not imported in workspace {workspace_id}"
                )));
            }
        }
        Ok(self.scheduler.cancel(&job_key(provider, form_id)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_sync::models::{
        Answer, ConvertedPayload, DeletionRequest, DeletionRequestStatus, FormResponse,
        FormSettings, ProviderResponse, StandardForm,
    };
    use crate::form_sync::registry::StaticProviderRegistry;
    use crate::store::{MemorySyncStore, WorkspaceRole};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeProvider {
        payload: Mutex<ConvertedPayload>,
        calls: Mutex<Vec<(String, serde_json::Value, ProviderAuth)>>,
        fail: Mutex<bool>,
    }

    impl FakeProvider {
        fn set_payload(&self, payload: ConvertedPayload) {
            *self.payload.lock().unwrap() = payload;
        }

        fn calls(&self) -> Vec<(String, serde_json::Value, ProviderAuth)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProviderClient for FakeProvider {
        async fn convert(
            &self,
            base_url: &str,
            provider: &str,
            form: &serde_json::Value,
            auth: &ProviderAuth,
        ) -> Result<ConvertedPayload> {
            self.calls.lock().unwrap().push((
                format!("{base_url}/{provider}"),
                form.clone(),
                auth.clone(),
            ));
            if *self.fail.lock().unwrap() {
                return Err(Error::ProviderUnavailable("503 from provider".to_string()));
            }
            Ok(self.payload.lock().unwrap().clone())
        }
    }

    fn acme_payload(response_ids: &[&str]) -> ConvertedPayload {
        ConvertedPayload {
            form: Some(StandardForm {
                form_id: "F1".to_string(),
                title: "Feedback".to_string(),
                settings: FormSettings {
                    embed_url: None,
                    is_public: false,
                    provider: "acme".to_string(),
                    custom_url: None,
                },
                questions: vec![],
            }),
            responses: response_ids
                .iter()
                .map(|id| {
                    let mut answers = BTreeMap::new();
                    answers.insert("q1".to_string(), Answer::email(format!("{id}@x.io")));
                    ProviderResponse {
                        response_id: id.to_string(),
                        form_id: Some("F1".to_string()),
                        answers,
                        created_at: Some(Utc::now()),
                        updated_at: None,
                        published_at: None,
                    }
                })
                .collect(),
        }
    }

    struct Harness {
        store: MemorySyncStore,
        provider: Arc<FakeProvider>,
        engine: FormSyncEngine,
        workspace: WorkspaceId,
    }

    async fn harness() -> Harness {
        let store = MemorySyncStore::new();
        let provider = Arc::new(FakeProvider::default());
        let registry = StaticProviderRegistry::default()
            .with_provider("acme", "http://acme.test")
            .with_provider("acme-eu", "http://eu.acme.test");
        let engine = FormSyncEngine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            provider.clone(),
            Arc::new(registry),
            Arc::new(SyncScheduler::new()),
            &SyncConfig::default(),
        );
        Harness {
            store,
            provider,
            engine,
            workspace: WorkspaceId(Uuid::new_v4()),
        }
    }

    async fn admin(h: &Harness, plan: Plan) -> Actor {
        let actor = Actor::new(Uuid::new_v4(), plan);
        h.store
            .grant(h.workspace, actor.user_id, WorkspaceRole::Admin)
            .await;
        actor
    }

    async fn seed_responses(h: &Harness, count: usize) {
        let form = acme_payload(&[]).form.unwrap();
        let mut other = form.clone();
        other.form_id = "F0".to_string();
        h.store
            .upsert_workspace_form(&WorkspaceForm::for_import(
                h.workspace,
                Uuid::new_v4().into(),
                "acme",
                &other,
                "q1",
                Utc::now(),
            ))
            .await
            .unwrap();
        for i in 0..count {
            let incoming = ProviderResponse {
                response_id: format!("seed-{i}"),
                form_id: None,
                answers: BTreeMap::new(),
                created_at: None,
                updated_at: None,
                published_at: None,
            };
            h.store
                .upsert_response(&FormResponse::from_provider(None, "F0", incoming, "q1"))
                .await
                .unwrap();
        }
    }

    fn request() -> FormImportRequest {
        FormImportRequest {
            form: serde_json::json!({"id": "F1", "title": "Feedback"}),
            response_data_owner: "q1".to_string(),
        }
    }

    #[tokio::test]
    async fn non_admin_is_rejected_before_any_provider_call() {
        let h = harness().await;
        let stranger = Actor::new(Uuid::new_v4(), Plan::Pro);
        h.provider.set_payload(acme_payload(&["R1"]));

        let err = h
            .engine
            .import_form(h.workspace, "acme", request(), &stranger, ProviderAuth::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn quota_rejects_constrained_plan_above_limit() {
        let h = harness().await;
        let actor = admin(&h, Plan::Free).await;
        seed_responses(&h, 1001).await;
        h.provider.set_payload(acme_payload(&["R1"]));

        let err = h
            .engine
            .import_form(h.workspace, "acme", request(), &actor, ProviderAuth::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                count: 1001,
                limit: 1000
            }
        ));
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn quota_admits_constrained_plan_below_limit() {
        let h = harness().await;
        let actor = admin(&h, Plan::Free).await;
        seed_responses(&h, 999).await;
        h.provider.set_payload(acme_payload(&["R1"]));

        let report = h
            .engine
            .import_form(h.workspace, "acme", request(), &actor, ProviderAuth::default())
            .await
            .unwrap();
        assert_eq!(report.responses_upserted, 1);
    }

    #[tokio::test]
    async fn pro_plan_ignores_quota() {
        let h = harness().await;
        let engine_cfg = SyncConfig {
            response_quota: 10,
            ..Default::default()
        };
        let engine = FormSyncEngine::new(
            Arc::new(h.store.clone()),
            Arc::new(h.store.clone()),
            h.provider.clone(),
            Arc::new(StaticProviderRegistry::default().with_provider("acme", "http://acme.test")),
            Arc::new(SyncScheduler::new()),
            &engine_cfg,
        );
        let actor = admin(&h, Plan::Pro).await;
        seed_responses(&h, 50).await;
        h.provider.set_payload(acme_payload(&["R1"]));

        assert!(
            engine
                .import_form(h.workspace, "acme", request(), &actor, ProviderAuth::default())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn import_persists_association_and_registers_job() {
        let h = harness().await;
        let actor = admin(&h, Plan::Free).await;
        h.provider.set_payload(acme_payload(&["R1"]));
        let mut cookies = BTreeMap::new();
        cookies.insert("session".to_string(), "abc".to_string());

        let report = h
            .engine
            .import_form(
                h.workspace,
                "acme",
                request(),
                &actor,
                ProviderAuth::from_cookies(cookies, &actor),
            )
            .await
            .unwrap();
        assert_eq!(report.form.as_ref().map(|f| f.form_id.as_str()), Some("F1"));

        let wf = h.store.get_workspace_form("F1").await.unwrap().unwrap();
        assert_eq!(wf.workspace_id, h.workspace);
        assert!(wf.settings.private);
        assert_eq!(wf.settings.custom_url, "F1");
        assert_eq!(wf.settings.embed_url, "");
        assert_eq!(wf.settings.response_data_owner_field, "q1");

        let job = h.engine.job_status("acme", "F1").await.unwrap();
        assert_eq!(job.job_key, "acme_F1");
        assert_eq!(job.interval_secs, 3600);
        assert_eq!(job.payload["data_owner_field"], "q1");

        let calls = h.provider.calls();
        assert_eq!(calls[0].0, "http://acme.test/acme");
        assert_eq!(calls[0].2.cookie_header().as_deref(), Some("session=abc"));

        // Importing again keeps a single job.
        h.engine
            .import_form(h.workspace, "acme", request(), &actor, ProviderAuth::default())
            .await
            .unwrap();
        assert_eq!(h.engine.scheduler().jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_conversion_skips_association_and_job() {
        let h = harness().await;
        let actor = admin(&h, Plan::Free).await;

        let report = h
            .engine
            .import_form(h.workspace, "acme", request(), &actor, ProviderAuth::default())
            .await
            .unwrap();
        assert!(report.is_noop());
        assert!(h.store.get_workspace_form("F1").await.unwrap().is_none());
        assert!(h.engine.job_status("acme", "F1").await.is_none());
    }

    #[tokio::test]
    async fn provider_failure_surfaces_and_leaves_store_untouched() {
        let h = harness().await;
        let actor = admin(&h, Plan::Free).await;
        *h.provider.fail.lock().unwrap() = true;

        let err = h
            .engine
            .import_form(h.workspace, "acme", request(), &actor, ProviderAuth::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
        assert!(h.store.get_form("F1").await.unwrap().is_none());
        assert!(h.engine.job_status("acme", "F1").await.is_none());
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let h = harness().await;
        let actor = admin(&h, Plan::Free).await;
        let err = h
            .engine
            .import_form(h.workspace, "nope", request(), &actor, ProviderAuth::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn refresh_sends_form_reference_and_propagates_deletions() {
        let h = harness().await;
        let actor = admin(&h, Plan::Free).await;
        h.provider.set_payload(acme_payload(&["R1", "R2"]));
        h.engine
            .import_form(h.workspace, "acme", request(), &actor, ProviderAuth::default())
            .await
            .unwrap();

        h.store
            .upsert_deletion_request(&DeletionRequest::pending("F1", "acme", "R2"))
            .await
            .unwrap();
        h.provider.set_payload(acme_payload(&["R1"]));

        let report = h.engine.refresh("acme", "F1", "q1", &actor).await.unwrap();
        assert_eq!(report.confirmed_deletions, vec!["R2".to_string()]);

        let last = h.provider.calls().pop().unwrap();
        assert_eq!(last.1, serde_json::json!({"form_id": "F1"}));
        assert!(last.2.cookies.is_empty());
        assert_eq!(last.2.on_behalf_of, Some(actor.user_id));

        let req = h
            .store
            .get_deletion_request("F1", "acme", "R2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.status, DeletionRequestStatus::Success);
    }

    #[tokio::test]
    async fn stop_sync_requires_admin_and_cancels() {
        let h = harness().await;
        let actor = admin(&h, Plan::Free).await;
        h.provider.set_payload(acme_payload(&["R1"]));
        h.engine
            .import_form(h.workspace, "acme", request(), &actor, ProviderAuth::default())
            .await
            .unwrap();

        let stranger = Actor::new(Uuid::new_v4(), Plan::Free);
        assert!(matches!(
            h.engine
                .stop_sync(h.workspace, "acme", "F1", &stranger)
                .await
                .unwrap_err(),
            Error::Unauthorized(_)
        ));

        assert!(h.engine.stop_sync(h.workspace, "acme", "F1", &actor).await.unwrap());
        assert!(!h.engine.stop_sync(h.workspace, "acme", "F1", &actor).await.unwrap());
        assert!(h.engine.job_status("acme", "F1").await.is_none());
    }

    #[tokio::test]
    async fn resume_registers_a_job_per_stored_form() {
        let h = harness().await;
        seed_responses(&h, 0).await;
        assert_eq!(h.engine.resume_scheduled().await.unwrap(), 1);
        let job = h.engine.job_status("acme", "F0").await.unwrap();
        assert_eq!(job.payload["form_id"], "F0");
    }

    #[tokio::test]
    async fn resume_keys_jobs_by_import_provider() {
        let h = harness().await;
        let actor = admin(&h, Plan::Free).await;
        // The payload reports "acme" while the import goes through "acme-eu".
        h.provider.set_payload(acme_payload(&["R1"]));
        h.engine
            .import_form(h.workspace, "acme-eu", request(), &actor, ProviderAuth::default())
            .await
            .unwrap();

        let wf = h.store.get_workspace_form("F1").await.unwrap().unwrap();
        assert_eq!(wf.settings.provider, "acme-eu");

        assert_eq!(h.engine.resume_scheduled().await.unwrap(), 1);
        let jobs = h.engine.scheduler().jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_key, "acme-eu_F1");
        assert!(h.engine.job_status("acme", "F1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_tick_refreshes_unattended() {
        let h = harness().await;
        let actor = admin(&h, Plan::Free).await;
        h.provider.set_payload(acme_payload(&["R1"]));
        h.engine
            .import_form(h.workspace, "acme", request(), &actor, ProviderAuth::default())
            .await
            .unwrap();

        h.provider.set_payload(acme_payload(&["R1", "R3"]));
        tokio::time::sleep(Duration::from_secs(3601)).await;

        let calls = h.provider.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, serde_json::json!({"form_id": "F1"}));
        assert!(h.store.get_response("F1", "R3").await.unwrap().is_some());
        let job = h.engine.job_status("acme", "F1").await.unwrap();
        assert_eq!(job.runs, 1);
    }
}
