use crate::error::ApiError;
use crate::extract::{ActorHeader, ProviderCookies};
use crate::server::AppState;
use axum::extract::{Path, Query};
use axum::routing::{get, post};
use axum::{Extension, Json};
use formsync_core::{
    FormImportRequest, FormSync, JobInfo, ProviderAuth, ReconcileReport, WorkspaceId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new()
        .route(
            "/workspaces/{workspace_id}/forms/import/{provider}",
            post(import_form),
        )
        .route(
            "/forms/{provider}/{form_id}/sync",
            get(get_sync_status).delete(stop_sync),
        )
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub message: &'static str,
    pub form_id: Option<String>,
    pub responses_upserted: u64,
    pub failed_response_ids: Vec<String>,
    pub confirmed_deletions: Vec<String>,
}

impl From<ReconcileReport> for ImportResponse {
    fn from(report: ReconcileReport) -> Self {
        Self {
            message: "Import successful.",
            form_id: report.form.map(|f| f.form_id),
            responses_upserted: report.responses_upserted,
            failed_response_ids: report
                .response_failures
                .into_iter()
                .map(|f| f.response_id)
                .collect(),
            confirmed_deletions: report.confirmed_deletions,
        }
    }
}

#[tracing::instrument(level = "info", skip_all, fields(workspace_id = %workspace_id, provider = %provider))]
pub async fn import_form(
    Path((workspace_id, provider)): Path<(Uuid, String)>,
    ActorHeader(actor): ActorHeader,
    ProviderCookies(cookies): ProviderCookies,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<FormImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    let auth = ProviderAuth::from_cookies(cookies, &actor);
    let report = state
        .engine
        .import_form(WorkspaceId(workspace_id), &provider, req, &actor, auth)
        .await?;
    Ok(Json(report.into()))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn get_sync_status(
    Path((provider, form_id)): Path<(String, String)>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<JobInfo>, ApiError> {
    let info = state
        .engine
        .job_status(&provider, &form_id)
        .await
        .ok_or_else(|| {
            ApiError::Core(formsync_core::Error::NotFound(format!(
                "no sync scheduled for {provider}/{form_id}"
            )))
        })?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
pub struct StopSyncQuery {
    pub workspace_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StopSyncResponse {
    pub cancelled: bool,
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn stop_sync(
    Path((provider, form_id)): Path<(String, String)>,
    Query(q): Query<StopSyncQuery>,
    ActorHeader(actor): ActorHeader,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<StopSyncResponse>, ApiError> {
    let cancelled = state
        .engine
        .stop_sync(WorkspaceId(q.workspace_id), &provider, &form_id, &actor)
        .await?;
    Ok(Json(StopSyncResponse { cancelled }))
}
