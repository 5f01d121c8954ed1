//! SQLite-backed `SyncStore` implementation.
//!
//! Persists forms, responses, deletion requests, workspace forms and workspace roles in a
//! single WAL-mode SQLite file. Upserts use `ON CONFLICT ... DO UPDATE` so every write is
//! safe to replay.
//!
//! Usage:
//! ```ignore
//! let store = SqliteSyncStore::new("/path/to/formsync.db").await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::traits::{SyncStore, WorkspaceAccess, WorkspaceRole};
use crate::error::{Error as CoreError, Result as CoreResult};
use crate::form_sync::models::{
    DeletionRequest, DeletionRequestStatus, FormResponse, ResponseQuery, ResponseState,
    StandardForm, WorkspaceForm,
};
use crate::models::{Actor, UserId, WorkspaceId};

#[derive(Clone)]
pub struct SqliteSyncStore {
    pool: SqlitePool,
}

impl SqliteSyncStore {
    /// Create (or open) a store at the given file path, creating parent directories and
    /// the schema when missing.
    pub async fn new(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::backend("sqlite_sync_store", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(db_err)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(db_err)?;

        Self::migrate(pool).await
    }

    /// Private in-memory database (single connection), for tests and throwaway runs.
    pub async fn in_memory() -> CoreResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(db_err)?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> CoreResult<Self> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| CoreError::backend("sqlite_sync_store_migration", e))?;
        Ok(Self { pool })
    }

    pub async fn grant(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
        role: WorkspaceRole,
    ) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO workspace_users (workspace_id, user_id, role) VALUES (?1, ?2, ?3)
             ON CONFLICT(workspace_id, user_id) DO UPDATE SET role = excluded.role",
        )
        .bind(workspace_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS forms (
    form_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    settings_json TEXT NOT NULL,
    questions_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS responses (
    id TEXT NOT NULL UNIQUE,
    form_id TEXT NOT NULL,
    response_id TEXT NOT NULL,
    answers_json TEXT,
    data_owner_identifier TEXT,
    created_at TEXT,
    updated_at TEXT,
    published_at TEXT,
    PRIMARY KEY (form_id, response_id)
);

CREATE INDEX IF NOT EXISTS responses_owner_idx ON responses(form_id, data_owner_identifier);

CREATE TABLE IF NOT EXISTS deletion_requests (
    form_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    response_id TEXT NOT NULL,
    status TEXT NOT NULL,
    deleted_at TEXT,
    PRIMARY KEY (form_id, provider, response_id)
);

CREATE INDEX IF NOT EXISTS deletion_requests_status_idx
    ON deletion_requests(form_id, provider, status);

CREATE TABLE IF NOT EXISTS workspace_forms (
    form_id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    settings_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS workspace_forms_ws_idx ON workspace_forms(workspace_id);

CREATE TABLE IF NOT EXISTS workspace_users (
    workspace_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    PRIMARY KEY (workspace_id, user_id)
);
"#;

// ── Helpers ─────────────────────────────────────────────────────

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::backend("sqlite_sync_store", e)
}

fn json_err(e: serde_json::Error) -> CoreError {
    CoreError::backend("sqlite_sync_store_json", e)
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now())
}

fn parse_opt_dt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|v| v.parse::<DateTime<Utc>>().ok())
}

fn opt_dt(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(|d| d.to_rfc3339())
}

// ── SyncStore impl ──────────────────────────────────────────────

#[async_trait]
impl SyncStore for SqliteSyncStore {
    async fn upsert_form(&self, form: &StandardForm) -> CoreResult<()> {
        let settings_json = serde_json::to_string(&form.settings).map_err(json_err)?;
        let questions_json = serde_json::to_string(&form.questions).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO forms (form_id, title, settings_json, questions_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(form_id) DO UPDATE SET
               title = excluded.title,
               settings_json = excluded.settings_json,
               questions_json = excluded.questions_json,
               updated_at = excluded.updated_at",
        )
        .bind(&form.form_id)
        .bind(&form.title)
        .bind(&settings_json)
        .bind(&questions_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_form(&self, form_id: &str) -> CoreResult<Option<StandardForm>> {
        let row = sqlx::query(
            "SELECT form_id, title, settings_json, questions_json FROM forms WHERE form_id = ?1",
        )
        .bind(form_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| row_to_form(&r)).transpose()
    }

    async fn get_response(
        &self,
        form_id: &str,
        response_id: &str,
    ) -> CoreResult<Option<FormResponse>> {
        let row = sqlx::query(
            "SELECT id, form_id, response_id, answers_json, data_owner_identifier,
                    created_at, updated_at, published_at
             FROM responses WHERE form_id = ?1 AND response_id = ?2",
        )
        .bind(form_id)
        .bind(response_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| row_to_response(&r)).transpose()
    }

    async fn upsert_response(&self, response: &FormResponse) -> CoreResult<()> {
        let answers_json = response
            .answers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;
        // The storage id is written on insert only; an existing row keeps its identity.
        sqlx::query(
            "INSERT INTO responses (id, form_id, response_id, answers_json, data_owner_identifier,
             created_at, updated_at, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(form_id, response_id) DO UPDATE SET
               answers_json = excluded.answers_json,
               data_owner_identifier = excluded.data_owner_identifier,
               created_at = excluded.created_at,
               updated_at = excluded.updated_at,
               published_at = excluded.published_at",
        )
        .bind(response.id.to_string())
        .bind(&response.form_id)
        .bind(&response.response_id)
        .bind(&answers_json)
        .bind(&response.data_owner_identifier)
        .bind(opt_dt(response.created_at))
        .bind(opt_dt(response.updated_at))
        .bind(opt_dt(response.published_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn tombstone_responses(&self, form_id: &str, response_ids: &[String]) -> CoreResult<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut cleared = 0u64;
        for response_id in response_ids {
            let res = sqlx::query(
                "UPDATE responses SET answers_json = NULL, data_owner_identifier = NULL,
                   created_at = NULL, updated_at = NULL, published_at = NULL
                 WHERE form_id = ?1 AND response_id = ?2 AND answers_json IS NOT NULL",
            )
            .bind(form_id)
            .bind(response_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            cleared += res.rows_affected();
        }
        tx.commit().await.map_err(db_err)?;
        Ok(cleared)
    }

    async fn list_responses(
        &self,
        form_id: &str,
        query: &ResponseQuery,
    ) -> CoreResult<Vec<FormResponse>> {
        let state_clause = match query.state {
            ResponseState::Live => " AND answers_json IS NOT NULL",
            ResponseState::Tombstoned => " AND answers_json IS NULL",
            ResponseState::All => "",
        };
        let owner_clause = if query.data_owner.is_some() {
            " AND data_owner_identifier = ?4"
        } else {
            ""
        };
        let sql = format!(
            "SELECT id, form_id, response_id, answers_json, data_owner_identifier,
                    created_at, updated_at, published_at
             FROM responses WHERE form_id = ?1{state_clause}{owner_clause}
             ORDER BY created_at IS NULL, created_at DESC
             LIMIT ?2 OFFSET ?3"
        );
        let mut q = sqlx::query(&sql)
            .bind(form_id)
            .bind(query.limit as i64)
            .bind(query.offset as i64);
        if let Some(owner) = &query.data_owner {
            q = q.bind(owner);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(row_to_response).collect()
    }

    async fn upsert_deletion_request(&self, request: &DeletionRequest) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO deletion_requests (form_id, provider, response_id, status, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(form_id, provider, response_id) DO UPDATE SET
               status = excluded.status,
               deleted_at = excluded.deleted_at",
        )
        .bind(&request.form_id)
        .bind(&request.provider)
        .bind(&request.response_id)
        .bind(request.status.as_str())
        .bind(opt_dt(request.deleted_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_deletion_request(
        &self,
        form_id: &str,
        provider: &str,
        response_id: &str,
    ) -> CoreResult<Option<DeletionRequest>> {
        let row = sqlx::query(
            "SELECT form_id, provider, response_id, status, deleted_at
             FROM deletion_requests WHERE form_id = ?1 AND provider = ?2 AND response_id = ?3",
        )
        .bind(form_id)
        .bind(provider)
        .bind(response_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|r| row_to_deletion(&r)))
    }

    async fn list_pending_deletions(
        &self,
        form_id: &str,
        provider: &str,
        exclude: &BTreeSet<String>,
    ) -> CoreResult<Vec<DeletionRequest>> {
        let rows = sqlx::query(
            "SELECT form_id, provider, response_id, status, deleted_at
             FROM deletion_requests
             WHERE form_id = ?1 AND provider = ?2 AND status = 'PENDING'
             ORDER BY response_id",
        )
        .bind(form_id)
        .bind(provider)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(row_to_deletion)
            .filter(|d| !exclude.contains(&d.response_id))
            .collect())
    }

    async fn mark_deletions_succeeded(
        &self,
        form_id: &str,
        provider: &str,
        response_ids: &[String],
        deleted_at: DateTime<Utc>,
    ) -> CoreResult<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut updated = 0u64;
        for response_id in response_ids {
            let res = sqlx::query(
                "UPDATE deletion_requests SET status = 'SUCCESS', deleted_at = ?4
                 WHERE form_id = ?1 AND provider = ?2 AND response_id = ?3 AND status = 'PENDING'",
            )
            .bind(form_id)
            .bind(provider)
            .bind(response_id)
            .bind(deleted_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            updated += res.rows_affected();
        }
        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn upsert_workspace_form(&self, workspace_form: &WorkspaceForm) -> CoreResult<()> {
        let settings_json = serde_json::to_string(&workspace_form.settings).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO workspace_forms (form_id, workspace_id, user_id, settings_json,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(form_id) DO UPDATE SET
               workspace_id = excluded.workspace_id,
               user_id = excluded.user_id,
               settings_json = excluded.settings_json,
               updated_at = excluded.updated_at",
        )
        .bind(&workspace_form.form_id)
        .bind(workspace_form.workspace_id.to_string())
        .bind(workspace_form.user_id.to_string())
        .bind(&settings_json)
        .bind(workspace_form.created_at.to_rfc3339())
        .bind(workspace_form.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_workspace_form(&self, form_id: &str) -> CoreResult<Option<WorkspaceForm>> {
        let row = sqlx::query(
            "SELECT form_id, workspace_id, user_id, settings_json, created_at, updated_at
             FROM workspace_forms WHERE form_id = ?1",
        )
        .bind(form_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| row_to_workspace_form(&r)).transpose()
    }

    async fn list_workspace_forms(
        &self,
        limit: usize,
        offset: usize,
    ) -> CoreResult<Vec<WorkspaceForm>> {
        let rows = sqlx::query(
            "SELECT form_id, workspace_id, user_id, settings_json, created_at, updated_at
             FROM workspace_forms ORDER BY form_id LIMIT ?1 OFFSET ?2",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_workspace_form).collect()
    }

    async fn count_workspace_responses(&self, workspace_id: WorkspaceId) -> CoreResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM responses r
             JOIN workspace_forms wf ON wf.form_id = r.form_id
             WHERE wf.workspace_id = ?1",
        )
        .bind(workspace_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let n: i64 = row.get("n");
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl WorkspaceAccess for SqliteSyncStore {
    async fn is_admin(&self, workspace_id: WorkspaceId, actor: &Actor) -> CoreResult<bool> {
        let row = sqlx::query(
            "SELECT role FROM workspace_users WHERE workspace_id = ?1 AND user_id = ?2",
        )
        .bind(workspace_id.to_string())
        .bind(actor.user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row
            .and_then(|r| WorkspaceRole::parse(&r.get::<String, _>("role")))
            .map(|role| role.can_administer())
            .unwrap_or(false))
    }
}

// ── Row mapping ─────────────────────────────────────────────────

fn row_to_form(r: &SqliteRow) -> CoreResult<StandardForm> {
    let settings_json: String = r.get("settings_json");
    let questions_json: String = r.get("questions_json");
    Ok(StandardForm {
        form_id: r.get("form_id"),
        title: r.get("title"),
        settings: serde_json::from_str(&settings_json).map_err(json_err)?,
        questions: serde_json::from_str(&questions_json).unwrap_or_default(),
    })
}

fn row_to_response(r: &SqliteRow) -> CoreResult<FormResponse> {
    let id_str: String = r.get("id");
    let answers_json: Option<String> = r.get("answers_json");
    Ok(FormResponse {
        id: Uuid::parse_str(&id_str).unwrap_or(Uuid::nil()),
        form_id: r.get("form_id"),
        response_id: r.get("response_id"),
        answers: answers_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(json_err)?,
        data_owner_identifier: r.get("data_owner_identifier"),
        created_at: parse_opt_dt(r.get("created_at")),
        updated_at: parse_opt_dt(r.get("updated_at")),
        published_at: parse_opt_dt(r.get("published_at")),
    })
}

fn row_to_deletion(r: &SqliteRow) -> DeletionRequest {
    let status: String = r.get("status");
    DeletionRequest {
        form_id: r.get("form_id"),
        provider: r.get("provider"),
        response_id: r.get("response_id"),
        status: DeletionRequestStatus::parse(&status).unwrap_or(DeletionRequestStatus::Pending),
        deleted_at: parse_opt_dt(r.get("deleted_at")),
    }
}

fn row_to_workspace_form(r: &SqliteRow) -> CoreResult<WorkspaceForm> {
    let workspace_id: String = r.get("workspace_id");
    let user_id: String = r.get("user_id");
    let settings_json: String = r.get("settings_json");
    let created_at: String = r.get("created_at");
    let updated_at: String = r.get("updated_at");
    Ok(WorkspaceForm {
        workspace_id: WorkspaceId(Uuid::parse_str(&workspace_id).unwrap_or(Uuid::nil())),
        form_id: r.get("form_id"),
        user_id: UserId(Uuid::parse_str(&user_id).unwrap_or(Uuid::nil())),
        settings: serde_json::from_str(&settings_json).map_err(json_err)?,
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}
