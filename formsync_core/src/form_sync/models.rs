use crate::models::{Actor, UserId, WorkspaceId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Form-level settings as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSettings {
    #[serde(default)]
    pub embed_url: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    /// Originating provider, e.g. "typeform" or "google".
    pub provider: String,
    #[serde(default)]
    pub custom_url: Option<String>,
}

/// Canonical form definition, overwritten wholesale on every import or re-sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardForm {
    pub form_id: String,
    #[serde(default)]
    pub title: String,
    pub settings: FormSettings,
    /// Question definitions; opaque to the sync engine.
    #[serde(default)]
    pub questions: Vec<serde_json::Value>,
}

impl StandardForm {
    #[tracing::instrument(level = "debug", skip(self), fields(form_id = %self.form_id))]
    pub fn validate(&self) -> Result<()> {
        if self.form_id.trim().is_empty() {
            return Err(Error::MalformedPayload("form_id is empty".to_string()));
        }
        if self.settings.provider.trim().is_empty() {
            return Err(Error::MalformedPayload(format!(
                "form '{}' has no provider",
                self.form_id
            )));
        }
        Ok(())
    }
}

/// One answer to one question. Providers fill whichever variant matches the question type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<serde_json::Number>,
    /// Choices, booleans, dates, file urls... kept as the provider sent them.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl Answer {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            text: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn email(value: impl Into<String>) -> Self {
        Self {
            email: Some(value.into()),
            ..Default::default()
        }
    }

    /// Value identifying the person behind a response.
    ///
    /// Precedence is text, then email, then phone number, then number. Blank strings
    /// are skipped.
    pub fn data_owner_value(&self) -> Option<String> {
        let non_blank = |s: &Option<String>| s.as_ref().filter(|v| !v.trim().is_empty()).cloned();
        non_blank(&self.text)
            .or_else(|| non_blank(&self.email))
            .or_else(|| non_blank(&self.phone_number))
            .or_else(|| self.number.as_ref().map(|n| n.to_string()))
    }
}

/// A response as returned by the provider's conversion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub response_id: String,
    #[serde(default)]
    pub form_id: Option<String>,
    #[serde(default)]
    pub answers: BTreeMap<String, Answer>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Body of a successful conversion call. Either field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvertedPayload {
    #[serde(default)]
    pub form: Option<StandardForm>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub responses: Vec<ProviderResponse>,
}

impl ConvertedPayload {
    pub fn is_empty(&self) -> bool {
        self.form.is_none() && self.responses.is_empty()
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A stored response.
///
/// `id` is the storage identity and never changes once assigned. A response with
/// `answers == None` is tombstoned: it still counts, but has no content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormResponse {
    pub id: Uuid,
    pub form_id: String,
    pub response_id: String,
    pub answers: Option<BTreeMap<String, Answer>>,
    pub data_owner_identifier: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

impl FormResponse {
    /// Build the stored form of `incoming`, reusing `existing_id` when the response is
    /// already known.
    pub fn from_provider(
        existing_id: Option<Uuid>,
        form_id: &str,
        incoming: ProviderResponse,
        data_owner_field: &str,
    ) -> Self {
        let data_owner_identifier = incoming
            .answers
            .get(data_owner_field)
            .and_then(Answer::data_owner_value);
        Self {
            id: existing_id.unwrap_or_else(Uuid::new_v4),
            form_id: form_id.to_string(),
            response_id: incoming.response_id,
            answers: Some(incoming.answers),
            data_owner_identifier,
            created_at: incoming.created_at,
            updated_at: incoming.updated_at,
            published_at: incoming.published_at,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.answers.is_none()
    }

    /// Clear content fields, keeping identity and form association.
    pub fn tombstone(&mut self) {
        self.answers = None;
        self.data_owner_identifier = None;
        self.created_at = None;
        self.updated_at = None;
        self.published_at = None;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionRequestStatus {
    Pending,
    Success,
}

impl DeletionRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionRequestStatus::Pending => "PENDING",
            DeletionRequestStatus::Success => "SUCCESS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DeletionRequestStatus::Pending),
            "SUCCESS" => Some(DeletionRequestStatus::Success),
            _ => None,
        }
    }
}

/// The provider reported that a response no longer exists upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub form_id: String,
    pub provider: String,
    pub response_id: String,
    pub status: DeletionRequestStatus,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DeletionRequest {
    pub fn pending(
        form_id: impl Into<String>,
        provider: impl Into<String>,
        response_id: impl Into<String>,
    ) -> Self {
        Self {
            form_id: form_id.into(),
            provider: provider.into(),
            response_id: response_id.into(),
            status: DeletionRequestStatus::Pending,
            deleted_at: None,
        }
    }
}

/// Per-workspace snapshot of how a form is exposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceFormSettings {
    pub custom_url: String,
    pub embed_url: String,
    pub response_data_owner_field: String,
    /// Registry name used for the import, not necessarily what the form reports.
    pub provider: String,
    pub private: bool,
}

/// Binds an imported form to exactly one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceForm {
    pub workspace_id: WorkspaceId,
    pub form_id: String,
    pub user_id: UserId,
    pub settings: WorkspaceFormSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceForm {
    /// Association for a freshly imported form. The form is private unless the
    /// provider reports it as public.
    ///
    /// `provider` is the registry name the import went through; it keys the refresh job.
    pub fn for_import(
        workspace_id: WorkspaceId,
        user_id: UserId,
        provider: &str,
        form: &StandardForm,
        data_owner_field: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            workspace_id,
            form_id: form.form_id.clone(),
            user_id,
            settings: WorkspaceFormSettings {
                custom_url: form.form_id.clone(),
                embed_url: form.settings.embed_url.clone().unwrap_or_default(),
                response_data_owner_field: data_owner_field.to_string(),
                provider: provider.to_string(),
                private: !form.settings.is_public,
            },
            created_at: now,
            updated_at: now,
        }
    }
}

/// Body of an import request: the raw provider form plus the field naming the data owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormImportRequest {
    pub form: serde_json::Value,
    pub response_data_owner: String,
}

/// Deterministic scheduler key for a provider form.
pub fn job_key(provider: &str, form_id: &str) -> String {
    format!("{provider}_{form_id}")
}

/// Everything a recurring refresh needs to re-run unattended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJobPayload {
    pub provider: String,
    pub form_id: String,
    pub data_owner_field: String,
    pub actor: Actor,
}

impl SyncJobPayload {
    pub fn job_key(&self) -> String {
        job_key(&self.provider, &self.form_id)
    }

    /// Form reference sent to the provider on refresh; the provider resolves the
    /// current definition itself.
    pub fn form_reference(&self) -> serde_json::Value {
        serde_json::json!({ "form_id": self.form_id })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFailure {
    pub response_id: String,
    pub error: String,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// The persisted form; `None` when the payload carried nothing to reconcile.
    pub form: Option<StandardForm>,
    pub responses_upserted: u64,
    pub response_failures: Vec<ResponseFailure>,
    pub seen_ids: BTreeSet<String>,
    /// Response ids whose deletion was confirmed in this run.
    pub confirmed_deletions: Vec<String>,
    pub tombstoned: u64,
}

impl ReconcileReport {
    pub fn nothing_to_reconcile() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.form.is_none()
    }
}

/// Which stored responses a read-model listing should include.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseState {
    #[default]
    Live,
    Tombstoned,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseQuery {
    #[serde(default)]
    pub state: ResponseState,
    #[serde(default)]
    pub data_owner: Option<String>,
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl Default for ResponseQuery {
    fn default() -> Self {
        Self {
            state: ResponseState::Live,
            data_owner: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl ResponseQuery {
    pub fn matches(&self, response: &FormResponse) -> bool {
        let state_ok = match self.state {
            ResponseState::Live => !response.is_tombstoned(),
            ResponseState::Tombstoned => response.is_tombstoned(),
            ResponseState::All => true,
        };
        let owner_ok = match &self.data_owner {
            Some(owner) => response.data_owner_identifier.as_deref() == Some(owner.as_str()),
            None => true,
        };
        state_ok && owner_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_owner_prefers_text_over_everything() {
        let answer: Answer = serde_json::from_value(serde_json::json!({
            "text": "alice",
            "email": "alice@example.com",
            "phone_number": "+15550100",
            "number": 7
        }))
        .unwrap();
        assert_eq!(answer.data_owner_value().as_deref(), Some("alice"));
    }

    #[test]
    fn data_owner_falls_through_in_order() {
        let email_and_phone = Answer {
            email: Some("bob@example.com".into()),
            phone_number: Some("+15550101".into()),
            ..Default::default()
        };
        assert_eq!(
            email_and_phone.data_owner_value().as_deref(),
            Some("bob@example.com")
        );

        let blank_text_phone = Answer {
            text: Some("  ".into()),
            phone_number: Some("+15550102".into()),
            ..Default::default()
        };
        assert_eq!(
            blank_text_phone.data_owner_value().as_deref(),
            Some("+15550102")
        );

        let number_only: Answer = serde_json::from_value(serde_json::json!({"number": 42})).unwrap();
        assert_eq!(number_only.data_owner_value().as_deref(), Some("42"));

        assert_eq!(Answer::default().data_owner_value(), None);
    }

    #[test]
    fn converted_payload_tolerates_missing_and_null_fields() {
        let empty: ConvertedPayload = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());

        let null_responses: ConvertedPayload =
            serde_json::from_str(r#"{"form": null, "responses": null}"#).unwrap();
        assert!(null_responses.is_empty());
    }

    #[test]
    fn answer_keeps_unknown_variants() {
        let answer: Answer = serde_json::from_value(serde_json::json!({
            "choices": {"values": ["a", "b"]},
            "boolean": true
        }))
        .unwrap();
        assert_eq!(answer.other.len(), 2);
        assert_eq!(answer.data_owner_value(), None);
    }

    #[test]
    fn tombstone_clears_content_but_keeps_identity() {
        let mut answers = BTreeMap::new();
        answers.insert("q1".to_string(), Answer::email("c@example.com"));
        let incoming = ProviderResponse {
            response_id: "R1".into(),
            form_id: None,
            answers,
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
            published_at: None,
        };
        let mut stored = FormResponse::from_provider(None, "F1", incoming, "q1");
        let id = stored.id;
        assert_eq!(stored.data_owner_identifier.as_deref(), Some("c@example.com"));

        stored.tombstone();
        assert!(stored.is_tombstoned());
        assert_eq!(stored.id, id);
        assert_eq!(stored.form_id, "F1");
        assert_eq!(stored.response_id, "R1");
        assert!(stored.data_owner_identifier.is_none());
        assert!(stored.created_at.is_none() && stored.updated_at.is_none());
    }

    #[test]
    fn workspace_form_privacy_negates_public_flag() {
        let form = StandardForm {
            form_id: "F1".into(),
            title: "Survey".into(),
            settings: FormSettings {
                embed_url: None,
                is_public: true,
                provider: "acme".into(),
                custom_url: None,
            },
            questions: vec![],
        };
        let wf = WorkspaceForm::for_import(
            WorkspaceId(Uuid::nil()),
            UserId(Uuid::nil()),
            "acme",
            &form,
            "q1",
            Utc::now(),
        );
        assert!(!wf.settings.private);
        assert_eq!(wf.settings.custom_url, "F1");
        assert_eq!(wf.settings.embed_url, "");
        assert_eq!(job_key("acme", "F1"), "acme_F1");
    }
}
