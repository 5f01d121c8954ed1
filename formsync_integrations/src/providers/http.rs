//! HTTP provider client.
//!
//! Calls `POST {base_url}/{provider}/forms/convert/standard_form` with the raw form as
//! the JSON body and the caller's cookies forwarded. There are no retries; a failed
//! call surfaces immediately and the next scheduled tick tries again.

use async_trait::async_trait;
use formsync_core::form_sync::traits::ProviderClient;
use formsync_core::{ConvertedPayload, Error, ProviderAuth, Result};
use reqwest::Client;
use reqwest::header::COOKIE;
use std::time::Duration;
use tracing::instrument;

/// Header carrying the acting user id to the provider service.
pub const ON_BEHALF_OF_HEADER: &str = "x-on-behalf-of";

#[derive(Clone)]
pub struct HttpProviderClient {
    client: Client,
}

impl HttpProviderClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::backend("build provider http client", e))?;
        Ok(Self { client })
    }

    pub fn convert_url(base_url: &str, provider: &str) -> String {
        format!(
            "{}/{provider}/forms/convert/standard_form",
            base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    #[instrument(level = "info", skip(self, form, auth))]
    async fn convert(
        &self,
        base_url: &str,
        provider: &str,
        form: &serde_json::Value,
        auth: &ProviderAuth,
    ) -> Result<ConvertedPayload> {
        let url = Self::convert_url(base_url, provider);
        let mut req = self.client.post(&url).json(form);
        if let Some(cookie) = auth.cookie_header() {
            req = req.header(COOKIE, cookie);
        }
        if let Some(user) = auth.on_behalf_of {
            req = req.header(ON_BEHALF_OF_HEADER, user.to_string());
        }

        let resp = req.send().await.map_err(|e| {
            let kind = if e.is_timeout() { "timed out" } else { "unreachable" };
            Error::ProviderUnavailable(format!("provider '{provider}' {kind}: {e}"))
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(%status, provider, "provider conversion rejected");
            return Err(Error::ProviderUnavailable(format!(
                "provider '{provider}' returned {status}: {}",
                truncate(&body, 256)
            )));
        }

        let bytes = resp.bytes().await.map_err(|e| {
            Error::ProviderUnavailable(format!("provider '{provider}' body read failed: {e}"))
        })?;
        serde_json::from_slice::<ConvertedPayload>(&bytes).map_err(|e| {
            Error::MalformedPayload(format!("provider '{provider}' sent an invalid payload: {e}"))
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
