use crate::form_sync::traits::ProviderRegistry;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Fixed provider name to base URL table, usually loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticProviderRegistry {
    urls: BTreeMap<String, String>,
}

impl StaticProviderRegistry {
    pub fn new(urls: BTreeMap<String, String>) -> Self {
        let urls = urls
            .into_iter()
            .map(|(name, url)| (name, url.trim_end_matches('/').to_string()))
            .collect();
        Self { urls }
    }

    pub fn with_provider(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.urls
            .insert(name.into(), url.trim_end_matches('/').to_string());
        self
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.urls.keys().map(String::as_str)
    }
}

#[async_trait]
impl ProviderRegistry for StaticProviderRegistry {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn base_url(&self, provider: &str) -> Result<String> {
        self.urls
            .get(provider)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("provider '{provider}' not configured")))
    }
}
