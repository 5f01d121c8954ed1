use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the sync engine and its provider client.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Period of the recurring refresh registered for every imported form.
    pub refresh_interval: Duration,
    pub provider_timeout: Duration,
    /// Stored responses a constrained-plan workspace may hold before imports are refused.
    pub response_quota: u64,
    /// Provider name -> conversion service base URL.
    pub provider_urls: BTreeMap<String, String>,
    /// SQLite database file; `None` keeps everything in memory.
    pub sqlite_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60 * 60),
            provider_timeout: Duration::from_secs(60),
            response_quota: 1000,
            provider_urls: BTreeMap::new(),
            sqlite_path: None,
        }
    }
}

impl SyncConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let refresh_minutes = parse_u64(&get, "FORMSYNC_REFRESH_INTERVAL_MINUTES")?
            .unwrap_or(defaults.refresh_interval.as_secs() / 60);
        let timeout_secs = parse_u64(&get, "FORMSYNC_PROVIDER_TIMEOUT_SECS")?
            .unwrap_or(defaults.provider_timeout.as_secs());
        let response_quota =
            parse_u64(&get, "FORMSYNC_RESPONSE_QUOTA")?.unwrap_or(defaults.response_quota);
        let provider_urls = match get("FORMSYNC_PROVIDER_URLS") {
            Some(raw) => parse_provider_urls(&raw)?,
            None => BTreeMap::new(),
        };
        let sqlite_path = get("FORMSYNC_SQLITE_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let cfg = Self {
            refresh_interval: Duration::from_secs(refresh_minutes.saturating_mul(60)),
            provider_timeout: Duration::from_secs(timeout_secs),
            response_quota,
            provider_urls,
            sqlite_path,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval.is_zero() {
            return Err(Error::InvalidInput(
                "refresh_interval must be > 0".to_string(),
            ));
        }
        if self.provider_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "provider_timeout must be > 0".to_string(),
            ));
        }
        for (name, url) in &self.provider_urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::InvalidInput(format!(
                    "provider '{name}' url must be http(s), got '{url}'"
                )));
            }
        }
        Ok(())
    }
}

fn parse_u64(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    match get(key) {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::InvalidInput(format!("{key} must be an integer, got '{v}'"))),
        None => Ok(None),
    }
}

/// Parse `name=url,name=url`. Whitespace around entries is ignored.
pub fn parse_provider_urls(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, url) = entry.split_once('=').ok_or_else(|| {
            Error::InvalidInput(format!("provider entry '{entry}' is not name=url"))
        })?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return Err(Error::InvalidInput(format!(
                "provider entry '{entry}' has an empty name or url"
            )));
        }
        out.insert(name.to_string(), url.to_string());
    }
    Ok(out)
}
