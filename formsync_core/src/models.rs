use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
    #[error("unknown plan: {0}")]
    UnknownPlan(String),
}

/// Workspace identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub Uuid);

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for WorkspaceId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for WorkspaceId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| IdParseError::InvalidUuid(s.to_string()))?;
        Ok(Self(id))
    }
}

/// User identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for UserId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| IdParseError::InvalidUuid(s.to_string()))?;
        Ok(Self(id))
    }
}

/// Subscription plan of an actor. Only `Pro` is exempt from the import quota.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Free,
    Pro,
}

impl Plan {
    pub fn is_constrained(&self) -> bool {
        !matches!(self, Plan::Pro)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
        }
    }
}

impl FromStr for Plan {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "pro" => Ok(Plan::Pro),
            other => Err(IdParseError::UnknownPlan(other.to_string())),
        }
    }
}

/// The user triggering an import, or on whose behalf a scheduled refresh runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub email: Option<String>,
    #[serde(default)]
    pub plan: Plan,
}

impl Actor {
    pub fn new(user_id: impl Into<UserId>, plan: Plan) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            plan,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Credentials forwarded to a provider so it can authenticate the call on its side.
///
/// Interactive imports forward the caller's session cookies; scheduled refreshes run
/// unattended and only carry the acting user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderAuth {
    pub cookies: BTreeMap<String, String>,
    pub on_behalf_of: Option<UserId>,
}

impl ProviderAuth {
    pub fn from_cookies(cookies: BTreeMap<String, String>, actor: &Actor) -> Self {
        Self {
            cookies,
            on_behalf_of: Some(actor.user_id),
        }
    }

    pub fn unattended(actor: &Actor) -> Self {
        Self {
            cookies: BTreeMap::new(),
            on_behalf_of: Some(actor.user_id),
        }
    }

    /// Render cookies as a single `Cookie` header value (`a=1; b=2`).
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parses_case_insensitively() {
        assert_eq!("PRO".parse::<Plan>(), Ok(Plan::Pro));
        assert_eq!(" free ".parse::<Plan>(), Ok(Plan::Free));
        assert!("gold".parse::<Plan>().is_err());
        assert!(Plan::Free.is_constrained());
        assert!(!Plan::Pro.is_constrained());
    }

    #[test]
    fn cookie_header_joins_sorted_pairs() {
        let actor = Actor::new(Uuid::nil(), Plan::Free);
        let mut cookies = BTreeMap::new();
        cookies.insert("b".to_string(), "2".to_string());
        cookies.insert("Authorization".to_string(), "tok".to_string());
        let auth = ProviderAuth::from_cookies(cookies, &actor);
        assert_eq!(auth.cookie_header().as_deref(), Some("Authorization=tok; b=2"));
        assert_eq!(ProviderAuth::unattended(&actor).cookie_header(), None);
    }
}
