use crate::error::ApiError;
use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use formsync_core::{Actor, Plan, UserId};
use std::collections::BTreeMap;
use std::future;
use std::str::FromStr;

/// Acting user, from `x-user-id` (required), `x-user-email` and `x-user-plan`.
#[derive(Debug, Clone)]
pub struct ActorHeader(pub Actor);

impl<S> FromRequestParts<S> for ActorHeader
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    #[tracing::instrument(level = "debug", name = "extract.actor", skip_all)]
    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        future::ready(actor_from_parts(parts))
    }
}

fn actor_from_parts(parts: &Parts) -> Result<ActorHeader, ApiError> {
    let raw = parts
        .headers
        .get("x-user-id")
        .ok_or(ApiError::MissingUserId)?
        .to_str()
        .map_err(|e| ApiError::InvalidUserId(e.to_string()))?;
    let user_id = UserId::from_str(raw).map_err(|e| ApiError::InvalidUserId(e.to_string()))?;

    let plan = match parts.headers.get("x-user-plan") {
        Some(v) => {
            let v = v
                .to_str()
                .map_err(|e| ApiError::InvalidPlan(e.to_string()))?;
            Plan::from_str(v).map_err(|e| ApiError::InvalidPlan(e.to_string()))?
        }
        None => Plan::default(),
    };

    let mut actor = Actor::new(user_id, plan);
    if let Some(email) = parts
        .headers
        .get("x-user-email")
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.trim().is_empty())
    {
        actor = actor.with_email(email);
    }
    Ok(ActorHeader(actor))
}

/// Cookies sent by the caller, forwarded to the provider on import.
#[derive(Debug, Clone, Default)]
pub struct ProviderCookies(pub BTreeMap<String, String>);

impl<S> FromRequestParts<S> for ProviderCookies
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    #[tracing::instrument(level = "debug", name = "extract.cookies", skip_all)]
    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let cookies = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                let k = k.trim();
                (!k.is_empty()).then(|| (k.to_string(), v.trim().to_string()))
            })
            .collect();
        future::ready(Ok(Self(cookies)))
    }
}
