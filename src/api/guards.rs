use std::convert::Infallible;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub(crate) const ACTOR_HEADER: &str = "x-actor-id";
const DEFAULT_ACTOR: &str = "system";
const MAX_ACTOR_LEN: usize = 128;

/// Identity recorded in the activity log. Authentication happens upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Actor(pub(crate) String);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty() && value.len() <= MAX_ACTOR_LEN)
            .unwrap_or(DEFAULT_ACTOR);

        Ok(Actor(actor.to_string()))
    }
}
