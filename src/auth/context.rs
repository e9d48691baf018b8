use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::{jwt::JwtKeys, repo_types::Role},
    state::AppState,
};

pub const CSRF_COOKIE: &str = "csrftoken";

/// Caller identity taken from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
}

/// Per-request state handed to handlers explicitly.
///
/// Filled by [`resolve_context`] before any handler runs. A missing or invalid
/// bearer token leaves `identity` empty; rejecting is up to the handler.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Option<Identity>,
    pub csrf_token: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap, keys: &JwtKeys) -> Self {
        Self {
            identity: bearer_token(headers).and_then(|t| identity_from_token(t, keys)),
            csrf_token: cookie(headers, CSRF_COOKIE).map(str::to_owned),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn identity_from_token(token: &str, keys: &JwtKeys) -> Option<Identity> {
    match keys.verify_access(token) {
        Ok(claims) => Some(Identity {
            user_id: claims.sub,
            email: claims.email,
            name: claims.name,
            role: claims.role,
        }),
        Err(e) => {
            debug!(error = %e, "ignoring unusable bearer token");
            None
        }
    }
}

fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

/// Middleware stage that attaches a [`RequestContext`] to every request.
pub async fn resolve_context(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let keys = JwtKeys::from_ref(&state);
    let ctx = RequestContext::from_headers(req.headers(), &keys);
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}
