use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::AppError;

/// JSON body parsed regardless of `Content-Type`; any failure is `Dados inválidos`.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|e| {
            warn!(error = %e, "failed to read request body");
            AppError::MalformedRequest
        })?;
        serde_json::from_slice(&bytes).map(JsonBody).map_err(|e| {
            warn!(error = %e, "invalid json body");
            AppError::MalformedRequest
        })
    }
}
