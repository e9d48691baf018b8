use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::auth::{
    google::IdentityError, jwt::TokenError, repo::StoreError, validation::ValidationError,
};

/// Every failure a handler can surface. Rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Dados inválidos")]
    MalformedRequest,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("Credenciais inválidas")]
    InvalidCredentials,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("Método não permitido")]
    MethodNotAllowed,
    #[error(transparent)]
    Upstream(#[from] IdentityError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedRequest | AppError::Validation(_) | AppError::Upstream(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidCredentials | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Upstream(IdentityError::InvalidExternalToken(_)) => {
                "Token do Google inválido".into()
            }
            AppError::Upstream(IdentityError::UpstreamUnavailable(_)) => {
                "Não foi possível validar o token do Google".into()
            }
            AppError::Internal(_) => "Erro interno do servidor".into(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail(_) => AppError::Validation(ValidationError::DuplicateEmail),
            StoreError::Other(e) => AppError::Internal(e),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(_: TokenError) -> Self {
        AppError::Unauthorized("Token inválido ou expirado")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Internal(e) => error!(error = ?e, "internal error"),
            AppError::Validation(v) => debug!(field = ?v.field(), "validation failed"),
            _ => {}
        }
        let status = self.status();
        (status, Json(json!({ "error": self.client_message() }))).into_response()
    }
}

pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

pub async fn not_found() -> AppError {
    AppError::NotFound("Rota não encontrada")
}
