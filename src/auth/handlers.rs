use axum::{
    extract::{FromRef, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use rand::{distributions::Alphanumeric, Rng};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        claims::TokenSubject,
        context::{RequestContext, CSRF_COOKIE},
        dto::{
            CsrfTokenResponse, GoogleLoginRequest, GoogleLoginResponse, LoginRequest,
            LoginResponse, ProtectedResponse, PublicUser, RefreshRequest, RefreshResponse,
            RegisterRequest, RegisterResponse, TokenPairResponse,
        },
        jwt::JwtKeys,
        services::{
            check_credentials, check_role_registry, get_or_create_external, login_fields,
            register_user, CredentialError,
        },
        validation::ValidationError,
    },
    error::{method_not_allowed, AppError},
    extract::JsonBody,
    state::AppState,
};

const CSRF_TOKEN_LEN: usize = 64;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/cadastrar_usuario/",
            post(register).fallback(method_not_allowed),
        )
        .route("/login_usuario/", post(login).fallback(method_not_allowed))
        .route("/api/token/", post(token_pair).fallback(method_not_allowed))
        .route(
            "/api/token/refresh/",
            post(token_refresh).fallback(method_not_allowed),
        )
        .route(
            "/api/auth/google/",
            post(google_login).fallback(method_not_allowed),
        )
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/protegida/",
            get(protected).fallback(method_not_allowed),
        )
        .route(
            "/get-csrf-token/",
            get(csrf_token).fallback(method_not_allowed),
        )
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let user = register_user(state.users.as_ref(), payload)
        .await
        .inspect_err(|e| warn!(error = %e, "registration rejected"))?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign_access(&TokenSubject::from(&user))?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Cadastro realizado com sucesso!",
            token,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let (email, password) = login_fields(payload)?;

    let user = match check_credentials(state.users.as_ref(), &email, &password).await {
        Ok(u) => u,
        Err(CredentialError::UnknownEmail) => {
            warn!(email = %email, "login unknown email");
            return Err(AppError::NotFound("Usuário não encontrado"));
        }
        Err(CredentialError::WrongPassword | CredentialError::NoLocalPassword) => {
            warn!(email = %email, "login invalid credentials");
            return Err(AppError::InvalidCredentials);
        }
        Err(CredentialError::Store(e)) => return Err(e.into()),
        Err(CredentialError::Hash(e)) => return Err(AppError::Internal(e)),
    };

    check_role_registry(&user)?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign_access(&TokenSubject::from(&user))?;

    info!(user_id = %user.id, "user logged in");
    Ok(Json(LoginResponse {
        message: "Login bem-sucedido!",
        token,
        role: user.role,
    }))
}

/// Credentials-for-token-pair exchange. Every credential failure is a 401.
#[instrument(skip(state, payload))]
pub async fn token_pair(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Json<TokenPairResponse>, AppError> {
    let (email, password) = login_fields(payload).map_err(|_| AppError::InvalidCredentials)?;

    let user = match check_credentials(state.users.as_ref(), &email, &password).await {
        Ok(u) => u,
        Err(CredentialError::Store(e)) => return Err(e.into()),
        Err(CredentialError::Hash(e)) => return Err(AppError::Internal(e)),
        Err(e) => {
            warn!(email = %email, reason = %e, "token pair refused");
            return Err(AppError::InvalidCredentials);
        }
    };

    let keys = JwtKeys::from_ref(&state);
    let subject = TokenSubject::from(&user);
    let access = keys.sign_access(&subject)?;
    let refresh = keys.sign_refresh(&subject)?;

    info!(user_id = %user.id, "token pair issued");
    Ok(Json(TokenPairResponse {
        access,
        refresh,
        user_id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
    }))
}

#[instrument(skip(state, payload))]
pub async fn token_refresh(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let refresh = payload
        .refresh
        .filter(|t| !t.trim().is_empty())
        .ok_or(AppError::Unauthorized("Token inválido ou expirado"))?;

    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&refresh).inspect_err(|e| {
        warn!(error = %e, "refresh rejected");
    })?;
    let access = keys.sign_access(&TokenSubject::from(&claims))?;
    Ok(Json(RefreshResponse { access }))
}

#[instrument(skip(state, payload))]
pub async fn google_login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<GoogleLoginRequest>,
) -> Result<Json<GoogleLoginResponse>, AppError> {
    let token = payload
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::Validation(ValidationError::missing("token")))?;

    let identity = state
        .identity
        .verify(&token)
        .await
        .inspect_err(|e| warn!(error = %e, "google token rejected"))?;
    let user = get_or_create_external(state.users.as_ref(), identity).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign_access(&TokenSubject::from(&user))?;
    info!(user_id = %user.id, "google sign-in");
    Ok(Json(GoogleLoginResponse { token }))
}

#[instrument(skip(ctx))]
pub async fn protected(ctx: RequestContext) -> Result<Json<ProtectedResponse>, AppError> {
    let identity = ctx
        .identity
        .ok_or(AppError::Unauthorized("Não autorizado"))?;
    Ok(Json(ProtectedResponse {
        message: "Acesso autorizado",
        user: PublicUser {
            id: identity.user_id,
            email: identity.email,
            name: identity.name,
            role: identity.role,
        },
    }))
}

fn is_well_formed_csrf(token: &str) -> bool {
    token.len() == CSRF_TOKEN_LEN && token.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Hands out the CSRF token, reusing the one already in the cookie.
#[instrument(skip(ctx))]
pub async fn csrf_token(ctx: RequestContext) -> Result<(HeaderMap, Json<CsrfTokenResponse>), AppError> {
    let token = ctx
        .csrf_token
        .filter(|t| is_well_formed_csrf(t))
        .unwrap_or_else(|| {
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(CSRF_TOKEN_LEN)
                .map(char::from)
                .collect()
        });

    let cookie = format!("{CSRF_COOKIE}={token}; Path=/; SameSite=Lax");
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(|e| AppError::Internal(e.into()))?,
    );
    Ok((headers, Json(CsrfTokenResponse { csrf_token: token })))
}
