use anyhow::Context;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    auth::{
        dto::{LoginRequest, RegisterRequest},
        google::ExternalIdentity,
        password::{hash_password, verify_password},
        repo::{StoreError, UserStore},
        repo_types::{AccountStatus, NewUser, Role, User},
        validation::{ensure_email_available, normalize_email, validate_registration, ValidationError},
    },
    error::AppError,
};

/// Why a credentials check did not produce a user.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no user with this email")]
    UnknownEmail,
    #[error("password does not match")]
    WrongPassword,
    #[error("account has no local password")]
    NoLocalPassword,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Hash(#[from] anyhow::Error),
}

/// Validated → PasswordHashed → Persisted. Nothing is written before every
/// check has passed.
pub async fn register_user(store: &dyn UserStore, req: RegisterRequest) -> Result<User, AppError> {
    let reg = validate_registration(req)?;
    ensure_email_available(store, &reg.email).await?;

    let password = reg.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task")??;
    let user = store
        .create(NewUser {
            name: reg.name,
            email: reg.email,
            phone: reg.phone,
            cpf: Some(reg.cpf),
            password_hash: Some(password_hash),
            status: reg.status,
            role: reg.role,
            crm: reg.crm,
            crp: reg.crp,
        })
        .await?;

    info!(user_id = %user.id, role = %user.role, "user registered");
    Ok(user)
}

/// Email and password presence, with the email normalized.
pub fn login_fields(req: LoginRequest) -> Result<(String, String), ValidationError> {
    let email = req
        .email
        .map(|e| normalize_email(&e))
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ValidationError::missing("email"))?;
    let password = req
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ValidationError::missing("password"))?;
    Ok((email, password))
}

/// UserLookup → PasswordVerified. Store contents are never modified.
pub async fn check_credentials(
    store: &dyn UserStore,
    email: &str,
    password: &str,
) -> Result<User, CredentialError> {
    let user = store
        .find_by_email(email)
        .await?
        .ok_or(CredentialError::UnknownEmail)?;

    let Some(hash) = user.password_hash.clone() else {
        warn!(user_id = %user.id, "password login attempted on external account");
        return Err(CredentialError::NoLocalPassword);
    };

    let password = password.to_owned();
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context("password verification task")??;
    if !matches {
        return Err(CredentialError::WrongPassword);
    }
    Ok(user)
}

/// Data-integrity guard run at login: the stored role must still carry its registry.
pub fn check_role_registry(user: &User) -> Result<(), ValidationError> {
    match user.missing_registry() {
        Some(registry) => {
            warn!(user_id = %user.id, role = %user.role, field = registry.field(), "stored user lacks registry");
            let label = registry.field().to_uppercase();
            Err(ValidationError::MissingRequiredField {
                field: registry.field(),
                message: format!("{label} obrigatório para {}", user.role.plural_label()),
            })
        }
        None => Ok(()),
    }
}

/// Local account for an externally verified identity, created on first sight.
pub async fn get_or_create_external(
    store: &dyn UserStore,
    identity: ExternalIdentity,
) -> Result<User, AppError> {
    if let Some(user) = store.find_by_email(&identity.email).await? {
        debug!(user_id = %user.id, "external identity matched existing user");
        return Ok(user);
    }

    let new = NewUser {
        name: identity.name,
        email: identity.email.clone(),
        phone: None,
        cpf: None,
        password_hash: None,
        status: AccountStatus::Active,
        role: Role::Patient,
        crm: None,
        crp: None,
    };
    match store.create(new).await {
        Ok(user) => {
            info!(user_id = %user.id, "user created from external identity");
            Ok(user)
        }
        // Lost a race with a concurrent sign-in for the same email.
        Err(StoreError::DuplicateEmail(_)) => store
            .find_by_email(&identity.email)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("user vanished after duplicate insert"))),
        Err(e) => Err(e.into()),
    }
}
