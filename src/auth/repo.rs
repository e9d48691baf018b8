use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User, UserRow};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered: {0}")]
    DuplicateEmail(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence for user records. Emails are stored already normalized.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    /// Inserts a user. Fails with `DuplicateEmail` instead of overwriting.
    async fn create(&self, new: NewUser) -> Result<User, StoreError>;
}

const USER_COLUMNS: &str =
    "id, name, email, phone, cpf, password_hash, status, role, crm, crp, created_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("select user by email")?;
        Ok(row.map(User::try_from).transpose()?)
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let email = new.email.clone();
        let result = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, name, email, phone, cpf, password_hash, status, role, crm, crp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(&new.cpf)
        .bind(&new.password_hash)
        .bind(new.status.as_str())
        .bind(new.role.as_str())
        .bind(&new.crm)
        .bind(&new.crp)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(row) => Ok(User::try_from(row)?),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateEmail(email))
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert user").into()),
        }
    }
}
