use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Professional registry a role must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registry {
    Crm,
    Crp,
}

impl Registry {
    pub fn field(self) -> &'static str {
        match self {
            Registry::Crm => "crm",
            Registry::Crp => "crp",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[default]
    #[serde(rename = "Paciente")]
    Patient,
    #[serde(rename = "Psiquiatra")]
    Psychiatrist,
    #[serde(rename = "Psicologo", alias = "Psicólogo")]
    Psychologist,
    #[serde(rename = "Medico", alias = "Médico")]
    Physician,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "Paciente",
            Role::Psychiatrist => "Psiquiatra",
            Role::Psychologist => "Psicologo",
            Role::Physician => "Medico",
        }
    }

    /// Registry number the role must present at registration and login.
    pub fn required_registry(self) -> Option<Registry> {
        match self {
            Role::Psychiatrist | Role::Physician => Some(Registry::Crm),
            Role::Psychologist => Some(Registry::Crp),
            Role::Patient => None,
        }
    }

    /// Plural used in user-facing messages ("psiquiatras", "psicólogos").
    pub fn plural_label(self) -> &'static str {
        match self {
            Role::Patient => "pacientes",
            Role::Psychiatrist => "psiquiatras",
            Role::Psychologist => "psicólogos",
            Role::Physician => "médicos",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Paciente" => Ok(Role::Patient),
            "Psiquiatra" => Ok(Role::Psychiatrist),
            "Psicologo" | "Psicólogo" => Ok(Role::Psychologist),
            "Medico" | "Médico" => Ok(Role::Physician),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    #[default]
    #[serde(rename = "ativo")]
    Active,
    #[serde(rename = "inativo")]
    Inactive,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Active => "ativo",
            AccountStatus::Inactive => "inativo",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ativo" => Ok(AccountStatus::Active),
            "inativo" => Ok(AccountStatus::Inactive),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// User record.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cpf: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // absent for Google-created accounts
    pub status: AccountStatus,
    pub role: Role,
    pub crm: Option<String>,
    pub crp: Option<String>,
    pub created_at: OffsetDateTime,
}

impl User {
    /// The registry this record's role needs but does not carry.
    pub fn missing_registry(&self) -> Option<Registry> {
        let registry = self.role.required_registry()?;
        let value = match registry {
            Registry::Crm => self.crm.as_deref(),
            Registry::Crp => self.crp.as_deref(),
        };
        match value {
            Some(v) if !v.trim().is_empty() => None,
            _ => Some(registry),
        }
    }
}

/// Fields for a user that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cpf: Option<String>,
    pub password_hash: Option<String>,
    pub status: AccountStatus,
    pub role: Role,
    pub crm: Option<String>,
    pub crp: Option<String>,
}

impl NewUser {
    pub fn into_user(self, id: Uuid, created_at: OffsetDateTime) -> User {
        User {
            id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            cpf: self.cpf,
            password_hash: self.password_hash,
            status: self.status,
            role: self.role,
            crm: self.crm,
            crp: self.crp,
            created_at,
        }
    }
}

/// Row as stored in the `users` table; enums are kept as text.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cpf: Option<String>,
    pub password_hash: Option<String>,
    pub status: String,
    pub role: String,
    pub crm: Option<String>,
    pub crp: Option<String>,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            name: r.name,
            email: r.email,
            phone: r.phone,
            cpf: r.cpf,
            password_hash: r.password_hash,
            status: r.status.parse().map_err(anyhow::Error::msg)?,
            role: r.role.parse().map_err(anyhow::Error::msg)?,
            crm: r.crm,
            crp: r.crp,
            created_at: r.created_at,
        })
    }
}
