use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::auth::{
    dto::RegisterRequest,
    repo::{StoreError, UserStore},
    repo_types::{AccountStatus, Registry, Role},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{message}")]
    InvalidFormat { field: &'static str, message: String },
    #[error("{message}")]
    MissingRequiredField { field: &'static str, message: String },
    #[error("E-mail já cadastrado.")]
    DuplicateEmail,
}

impl ValidationError {
    pub fn missing(field: &'static str) -> Self {
        Self::MissingRequiredField {
            field,
            message: format!("O campo '{field}' é obrigatório."),
        }
    }

    /// Registry absent for a role that needs it, phrased per role.
    pub fn missing_registry(registry: Registry, role: Role) -> Self {
        let label = registry.field().to_uppercase();
        Self::MissingRequiredField {
            field: registry.field(),
            message: format!("O {label} é obrigatório para {}.", role.plural_label()),
        }
    }

    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidFormat { field, .. } | Self::MissingRequiredField { field, .. } => {
                Some(field)
            }
            Self::DuplicateEmail => Some("email"),
        }
    }
}

lazy_static! {
    static ref CPF_RE: Regex = Regex::new(r"^\d{3}\.\d{3}\.\d{3}-\d{2}$").unwrap();
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

pub fn is_valid_cpf(cpf: &str) -> bool {
    CPF_RE.is_match(cpf)
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A registration that passed every check except uniqueness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRegistration {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cpf: String,
    pub password: String,
    pub status: AccountStatus,
    pub role: Role,
    pub crm: Option<String>,
    pub crp: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    non_blank(value).ok_or_else(|| ValidationError::missing(field))
}

/// Presence and format checks. Does not touch the store.
pub fn validate_registration(req: RegisterRequest) -> Result<ValidRegistration, ValidationError> {
    let name = required(req.name, "name")?;
    let email = normalize_email(&required(req.email, "email")?);
    let cpf = required(req.cpf, "cpf")?;
    // Passwords are taken verbatim; only emptiness is rejected.
    let password = req
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ValidationError::missing("password"))?;

    if !is_valid_email(&email) {
        return Err(ValidationError::InvalidFormat {
            field: "email",
            message: "E-mail inválido.".into(),
        });
    }

    if !is_valid_cpf(&cpf) {
        return Err(ValidationError::InvalidFormat {
            field: "cpf",
            message: "CPF inválido. O formato deve ser XXX.XXX.XXX-XX.".into(),
        });
    }

    let role = match non_blank(req.role) {
        Some(r) => r.parse::<Role>().map_err(|_| ValidationError::InvalidFormat {
            field: "role",
            message: "Tipo de usuário inválido.".into(),
        })?,
        None => Role::default(),
    };

    let status = match non_blank(req.status) {
        Some(s) => s.parse::<AccountStatus>().map_err(|_| ValidationError::InvalidFormat {
            field: "status",
            message: "Status inválido. Use 'ativo' ou 'inativo'.".into(),
        })?,
        None => AccountStatus::default(),
    };

    let mut crm = non_blank(req.crm);
    let mut crp = non_blank(req.crp);
    match role.required_registry() {
        Some(Registry::Crm) => {
            if crm.is_none() {
                return Err(ValidationError::missing_registry(Registry::Crm, role));
            }
            crp = None;
        }
        Some(Registry::Crp) => {
            if crp.is_none() {
                return Err(ValidationError::missing_registry(Registry::Crp, role));
            }
            crm = None;
        }
        None => {
            crm = None;
            crp = None;
        }
    }

    Ok(ValidRegistration {
        name,
        email,
        phone: non_blank(req.phone),
        cpf,
        password,
        status,
        role,
        crm,
        crp,
    })
}

/// Fails with `DuplicateEmail` when the normalized email is taken.
pub async fn ensure_email_available(
    store: &dyn UserStore,
    email: &str,
) -> Result<(), StoreError> {
    match store.find_by_email(email).await? {
        Some(_) => Err(StoreError::DuplicateEmail(email.to_string())),
        None => Ok(()),
    }
}
