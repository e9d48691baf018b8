use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;

use crate::auth::{
    google::{GoogleVerifier, IdentityVerifier},
    memory::MemoryUserStore,
    repo::{PgUserStore, UserStore},
};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let users = match &config.database_url {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect(url)
                    .await
                    .context("connect to database")?;

                // Run migrations if present
                if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                    warn!(error = %e, "migration failed; continuing");
                }
                Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>
            }
            None => {
                warn!("DATABASE_URL not set; users are kept in memory and lost on restart");
                Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>
            }
        };

        let google = GoogleVerifier::new(&config.google)?;
        if !google.checks_audience() {
            warn!("GOOGLE_CLIENT_ID not set; Google tokens issued to any client are accepted");
        }
        let identity = Arc::new(google) as Arc<dyn IdentityVerifier>;

        Ok(Self::from_parts(users, identity, config))
    }

    pub fn from_parts(
        users: Arc<dyn UserStore>,
        identity: Arc<dyn IdentityVerifier>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            users,
            identity,
            config,
        }
    }

    /// In-memory state for tests; Google tokens named `valid:<email>` are accepted.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::auth::google::{ExternalIdentity, IdentityError};
        use async_trait::async_trait;

        struct FakeVerifier;
        #[async_trait]
        impl IdentityVerifier for FakeVerifier {
            async fn verify(&self, token: &str) -> Result<ExternalIdentity, IdentityError> {
                match token.strip_prefix("valid:") {
                    Some(email) => Ok(ExternalIdentity {
                        email: email.to_string(),
                        name: "Google User".to_string(),
                    }),
                    None if token == "offline" => {
                        Err(IdentityError::UpstreamUnavailable("timed out".into()))
                    }
                    None => Err(IdentityError::InvalidExternalToken("status 400".into())),
                }
            }
        }

        let config = Arc::new(AppConfig {
            database_url: None,
            max_connections: 1,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            google: crate::config::GoogleConfig {
                tokeninfo_url: "http://127.0.0.1:9/tokeninfo".into(),
                client_id: None,
                timeout_secs: 1,
            },
        });

        Self::from_parts(
            Arc::new(MemoryUserStore::new()),
            Arc::new(FakeVerifier),
            config,
        )
    }
}
