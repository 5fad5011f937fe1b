//! Identity service: registration, password verification, session tokens,
//! and API keys.
//!
//! Passwords are argon2id hashes (memory-hard, well over the 100 ms floor
//! on commodity hardware with default parameters). Session tokens are HS256
//! JWTs carrying `sub = user_id`; the signing key comes from configuration
//! or is generated at boot, which invalidates outstanding sessions across
//! restarts.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::StatusCode;
use cinderbox_core::config::AuthConfig;
use cinderbox_core::generate_api_key;
use cinderbox_registry::{RegistryError, RegistryStore, UserRow};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Minimum accepted password length.
const MIN_PASSWORD_LEN: usize = 8;

/// Identity operation errors.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("username already registered")]
    DuplicateUsername,

    #[error("email already registered")]
    DuplicateEmail,

    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,

    #[error("invalid username or email")]
    InvalidRegistration(String),

    #[error("incorrect username or password")]
    InvalidCredentials,

    #[error("could not validate credentials")]
    InvalidToken,

    #[error("invalid API key")]
    InvalidKey,

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IdentityError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateUsername | Self::DuplicateEmail => "conflict",
            Self::WeakPassword | Self::InvalidRegistration(_) => "invalid_argument",
            Self::InvalidCredentials | Self::InvalidToken | Self::InvalidKey => "not_authorized",
            Self::Registry(_) | Self::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DuplicateUsername | Self::DuplicateEmail => StatusCode::CONFLICT,
            Self::WeakPassword | Self::InvalidRegistration(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::InvalidToken | Self::InvalidKey => {
                StatusCode::UNAUTHORIZED
            }
            Self::Registry(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type alias for identity operations.
pub type IdentityResult<T> = std::result::Result<T, IdentityError>;

/// Session token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    /// User id.
    sub: String,
    /// Expiry timestamp.
    exp: i64,
    /// Issued-at timestamp.
    iat: i64,
}

/// User identity and credential service.
pub struct IdentityService {
    registry: Arc<dyn RegistryStore>,
    jwt_secret: String,
    token_expiry: time::Duration,
}

impl IdentityService {
    pub fn new(registry: Arc<dyn RegistryStore>, config: &AuthConfig) -> Self {
        let jwt_secret = config.session_signing_key.clone().unwrap_or_else(|| {
            tracing::warn!(
                "no session signing key configured; generating one for this boot \
                 (outstanding sessions will not survive a restart)"
            );
            Uuid::new_v4().to_string()
        });
        Self {
            registry,
            jwt_secret,
            token_expiry: time::Duration::minutes(config.token_expiry_mins),
        }
    }

    /// Register a new user with a freshly minted API key.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> IdentityResult<UserRow> {
        validate_username(username)?;
        validate_email(email)?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(IdentityError::WeakPassword);
        }

        if self.registry.get_user_by_username(username).await?.is_some() {
            return Err(IdentityError::DuplicateUsername);
        }
        if self.registry.get_user_by_email(email).await?.is_some() {
            return Err(IdentityError::DuplicateEmail);
        }

        let password_hash = hash_password(password.to_string()).await?;
        let user = UserRow {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            api_key: generate_api_key(),
            created_at: OffsetDateTime::now_utc(),
            is_active: true,
        };

        match self.registry.create_user(&user).await {
            Ok(()) => Ok(user),
            // Lost a race with a concurrent registration of the same name.
            Err(RegistryError::AlreadyExists(_)) => Err(IdentityError::DuplicateUsername),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify a username/password pair and return the user.
    pub async fn verify_password(&self, username: &str, password: &str) -> IdentityResult<UserRow> {
        let user = self
            .registry
            .get_user_by_username(username)
            .await?
            .filter(|user| user.is_active)
            .ok_or(IdentityError::InvalidCredentials)?;

        let stored = user.password_hash.clone();
        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || {
            PasswordHash::new(&stored)
                .map(|parsed| {
                    Argon2::default()
                        .verify_password(password.as_bytes(), &parsed)
                        .is_ok()
                })
                .unwrap_or(false)
        })
        .await
        .map_err(|e| IdentityError::Internal(e.to_string()))?;

        if verified {
            Ok(user)
        } else {
            Err(IdentityError::InvalidCredentials)
        }
    }

    /// Issue a signed session token for a user.
    pub fn issue_token(&self, user: &UserRow) -> IdentityResult<String> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user.user_id.to_string(),
            exp: (now + self.token_expiry).unix_timestamp(),
            iat: now.unix_timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| IdentityError::Internal(e.to_string()))
    }

    /// Resolve a bearer token to its active user.
    pub async fn resolve_token(&self, token: &str) -> IdentityResult<UserRow> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| IdentityError::InvalidToken)?;

        let user_id =
            Uuid::parse_str(&data.claims.sub).map_err(|_| IdentityError::InvalidToken)?;
        self.registry
            .get_user(user_id)
            .await?
            .filter(|user| user.is_active)
            .ok_or(IdentityError::InvalidToken)
    }

    /// Resolve an API key to its active user.
    pub async fn resolve_api_key(&self, api_key: &str) -> IdentityResult<UserRow> {
        self.registry
            .get_user_by_api_key(api_key)
            .await?
            .filter(|user| user.is_active)
            .ok_or(IdentityError::InvalidKey)
    }

    /// Replace a user's API key, invalidating the old one.
    pub async fn regenerate_api_key(&self, user_id: Uuid) -> IdentityResult<String> {
        let new_key = generate_api_key();
        self.registry.update_api_key(user_id, &new_key).await?;
        Ok(new_key)
    }
}

/// Hash a password off the async runtime; argon2 deliberately takes
/// long enough to matter.
async fn hash_password(password: String) -> IdentityResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| IdentityError::Internal(e.to_string()))
    })
    .await
    .map_err(|e| IdentityError::Internal(e.to_string()))?
}

fn validate_username(username: &str) -> IdentityResult<()> {
    if username.is_empty() || username.len() > 64 {
        return Err(IdentityError::InvalidRegistration(
            "username must be 1-64 characters".to_string(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(IdentityError::InvalidRegistration(
            "username may contain letters, digits, '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> IdentityResult<()> {
    let valid = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(IdentityError::InvalidRegistration(
            "invalid email address".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinderbox_registry::SqliteStore;

    async fn service() -> (tempfile::TempDir, IdentityService) {
        let temp = tempfile::tempdir().unwrap();
        let registry: Arc<dyn RegistryStore> = Arc::new(
            SqliteStore::new(temp.path().join("registry.db"))
                .await
                .unwrap(),
        );
        let config = AuthConfig {
            session_signing_key: Some("test-signing-key".to_string()),
            token_expiry_mins: 300,
        };
        (temp, IdentityService::new(registry, &config))
    }

    #[tokio::test]
    async fn register_then_login_round_trips() {
        let (_temp, identity) = service().await;

        let user = identity
            .register("alice", "alice@example.test", "password123")
            .await
            .unwrap();
        assert!(user.password_hash.starts_with("$argon2"));
        assert_eq!(user.api_key.len(), cinderbox_core::apikey::API_KEY_LEN);

        let verified = identity
            .verify_password("alice", "password123")
            .await
            .unwrap();
        assert_eq!(verified.user_id, user.user_id);

        let err = identity
            .verify_password("alice", "wrong-password")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidCredentials));
    }

    #[tokio::test]
    async fn weak_passwords_and_bad_emails_are_rejected() {
        let (_temp, identity) = service().await;

        let err = identity
            .register("alice", "alice@example.test", "short")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::WeakPassword));

        let err = identity
            .register("alice", "not-an-email", "password123")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidRegistration(_)));
    }

    #[tokio::test]
    async fn duplicate_registrations_conflict() {
        let (_temp, identity) = service().await;
        identity
            .register("alice", "alice@example.test", "password123")
            .await
            .unwrap();

        let err = identity
            .register("alice", "other@example.test", "password123")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::DuplicateUsername));

        let err = identity
            .register("bob", "alice@example.test", "password123")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::DuplicateEmail));
    }

    #[tokio::test]
    async fn tokens_resolve_to_their_user() {
        let (_temp, identity) = service().await;
        let user = identity
            .register("alice", "alice@example.test", "password123")
            .await
            .unwrap();

        let token = identity.issue_token(&user).unwrap();
        let resolved = identity.resolve_token(&token).await.unwrap();
        assert_eq!(resolved.user_id, user.user_id);

        let err = identity.resolve_token("garbage").await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken));
    }

    #[tokio::test]
    async fn api_keys_resolve_and_regenerate() {
        let (_temp, identity) = service().await;
        let user = identity
            .register("alice", "alice@example.test", "password123")
            .await
            .unwrap();

        let resolved = identity.resolve_api_key(&user.api_key).await.unwrap();
        assert_eq!(resolved.user_id, user.user_id);

        let new_key = identity.regenerate_api_key(user.user_id).await.unwrap();
        assert_ne!(new_key, user.api_key);

        let err = identity.resolve_api_key(&user.api_key).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidKey));
        let resolved = identity.resolve_api_key(&new_key).await.unwrap();
        assert_eq!(resolved.user_id, user.user_id);
    }
}
